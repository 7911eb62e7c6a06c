//! Command history: an in-memory list backed by a plain-text file.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use failure::{Fail, ResultExt};
use log::debug;

use crate::errors::{ErrorKind, Result};

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;
pub const HISTORY_FILE_NAME: &str = ".minibash_history";

#[derive(Clone, Debug)]
pub struct History {
    entries: VecDeque<String>,
    capacity: usize,
    /// The total number of entries ever added; numbers the entries.
    count: usize,
}

impl History {
    pub fn with_capacity(capacity: usize) -> History {
        History {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            count: 0,
        }
    }

    /// Adds `line` unless it is blank or repeats the newest entry. Returns
    /// whether it was added.
    pub fn push(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
        if self.capacity == 0
            || line.trim().is_empty()
            || self.entries.back().map(String::as_str) == Some(line)
        {
            return false;
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line.to_string());
        self.count += 1;
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.count = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest `n` entries with their 1-based numbers, oldest first.
    pub fn last(&self, n: usize) -> impl Iterator<Item = (usize, &str)> {
        let skip = self.entries.len().saturating_sub(n);
        let first_number = self.count - self.entries.len() + 1;
        self.entries
            .iter()
            .enumerate()
            .skip(skip)
            .map(move |(i, line)| (first_number + i, line.as_str()))
    }

    /// Appends the entries of `path`. A missing file is not an error.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no history file at {}", path.display());
                return Ok(());
            }
            Err(e) => return Err(e.context(ErrorKind::Io).into()),
        };

        for line in BufReader::new(file).lines() {
            self.push(&line.context(ErrorKind::Io)?);
        }
        debug!("loaded {} history entries from {}", self.len(), path.display());
        Ok(())
    }

    /// Writes one entry per line, oldest first.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path).context(ErrorKind::Io)?);
        for line in &self.entries {
            writeln!(out, "{}", line).context(ErrorKind::Io)?;
        }
        out.flush().context(ErrorKind::Io)?;
        Ok(())
    }
}

impl Default for History {
    fn default() -> Self {
        History::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (number, line) in self.last(self.len()) {
            writeln!(f, "{}\t{}", number, line)?;
        }
        Ok(())
    }
}
