use std::io;

use atty::{self, Stream};

/// The controlling terminal is whatever standard input refers to.
pub fn get_terminal() -> io::Stdin {
    io::stdin()
}

pub fn isatty() -> bool {
    atty::is(Stream::Stdin)
}
