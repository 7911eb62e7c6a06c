//! Minibash Parser
//!
//! Turns one line of input into a `Command`. Only words, quoting and the
//! stream redirection operators are understood; pipelines are split on the
//! raw text before their stages are parsed.

use std::path::PathBuf;

use log::debug;

use crate::errors::{Error, Result};

/// A parsed command line. Only `Command::parse` builds one, so `argv`
/// always holds at least the program name.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    /// The text the command was parsed from.
    pub(crate) input: String,
    pub(crate) argv: Vec<String>,
    pub(crate) stdin: Option<PathBuf>,
    pub(crate) stdout: Option<PathBuf>,
    pub(crate) stderr: Option<PathBuf>,
    /// Open `stdout` for appending instead of truncating it.
    pub(crate) append: bool,
    pub(crate) background: bool,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    RedirectIn,
    RedirectOut,
    RedirectAppend,
    RedirectErr,
    Background,
}

impl Command {
    /// Returns `Ok(None)` if `input` holds no words at all.
    pub fn parse(input: &str) -> Result<Option<Self>> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(None);
        }

        let mut command = Command {
            input: input.trim().to_string(),
            argv: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            append: false,
            background: false,
        };

        let mut tokens = tokens.into_iter().peekable();
        while let Some(token) = tokens.next() {
            match token {
                Token::Word(word) => command.argv.push(word),
                Token::Background => {
                    if tokens.peek().is_some() {
                        return Err(Error::syntax("&"));
                    }
                    command.background = true;
                }
                redirect => {
                    let target = match tokens.next() {
                        Some(Token::Word(word)) => PathBuf::from(word),
                        _ => return Err(Error::syntax(redirect.operator())),
                    };
                    match redirect {
                        Token::RedirectIn => command.stdin = Some(target),
                        Token::RedirectOut => {
                            command.stdout = Some(target);
                            command.append = false;
                        }
                        Token::RedirectAppend => {
                            command.stdout = Some(target);
                            command.append = true;
                        }
                        Token::RedirectErr => command.stderr = Some(target),
                        Token::Word(_) | Token::Background => unreachable!(),
                    }
                }
            }
        }

        if command.argv.is_empty() {
            return Err(Error::syntax(input.trim()));
        }

        debug!("parsed Command: {:?}", command);
        Ok(Some(command))
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn is_background(&self) -> bool {
        self.background
    }
}

impl Token {
    fn operator(&self) -> &'static str {
        match *self {
            Token::RedirectIn => "<",
            Token::RedirectOut => ">",
            Token::RedirectAppend => ">>",
            Token::RedirectErr => "2>",
            Token::Background => "&",
            Token::Word(_) => "",
        }
    }
}

/// Is there a `|` outside of quotes?
pub fn is_pipeline(input: &str) -> bool {
    !unquoted_pipes(input).is_empty()
}

/// Splits `input` on every unquoted `|`, dropping empty stages.
pub fn split_pipeline_stages(input: &str) -> Vec<String> {
    let mut stages = Vec::new();
    let mut start = 0;
    for pos in unquoted_pipes(input).into_iter().chain(Some(input.len())) {
        let stage = input[start..pos].trim();
        if !stage.is_empty() {
            stages.push(stage.to_string());
        }
        start = pos + 1;
    }
    stages
}

/// Strips a trailing unquoted `&`, reporting whether there was one.
pub fn split_background(input: &str) -> (&str, bool) {
    let trimmed = input.trim_end();
    if trimmed.ends_with('&') && !is_quoted_at(trimmed, trimmed.len() - 1) {
        (trimmed[..trimmed.len() - 1].trim_end(), true)
    } else {
        (trimmed, false)
    }
}

/// Byte offsets of every `|` outside single or double quotes.
fn unquoted_pipes(input: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('"'), '\\') | (None, '\\') => escaped = true,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '|') => positions.push(i),
            (None, _) => {}
        }
    }
    positions
}

fn is_quoted_at(input: &str, pos: usize) -> bool {
    let mut quote = None;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if i == pos {
            return quote.is_some() || escaped;
        }
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('"'), '\\') | (None, '\\') => escaped = true,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, _) => {}
        }
    }
    false
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    // Distinguishes `''` (an empty word) from no word at all.
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = input.chars().peekable();

    macro_rules! finish_word {
        () => {
            if in_word {
                tokens.push(Token::Word(word.clone()));
                word.clear();
                in_word = false;
                quoted = false;
            }
        };
    }

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\n' | '\r' => finish_word!(),
            '\'' => {
                in_word = true;
                quoted = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err(Error::syntax(input.trim())),
                    }
                }
            }
            '"' => {
                in_word = true;
                quoted = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ '"') | Some(c @ '\\') => word.push(c),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => return Err(Error::syntax(input.trim())),
                        },
                        Some(c) => word.push(c),
                        None => return Err(Error::syntax(input.trim())),
                    }
                }
            }
            '\\' => match chars.next() {
                Some(c) => {
                    in_word = true;
                    quoted = true;
                    word.push(c);
                }
                None => return Err(Error::syntax(input.trim())),
            },
            '<' => {
                finish_word!();
                tokens.push(Token::RedirectIn);
            }
            '>' => {
                let redirect = if in_word && !quoted && word == "2" {
                    word.clear();
                    in_word = false;
                    Token::RedirectErr
                } else {
                    finish_word!();
                    if chars.peek() == Some(&'>') {
                        chars.next();
                        Token::RedirectAppend
                    } else {
                        Token::RedirectOut
                    }
                };
                tokens.push(redirect);
            }
            '&' => {
                finish_word!();
                tokens.push(Token::Background);
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    finish_word!();

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Command {
        Command::parse(input).unwrap().unwrap()
    }

    #[test]
    fn empty() {
        assert!(Command::parse("").unwrap().is_none());
        assert!(Command::parse("   \t").unwrap().is_none());
    }

    #[test]
    fn single_cmd_with_args() {
        let command = parse("cmd var1  var2\tvar3");
        assert_eq!(command.program(), "cmd");
        assert_eq!(command.args(), &["var1", "var2", "var3"]);
        assert!(!command.background);
    }

    #[test]
    fn quotes_group_words() {
        let command = parse(r#"echo 'a  b' "c \"d\"" e\ f ''"#);
        assert_eq!(command.args(), &["a  b", "c \"d\"", "e f", ""]);
    }

    #[test]
    fn unterminated_quote_is_error() {
        assert!(Command::parse("echo 'oops").is_err());
        assert!(Command::parse("echo \"oops").is_err());
    }

    #[test]
    fn infile_valid() {
        let expected = Some(PathBuf::from("infile"));
        assert_eq!(parse("cmd <infile").stdin, expected);
        assert_eq!(parse("cmd < infile").stdin, expected);
    }

    #[test]
    fn infile_invalid() {
        assert!(Command::parse("cmd <").is_err());
    }

    #[test]
    fn outfile_truncate_and_append() {
        let command = parse("cmd > out");
        assert_eq!(command.stdout, Some(PathBuf::from("out")));
        assert!(!command.append);

        let command = parse("cmd >>out");
        assert_eq!(command.stdout, Some(PathBuf::from("out")));
        assert!(command.append);
    }

    #[test]
    fn outfile_invalid() {
        assert!(Command::parse("cmd >").is_err());
        assert!(Command::parse("cmd > &").is_err());
    }

    #[test]
    fn errfile_needs_bare_two() {
        let command = parse("cmd 2> err");
        assert_eq!(command.stderr, Some(PathBuf::from("err")));
        assert_eq!(command.args(), &[] as &[String]);

        let command = parse("cmd '2'> out");
        assert_eq!(command.stdout, Some(PathBuf::from("out")));
        assert_eq!(command.args(), &["2"]);
    }

    #[test]
    fn all_redirects() {
        let command = parse("sort < in > out 2> err");
        assert_eq!(command.argv, vec!["sort"]);
        assert_eq!(command.stdin, Some(PathBuf::from("in")));
        assert_eq!(command.stdout, Some(PathBuf::from("out")));
        assert_eq!(command.stderr, Some(PathBuf::from("err")));
    }

    #[test]
    fn redirect_without_program_is_error() {
        for line in &["> out", "&", "2> err", "< in > out &"] {
            assert!(Command::parse(line).is_err(), "{}", line);
        }
    }

    #[test]
    fn parsed_command_always_has_program() {
        let command = parse("  true &  ");
        assert_eq!(command.program(), "true");
        assert!(command.args().is_empty());
        assert_eq!(command.input(), "true &");
        assert!(command.is_background());
    }

    #[test]
    fn background() {
        let command = parse("sleep 10 &");
        assert!(command.background);
        assert_eq!(command.argv, vec!["sleep", "10"]);
        assert!(parse("sleep 10&").background);
        assert!(Command::parse("sleep & 10").is_err());
        assert!(!parse("echo '&'").background);
    }

    #[test]
    fn pipeline_detection_ignores_quotes() {
        assert!(is_pipeline("echo a | cat"));
        assert!(!is_pipeline("echo 'a | b'"));
        assert!(!is_pipeline("echo \"a | b\""));
        assert!(!is_pipeline("echo a\\|b"));
    }

    #[test]
    fn split_stages() {
        assert_eq!(
            split_pipeline_stages("echo 'x|y' | tr a b |  cat "),
            vec!["echo 'x|y'", "tr a b", "cat"]
        );
        assert_eq!(split_pipeline_stages("a || b"), vec!["a", "b"]);
    }

    #[test]
    fn split_trailing_background() {
        assert_eq!(split_background("a | b &"), ("a | b", true));
        assert_eq!(split_background("a | b"), ("a | b", false));
        assert_eq!(split_background("echo '&'"), ("echo '&'", false));
    }
}
