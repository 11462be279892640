//! Splits a raw command line into its verb and payload.

/// One command line as received from the client.
///
/// `verb` is the first space-separated token, upper-cased; `payload` is the
/// trimmed remainder. `raw` keeps the untouched line for the AUTH continuation
/// path, where the line is a base64 blob rather than a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: String,
    pub payload: String,
    pub raw: String,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let raw = line.trim_end_matches(['\r', '\n']).to_string();
        let trimmed = raw.trim_start();
        let (verb, payload) = match trimmed.split_once(' ') {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (trimmed, ""),
        };

        Command {
            verb: verb.to_uppercase(),
            payload: payload.to_string(),
            raw,
        }
    }
}
