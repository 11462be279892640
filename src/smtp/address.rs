//! Parsing of the `MAIL FROM:` and `RCPT TO:` arguments.
//!
//! The accepted form is `<keyword>:<local@domain>` (keyword matched
//! case-insensitively, optional whitespace after the colon) followed by optional
//! ESMTP parameters such as `SIZE=1024` or `BODY=8BITMIME`. Neither the local
//! part nor the domain may contain `@` or `>`.

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathError {
    /// The argument does not match `keyword:<local@domain>`.
    Syntax,
    /// A `SIZE=` parameter whose value is not a decimal number.
    InvalidSize,
}

/// A reverse-path or forward-path taken from a command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailPath {
    /// The address exactly as the client wrote it.
    pub address: String,
    local: String,
    domain: String,
    params: Vec<(String, Option<String>)>,
}

impl MailPath {
    /// The domain, lower-cased. This is the name used for MX resolution.
    pub fn domain(&self) -> String {
        self.domain.to_lowercase()
    }

    /// The address with its domain forced to lower-case; the local part is kept as sent.
    pub fn normalized(&self) -> String {
        format!("{}@{}", self.local, self.domain())
    }

    /// The value of the `SIZE=` parameter, if the client declared one.
    pub fn size(&self) -> Option<usize> {
        self.param("SIZE").and_then(|value| value.parse().ok())
    }

    /// Looks up an ESMTP parameter by its (upper-case) keyword.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, value)| value.as_deref())
    }
}

/// Parses `argument` (the payload after `MAIL`/`RCPT`) against `keyword`, which
/// is `"from:"` or `"to:"`.
pub fn parse_path(argument: &str, keyword: &str) -> Result<MailPath, PathError> {
    let head = argument.get(..keyword.len()).ok_or(PathError::Syntax)?;
    if !head.eq_ignore_ascii_case(keyword) {
        return Err(PathError::Syntax);
    }

    let rest = argument[keyword.len()..].trim_start();
    let rest = rest.strip_prefix('<').ok_or(PathError::Syntax)?;
    let (inside, tail) = rest.split_once('>').ok_or(PathError::Syntax)?;
    let (local, domain) = inside.split_once('@').ok_or(PathError::Syntax)?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(PathError::Syntax);
    }

    if !tail.is_empty() && !tail.starts_with(char::is_whitespace) {
        return Err(PathError::Syntax);
    }

    let mut params = Vec::new();
    for token in tail.split_whitespace() {
        let (key, value) = match token.split_once('=') {
            Some((key, value)) => (key, Some(value.to_string())),
            None => (token, None),
        };
        if key.is_empty() {
            return Err(PathError::Syntax);
        }
        let key = key.to_ascii_uppercase();
        if key == "SIZE"
            && !value
                .as_deref()
                .is_some_and(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
        {
            debug!("Rejecting SIZE parameter {:?}", value);
            return Err(PathError::InvalidSize);
        }
        params.push((key, value));
    }

    Ok(MailPath {
        address: inside.to_string(),
        local: local.to_string(),
        domain: domain.to_string(),
        params,
    })
}
