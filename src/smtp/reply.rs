//! SMTP reply lines.

use std::fmt;

/// A complete server reply: one status code and one or more text lines.
///
/// Multi-line replies follow the usual continuation convention: every line but
/// the last carries a hyphen after the code, the last one a space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: u16,
    lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    pub fn multiline(code: u16, lines: Vec<String>) -> Self {
        Self { code, lines }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The text of the last line, which is the whole text for single-line replies.
    pub fn text(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or_default()
    }

    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.code)
    }
}

impl fmt::Display for Reply {
    /// Renders the reply exactly as it goes on the wire, CRLF included.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lines.is_empty() {
            return write!(f, "{}\r\n", self.code);
        }
        let last = self.lines.len() - 1;
        for (i, line) in self.lines.iter().enumerate() {
            let separator = if i < last { '-' } else { ' ' };
            write!(f, "{}{}{}\r\n", self.code, separator, line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_format() {
        let reply = Reply::new(250, "2.0.0 Ok");
        assert_eq!(reply.to_string(), "250 2.0.0 Ok\r\n");
        assert_eq!(reply.text(), "2.0.0 Ok");
    }

    #[test]
    fn test_multiline_format() {
        let reply = Reply::multiline(
            250,
            vec![
                "mx.local at your service, [127.0.0.1]".to_string(),
                "8BITMIME".to_string(),
                "STARTTLS".to_string(),
            ],
        );
        assert_eq!(
            reply.to_string(),
            "250-mx.local at your service, [127.0.0.1]\r\n250-8BITMIME\r\n250 STARTTLS\r\n"
        );
    }

    #[test]
    fn test_empty_text_keeps_separator() {
        // "334 " is the PLAIN continuation prompt
        assert_eq!(Reply::new(334, "").to_string(), "334 \r\n");
    }

    #[test]
    fn test_success_classes() {
        assert!(Reply::new(250, "Ok").is_success());
        assert!(Reply::new(354, "go").is_success());
        assert!(!Reply::new(450, "later").is_success());
        assert!(!Reply::new(550, "no").is_success());
    }
}
