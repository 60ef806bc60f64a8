//! `tag K=V` CLI-level parsing (`spec.md` §6, §8 round-trip law).
//!
//! Key must match the HTTP token grammar (RFC 7230 `token`); value may
//! contain any printable byte. Parsing splits on the first `=`.

use std::fmt;

use crate::error::{CoreError, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

fn is_token_char(c: char) -> bool {
    // RFC 7230 tchar, the grammar HTTP header field names use.
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '.'
                | '^'
                | '_'
                | '`'
                | '|'
                | '~'
        )
}

fn is_printable_byte(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

impl Tag {
    /// Parse `"K=V"`. Fails `ErrorKind::Configuration` if there's no `=`,
    /// the key is empty or not a valid token, or the value contains a
    /// non-printable byte.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let (name, value) = raw.split_once('=').ok_or_else(|| {
            CoreError::new(
                "config.tag_missing_equals",
                ErrorKind::Configuration,
                format!("tag `{raw}` is missing `=`"),
            )
        })?;

        if name.is_empty() || !name.chars().all(is_token_char) {
            return Err(CoreError::new(
                "config.tag_invalid_name",
                ErrorKind::Configuration,
                format!("tag name `{name}` is not a valid token"),
            ));
        }
        if !value.bytes().all(is_printable_byte) {
            return Err(CoreError::new(
                "config.tag_invalid_value",
                ErrorKind::Configuration,
                format!("tag value for `{name}` contains a non-printable byte"),
            ));
        }

        Ok(Tag {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let tag = Tag::parse("env=production").unwrap();
        assert_eq!(tag.name, "env");
        assert_eq!(tag.value, "production");
        assert_eq!(tag.to_string(), "env=production");
    }

    #[test]
    fn value_may_contain_equals() {
        let tag = Tag::parse("query=a=b").unwrap();
        assert_eq!(tag.value, "a=b");
    }

    #[test]
    fn rejects_missing_equals() {
        assert!(Tag::parse("no-equals-sign").is_err());
    }

    #[test]
    fn rejects_invalid_name() {
        assert!(Tag::parse("bad name=value").is_err());
    }

    #[test]
    fn rejects_non_printable_value() {
        assert!(Tag::parse("k=\u{0007}bell").is_err());
    }
}
