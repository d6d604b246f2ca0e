//! Sender directive grammar.
//!
//! A sender configures an upload through the SSH command string:
//!
//! ```text
//! ssh ferry.example -p 2222 from=Alex msg=Hello, John! Here's your file t=5 < file.txt
//! ```
//!
//! The string is split on whitespace. A token containing `=` assigns a key
//! (`msg`, `from`, `filename`, `t`) and makes it the active key; a token
//! without `=` continues the active key's value, joined by a single space.
//! That lets multi-word values go unquoted.
//!
//! Parsing is fail-closed: an unknown key, a word before any key, or a `t`
//! that is not a whole number in `1..=60` rejects the whole set.

use crate::options::{SaveMinutes, TransferOptions};

/// Why a directive set was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectiveError {
    /// A `key=value` token named a key the relay does not know.
    #[error("unknown option `{key}`")]
    UnknownKey {
        /// The key as written by the sender.
        key: String,
    },

    /// A bare word appeared before any key was assigned.
    #[error("`{word}` does not belong to any option")]
    StrayWord {
        /// The orphaned word.
        word: String,
    },

    /// The `t` value was not a whole number of minutes in range.
    #[error(
        "`t` must be a whole number of minutes between {min} and {max}, got `{value}`",
        min = SaveMinutes::MIN,
        max = SaveMinutes::MAX
    )]
    InvalidSave {
        /// The value as accumulated from the command string.
        value: String,
    },
}

/// One lexical unit of a command string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// `key=value`, split at the first `=`.
    Assign {
        /// Text before the first `=`.
        key: &'a str,
        /// Text after the first `=` (may be empty or contain more `=`).
        value: &'a str,
    },
    /// A token without `=`.
    Word(&'a str),
}

impl<'a> Token<'a> {
    fn classify(raw: &'a str) -> Self {
        match raw.split_once('=') {
            Some((key, value)) => Token::Assign {
                key: key.trim(),
                value: value.trim(),
            },
            None => Token::Word(raw),
        }
    }
}

/// Split a command string into tokens.
pub fn tokenize(command: &str) -> impl Iterator<Item = Token<'_>> {
    command.split_whitespace().map(Token::classify)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Key {
    Message,
    From,
    Filename,
    Save,
}

impl Key {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "msg" => Some(Key::Message),
            "from" => Some(Key::From),
            "filename" => Some(Key::Filename),
            "t" => Some(Key::Save),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    active: Option<Key>,
    message: Option<String>,
    from: Option<String>,
    filename: Option<String>,
    save: Option<String>,
}

impl Accumulator {
    fn slot(&mut self, key: Key) -> &mut Option<String> {
        match key {
            Key::Message => &mut self.message,
            Key::From => &mut self.from,
            Key::Filename => &mut self.filename,
            Key::Save => &mut self.save,
        }
    }

    fn apply(&mut self, token: Token<'_>) -> Result<(), DirectiveError> {
        match token {
            Token::Assign { key, value } => {
                let key = Key::from_name(key).ok_or_else(|| DirectiveError::UnknownKey {
                    key: key.to_string(),
                })?;
                self.active = Some(key);
                *self.slot(key) = Some(value.to_string());
            }
            Token::Word(word) => {
                let key = self.active.ok_or_else(|| DirectiveError::StrayWord {
                    word: word.to_string(),
                })?;
                match self.slot(key) {
                    Some(value) if !value.is_empty() => {
                        value.push(' ');
                        value.push_str(word);
                    }
                    slot => *slot = Some(word.to_string()),
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<TransferOptions, DirectiveError> {
        let save = match self.save {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .ok()
                    .and_then(SaveMinutes::new)
                    .ok_or(DirectiveError::InvalidSave { value: raw })?,
            ),
            None => None,
        };

        Ok(TransferOptions {
            from: self.from.filter(|v| !v.is_empty()),
            message: self.message.filter(|v| !v.is_empty()),
            filename: self.filename.filter(|v| !v.is_empty()),
            save,
        })
    }
}

/// Parse a sender command string into transfer options.
///
/// An empty string yields default options.
pub fn parse_directives(command: &str) -> Result<TransferOptions, DirectiveError> {
    let mut acc = Accumulator::default();
    for token in tokenize(command) {
        acc.apply(token)?;
    }
    acc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_table() {
        let cases: &[(&str, Token<'_>)] = &[
            ("msg=hi", Token::Assign { key: "msg", value: "hi" }),
            ("t=", Token::Assign { key: "t", value: "" }),
            ("=x", Token::Assign { key: "", value: "x" }),
            ("a=b=c", Token::Assign { key: "a", value: "b=c" }),
            ("hello", Token::Word("hello")),
        ];
        for (raw, expected) in cases {
            assert_eq!(tokenize(raw).next(), Some(*expected), "token {raw:?}");
        }
    }

    #[test]
    fn full_example_from_docs() {
        let options = parse_directives(
            "from=Alex msg=Hello, John! Here's your special file filename=main.txt t=5",
        )
        .unwrap();

        assert_eq!(options.from.as_deref(), Some("Alex"));
        assert_eq!(
            options.message.as_deref(),
            Some("Hello, John! Here's your special file")
        );
        assert_eq!(options.filename.as_deref(), Some("main.txt"));
        assert_eq!(options.save, SaveMinutes::new(5));
    }

    #[test]
    fn empty_command_yields_defaults() {
        assert_eq!(parse_directives("").unwrap(), TransferOptions::default());
        assert_eq!(parse_directives("   ").unwrap(), TransferOptions::default());
    }

    #[test]
    fn missing_t_leaves_save_unset() {
        let options = parse_directives("from=Alex").unwrap();
        assert_eq!(options.from.as_deref(), Some("Alex"));
        assert_eq!(options.save, None);
    }

    #[test]
    fn ttl_out_of_range_rejects_everything() {
        for command in ["t=61", "t=0", "from=Alex msg=hi t=61", "t=-1"] {
            assert!(
                matches!(
                    parse_directives(command),
                    Err(DirectiveError::InvalidSave { .. })
                ),
                "{command} should be rejected"
            );
        }
    }

    #[test]
    fn ttl_must_be_integer() {
        assert_eq!(
            parse_directives("t=five"),
            Err(DirectiveError::InvalidSave {
                value: "five".into()
            })
        );
        assert!(parse_directives("t=").is_err());
        assert!(parse_directives("t=1.5").is_err());
    }

    #[test]
    fn word_after_t_continues_t() {
        assert_eq!(
            parse_directives("from=Alex t=5 minutes"),
            Err(DirectiveError::InvalidSave {
                value: "5 minutes".into()
            })
        );
    }

    #[test]
    fn ttl_bounds_accepted() {
        assert_eq!(parse_directives("t=1").unwrap().save, SaveMinutes::new(1));
        assert_eq!(parse_directives("t=60").unwrap().save, SaveMinutes::new(60));
    }

    #[test]
    fn unknown_key_rejected() {
        assert_eq!(
            parse_directives("unknown=x"),
            Err(DirectiveError::UnknownKey {
                key: "unknown".into()
            })
        );
        assert!(parse_directives("from=Alex save=3").is_err());
        assert!(parse_directives("=x").is_err());
    }

    #[test]
    fn stray_word_before_any_key_rejected() {
        assert_eq!(
            parse_directives("hello from=Alex"),
            Err(DirectiveError::StrayWord {
                word: "hello".into()
            })
        );
    }

    #[test]
    fn repeated_key_replaces_value() {
        let options = parse_directives("msg=first try msg=second").unwrap();
        assert_eq!(options.message.as_deref(), Some("second"));
    }

    #[test]
    fn empty_value_continued_by_word() {
        let options = parse_directives("filename= report.pdf").unwrap();
        assert_eq!(options.filename.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn empty_text_value_is_absent() {
        let options = parse_directives("msg= from=Bo").unwrap();
        assert_eq!(options.message, None);
        assert_eq!(options.from.as_deref(), Some("Bo"));
    }

    #[test]
    fn error_messages_are_readable() {
        let err = parse_directives("t=99").unwrap_err();
        assert_eq!(
            err.to_string(),
            "`t` must be a whole number of minutes between 1 and 60, got `99`"
        );
    }
}
