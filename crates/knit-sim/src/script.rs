//! Replay scripts.
//!
//! One command per line; `#` starts a comment:
//!
//! ```text
//! right 40   # forty encoder steps towards the last needle
//! left 8
//! trace      # toggle protocol tracing
//! reset      # reset the microcontroller
//! ```

use knit_core::EventKind;
use thiserror::Error;

/// Malformed replay script line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// First word is not a known command.
    #[error("line {line}: unknown command `{command}`")]
    UnknownCommand {
        /// 1-based line number.
        line: usize,
        /// Offending word.
        command: String,
    },
    /// A move command without its step count.
    #[error("line {line}: `{command}` needs a step count")]
    MissingCount {
        /// 1-based line number.
        line: usize,
        /// Move command name.
        command: &'static str,
    },
    /// Step count is not a non-negative integer.
    #[error("line {line}: invalid step count `{value}`")]
    InvalidCount {
        /// 1-based line number.
        line: usize,
        /// Offending text.
        value: String,
    },
    /// Extra words after a complete command.
    #[error("line {line}: unexpected argument `{extra}`")]
    TrailingArgument {
        /// 1-based line number.
        line: usize,
        /// First extra word.
        extra: String,
    },
}

/// Expands `source` into the queue events it describes, in order.
///
/// # Errors
///
/// Returns the first [`ScriptError`] found.
pub fn parse_script(source: &str) -> Result<Vec<EventKind>, ScriptError> {
    let mut events = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let text = raw.split('#').next().unwrap_or_default();
        let mut words = text.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };

        let (kind, name) = match command.to_ascii_lowercase().as_str() {
            "right" => (EventKind::MoveRight, "right"),
            "left" => (EventKind::MoveLeft, "left"),
            "reset" => (EventKind::Reset, "reset"),
            "trace" => (EventKind::ToggleTrace, "trace"),
            _ => {
                return Err(ScriptError::UnknownCommand {
                    line,
                    command: command.to_string(),
                })
            }
        };

        let count = match kind {
            EventKind::MoveLeft | EventKind::MoveRight => {
                let value = words.next().ok_or(ScriptError::MissingCount {
                    line,
                    command: name,
                })?;
                value.parse::<usize>().map_err(|_| ScriptError::InvalidCount {
                    line,
                    value: value.to_string(),
                })?
            }
            EventKind::Reset | EventKind::ToggleTrace => 1,
        };
        if let Some(extra) = words.next() {
            return Err(ScriptError::TrailingArgument {
                line,
                extra: extra.to_string(),
            });
        }
        events.extend(std::iter::repeat(kind).take(count));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_moves_and_skips_comments() {
        let events = parse_script("# warm up\nright 3\n\n  left 1 # back\nTRACE\nreset\n").unwrap();
        assert_eq!(
            events,
            vec![
                EventKind::MoveRight,
                EventKind::MoveRight,
                EventKind::MoveRight,
                EventKind::MoveLeft,
                EventKind::ToggleTrace,
                EventKind::Reset,
            ]
        );
    }

    #[test]
    fn reports_the_failing_line() {
        assert_eq!(
            parse_script("right 1\njump 2\n"),
            Err(ScriptError::UnknownCommand {
                line: 2,
                command: "jump".to_string()
            })
        );
        assert_eq!(
            parse_script("left\n"),
            Err(ScriptError::MissingCount {
                line: 1,
                command: "left"
            })
        );
        assert!(matches!(
            parse_script("right -4"),
            Err(ScriptError::InvalidCount { line: 1, .. })
        ));
        assert!(matches!(
            parse_script("reset now"),
            Err(ScriptError::TrailingArgument { line: 1, .. })
        ));
    }

    #[test]
    fn error_messages_name_the_line() {
        let error = parse_script("\n\nspin").unwrap_err();
        assert_eq!(error.to_string(), "line 3: unknown command `spin`");
    }
}
