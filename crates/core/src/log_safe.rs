use std::fmt::{Display, Formatter, Write};

/// Display wrapper that neutralizes control characters before text reaches a log sink.
///
/// Consent identifiers and error text can originate from request content, so
/// carriage returns, line feeds and other control characters are replaced
/// with `_` to keep one event on one log line.
#[derive(Debug, Clone, Copy)]
pub struct LogSafe<'a>(pub &'a str);

impl Display for LogSafe<'_> {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        for character in self.0.chars() {
            if character.is_control() {
                formatter.write_char('_')?;
            } else {
                formatter.write_char(character)?;
            }
        }

        Ok(())
    }
}

/// Returns an owned copy of `value` with control characters replaced.
#[must_use]
pub fn log_safe(value: &str) -> String {
    LogSafe(value).to_string()
}
