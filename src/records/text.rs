//! Short free-text message record, shown on the receiving dashboard.

use std::fmt;

use super::{RecordError, expect_name};

/// `SM:MSG=<display_seconds>|<message>`. The message may itself contain `|`;
/// only the first separator is structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessageRecord {
    pub display_seconds: u32,
    pub message: String,
}

impl TextMessageRecord {
    pub const LEADER: &'static str = "SM";
    pub const NAME: &'static str = "MSG";
    pub const SUBJECT: &'static str = "sse.message";

    pub fn new(message: &str, display_seconds: u32) -> Self {
        Self {
            display_seconds,
            message: message.to_string(),
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        expect_name(Self::LEADER, Self::NAME, name)?;

        let invalid = |reason: String| RecordError::InvalidValue {
            leader: Self::LEADER,
            reason,
        };

        let (seconds, message) = value
            .split_once('|')
            .ok_or_else(|| invalid(format!("expected seconds|message: {}", value)))?;
        let display_seconds = seconds
            .parse()
            .map_err(|_| invalid(format!("non-numeric display time: {}", seconds)))?;

        Ok(Self::new(message, display_seconds))
    }
}

impl fmt::Display for TextMessageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}={}|{}",
            Self::LEADER,
            Self::NAME,
            self.display_seconds,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_message_round_trip() {
        let msg = TextMessageRecord::new("box this lap", 30);
        assert_eq!(msg.to_string(), "SM:MSG=30|box this lap");
        assert_eq!(
            TextMessageRecord::parse("MSG", "30|box this lap").unwrap(),
            msg
        );
    }

    #[test]
    fn message_may_contain_separator() {
        let msg = TextMessageRecord::parse("MSG", "10|fuel: 12.3 | tires ok").unwrap();
        assert_eq!(msg.display_seconds, 10);
        assert_eq!(msg.message, "fuel: 12.3 | tires ok");
    }
}
