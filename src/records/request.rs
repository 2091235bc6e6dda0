//! Configuration request record.

use std::fmt;

use super::RecordError;

/// Asks the other endpoint to re-send a subsystem's configuration records.
/// NAME is the subsystem id (`LORA`, `ALERTS`, ...); VALUE is unused and may
/// be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestConfigRecord {
    pub subsystem: String,
    pub detail: String,
}

impl RequestConfigRecord {
    pub const LEADER: &'static str = "REQ";
    pub const SUBJECT: &'static str = "config.request";

    pub fn new(subsystem: &str) -> Self {
        Self {
            subsystem: subsystem.to_string(),
            detail: String::new(),
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        Ok(Self {
            subsystem: name.to_string(),
            detail: value.to_string(),
        })
    }
}

impl fmt::Display for RequestConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}={}", Self::LEADER, self.subsystem, self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let req = RequestConfigRecord::new("LORA");
        assert_eq!(req.to_string(), "REQ:LORA=");
        assert_eq!(RequestConfigRecord::parse("LORA", "").unwrap(), req);
    }
}
