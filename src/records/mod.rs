//! Typed record surface exchanged over the telemetry link.
//!
//! A record is a self-describing text message `LEADER:NAME=VALUE`. LEADER is
//! an uppercase alphanumeric tag identifying the record class, NAME is an
//! alphanumeric tag scoped to the class, and VALUE is an opaque payload whose
//! internal structure the class defines. Records are immutable once built;
//! [`unpack`] turns received text back into the typed form.
//!
//! Each class also advertises a canonical bus subject so the host can route
//! parsed records to its publish/subscribe fabric.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

mod alert;
mod obd;
mod radio_cfg;
mod request;
mod text;

pub use alert::{AlertClearRecord, AlertConfigRecord, AlertRecord, Comparator};
pub use obd::{DatapointRecord, ObdMonitorConfigRecord, ObdPriority};
pub use radio_cfg::{RadioNetworkRecord, RadioParamsRecord, RadioPasswordRecord};
pub use request::RequestConfigRecord;
pub use text::TextMessageRecord;

/// Errors surfaced while parsing record text.
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    /// Text does not match the `LEADER:NAME=VALUE` shape.
    #[error("invalid record format: {0}")]
    InvalidFormat(String),
    /// The leader tag is not registered.
    #[error("unknown leader: {0}")]
    UnknownLeader(String),
    /// The class-specific VALUE payload failed validation.
    #[error("invalid {leader} value: {reason}")]
    InvalidValue {
        leader: &'static str,
        reason: String,
    },
}

/// All registered leaders, for registry sanity checks.
pub const LEADERS: &[&str] = &[
    AlertRecord::LEADER,
    AlertConfigRecord::LEADER,
    AlertClearRecord::LEADER,
    RadioParamsRecord::LEADER,
    RadioPasswordRecord::LEADER,
    RadioNetworkRecord::LEADER,
    DatapointRecord::LEADER,
    ObdMonitorConfigRecord::LEADER,
    RequestConfigRecord::LEADER,
    TextMessageRecord::LEADER,
];

/// A parsed record of any registered class.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Alert(AlertRecord),
    AlertConfig(AlertConfigRecord),
    AlertClear(AlertClearRecord),
    RadioParams(RadioParamsRecord),
    RadioPassword(RadioPasswordRecord),
    RadioNetwork(RadioNetworkRecord),
    Datapoint(DatapointRecord),
    ObdMonitorConfig(ObdMonitorConfigRecord),
    RequestConfig(RequestConfigRecord),
    TextMessage(TextMessageRecord),
}

impl Record {
    /// Leader tag of the contained class.
    pub fn leader(&self) -> &'static str {
        match self {
            Record::Alert(_) => AlertRecord::LEADER,
            Record::AlertConfig(_) => AlertConfigRecord::LEADER,
            Record::AlertClear(_) => AlertClearRecord::LEADER,
            Record::RadioParams(_) => RadioParamsRecord::LEADER,
            Record::RadioPassword(_) => RadioPasswordRecord::LEADER,
            Record::RadioNetwork(_) => RadioNetworkRecord::LEADER,
            Record::Datapoint(_) => DatapointRecord::LEADER,
            Record::ObdMonitorConfig(_) => ObdMonitorConfigRecord::LEADER,
            Record::RequestConfig(_) => RequestConfigRecord::LEADER,
            Record::TextMessage(_) => TextMessageRecord::LEADER,
        }
    }

    /// Canonical bus subject for host-side routing.
    pub fn subject(&self) -> &'static str {
        match self {
            Record::Alert(_) => AlertRecord::SUBJECT,
            Record::AlertConfig(_) => AlertConfigRecord::SUBJECT,
            Record::AlertClear(_) => AlertClearRecord::SUBJECT,
            Record::RadioParams(_) | Record::RadioPassword(_) | Record::RadioNetwork(_) => {
                radio_cfg::SUBJECT
            }
            Record::Datapoint(_) => DatapointRecord::SUBJECT,
            Record::ObdMonitorConfig(_) => ObdMonitorConfigRecord::SUBJECT,
            Record::RequestConfig(_) => RequestConfigRecord::SUBJECT,
            Record::TextMessage(_) => TextMessageRecord::SUBJECT,
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::Alert(r) => r.fmt(f),
            Record::AlertConfig(r) => r.fmt(f),
            Record::AlertClear(r) => r.fmt(f),
            Record::RadioParams(r) => r.fmt(f),
            Record::RadioPassword(r) => r.fmt(f),
            Record::RadioNetwork(r) => r.fmt(f),
            Record::Datapoint(r) => r.fmt(f),
            Record::ObdMonitorConfig(r) => r.fmt(f),
            Record::RequestConfig(r) => r.fmt(f),
            Record::TextMessage(r) => r.fmt(f),
        }
    }
}

fn leader_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z0-9]+):").expect("leader regex"))
}

fn record_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z0-9]+):([a-zA-Z0-9]+)=(.*)$").expect("record regex"))
}

/// Split record text into its `(leader, name, value)` fields.
pub(crate) fn match_record(text: &str) -> Result<(&str, &str, &str), RecordError> {
    let caps = record_re()
        .captures(text)
        .ok_or_else(|| RecordError::InvalidFormat(text.to_string()))?;
    Ok((
        caps.get(1).map_or("", |m| m.as_str()),
        caps.get(2).map_or("", |m| m.as_str()),
        caps.get(3).map_or("", |m| m.as_str()),
    ))
}

/// Reject a name that does not match a class's fixed NAME tag.
pub(crate) fn expect_name(
    leader: &'static str,
    expected: &str,
    got: &str,
) -> Result<(), RecordError> {
    if got == expected {
        Ok(())
    } else {
        Err(RecordError::InvalidValue {
            leader,
            reason: format!("name mismatch: {} != {}", expected, got),
        })
    }
}

/// Parse record text into its typed form.
///
/// The leader is extracted first; text without a leader is
/// [`RecordError::InvalidFormat`] and an unregistered leader is
/// [`RecordError::UnknownLeader`]. The class parser then validates the
/// class-specific VALUE shape.
pub fn unpack(text: &str) -> Result<Record, RecordError> {
    let leader = leader_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| RecordError::InvalidFormat(text.to_string()))?;

    if !LEADERS.iter().any(|&known| known == leader) {
        return Err(RecordError::UnknownLeader(leader.to_string()));
    }

    let (_, name, value) = match_record(text)?;

    match leader {
        AlertRecord::LEADER => AlertRecord::parse(name, value).map(Record::Alert),
        AlertConfigRecord::LEADER => AlertConfigRecord::parse(name, value).map(Record::AlertConfig),
        AlertClearRecord::LEADER => AlertClearRecord::parse(name, value).map(Record::AlertClear),
        RadioParamsRecord::LEADER => RadioParamsRecord::parse(name, value).map(Record::RadioParams),
        RadioPasswordRecord::LEADER => {
            RadioPasswordRecord::parse(name, value).map(Record::RadioPassword)
        }
        RadioNetworkRecord::LEADER => {
            RadioNetworkRecord::parse(name, value).map(Record::RadioNetwork)
        }
        DatapointRecord::LEADER => DatapointRecord::parse(name, value).map(Record::Datapoint),
        ObdMonitorConfigRecord::LEADER => {
            ObdMonitorConfigRecord::parse(name, value).map(Record::ObdMonitorConfig)
        }
        RequestConfigRecord::LEADER => {
            RequestConfigRecord::parse(name, value).map(Record::RequestConfig)
        }
        TextMessageRecord::LEADER => TextMessageRecord::parse(name, value).map(Record::TextMessage),
        _ => unreachable!("leader {} registered but not dispatched", leader),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaders_are_unique() {
        for (i, leader) in LEADERS.iter().enumerate() {
            assert!(
                !LEADERS[i + 1..].contains(leader),
                "duplicate leader registered: {}",
                leader
            );
        }
    }

    #[test]
    fn unpack_rejects_unleadered_text() {
        assert!(matches!(
            unpack("no leader here"),
            Err(RecordError::InvalidFormat(_))
        ));
        assert!(matches!(unpack(""), Err(RecordError::InvalidFormat(_))));
        assert!(matches!(
            unpack("lower:case=1"),
            Err(RecordError::InvalidFormat(_))
        ));
    }

    #[test]
    fn unpack_rejects_unknown_leader() {
        assert_eq!(
            unpack("ZZZ:name=value"),
            Err(RecordError::UnknownLeader("ZZZ".to_string()))
        );
    }

    #[test]
    fn unpack_round_trips_every_class() {
        let texts = [
            "A:warning=rpm@1@4600",
            "AC:warning=rpm@GTE@4500@1",
            "ACS:warning=rpm",
            "CL1:PARAMS=10.9.1.4",
            "CL2:PASS=0123456789abcdef0123456789abcdef",
            "CL3:NET=2.5",
            "OBD:rpm=1500|rpm",
            "COBD1:MONCONF=rpm.1.1",
            "REQ:LORA=",
            "SM:MSG=30|box this lap",
        ];
        for text in texts {
            let record = unpack(text).unwrap_or_else(|e| panic!("{text}: {e}"));
            assert_eq!(record.to_string(), text);
        }
    }

    #[test]
    fn subjects_cover_every_class() {
        let record = unpack("A:warning=rpm@1@4600").unwrap();
        assert_eq!(record.subject(), "alert.trigger");
        let record = unpack("CL1:PARAMS=10.9.1.4").unwrap();
        assert_eq!(record.subject(), "config.lora");
        let record = unpack("OBD:rpm=1500|rpm").unwrap();
        assert_eq!(record.subject(), "obd2.data");
    }
}
