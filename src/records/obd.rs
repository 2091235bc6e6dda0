//! Vehicle datapoint and OBD monitor configuration records.

use std::fmt;

use super::{RecordError, expect_name};

/// One polled vehicle datapoint: `OBD:<key>=<value>|<unit>`. NAME carries the
/// listen-key the datapoint belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct DatapointRecord {
    pub key: String,
    pub value: f64,
    pub unit: String,
}

impl DatapointRecord {
    pub const LEADER: &'static str = "OBD";
    pub const SUBJECT: &'static str = "obd2.data";

    pub fn new(key: &str, value: f64, unit: &str) -> Self {
        Self {
            key: key.to_string(),
            value,
            unit: unit.to_string(),
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        let invalid = |reason: String| RecordError::InvalidValue {
            leader: Self::LEADER,
            reason,
        };

        let (val, unit) = value
            .split_once('|')
            .ok_or_else(|| invalid(format!("expected value|unit: {}", value)))?;
        let val: f64 = val
            .parse()
            .map_err(|_| invalid(format!("non-numeric value: {}", val)))?;

        Ok(Self::new(name, val, unit))
    }
}

impl fmt::Display for DatapointRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}={}|{}",
            Self::LEADER,
            self.key,
            self.value,
            self.unit
        )
    }
}

/// Priority a polled OBD command feeds into, or `Remove` to stop polling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObdPriority {
    Immediate = 0,
    High = 1,
    Low = 2,
    Remove = 3,
}

impl ObdPriority {
    fn from_digit(d: u8) -> Option<Self> {
        match d {
            0 => Some(ObdPriority::Immediate),
            1 => Some(ObdPriority::High),
            2 => Some(ObdPriority::Low),
            3 => Some(ObdPriority::Remove),
            _ => None,
        }
    }
}

/// OBD polling configuration: `COBD1:MONCONF=<shortcmd>.<priority>.<0|1>`.
///
/// The short command token is carried verbatim; mapping it to the poller's
/// full command name is the OBD service's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct ObdMonitorConfigRecord {
    pub command: String,
    pub priority: ObdPriority,
    /// Whether the polled datapoint is also forwarded to the pit side.
    pub send_to_pit: bool,
}

impl ObdMonitorConfigRecord {
    pub const LEADER: &'static str = "COBD1";
    pub const NAME: &'static str = "MONCONF";
    pub const SUBJECT: &'static str = "config.obd2";

    pub fn new(command: &str, priority: ObdPriority, send_to_pit: bool) -> Self {
        Self {
            command: command.to_string(),
            priority,
            send_to_pit,
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        expect_name(Self::LEADER, Self::NAME, name)?;

        let invalid = |reason: String| RecordError::InvalidValue {
            leader: Self::LEADER,
            reason,
        };

        let parts: Vec<&str> = value.split('.').collect();
        let [command, priority, to_pit] = parts[..] else {
            return Err(invalid(format!(
                "expected shortcmd.priority.toPit: {}",
                value
            )));
        };

        let priority = priority
            .parse::<u8>()
            .ok()
            .and_then(ObdPriority::from_digit)
            .ok_or_else(|| invalid(format!("bad priority: {}", priority)))?;
        let send_to_pit = match to_pit {
            "0" => false,
            "1" => true,
            other => return Err(invalid(format!("toPit must be 0 or 1: {}", other))),
        };

        Ok(Self::new(command, priority, send_to_pit))
    }
}

impl fmt::Display for ObdMonitorConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}={}.{}.{}",
            Self::LEADER,
            Self::NAME,
            self.command,
            self.priority as u8,
            self.send_to_pit as u8
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datapoint_round_trip() {
        let dp = DatapointRecord::new("rpm", 1500.0, "rpm");
        assert_eq!(dp.to_string(), "OBD:rpm=1500|rpm");
        assert_eq!(DatapointRecord::parse("rpm", "1500|rpm").unwrap(), dp);
    }

    #[test]
    fn datapoint_keeps_unit_text() {
        let dp = DatapointRecord::parse("coolant", "92.5|degC").unwrap();
        assert_eq!(dp.value, 92.5);
        assert_eq!(dp.unit, "degC");
    }

    #[test]
    fn datapoint_rejects_missing_unit() {
        assert!(DatapointRecord::parse("rpm", "1500").is_err());
        assert!(DatapointRecord::parse("rpm", "fast|rpm").is_err());
    }

    #[test]
    fn monitor_config_round_trip() {
        let cfg = ObdMonitorConfigRecord::new("rpm", ObdPriority::High, true);
        assert_eq!(cfg.to_string(), "COBD1:MONCONF=rpm.1.1");
        assert_eq!(
            ObdMonitorConfigRecord::parse("MONCONF", "rpm.1.1").unwrap(),
            cfg
        );
    }

    #[test]
    fn monitor_config_rejects_bad_priority() {
        assert!(ObdMonitorConfigRecord::parse("MONCONF", "rpm.7.1").is_err());
        assert!(ObdMonitorConfigRecord::parse("MONCONF", "rpm.1.2").is_err());
    }
}
