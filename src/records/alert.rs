//! Alert-related record classes: triggers, rule configuration, forced clears.

use std::fmt;
use std::str::FromStr;

use super::{RecordError, match_record};

/// Comparison operator of an alert rule.
///
/// `Remove` is a configuration sentinel: it deletes the named rule and is
/// never installed as a live comparator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Remove,
}

impl Comparator {
    /// Evaluate the comparison for a sample against a rule threshold.
    /// `Remove` never fires.
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::Gt => value > threshold,
            Comparator::Gte => value >= threshold,
            Comparator::Lt => value < threshold,
            Comparator::Lte => value <= threshold,
            Comparator::Eq => value == threshold,
            Comparator::Remove => false,
        }
    }

    fn token(self) -> &'static str {
        match self {
            Comparator::Gt => "GT",
            Comparator::Gte => "GTE",
            Comparator::Lt => "LT",
            Comparator::Lte => "LTE",
            Comparator::Eq => "EQ",
            Comparator::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Comparator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GT" => Ok(Comparator::Gt),
            "GTE" => Ok(Comparator::Gte),
            "LT" => Ok(Comparator::Lt),
            "LTE" => Ok(Comparator::Lte),
            "EQ" => Ok(Comparator::Eq),
            "REMOVE" => Ok(Comparator::Remove),
            _ => Err(()),
        }
    }
}

/// Edge-triggered alert event emitted by a monitor.
///
/// Wire form: `A:<monitor>=<listen_to>@<0|1>@<value>`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    /// Monitor that produced the event (e.g. `warning`, `alert`).
    pub monitor: String,
    /// Listen-key the event concerns.
    pub listen_to: String,
    /// Whether the condition is now firing (`true`) or cleared (`false`).
    pub triggered: bool,
    /// The sample value that caused the transition.
    pub value: f64,
}

impl AlertRecord {
    pub const LEADER: &'static str = "A";
    pub const SUBJECT: &'static str = "alert.trigger";

    pub fn new(monitor: &str, listen_to: &str, triggered: bool, value: f64) -> Self {
        Self {
            monitor: monitor.to_string(),
            listen_to: listen_to.to_string(),
            triggered,
            value,
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        let invalid = |reason: String| RecordError::InvalidValue {
            leader: Self::LEADER,
            reason,
        };

        let mut parts = value.split('@');
        let (listen_to, triggered, val) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(l), Some(t), Some(v), None) => (l, t, v),
            _ => return Err(invalid(format!("expected listen@triggered@value: {}", value))),
        };

        let triggered = match triggered {
            "0" => false,
            "1" => true,
            other => return Err(invalid(format!("triggered must be 0 or 1: {}", other))),
        };
        let val: f64 = val
            .parse()
            .map_err(|_| invalid(format!("non-numeric value: {}", val)))?;

        Ok(Self::new(name, listen_to, triggered, val))
    }
}

impl fmt::Display for AlertRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}={}@{}@{}",
            Self::LEADER,
            self.monitor,
            self.listen_to,
            self.triggered as u8,
            self.value
        )
    }
}

/// Rule installation (or removal, via [`Comparator::Remove`]) for a monitor.
///
/// Wire form: `AC:<monitor>=<listen_to>@<CMP>@<threshold>@<0|1>`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertConfigRecord {
    pub monitor: String,
    pub listen_to: String,
    pub comparator: Comparator,
    pub threshold: f64,
    /// When set, a fired condition latches until explicitly cleared.
    pub hold: bool,
}

impl AlertConfigRecord {
    pub const LEADER: &'static str = "AC";
    pub const SUBJECT: &'static str = "config.alert";

    pub fn new(
        monitor: &str,
        listen_to: &str,
        comparator: Comparator,
        threshold: f64,
        hold: bool,
    ) -> Self {
        Self {
            monitor: monitor.to_string(),
            listen_to: listen_to.to_string(),
            comparator,
            threshold,
            hold,
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        let invalid = |reason: String| RecordError::InvalidValue {
            leader: Self::LEADER,
            reason,
        };

        let parts: Vec<&str> = value.split('@').collect();
        let [listen_to, cmp, threshold, hold] = parts[..] else {
            return Err(invalid(format!(
                "expected listen@CMP@threshold@hold: {}",
                value
            )));
        };

        let comparator: Comparator = cmp
            .parse()
            .map_err(|_| invalid(format!("unknown comparator: {}", cmp)))?;
        let threshold: f64 = threshold
            .parse()
            .map_err(|_| invalid(format!("non-numeric threshold: {}", threshold)))?;
        let hold = match hold {
            "0" => false,
            "1" => true,
            other => return Err(invalid(format!("hold must be 0 or 1: {}", other))),
        };

        Ok(Self::new(name, listen_to, comparator, threshold, hold))
    }
}

impl fmt::Display for AlertConfigRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}={}@{}@{}@{}",
            Self::LEADER,
            self.monitor,
            self.listen_to,
            self.comparator,
            self.threshold,
            self.hold as u8
        )
    }
}

/// Force-clear of a latched condition. NAME carries the monitor, VALUE the
/// listen-key to clear.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertClearRecord {
    pub monitor: String,
    pub listen_to: String,
}

impl AlertClearRecord {
    pub const LEADER: &'static str = "ACS";
    pub const SUBJECT: &'static str = "alert.clear";

    pub fn new(monitor: &str, listen_to: &str) -> Self {
        Self {
            monitor: monitor.to_string(),
            listen_to: listen_to.to_string(),
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        if value.is_empty() {
            return Err(RecordError::InvalidValue {
                leader: Self::LEADER,
                reason: "empty listen-key".to_string(),
            });
        }
        Ok(Self::new(name, value))
    }

    /// Parse from full record text (host convenience).
    pub fn unpack(text: &str) -> Result<Self, RecordError> {
        let (leader, name, value) = match_record(text)?;
        if leader != Self::LEADER {
            return Err(RecordError::InvalidValue {
                leader: Self::LEADER,
                reason: format!("leader mismatch: {}", leader),
            });
        }
        Self::parse(name, value)
    }
}

impl fmt::Display for AlertClearRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}={}", Self::LEADER, self.monitor, self.listen_to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_record_round_trip() {
        let alert = AlertRecord::new("warning", "rpm", true, 4600.0);
        assert_eq!(alert.to_string(), "A:warning=rpm@1@4600");
        assert_eq!(AlertRecord::parse("warning", "rpm@1@4600").unwrap(), alert);
    }

    #[test]
    fn alert_record_fractional_value() {
        let alert = AlertRecord::new("alert", "oilp", false, 1.5);
        assert_eq!(alert.to_string(), "A:alert=oilp@0@1.5");
        let parsed = AlertRecord::parse("alert", "oilp@0@1.5").unwrap();
        assert_eq!(parsed.value, 1.5);
        assert!(!parsed.triggered);
    }

    #[test]
    fn alert_record_rejects_bad_value() {
        assert!(AlertRecord::parse("warning", "rpm@1").is_err());
        assert!(AlertRecord::parse("warning", "rpm@2@100").is_err());
        assert!(AlertRecord::parse("warning", "rpm@1@fast").is_err());
    }

    #[test]
    fn config_record_round_trip() {
        let cfg = AlertConfigRecord::new("warning", "rpm", Comparator::Gte, 4500.0, true);
        assert_eq!(cfg.to_string(), "AC:warning=rpm@GTE@4500@1");
        assert_eq!(
            AlertConfigRecord::parse("warning", "rpm@GTE@4500@1").unwrap(),
            cfg
        );
    }

    #[test]
    fn config_record_remove_sentinel() {
        let cfg = AlertConfigRecord::parse("warning", "rpm@REMOVE@0@0").unwrap();
        assert_eq!(cfg.comparator, Comparator::Remove);
    }

    #[test]
    fn config_record_rejects_unknown_comparator() {
        assert!(matches!(
            AlertConfigRecord::parse("warning", "rpm@NEAR@100@0"),
            Err(RecordError::InvalidValue { .. })
        ));
    }

    #[test]
    fn comparators_evaluate() {
        assert!(Comparator::Gt.compare(5.0, 4.0));
        assert!(!Comparator::Gt.compare(4.0, 4.0));
        assert!(Comparator::Gte.compare(4.0, 4.0));
        assert!(Comparator::Lt.compare(3.0, 4.0));
        assert!(Comparator::Lte.compare(4.0, 4.0));
        assert!(Comparator::Eq.compare(4.0, 4.0));
        assert!(!Comparator::Remove.compare(4.0, 4.0));
    }

    #[test]
    fn clear_record_round_trip() {
        let clear = AlertClearRecord::new("warning", "rpm");
        assert_eq!(clear.to_string(), "ACS:warning=rpm");
        assert_eq!(AlertClearRecord::unpack("ACS:warning=rpm").unwrap(), clear);
    }
}
