//! Radio configuration records (`CL1`/`CL2`/`CL3`).
//!
//! These carry radio settings over the link so the pit side can reconfigure
//! the car side. Their NAME is fixed per class; all three route to the same
//! bus subject.

use std::fmt;

use super::{RecordError, expect_name};

/// Bus subject shared by all radio-config record classes.
pub(crate) const SUBJECT: &str = "config.lora";

/// RF parameter set: `CL1:PARAMS=<sf>.<bw>.<cr>.<preamble>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioParamsRecord {
    pub spreading_factor: u8,
    pub bandwidth: u8,
    pub coding_rate: u8,
    pub preamble: u8,
}

impl RadioParamsRecord {
    pub const LEADER: &'static str = "CL1";
    pub const NAME: &'static str = "PARAMS";

    pub fn new(spreading_factor: u8, bandwidth: u8, coding_rate: u8, preamble: u8) -> Self {
        Self {
            spreading_factor,
            bandwidth,
            coding_rate,
            preamble,
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        expect_name(Self::LEADER, Self::NAME, name)?;

        let parts: Vec<&str> = value.split('.').collect();
        let [sf, bw, cr, preamble] = parts[..] else {
            return Err(RecordError::InvalidValue {
                leader: Self::LEADER,
                reason: format!("expected sf.bw.cr.preamble: {}", value),
            });
        };

        let field = |s: &str| -> Result<u8, RecordError> {
            s.parse().map_err(|_| RecordError::InvalidValue {
                leader: Self::LEADER,
                reason: format!("non-numeric field: {}", s),
            })
        };

        Ok(Self::new(field(sf)?, field(bw)?, field(cr)?, field(preamble)?))
    }
}

impl fmt::Display for RadioParamsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}={}.{}.{}.{}",
            Self::LEADER,
            Self::NAME,
            self.spreading_factor,
            self.bandwidth,
            self.coding_rate,
            self.preamble
        )
    }
}

/// Network password record: `CL2:PASS=<opaque>`. The payload is the 32-hex
/// derived password, treated as opaque text by the record layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioPasswordRecord {
    pub password: String,
}

impl RadioPasswordRecord {
    pub const LEADER: &'static str = "CL2";
    pub const NAME: &'static str = "PASS";

    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        expect_name(Self::LEADER, Self::NAME, name)?;
        Ok(Self::new(value))
    }
}

impl fmt::Display for RadioPasswordRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}={}", Self::LEADER, Self::NAME, self.password)
    }
}

/// Network membership record: `CL3:NET=<network_id>.<address>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioNetworkRecord {
    pub network_id: u8,
    pub address: u16,
}

impl RadioNetworkRecord {
    pub const LEADER: &'static str = "CL3";
    pub const NAME: &'static str = "NET";

    pub fn new(network_id: u8, address: u16) -> Self {
        Self {
            network_id,
            address,
        }
    }

    pub(crate) fn parse(name: &str, value: &str) -> Result<Self, RecordError> {
        expect_name(Self::LEADER, Self::NAME, name)?;

        let invalid = |reason: String| RecordError::InvalidValue {
            leader: Self::LEADER,
            reason,
        };

        let (network, address) = value
            .split_once('.')
            .ok_or_else(|| invalid(format!("expected network.address: {}", value)))?;
        let network_id = network
            .parse()
            .map_err(|_| invalid(format!("non-numeric network id: {}", network)))?;
        let address = address
            .parse()
            .map_err(|_| invalid(format!("non-numeric address: {}", address)))?;

        Ok(Self::new(network_id, address))
    }
}

impl fmt::Display for RadioNetworkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}={}.{}",
            Self::LEADER,
            Self::NAME,
            self.network_id,
            self.address
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_round_trip() {
        let params = RadioParamsRecord::new(10, 9, 1, 4);
        assert_eq!(params.to_string(), "CL1:PARAMS=10.9.1.4");
        assert_eq!(RadioParamsRecord::parse("PARAMS", "10.9.1.4").unwrap(), params);
    }

    #[test]
    fn params_reject_wrong_name_or_shape() {
        assert!(RadioParamsRecord::parse("OTHER", "10.9.1.4").is_err());
        assert!(RadioParamsRecord::parse("PARAMS", "10.9.1").is_err());
        assert!(RadioParamsRecord::parse("PARAMS", "10.9.one.4").is_err());
    }

    #[test]
    fn network_round_trip() {
        let net = RadioNetworkRecord::new(2, 5);
        assert_eq!(net.to_string(), "CL3:NET=2.5");
        assert_eq!(RadioNetworkRecord::parse("NET", "2.5").unwrap(), net);
    }

    #[test]
    fn password_is_opaque() {
        let pass = RadioPasswordRecord::new("0123456789abcdef0123456789abcdef");
        assert_eq!(
            pass.to_string(),
            "CL2:PASS=0123456789abcdef0123456789abcdef"
        );
    }
}
