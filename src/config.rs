//! Configuration loading for the link service.
//!
//! Every tunable of the transport is a flat field with a serde default, so a
//! config file only needs to name the values it changes. Durations are
//! expressed in milliseconds.

use serde::Deserialize;
use std::path::Path;

use crate::codec::CodecConfig;
use crate::radio::Band;

fn default_split_length() -> usize {
    220
}
fn default_ack_threshold() -> u16 {
    50
}
fn default_max_tag() -> u16 {
    100
}
fn default_max_retries() -> u8 {
    3
}
fn default_resend_interval_ms() -> u64 {
    5_000
}
fn default_high_priority_send_limit() -> u8 {
    5
}
fn default_transmit_idle_ms() -> u64 {
    250
}
fn default_post_send_ms() -> u64 {
    100
}
fn default_ack_poll_ms() -> u64 {
    500
}

/// Configuration of the link core (codec + scheduler + radio).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LinkConfig {
    /// Maximum record-text bytes carried by one data frame.
    #[serde(default = "default_split_length")]
    pub split_length: usize,
    /// Tags at or above this value require acknowledgement.
    #[serde(default = "default_ack_threshold")]
    pub ack_threshold: u16,
    /// Exclusive upper bound of the tag space.
    #[serde(default = "default_max_tag")]
    pub max_tag: u16,
    /// Retransmission attempts before an unacked record is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// Deadline extension applied on enqueue and on every resend (ms).
    #[serde(default = "default_resend_interval_ms")]
    pub resend_interval_ms: u64,
    /// Consecutive HIGH frames served before LOW gets a slot.
    #[serde(default = "default_high_priority_send_limit")]
    pub high_priority_send_limit: u8,
    /// Idle tick of the transmit loop when all queues are empty (ms).
    #[serde(default = "default_transmit_idle_ms")]
    pub transmit_idle_ms: u64,
    /// Pacing delay after every transmission, for radio duty cycle (ms).
    #[serde(default = "default_post_send_ms")]
    pub post_send_ms: u64,
    /// Sweep interval of the retransmit monitor (ms).
    #[serde(default = "default_ack_poll_ms")]
    pub ack_poll_ms: u64,
    /// Radio hardware settings.
    pub radio: RadioSettings,
}

fn default_baud() -> u32 {
    115_200
}
fn default_band() -> Band {
    Band::High
}
fn default_power() -> u8 {
    15
}

/// Settings pushed to the radio module during the startup handshake.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RadioSettings {
    /// Serial device path (e.g. `/dev/ttyUSB0`).
    pub port: String,
    /// Serial baud rate.
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// This endpoint's radio address.
    pub address: u16,
    /// Address frames are sent to (the other endpoint).
    pub target_address: u16,
    /// LoRa network id, 0..=16. Both endpoints must match.
    pub network_id: u8,
    /// Spreading factor, 5..=15.
    pub spreading_factor: u8,
    /// Bandwidth index, 0..=9.
    pub bandwidth: u8,
    /// Coding rate, 1..=10.
    pub coding_rate: u8,
    /// Programmed preamble, 0..=15.
    pub preamble: u8,
    /// Frequency band constant.
    #[serde(default = "default_band")]
    pub band: Band,
    /// RF output power in dBm, 0..=20.
    #[serde(default = "default_power")]
    pub power: u8,
    /// Shared secret; the 32-hex network password is derived from it.
    pub password: String,
}

impl LinkConfig {
    /// Load configuration from a TOML file.
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    /// The codec's slice of this configuration.
    pub fn codec(&self) -> CodecConfig {
        CodecConfig {
            split_length: self.split_length,
            ack_threshold: self.ack_threshold,
            max_tag: self.max_tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_unnamed_fields() {
        let cfg: LinkConfig = toml::from_str(
            r#"
            [radio]
            port = "/dev/ttyUSB0"
            address = 5
            target-address = 10
            network-id = 2
            spreading-factor = 10
            bandwidth = 9
            coding-rate = 1
            preamble = 4
            password = "pit-lane-secret"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.split_length, 220);
        assert_eq!(cfg.ack_threshold, 50);
        assert_eq!(cfg.max_tag, 100);
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.resend_interval_ms, 5_000);
        assert_eq!(cfg.high_priority_send_limit, 5);
        assert_eq!(cfg.radio.baud, 115_200);
        assert_eq!(cfg.radio.band, Band::High);
        assert_eq!(cfg.radio.power, 15);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg: LinkConfig = toml::from_str(
            r#"
            split-length = 100
            max-retries = 5

            [radio]
            port = "/dev/ttyAMA0"
            baud = 57600
            address = 1
            target-address = 2
            network-id = 3
            spreading-factor = 12
            bandwidth = 4
            coding-rate = 1
            preamble = 7
            band = "low"
            password = "x"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.split_length, 100);
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.radio.baud, 57_600);
        assert_eq!(cfg.radio.band, Band::Low);
    }
}
