//! Driver for the RYLR896-class LoRa serial radio.
//!
//! The module speaks a line-oriented AT dialect over a serial port: commands
//! are CR-LF-terminated ASCII lines, replies are CR-LF-terminated lines, and
//! the module spontaneously emits `+READY` on power-up, `+RCV=...` for
//! received radio payloads and `+ERR=<code>` on command failures.
//!
//! The driver never touches the OS port directly. It consumes and produces
//! line channels; the service binary runs a blocking bridge thread that pumps
//! bytes between those channels and the port. This keeps the executor free of
//! blocking I/O and lets the whole driver run against a scripted fake in
//! tests.
//!
//! Command/response multiplexing: a single send mutex admits one in-flight
//! command. The receive loop classifies every inbound line; command replies
//! land in a single-slot signal which the sender awaits with a 5 s timeout,
//! while unsolicited `+RCV=` payloads flow to the codec's frame channel.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer, with_timeout};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};

mod error;

pub use error::RadioError;

use crate::config::RadioSettings;
use crate::{LineQueueReceiver, LineQueueSender, RadioFrameQueueSender, RunState};

/// Reply wait budget for one AT command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
/// Spacing between the startup configuration commands.
const INTER_COMMAND_DELAY: Duration = Duration::from_millis(100);
/// Poll interval for the receive loop's running-flag check.
const RECEIVE_POLL: Duration = Duration::from_millis(500);
/// Ping attempts before startup gives up on the module.
const PING_ATTEMPTS: u32 = 10;
/// Budget for the receive loop to exit after a stop request.
const STOP_BUDGET: Duration = Duration::from_secs(5);

/// Baud rates the module accepts for `AT+IPR`.
const BAUD_RATES: [u32; 8] = [300, 1200, 4800, 9600, 28800, 38400, 57600, 115_200];

/// Center frequency constants of the supported bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    /// 868.5 MHz.
    Low,
    /// 915 MHz.
    High,
}

impl Band {
    /// Frequency in Hz as sent to `AT+BAND`.
    pub fn frequency(self) -> u32 {
        match self {
            Band::Low => 868_500_000,
            Band::High => 915_000_000,
        }
    }
}

/// Module power state for `AT+MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    Active = 0,
    Sleep = 1,
}

/// RF parameter set for `AT+PARAMETER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioParams {
    /// Spreading factor, 5..=15. Larger reaches further, transmits longer.
    pub spreading_factor: u8,
    /// Bandwidth index, 0..=9. Smaller reaches further, transmits longer.
    pub bandwidth: u8,
    /// Coding rate, 1..=10. 1 is fastest.
    pub coding_rate: u8,
    /// Programmed preamble, 0..=15.
    pub preamble: u8,
}

impl RadioParams {
    pub fn new(spreading_factor: u8, bandwidth: u8, coding_rate: u8, preamble: u8) -> Self {
        Self {
            spreading_factor,
            bandwidth,
            coding_rate,
            preamble,
        }
    }

    fn validate(&self) -> Result<(), RadioError> {
        if (5..=15).contains(&self.spreading_factor)
            && self.bandwidth <= 9
            && (1..=10).contains(&self.coding_rate)
            && self.preamble <= 15
        {
            Ok(())
        } else {
            Err(RadioError::InvalidParameter(format!(
                "parameters out of range: {},{},{},{}",
                self.spreading_factor, self.bandwidth, self.coding_rate, self.preamble
            )))
        }
    }
}

/// Derive the 32-hex-character network password from a shared secret:
/// SHA-256, truncated to the first 16 bytes, hex-encoded.
pub fn derive_network_password(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().take(16).fold(String::new(), |mut out, b| {
        let _ = write!(out, "{:02x}", b);
        out
    })
}

/// One `+RCV=` line, decomposed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedFrame {
    pub source: u16,
    pub payload: String,
    pub rssi: i16,
    pub snr: i16,
}

/// Parse the tail of a `+RCV=<src>,<len>,<payload>,<rssi>,<snr>` line.
/// The payload is cut by the declared length, so it may itself contain
/// commas.
fn parse_rcv(rest: &str) -> Result<ReceivedFrame, RadioError> {
    let malformed = || RadioError::MalformedReply(format!("+RCV={}", rest));

    let (source, rest) = rest.split_once(',').ok_or_else(malformed)?;
    let source: u16 = source.parse().map_err(|_| malformed())?;
    let (length, rest) = rest.split_once(',').ok_or_else(malformed)?;
    let length: usize = length.parse().map_err(|_| malformed())?;

    if rest.len() <= length || !rest.is_char_boundary(length) {
        return Err(malformed());
    }
    let payload = &rest[..length];
    let tail = rest[length..].strip_prefix(',').ok_or_else(malformed)?;

    let (rssi, snr) = tail.split_once(',').ok_or_else(malformed)?;
    let rssi: i16 = rssi.parse().map_err(|_| malformed())?;
    let snr: i16 = snr.parse().map_err(|_| malformed())?;

    Ok(ReceivedFrame {
        source,
        payload: payload.to_string(),
        rssi,
        snr,
    })
}

/// The radio driver. See the module docs for the I/O model.
pub struct Rylr896 {
    settings: RadioSettings,
    line_tx: LineQueueSender,
    reply: Signal<CriticalSectionRawMutex, String>,
    send_lock: Mutex<CriticalSectionRawMutex, ()>,
    ready: AtomicBool,
    run: RunState,
}

impl Rylr896 {
    pub fn new(settings: RadioSettings, line_tx: LineQueueSender) -> Self {
        Self {
            settings,
            line_tx,
            reply: Signal::new(),
            send_lock: Mutex::new(()),
            ready: AtomicBool::new(false),
            run: RunState::new(),
        }
    }

    /// Run/stop coordination of the receive loop. The caller must call
    /// `run_state().start()` before spawning [`receive_loop`].
    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    /// Whether the module has reported `+READY` (or answered a ping).
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// Classify one inbound line from the serial port.
    ///
    /// `+RCV=` payloads go to the codec's frame channel, `+READY` sets the
    /// readiness flag, `+ERR=` and every other line resolve the pending
    /// command (errors are also logged here, where they are visible even
    /// with no command in flight).
    pub(crate) async fn handle_line(&self, line: &str, frames: &RadioFrameQueueSender) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        if line.starts_with("+ERR=") {
            log::error!("radio error line: {}", line);
            self.reply.signal(line.to_string());
        } else if line.starts_with("+READY") {
            log::info!("radio module ready");
            self.ready.store(true, Ordering::Relaxed);
        } else if let Some(rest) = line.strip_prefix("+RCV=") {
            match parse_rcv(rest) {
                Ok(rcv) => {
                    log::debug!(
                        "received {} bytes from {} (rssi {}, snr {})",
                        rcv.payload.len(),
                        rcv.source,
                        rcv.rssi,
                        rcv.snr
                    );
                    frames.send(rcv.payload).await;
                }
                Err(e) => log::error!("dropping unparseable receive line: {}", e),
            }
        } else {
            self.reply.signal(line.to_string());
        }
    }

    /// Send one AT command and await its reply line.
    ///
    /// Serialized by the send mutex: the reply slot is drained before the
    /// write so a stale line cannot satisfy this command. `ignore_ready`
    /// lets pings through before the module has announced itself.
    async fn command(&self, cmd: &str, ignore_ready: bool) -> Result<String, RadioError> {
        log::debug!("sending command: {}", cmd);

        if !self.run.is_running() || self.run.active_tasks() == 0 {
            return Err(RadioError::ReceiveLoopNotRunning);
        }
        if !self.is_ready() && !ignore_ready {
            return Err(RadioError::NotReady);
        }

        let _guard = self.send_lock.lock().await;
        self.reply.reset();
        self.line_tx.send(cmd.to_string()).await;

        let reply = with_timeout(COMMAND_TIMEOUT, self.reply.wait())
            .await
            .map_err(|_| RadioError::CommandTimeout)?;

        log::debug!("reply received: {}", reply);
        if let Some(code) = reply.strip_prefix("+ERR=") {
            return Err(RadioError::from_code(code.parse().unwrap_or(15)));
        }
        Ok(reply)
    }

    /// Issue a bare `AT`. Returns whether the module replied in time;
    /// the readiness flag tracks the outcome.
    pub async fn ping(&self) -> Result<bool, RadioError> {
        match self.command("AT", true).await {
            Ok(_) => {
                self.ready.store(true, Ordering::Relaxed);
                Ok(true)
            }
            Err(RadioError::CommandTimeout) => {
                self.ready.store(false, Ordering::Relaxed);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Software-reset the module. Readiness clears until `+READY` arrives.
    pub async fn soft_reset(&self) -> Result<(), RadioError> {
        self.command("AT+RESET", false).await?;
        self.ready.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Transmit one frame payload to `address`. The payload must be ASCII
    /// and at most 240 bytes; violations fail locally.
    pub async fn send(&self, address: u16, data: &str) -> Result<(), RadioError> {
        if !data.is_ascii() {
            return Err(RadioError::InvalidParameter(
                "payload must be ASCII".to_string(),
            ));
        }
        if data.len() > 240 {
            return Err(RadioError::TxOverflow);
        }

        self.command(&format!("AT+SEND={},{},{}", address, data.len(), data), false)
            .await?;
        Ok(())
    }

    pub async fn set_address(&self, address: u16) -> Result<(), RadioError> {
        self.command(&format!("AT+ADDRESS={}", address), false)
            .await?;
        Ok(())
    }

    pub async fn get_address(&self) -> Result<u16, RadioError> {
        let reply = self.command("AT+ADDRESS?", false).await?;
        parse_reply_number(&reply)
    }

    pub async fn set_network_id(&self, network_id: u8) -> Result<(), RadioError> {
        if network_id > 16 {
            return Err(RadioError::InvalidParameter(format!(
                "network id must be 0..=16: {}",
                network_id
            )));
        }
        self.command(&format!("AT+NETWORKID={}", network_id), false)
            .await?;
        Ok(())
    }

    pub async fn get_network_id(&self) -> Result<u8, RadioError> {
        let reply = self.command("AT+NETWORKID?", false).await?;
        parse_reply_number(&reply)
    }

    pub async fn set_parameters(&self, params: RadioParams) -> Result<(), RadioError> {
        params.validate()?;
        self.command(
            &format!(
                "AT+PARAMETER={},{},{},{}",
                params.spreading_factor, params.bandwidth, params.coding_rate, params.preamble
            ),
            false,
        )
        .await?;
        Ok(())
    }

    pub async fn get_parameters(&self) -> Result<RadioParams, RadioError> {
        let reply = self.command("AT+PARAMETER?", false).await?;
        let value = reply_value(&reply)?;
        let fields: Vec<&str> = value.split(',').collect();
        let [sf, bw, cr, preamble] = fields[..] else {
            return Err(RadioError::MalformedReply(reply.clone()));
        };
        let number = |s: &str| -> Result<u8, RadioError> {
            s.parse()
                .map_err(|_| RadioError::MalformedReply(reply.clone()))
        };
        Ok(RadioParams::new(
            number(sf)?,
            number(bw)?,
            number(cr)?,
            number(preamble)?,
        ))
    }

    pub async fn set_band(&self, band: Band) -> Result<(), RadioError> {
        self.command(&format!("AT+BAND={}", band.frequency()), false)
            .await?;
        Ok(())
    }

    /// Center frequency in Hz as reported by the module.
    pub async fn get_band(&self) -> Result<u32, RadioError> {
        let reply = self.command("AT+BAND?", false).await?;
        parse_reply_number(&reply)
    }

    /// Set the 32-hex-character network password (`AT+CPIN`).
    pub async fn set_password(&self, password: &str) -> Result<(), RadioError> {
        if password.len() != 32 || !password.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RadioError::InvalidParameter(
                "password must be 32 hex characters".to_string(),
            ));
        }
        self.command(&format!("AT+CPIN={}", password), false).await?;
        Ok(())
    }

    pub async fn set_power(&self, power: u8) -> Result<(), RadioError> {
        if power > 20 {
            return Err(RadioError::InvalidParameter(format!(
                "power must be 0..=20 dBm: {}",
                power
            )));
        }
        self.command(&format!("AT+CRFOP={}", power), false).await?;
        Ok(())
    }

    pub async fn get_power(&self) -> Result<u8, RadioError> {
        let reply = self.command("AT+CRFOP?", false).await?;
        parse_reply_number(&reply)
    }

    pub async fn set_mode(&self, mode: RadioMode) -> Result<(), RadioError> {
        self.command(&format!("AT+MODE={}", mode as u8), false)
            .await?;
        Ok(())
    }

    pub async fn set_baud(&self, rate: u32) -> Result<(), RadioError> {
        if !BAUD_RATES.contains(&rate) {
            return Err(RadioError::InvalidParameter(format!(
                "{} is not a valid baud rate",
                rate
            )));
        }
        self.command(&format!("AT+IPR={}", rate), false).await?;
        Ok(())
    }

    pub async fn get_baud(&self) -> Result<u32, RadioError> {
        let reply = self.command("AT+IPR?", false).await?;
        parse_reply_number(&reply)
    }

    /// Startup handshake: ping until the module answers (bounded retry
    /// budget), then push network id, RF parameters, address and the derived
    /// network password, with short spacing between commands.
    pub async fn start(&self) -> Result<(), RadioError> {
        let mut answered = false;
        for attempt in 1..=PING_ATTEMPTS {
            if self.ping().await? {
                answered = true;
                break;
            }
            log::warn!("radio ping attempt {}/{} unanswered", attempt, PING_ATTEMPTS);
        }
        if !answered {
            return Err(RadioError::NotReady);
        }

        Timer::after(INTER_COMMAND_DELAY).await;
        self.set_network_id(self.settings.network_id).await?;
        Timer::after(INTER_COMMAND_DELAY).await;
        self.set_parameters(RadioParams::new(
            self.settings.spreading_factor,
            self.settings.bandwidth,
            self.settings.coding_rate,
            self.settings.preamble,
        ))
        .await?;
        Timer::after(INTER_COMMAND_DELAY).await;
        self.set_address(self.settings.address).await?;
        Timer::after(INTER_COMMAND_DELAY).await;
        self.set_password(&derive_network_password(&self.settings.password))
            .await?;

        log::info!(
            "radio configured: network {}, address {}",
            self.settings.network_id,
            self.settings.address
        );
        Ok(())
    }

    /// Stop the receive loop: clear the run flag, nudge the port with one
    /// ping line so a blocked read produces traffic, and wait out the stop
    /// budget.
    pub async fn stop(&self) {
        if !self.run.is_running() {
            return;
        }
        log::info!("stopping radio driver");
        let _ = self.line_tx.try_send("AT".to_string());
        if !self.run.stop(STOP_BUDGET).await {
            log::warn!("radio receive loop did not exit within the stop budget");
        }
    }
}

/// Extract the value part of a `+NAME=<value>` reply.
fn reply_value(reply: &str) -> Result<&str, RadioError> {
    reply
        .split_once('=')
        .map(|(_, v)| v)
        .ok_or_else(|| RadioError::MalformedReply(reply.to_string()))
}

fn parse_reply_number<T: std::str::FromStr>(reply: &str) -> Result<T, RadioError> {
    reply_value(reply)?
        .parse()
        .map_err(|_| RadioError::MalformedReply(reply.to_string()))
}

/// Receive loop: classifies inbound serial lines until the run flag clears.
/// I/O problems never tear the loop down; they are logged and the loop
/// continues with the next line.
#[embassy_executor::task]
pub async fn receive_loop(
    radio: &'static Rylr896,
    lines: LineQueueReceiver,
    frames: RadioFrameQueueSender,
) {
    radio.run.task_started();
    log::info!("radio receive loop started");
    while radio.run.is_running() {
        match with_timeout(RECEIVE_POLL, lines.receive()).await {
            Ok(line) => radio.handle_line(&line, &frames).await,
            Err(_) => continue,
        }
    }
    log::info!("radio receive loop ended");
    radio.run.task_finished();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LineQueue, RadioFrameQueue};
    use futures::executor::block_on;

    fn settings() -> RadioSettings {
        RadioSettings {
            port: "/dev/null".to_string(),
            baud: 115_200,
            address: 5,
            target_address: 10,
            network_id: 2,
            spreading_factor: 10,
            bandwidth: 9,
            coding_rate: 1,
            preamble: 4,
            band: Band::High,
            power: 15,
            password: "pit-lane-secret".to_string(),
        }
    }

    struct Harness {
        radio: &'static Rylr896,
        lines_out: &'static LineQueue,
        frames: &'static RadioFrameQueue,
    }

    /// Driver wired to leaked channels, with the receive loop "present"
    /// (run flag set, one registered task) so commands pass the liveness
    /// check. Tests play the module by feeding lines to `handle_line`.
    fn harness() -> Harness {
        let lines_out: &'static LineQueue = Box::leak(Box::new(LineQueue::new()));
        let frames: &'static RadioFrameQueue = Box::leak(Box::new(RadioFrameQueue::new()));
        let radio: &'static Rylr896 =
            Box::leak(Box::new(Rylr896::new(settings(), lines_out.sender())));
        radio.run.start();
        radio.run.task_started();
        Harness {
            radio,
            lines_out,
            frames,
        }
    }

    #[test]
    fn parse_rcv_extracts_payload() {
        let rcv = parse_rcv("5,5,hello,-20,10").unwrap();
        assert_eq!(rcv.source, 5);
        assert_eq!(rcv.payload, "hello");
        assert_eq!(rcv.rssi, -20);
        assert_eq!(rcv.snr, 10);
    }

    #[test]
    fn parse_rcv_payload_may_contain_commas() {
        let rcv = parse_rcv("3,11,hello,world,-42,7").unwrap();
        assert_eq!(rcv.payload, "hello,world");
    }

    #[test]
    fn parse_rcv_rejects_bad_length() {
        assert!(parse_rcv("5,99,short,-20,10").is_err());
        assert!(parse_rcv("5,x,hello,-20,10").is_err());
        assert!(parse_rcv("garbage").is_err());
    }

    #[test]
    fn derived_password_is_32_hex_chars() {
        let pass = derive_network_password("pit-lane-secret");
        assert_eq!(pass.len(), 32);
        assert!(pass.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(pass, derive_network_password("pit-lane-secret"));
        assert_ne!(pass, derive_network_password("other-secret"));
    }

    #[test]
    fn validation_fails_without_touching_the_wire() {
        let h = harness();
        block_on(async {
            assert!(matches!(
                h.radio.set_network_id(17).await,
                Err(RadioError::InvalidParameter(_))
            ));
            assert!(matches!(
                h.radio.set_parameters(RadioParams::new(4, 9, 1, 4)).await,
                Err(RadioError::InvalidParameter(_))
            ));
            assert!(matches!(
                h.radio.set_power(21).await,
                Err(RadioError::InvalidParameter(_))
            ));
            assert!(matches!(
                h.radio.set_baud(12_345).await,
                Err(RadioError::InvalidParameter(_))
            ));
            assert!(matches!(
                h.radio.set_password("tooshort").await,
                Err(RadioError::InvalidParameter(_))
            ));
        });
        assert!(h.lines_out.try_receive().is_err());
    }

    #[test]
    fn oversize_payload_fails_locally() {
        let h = harness();
        let big = "x".repeat(241);
        assert_eq!(
            block_on(h.radio.send(10, &big)),
            Err(RadioError::TxOverflow)
        );
        assert!(h.lines_out.try_receive().is_err());
    }

    #[test]
    fn ready_flag_follows_module_lines() {
        let h = harness();
        assert!(!h.radio.is_ready());
        block_on(h.radio.handle_line("+READY", &h.frames.sender()));
        assert!(h.radio.is_ready());
    }

    #[test]
    fn rcv_lines_flow_to_frame_channel() {
        let h = harness();
        block_on(
            h.radio
                .handle_line("+RCV=10,13,|50|A:a=b@1@1,-20,10", &h.frames.sender()),
        );
        assert_eq!(h.frames.try_receive().unwrap(), "|50|A:a=b@1@1");
    }

    #[test]
    fn command_round_trip() {
        let h = harness();
        block_on(h.radio.handle_line("+READY", &h.frames.sender()));

        let (result, _) = block_on(futures::future::join(
            h.radio.get_address(),
            async {
                assert_eq!(h.lines_out.receive().await, "AT+ADDRESS?");
                h.radio.handle_line("+ADDRESS=5", &h.frames.sender()).await;
            },
        ));
        assert_eq!(result.unwrap(), 5);
    }

    #[test]
    fn error_reply_maps_to_variant() {
        let h = harness();
        block_on(h.radio.handle_line("+READY", &h.frames.sender()));

        let (result, _) = block_on(futures::future::join(
            h.radio.set_address(5),
            async {
                assert_eq!(h.lines_out.receive().await, "AT+ADDRESS=5");
                h.radio.handle_line("+ERR=4", &h.frames.sender()).await;
            },
        ));
        assert_eq!(result, Err(RadioError::UnknownCommand));
    }

    #[test]
    fn commands_require_readiness() {
        let h = harness();
        assert_eq!(
            block_on(h.radio.set_address(5)),
            Err(RadioError::NotReady)
        );
    }

    #[test]
    fn commands_require_the_receive_loop() {
        let lines_out: &'static LineQueue = Box::leak(Box::new(LineQueue::new()));
        let radio = Rylr896::new(settings(), lines_out.sender());
        assert_eq!(
            block_on(radio.get_address()),
            Err(RadioError::ReceiveLoopNotRunning)
        );
    }

    #[test]
    fn startup_pushes_configuration_in_order() {
        let h = harness();

        let script = async {
            let expect = |line: String, prefix: &str| {
                assert!(
                    line.starts_with(prefix),
                    "expected {} got {}",
                    prefix,
                    line
                );
            };
            expect(h.lines_out.receive().await, "AT");
            h.radio.handle_line("+OK", &h.frames.sender()).await;
            expect(h.lines_out.receive().await, "AT+NETWORKID=2");
            h.radio.handle_line("+OK", &h.frames.sender()).await;
            expect(h.lines_out.receive().await, "AT+PARAMETER=10,9,1,4");
            h.radio.handle_line("+OK", &h.frames.sender()).await;
            expect(h.lines_out.receive().await, "AT+ADDRESS=5");
            h.radio.handle_line("+OK", &h.frames.sender()).await;
            let cpin = h.lines_out.receive().await;
            expect(cpin.clone(), "AT+CPIN=");
            let password = cpin.strip_prefix("AT+CPIN=").unwrap();
            assert_eq!(password.len(), 32);
            assert!(password.chars().all(|c| c.is_ascii_hexdigit()));
            h.radio.handle_line("+OK", &h.frames.sender()).await;
        };

        let (result, _) = block_on(futures::future::join(h.radio.start(), script));
        result.unwrap();
        assert!(h.radio.is_ready());
    }
}
