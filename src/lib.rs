//! # pitlink — track-side telemetry link core
//!
//! Car-side and pit-side endpoints of a race-car data system are joined by a
//! long-range, low-bandwidth point-to-point radio whose on-air payload is
//! capped at 240 ASCII bytes per frame. This crate provides the link core
//! shared by both ends:
//!
//! - [`radio`]: driver for the RYLR896-class serial radio (line-oriented AT
//!   dialect, command/response multiplexing against unsolicited receives).
//! - [`codec`]: the frame codec — fragmentation of oversize record texts,
//!   tag allocation, fragment reassembly and acknowledgement emission.
//! - [`link`]: the reliable transmit scheduler — three priority queues with
//!   starvation control, ack tracking and retransmission.
//! - [`alerts`]: the rule engine turning live vehicle samples into
//!   edge-triggered alert records.
//! - [`records`]: the typed record surface exchanged over the link.
//!
//! All components run as cooperative tasks on one Embassy executor and talk
//! exclusively through the bounded channels aliased below. The channels use
//! `CriticalSectionRawMutex` so senders can also live on ordinary OS threads
//! (the serial bridge thread in the service binary).

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Timer};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub mod alerts;
pub mod codec;
pub mod config;
pub mod link;
pub mod radio;
pub mod records;

/// Shared run/stop coordination for a group of cooperative tasks.
///
/// Every long-running loop checks [`RunState::is_running`] between awaits and
/// reports its lifetime through `task_started`/`task_finished`. [`stop`]
/// clears the flag and waits for the exit counter to drain within a budget;
/// tasks cannot be force-cancelled under Embassy, so an expired budget is
/// reported to the caller instead.
///
/// [`stop`]: RunState::stop
pub struct RunState {
    running: AtomicBool,
    active: AtomicUsize,
}

impl RunState {
    pub const fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            active: AtomicUsize::new(0),
        }
    }

    /// Mark the task group as running. Call before spawning.
    pub fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Register a task entering its loop.
    pub fn task_started(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    /// Register a task leaving its loop.
    pub fn task_finished(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Number of tasks currently inside their loops.
    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Clear the run flag and wait up to `budget` for all tasks to exit.
    /// Returns `false` if some tasks were still running when the budget
    /// expired.
    pub async fn stop(&self, budget: Duration) -> bool {
        self.running.store(false, Ordering::Relaxed);
        let deadline = Instant::now() + budget;
        while self.active.load(Ordering::Relaxed) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            Timer::after_millis(100).await;
        }
        true
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// One vehicle datapoint as consumed by the alert engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Listen-key the datapoint belongs to (e.g. `rpm`, `coolant`).
    pub key: String,
    /// Numeric reading.
    pub value: f64,
}

/// Depth of the serial line channels (bridge thread ↔ radio driver).
/// Lines are short and drained quickly; a small buffer rides out bursts.
pub const LINE_QUEUE_SIZE: usize = 32;
/// Bounded channel carrying one CR-LF-stripped serial line per entry.
pub type LineQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, String, LINE_QUEUE_SIZE>;
/// Receiver side of a serial line channel.
pub type LineQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, String, LINE_QUEUE_SIZE>;
/// Sender side of a serial line channel.
pub type LineQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, String, LINE_QUEUE_SIZE>;

/// Depth of the received-frames channel (radio driver → codec).
pub const RADIO_FRAME_QUEUE_SIZE: usize = 32;
/// Bounded channel carrying raw frame payloads extracted from `+RCV=` lines.
pub type RadioFrameQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, String, RADIO_FRAME_QUEUE_SIZE>;
/// Receiver side of the received-frames channel.
pub type RadioFrameQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    String,
    RADIO_FRAME_QUEUE_SIZE,
>;
/// Sender side of the received-frames channel.
pub type RadioFrameQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, String, RADIO_FRAME_QUEUE_SIZE>;

/// Depth of each priority transmit queue. Sized for a burst of fragmented
/// records without letting a stuck radio accumulate unbounded backlog.
pub const FRAME_QUEUE_SIZE: usize = 64;
/// Bounded queue of ready-to-send frame texts (one on-air frame per entry).
pub type FrameQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, String, FRAME_QUEUE_SIZE>;
/// Receiver side of a priority transmit queue.
pub type FrameQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, String, FRAME_QUEUE_SIZE>;
/// Sender side of a priority transmit queue.
pub type FrameQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, String, FRAME_QUEUE_SIZE>;

/// Depth of the completed-record-text channel (codec → record handler).
pub const RECORD_TEXT_QUEUE_SIZE: usize = 32;
/// Bounded channel carrying fully reassembled record texts.
pub type RecordTextQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, String, RECORD_TEXT_QUEUE_SIZE>;
/// Receiver side of the completed-record-text channel.
pub type RecordTextQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    String,
    RECORD_TEXT_QUEUE_SIZE,
>;
/// Sender side of the completed-record-text channel.
pub type RecordTextQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    String,
    RECORD_TEXT_QUEUE_SIZE,
>;

/// Depth of the ack tag channels (codec → ack emission, codec → ack consumer).
pub const ACK_TAG_QUEUE_SIZE: usize = 32;
/// Bounded channel carrying frame tags, one per acknowledgement event.
pub type AckTagQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, u16, ACK_TAG_QUEUE_SIZE>;
/// Receiver side of an ack tag channel.
pub type AckTagQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, u16, ACK_TAG_QUEUE_SIZE>;
/// Sender side of an ack tag channel.
pub type AckTagQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, u16, ACK_TAG_QUEUE_SIZE>;

/// Depth of the parsed-record channel (record handler → host).
pub const RECORD_QUEUE_SIZE: usize = 32;
/// Bounded channel carrying parsed [`records::Record`] values up to the host.
pub type RecordQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, records::Record, RECORD_QUEUE_SIZE>;
/// Receiver side of the parsed-record channel.
pub type RecordQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    records::Record,
    RECORD_QUEUE_SIZE,
>;
/// Sender side of the parsed-record channel.
pub type RecordQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    records::Record,
    RECORD_QUEUE_SIZE,
>;

/// Depth of a monitor's inbound sample channel.
pub const SAMPLE_QUEUE_SIZE: usize = 64;
/// Bounded channel feeding datapoints into an alert monitor.
pub type SampleQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, Sample, SAMPLE_QUEUE_SIZE>;
/// Receiver side of a sample channel.
pub type SampleQueueReceiver =
    embassy_sync::channel::Receiver<'static, CriticalSectionRawMutex, Sample, SAMPLE_QUEUE_SIZE>;
/// Sender side of a sample channel.
pub type SampleQueueSender =
    embassy_sync::channel::Sender<'static, CriticalSectionRawMutex, Sample, SAMPLE_QUEUE_SIZE>;

/// Depth of the alert output channel (monitors → host).
pub const ALERT_QUEUE_SIZE: usize = 32;
/// Bounded channel carrying emitted alert records.
pub type AlertQueue = embassy_sync::channel::Channel<
    CriticalSectionRawMutex,
    records::AlertRecord,
    ALERT_QUEUE_SIZE,
>;
/// Receiver side of the alert output channel.
pub type AlertQueueReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    records::AlertRecord,
    ALERT_QUEUE_SIZE,
>;
/// Sender side of the alert output channel.
pub type AlertQueueSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    records::AlertRecord,
    ALERT_QUEUE_SIZE,
>;
