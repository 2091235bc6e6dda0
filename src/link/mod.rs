//! Reliable transmit scheduling over the radio.
//!
//! Three in-process queues of frame text feed a single sender task:
//! IMMEDIATE pre-empts HIGH, HIGH pre-empts LOW, and a streak counter keeps
//! HIGH from starving LOW beyond a configured run of consecutive sends.
//! IMMEDIATE is consulted on every iteration; the streak resets only after a
//! non-HIGH frame is served or the streak limit is exhausted.
//!
//! Reliability: a record whose tag falls in the ack range enters the
//! pending-ack table when enqueued. The retransmit monitor sweeps the table
//! and re-encodes expired entries through the splitter with their original
//! tag, so a retransmission is indistinguishable from the first attempt at
//! the receiver. Entries drop with a warning after `max_retries` attempts.
//! Origin LOW is promoted to HIGH on resend; a late LOW record is worth more
//! than a fresh one.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Timer, with_timeout};
use std::collections::HashMap;
use thiserror::Error;

use crate::codec::{Ack, FrameError, FrameSplitter};
use crate::config::LinkConfig;
use crate::radio::Rylr896;
use crate::records::{self, Record};
use crate::{
    AckTagQueueReceiver, FrameQueueReceiver, FrameQueueSender, RecordQueueSender,
    RecordTextQueueReceiver, RunState,
};

/// Poll interval for loops waiting on a channel while watching the run flag.
const RECEIVE_POLL: Duration = Duration::from_millis(500);

/// Errors surfaced by the link's transmit surface.
#[derive(Debug, Error, PartialEq)]
pub enum LinkError {
    /// The pending-ack table is full; accepting another ack-bearing record
    /// could let a wrapped tag collide with a live entry.
    #[error("pending-ack table at capacity, ack-bearing enqueue refused")]
    PendingAckCapacity,
    /// The record text could not be framed.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Transmit priority classes, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    High,
    Immediate,
}

/// Bookkeeping for one outstanding ack-bearing record.
#[derive(Debug, Clone)]
struct PendingAck {
    deadline: Instant,
    attempts: u8,
    origin: Priority,
    record: String,
}

/// Scheduler tuning, carved out of the link configuration.
#[derive(Debug, Clone, Copy)]
struct Tuning {
    max_retries: u8,
    resend_interval: Duration,
    high_priority_send_limit: u8,
    transmit_idle: Duration,
    post_send: Duration,
    ack_poll: Duration,
    ack_threshold: u16,
    /// One less than the ack tag range, so a wrapping allocator can never
    /// hand out a tag that is still pending.
    pending_capacity: usize,
}

/// The link service: transmit surface, pending-ack table and the state
/// shared by the scheduler tasks.
pub struct LinkService {
    tuning: Tuning,
    splitter: Mutex<CriticalSectionRawMutex, FrameSplitter>,
    pending: Mutex<CriticalSectionRawMutex, HashMap<u16, PendingAck>>,
    immediate: FrameQueueSender,
    high: FrameQueueSender,
    low: FrameQueueSender,
    run: RunState,
}

impl LinkService {
    pub fn new(
        cfg: &LinkConfig,
        immediate: FrameQueueSender,
        high: FrameQueueSender,
        low: FrameQueueSender,
    ) -> Self {
        let tuning = Tuning {
            max_retries: cfg.max_retries,
            resend_interval: Duration::from_millis(cfg.resend_interval_ms),
            high_priority_send_limit: cfg.high_priority_send_limit,
            transmit_idle: Duration::from_millis(cfg.transmit_idle_ms),
            post_send: Duration::from_millis(cfg.post_send_ms),
            ack_poll: Duration::from_millis(cfg.ack_poll_ms),
            ack_threshold: cfg.ack_threshold,
            pending_capacity: (cfg.max_tag - cfg.ack_threshold) as usize - 1,
        };
        Self {
            tuning,
            splitter: Mutex::new(FrameSplitter::new(cfg.codec())),
            pending: Mutex::new(HashMap::new()),
            immediate,
            high,
            low,
            run: RunState::new(),
        }
    }

    /// Run/stop coordination shared by all scheduler tasks.
    pub fn run_state(&self) -> &RunState {
        &self.run
    }

    /// Stop all scheduler tasks: clear the run flag and wait up to 5 s for
    /// the loops to exit. Frames still queued are dropped with the process;
    /// the radio driver is stopped separately, after this returns.
    pub async fn stop(&self) {
        if !self.run.is_running() {
            return;
        }
        log::info!("stopping link service");
        if !self.run.stop(Duration::from_secs(5)).await {
            log::warn!("timeout waiting for tasks to finish");
        }
    }

    fn queue(&self, priority: Priority) -> FrameQueueSender {
        match priority {
            Priority::Immediate => self.immediate,
            Priority::High => self.high,
            Priority::Low => self.low,
        }
    }

    /// Encode a record onto the queue for `priority` and, when `ack` is set,
    /// begin tracking it for retransmission. Returns the tag used.
    pub async fn transmit(
        &self,
        record: &Record,
        ack: bool,
        priority: Priority,
    ) -> Result<u16, LinkError> {
        self.transmit_text(&record.to_string(), ack, priority).await
    }

    /// [`transmit`](LinkService::transmit) for pre-rendered record text.
    pub async fn transmit_text(
        &self,
        text: &str,
        ack: bool,
        priority: Priority,
    ) -> Result<u16, LinkError> {
        let queue = self.queue(priority);

        if !ack {
            let tag = self
                .splitter
                .lock()
                .await
                .split_to_queue(text, queue, false, None)
                .await?;
            return Ok(tag);
        }

        // The pending lock is held across the split so the capacity check
        // and the insert stay one atomic step.
        let mut pending = self.pending.lock().await;
        if pending.len() >= self.tuning.pending_capacity {
            return Err(LinkError::PendingAckCapacity);
        }
        let tag = self
            .splitter
            .lock()
            .await
            .split_to_queue(text, queue, true, None)
            .await?;
        if tag >= self.tuning.ack_threshold {
            pending.insert(
                tag,
                PendingAck {
                    deadline: Instant::now() + self.tuning.resend_interval,
                    attempts: 0,
                    origin: priority,
                    record: text.to_string(),
                },
            );
            log::info!("tracking message ({}) for ack", tag);
        }
        Ok(tag)
    }

    /// Drop the pending entry for an acked tag. Idempotent: duplicate acks
    /// for the same tag are expected on the air.
    pub async fn ack_received(&self, tag: u16) {
        if self.pending.lock().await.remove(&tag).is_some() {
            log::info!("ack received for {}", tag);
        }
    }

    /// Number of records awaiting acknowledgement.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// One retransmit sweep at time `now`: expired entries either drop with
    /// a warning (retries exhausted) or are re-encoded with their original
    /// tag onto IMMEDIATE (same origin) or HIGH (everything else).
    ///
    /// The pending table is mutated across awaits by the ack consumer; the
    /// sweep re-checks entry presence after every unlocked section.
    pub async fn sweep_pending(&self, now: Instant) {
        let mut to_resend: Vec<(u16, Priority, String)> = Vec::new();
        {
            let mut pending = self.pending.lock().await;
            let expired: Vec<u16> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(tag, _)| *tag)
                .collect();
            for tag in expired {
                let Some(entry) = pending.get(&tag) else {
                    continue;
                };
                if entry.attempts >= self.tuning.max_retries {
                    log::warn!(
                        "failed to receive ack for tag {} after {} attempts",
                        tag,
                        self.tuning.max_retries
                    );
                    pending.remove(&tag);
                } else {
                    to_resend.push((tag, entry.origin, entry.record.clone()));
                }
            }
        }

        for (tag, origin, record) in to_resend {
            log::info!("{} not acked, resending", tag);
            let queue = if origin == Priority::Immediate {
                self.immediate
            } else {
                self.high
            };
            let result = self
                .splitter
                .lock()
                .await
                .split_to_queue(&record, queue, true, Some(tag))
                .await;
            match result {
                Ok(_) => {
                    if let Some(entry) = self.pending.lock().await.get_mut(&tag) {
                        entry.attempts += 1;
                        entry.deadline = now + self.tuning.resend_interval;
                    }
                }
                Err(e) => log::error!("failed to re-encode tag {}: {}", tag, e),
            }
        }
    }
}

/// Pick the next frame to transmit, honoring priority and the HIGH streak.
///
/// IMMEDIATE is consulted first on every call. HIGH is served only while the
/// streak is under the limit; serving IMMEDIATE or LOW resets the streak.
/// Returns `None` when nothing is eligible (the caller resets an exhausted
/// streak and idles).
fn select_frame(
    immediate: &FrameQueueReceiver,
    high: &FrameQueueReceiver,
    low: &FrameQueueReceiver,
    streak: &mut u8,
    limit: u8,
) -> Option<String> {
    if let Ok(frame) = immediate.try_receive() {
        *streak = 0;
        return Some(frame);
    }
    if *streak < limit {
        if let Ok(frame) = high.try_receive() {
            *streak += 1;
            return Some(frame);
        }
    }
    if let Ok(frame) = low.try_receive() {
        *streak = 0;
        return Some(frame);
    }
    None
}

/// Transmit loop: arbitrates the three priority queues and drives the radio,
/// pacing after every send for the module's duty cycle. Driver errors are
/// logged; retransmission of ack-bearing records is the monitor's job.
#[embassy_executor::task]
pub async fn transmit_task(
    service: &'static LinkService,
    immediate: FrameQueueReceiver,
    high: FrameQueueReceiver,
    low: FrameQueueReceiver,
    radio: &'static Rylr896,
    target_address: u16,
) {
    service.run.task_started();
    log::debug!("starting transmit task");
    let mut streak: u8 = 0;
    let limit = service.tuning.high_priority_send_limit;

    while service.run.is_running() {
        match select_frame(&immediate, &high, &low, &mut streak, limit) {
            Some(frame) => {
                log::debug!("transmitting frame: {}", frame);
                if let Err(e) = radio.send(target_address, &frame).await {
                    log::error!("radio send error: {}", e);
                }
                Timer::after(service.tuning.post_send).await;
            }
            None if streak != 0 => {
                // Streak exhausted with no LOW waiting; let HIGH resume.
                streak = 0;
            }
            None => Timer::after(service.tuning.transmit_idle).await,
        }
    }
    log::debug!("transmit task ended");
    service.run.task_finished();
}

/// Ack emission loop: every tag the codec wants acknowledged becomes an
/// `ACK:<tag>` frame at the head of the priority ordering.
#[embassy_executor::task]
pub async fn ack_emission_task(service: &'static LinkService, acks_to_send: AckTagQueueReceiver) {
    service.run.task_started();
    log::debug!("starting send ACK task");
    while service.run.is_running() {
        match with_timeout(RECEIVE_POLL, acks_to_send.receive()).await {
            Ok(tag) => {
                log::debug!("sending ACK for tag {}", tag);
                service.immediate.send(Ack(tag).to_string()).await;
            }
            Err(_) => continue,
        }
    }
    log::debug!("send ACK task ended");
    service.run.task_finished();
}

/// Ack consumer loop: drains received ack tags into the pending table.
#[embassy_executor::task]
pub async fn ack_consumer_task(service: &'static LinkService, acks_received: AckTagQueueReceiver) {
    service.run.task_started();
    while service.run.is_running() {
        match with_timeout(RECEIVE_POLL, acks_received.receive()).await {
            Ok(tag) => service.ack_received(tag).await,
            Err(_) => continue,
        }
    }
    service.run.task_finished();
}

/// Retransmit monitor loop: sweeps the pending-ack table on a fixed tick.
#[embassy_executor::task]
pub async fn resend_monitor_task(service: &'static LinkService) {
    service.run.task_started();
    log::debug!("starting resend monitor task");
    while service.run.is_running() {
        Timer::after(service.tuning.ack_poll).await;
        service.sweep_pending(Instant::now()).await;
    }
    log::debug!("resend monitor task ended");
    service.run.task_finished();
}

/// Record handler loop: parses completed record texts and forwards the typed
/// records to the host. Parse failures are logged and dropped.
#[embassy_executor::task]
pub async fn record_handler_task(
    service: &'static LinkService,
    processed: RecordTextQueueReceiver,
    received_records: RecordQueueSender,
) {
    service.run.task_started();
    log::debug!("starting receive handler task");
    while service.run.is_running() {
        match with_timeout(RECEIVE_POLL, processed.receive()).await {
            Ok(text) => match records::unpack(&text) {
                Ok(record) => {
                    log::debug!("received record: {}", record);
                    received_records.send(record).await;
                }
                Err(e) => log::error!("error unpacking received record: {}", e),
            },
            Err(_) => continue,
        }
    }
    log::debug!("receive handler task ended");
    service.run.task_finished();
}
