//! Frame codec: fragmentation, tag allocation, reassembly and ack emission.
//!
//! Record texts travel the air as data frames `count/total|tag|data` (or
//! `|tag|data` when one fragment suffices) and bare ack frames `ACK:tag`.
//! The splitter turns outbound record texts into frames on a priority queue;
//! the assembler turns inbound frame texts back into completed record texts,
//! buffering fragments per tag until all slots fill.
//!
//! Tags at or above the ack threshold require acknowledgement. The assembler
//! emits one ack tag per received fragment (not per completed message);
//! duplicate acks on the air are expected and tolerated by the sender.

use embassy_time::{Duration, with_timeout};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

use crate::{
    AckTagQueueSender, FrameQueueSender, RadioFrameQueueReceiver, RecordTextQueueSender, RunState,
};

/// Literal prefix of an acknowledgement frame.
pub const ACK_PREFIX: &str = "ACK:";

/// Poll interval for the codec loop's running-flag check.
const RECEIVE_POLL: Duration = Duration::from_millis(500);

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    /// Inbound text matches neither the data-frame nor the ack grammar.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Outbound record text contains non-ASCII bytes.
    #[error("frame payload must be ASCII")]
    NotAscii,
}

/// Codec tuning, carved out of the link configuration.
#[derive(Debug, Clone, Copy)]
pub struct CodecConfig {
    /// Maximum record-text bytes per data frame.
    pub split_length: usize,
    /// Tags `>=` this value require acknowledgement.
    pub ack_threshold: u16,
    /// Exclusive upper bound of the tag space.
    pub max_tag: u16,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            split_length: 220,
            ack_threshold: 50,
            max_tag: 100,
        }
    }
}

fn frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:(\d+)/(\d+))?\|(\d+)\|(.+)$").expect("frame regex"))
}

/// One on-air data frame. `count == 0` encodes the single-fragment form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// 1-based fragment index; 0 for a single-fragment message.
    pub count: u16,
    /// Total fragment count; 0 for a single-fragment message.
    pub total: u16,
    /// Sequence tag shared by all fragments of one record.
    pub tag: u16,
    /// The carried record-text slice.
    pub data: String,
}

impl Frame {
    /// A complete record in one frame.
    pub fn single(tag: u16, data: &str) -> Self {
        Self {
            count: 0,
            total: 0,
            tag,
            data: data.to_string(),
        }
    }

    /// Fragment `count` of `total` under `tag`.
    pub fn fragment(count: u16, total: u16, tag: u16, data: &str) -> Self {
        Self {
            count,
            total,
            tag,
            data: data.to_string(),
        }
    }

    /// Parse on-air frame text.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let caps = frame_re()
            .captures(text)
            .ok_or_else(|| FrameError::Malformed(text.to_string()))?;

        let number = |idx: usize| -> Result<u16, FrameError> {
            caps.get(idx)
                .map_or("0", |m| m.as_str())
                .parse()
                .map_err(|_| FrameError::Malformed(text.to_string()))
        };

        Ok(Self {
            count: number(1)?,
            total: number(2)?,
            tag: number(3)?,
            data: caps.get(4).map_or("", |m| m.as_str()).to_string(),
        })
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            write!(f, "|{}|{}", self.tag, self.data)
        } else {
            write!(f, "{}/{}|{}|{}", self.count, self.total, self.tag, self.data)
        }
    }
}

/// A bare acknowledgement frame carrying the acked tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack(pub u16);

impl Ack {
    /// Parse `ACK:<tag>` text.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        text.strip_prefix(ACK_PREFIX)
            .and_then(|tag| tag.parse().ok())
            .map(Ack)
            .ok_or_else(|| FrameError::Malformed(text.to_string()))
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", ACK_PREFIX, self.0)
    }
}

/// Outbound half of the codec: tag allocation and fragmentation.
///
/// The two tag counters cycle independently inside their ranges: non-ack tags
/// in `[1, ack_threshold)`, ack tags in `[ack_threshold, max_tag)`. Tag reuse
/// is expected; receivers clear stale buffers when a fresh single-fragment
/// frame arrives under a reused tag.
pub struct FrameSplitter {
    cfg: CodecConfig,
    nack_tag: u16,
    ack_tag: u16,
}

impl FrameSplitter {
    pub fn new(cfg: CodecConfig) -> Self {
        Self {
            nack_tag: 1,
            ack_tag: cfg.ack_threshold,
            cfg,
        }
    }

    pub fn config(&self) -> CodecConfig {
        self.cfg
    }

    /// Allocate the next tag in the requested range.
    fn next_tag(&mut self, ack_needed: bool) -> u16 {
        if ack_needed {
            let tag = self.ack_tag;
            self.ack_tag += 1;
            if self.ack_tag >= self.cfg.max_tag {
                self.ack_tag = self.cfg.ack_threshold;
                log::debug!("ack tag cycle completed, reset to {}", self.cfg.ack_threshold);
            }
            tag
        } else {
            let tag = self.nack_tag;
            self.nack_tag += 1;
            if self.nack_tag >= self.cfg.ack_threshold {
                self.nack_tag = 1;
                log::debug!("non-ack tag cycle completed, reset to 1");
            }
            tag
        }
    }

    /// Encode a record text into frames on `queue`, fragmenting when it
    /// exceeds the split length. A caller-supplied `tag` preserves identity
    /// across retransmissions; otherwise one is allocated from the range
    /// selected by `ack_needed`. Returns the tag used.
    pub async fn split_to_queue(
        &mut self,
        text: &str,
        queue: FrameQueueSender,
        ack_needed: bool,
        tag: Option<u16>,
    ) -> Result<u16, FrameError> {
        if !text.is_ascii() {
            return Err(FrameError::NotAscii);
        }

        let tag = tag.unwrap_or_else(|| self.next_tag(ack_needed));

        if text.len() <= self.cfg.split_length {
            log::debug!("message fits in a single frame, tag {}", tag);
            queue.send(Frame::single(tag, text).to_string()).await;
            return Ok(tag);
        }

        let chunks: Vec<&[u8]> = text.as_bytes().chunks(self.cfg.split_length).collect();
        let total = chunks.len() as u16;
        log::info!(
            "splitting message ({} bytes) into {} fragments, tag {}",
            text.len(),
            total,
            tag
        );

        for (i, chunk) in chunks.into_iter().enumerate() {
            let chunk = std::str::from_utf8(chunk).map_err(|_| FrameError::NotAscii)?;
            queue
                .send(Frame::fragment(i as u16 + 1, total, tag, chunk).to_string())
                .await;
        }

        Ok(tag)
    }
}

/// In-progress reassembly of one fragmented message.
struct Reassembly {
    received: usize,
    total: u16,
    slots: Vec<String>,
}

impl Reassembly {
    fn new(total: u16) -> Self {
        Self {
            received: 0,
            total,
            slots: vec![String::new(); total as usize],
        }
    }
}

/// Inbound half of the codec: frame classification, fragment reassembly and
/// ack routing.
///
/// Completed record texts go to `processed_tx`; tags to acknowledge go to
/// `acks_out_tx` (one per received ack-bearing fragment); received ack tags
/// go to `acks_in_tx` for the pending-ack consumer. Acks are delivered over
/// channels, never by synchronous call, so decoding never blocks on the
/// pending-ack table owner.
pub struct FrameAssembler {
    cfg: CodecConfig,
    buffers: HashMap<u16, Reassembly>,
    processed_tx: RecordTextQueueSender,
    acks_out_tx: AckTagQueueSender,
    acks_in_tx: AckTagQueueSender,
}

impl FrameAssembler {
    pub fn new(
        cfg: CodecConfig,
        processed_tx: RecordTextQueueSender,
        acks_out_tx: AckTagQueueSender,
        acks_in_tx: AckTagQueueSender,
    ) -> Self {
        log::info!(
            "codec configured with split_length={}, ack_threshold={}",
            cfg.split_length,
            cfg.ack_threshold
        );
        Self {
            cfg,
            buffers: HashMap::new(),
            processed_tx,
            acks_out_tx,
            acks_in_tx,
        }
    }

    /// Number of in-progress reassembly buffers.
    pub fn buffered_tags(&self) -> usize {
        self.buffers.len()
    }

    /// Classify and process one inbound frame text. Malformed input is
    /// logged and dropped; buffers of other tags are never affected.
    pub async fn handle_line(&mut self, line: &str) {
        if line.starts_with(ACK_PREFIX) {
            match Ack::parse(line) {
                Ok(Ack(tag)) => {
                    log::info!("received ack for tag {}", tag);
                    self.acks_in_tx.send(tag).await;
                }
                Err(e) => log::error!("dropping bad ack frame: {}", e),
            }
            return;
        }

        match Frame::parse(line) {
            Ok(frame) => self.handle_frame(frame).await,
            Err(e) => log::error!("dropping unparseable frame: {}", e),
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        if frame.count == 0 {
            // Single-fragment message. A leftover buffer under this tag is
            // stale state from an abandoned transfer.
            if self.buffers.remove(&frame.tag).is_some() {
                log::warn!("clearing stale buffer for tag {}", frame.tag);
            }
            self.processed_tx.send(frame.data).await;
            if frame.tag >= self.cfg.ack_threshold {
                self.acks_out_tx.send(frame.tag).await;
            }
            return;
        }

        log::debug!(
            "fragment {}/{} for tag {}",
            frame.count,
            frame.total,
            frame.tag
        );

        let needs_init = self
            .buffers
            .get(&frame.tag)
            .is_none_or(|b| b.total != frame.total);
        if needs_init {
            self.buffers.insert(frame.tag, Reassembly::new(frame.total));
            log::info!(
                "new buffer for tag {}, expecting {} fragments",
                frame.tag,
                frame.total
            );
        }

        if let Some(buffer) = self.buffers.get_mut(&frame.tag) {
            if frame.count <= buffer.total {
                buffer.slots[frame.count as usize - 1] = frame.data;
                buffer.received = buffer.slots.iter().filter(|s| !s.is_empty()).count();

                if buffer.received == buffer.total as usize {
                    let completed = buffer.slots.concat();
                    log::info!(
                        "message with tag {} completed ({} bytes)",
                        frame.tag,
                        completed.len()
                    );
                    self.buffers.remove(&frame.tag);
                    self.processed_tx.send(completed).await;
                }
            } else {
                log::warn!("invalid fragment {} for tag {}", frame.count, frame.tag);
            }
        }

        // Per-fragment, not per-message: the sender tolerates duplicates.
        if frame.tag >= self.cfg.ack_threshold {
            self.acks_out_tx.send(frame.tag).await;
        }
    }
}

/// Codec process loop: drains the received-frames channel into the assembler
/// until the run flag clears.
#[embassy_executor::task]
pub async fn codec_task(
    mut assembler: FrameAssembler,
    frames: RadioFrameQueueReceiver,
    run: &'static RunState,
) {
    run.task_started();
    log::info!("frame processing loop started");
    while run.is_running() {
        match with_timeout(RECEIVE_POLL, frames.receive()).await {
            Ok(line) => assembler.handle_line(&line).await,
            Err(_) => continue,
        }
    }
    log::info!("frame processing loop ended");
    run.task_finished();
}
