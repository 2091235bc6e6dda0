//! # pitlink service binary
//!
//! Wires the link core to a real RYLR896-class radio on a serial port and
//! runs the car-side service: radio driver, frame codec, priority transmit
//! scheduler, alert monitors and the host dispatch that routes received
//! records.
//!
//! ## Architecture
//!
//! Two threads:
//!
//! 1. **Serial bridge (main thread)**: owns the OS serial port via the
//!    `serialport` crate and pumps CR-LF-terminated lines between the port
//!    and two bounded channels. Blocking I/O never enters the executor.
//! 2. **Embassy executor thread**: runs every cooperative task of the core —
//!    receive loop, codec loop, transmit/ack/resend loops, alert monitors
//!    and the host dispatch loop.
//!
//! Channels are created with `Box::leak` to satisfy the `'static` lifetime
//! requirements of Embassy tasks; they live for the entire process lifetime.
//!
//! The OBD poller and the pub/sub bus are external collaborators. The alert
//! monitors' sample channels (`warning_feed`, `alert_feed`) are the
//! integration point where a poller pushes `(key, value)` samples.

use anyhow::Context;
use embassy_executor::{Executor, Spawner};
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use env_logger::Builder;
use log::LevelFilter;
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

use pitlink::alerts::{MonitorAlerts, monitor_task};
use pitlink::codec::{FrameAssembler, codec_task};
use pitlink::config::LinkConfig;
use pitlink::link::{
    LinkService, Priority, ack_consumer_task, ack_emission_task, record_handler_task,
    resend_monitor_task, transmit_task,
};
use pitlink::radio::{RadioParams, Rylr896, receive_loop};
use pitlink::records::{
    AlertConfigRecord, Comparator, RadioNetworkRecord, RadioParamsRecord, Record,
};
use pitlink::{
    AckTagQueue, AlertQueue, AlertQueueReceiver, FrameQueue, LineQueue, LineQueueReceiver,
    LineQueueSender, RadioFrameQueue, RecordQueue, RecordQueueReceiver, RecordTextQueue,
    SampleQueue,
};

type SharedMonitor = Mutex<CriticalSectionRawMutex, MonitorAlerts>;

/// Startup handshake, run once the receive loop is live.
#[embassy_executor::task]
async fn startup_task(radio: &'static Rylr896) {
    match radio.start().await {
        Ok(()) => log::info!("radio link up"),
        Err(e) => log::error!("radio startup failed: {}", e),
    }
}

/// Route an emitted alert record onto the link: warnings ride HIGH, alerts
/// pre-empt everything.
async fn forward_alert(link: &LinkService, alert: pitlink::records::AlertRecord) {
    let priority = if alert.monitor == "warning" {
        Priority::High
    } else {
        Priority::Immediate
    };
    if let Err(e) = link
        .transmit(&Record::Alert(alert.clone()), true, priority)
        .await
    {
        log::error!("failed to enqueue alert {}: {}", alert, e);
    }
}

/// Answer a `REQ:ALERTS` request with one config record per installed rule.
async fn send_alert_config(link: &LinkService, monitors: [&'static SharedMonitor; 2]) {
    for monitor in monitors {
        let rules: Vec<AlertConfigRecord> = {
            let monitor = monitor.lock().await;
            monitor
                .rules()
                .map(|(listen_to, rule)| {
                    AlertConfigRecord::new(
                        monitor.name(),
                        listen_to,
                        rule.comparator,
                        rule.threshold,
                        rule.hold,
                    )
                })
                .collect()
        };
        for rule in rules {
            if let Err(e) = link
                .transmit(&Record::AlertConfig(rule), true, Priority::High)
                .await
            {
                log::error!("failed to answer config request: {}", e);
            }
        }
    }
}

/// Apply an `AC` record to the monitor it names.
async fn apply_alert_config(cfg: AlertConfigRecord, monitors: [&'static SharedMonitor; 2]) {
    for monitor in monitors {
        let mut monitor = monitor.lock().await;
        if monitor.name() != cfg.monitor {
            continue;
        }
        if cfg.comparator == Comparator::Remove {
            monitor.remove_rule(&cfg.listen_to);
        } else if let Err(e) =
            monitor.add_rule(&cfg.listen_to, cfg.comparator, cfg.threshold, cfg.hold)
        {
            log::warn!("rule update for {} ignored: {}", cfg.listen_to, e);
        }
        return;
    }
    log::warn!("alert config for unknown monitor: {}", cfg.monitor);
}

/// Host dispatch loop: waits on the parsed-record channel and the monitors'
/// alert output, routing each event to the component it addresses.
#[embassy_executor::task]
async fn dispatch_task(
    link: &'static LinkService,
    radio: &'static Rylr896,
    cfg: &'static LinkConfig,
    received: RecordQueueReceiver,
    alerts_out: AlertQueueReceiver,
    warnings: &'static SharedMonitor,
    alerts: &'static SharedMonitor,
) {
    loop {
        let record = match select(received.receive(), alerts_out.receive()).await {
            Either::First(record) => record,
            Either::Second(alert) => {
                forward_alert(link, alert).await;
                continue;
            }
        };
        match record {
            Record::AlertConfig(record) => apply_alert_config(record, [warnings, alerts]).await,
            Record::AlertClear(record) => {
                for monitor in [warnings, alerts] {
                    let mut monitor = monitor.lock().await;
                    if monitor.name() == record.monitor {
                        monitor.clear_condition(&record.listen_to).await;
                    }
                }
            }
            Record::RequestConfig(req) => match req.subsystem.as_str() {
                "LORA" => {
                    let params = RadioParamsRecord::new(
                        cfg.radio.spreading_factor,
                        cfg.radio.bandwidth,
                        cfg.radio.coding_rate,
                        cfg.radio.preamble,
                    );
                    let network = RadioNetworkRecord::new(cfg.radio.network_id, cfg.radio.address);
                    for record in [Record::RadioParams(params), Record::RadioNetwork(network)] {
                        if let Err(e) = link.transmit(&record, true, Priority::High).await {
                            log::error!("failed to answer config request: {}", e);
                        }
                    }
                }
                "ALERTS" => send_alert_config(link, [warnings, alerts]).await,
                other => log::warn!("config request for unknown subsystem: {}", other),
            },
            Record::RadioParams(record) => {
                let params = RadioParams::new(
                    record.spreading_factor,
                    record.bandwidth,
                    record.coding_rate,
                    record.preamble,
                );
                if let Err(e) = radio.set_parameters(params).await {
                    log::error!("failed to apply radio parameters: {}", e);
                }
            }
            Record::RadioNetwork(record) => {
                let result = async {
                    radio.set_network_id(record.network_id).await?;
                    radio.set_address(record.address).await
                }
                .await;
                if let Err(e) = result {
                    log::error!("failed to apply radio network config: {}", e);
                }
            }
            Record::RadioPassword(record) => {
                if let Err(e) = radio.set_password(&record.password).await {
                    log::error!("failed to apply radio password: {}", e);
                }
            }
            Record::Datapoint(record) => {
                log::info!("datapoint {}: {} {}", record.key, record.value, record.unit);
            }
            Record::TextMessage(record) => {
                log::info!(
                    "pit message ({}s): {}",
                    record.display_seconds,
                    record.message
                );
            }
            Record::Alert(record) => {
                log::info!("remote alert: {}", record);
            }
            Record::ObdMonitorConfig(record) => {
                // the OBD poller is an external collaborator; surface its
                // config records for it to pick up
                log::info!("obd monitor config received: {}", record);
            }
        }
    }
}

/// The leaked channel set shared between threads and tasks.
struct Channels {
    line_in: &'static LineQueue,
    frames: &'static RadioFrameQueue,
    processed: &'static RecordTextQueue,
    acks_to_send: &'static AckTagQueue,
    acks_received: &'static AckTagQueue,
    immediate: &'static FrameQueue,
    high: &'static FrameQueue,
    low: &'static FrameQueue,
    received_records: &'static RecordQueue,
    warning_feed: &'static SampleQueue,
    alert_feed: &'static SampleQueue,
    alert_messages: &'static AlertQueue,
    warnings: &'static SharedMonitor,
    alerts: &'static SharedMonitor,
}

fn embassy_init(
    spawner: Spawner,
    cfg: &'static LinkConfig,
    radio: &'static Rylr896,
    link: &'static LinkService,
    assembler: FrameAssembler,
    channels: Channels,
) {
    radio.run_state().start();
    link.run_state().start();

    let _ = spawner.spawn(receive_loop(
        radio,
        channels.line_in.receiver(),
        channels.frames.sender(),
    ));
    let _ = spawner.spawn(codec_task(
        assembler,
        channels.frames.receiver(),
        link.run_state(),
    ));
    let _ = spawner.spawn(transmit_task(
        link,
        channels.immediate.receiver(),
        channels.high.receiver(),
        channels.low.receiver(),
        radio,
        cfg.radio.target_address,
    ));
    let _ = spawner.spawn(ack_emission_task(link, channels.acks_to_send.receiver()));
    let _ = spawner.spawn(ack_consumer_task(link, channels.acks_received.receiver()));
    let _ = spawner.spawn(resend_monitor_task(link));
    let _ = spawner.spawn(record_handler_task(
        link,
        channels.processed.receiver(),
        channels.received_records.sender(),
    ));

    let _ = spawner.spawn(monitor_task(
        channels.warnings,
        channels.warning_feed.receiver(),
        link.run_state(),
    ));
    let _ = spawner.spawn(monitor_task(
        channels.alerts,
        channels.alert_feed.receiver(),
        link.run_state(),
    ));

    let _ = spawner.spawn(dispatch_task(
        link,
        radio,
        cfg,
        channels.received_records.receiver(),
        channels.alert_messages.receiver(),
        channels.warnings,
        channels.alerts,
    ));
    let _ = spawner.spawn(startup_task(radio));
}

/// Pump lines between the OS serial port and the driver's line channels.
///
/// Reads accumulate until LF; CR is stripped before handing the line to the
/// driver. Outbound lines are written with the CR-LF the module expects.
/// Read timeouts are the idle tick; real I/O errors are fatal and unwind to
/// `main`.
fn serial_bridge(
    cfg: &LinkConfig,
    line_in: LineQueueSender,
    line_out: LineQueueReceiver,
) -> anyhow::Result<()> {
    let mut port = serialport::new(&cfg.radio.port, cfg.radio.baud)
        .timeout(Duration::from_millis(50))
        .open()
        .with_context(|| format!("failed to open serial port {}", cfg.radio.port))?;
    log::info!(
        "serial port {} open at {} baud",
        cfg.radio.port,
        cfg.radio.baud
    );

    let mut pending = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        while let Ok(line) = line_out.try_receive() {
            port.write_all(line.as_bytes())
                .and_then(|_| port.write_all(b"\r\n"))
                .context("serial write failed")?;
        }

        match port.read(&mut chunk) {
            Ok(0) => {}
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = pending.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if line_in.try_send(line).is_err() {
                        log::warn!("inbound line channel full, dropping line");
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(e).context("serial read failed"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("pitlink"), LevelFilter::Debug)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "pitlink.toml".to_string());
    let cfg: &'static LinkConfig = Box::leak(Box::new(
        LinkConfig::load(std::path::Path::new(&config_path))
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading {}", config_path))?,
    ));

    log::info!("starting up");

    // Channels coordinate between the serial bridge thread and the Embassy
    // executor thread. The leak is intentional: they live for the entire
    // program lifetime and Embassy tasks require 'static handles.
    let line_in: &'static LineQueue = Box::leak(Box::new(LineQueue::new()));
    let line_out: &'static LineQueue = Box::leak(Box::new(LineQueue::new()));
    let alert_messages: &'static AlertQueue = Box::leak(Box::new(AlertQueue::new()));
    let channels = Channels {
        line_in,
        frames: Box::leak(Box::new(RadioFrameQueue::new())),
        processed: Box::leak(Box::new(RecordTextQueue::new())),
        acks_to_send: Box::leak(Box::new(AckTagQueue::new())),
        acks_received: Box::leak(Box::new(AckTagQueue::new())),
        immediate: Box::leak(Box::new(FrameQueue::new())),
        high: Box::leak(Box::new(FrameQueue::new())),
        low: Box::leak(Box::new(FrameQueue::new())),
        received_records: Box::leak(Box::new(RecordQueue::new())),
        warning_feed: Box::leak(Box::new(SampleQueue::new())),
        alert_feed: Box::leak(Box::new(SampleQueue::new())),
        alert_messages,
        warnings: Box::leak(Box::new(Mutex::new(MonitorAlerts::new(
            "warning",
            alert_messages.sender(),
        )))),
        alerts: Box::leak(Box::new(Mutex::new(MonitorAlerts::new(
            "alert",
            alert_messages.sender(),
        )))),
    };

    let radio: &'static Rylr896 =
        Box::leak(Box::new(Rylr896::new(cfg.radio.clone(), line_out.sender())));
    let link: &'static LinkService = Box::leak(Box::new(LinkService::new(
        cfg,
        channels.immediate.sender(),
        channels.high.sender(),
        channels.low.sender(),
    )));
    let assembler = FrameAssembler::new(
        cfg.codec(),
        channels.processed.sender(),
        channels.acks_to_send.sender(),
        channels.acks_received.sender(),
    );

    let _executor_handle = thread::Builder::new()
        .name("embassy-executor".to_string())
        .spawn(move || {
            let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
            executor.run(|spawner| {
                embassy_init(spawner, cfg, radio, link, assembler, channels);
            });
        })
        .expect("failed to spawn executor thread");

    // The bridge owns the port for the life of the process; a serial I/O
    // error is fatal for the driver and unwinds here.
    serial_bridge(cfg, line_in.sender(), line_out.receiver())
}
