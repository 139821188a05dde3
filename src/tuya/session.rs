//! Protocol session: one MCU, one link, one owner.
//!
//! The session ties the frame codec, command queue, handshake and datapoint
//! store together. It never touches a clock or a port on its own; the owner
//! feeds received bytes with [`Session::receive`] and calls [`Session::tick`]
//! (or [`Session::poll_transmit`]) regularly with the current instant.
use log::{debug, error, info, warn};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::datapoint::{
    decode_report, encode_record, Datapoint, DatapointStore, DatapointType, DatapointValue, DecodeOptions,
};
use super::frame::{encode, Frame, FrameDecoder, FrameError, DEFAULT_IDLE_TIMEOUT};
use super::handshake::{Handshake, InitState, Step};
use super::queue::{CommandQueue, PendingCommand, QueueTuning};
use super::time::{encode_time_payload, TimeSource};
use super::timers::{TimerEvent, Timers};
use super::variant::{
    connectivity_status, LowPowerCommand, Profile, ProtocolVariant, StandardCommand, StatusReporting,
};
use crate::logutil::{escape_log, hex_pretty};
use crate::metrics;

/// Product id recorded when the MCU answers with non-printable bytes
pub const INVALID_PRODUCT: &str = r#"{"p":"INVALID"}"#;

/// WIFI_STATE payload asking a low-power MCU to sleep
pub const LOW_POWER_MODE_STATUS: u8 = 0x05;

/// DATAPOINT_REPORT acknowledgement sent by the host in low-power mode
pub const LOW_POWER_REPORT_ACK: u8 = 0x01;

/// Engine parameters, typically sourced from Config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTuning {
    pub variant: ProtocolVariant,
    pub queue: QueueTuning,
    /// Inter-byte idle time after which a partial inbound frame is dropped
    pub rx_idle_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub wifi_status_interval: Duration,
    /// Delay between finishing the handshake and logging the config dump
    pub init_dump_delay: Duration,
    pub signed_integers: bool,
    /// Datapoints whose MCU-side updates are dropped
    pub ignore_mcu_update_on_datapoints: Vec<u8>,
}

impl Default for LinkTuning {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::Standard,
            queue: QueueTuning::default(),
            rx_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: Duration::from_secs(15),
            wifi_status_interval: Duration::from_secs(1),
            init_dump_delay: Duration::from_secs(1),
            signed_integers: false,
            ignore_mcu_update_on_datapoints: Vec::new(),
        }
    }
}

/// Network reachability as seen by the host.
pub trait Connectivity: Send {
    fn is_local_network_connected(&self) -> bool;
    fn is_remote_connected(&self) -> bool;
}

/// Shared connectivity flags that other tasks can flip at runtime.
#[derive(Debug, Clone, Default)]
pub struct ConnectivityFlags {
    local: Arc<AtomicBool>,
    remote: Arc<AtomicBool>,
}

impl ConnectivityFlags {
    pub fn new(local: bool, remote: bool) -> Self {
        Self {
            local: Arc::new(AtomicBool::new(local)),
            remote: Arc::new(AtomicBool::new(remote)),
        }
    }

    pub fn set_local(&self, connected: bool) {
        self.local.store(connected, Ordering::Relaxed);
    }

    pub fn set_remote(&self, connected: bool) {
        self.remote.store(connected, Ordering::Relaxed);
    }
}

impl Connectivity for ConnectivityFlags {
    fn is_local_network_connected(&self) -> bool {
        self.local.load(Ordering::Relaxed)
    }

    fn is_remote_connected(&self) -> bool {
        self.remote.load(Ordering::Relaxed)
    }
}

/// Byte stream to the MCU.
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{operation} is not supported by the {variant} protocol")]
    UnsupportedCommand {
        operation: &'static str,
        variant: ProtocolVariant,
    },
    #[error("datapoint {id} is {known:?}, refusing to write a {requested:?} value")]
    TypeMismatch {
        id: u8,
        known: DatapointType,
        requested: DatapointType,
    },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}

type InitCallback = Box<dyn FnMut() + Send>;
type DatapointCallback = Box<dyn FnMut(&Datapoint) + Send>;

struct Listener {
    id: Option<u8>,
    filter: Option<DatapointType>,
    callback: DatapointCallback,
}

impl Listener {
    fn wants(&self, dp: &Datapoint) -> bool {
        self.id.map_or(true, |id| id == dp.id) && self.filter.map_or(true, |t| t == dp.kind())
    }
}

pub struct Session {
    profile: &'static Profile,
    tuning: LinkTuning,
    decoder: FrameDecoder,
    queue: CommandQueue,
    handshake: Handshake,
    timers: Timers,
    store: DatapointStore,
    product: Option<String>,
    protocol_version: Option<u8>,
    last_status: Option<u8>,
    connectivity: Box<dyn Connectivity>,
    time_source: Option<Box<dyn TimeSource>>,
    time_subscribed: bool,
    init_callbacks: Vec<InitCallback>,
    listeners: Vec<Listener>,
}

impl Session {
    pub fn new(tuning: LinkTuning, connectivity: impl Connectivity + 'static) -> Self {
        let profile = tuning.variant.profile();
        Self {
            profile,
            decoder: FrameDecoder::new(tuning.rx_idle_timeout),
            queue: CommandQueue::new(tuning.queue, profile),
            handshake: Handshake::new(),
            timers: Timers::new(),
            store: DatapointStore::new(),
            product: None,
            protocol_version: None,
            last_status: None,
            connectivity: Box::new(connectivity),
            time_source: None,
            time_subscribed: false,
            init_callbacks: Vec::new(),
            listeners: Vec::new(),
            tuning,
        }
    }

    /// Answer `LOCAL_TIME_QUERY` from `source`.
    pub fn with_time_source(mut self, source: impl TimeSource + 'static) -> Self {
        self.time_source = Some(Box::new(source));
        self
    }

    /// Queue the opening commands and arm periodic timers.
    pub fn start(&mut self, now: Instant) {
        info!("Starting {} protocol session", self.profile.variant);
        match self.profile.heartbeat {
            Some(heartbeat) => {
                self.queue.enqueue(heartbeat, Vec::new());
                self.timers
                    .set_interval(TimerEvent::Heartbeat, self.tuning.heartbeat_interval, now);
            }
            None => {
                self.send_status();
                self.queue.enqueue(self.profile.product_query, Vec::new());
            }
        }
    }

    /// Feed bytes read from the transport at `now`.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) {
        for result in self.decoder.push(bytes, now) {
            match result {
                Ok(frame) => {
                    metrics::inc_frames_rx();
                    self.handle_frame(frame, now);
                }
                Err(e) => {
                    metrics::inc_checksum_failures();
                    warn!("Dropping frame: {}", e);
                }
            }
        }
    }

    /// Fire due timers and return the next frame to write, if the queue releases one.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<Vec<u8>> {
        for event in self.timers.poll(now) {
            self.on_timer(event);
        }
        let PendingCommand { command, payload } = self.queue.tick(now, &mut self.decoder)?;
        match encode(command, &payload) {
            Ok(bytes) => {
                debug!(
                    "Sending {} payload {}",
                    self.command_label(command),
                    hex_pretty(&payload)
                );
                metrics::inc_frames_tx();
                Some(bytes)
            }
            Err(e) => {
                error!("Cannot encode command 0x{:02X}: {}", command, e);
                None
            }
        }
    }

    /// [`poll_transmit`](Self::poll_transmit) and write the frame to `out`.
    pub fn tick<W: Write + ?Sized>(&mut self, now: Instant, out: &mut W) -> Result<(), SessionError> {
        if let Some(bytes) = self.poll_transmit(now) {
            out.write_all(&bytes)?;
            out.flush()?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame, now: Instant) {
        debug!(
            "Received {} v{} payload {}",
            self.command_label(frame.command),
            frame.version,
            hex_pretty(&frame.payload)
        );
        self.queue.resolve(frame.command);
        if let Some(ack) = self.profile.acknowledgement(frame.command) {
            self.queue.enqueue(frame.command, ack.to_vec());
        }
        match self.profile.variant {
            ProtocolVariant::Standard => self.handle_standard(frame, now),
            ProtocolVariant::LowPower => self.handle_low_power(frame),
        }
    }

    fn handle_standard(&mut self, frame: Frame, now: Instant) {
        let step = match StandardCommand::try_from(frame.command) {
            Ok(StandardCommand::Heartbeat) => {
                self.protocol_version = Some(frame.version);
                self.handshake.on_heartbeat(frame.payload.first().copied())
            }
            Ok(StandardCommand::ProductQuery) => {
                self.record_product(&frame.payload);
                self.handshake.on_product()
            }
            Ok(StandardCommand::ConfQuery) => self.handshake.on_conf(&frame.payload),
            Ok(StandardCommand::WifiState) => self.handshake.on_wifi_ack(),
            Ok(cmd @ (StandardCommand::WifiReset | StandardCommand::WifiSelect)) => {
                warn!("{} is not handled", cmd.name());
                None
            }
            Ok(StandardCommand::DatapointReport) => {
                self.handle_datapoints(&frame.payload);
                self.handshake.on_datapoint_report()
            }
            Ok(StandardCommand::LocalTimeQuery) => {
                self.handle_time_query();
                None
            }
            Ok(StandardCommand::DatapointDeliver | StandardCommand::DatapointQuery | StandardCommand::WifiTest) => None,
            Err(raw) => {
                self.unrecognized(raw);
                None
            }
        };
        if let Some(step) = step {
            self.apply_step(step, now);
        }
    }

    fn handle_low_power(&mut self, frame: Frame) {
        match LowPowerCommand::try_from(frame.command) {
            Ok(LowPowerCommand::ProductQuery) => self.record_product(&frame.payload),
            Ok(LowPowerCommand::WifiState) => self.send_status(),
            Ok(LowPowerCommand::DatapointReport) => {
                self.handle_datapoints(&frame.payload);
                self.queue
                    .enqueue(LowPowerCommand::DatapointReport.id(), vec![LOW_POWER_REPORT_ACK]);
            }
            Ok(LowPowerCommand::LocalTimeQuery) => self.handle_time_query(),
            Ok(LowPowerCommand::FirmwareUpgrade) => info!("Declining firmware upgrade offer"),
            Ok(cmd @ (LowPowerCommand::DatapointReportStored | LowPowerCommand::ModuleCommand)) => {
                warn!("{} is not handled", cmd.name());
            }
            Ok(
                LowPowerCommand::WifiReset
                | LowPowerCommand::WifiSelect
                | LowPowerCommand::WifiTest
                | LowPowerCommand::SignalStrengthQuery
                | LowPowerCommand::ObtainDpCache,
            ) => {}
            Err(raw) => self.unrecognized(raw),
        }
    }

    fn unrecognized(&mut self, raw: u8) {
        metrics::inc_unrecognized_commands();
        warn!("Invalid {} command (0x{:02X}) received", self.profile.variant, raw);
    }

    fn apply_step(&mut self, step: Step, now: Instant) {
        match step {
            Step::Request(cmd) => self.queue.enqueue(cmd.id(), Vec::new()),
            Step::StartStatusReporting => {
                // A restarted MCU waits for a fresh status before finishing its handshake.
                self.last_status = None;
                self.timers
                    .set_interval(TimerEvent::WifiStatus, self.tuning.wifi_status_interval, now);
            }
            Step::Initialized => {
                info!("MCU initialized");
                for cb in self.init_callbacks.iter_mut() {
                    cb();
                }
                self.timers
                    .set_timeout(TimerEvent::ConfigDump, self.tuning.init_dump_delay, now);
            }
        }
    }

    fn on_timer(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::Heartbeat => {
                if let Some(heartbeat) = self.profile.heartbeat {
                    self.queue.enqueue(heartbeat, Vec::new());
                }
            }
            TimerEvent::WifiStatus => self.send_status(),
            TimerEvent::ConfigDump => {
                for line in self.config_report() {
                    info!("{}", line);
                }
            }
        }
    }

    fn record_product(&mut self, payload: &[u8]) {
        let printable = payload.iter().all(|b| (0x20..=0x7E).contains(b));
        let product = if printable {
            String::from_utf8_lossy(payload).into_owned()
        } else {
            warn!("MCU reported a non-printable product id {}", hex_pretty(payload));
            INVALID_PRODUCT.to_string()
        };
        debug!("Product: '{}'", escape_log(&product));
        self.product = Some(product);
    }

    fn send_status(&mut self) {
        let status = connectivity_status(
            self.connectivity.is_local_network_connected(),
            self.connectivity.is_remote_connected(),
            self.protocol_version,
            self.profile.status_reporting,
        );
        if self.profile.status_reporting == StatusReporting::OnChange && self.last_status == Some(status) {
            return;
        }
        debug!("Sending connectivity status 0x{:02X}", status);
        self.last_status = Some(status);
        self.queue.enqueue(self.profile.wifi_state, vec![status]);
    }

    fn handle_time_query(&mut self) {
        if self.time_source.is_none() {
            warn!("LOCAL_TIME_QUERY is not handled because time is not configured");
            return;
        }
        self.send_local_time();
        self.time_subscribed = true;
    }

    fn send_local_time(&mut self) {
        let Some(source) = self.time_source.as_ref() else {
            return;
        };
        let payload = encode_time_payload(source.now());
        if payload[0] == 0 {
            warn!("Sending missing local time");
        } else {
            debug!("Sending local time");
        }
        self.queue.enqueue(self.profile.local_time_query, payload.to_vec());
    }

    /// The time source was (re)synchronized. Resends the time once the MCU has asked for it.
    pub fn time_synced(&mut self) {
        if self.time_subscribed {
            self.send_local_time();
        }
    }

    fn handle_datapoints(&mut self, payload: &[u8]) {
        let report = decode_report(
            payload,
            DecodeOptions {
                signed_integers: self.tuning.signed_integers,
            },
        );
        for skipped in &report.skipped {
            warn!("Skipping datapoint: {}", skipped);
        }
        if let Some(truncated) = &report.truncated {
            warn!("Abandoning rest of report: {}", truncated);
        }
        for dp in report.datapoints {
            if self.tuning.ignore_mcu_update_on_datapoints.contains(&dp.id) {
                debug!("Ignoring MCU update for datapoint {}", dp.id);
                continue;
            }
            debug!("Datapoint {} update to {}", dp.id, dp.value);
            metrics::inc_datapoint_updates();
            let stored = self.store.apply(dp);
            for listener in self.listeners.iter_mut().filter(|l| l.wants(stored)) {
                (listener.callback)(stored);
            }
        }
    }

    /// Run `callback` once the handshake completes (standard variant).
    pub fn on_initialized(&mut self, callback: impl FnMut() + Send + 'static) {
        self.init_callbacks.push(Box::new(callback));
    }

    /// Run `callback` on every update of datapoint `id`, optionally only for one type.
    /// Fires immediately when the datapoint is already known.
    pub fn on_datapoint_update(
        &mut self,
        id: u8,
        filter: Option<DatapointType>,
        callback: impl FnMut(&Datapoint) + Send + 'static,
    ) {
        self.add_listener(Listener {
            id: Some(id),
            filter,
            callback: Box::new(callback),
        });
    }

    /// Run `callback` on every datapoint update, replaying all known values first.
    pub fn on_every_datapoint_update(&mut self, callback: impl FnMut(&Datapoint) + Send + 'static) {
        self.add_listener(Listener {
            id: None,
            filter: None,
            callback: Box::new(callback),
        });
    }

    fn add_listener(&mut self, mut listener: Listener) {
        for dp in self.store.iter() {
            if listener.wants(dp) {
                (listener.callback)(dp);
            }
        }
        self.listeners.push(listener);
    }

    /// Queue a datapoint write; skipped when the value is already current.
    pub fn enqueue_datapoint_write(&mut self, id: u8, value: DatapointValue) -> Result<(), SessionError> {
        self.write_datapoint(id, value, false)
    }

    /// Queue a datapoint write even if the value is unchanged.
    pub fn force_datapoint_write(&mut self, id: u8, value: DatapointValue) -> Result<(), SessionError> {
        self.write_datapoint(id, value, true)
    }

    fn write_datapoint(&mut self, id: u8, value: DatapointValue, forced: bool) -> Result<(), SessionError> {
        let deliver = self
            .profile
            .datapoint_deliver
            .ok_or(SessionError::UnsupportedCommand {
                operation: "datapoint write",
                variant: self.profile.variant,
            })?;
        let width = match self.store.get(id) {
            Some(known) => {
                if known.kind() != value.kind() {
                    return Err(SessionError::TypeMismatch {
                        id,
                        known: known.kind(),
                        requested: value.kind(),
                    });
                }
                if !forced && known.value == value {
                    debug!("Datapoint {} already {}, not sending", id, value);
                    return Ok(());
                }
                Some(known.len)
            }
            None => {
                warn!("Setting unknown datapoint {}", id);
                None
            }
        };
        let width = match value.kind() {
            DatapointType::Integer | DatapointType::Bitmask => width,
            _ => None,
        };
        let record = encode_record(id, &value, width)?;
        debug!("Setting datapoint {} to {}", id, value);
        self.queue.enqueue(deliver, record);
        Ok(())
    }

    /// Ask a low-power MCU to enter its sleep mode.
    pub fn enter_low_power_mode(&mut self) -> Result<(), SessionError> {
        if self.profile.variant != ProtocolVariant::LowPower {
            return Err(SessionError::UnsupportedCommand {
                operation: "low power mode",
                variant: self.profile.variant,
            });
        }
        info!("Entering low power mode");
        self.queue
            .enqueue(self.profile.wifi_state, vec![LOW_POWER_MODE_STATUS]);
        Ok(())
    }

    /// Human readable summary of the link, one line per entry.
    pub fn config_report(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.profile.variant {
            ProtocolVariant::Standard => {
                lines.push("Tuya:".to_string());
                if !self.handshake.is_done() {
                    lines.push(format!(
                        "  Configuration will be reported when setup is complete. Current init_state: {}",
                        self.handshake.state()
                    ));
                    lines.push(
                        "  If no further output is received, confirm that this is a supported Tuya device."
                            .to_string(),
                    );
                    return lines;
                }
            }
            ProtocolVariant::LowPower => lines.push("Tuya Low Power:".to_string()),
        }
        for dp in self.store.iter() {
            lines.push(format!("  Datapoint {}: {}", dp.id, dp.value));
        }
        let (status, reset) = (self.handshake.status_pin(), self.handshake.reset_pin());
        if status.is_some() || reset.is_some() {
            lines.push(format!(
                "  GPIO Configuration: status: pin {}, reset: pin {} (not supported)",
                pin_label(status),
                pin_label(reset)
            ));
        }
        lines.push(format!(
            "  Product: '{}'",
            escape_log(self.product.as_deref().unwrap_or_default())
        ));
        lines
    }

    fn command_label(&self, command: u8) -> String {
        match self.profile.command_name(command) {
            Some(name) => format!("{} (0x{:02X})", name, command),
            None => format!("0x{:02X}", command),
        }
    }

    pub fn variant(&self) -> ProtocolVariant {
        self.profile.variant
    }

    /// Handshake progress; `None` for the low-power variant, which has no handshake.
    pub fn init_state(&self) -> Option<InitState> {
        self.profile.has_handshake.then(|| self.handshake.state())
    }

    pub fn is_initialized(&self) -> bool {
        self.handshake.is_done()
    }

    pub fn datapoints(&self) -> &DatapointStore {
        &self.store
    }

    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    pub fn protocol_version(&self) -> Option<u8> {
        self.protocol_version
    }

    pub fn status_pin(&self) -> Option<u8> {
        self.handshake.status_pin()
    }

    pub fn reset_pin(&self) -> Option<u8> {
        self.handshake.reset_pin()
    }

    /// Reply id the queue is waiting for.
    pub fn expected_response(&self) -> Option<u8> {
        self.queue.expected_response()
    }

    /// Commands waiting to be transmitted, head first.
    pub fn queued(&self) -> impl Iterator<Item = &PendingCommand> {
        self.queue.pending()
    }

    pub fn is_timer_scheduled(&self, event: TimerEvent) -> bool {
        self.timers.is_scheduled(event)
    }
}

fn pin_label(pin: Option<u8>) -> String {
    pin.map_or_else(|| "-".to_string(), |p| p.to_string())
}
