//! Async link task owning a [`Session`] and its transport.
//!
//! The task polls the transport on a short interval, feeds received bytes to
//! the session and writes whatever the session releases. Other tasks talk to
//! it through [`LinkHandle`] and receive [`LinkEvent`]s on an unbounded
//! channel.
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::future::pending;
use std::io::ErrorKind;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Interval, MissedTickBehavior};

use crate::metrics;
use crate::tuya::{Datapoint, DatapointValue, InitState, ProtocolVariant, Session, Transport};

#[cfg(feature = "serial")]
use serialport::SerialPort;

/// Control messages accepted by the link task
#[derive(Debug)]
pub enum LinkCommand {
    WriteDatapoint {
        id: u8,
        value: DatapointValue,
        force: bool,
    },
    TimeSynced,
    EnterLowPower,
    Snapshot(oneshot::Sender<LinkSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Notifications emitted by the link task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Initialized,
    DatapointUpdated(Datapoint),
}

/// Point-in-time view of the session, as printed by `probe`
#[derive(Debug, Clone, Serialize)]
pub struct LinkSnapshot {
    pub variant: ProtocolVariant,
    pub init_state: Option<InitState>,
    pub product: Option<String>,
    pub protocol_version: Option<u8>,
    pub status_pin: Option<u8>,
    pub reset_pin: Option<u8>,
    pub datapoints: Vec<Datapoint>,
    pub metrics: metrics::Snapshot,
}

impl LinkSnapshot {
    fn capture(session: &Session) -> Self {
        Self {
            variant: session.variant(),
            init_state: session.init_state(),
            product: session.product().map(str::to_string),
            protocol_version: session.protocol_version(),
            status_pin: session.status_pin(),
            reset_pin: session.reset_pin(),
            datapoints: session.datapoints().snapshot(),
            metrics: metrics::snapshot(),
        }
    }
}

/// Runtime parameters of the link task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// How often the transport is read and the queue serviced
    pub poll_interval: Duration,
    /// Periodic time re-synchronization signal; `None` disables it
    pub time_sync_interval: Option<Duration>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5),
            time_sync_interval: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<LinkCommand>,
}

impl LinkHandle {
    fn send(&self, cmd: LinkCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| anyhow!("link task is not running"))
    }

    pub fn write_datapoint(&self, id: u8, value: DatapointValue) -> Result<()> {
        self.send(LinkCommand::WriteDatapoint {
            id,
            value,
            force: false,
        })
    }

    pub fn force_datapoint_write(&self, id: u8, value: DatapointValue) -> Result<()> {
        self.send(LinkCommand::WriteDatapoint {
            id,
            value,
            force: true,
        })
    }

    pub fn time_synced(&self) -> Result<()> {
        self.send(LinkCommand::TimeSynced)
    }

    pub fn enter_low_power(&self) -> Result<()> {
        self.send(LinkCommand::EnterLowPower)
    }

    pub async fn snapshot(&self) -> Result<LinkSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(LinkCommand::Snapshot(tx))?;
        rx.await.map_err(|_| anyhow!("link task dropped snapshot request"))
    }

    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(LinkCommand::Shutdown(tx))?;
        rx.await.map_err(|_| anyhow!("link task exited before acknowledging shutdown"))
    }
}

struct Link<T: Transport> {
    session: Session,
    transport: T,
    options: LinkOptions,
    control_rx: mpsc::UnboundedReceiver<LinkCommand>,
}

/// Start the link task. The session is started on the task's first iteration.
pub fn spawn_link<T: Transport + 'static>(
    mut session: Session,
    transport: T,
    options: LinkOptions,
) -> (LinkHandle, mpsc::UnboundedReceiver<LinkEvent>, JoinHandle<()>) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let init_tx = event_tx.clone();
    session.on_initialized(move || {
        let _ = init_tx.send(LinkEvent::Initialized);
    });
    session.on_every_datapoint_update(move |dp| {
        let _ = event_tx.send(LinkEvent::DatapointUpdated(dp.clone()));
    });

    let link = Link {
        session,
        transport,
        options,
        control_rx,
    };
    let join = tokio::spawn(link.run());
    (LinkHandle { tx: control_tx }, event_rx, join)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => pending::<()>().await,
    }
}

fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

impl<T: Transport> Link<T> {
    async fn run(mut self) {
        info!("Starting link task ({} protocol)", self.session.variant());
        self.session.start(now());

        let mut poll = interval(self.options.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut time_sync = self.options.time_sync_interval.map(|period| {
            let mut t = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            t.set_missed_tick_behavior(MissedTickBehavior::Skip);
            t
        });

        loop {
            tokio::select! {
                cmd = self.control_rx.recv() => {
                    match cmd {
                        Some(LinkCommand::Shutdown(done)) => {
                            info!("Link task received shutdown signal");
                            let _ = done.send(());
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            warn!("Control channel closed, shutting down link");
                            break;
                        }
                    }
                }
                _ = poll.tick() => self.service(),
                _ = next_tick(&mut time_sync) => {
                    debug!("Periodic time sync");
                    self.session.time_synced();
                }
            }
        }
        info!("Link task shutting down");
    }

    fn handle_command(&mut self, cmd: LinkCommand) {
        let result = match cmd {
            LinkCommand::WriteDatapoint { id, value, force } => {
                if force {
                    self.session.force_datapoint_write(id, value)
                } else {
                    self.session.enqueue_datapoint_write(id, value)
                }
            }
            LinkCommand::TimeSynced => {
                self.session.time_synced();
                Ok(())
            }
            LinkCommand::EnterLowPower => self.session.enter_low_power_mode(),
            LinkCommand::Snapshot(reply) => {
                let _ = reply.send(LinkSnapshot::capture(&self.session));
                Ok(())
            }
            LinkCommand::Shutdown(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("Link command rejected: {}", e);
        }
    }

    fn service(&mut self) {
        let mut buf = [0u8; 256];
        match self.transport.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => self.session.receive(&buf[..n], now()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => error!("Transport read error: {} - continuing operation", e),
        }
        if let Err(e) = self.session.tick(now(), &mut self.transport) {
            error!("Transport write error: {}", e);
        }
    }
}

/// Open `port_name` as 8N1 with a read timeout short enough for the poll loop.
#[cfg(feature = "serial")]
pub fn open_serial(port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>> {
    debug!("Opening serial port {} at {} baud", port_name, baud_rate);
    let port = serialport::new(port_name, baud_rate)
        .timeout(Duration::from_millis(2))
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serialport::Parity::None)
        .flow_control(serialport::FlowControl::None)
        .open()
        .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;
    if let Err(e) = port.clear(serialport::ClearBuffer::All) {
        debug!("Could not purge serial buffers: {}", e);
    }
    Ok(port)
}
