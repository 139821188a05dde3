//! # tuyalink - host driver for Tuya serial MCU peripherals
//!
//! Tuya modules pair a Wi-Fi chip with a separate microcontroller (MCU) that
//! owns the actual device (a dimmer, a fan, a sensor). The two talk over a
//! UART using a framed binary protocol with the `0x55 0xAA` header. This crate
//! implements the host side of that link: framing, the startup handshake,
//! datapoint synchronization, connectivity reporting and time distribution,
//! for both the standard and the battery powered (low-power) firmware.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tuyalink::config::Config;
//! use tuyalink::link::{open_serial, spawn_link, LinkEvent};
//! use tuyalink::tuya::{ConnectivityFlags, Session};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("tuyalink.toml").await?;
//!     let session = Session::new(config.link_tuning(), ConnectivityFlags::new(true, false));
//!     let port = open_serial(&config.serial.port, config.serial.baud_rate)?;
//!     let (_handle, mut events, _join) = spawn_link(session, port, config.link_options());
//!     while let Some(LinkEvent::DatapointUpdated(dp)) = events.recv().await {
//!         println!("{}: {}", dp.id, dp.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`tuya`] - protocol engine (codec, queue, handshake, datapoints)
//! - [`link`] - tokio task driving a session over a serial port
//! - [`config`] - TOML configuration
//! - [`metrics`] - process-wide counters
//! - [`logutil`] - log formatting helpers
//!
//! ```text
//! ┌─────────────────┐
//! │   link task     │ ← control channel, events, polling
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Session       │ ← handshake, datapoints, acknowledgements
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ queue + codec   │ ← pacing, reply gating, framing
//! └─────────────────┘
//! ```

pub mod config;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod tuya;
