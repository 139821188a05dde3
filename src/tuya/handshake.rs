//! Startup handshake of the standard firmware.
//!
//! The MCU is only considered ready once it has answered, in order, a
//! heartbeat, a product query, a configuration query, optionally a
//! connectivity report and finally a datapoint query. The state machine only
//! moves forward; a heartbeat carrying status `0x00` means the MCU rebooted
//! and restarts the sequence.
use log::{debug, info};
use serde::Serialize;
use std::fmt;

use super::variant::StandardCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitState {
    #[default]
    Heartbeat,
    Product,
    Conf,
    Wifi,
    Datapoint,
    Done,
}

impl fmt::Display for InitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Heartbeat => "heartbeat",
            Self::Product => "product",
            Self::Conf => "conf",
            Self::Wifi => "wifi",
            Self::Datapoint => "datapoint",
            Self::Done => "done",
        })
    }
}

/// Action requested by a handshake transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Send this query with an empty payload
    Request(StandardCommand),
    /// Begin periodic connectivity reports (MCU has no status pin)
    StartStatusReporting,
    /// Handshake finished
    Initialized,
}

/// Heartbeat status byte announcing a fresh MCU boot
pub const RESTART_STATUS: u8 = 0x00;

#[derive(Debug, Default, Clone)]
pub struct Handshake {
    state: InitState,
    status_pin: Option<u8>,
    reset_pin: Option<u8>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> InitState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == InitState::Done
    }

    pub fn status_pin(&self) -> Option<u8> {
        self.status_pin
    }

    pub fn reset_pin(&self) -> Option<u8> {
        self.reset_pin
    }

    /// Heartbeat reply with its first payload byte, if any.
    pub fn on_heartbeat(&mut self, status: Option<u8>) -> Option<Step> {
        if status == Some(RESTART_STATUS) {
            info!("MCU restarted");
            self.state = InitState::Heartbeat;
        }
        if self.state != InitState::Heartbeat {
            return None;
        }
        self.advance(InitState::Product);
        Some(Step::Request(StandardCommand::ProductQuery))
    }

    pub fn on_product(&mut self) -> Option<Step> {
        if self.state != InitState::Product {
            return None;
        }
        self.advance(InitState::Conf);
        Some(Step::Request(StandardCommand::ConfQuery))
    }

    /// Configuration reply. Two or more bytes carry the status and reset pins.
    pub fn on_conf(&mut self, payload: &[u8]) -> Option<Step> {
        if let [status, reset, ..] = payload {
            self.status_pin = Some(*status);
            self.reset_pin = Some(*reset);
        }
        if self.state != InitState::Conf {
            return None;
        }
        if self.status_pin.is_some() {
            self.advance(InitState::Datapoint);
            Some(Step::Request(StandardCommand::DatapointQuery))
        } else {
            self.advance(InitState::Wifi);
            Some(Step::StartStatusReporting)
        }
    }

    pub fn on_wifi_ack(&mut self) -> Option<Step> {
        if self.state != InitState::Wifi {
            return None;
        }
        self.advance(InitState::Datapoint);
        Some(Step::Request(StandardCommand::DatapointQuery))
    }

    pub fn on_datapoint_report(&mut self) -> Option<Step> {
        if self.state != InitState::Datapoint {
            return None;
        }
        self.advance(InitState::Done);
        Some(Step::Initialized)
    }

    fn advance(&mut self, next: InitState) {
        debug!("Handshake {} -> {}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sequence_through_wifi() {
        let mut hs = Handshake::new();
        assert_eq!(
            hs.on_heartbeat(Some(0x01)),
            Some(Step::Request(StandardCommand::ProductQuery))
        );
        assert_eq!(hs.on_product(), Some(Step::Request(StandardCommand::ConfQuery)));
        assert_eq!(hs.on_conf(&[]), Some(Step::StartStatusReporting));
        assert_eq!(hs.state(), InitState::Wifi);
        assert_eq!(
            hs.on_wifi_ack(),
            Some(Step::Request(StandardCommand::DatapointQuery))
        );
        assert_eq!(hs.on_datapoint_report(), Some(Step::Initialized));
        assert!(hs.is_done());
        assert_eq!(hs.on_datapoint_report(), None);
    }

    #[test]
    fn status_pin_skips_wifi() {
        let mut hs = Handshake::new();
        hs.on_heartbeat(Some(0x00));
        hs.on_product();
        assert_eq!(
            hs.on_conf(&[0x01, 0x02]),
            Some(Step::Request(StandardCommand::DatapointQuery))
        );
        assert_eq!(hs.state(), InitState::Datapoint);
        assert_eq!(hs.status_pin(), Some(1));
        assert_eq!(hs.reset_pin(), Some(2));
    }

    #[test]
    fn out_of_order_replies_are_ignored() {
        let mut hs = Handshake::new();
        assert_eq!(hs.on_product(), None);
        assert_eq!(hs.on_conf(&[0x05, 0x06]), None);
        assert_eq!(hs.on_wifi_ack(), None);
        assert_eq!(hs.on_datapoint_report(), None);
        assert_eq!(hs.state(), InitState::Heartbeat);
        // Pins are still recorded.
        assert_eq!(hs.status_pin(), Some(5));
    }

    #[test]
    fn restart_heartbeat_resets_done() {
        let mut hs = Handshake::new();
        hs.on_heartbeat(Some(0x01));
        hs.on_product();
        hs.on_conf(&[0x01, 0x02]);
        hs.on_datapoint_report();
        assert!(hs.is_done());
        assert_eq!(hs.on_heartbeat(Some(0x01)), None);
        assert_eq!(hs.on_heartbeat(None), None);
        assert_eq!(
            hs.on_heartbeat(Some(0x00)),
            Some(Step::Request(StandardCommand::ProductQuery))
        );
        assert_eq!(hs.state(), InitState::Product);
    }
}
