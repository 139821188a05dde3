//! Outbound command queue with pacing and response gating.
//!
//! Commands leave strictly in enqueue order. A command is only released when
//! the minimum send gap has passed, the receiver is not in the middle of a
//! frame and no reply to an earlier request is still awaited. An awaited reply
//! that never arrives is abandoned after the receive timeout; the request is
//! not resent.
use log::{debug, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::frame::FrameDecoder;
use super::variant::Profile;
use crate::logutil::hex_pretty;
use crate::metrics;

/// A command waiting for its turn on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommand {
    pub command: u8,
    pub payload: Vec<u8>,
}

impl PendingCommand {
    pub fn new(command: u8, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }
}

/// Pacing parameters, typically sourced from Config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTuning {
    /// Minimum gap between two transmitted commands
    pub min_send_gap: Duration,
    /// How long a request waits for its reply before the expectation is dropped
    pub rx_timeout: Duration,
}

impl Default for QueueTuning {
    fn default() -> Self {
        Self {
            min_send_gap: Duration::from_millis(10),
            rx_timeout: Duration::from_millis(300),
        }
    }
}

#[derive(Debug)]
pub struct CommandQueue {
    pending: VecDeque<PendingCommand>,
    expected_response: Option<u8>,
    last_tx: Option<Instant>,
    tuning: QueueTuning,
    profile: &'static Profile,
}

impl CommandQueue {
    pub fn new(tuning: QueueTuning, profile: &'static Profile) -> Self {
        Self {
            pending: VecDeque::new(),
            expected_response: None,
            last_tx: None,
            tuning,
            profile,
        }
    }

    pub fn enqueue(&mut self, command: u8, payload: Vec<u8>) {
        debug!(
            "Queueing command 0x{:02X} payload {} (depth {})",
            command,
            hex_pretty(&payload),
            self.pending.len() + 1
        );
        self.pending.push_back(PendingCommand::new(command, payload));
    }

    /// Clear the outstanding expectation when `command` is the awaited reply.
    pub fn resolve(&mut self, command: u8) -> bool {
        if self.expected_response == Some(command) {
            self.expected_response = None;
            true
        } else {
            false
        }
    }

    /// Advance the queue at `now`, returning the command to put on the wire, if any.
    pub fn tick(&mut self, now: Instant, decoder: &mut FrameDecoder) -> Option<PendingCommand> {
        decoder.expire(now);

        let since_tx = self.last_tx.map(|t| now.saturating_duration_since(t));
        if let (Some(expected), Some(elapsed)) = (self.expected_response, since_tx) {
            if elapsed > self.tuning.rx_timeout {
                warn!(
                    "Timed out after {}ms waiting for reply 0x{:02X}",
                    elapsed.as_millis(),
                    expected
                );
                metrics::inc_response_timeouts();
                self.expected_response = None;
            }
        }

        let gap_ok = since_tx.map_or(true, |elapsed| elapsed >= self.tuning.min_send_gap);
        if !gap_ok || decoder.is_receiving() || self.expected_response.is_some() {
            return None;
        }
        let cmd = self.pending.pop_front()?;
        self.last_tx = Some(now);
        self.expected_response = self.profile.expected_reply(cmd.command);
        Some(cmd)
    }

    pub fn expected_response(&self) -> Option<u8> {
        self.expected_response
    }

    pub fn last_tx(&self) -> Option<Instant> {
        self.last_tx
    }

    /// Commands not yet transmitted, head first.
    pub fn pending(&self) -> impl Iterator<Item = &PendingCommand> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
