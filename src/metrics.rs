//! Process-wide link counters.
//! Read through [`snapshot`]; the probe command prints them on exit.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RX: AtomicU64 = AtomicU64::new(0);
static FRAMES_TX: AtomicU64 = AtomicU64::new(0);
static CHECKSUM_FAILURES: AtomicU64 = AtomicU64::new(0);
static UNRECOGNIZED_COMMANDS: AtomicU64 = AtomicU64::new(0);
static RESPONSE_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
static DATAPOINT_UPDATES: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_rx() {
    FRAMES_RX.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_tx() {
    FRAMES_TX.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_checksum_failures() {
    CHECKSUM_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_unrecognized_commands() {
    UNRECOGNIZED_COMMANDS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_response_timeouts() {
    RESPONSE_TIMEOUTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_datapoint_updates() {
    DATAPOINT_UPDATES.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub frames_rx: u64,
    pub frames_tx: u64,
    pub checksum_failures: u64,
    pub unrecognized_commands: u64,
    pub response_timeouts: u64,
    pub datapoint_updates: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_rx: FRAMES_RX.load(Ordering::Relaxed),
        frames_tx: FRAMES_TX.load(Ordering::Relaxed),
        checksum_failures: CHECKSUM_FAILURES.load(Ordering::Relaxed),
        unrecognized_commands: UNRECOGNIZED_COMMANDS.load(Ordering::Relaxed),
        response_timeouts: RESPONSE_TIMEOUTS.load(Ordering::Relaxed),
        datapoint_updates: DATAPOINT_UPDATES.load(Ordering::Relaxed),
    }
}
