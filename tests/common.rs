//! Test utilities & fixtures: an in-memory serial port, a fixed clock and
//! helpers for scripting the MCU side of a session.
#![allow(dead_code)] // each test binary uses a different subset

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tuyalink::tuya::{Frame, FrameDecoder, LocalTime, TimeSource};

/// Build an MCU-originated frame.
pub fn mcu_frame(version: u8, command: u8, payload: &[u8]) -> Vec<u8> {
    Frame::with_version(version, command, payload.to_vec())
        .to_bytes()
        .expect("frame fits")
}

/// Decode a single host frame written by the session.
pub fn parse_host(bytes: &[u8]) -> Frame {
    let mut dec = FrameDecoder::default();
    let mut frames: Vec<Frame> = dec
        .push(bytes, Instant::now())
        .into_iter()
        .map(|r| r.expect("valid host frame"))
        .collect();
    assert_eq!(frames.len(), 1, "expected exactly one frame in {:02X?}", bytes);
    frames.remove(0)
}

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[derive(Default)]
struct PortState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
}

/// Scripted transport. Clones share the same buffers, so a test keeps one
/// clone while the link task owns another.
#[derive(Clone, Default)]
pub struct MockPort {
    state: Arc<Mutex<PortState>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the host to read.
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().unwrap().inbound.extend(bytes);
    }

    /// Everything the host wrote so far, draining it.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().unwrap().outbound)
    }

    /// Decode every complete frame the host wrote so far.
    pub fn take_frames(&self) -> Vec<Frame> {
        let bytes = self.take_written();
        let mut dec = FrameDecoder::default();
        dec.push(&bytes, Instant::now())
            .into_iter()
            .map(|r| r.expect("valid host frame"))
            .collect()
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.inbound.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.lock().unwrap().outbound.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Time source returning a settable value.
#[derive(Clone, Default)]
pub struct FixedClock {
    time: Arc<Mutex<Option<LocalTime>>>,
}

impl FixedClock {
    pub fn new(time: Option<LocalTime>) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    pub fn set(&self, time: Option<LocalTime>) {
        *self.time.lock().unwrap() = time;
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> Option<LocalTime> {
        *self.time.lock().unwrap()
    }
}

/// 2024-06-15 10:30:00, a Saturday.
pub fn saturday_morning() -> LocalTime {
    LocalTime {
        year: 2024,
        month: 6,
        day_of_month: 15,
        hour: 10,
        minute: 30,
        second: 0,
        day_of_week: 7,
    }
}
