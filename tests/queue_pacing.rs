mod common;

use common::{mcu_frame, ms, parse_host};
use std::time::Instant;
use tuyalink::tuya::{ConnectivityFlags, LinkTuning, Session};

#[test]
fn partial_inbound_frame_delays_transmit() {
    let mut s = Session::new(LinkTuning::default(), ConnectivityFlags::default());
    let t0 = Instant::now();
    s.start(t0);
    let frame = mcu_frame(0, 0x0E, &[]);
    s.receive(&frame[..3], t0);
    assert!(s.poll_transmit(t0 + ms(20)).is_none());
    s.receive(&frame[3..], t0 + ms(25));
    // Heartbeat first, then the WIFI_TEST ack queued behind it.
    assert_eq!(parse_host(&s.poll_transmit(t0 + ms(30)).unwrap()).command, 0x00);
}

#[test]
fn timed_out_request_is_not_resent() {
    let mut s = Session::new(LinkTuning::default(), ConnectivityFlags::default());
    let t0 = Instant::now();
    s.start(t0);
    assert!(s.poll_transmit(t0).is_some());
    assert_eq!(s.expected_response(), Some(0x00));
    assert!(s.poll_transmit(t0 + ms(300)).is_none());
    assert!(s.poll_transmit(t0 + ms(301)).is_none());
    assert_eq!(s.expected_response(), None);
    assert_eq!(s.queued().count(), 0);
}

#[test]
fn checksum_failure_has_no_side_effect() {
    let mut s = Session::new(LinkTuning::default(), ConnectivityFlags::default());
    let mut bad = mcu_frame(0, 0x00, &[0x00]);
    let last = bad.len() - 1;
    bad[last] ^= 0x01;
    s.receive(&bad, Instant::now());
    assert_eq!(s.queued().count(), 0);
    assert_eq!(s.protocol_version(), None);
}
