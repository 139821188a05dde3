mod common;

use common::{mcu_frame, ms, parse_host};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tuyalink::tuya::timers::TimerEvent;
use tuyalink::tuya::{ConnectivityFlags, DatapointValue, InitState, LinkTuning, Session};

/// Transmit whatever the session releases at `now`, decoded.
fn sent(session: &mut Session, now: Instant) -> Option<(u8, Vec<u8>)> {
    session.poll_transmit(now).map(|bytes| {
        let f = parse_host(&bytes);
        (f.command, f.payload)
    })
}

fn standard(local: bool, cloud: bool) -> Session {
    Session::new(LinkTuning::default(), ConnectivityFlags::new(local, cloud))
}

#[test]
fn status_pin_path_reaches_done() {
    let mut s = standard(true, false);
    let inits = Arc::new(AtomicUsize::new(0));
    let counter = inits.clone();
    s.on_initialized(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let t0 = Instant::now();
    s.start(t0);
    assert_eq!(sent(&mut s, t0), Some((0x00, vec![])));

    s.receive(&mcu_frame(0, 0x00, &[0x00]), t0 + ms(20));
    assert_eq!(s.init_state(), Some(InitState::Product));
    assert_eq!(sent(&mut s, t0 + ms(30)), Some((0x01, vec![])));

    s.receive(&mcu_frame(0, 0x01, br#"{"p":"abc","v":"1.0.0"}"#), t0 + ms(50));
    assert_eq!(s.product(), Some(r#"{"p":"abc","v":"1.0.0"}"#));
    assert_eq!(sent(&mut s, t0 + ms(60)), Some((0x02, vec![])));

    s.receive(&mcu_frame(0, 0x02, &[0x01, 0x02]), t0 + ms(80));
    assert_eq!(s.init_state(), Some(InitState::Datapoint));
    assert!(!s.is_timer_scheduled(TimerEvent::WifiStatus));
    assert_eq!(sent(&mut s, t0 + ms(90)), Some((0x08, vec![])));
    assert_eq!(s.expected_response(), Some(0x07));

    s.receive(&mcu_frame(0, 0x07, &[0x01, 0x01, 0x00, 0x01, 0x01]), t0 + ms(120));
    assert_eq!(s.init_state(), Some(InitState::Done));
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(
        s.datapoints().get(1).map(|d| d.value.clone()),
        Some(DatapointValue::Boolean(true))
    );
    assert!(s.is_timer_scheduled(TimerEvent::ConfigDump));

    // A later report does not initialize again.
    s.receive(&mcu_frame(0, 0x07, &[0x01, 0x01, 0x00, 0x01, 0x00]), t0 + ms(200));
    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert_eq!(
        s.datapoints().get(1).map(|d| d.value.clone()),
        Some(DatapointValue::Boolean(false))
    );
}

#[test]
fn no_status_pin_goes_through_wifi_reporting() {
    let mut s = standard(true, true);
    let t0 = Instant::now();
    s.start(t0);
    sent(&mut s, t0);
    s.receive(&mcu_frame(3, 0x00, &[0x01]), t0 + ms(10));
    sent(&mut s, t0 + ms(20));
    s.receive(&mcu_frame(3, 0x01, b"{}"), t0 + ms(30));
    sent(&mut s, t0 + ms(40));
    s.receive(&mcu_frame(3, 0x02, &[]), t0 + ms(50));
    assert_eq!(s.init_state(), Some(InitState::Wifi));
    assert!(s.is_timer_scheduled(TimerEvent::WifiStatus));

    // First report one interval later; version 3 allows the cloud status.
    assert_eq!(sent(&mut s, t0 + ms(500)), None);
    assert_eq!(sent(&mut s, t0 + ms(1050)), Some((0x03, vec![0x04])));
    // Unchanged status is not repeated.
    assert_eq!(sent(&mut s, t0 + ms(2050)), None);

    s.receive(&mcu_frame(3, 0x03, &[]), t0 + ms(2100));
    assert_eq!(s.init_state(), Some(InitState::Datapoint));
    assert_eq!(sent(&mut s, t0 + ms(2110)), Some((0x08, vec![])));
}

#[test]
fn cloud_status_needs_protocol_three() {
    let mut s = standard(true, true);
    let t0 = Instant::now();
    s.start(t0);
    sent(&mut s, t0);
    s.receive(&mcu_frame(0, 0x00, &[0x01]), t0 + ms(10));
    assert_eq!(sent(&mut s, t0 + ms(20)), Some((0x01, vec![])));
    s.receive(&mcu_frame(0, 0x01, b"{}"), t0 + ms(30));
    assert_eq!(sent(&mut s, t0 + ms(40)), Some((0x02, vec![])));
    s.receive(&mcu_frame(0, 0x02, &[]), t0 + ms(50));
    assert_eq!(s.protocol_version(), Some(0));
    assert_eq!(sent(&mut s, t0 + ms(1100)), Some((0x03, vec![0x03])));
}

#[test]
fn restart_heartbeat_restarts_handshake() {
    let mut s = standard(false, false);
    let t0 = Instant::now();
    s.start(t0);
    s.receive(&mcu_frame(0, 0x00, &[0x00]), t0);
    s.receive(&mcu_frame(0, 0x01, b"x"), t0);
    s.receive(&mcu_frame(0, 0x02, &[0x0C, 0x0D]), t0);
    s.receive(&mcu_frame(0, 0x07, &[0x02, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x2A]), t0);
    assert_eq!(s.init_state(), Some(InitState::Done));

    s.receive(&mcu_frame(0, 0x00, &[0x01]), t0 + ms(15_000));
    assert_eq!(s.init_state(), Some(InitState::Done));
    s.receive(&mcu_frame(0, 0x00, &[0x00]), t0 + ms(30_000));
    assert_eq!(s.init_state(), Some(InitState::Product));
    // Pins and datapoints survive the restart.
    assert_eq!(s.status_pin(), Some(0x0C));
    assert_eq!(
        s.datapoints().get(2).map(|d| d.value.clone()),
        Some(DatapointValue::Integer(42))
    );
}

#[test]
fn restart_without_status_pin_resends_wifi_state() {
    let mut s = standard(true, false);
    let t0 = Instant::now();
    s.start(t0);
    assert_eq!(sent(&mut s, t0), Some((0x00, vec![])));
    s.receive(&mcu_frame(3, 0x00, &[0x01]), t0 + ms(10));
    assert_eq!(sent(&mut s, t0 + ms(20)), Some((0x01, vec![])));
    s.receive(&mcu_frame(3, 0x01, b"{}"), t0 + ms(30));
    assert_eq!(sent(&mut s, t0 + ms(40)), Some((0x02, vec![])));
    s.receive(&mcu_frame(3, 0x02, &[]), t0 + ms(50));
    assert_eq!(sent(&mut s, t0 + ms(1100)), Some((0x03, vec![0x03])));
    s.receive(&mcu_frame(3, 0x03, &[]), t0 + ms(1150));
    assert_eq!(sent(&mut s, t0 + ms(1160)), Some((0x08, vec![])));
    s.receive(&mcu_frame(3, 0x07, &[0x01, 0x01, 0x00, 0x01, 0x01]), t0 + ms(1200));
    assert_eq!(s.init_state(), Some(InitState::Done));

    s.receive(&mcu_frame(3, 0x00, &[0x00]), t0 + ms(3000));
    assert_eq!(s.init_state(), Some(InitState::Product));
    assert_eq!(sent(&mut s, t0 + ms(3010)), Some((0x01, vec![])));
    s.receive(&mcu_frame(3, 0x01, b"{}"), t0 + ms(3020));
    assert_eq!(sent(&mut s, t0 + ms(3030)), Some((0x02, vec![])));
    s.receive(&mcu_frame(3, 0x02, &[]), t0 + ms(3040));
    assert_eq!(s.init_state(), Some(InitState::Wifi));

    // Same status as before the restart, yet the MCU needs to hear it again.
    assert_eq!(sent(&mut s, t0 + ms(4100)), Some((0x03, vec![0x03])));
    s.receive(&mcu_frame(3, 0x03, &[]), t0 + ms(4150));
    assert_eq!(sent(&mut s, t0 + ms(4160)), Some((0x08, vec![])));
    s.receive(&mcu_frame(3, 0x07, &[0x01, 0x01, 0x00, 0x01, 0x00]), t0 + ms(4200));
    assert_eq!(s.init_state(), Some(InitState::Done));
}

#[test]
fn repeated_report_gives_same_store() {
    let mut s = standard(false, false);
    let t0 = Instant::now();
    let report = mcu_frame(
        0,
        0x07,
        &[0x01, 0x01, 0x00, 0x01, 0x01, 0x03, 0x04, 0x00, 0x01, 0x02, 0x05, 0x05, 0x00, 0x02, 0x01, 0x80],
    );
    s.receive(&report, t0);
    let first = s.datapoints().snapshot();
    assert_eq!(first.len(), 3);
    s.receive(&report, t0 + ms(50));
    assert_eq!(s.datapoints().snapshot(), first);
}

#[test]
fn heartbeat_repeats_every_interval() {
    let mut s = standard(false, false);
    let t0 = Instant::now();
    s.start(t0);
    assert_eq!(sent(&mut s, t0), Some((0x00, vec![])));
    s.receive(&mcu_frame(0, 0x00, &[0x01]), t0 + ms(5));
    // The product query goes out next; let its reply time out.
    assert_eq!(sent(&mut s, t0 + ms(20)), Some((0x01, vec![])));
    assert_eq!(sent(&mut s, t0 + ms(14_999)), None);
    assert_eq!(sent(&mut s, t0 + ms(15_000)), Some((0x00, vec![])));
}

#[test]
fn unknown_command_is_dropped_without_state_change() {
    let mut s = standard(false, false);
    let t0 = Instant::now();
    s.receive(&mcu_frame(0, 0x42, &[0x01]), t0);
    assert_eq!(s.init_state(), Some(InitState::Heartbeat));
    assert_eq!(s.queued().count(), 0);
}

#[test]
fn config_report_lists_datapoints_after_init() {
    let mut s = standard(false, false);
    let t0 = Instant::now();
    s.receive(&mcu_frame(0, 0x00, &[0x00]), t0);
    s.receive(&mcu_frame(0, 0x01, b"{\"p\":\"q\"}"), t0);
    s.receive(&mcu_frame(0, 0x02, &[0x01, 0x02]), t0);
    s.receive(
        &mcu_frame(0, 0x07, &[0x01, 0x01, 0x00, 0x01, 0x01, 0x05, 0x04, 0x00, 0x01, 0x02]),
        t0,
    );
    let report = s.config_report();
    assert_eq!(
        report,
        vec![
            "Tuya:".to_string(),
            "  Datapoint 1: switch (value: ON)".to_string(),
            "  Datapoint 5: enum (value: 2)".to_string(),
            "  GPIO Configuration: status: pin 1, reset: pin 2 (not supported)".to_string(),
            "  Product: '{\"p\":\"q\"}'".to_string(),
        ]
    );
}
