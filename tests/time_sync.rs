mod common;

use common::{mcu_frame, saturday_morning, FixedClock};
use std::time::Instant;
use tuyalink::tuya::{ConnectivityFlags, LinkTuning, ProtocolVariant, Session};

fn queued(s: &Session) -> Vec<(u8, Vec<u8>)> {
    s.queued().map(|c| (c.command, c.payload.clone())).collect()
}

#[test]
fn time_query_answered_and_resent_on_sync() {
    let clock = FixedClock::new(Some(saturday_morning()));
    let mut s = Session::new(LinkTuning::default(), ConnectivityFlags::default())
        .with_time_source(clock.clone());

    // Sync before the MCU asked is ignored.
    s.time_synced();
    assert!(queued(&s).is_empty());

    s.receive(&mcu_frame(0, 0x1C, &[]), Instant::now());
    assert_eq!(queued(&s), vec![(0x1C, vec![0x01, 24, 6, 15, 10, 30, 0, 6])]);

    clock.set(None);
    s.time_synced();
    assert_eq!(queued(&s)[1], (0x1C, vec![0; 8]));
}

#[test]
fn query_without_time_source_is_ignored() {
    let mut s = Session::new(LinkTuning::default(), ConnectivityFlags::default());
    s.receive(&mcu_frame(0, 0x1C, &[]), Instant::now());
    s.time_synced();
    assert!(queued(&s).is_empty());
}

#[test]
fn low_power_uses_its_own_command_id() {
    let tuning = LinkTuning {
        variant: ProtocolVariant::LowPower,
        ..LinkTuning::default()
    };
    let mut s = Session::new(tuning, ConnectivityFlags::default())
        .with_time_source(FixedClock::new(Some(saturday_morning())));
    s.receive(&mcu_frame(0, 0x06, &[]), Instant::now());
    assert_eq!(queued(&s), vec![(0x06, vec![0x01, 24, 6, 15, 10, 30, 0, 6])]);
}
