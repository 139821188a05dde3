//! Named one-shot and periodic timers driven by an injected clock.
//!
//! Each [`TimerEvent`] has at most one schedule; setting it again replaces the
//! previous one. Nothing fires on its own: the owner calls [`Timers::poll`]
//! with the current instant and handles whatever came due.
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerEvent {
    /// Periodic heartbeat request (standard variant)
    Heartbeat,
    /// Periodic connectivity report while the MCU has no status pin
    WifiStatus,
    /// Delayed configuration dump after initialization
    ConfigDump,
}

#[derive(Debug, Clone)]
struct Entry {
    event: TimerEvent,
    due: Instant,
    period: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct Timers {
    entries: Vec<Entry>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire `event` every `period`, first at `now + period`.
    pub fn set_interval(&mut self, event: TimerEvent, period: Duration, now: Instant) {
        self.schedule(Entry {
            event,
            due: now + period,
            period: Some(period),
        });
    }

    /// Fire `event` once at `now + delay`.
    pub fn set_timeout(&mut self, event: TimerEvent, delay: Duration, now: Instant) {
        self.schedule(Entry {
            event,
            due: now + delay,
            period: None,
        });
    }

    fn schedule(&mut self, entry: Entry) {
        self.cancel(entry.event);
        self.entries.push(entry);
    }

    pub fn cancel(&mut self, event: TimerEvent) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.event != event);
        before != self.entries.len()
    }

    pub fn is_scheduled(&self, event: TimerEvent) -> bool {
        self.entries.iter().any(|e| e.event == event)
    }

    /// Events due at `now`, earliest first. Periodic entries are re-armed;
    /// an interval that fell more than one period behind skips the missed
    /// ticks instead of bursting.
    pub fn poll(&mut self, now: Instant) -> Vec<TimerEvent> {
        let mut fired: Vec<(Instant, TimerEvent)> = Vec::new();
        self.entries.retain_mut(|e| {
            if e.due > now {
                return true;
            }
            fired.push((e.due, e.event));
            match e.period {
                Some(period) if !period.is_zero() => {
                    e.due += period;
                    if e.due <= now {
                        e.due = now + period;
                    }
                    true
                }
                _ => false,
            }
        });
        fired.sort_by_key(|(due, _)| *due);
        fired.into_iter().map(|(_, ev)| ev).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn interval_rearms_and_timeout_fires_once() {
        let t0 = Instant::now();
        let mut timers = Timers::new();
        timers.set_interval(TimerEvent::WifiStatus, ms(1000), t0);
        timers.set_timeout(TimerEvent::ConfigDump, ms(1500), t0);
        assert!(timers.poll(t0 + ms(999)).is_empty());
        assert_eq!(timers.poll(t0 + ms(1000)), vec![TimerEvent::WifiStatus]);
        assert_eq!(timers.poll(t0 + ms(1500)), vec![TimerEvent::ConfigDump]);
        assert!(!timers.is_scheduled(TimerEvent::ConfigDump));
        assert_eq!(timers.poll(t0 + ms(2000)), vec![TimerEvent::WifiStatus]);
    }

    #[test]
    fn lagging_interval_does_not_burst() {
        let t0 = Instant::now();
        let mut timers = Timers::new();
        timers.set_interval(TimerEvent::Heartbeat, ms(100), t0);
        assert_eq!(timers.poll(t0 + ms(1000)), vec![TimerEvent::Heartbeat]);
        assert!(timers.poll(t0 + ms(1050)).is_empty());
        assert_eq!(timers.poll(t0 + ms(1100)), vec![TimerEvent::Heartbeat]);
    }

    #[test]
    fn rescheduling_replaces_and_cancel_removes() {
        let t0 = Instant::now();
        let mut timers = Timers::new();
        timers.set_timeout(TimerEvent::ConfigDump, ms(10), t0);
        timers.set_timeout(TimerEvent::ConfigDump, ms(50), t0);
        assert!(timers.poll(t0 + ms(20)).is_empty());
        assert!(timers.cancel(TimerEvent::ConfigDump));
        assert!(timers.poll(t0 + ms(100)).is_empty());
    }
}
