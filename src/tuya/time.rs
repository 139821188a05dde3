//! Wall-clock time for `LOCAL_TIME_QUERY` replies.
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use serde::Serialize;

/// Broken-down local time. `day_of_week` counts from Sunday = 1 to Saturday = 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocalTime {
    pub year: u16,
    pub month: u8,
    pub day_of_month: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub day_of_week: u8,
}

impl LocalTime {
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Self {
            year: u16::try_from(dt.year()).unwrap_or(0),
            month: dt.month() as u8,
            day_of_month: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second().min(59) as u8,
            day_of_week: dt.weekday().number_from_sunday() as u8,
        }
    }

    /// A clock that was never synchronized reports a year before 2019.
    pub fn is_valid(&self) -> bool {
        (2019..=2255).contains(&self.year)
            && (1..=12).contains(&self.month)
            && (1..=31).contains(&self.day_of_month)
            && self.hour < 24
            && self.minute < 60
            && self.second < 60
            && (1..=7).contains(&self.day_of_week)
    }
}

/// Source of local time for the session.
pub trait TimeSource: Send {
    /// Current local time, `None` while the clock is not yet known.
    fn now(&self) -> Option<LocalTime>;
}

/// Host clock in the local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Option<LocalTime> {
        Some(LocalTime::from_datetime(&Local::now()))
    }
}

/// Marker byte of a time payload carrying a valid time
pub const TIME_VALID: u8 = 0x01;

/// Eight byte time reply: marker, year since 2000, month, day, hour, minute,
/// second, weekday with Monday = 1 and Sunday = 7. An unknown or invalid time
/// is sent as eight zero bytes.
pub fn encode_time_payload(time: Option<LocalTime>) -> [u8; 8] {
    match time.filter(LocalTime::is_valid) {
        Some(t) => {
            let weekday = match t.day_of_week - 1 {
                0 => 7,
                d => d,
            };
            [
                TIME_VALID,
                (t.year - 2000) as u8,
                t.month,
                t.day_of_month,
                t.hour,
                t.minute,
                t.second,
                weekday,
            ]
        }
        None => [0; 8],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn saturday_maps_to_six() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap();
        let t = LocalTime::from_datetime(&dt);
        assert_eq!(t.day_of_week, 7);
        assert_eq!(encode_time_payload(Some(t)), [0x01, 24, 6, 15, 10, 30, 0, 6]);
    }

    #[test]
    fn sunday_maps_to_seven() {
        let dt = Utc.with_ymd_and_hms(2024, 6, 16, 0, 0, 5).unwrap();
        let payload = encode_time_payload(Some(LocalTime::from_datetime(&dt)));
        assert_eq!(payload[7], 7);
        assert_eq!(payload[6], 5);
    }

    #[test]
    fn unknown_or_unsynced_time_is_zeroed() {
        assert_eq!(encode_time_payload(None), [0; 8]);
        let dt = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(encode_time_payload(Some(LocalTime::from_datetime(&dt))), [0; 8]);
    }
}
