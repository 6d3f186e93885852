/*! Time windows, the unit of work for extraction. */

use crate::{SatFlashError, SatFlashResult};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use std::fmt::{self, Display};

/// A closed-open interval `[start, end)` of UTC times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a new window, `start` must come strictly before `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> SatFlashResult<Self> {
        if start >= end {
            return Err(SatFlashError::InvalidWindow(format!(
                "start {} is not before end {}",
                start, end
            )));
        }

        Ok(TimeWindow { start, end })
    }

    /// The first instant in the window.
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// The first instant after the window.
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        time >= self.start && time < self.end
    }

    /// Start times of every `cadence` long slot that overlaps this window.
    ///
    /// Slots are aligned to multiples of the cadence since the Unix epoch. The first slot is the
    /// one containing `start`, the last is the one containing the final instant before `end`.
    pub fn slot_starts(&self, cadence: Duration) -> SatFlashResult<Vec<DateTime<Utc>>> {
        let step = cadence.num_milliseconds();
        if step <= 0 {
            return Err(SatFlashError::InvalidWindow(format!(
                "cadence must be positive, got {}",
                cadence
            )));
        }

        let start_ms = self.start.timestamp_millis();
        let first = start_ms - start_ms.rem_euclid(step);
        let end_ms = self.end.timestamp_millis();

        let mut slots = Vec::with_capacity(((end_ms - first) / step + 1) as usize);
        let mut slot = first;
        while slot < end_ms {
            let slot_start = Utc.timestamp_millis_opt(slot).single().ok_or_else(|| {
                SatFlashError::InvalidWindow(format!("time out of range: {} ms", slot))
            })?;
            slots.push(slot_start);
            slot += step;
        }

        Ok(slots)
    }
}

impl Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.end.format("%Y-%m-%d %H:%M:%S%.3f")
        )
    }
}

/// Parse a time given on the command line.
///
/// Accepts RFC 3339 (any offset, converted to UTC) or a naive `YYYY-MM-DD HH:MM[:SS]` /
/// `YYYY-MM-DDTHH:MM[:SS]` which is taken to already be in UTC.
pub fn parse_utc(text: &str) -> SatFlashResult<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];

    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .ok_or_else(|| SatFlashError::InvalidWindow(format!("unable to parse time: {}", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, h, m, s).unwrap()
    }

    #[test]
    fn window_requires_start_before_end() {
        assert!(TimeWindow::new(utc(12, 0, 0), utc(12, 0, 0)).is_err());
        assert!(TimeWindow::new(utc(12, 1, 0), utc(12, 0, 0)).is_err());

        let window = TimeWindow::new(utc(12, 0, 0), utc(12, 1, 0)).unwrap();
        assert!(window.contains(utc(12, 0, 0)));
        assert!(!window.contains(utc(12, 1, 0)));
        assert_eq!(window.duration(), Duration::minutes(1));
    }

    #[test]
    fn slots_cover_the_window_with_rounded_boundaries() {
        let window = TimeWindow::new(utc(12, 0, 5), utc(12, 1, 0)).unwrap();
        let slots = window.slot_starts(Duration::seconds(20)).unwrap();

        assert_eq!(slots, vec![utc(12, 0, 0), utc(12, 0, 20), utc(12, 0, 40)]);

        // The end is exclusive, a window ending just past a boundary picks up one more slot.
        let window = TimeWindow::new(utc(12, 0, 0), utc(12, 0, 41)).unwrap();
        let slots = window.slot_starts(Duration::seconds(20)).unwrap();
        assert_eq!(slots, vec![utc(12, 0, 0), utc(12, 0, 20), utc(12, 0, 40)]);
    }

    #[test]
    fn slots_are_deterministic() {
        let window = TimeWindow::new(utc(12, 3, 7), utc(12, 9, 13)).unwrap();
        let first = window.slot_starts(Duration::seconds(20)).unwrap();
        let second = window.slot_starts(Duration::seconds(20)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 19);

        assert!(window.slot_starts(Duration::zero()).is_err());
    }

    #[test]
    fn parse_utc_normalizes_offsets() {
        assert_eq!(parse_utc("2023-06-01T14:00:00+02:00").unwrap(), utc(12, 0, 0));
        assert_eq!(parse_utc("2023-06-01 12:00").unwrap(), utc(12, 0, 0));
        assert_eq!(parse_utc("2023-06-01T12:00:30").unwrap(), utc(12, 0, 30));
        assert!(parse_utc("yesterday").is_err());
    }
}
