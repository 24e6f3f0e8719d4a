//! Weekly learned-temperature grid: 96 fifteen-minute blocks per day,
//! keyed by `(WeekDay, HH:MM)`.

use std::collections::HashMap;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_derive::{Deserialize, Serialize};

use crate::domain::WeekDay;
use crate::error::PersistenceError;
use crate::temperature::Temperature;

/// Round a timestamp to the nearest multiple of `round_to` seconds
/// (half-away-from-zero), measured from local midnight. Idempotent:
/// `round_time(round_time(t)) == round_time(t)`.
pub fn round_time(dt: DateTime<Utc>, round_to: i64) -> DateTime<Utc> {
    let midnight = dt
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight always exists");
    let seconds_since_midnight = (dt.naive_utc() - midnight).num_seconds();
    let rounded_seconds = (seconds_since_midnight + round_to / 2).div_euclid(round_to) * round_to;
    DateTime::<Utc>::from_naive_utc_and_offset(
        midnight + chrono::Duration::seconds(rounded_seconds),
        Utc,
    )
}

/// `HH:MM` block label, one of the 96 per day.
fn block_key(dt: DateTime<Utc>) -> String {
    let rounded = round_time(dt, 900);
    format!("{:02}:{:02}", rounded.hour(), rounded.minute())
}

/// `None` means "never recorded" — every block starts this way and a
/// freshly seeded grid round-trips through JSON as a table of `null`s.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryGrid(HashMap<WeekDay, HashMap<String, Option<Temperature>>>);

impl HistoryGrid {
    pub fn new() -> Self {
        HistoryGrid(HashMap::new())
    }

    /// Recorded temperature for the 15-minute block containing `at`, if
    /// one has been learned yet.
    pub fn get(&self, day: WeekDay, at: DateTime<Utc>) -> Option<Temperature> {
        self.0.get(&day)?.get(&block_key(at)).copied().flatten()
    }

    /// Record `value` for the 15-minute block containing `at`.
    pub fn set(&mut self, day: WeekDay, at: DateTime<Utc>, value: Temperature) {
        self.0.entry(day).or_default().insert(block_key(at), Some(value));
    }

    pub fn load_or_seed(path: &Path, default_path: &Path) -> Result<HistoryGrid, PersistenceError> {
        if path.is_file() {
            return Self::read(path);
        }
        let seeded = Self::read(default_path)?;
        seeded.save(path)?;
        Ok(seeded)
    }

    fn read(path: &Path) -> Result<HistoryGrid, PersistenceError> {
        let text = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| PersistenceError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let body = serde_json::to_vec(self).map_err(|source| PersistenceError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tmp.write_all(&body).map_err(|source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tmp.persist(path).map_err(|e| PersistenceError::Io {
            path: path.display().to_string(),
            source: e.error,
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn round_time_rounds_to_nearest_quarter_hour() {
        let t = Utc.with_ymd_and_hms(2026, 7, 27, 14, 37, 10).unwrap();
        let rounded = round_time(t, 900);
        assert_eq!(rounded.hour(), 14);
        assert_eq!(rounded.minute(), 30);
    }

    #[test]
    fn round_time_is_idempotent() {
        let t = Utc.with_ymd_and_hms(2026, 7, 27, 14, 37, 10).unwrap();
        let once = round_time(t, 900);
        let twice = round_time(once, 900);
        assert_eq!(once, twice);
    }

    #[test]
    fn get_set_round_trip_on_same_block() {
        let mut grid = HistoryGrid::new();
        let t = Utc.with_ymd_and_hms(2026, 7, 27, 14, 37, 10).unwrap();
        grid.set(WeekDay::Monday, t, Temperature::from_decimal(dec!(21.5)));
        let nearby = Utc.with_ymd_and_hms(2026, 7, 27, 14, 31, 0).unwrap();
        assert_eq!(
            grid.get(WeekDay::Monday, nearby),
            Some(Temperature::from_decimal(dec!(21.5)))
        );
    }
}
