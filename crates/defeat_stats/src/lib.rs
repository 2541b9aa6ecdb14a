//! Tiltwatch — Defeat Stats
//!
//! Win/loss accounting for one summoner: the running defeat counters, the
//! pure streak transition, and the JSON counter file the monitor keeps
//! between runs.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Result of one finished match, as classified from the profile page.
///
/// Only these two variants exist. A match whose outcome cannot be read off
/// the page never becomes a record at all, so every record reaching
/// [`StatsState::apply`] is a valid input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Victory,
    Defeat,
}

impl MatchOutcome {
    pub fn is_defeat(self) -> bool {
        matches!(self, MatchOutcome::Defeat)
    }
}

/// Running counters, persisted as `defeat_stats.json`.
///
/// Field names are the wire format of the counter file. Invariant after any
/// number of [`apply`](StatsState::apply) steps: `max_streak >= current_streak`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsState {
    /// Lifetime defeats seen by the monitor.
    #[serde(default)]
    pub total_defeats: u32,
    /// Consecutive defeats with no intervening victory.
    #[serde(default)]
    pub current_streak: u32,
    /// Worst streak on record.
    #[serde(default)]
    pub max_streak: u32,
    /// RFC 3339 stamp of the last state-changing cycle, null before the first.
    #[serde(default)]
    pub last_check: Option<String>,
}

impl StatsState {
    /// Next state after one match outcome.
    ///
    /// Pure: defeat bumps `total_defeats` and `current_streak` and lets the
    /// record catch up; victory only resets `current_streak`. `last_check`
    /// passes through untouched; the monitor stamps it when it persists.
    pub fn apply(&self, outcome: MatchOutcome) -> StatsState {
        let mut next = self.clone();
        match outcome {
            MatchOutcome::Defeat => {
                next.total_defeats += 1;
                next.current_streak += 1;
                next.max_streak = next.max_streak.max(next.current_streak);
            }
            MatchOutcome::Victory => {
                next.current_streak = 0;
            }
        }
        next
    }
}

/// File-backed store for [`StatsState`]: one writer, whole-file overwrite,
/// no schema versioning. An unreadable file counts as a fresh start.
pub struct StatsStore {
    path: PathBuf,
}

impl StatsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved counters, falling back to zeroed defaults when the
    /// file is missing or malformed.
    pub fn load(&self) -> StatsState {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return StatsState::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    "stats file {} is malformed ({}), starting from zero",
                    self.path.display(),
                    e
                );
                StatsState::default()
            }
        }
    }

    /// Overwrite the counter file. On failure the caller keeps the
    /// in-memory state and the next successful save catches up.
    pub fn save(&self, state: &StatsState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, json)
            .with_context(|| format!("failed to write stats file {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn state(total: u32, current: u32, max: u32) -> StatsState {
        StatsState {
            total_defeats: total,
            current_streak: current,
            max_streak: max,
            last_check: None,
        }
    }

    #[test]
    fn defeat_bumps_all_counters() {
        let next = state(4, 2, 5).apply(MatchOutcome::Defeat);
        assert_eq!(next, state(5, 3, 5));
    }

    #[test]
    fn defeat_extends_record_when_streak_passes_it() {
        let next = state(7, 5, 5).apply(MatchOutcome::Defeat);
        assert_eq!(next, state(8, 6, 6));
    }

    #[test]
    fn victory_resets_streak_only() {
        let next = state(5, 3, 5).apply(MatchOutcome::Victory);
        assert_eq!(next, state(5, 0, 5));
    }

    #[test]
    fn victory_on_clean_slate_changes_nothing() {
        let next = state(1, 0, 1).apply(MatchOutcome::Victory);
        assert_eq!(next, state(1, 0, 1));
    }

    #[test]
    fn streak_counts_losses_since_last_win() {
        let mut s = StatsState::default();
        for _ in 0..4 {
            s = s.apply(MatchOutcome::Defeat);
        }
        assert_eq!((s.total_defeats, s.current_streak, s.max_streak), (4, 4, 4));

        s = s.apply(MatchOutcome::Victory);
        s = s.apply(MatchOutcome::Defeat);
        s = s.apply(MatchOutcome::Defeat);
        assert_eq!((s.total_defeats, s.current_streak, s.max_streak), (6, 2, 4));
    }

    #[test]
    fn max_streak_never_drops_below_current() {
        use MatchOutcome::{Defeat, Victory};
        let runs = [
            Defeat, Defeat, Victory, Defeat, Defeat, Defeat, Victory, Defeat, Victory, Defeat,
        ];
        let mut s = StatsState::default();
        for outcome in runs {
            s = s.apply(outcome);
            assert!(s.max_streak >= s.current_streak);
        }
        assert_eq!(s.max_streak, 3);
    }

    #[test]
    fn last_check_passes_through_apply() {
        let mut s = state(1, 1, 1);
        s.last_check = Some("2025-06-01T12:00:00+00:00".to_string());
        let next = s.apply(MatchOutcome::Defeat);
        assert_eq!(next.last_check, s.last_check);
    }

    #[test]
    fn load_missing_file_is_zeroed() {
        let dir = tempdir().unwrap();
        let store = StatsStore::new(dir.path().join("defeat_stats.json"));
        assert_eq!(store.load(), StatsState::default());
    }

    #[test]
    fn load_malformed_file_is_zeroed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("defeat_stats.json");
        fs::write(&path, "{ definitely not json").unwrap();
        assert_eq!(StatsStore::new(&path).load(), StatsState::default());
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("defeat_stats.json");
        fs::write(&path, r#"{ "total_defeats": 9 }"#).unwrap();
        let loaded = StatsStore::new(&path).load();
        assert_eq!(loaded, state(9, 0, 0));
    }

    #[test]
    fn state_round_trips_through_the_file() {
        let dir = tempdir().unwrap();
        let store = StatsStore::new(dir.path().join("defeat_stats.json"));
        let s = StatsState {
            total_defeats: 12,
            current_streak: 2,
            max_streak: 7,
            last_check: Some("2025-05-30T18:45:00+00:00".to_string()),
        };
        store.save(&s).unwrap();
        assert_eq!(store.load(), s);

        // save(load()) leaves the stored state identical
        store.save(&store.load()).unwrap();
        assert_eq!(store.load(), s);
    }

    #[test]
    fn file_uses_the_wire_field_names() {
        let json = serde_json::to_value(state(3, 1, 2)).unwrap();
        let obj = json.as_object().unwrap();
        for key in ["total_defeats", "current_streak", "max_streak", "last_check"] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        assert!(obj["last_check"].is_null());
    }
}
