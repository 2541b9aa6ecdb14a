//! Tiltwatch — Logger
//! JSONL event stream: one file per day under the log directory.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Event types ───────────────────────────────────────────────────────────────

/// One page render + parse attempt, success or not.
#[derive(Serialize, Debug)]
pub struct ScrapeStatusEvent {
    pub ts:               String,
    pub event:            &'static str,   // "SCRAPE_STATUS"
    pub ok:               bool,
    pub containers_found: usize,
    pub message:          String,
}

/// A match not seen on any earlier cycle.
#[derive(Serialize, Debug)]
pub struct MatchDetectedEvent {
    pub ts:         String,
    pub event:      &'static str,   // "MATCH_DETECTED"
    pub outcome:    String,         // "Defeat" | "Victory"
    pub champion:   String,
    pub kda:        String,         // "k/d/a" as shown on the page
    pub duration:   String,
    pub match_time: String,         // dedup key (tooltip text)
}

#[derive(Serialize, Debug)]
pub struct DefeatRecordedEvent {
    pub ts:             String,
    pub event:          &'static str,   // "DEFEAT_RECORDED"
    pub total_defeats:  u32,
    pub current_streak: u32,
    pub max_streak:     u32,
}

/// A victory ended the running defeat streak (possibly of length zero).
#[derive(Serialize, Debug)]
pub struct StreakBrokenEvent {
    pub ts:            String,
    pub event:         &'static str,   // "STREAK_BROKEN"
    pub broken_streak: u32,
    pub total_defeats: u32,
}

/// Outcome of one Discord webhook delivery attempt.
#[derive(Serialize, Debug)]
pub struct AlertStatusEvent {
    pub ts:      String,
    pub event:   &'static str,   // "ALERT_STATUS"
    pub kind:    String,         // "bootstrap" | "defeat" | "recovery"
    pub ok:      bool,
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct PollHeartbeatEvent {
    pub ts:                 String,
    pub event:              &'static str,   // "POLL_HEARTBEAT"
    pub cycle:              u64,
    pub new_match:          bool,
    pub poll_interval_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn events_append_as_one_json_line_each() {
        let dir = tempdir().unwrap();
        let logger = EventLogger::new(dir.path());

        logger
            .log(&PollHeartbeatEvent {
                ts: now_iso(),
                event: "POLL_HEARTBEAT",
                cycle: 1,
                new_match: false,
                poll_interval_secs: 300,
            })
            .unwrap();
        logger
            .log(&StreakBrokenEvent {
                ts: now_iso(),
                event: "STREAK_BROKEN",
                broken_streak: 4,
                total_defeats: 10,
            })
            .unwrap();

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let raw = fs::read_to_string(dir.path().join(format!("{date}.jsonl"))).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "POLL_HEARTBEAT");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "STREAK_BROKEN");
        assert_eq!(second["broken_streak"], 4);
    }
}
