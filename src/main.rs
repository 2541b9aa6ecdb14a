/// Tiltwatch — LoL Defeat Monitor
///
/// What it does:
///   1. Polls an op.gg summoner profile on a fixed interval (headless Chrome)
///   2. Detects newly completed matches and classifies them Victory/Defeat
///   3. Tracks the consecutive-loss streak, persists counters to JSON
///   4. Posts Discord alerts: every new defeat, plus streak-broken wins
///
/// What it does NOT do: no Riot API, no game data beyond the profile page.
///
/// Run:
///   cargo run --bin defeat-monitor

use std::env;
use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use defeat_stats::{MatchOutcome, StatsState, StatsStore};
use discord_notifier::{
    bootstrap_embed, defeat_embed, recovery_embed, DiscordEmbed, DiscordNotifier,
};
use logger::{
    now_iso, AlertStatusEvent, DefeatRecordedEvent, EventLogger, MatchDetectedEvent,
    PollHeartbeatEvent, StreakBrokenEvent,
};
use opgg_scraper::OpggScraper;

/// How many history rows the startup summary scans for defeats.
const RECENT_MATCH_LOOKBACK: usize = 20;

// ============================================================
// CONFIG
// ============================================================

struct Config {
    webhook_url: String,
    summoner_url: String,
    check_interval_secs: u64,
    stats_file: PathBuf,
    log_dir: PathBuf,
}

impl Config {
    fn from_env() -> Result<Self> {
        let webhook_url =
            env::var("DISCORD_WEBHOOK_URL").context("DISCORD_WEBHOOK_URL is not set")?;
        let summoner_url = env::var("SUMMONER_URL").context("SUMMONER_URL is not set")?;
        let check_interval_secs = env::var("CHECK_INTERVAL")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(300);
        let stats_file = env::var("STATS_FILE")
            .unwrap_or_else(|_| "defeat_stats.json".to_string())
            .into();
        let log_dir = env::var("LOG_DIR")
            .unwrap_or_else(|_| "logs".to_string())
            .into();
        Ok(Self {
            webhook_url,
            summoner_url,
            check_interval_secs,
            stats_file,
            log_dir,
        })
    }
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("=== Tiltwatch — LoL Defeat Monitor ===");

    // Single instance lock
    let lock_file_path = env::temp_dir().join("tiltwatch_defeat_monitor.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("Failed to create lock file at {:?}: {}", lock_file_path, e);
            return Ok(());
        }
    };

    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => {
            info!("Acquired single-instance lock.");
            guard
        }
        Err(_) => {
            warn!("Another defeat-monitor is already running! Exiting.");
            return Ok(());
        }
    };

    let config = Config::from_env()?;
    info!("Profile: {}", config.summoner_url);
    info!("Poll interval: {}s", config.check_interval_secs);
    info!("Stats file: {}", config.stats_file.display());
    info!("Logs: {}", config.log_dir.display());

    let store = StatsStore::new(&config.stats_file);
    let mut stats = store.load();
    info!(
        "💾 saved counters: {} defeats total, streak {}, record {}",
        stats.total_defeats, stats.current_streak, stats.max_streak
    );

    let events = EventLogger::new(&config.log_dir);
    let notifier = DiscordNotifier::new(&config.webhook_url)?;
    let scraper = OpggScraper::launch(config.summoner_url.clone(), &config.log_dir).await?;

    // ==== BOOTSTRAP ====
    // One history scan so the channel knows where things stand, then seed the
    // dedup key so matches finished before boot are not re-reported.
    let recent = match scraper.fetch_recent_defeats(RECENT_MATCH_LOOKBACK).await {
        Ok(list) => list,
        Err(e) => {
            warn!("history scan failed, startup summary will be thin: {e:#}");
            Vec::new()
        }
    };
    deliver(
        &notifier,
        &events,
        "bootstrap",
        bootstrap_embed(&recent, &stats, RECENT_MATCH_LOOKBACK),
    )
    .await;

    let mut last_match_time: Option<String> = match scraper.fetch_latest_match().await {
        Ok(Some(m)) => {
            info!(
                "🎯 newest match at boot: {} — {} ({})",
                m.result_label(),
                m.champion,
                m.timestamp
            );
            Some(m.timestamp)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("could not read the newest match at boot: {e:#}");
            None
        }
    };

    // ==== MONITORING LOOP ====
    info!(
        "🚀 monitoring every {}s, Ctrl-C to stop",
        config.check_interval_secs
    );
    let interval = Duration::from_secs(config.check_interval_secs);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut cycle: u64 = 0;

    loop {
        cycle += 1;
        let new_match = match run_cycle(
            &scraper,
            &store,
            &notifier,
            &events,
            &mut stats,
            &mut last_match_time,
        )
        .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!("poll cycle failed: {e:#}");
                false
            }
        };

        let _ = events.log(&PollHeartbeatEvent {
            ts: now_iso(),
            event: "POLL_HEARTBEAT",
            cycle,
            new_match,
            poll_interval_secs: config.check_interval_secs,
        });

        tokio::select! {
            _ = &mut shutdown => {
                info!("👋 shutdown requested");
                break;
            }
            _ = sleep(interval) => {}
        }
    }

    info!("browser session released");
    Ok(())
}

// ============================================================
// POLL CYCLE
// ============================================================

/// One poll: fetch the newest match, decide whether it is new, and react.
/// Returns whether a new match was handled this cycle.
async fn run_cycle(
    scraper: &OpggScraper,
    store: &StatsStore,
    notifier: &DiscordNotifier,
    events: &EventLogger,
    stats: &mut StatsState,
    last_match_time: &mut Option<String>,
) -> Result<bool> {
    let Some(record) = scraper.fetch_latest_match().await? else {
        return Ok(false);
    };

    if !is_new_match(last_match_time.as_deref(), &record.timestamp) {
        debug!("newest match unchanged ({})", record.timestamp);
        return Ok(false);
    }

    info!(
        "🆕 new match: {} — {} {} ({})",
        record.result_label(),
        record.champion,
        record.kda(),
        record.duration
    );
    let _ = events.log(&MatchDetectedEvent {
        ts: now_iso(),
        event: "MATCH_DETECTED",
        outcome: record.result_label().to_string(),
        champion: record.champion.clone(),
        kda: record.kda(),
        duration: record.duration.clone(),
        match_time: record.timestamp.clone(),
    });

    match record.outcome {
        MatchOutcome::Defeat => {
            *stats = stats.apply(MatchOutcome::Defeat);
            info!(
                "💀 defeat #{} — streak {} (record {})",
                stats.total_defeats, stats.current_streak, stats.max_streak
            );
            let _ = events.log(&DefeatRecordedEvent {
                ts: now_iso(),
                event: "DEFEAT_RECORDED",
                total_defeats: stats.total_defeats,
                current_streak: stats.current_streak,
                max_streak: stats.max_streak,
            });
            deliver(notifier, events, "defeat", defeat_embed(&record, stats)).await;
        }
        MatchOutcome::Victory => {
            // The streak-broken post reads the streak before the reset.
            let before = stats.clone();
            *stats = stats.apply(MatchOutcome::Victory);
            if before.current_streak > 0 {
                info!("🎉 win after {} straight losses", before.current_streak);
                let _ = events.log(&StreakBrokenEvent {
                    ts: now_iso(),
                    event: "STREAK_BROKEN",
                    broken_streak: before.current_streak,
                    total_defeats: before.total_defeats,
                });
            }
            if let Some(embed) = recovery_embed(&record, &before) {
                deliver(notifier, events, "recovery", embed).await;
            }
        }
    }

    *last_match_time = Some(record.timestamp.clone());
    stats.last_check = Some(now_iso());
    if let Err(e) = store.save(stats) {
        warn!("could not persist counters: {e:#}");
    }
    Ok(true)
}

/// A match is new when its dedup key differs from the last one handled.
fn is_new_match(last_seen: Option<&str>, current: &str) -> bool {
    last_seen != Some(current)
}

/// Best-effort webhook delivery. A down webhook must not stop the monitor,
/// so failures are logged and swallowed here.
async fn deliver(notifier: &DiscordNotifier, events: &EventLogger, kind: &str, embed: DiscordEmbed) {
    match notifier.send(embed).await {
        Ok(()) => {
            let _ = events.log(&AlertStatusEvent {
                ts: now_iso(),
                event: "ALERT_STATUS",
                kind: kind.to_string(),
                ok: true,
                message: String::new(),
            });
        }
        Err(e) => {
            warn!("📭 {kind} alert not delivered: {e:#}");
            let _ = events.log(&AlertStatusEvent {
                ts: now_iso(),
                event: "ALERT_STATUS",
                kind: kind.to_string(),
                ok: false,
                message: format!("{e:#}"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_after_boot_counts_as_new() {
        assert!(is_new_match(None, "15/01/2025, 21:30"));
    }

    #[test]
    fn same_timestamp_is_not_new() {
        assert!(!is_new_match(Some("15/01/2025, 21:30"), "15/01/2025, 21:30"));
    }

    #[test]
    fn changed_timestamp_is_new() {
        assert!(is_new_match(Some("15/01/2025, 21:30"), "15/01/2025, 22:05"));
    }
}
