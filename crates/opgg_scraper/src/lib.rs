//! Tiltwatch — op.gg match history scraper.
//!
//! op.gg renders the match list client-side, so a plain HTTP GET returns an
//! empty application shell. One headless Chrome session stays alive for the
//! whole process; every poll re-navigates the same tab and hands the rendered
//! HTML to the static parsers below.
//!
//! The page offers no stable ids, only Tailwind utility classes. A match row
//! is the div carrying `box-border flex w-full border-l-[6px]`, and inside it:
//! a `<strong>` with the literal text "Victory" or "Defeat", a
//! `<span data-tooltip-content>` holding the match date, the first
//! `<img alt>` naming the champion, the K/D/A digits as `<strong>`s under
//! `div.flex.items-center.gap-1`, and a bare span with the duration
//! ("28m 41s"). All of it breaks the day op.gg ships a redesign; the parsers
//! degrade to placeholders for everything except the outcome.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use headless_chrome::{Browser, LaunchOptions, Tab};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use tokio::task;
use tracing::{debug, info, warn};

use defeat_stats::MatchOutcome;
use logger::{now_iso, EventLogger, ScrapeStatusEvent};

// ============================================================
// CONSTANTS
// ============================================================

/// Upper bound on waiting for the history list to mount.
const RESULTS_WAIT: Duration = Duration::from_secs(15);

/// Extra settle time after the shell appears; op.gg hydrates the match rows
/// noticeably later than the layout.
const HYDRATION_SETTLE: Duration = Duration::from_secs(3);

/// Element that signals the page shell rendered at all.
const RESULTS_READY_SELECTOR: &str = "div.flex.flex-col";

/// Chrome reaps idle sessions after 30s by default, which is shorter than
/// one poll interval. Effectively disable the reaper.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// op.gg serves a stripped mobile page to unknown agents.
const DESKTOP_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Classes that mark one match row in the history list.
const MATCH_ROW_CLASSES: [&str; 4] = ["box-border", "flex", "w-full", "border-l-[6px]"];

// ============================================================
// TYPES
// ============================================================

/// One finished match as rendered on the profile page. Everything except the
/// outcome is a best-effort string taken verbatim from the page.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRecord {
    pub outcome: MatchOutcome,
    /// Tooltip text of the match date; doubles as the dedup key.
    pub timestamp: String,
    pub champion: String,
    pub kills: String,
    pub deaths: String,
    pub assists: String,
    pub duration: String,
}

impl MatchRecord {
    pub fn is_defeat(&self) -> bool {
        self.outcome.is_defeat()
    }

    /// "kills/deaths/assists" as shown in alerts.
    pub fn kda(&self) -> String {
        format!("{}/{}/{}", self.kills, self.deaths, self.assists)
    }

    pub fn result_label(&self) -> &'static str {
        match self.outcome {
            MatchOutcome::Victory => "Victory",
            MatchOutcome::Defeat => "Defeat",
        }
    }
}

enum RenderOutcome {
    Ready(String),
    TimedOut,
}

// ============================================================
// SCRAPER
// ============================================================

pub struct OpggScraper {
    tab: Arc<Tab>,
    profile_url: String,
    events: EventLogger,
    /// Keeps the Chrome process alive for the lifetime of the scraper.
    _browser: Browser,
}

impl OpggScraper {
    /// Launch the headless session and open the single tab every poll will
    /// reuse. Failure here is fatal to the caller; there is no monitoring
    /// without a browser.
    pub async fn launch(
        profile_url: impl Into<String>,
        log_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let profile_url = profile_url.into();
        let events = EventLogger::new(log_dir);

        let (browser, tab) = task::spawn_blocking(|| -> Result<(Browser, Arc<Tab>)> {
            let ua = format!("--user-agent={DESKTOP_USER_AGENT}");
            let options = LaunchOptions::default_builder()
                .headless(true)
                .sandbox(false)
                .window_size(Some((1920, 1080)))
                .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
                .args(vec![
                    OsStr::new("--disable-gpu"),
                    OsStr::new("--disable-dev-shm-usage"),
                    OsStr::new(ua.as_str()),
                ])
                .build()
                .context("failed to build Chrome launch options")?;
            let browser = Browser::new(options).context("failed to launch headless Chrome")?;
            let tab = browser.new_tab().context("failed to open a browser tab")?;
            Ok((browser, tab))
        })
        .await??;

        info!("🌐 headless Chrome up, watching {}", profile_url);
        Ok(Self {
            tab,
            profile_url,
            events,
            _browser: browser,
        })
    }

    pub fn profile_url(&self) -> &str {
        &self.profile_url
    }

    /// Render the profile and extract the newest match in the history list.
    ///
    /// `Ok(None)` covers both "the page never became ready within the wait
    /// bound" and "no row with a readable outcome"; for the monitor both
    /// mean "nothing to react to this cycle".
    pub async fn fetch_latest_match(&self) -> Result<Option<MatchRecord>> {
        let html = match self.render_profile().await {
            Ok(RenderOutcome::Ready(html)) => html,
            Ok(RenderOutcome::TimedOut) => {
                warn!(
                    "⏱️ match history not rendered within {}s, treating as no new match",
                    RESULTS_WAIT.as_secs()
                );
                self.log_status(false, 0, "render timeout");
                return Ok(None);
            }
            Err(e) => {
                self.log_status(false, 0, &format!("render failed: {e:#}"));
                return Err(e);
            }
        };

        let fallback_ts = Utc::now().format("%d/%m/%Y, %H:%M").to_string();
        let (record, rows) = parse_latest_match(&html, &fallback_ts);
        match &record {
            Some(m) => {
                debug!(
                    "newest row: {} {} {} ({})",
                    m.result_label(),
                    m.champion,
                    m.kda(),
                    m.duration
                );
                self.log_status(true, rows, &format!("newest: {} {}", m.result_label(), m.champion));
            }
            None if rows == 0 => {
                warn!("🔍 page rendered but no match rows found");
                self.log_status(true, 0, "no match rows in rendered page");
            }
            None => {
                warn!("🔍 newest row has no readable outcome, skipping");
                self.log_status(true, rows, "newest row without outcome");
            }
        }
        Ok(record)
    }

    /// Render the profile and collect the defeats among the newest `limit`
    /// rows, page order (newest first). Rows without a readable outcome are
    /// skipped. Render trouble degrades to an empty list; this feeds the
    /// startup summary and must not take the monitor down.
    pub async fn fetch_recent_defeats(&self, limit: usize) -> Result<Vec<MatchRecord>> {
        let html = match self.render_profile().await {
            Ok(RenderOutcome::Ready(html)) => html,
            Ok(RenderOutcome::TimedOut) => {
                warn!(
                    "⏱️ match history not rendered within {}s, skipping history scan",
                    RESULTS_WAIT.as_secs()
                );
                self.log_status(false, 0, "render timeout during history scan");
                return Ok(Vec::new());
            }
            Err(e) => {
                self.log_status(false, 0, &format!("history scan failed: {e:#}"));
                return Err(e);
            }
        };

        let (defeats, rows) = parse_recent_defeats(&html, limit);
        info!(
            "📜 history scan: {} rows rendered, {} defeats in the newest {}",
            rows,
            defeats.len(),
            limit.min(rows)
        );
        self.log_status(true, rows, &format!("history scan kept {} defeats", defeats.len()));
        Ok(defeats)
    }

    /// Navigate the shared tab and pull the rendered DOM. headless_chrome is
    /// a blocking client, so the whole exchange runs on the blocking pool.
    async fn render_profile(&self) -> Result<RenderOutcome> {
        let tab = self.tab.clone();
        let url = self.profile_url.clone();
        task::spawn_blocking(move || -> Result<RenderOutcome> {
            tab.navigate_to(&url).context("navigation failed")?;
            if tab
                .wait_for_element_with_custom_timeout(RESULTS_READY_SELECTOR, RESULTS_WAIT)
                .is_err()
            {
                return Ok(RenderOutcome::TimedOut);
            }
            std::thread::sleep(HYDRATION_SETTLE);
            let html = tab.get_content().context("failed to read rendered HTML")?;
            Ok(RenderOutcome::Ready(html))
        })
        .await?
    }

    fn log_status(&self, ok: bool, containers: usize, message: &str) {
        let _ = self.events.log(&ScrapeStatusEvent {
            ts: now_iso(),
            event: "SCRAPE_STATUS",
            ok,
            containers_found: containers,
            message: message.to_string(),
        });
    }
}

// ============================================================
// PARSING
// ============================================================

fn is_match_row(el: &ElementRef<'_>) -> bool {
    MATCH_ROW_CLASSES
        .iter()
        .all(|class| el.value().classes().any(|c| c == *class))
}

/// Newest match on the page, plus how many match rows rendered at all.
/// `fallback_timestamp` stands in when the date tooltip is missing.
fn parse_latest_match(html: &str, fallback_timestamp: &str) -> (Option<MatchRecord>, usize) {
    let doc = Html::parse_document(html);
    let div_sel = Selector::parse("div").unwrap();
    let rows: Vec<ElementRef<'_>> = doc.select(&div_sel).filter(|el| is_match_row(el)).collect();
    let count = rows.len();
    let record = rows
        .into_iter()
        .next()
        .and_then(|row| extract_record(row, fallback_timestamp));
    (record, count)
}

/// Defeats among the newest `limit` rows, page order, plus the total row
/// count. Rows missing their date get a positional label instead.
fn parse_recent_defeats(html: &str, limit: usize) -> (Vec<MatchRecord>, usize) {
    let doc = Html::parse_document(html);
    let div_sel = Selector::parse("div").unwrap();
    let rows: Vec<ElementRef<'_>> = doc.select(&div_sel).filter(|el| is_match_row(el)).collect();
    let count = rows.len();
    let defeats = rows
        .into_iter()
        .take(limit)
        .enumerate()
        .filter_map(|(i, row)| extract_record(row, &format!("match #{}", i + 1)))
        .filter(|record| record.is_defeat())
        .collect();
    (defeats, count)
}

/// The outcome is mandatory; a row where it cannot be read is not a match.
/// Every other field degrades to a placeholder.
fn extract_record(row: ElementRef<'_>, fallback_timestamp: &str) -> Option<MatchRecord> {
    let outcome = extract_outcome(row)?;
    let timestamp =
        extract_timestamp(row).unwrap_or_else(|| fallback_timestamp.to_string());
    let champion = extract_champion(row).unwrap_or_else(|| "Unknown".to_string());
    let (kills, deaths, assists) =
        extract_kda(row).unwrap_or_else(|| ("?".into(), "?".into(), "?".into()));
    let duration = extract_duration(row).unwrap_or_else(|| "?".to_string());
    Some(MatchRecord {
        outcome,
        timestamp,
        champion,
        kills,
        deaths,
        assists,
        duration,
    })
}

fn extract_outcome(row: ElementRef<'_>) -> Option<MatchOutcome> {
    let strong_sel = Selector::parse("strong").unwrap();
    for strong in row.select(&strong_sel) {
        let text = strong.text().collect::<String>();
        if text.contains("Defeat") {
            return Some(MatchOutcome::Defeat);
        }
        if text.contains("Victory") {
            return Some(MatchOutcome::Victory);
        }
    }
    None
}

/// First tooltip that looks like a date. The shape check keeps tooltips such
/// as queue names ("Ranked Solo/Duo") from being mistaken for timestamps.
fn extract_timestamp(row: ElementRef<'_>) -> Option<String> {
    let span_sel = Selector::parse("span[data-tooltip-content]").unwrap();
    let date_shape = Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").unwrap();
    row.select(&span_sel)
        .filter_map(|s| s.value().attr("data-tooltip-content"))
        .find(|v| date_shape.is_match(v))
        .map(str::to_string)
}

fn extract_champion(row: ElementRef<'_>) -> Option<String> {
    let img_sel = Selector::parse("img[alt]").unwrap();
    row.select(&img_sel)
        .filter_map(|img| img.value().attr("alt"))
        .find(|alt| !alt.trim().is_empty())
        .map(str::to_string)
}

fn extract_kda(row: ElementRef<'_>) -> Option<(String, String, String)> {
    let kda_sel = Selector::parse("div.flex.items-center.gap-1 strong").unwrap();
    let values: Vec<String> = row
        .select(&kda_sel)
        .map(|s| s.text().collect::<String>().trim().to_string())
        .collect();
    if values.len() >= 3 {
        Some((values[0].clone(), values[1].clone(), values[2].clone()))
    } else {
        None
    }
}

fn extract_duration(row: ElementRef<'_>) -> Option<String> {
    let span_sel = Selector::parse("span").unwrap();
    let shape = Regex::new(r"^\d+m\s+\d+s$").unwrap();
    row.select(&span_sel)
        .map(|s| s.text().collect::<String>().trim().to_string())
        .find(|t| shape.is_match(t))
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        outcome: Option<&str>,
        tooltip: Option<&str>,
        champion: Option<&str>,
        kda: Option<(&str, &str, &str)>,
        duration: Option<&str>,
    ) -> String {
        let mut inner = String::new();
        if let Some(label) = outcome {
            inner.push_str(&format!("<strong>{label}</strong>"));
        }
        if let Some(tip) = tooltip {
            inner.push_str(&format!(
                r#"<span data-tooltip-content="{tip}">a while ago</span>"#
            ));
        }
        if let Some(name) = champion {
            inner.push_str(&format!(r#"<img src="c.png" alt="{name}">"#));
        }
        if let Some((k, d, a)) = kda {
            inner.push_str(&format!(
                r#"<div class="flex items-center gap-1"><strong>{k}</strong><span>/</span><strong>{d}</strong><span>/</span><strong>{a}</strong></div>"#
            ));
        }
        if let Some(dur) = duration {
            inner.push_str(&format!("<span>{dur}</span>"));
        }
        format!(r#"<div class="box-border flex w-full gap-2 border-l-[6px]">{inner}</div>"#)
    }

    fn page(rows: &[String]) -> String {
        format!(
            r#"<html><body><div class="flex flex-col">{}</div></body></html>"#,
            rows.join("\n")
        )
    }

    fn full_row(outcome: &str, champion: &str) -> String {
        row(
            Some(outcome),
            Some("15/01/2025, 21:30"),
            Some(champion),
            Some(("5", "9", "3")),
            Some("28m 41s"),
        )
    }

    #[test]
    fn reads_a_fully_rendered_defeat_row() {
        let html = page(&[full_row("Defeat", "Jinx")]);
        let (record, rows) = parse_latest_match(&html, "fallback");
        let record = record.unwrap();
        assert_eq!(rows, 1);
        assert!(record.is_defeat());
        assert_eq!(record.timestamp, "15/01/2025, 21:30");
        assert_eq!(record.champion, "Jinx");
        assert_eq!(record.kda(), "5/9/3");
        assert_eq!(record.duration, "28m 41s");
    }

    #[test]
    fn reads_a_victory_row() {
        let html = page(&[full_row("Victory", "Ahri")]);
        let (record, _) = parse_latest_match(&html, "fallback");
        let record = record.unwrap();
        assert!(!record.is_defeat());
        assert_eq!(record.result_label(), "Victory");
    }

    #[test]
    fn row_without_an_outcome_is_skipped_but_counted() {
        let html = page(&[row(
            None,
            Some("15/01/2025, 21:30"),
            Some("Ahri"),
            None,
            None,
        )]);
        let (record, rows) = parse_latest_match(&html, "fallback");
        assert!(record.is_none());
        assert_eq!(rows, 1);
    }

    #[test]
    fn missing_details_degrade_to_placeholders() {
        let html = page(&[row(Some("Defeat"), None, None, None, None)]);
        let (record, _) = parse_latest_match(&html, "01/02/2025, 10:00");
        let record = record.unwrap();
        assert_eq!(record.timestamp, "01/02/2025, 10:00");
        assert_eq!(record.champion, "Unknown");
        assert_eq!(record.kda(), "?/?/?");
        assert_eq!(record.duration, "?");
    }

    #[test]
    fn blank_champion_alt_is_ignored() {
        let html = page(&[String::from(
            r#"<div class="box-border flex w-full border-l-[6px]"><strong>Defeat</strong><img src="l.png" alt=""><img src="c.png" alt="Kai'Sa"></div>"#,
        )]);
        let (record, _) = parse_latest_match(&html, "fallback");
        assert_eq!(record.unwrap().champion, "Kai'Sa");
    }

    #[test]
    fn tooltip_without_a_date_shape_is_ignored() {
        let html = page(&[row(
            Some("Defeat"),
            Some("Ranked Solo/Duo"),
            Some("Jinx"),
            None,
            None,
        )]);
        let (record, _) = parse_latest_match(&html, "01/02/2025, 10:00");
        assert_eq!(record.unwrap().timestamp, "01/02/2025, 10:00");
    }

    #[test]
    fn partial_kda_degrades_to_placeholders() {
        let html = page(&[String::from(
            r#"<div class="box-border flex w-full border-l-[6px]"><strong>Defeat</strong><div class="flex items-center gap-1"><strong>5</strong><strong>9</strong></div></div>"#,
        )]);
        let (record, _) = parse_latest_match(&html, "fallback");
        assert_eq!(record.unwrap().kda(), "?/?/?");
    }

    #[test]
    fn history_scan_keeps_defeats_in_page_order() {
        let html = page(&[
            full_row("Defeat", "Jinx"),
            full_row("Victory", "Ahri"),
            full_row("Defeat", "Yasuo"),
            row(None, None, Some("Garen"), None, None),
        ]);
        let (defeats, rows) = parse_recent_defeats(&html, 20);
        assert_eq!(rows, 4);
        let champions: Vec<&str> = defeats.iter().map(|m| m.champion.as_str()).collect();
        assert_eq!(champions, vec!["Jinx", "Yasuo"]);
    }

    #[test]
    fn history_scan_stops_at_the_row_limit() {
        let html = page(&[
            full_row("Victory", "Ahri"),
            full_row("Defeat", "Jinx"),
            full_row("Defeat", "Yasuo"),
        ]);
        let (defeats, rows) = parse_recent_defeats(&html, 2);
        assert_eq!(rows, 3);
        assert_eq!(defeats.len(), 1);
        assert_eq!(defeats[0].champion, "Jinx");
    }

    #[test]
    fn history_rows_fall_back_to_positional_labels() {
        let html = page(&[
            full_row("Victory", "Ahri"),
            full_row("Victory", "Lux"),
            row(Some("Defeat"), None, Some("Jinx"), None, None),
        ]);
        let (defeats, _) = parse_recent_defeats(&html, 20);
        assert_eq!(defeats.len(), 1);
        assert_eq!(defeats[0].timestamp, "match #3");
    }

    #[test]
    fn empty_page_yields_nothing() {
        let html = "<html><body><div class=\"flex flex-col\"></div></body></html>";
        let (record, rows) = parse_latest_match(html, "fallback");
        assert!(record.is_none());
        assert_eq!(rows, 0);
        let (defeats, rows) = parse_recent_defeats(html, 20);
        assert!(defeats.is_empty());
        assert_eq!(rows, 0);
    }
}
