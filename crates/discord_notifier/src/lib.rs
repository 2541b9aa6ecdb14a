//! Tiltwatch — Discord webhook alerts.
//!
//! Three embed shapes leave this crate: the startup summary posted once per
//! boot, the defeat alert posted for every new loss, and the streak-broken
//! post when a win ends a streak worth warning about. The embeds are built
//! by pure functions so their layout is testable without a webhook; only
//! [`DiscordNotifier::send`] touches the network.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::info;

use defeat_stats::StatsState;
use opgg_scraper::MatchRecord;

// ============================================================
// CONSTANTS
// ============================================================

/// Streak length at which defeat alerts start carrying the tilt warning and
/// a later win earns a streak-broken post.
pub const STREAK_WARNING_THRESHOLD: u32 = 3;

/// How many recent defeats the startup summary lists in full.
const SUMMARY_TOP_DEFEATS: usize = 5;

const WEBHOOK_USERNAME: &str = "LoL Defeat Tracker";

const COLOR_ORANGE: u32 = 0xFFA500;
const COLOR_RED: u32 = 0xFF0000;
const COLOR_GREEN: u32 = 0x00FF00;

/// One of these opens every defeat alert.
const DEFEAT_MESSAGES: [&str; 16] = [
    "Oof. That one looked painful. 💀",
    "Another one for the enemy team's highlight reel. 🎬",
    "The minimap is on the bottom right, in case you were wondering. 🗺️",
    "Gravity wins again. ⬇️",
    "That Nexus never stood a chance. Yours, that is. 🏚️",
    "Have you considered... warding? 👁️",
    "The jungle diff was not in your favor. 🌳",
    "0/5 by ten minutes is a strategy, technically. ⏱️",
    "Maybe the real defeat was the friends we fed along the way. 🤝",
    "GG go next. And next. And next. 🔁",
    "Your KDA called, it wants a restraining order. 📞",
    "Inting or innovating? The jury is out. ⚖️",
    "The fountain laser saw more action than your team. ⛲",
    "Coinflip lost. Again. 🪙",
    "At least the loading screen went well. 🖼️",
    "FF at 15 was on the table. You chose violence. Then lost. 🪑",
];

// ============================================================
// PAYLOAD TYPES
// ============================================================

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscordEmbed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    /// ISO-8601; Discord renders it localized under the embed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl DiscordEmbed {
    fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            description: None,
            color,
            fields: Vec::new(),
            footer: None,
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(EmbedFooter { text: text.into() });
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub username: &'static str,
    pub embeds: Vec<DiscordEmbed>,
}

impl WebhookPayload {
    pub fn single(embed: DiscordEmbed) -> Self {
        Self {
            username: WEBHOOK_USERNAME,
            embeds: vec![embed],
        }
    }
}

// ============================================================
// EMBED RENDERERS
// ============================================================

/// Startup summary. `recent` is newest first and already filtered to
/// defeats; `lookback` is how many games were scanned to produce it.
pub fn bootstrap_embed(recent: &[MatchRecord], stats: &StatsState, lookback: usize) -> DiscordEmbed {
    let mut embed = DiscordEmbed::new("📊 Defeat Tracker Online", COLOR_ORANGE)
        .describe("Monitoring started. Here is where things stand.");

    if recent.is_empty() {
        embed = embed.field(
            "Recent defeats",
            format!("No defeats in the last {lookback} games. Clean slate. 🧼"),
            false,
        );
    } else {
        let mut lines: Vec<String> = recent
            .iter()
            .take(SUMMARY_TOP_DEFEATS)
            .enumerate()
            .map(|(i, m)| {
                format!(
                    "**{}.** {} — {} · {} · {}",
                    i + 1,
                    m.champion,
                    m.kda(),
                    m.duration,
                    m.timestamp
                )
            })
            .collect();
        if recent.len() > SUMMARY_TOP_DEFEATS {
            lines.push(format!("...and {} more", recent.len() - SUMMARY_TOP_DEFEATS));
        }
        embed = embed
            .field("Recent defeats", lines.join("\n"), false)
            .field(
                "Damage report",
                format!("{} defeats in the last {} games", recent.len(), lookback),
                false,
            );
    }

    embed
        .field(
            "Saved totals",
            format!(
                "Total defeats: {} · Current streak: {} · Longest streak: {}",
                stats.total_defeats, stats.current_streak, stats.max_streak
            ),
            false,
        )
        .field("Monitoring", "Every new defeat lands here. 🔔", false)
        .footer(format!("Started: {}", Utc::now().format("%d/%m/%Y, %H:%M")))
}

/// Defeat alert. `stats` must already include this defeat, so the streak and
/// totals shown match the state on disk.
pub fn defeat_embed(record: &MatchRecord, stats: &StatsState) -> DiscordEmbed {
    let jeer = DEFEAT_MESSAGES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(DEFEAT_MESSAGES[0]);

    let mut embed = DiscordEmbed::new("💀 DEFEAT DETECTED", COLOR_RED)
        .describe(jeer)
        .field(
            "Match",
            format!("**{}** — {} · {}", record.champion, record.kda(), record.duration),
            false,
        )
        .field("Loss streak", stats.current_streak.to_string(), true)
        .field("Total defeats", stats.total_defeats.to_string(), true);

    if stats.current_streak >= STREAK_WARNING_THRESHOLD {
        embed = embed.field(
            "⚠️ TILT ALERT",
            format!(
                "{} losses in a row. Step away from the keyboard. 🧯",
                stats.current_streak
            ),
            false,
        );
    }
    if stats.max_streak > 0 {
        embed = embed.field("Longest streak", stats.max_streak.to_string(), true);
    }

    embed.footer(format!("Timestamp: {}", record.timestamp))
}

/// Streak-broken post for a win. `stats` must be the state from before the
/// reset; wins after short streaks return `None` and nothing is posted.
pub fn recovery_embed(record: &MatchRecord, stats: &StatsState) -> Option<DiscordEmbed> {
    if stats.current_streak < STREAK_WARNING_THRESHOLD {
        return None;
    }
    Some(
        DiscordEmbed::new("🎉 STREAK BROKEN", COLOR_GREEN)
            .describe(format!(
                "**{}** just ended a {}-loss streak: {} ({}).",
                record.champion,
                stats.current_streak,
                record.kda(),
                record.duration
            ))
            .field(
                "Broken streak",
                format!("{} defeats", stats.current_streak),
                true,
            )
            .field("Total defeats", stats.total_defeats.to_string(), true)
            .footer(format!("Timestamp: {}", record.timestamp)),
    )
}

// ============================================================
// SENDER
// ============================================================

pub struct DiscordNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("tiltwatch/0.1")
            .build()
            .context("failed to build the webhook HTTP client")?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }

    /// POST one embed. A non-2xx status comes back as an error carrying the
    /// body Discord returned, which names the actual problem (rate limit,
    /// malformed payload).
    pub async fn send(&self, embed: DiscordEmbed) -> Result<()> {
        let payload = WebhookPayload::single(embed);
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("webhook request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("webhook returned {status}: {body}");
        }
        info!("📨 webhook delivered");
        Ok(())
    }
}

// ============================================================
// TESTS
// ============================================================
