//! Match feed access, selection and message formatting for the mention bot.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use serde::Deserialize;
use tracing::{info, warn};

pub const STATUS_FUTURE: &str = "future";
pub const STATUS_COMPLETED: &str = "completed";

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Match {
    pub status: String,
    pub datetime: DateTime<Utc>,
    pub home_team: Team,
    pub away_team: Team,
    #[serde(default)]
    pub home_team_events: Vec<TeamEvent>,
    #[serde(default)]
    pub away_team_events: Vec<TeamEvent>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Team {
    pub country: String,
    #[serde(default)]
    pub goals: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct TeamEvent {
    pub type_of_event: String,
    pub player: String,
}

impl Match {
    fn is_future(&self) -> bool {
        self.status == STATUS_FUTURE
    }

    fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

/// Source of the match list. Implementations degrade to an empty list on failure.
#[async_trait]
pub trait MatchFeed: Send + Sync {
    async fn matches(&self) -> Vec<Match>;
}

pub struct HttpMatchFeed {
    http: reqwest::Client,
    url: String,
}

impl HttpMatchFeed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, url: url.into() })
    }

    async fn fetch(&self) -> Result<Vec<Match>, reqwest::Error> {
        self.http.get(&self.url).send().await?.error_for_status()?.json::<Vec<Match>>().await
    }
}

#[async_trait]
impl MatchFeed for HttpMatchFeed {
    async fn matches(&self) -> Vec<Match> {
        match self.fetch().await {
            Ok(matches) => {
                if matches.is_empty() {
                    info!(event_name = "bot.feed.empty", url = %self.url, "no matches found from feed");
                }
                matches
            }
            Err(error) => {
                warn!(
                    event_name = "bot.feed.failed",
                    url = %self.url,
                    error = %error,
                    "match feed request failed"
                );
                Vec::new()
            }
        }
    }
}

pub fn next_match(matches: &[Match]) -> Option<&Match> {
    matches.iter().find(|candidate| candidate.is_future())
}

pub fn next_matches(matches: &[Match], count: usize) -> Vec<&Match> {
    matches.iter().filter(|candidate| candidate.is_future()).take(count).collect()
}

pub fn last_match(matches: &[Match]) -> Option<&Match> {
    matches.iter().filter(|candidate| candidate.is_completed()).last()
}

/// The most recent `count` completed matches, oldest first.
pub fn last_matches(matches: &[Match], count: usize) -> Vec<&Match> {
    let completed: Vec<&Match> = matches.iter().filter(|m| m.is_completed()).collect();
    let skip = completed.len().saturating_sub(count);
    completed.into_iter().skip(skip).collect()
}

/// Completed matches that kicked off less than a day ago (whole hours, truncated).
pub fn yesterday_matches(matches: &[Match], now: DateTime<Utc>) -> Vec<&Match> {
    matches
        .iter()
        .filter(|m| m.is_completed() && (m.datetime - now).num_hours() > -24)
        .collect()
}

/// Upcoming matches that kick off within the next day (whole hours, truncated).
pub fn today_matches(matches: &[Match], now: DateTime<Utc>) -> Vec<&Match> {
    matches.iter().filter(|m| m.is_future() && (m.datetime - now).num_hours() < 24).collect()
}

pub fn offset_from_hours(hours: i32) -> FixedOffset {
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

/// Relative rendering: "Today at 3:00 PM", "Last Sunday at 9:05 AM", "06/14/2018".
pub fn calendar(at: DateTime<Utc>, now: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = at.with_timezone(&offset);
    let start_of_today = now.with_timezone(&offset).date_naive().and_time(NaiveTime::MIN);
    let days = (local.naive_local() - start_of_today).num_seconds() as f64 / 86_400.0;
    let time = local.format("%-I:%M %p");

    if days < -6.0 {
        local.format("%m/%d/%Y").to_string()
    } else if days < -1.0 {
        format!("Last {} at {time}", local.format("%A"))
    } else if days < 0.0 {
        format!("Yesterday at {time}")
    } else if days < 1.0 {
        format!("Today at {time}")
    } else if days < 2.0 {
        format!("Tomorrow at {time}")
    } else if days < 7.0 {
        format!("{} at {time}", local.format("%A"))
    } else {
        local.format("%m/%d/%Y").to_string()
    }
}

pub fn format_fixture(fixture: &Match, now: DateTime<Utc>, offset: FixedOffset) -> String {
    format!(
        "{} vs. {}; {}",
        fixture.home_team.country,
        fixture.away_team.country,
        calendar(fixture.datetime, now, offset)
    )
}

pub fn format_result(result: &Match) -> String {
    let scorers = result
        .home_team_events
        .iter()
        .chain(&result.away_team_events)
        .filter(|event| event.type_of_event.contains("goal"))
        .map(|event| event.player.as_str())
        .collect::<Vec<_>>()
        .join(",");

    format!(
        "{} {} - {} {}\n({scorers})",
        result.home_team.country,
        result.home_team.goals.unwrap_or_default(),
        result.away_team.goals.unwrap_or_default(),
        result.away_team.country,
    )
}
