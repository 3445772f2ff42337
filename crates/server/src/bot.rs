//! `app_mention` handler: answers match questions in the channel it was mentioned in.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use rand::seq::SliceRandom;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use speck_core::config::BotConfig;
use speck_slack::{
    api::POST_MESSAGE, ApiTarget, ChatApi, EventContext, EventHandler, EventHandlerError,
    InboundRecord,
};
use tracing::{info, warn};

use crate::matches::{self, MatchFeed};

pub const MENTION_EVENT: &str = "app_mention";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    NextMatch,
    LatestResult,
    Today,
    Yesterday,
    NextMatches(usize),
    LastResults(usize),
    NextDeadline,
    Quote,
}

/// Phrase patterns, tried in order; the first hit wins.
pub struct IntentMatcher {
    next_match: Regex,
    latest_result: Regex,
    today: Regex,
    yesterday: Regex,
    next_matches: Regex,
    last_results: Regex,
    next_deadline: Regex,
}

fn phrase(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

impl IntentMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            next_match: phrase(r"\bnext match\b")?,
            latest_result: phrase(r"\b(last|latest) (result|match)\b")?,
            today: phrase(r"\btoday\b")?,
            yesterday: phrase(r"\byesterday\b")?,
            next_matches: phrase(r"\bnext ([0-9]+) matches\b")?,
            last_results: phrase(r"\blast ([0-9]+) (results|matches)\b")?,
            next_deadline: phrase(r"\bnext deadline\b")?,
        })
    }

    pub fn parse(&self, text: &str) -> Intent {
        if self.next_match.is_match(text) {
            Intent::NextMatch
        } else if self.latest_result.is_match(text) {
            Intent::LatestResult
        } else if self.today.is_match(text) {
            Intent::Today
        } else if self.yesterday.is_match(text) {
            Intent::Yesterday
        } else if let Some(count) = capture_count(&self.next_matches, text) {
            Intent::NextMatches(count)
        } else if let Some(count) = capture_count(&self.last_results, text) {
            Intent::LastResults(count)
        } else if self.next_deadline.is_match(text) {
            Intent::NextDeadline
        } else {
            Intent::Quote
        }
    }
}

fn capture_count(pattern: &Regex, text: &str) -> Option<usize> {
    pattern.captures(text)?.get(1)?.as_str().parse().ok()
}

pub struct MentionBot {
    feed: Arc<dyn MatchFeed>,
    chat: Arc<dyn ChatApi>,
    intents: IntentMatcher,
    offset: FixedOffset,
    quotes: Vec<String>,
    deadlines: Vec<DateTime<Utc>>,
}

impl MentionBot {
    pub fn new(
        config: &BotConfig,
        feed: Arc<dyn MatchFeed>,
        chat: Arc<dyn ChatApi>,
    ) -> Result<Self, regex::Error> {
        let mut deadlines: Vec<DateTime<Utc>> = config
            .deadlines
            .iter()
            .filter_map(|raw| match DateTime::parse_from_rfc3339(raw) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(error) => {
                    warn!(
                        event_name = "bot.deadline.invalid",
                        deadline = %raw,
                        error = %error,
                        "skipping unparsable deadline"
                    );
                    None
                }
            })
            .collect();
        deadlines.sort();

        Ok(Self {
            feed,
            chat,
            intents: IntentMatcher::new()?,
            offset: matches::offset_from_hours(config.utc_offset_hours),
            quotes: config.quotes.clone(),
            deadlines,
        })
    }

    /// Reply text for a mention, or `None` when there is nothing to say.
    pub async fn reply_for(&self, text: &str, now: DateTime<Utc>) -> Option<String> {
        let intent = self.intents.parse(text);
        let reply = match intent {
            Intent::NextMatch => {
                let all = self.feed.matches().await;
                matches::next_match(&all).map(|m| matches::format_fixture(m, now, self.offset))
            }
            Intent::LatestResult => {
                let all = self.feed.matches().await;
                matches::last_match(&all).map(matches::format_result)
            }
            Intent::Today => {
                let all = self.feed.matches().await;
                Some(self.fixtures(matches::today_matches(&all, now), now))
            }
            Intent::Yesterday => {
                let all = self.feed.matches().await;
                Some(results(matches::yesterday_matches(&all, now)))
            }
            Intent::NextMatches(count) => {
                let all = self.feed.matches().await;
                Some(self.fixtures(matches::next_matches(&all, count), now))
            }
            Intent::LastResults(count) => {
                let all = self.feed.matches().await;
                Some(results(matches::last_matches(&all, count)))
            }
            Intent::NextDeadline => self
                .deadlines
                .iter()
                .find(|deadline| **deadline > now)
                .map(|deadline| matches::calendar(*deadline, now, self.offset)),
            Intent::Quote => self.pick_quote(),
        };

        reply.filter(|text| !text.is_empty())
    }

    fn pick_quote(&self) -> Option<String> {
        self.quotes.choose(&mut rand::thread_rng()).cloned()
    }

    fn fixtures(&self, selected: Vec<&matches::Match>, now: DateTime<Utc>) -> String {
        selected
            .into_iter()
            .map(|m| matches::format_fixture(m, now, self.offset))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn results(selected: Vec<&matches::Match>) -> String {
    selected.into_iter().map(matches::format_result).collect::<Vec<_>>().join("\n\n")
}

#[async_trait]
impl EventHandler for MentionBot {
    async fn handle(
        &self,
        record: &InboundRecord,
        ctx: &EventContext,
    ) -> Result<(), EventHandlerError> {
        let Some(event) = record.event() else {
            return Ok(());
        };
        let text = event.get("text").and_then(Value::as_str).unwrap_or_default();
        let channel = event.get("channel").and_then(Value::as_str).unwrap_or_default();

        info!(
            event_name = "bot.mention.received",
            correlation_id = %ctx.correlation_id,
            channel = %channel,
            "received app_mention"
        );

        let Some(reply) = self.reply_for(text, Utc::now()).await else {
            return Ok(());
        };

        let mut args = Map::new();
        args.insert("channel".to_owned(), Value::String(channel.to_owned()));
        args.insert("text".to_owned(), Value::String(reply));

        match self.chat.send(ApiTarget::Method(POST_MESSAGE.to_owned()), args).await {
            Ok(_) => {
                info!(
                    event_name = "bot.mention.replied",
                    correlation_id = %ctx.correlation_id,
                    "response sent to app_mention"
                );
                Ok(())
            }
            Err(error) => {
                warn!(
                    event_name = "bot.mention.reply_failed",
                    correlation_id = %ctx.correlation_id,
                    error = %error,
                    "failed to respond to app_mention"
                );
                Err(error.into())
            }
        }
    }
}
