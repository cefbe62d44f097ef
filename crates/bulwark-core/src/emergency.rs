//! Terminal safety net: canned responses for when every live path has failed.
//!
//! Entries are hand-authored and schema-valid by construction. Selection is
//! uniformly random, does no parsing and no I/O, and cannot fail.

use rand::Rng;
use thiserror::Error;

use crate::types::{AiResponse, Suggestion};

/// Errors from pool construction.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("emergency pool must contain at least one response")]
    Empty,
}

/// A fixed pool of guaranteed-valid responses.
pub struct EmergencyPool {
    entries: Vec<AiResponse>,
}

impl EmergencyPool {
    /// Create a pool from caller-supplied entries.
    ///
    /// An empty pool is a construction bug, not a runtime condition.
    pub fn new(entries: Vec<AiResponse>) -> Result<Self, PoolError> {
        if entries.is_empty() {
            return Err(PoolError::Empty);
        }
        Ok(Self { entries })
    }

    /// Pick one entry uniformly at random.
    pub fn pick(&self) -> AiResponse {
        let index = rand::thread_rng().gen_range(0..self.entries.len());
        tracing::warn!(index, "serving emergency response");
        self.entries[index].clone()
    }

    /// All entries, in declaration order.
    pub fn entries(&self) -> &[AiResponse] {
        &self.entries
    }
}

impl Default for EmergencyPool {
    fn default() -> Self {
        Self {
            entries: vec![
                AiResponse::text(
                    "I'm having trouble reaching my knowledge service right now. \
                     While I reconnect, your dashboard has everything from your last sync.",
                )
                .with_sentiment("apologetic")
                .with_suggestions(vec![
                    Suggestion::navigate("Open your dashboard", "/dashboard"),
                    Suggestion::plain("Try asking again in a minute"),
                ])
                .with_follow_ups(vec![
                    "Is there something on your dashboard I can help explain later?".to_string(),
                ]),
                AiResponse::text(
                    "Something went wrong on my end while preparing your answer. \
                     Your data is safe, and I should be back shortly.",
                )
                .with_sentiment("apologetic")
                .with_suggestions(vec![
                    Suggestion::navigate("Review your goals", "/goals")
                        .with_description("Your tracked goals are always available."),
                ]),
                AiResponse::text(
                    "I can't generate a fresh answer at the moment, but here are a few \
                     places you can keep going in the meantime.",
                )
                .with_sentiment("apologetic")
                .with_suggestions(vec![
                    Suggestion::navigate("Browse your insights", "/insights"),
                    Suggestion::navigate("Visit the help center", "/support"),
                ]),
                AiResponse::text(
                    "I'm a bit overloaded right now. Give me a moment and ask again, \
                     or pick up where you left off.",
                )
                .with_sentiment("apologetic")
                .with_suggestions(vec![
                    Suggestion::navigate("See recent activity", "/dashboard"),
                ])
                .with_personality("supportive"),
            ],
        }
    }
}
