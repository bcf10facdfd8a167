pub mod engine;
pub mod intent;

pub use engine::BotEngine;
pub use intent::{Intent, ThemeMention};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::types::{Candidate, FilterCriteria};

/// Classified action for one turn, echoed back so the caller can decide
/// whether to reset its shown-ids tracking (`Recommend` starts a new topic;
/// `AnotherRecommend` keeps accumulating).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Recommend,
    AnotherRecommend,
    PlayedCheck,
    NotPlayedCheck,
    PlayedCheckInquiry,
    Error,
}

/// Named result buckets, one per retrieval strategy.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultBuckets {
    pub rule_based: Vec<Candidate>,
    pub personalized: Vec<Candidate>,
    pub text_search: Vec<Candidate>,
}

impl ResultBuckets {
    pub fn is_empty(&self) -> bool {
        self.rule_based.is_empty() && self.personalized.is_empty() && self.text_search.is_empty()
    }

    /// Ids across all buckets, for the caller's shown-ids accumulation.
    pub fn shown_ids(&self) -> Vec<String> {
        self.rule_based
            .iter()
            .chain(self.personalized.iter())
            .chain(self.text_search.iter())
            .map(|c| c.id.clone())
            .collect()
    }
}

/// Session state owned by the hosting UI and passed through each turn:
/// everything already shown in this conversation plus the criteria behind
/// the most recent fresh recommendation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionCarryOver {
    pub shown_ids: HashSet<String>,
    pub last_filters: FilterCriteria,
}

/// Everything the engine returns for one turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub reply: String,
    pub buckets: ResultBuckets,
    /// Filters actually applied, for carry-over into a future
    /// "show different results" turn.
    pub filters_used: FilterCriteria,
    pub action: ActionKind,
}
