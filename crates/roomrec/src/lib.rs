pub mod chat;
pub mod config;
pub mod embeddings;
pub mod llm;
pub mod ranking;
pub mod search;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use chat::{ActionKind, BotEngine, ResultBuckets, SessionCarryOver, TurnOutcome};
pub use config::RecConfig;
pub use search::{RuleBasedRecommender, VectorRecommender};
pub use storage::{CatalogStore, LanceStore, MemoryStore, StoreError};
pub use types::{Candidate, FilterCriteria, RatingProfile, UserRecord, VenueRecord};

// Re-export common types
pub use anyhow::{Error, Result};
