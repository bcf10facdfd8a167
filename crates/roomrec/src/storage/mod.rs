pub mod lance_store;
pub mod memory;

pub use lance_store::LanceStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{UserRecord, VenueRecord};

/// The store's membership ("in") predicate accepts at most this many values
/// per call. Callers either truncate (retrievers, for group resolution) or
/// chunk (the Lance backend) to stay under it.
pub const MEMBERSHIP_QUERY_CAP: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read/mutate interface over the venue catalog and user profiles.
///
/// All retrieval methods are read-only; the only mutations are the
/// idempotent play-history operations, each scoped to a single user record
/// and relying on the backend's per-call atomicity.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Top venues ordered by overall satisfaction, descending.
    async fn top_rated_venues(&self, limit: usize) -> StoreResult<Vec<VenueRecord>>;

    /// Venues whose location equals `location` exactly. Region strings are
    /// not normalized in the catalog, so callers use this only when an
    /// exact match is acceptable (single-region vector narrowing, theme
    /// resolution).
    async fn venues_in_location(&self, location: &str, limit: usize)
        -> StoreResult<Vec<VenueRecord>>;

    /// Users matching any of the given nicknames. Missing nicknames are
    /// silently absent from the result, mirroring a membership query.
    async fn users_by_nicknames(&self, nicknames: &[String]) -> StoreResult<Vec<UserRecord>>;

    /// Add a venue id to a user's play history. Adding an id that is
    /// already present is a no-op.
    async fn add_played(&self, nickname: &str, venue_id: &str) -> StoreResult<()>;

    /// Remove a venue id from a user's play history. Removing an absent id
    /// is a no-op.
    async fn remove_played(&self, nickname: &str, venue_id: &str) -> StoreResult<()>;
}
