//! In-memory store backend. Used by the test suite and small demos where
//! spinning up a LanceDB directory is overkill.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{CatalogStore, StoreError, StoreResult};
use crate::types::{UserRecord, VenueRecord};

#[derive(Default)]
pub struct MemoryStore {
    venues: RwLock<HashMap<String, VenueRecord>>,
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_venues(&self, records: impl IntoIterator<Item = VenueRecord>) {
        let mut venues = self.venues.write();
        for record in records {
            venues.insert(record.doc_key.clone(), record);
        }
    }

    pub fn insert_users(&self, records: impl IntoIterator<Item = UserRecord>) {
        let mut users = self.users.write();
        for record in records {
            users.insert(record.nickname.clone(), record);
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn top_rated_venues(&self, limit: usize) -> StoreResult<Vec<VenueRecord>> {
        let mut records: Vec<VenueRecord> = self.venues.read().values().cloned().collect();
        records.sort_by(|a, b| b.ratings.overall.total_cmp(&a.ratings.overall));
        records.truncate(limit);
        Ok(records)
    }

    async fn venues_in_location(
        &self,
        location: &str,
        limit: usize,
    ) -> StoreResult<Vec<VenueRecord>> {
        let records = self
            .venues
            .read()
            .values()
            .filter(|v| v.location == location)
            .take(limit)
            .cloned()
            .collect();
        Ok(records)
    }

    async fn users_by_nicknames(&self, nicknames: &[String]) -> StoreResult<Vec<UserRecord>> {
        let users = self.users.read();
        Ok(nicknames
            .iter()
            .filter_map(|n| users.get(n).cloned())
            .collect())
    }

    async fn add_played(&self, nickname: &str, venue_id: &str) -> StoreResult<()> {
        let mut users = self.users.write();
        let user = users
            .get_mut(nickname)
            .ok_or_else(|| StoreError::UserNotFound(nickname.to_string()))?;
        let id = venue_id.trim().to_string();
        if !user.played.contains(&id) {
            user.played.push(id);
        }
        Ok(())
    }

    async fn remove_played(&self, nickname: &str, venue_id: &str) -> StoreResult<()> {
        let mut users = self.users.write();
        let user = users
            .get_mut(nickname)
            .ok_or_else(|| StoreError::UserNotFound(nickname.to_string()))?;
        let id = venue_id.trim();
        user.played.retain(|p| p != id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RatingProfile;

    fn user(nickname: &str) -> UserRecord {
        UserRecord {
            nickname: nickname.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_played_is_idempotent() {
        let store = MemoryStore::new();
        store.insert_users([user("코난")]);

        store.add_played("코난", "42").await.unwrap();
        store.add_played("코난", "42").await.unwrap();

        let users = store
            .users_by_nicknames(&["코난".to_string()])
            .await
            .unwrap();
        assert_eq!(users[0].played, vec!["42"]);
    }

    #[tokio::test]
    async fn remove_absent_id_is_a_noop() {
        let store = MemoryStore::new();
        store.insert_users([UserRecord {
            nickname: "코난".into(),
            played: vec!["7".into()],
            ..Default::default()
        }]);

        store.remove_played("코난", "42").await.unwrap();

        let users = store
            .users_by_nicknames(&["코난".to_string()])
            .await
            .unwrap();
        assert_eq!(users[0].played, vec!["7"]);
    }

    #[tokio::test]
    async fn history_mutation_requires_known_user() {
        let store = MemoryStore::new();
        let err = store.add_played("유령", "1").await.unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn top_rated_orders_descending() {
        let store = MemoryStore::new();
        let mut low = VenueRecord {
            doc_key: "low".into(),
            ..Default::default()
        };
        low.ratings = RatingProfile {
            overall: 2.0,
            ..Default::default()
        };
        let mut high = VenueRecord {
            doc_key: "high".into(),
            ..Default::default()
        };
        high.ratings = RatingProfile {
            overall: 4.9,
            ..Default::default()
        };
        store.insert_venues([low, high]);

        let top = store.top_rated_venues(1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].doc_key, "high");
    }

    #[tokio::test]
    async fn missing_nicknames_are_absent_not_errors() {
        let store = MemoryStore::new();
        store.insert_users([user("코난")]);
        let users = store
            .users_by_nicknames(&["코난".to_string(), "없는유저".to_string()])
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
    }
}
