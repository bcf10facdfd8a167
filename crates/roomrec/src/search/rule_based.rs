//! Rule-based retrieval: structured attribute filtering over a
//! rating-ordered candidate pool.

use std::collections::HashSet;
use std::sync::Arc;

use super::{is_excluded, normalize_exclusions, resolve_participants};
use crate::config::SearchConfig;
use crate::ranking::rank_by_query;
use crate::storage::CatalogStore;
use crate::types::{Candidate, FilterCriteria};

pub struct RuleBasedRecommender {
    store: Arc<dyn CatalogStore>,
    config: SearchConfig,
}

impl RuleBasedRecommender {
    pub fn new(store: Arc<dyn CatalogStore>, config: SearchConfig) -> Self {
        Self { store, config }
    }

    /// Scan the catalog by explicit criteria, excluding ids the group has
    /// already played or the caller has already shown, then re-rank by the
    /// query's keyword intent.
    ///
    /// Store failures degrade to an empty result; the caller treats that as
    /// "this path yielded nothing" and moves on.
    pub async fn search(
        &self,
        criteria: &FilterCriteria,
        query_text: &str,
        limit: usize,
        participants: &[String],
        exclude_ids: &HashSet<String>,
    ) -> Vec<Candidate> {
        let mut excluded = normalize_exclusions(exclude_ids);

        let members = resolve_participants(participants);
        if !members.is_empty() {
            match self.store.users_by_nicknames(&members).await {
                Ok(users) => {
                    for user in users {
                        excluded.extend(user.played.iter().map(|id| id.trim().to_string()));
                    }
                }
                Err(e) => {
                    tracing::warn!("Group history lookup failed, continuing without: {}", e);
                }
            }
        }

        let pool = match self.store.top_rated_venues(self.config.rule_pool_size).await {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!("Rule-based pool load failed: {}", e);
                return Vec::new();
            }
        };

        let mut candidates: Vec<Candidate> = pool
            .iter()
            .filter(|venue| !is_excluded(venue, &excluded))
            .filter(|venue| criteria.accepts(venue, self.config.party_tolerance))
            .map(Candidate::from_record)
            .collect();

        tracing::debug!(
            surviving = candidates.len(),
            excluded = excluded.len(),
            "Rule-based filter pass complete"
        );

        rank_by_query(&mut candidates, query_text);
        candidates.truncate(limit);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecConfig;
    use crate::storage::{MemoryStore, StoreResult};
    use crate::types::{RatingProfile, UserRecord, VenueRecord};

    fn venue(doc_key: &str, ref_id: &str, location: &str, ratings: RatingProfile) -> VenueRecord {
        VenueRecord {
            doc_key: doc_key.to_string(),
            ref_id: Some(ref_id.to_string()),
            title: format!("theme-{}", doc_key),
            location: location.to_string(),
            ratings,
            ..Default::default()
        }
    }

    fn overall(rating: f32) -> RatingProfile {
        RatingProfile {
            overall: rating,
            ..Default::default()
        }
    }

    fn recommender(store: Arc<MemoryStore>) -> RuleBasedRecommender {
        RuleBasedRecommender::new(store, RecConfig::default().search)
    }

    #[tokio::test]
    async fn exclusion_matches_numeric_and_string_ids() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([
            venue("d1", "42", "강남", overall(4.5)),
            venue("d2", "43", "강남", overall(4.0)),
        ]);

        let exclude: HashSet<String> = [" 42 ".to_string()].into_iter().collect();
        let results = recommender(store)
            .search(&FilterCriteria::default(), "", 10, &[], &exclude)
            .await;

        let ids: Vec<&str> = results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["43"]);
    }

    #[tokio::test]
    async fn played_history_of_group_members_is_excluded() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([
            venue("d1", "1", "강남", overall(4.5)),
            venue("d2", "2", "강남", overall(4.0)),
            venue("d3", "3", "강남", overall(3.5)),
        ]);
        store.insert_users([
            UserRecord {
                nickname: "코난".into(),
                played: vec!["1".into()],
                ..Default::default()
            },
            UserRecord {
                nickname: "란".into(),
                played: vec!["2".into()],
                ..Default::default()
            },
        ]);

        let results = recommender(store)
            .search(
                &FilterCriteria::default(),
                "",
                10,
                &["코난".to_string(), "란".to_string()],
                &HashSet::new(),
            )
            .await;

        let ids: Vec<&str> = results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);
    }

    #[tokio::test]
    async fn region_filter_keeps_only_matching_venues() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([
            venue("d1", "1", "강남 구", overall(4.5)),
            venue("d2", "2", "홍대", overall(4.9)),
        ]);

        let criteria = FilterCriteria {
            locations: vec!["강남구".into()],
            ..Default::default()
        };
        let results = recommender(store)
            .search(&criteria, "", 10, &[], &HashSet::new())
            .await;

        let ids: Vec<&str> = results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[tokio::test]
    async fn results_are_reranked_by_query_keywords() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([
            venue(
                "d1",
                "1",
                "강남",
                RatingProfile {
                    overall: 4.9,
                    fear: 1.0,
                    ..Default::default()
                },
            ),
            venue(
                "d2",
                "2",
                "강남",
                RatingProfile {
                    overall: 3.0,
                    fear: 4.8,
                    ..Default::default()
                },
            ),
        ]);

        let results = recommender(store)
            .search(
                &FilterCriteria::default(),
                "강남 공포 테마 추천해줘",
                10,
                &[],
                &HashSet::new(),
            )
            .await;

        assert_eq!(results[0].id, "2");
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl CatalogStore for FailingStore {
        async fn top_rated_venues(&self, _limit: usize) -> StoreResult<Vec<VenueRecord>> {
            Err(anyhow::anyhow!("store down").into())
        }
        async fn venues_in_location(
            &self,
            _location: &str,
            _limit: usize,
        ) -> StoreResult<Vec<VenueRecord>> {
            Err(anyhow::anyhow!("store down").into())
        }
        async fn users_by_nicknames(&self, _nicknames: &[String]) -> StoreResult<Vec<UserRecord>> {
            Err(anyhow::anyhow!("store down").into())
        }
        async fn add_played(&self, _nickname: &str, _venue_id: &str) -> StoreResult<()> {
            Err(anyhow::anyhow!("store down").into())
        }
        async fn remove_played(&self, _nickname: &str, _venue_id: &str) -> StoreResult<()> {
            Err(anyhow::anyhow!("store down").into())
        }
    }

    #[tokio::test]
    async fn store_failure_degrades_to_empty_result() {
        let recommender =
            RuleBasedRecommender::new(Arc::new(FailingStore), RecConfig::default().search);
        let results = recommender
            .search(
                &FilterCriteria::default(),
                "",
                10,
                &["코난".to_string()],
                &HashSet::new(),
            )
            .await;
        assert!(results.is_empty());
    }
}
