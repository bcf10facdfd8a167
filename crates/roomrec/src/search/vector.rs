//! Vector retrieval: preference-centroid and query-embedding similarity
//! search over venue embeddings.

use ndarray::{Array2, ArrayView1, Axis};
use std::collections::HashSet;
use std::sync::Arc;

use super::{cosine_similarity, is_excluded, normalize_exclusions, resolve_participants};
use crate::config::SearchConfig;
use crate::embeddings::TextEmbedder;
use crate::ranking::rank_by_query;
use crate::storage::CatalogStore;
use crate::types::{Candidate, FilterCriteria};

pub struct VectorRecommender {
    store: Arc<dyn CatalogStore>,
    embedder: Option<Arc<dyn TextEmbedder>>,
    config: SearchConfig,
}

impl VectorRecommender {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        embedder: Option<Arc<dyn TextEmbedder>>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Component-wise mean of the group members' preference embeddings,
    /// re-normalized to unit length. Returns `None` when no member has a
    /// stored vector — personalization is then unavailable, which is not an
    /// error.
    pub async fn group_preference_vector(&self, nicknames: &[String]) -> Option<Vec<f32>> {
        let members = resolve_participants(nicknames);
        if members.is_empty() {
            return None;
        }

        let users = match self.store.users_by_nicknames(&members).await {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!("Group vector lookup failed: {}", e);
                return None;
            }
        };

        let vectors: Vec<&[f32]> = users
            .iter()
            .filter_map(|u| u.embedding.as_deref())
            .collect();
        let dimension = vectors.first()?.len();
        let usable: Vec<&[f32]> = vectors
            .into_iter()
            .filter(|v| v.len() == dimension)
            .collect();

        let mut matrix = Array2::<f32>::zeros((usable.len(), dimension));
        for (row, vector) in usable.iter().enumerate() {
            matrix.row_mut(row).assign(&ArrayView1::from(*vector));
        }

        let mean = matrix.mean_axis(Axis(0))?;
        let norm = mean.dot(&mean).sqrt();
        if norm <= 0.0 {
            return None;
        }
        Some((mean / norm).to_vec())
    }

    /// Nearest venues to `vector` by cosine similarity, under the same
    /// structured filters and exclusion rules as the rule-based path.
    /// Records without an embedding are skipped entirely, not scored as
    /// zero.
    pub async fn search_by_vector(
        &self,
        vector: &[f32],
        limit: usize,
        filters: &FilterCriteria,
        exclude_ids: &HashSet<String>,
    ) -> Vec<Candidate> {
        // A single unambiguous region can narrow at the store; region
        // strings are not normalized for exact matching, so anything else
        // loads a broad pool and filters in memory.
        let pool = if filters.locations.len() == 1 {
            self.store
                .venues_in_location(&filters.locations[0], self.config.vector_pool_size)
                .await
        } else {
            self.store.top_rated_venues(self.config.vector_pool_size).await
        };

        let pool = match pool {
            Ok(pool) => pool,
            Err(e) => {
                tracing::warn!("Vector pool load failed: {}", e);
                return Vec::new();
            }
        };

        let excluded = normalize_exclusions(exclude_ids);
        let mut scored: Vec<Candidate> = pool
            .iter()
            .filter(|venue| !is_excluded(venue, &excluded))
            .filter(|venue| filters.accepts(venue, self.config.party_tolerance))
            .filter_map(|venue| {
                let embedding = venue.embedding.as_deref()?;
                let mut candidate = Candidate::from_record(venue);
                candidate.similarity = Some(cosine_similarity(vector, embedding));
                Some(candidate)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .unwrap_or(0.0)
                .total_cmp(&a.similarity.unwrap_or(0.0))
        });
        scored.truncate(limit);
        scored
    }

    /// Personalized search for a single user or group: centroid vector,
    /// own play-history exclusion, similarity search, then keyword re-rank.
    ///
    /// This retriever owns its history lookup — it does not assume the
    /// caller already excluded played venues.
    pub async fn search_by_user_context(
        &self,
        nicknames: &[String],
        query_text: &str,
        limit: usize,
        filters: &FilterCriteria,
        exclude_ids: &HashSet<String>,
    ) -> Vec<Candidate> {
        let Some(vector) = self.group_preference_vector(nicknames).await else {
            tracing::debug!("No usable preference vector; personalization unavailable");
            return Vec::new();
        };

        let mut excluded = normalize_exclusions(exclude_ids);
        let members = resolve_participants(nicknames);
        match self.store.users_by_nicknames(&members).await {
            Ok(users) => {
                for user in users {
                    excluded.extend(user.played.iter().map(|id| id.trim().to_string()));
                }
            }
            Err(e) => {
                tracing::warn!("Play-history lookup failed, continuing without: {}", e);
            }
        }

        // Widen the fetch when a query is present so the keyword re-rank
        // has a pool to choose from.
        let fetch_limit = if query_text.trim().is_empty() {
            limit
        } else {
            limit.saturating_mul(self.config.rerank_multiplier)
        };

        let mut results = self
            .search_by_vector(&vector, fetch_limit, filters, &excluded)
            .await;
        rank_by_query(&mut results, query_text);
        results.truncate(limit);
        results
    }

    /// Fallback path: embed the raw query text and search by similarity.
    /// Unavailable (empty result) when no embedder is configured.
    pub async fn search_by_text(
        &self,
        query_text: &str,
        filters: &FilterCriteria,
        exclude_ids: &HashSet<String>,
    ) -> Vec<Candidate> {
        let Some(embedder) = &self.embedder else {
            tracing::debug!("No embedding model configured; text search unavailable");
            return Vec::new();
        };

        let vector = match embedder.embed(query_text) {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("Query embedding failed: {}", e);
                return Vec::new();
            }
        };

        self.search_by_vector(
            &vector,
            self.config.text_pool_size,
            filters,
            exclude_ids,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecConfig;
    use crate::storage::MemoryStore;
    use crate::types::{RatingProfile, UserRecord, VenueRecord};

    fn venue_with_embedding(doc_key: &str, embedding: Option<Vec<f32>>) -> VenueRecord {
        VenueRecord {
            doc_key: doc_key.to_string(),
            ref_id: Some(doc_key.to_string()),
            title: format!("theme-{}", doc_key),
            location: "강남".into(),
            ratings: RatingProfile {
                overall: 4.0,
                ..Default::default()
            },
            embedding,
            ..Default::default()
        }
    }

    fn user_with_vector(nickname: &str, embedding: Option<Vec<f32>>) -> UserRecord {
        UserRecord {
            nickname: nickname.to_string(),
            embedding,
            ..Default::default()
        }
    }

    fn recommender(store: Arc<MemoryStore>) -> VectorRecommender {
        VectorRecommender::new(store, None, RecConfig::default().search)
    }

    #[tokio::test]
    async fn group_vector_is_absent_when_no_member_has_one() {
        let store = Arc::new(MemoryStore::new());
        store.insert_users([
            user_with_vector("코난", None),
            user_with_vector("란", None),
        ]);

        let vector = recommender(store)
            .group_preference_vector(&["코난".to_string(), "란".to_string()])
            .await;
        assert!(vector.is_none());
    }

    #[tokio::test]
    async fn group_vector_of_identical_members_is_that_vector() {
        let store = Arc::new(MemoryStore::new());
        let shared = vec![0.6f32, 0.8, 0.0];
        store.insert_users([
            user_with_vector("코난", Some(shared.clone())),
            user_with_vector("란", Some(shared.clone())),
        ]);

        let vector = recommender(store)
            .group_preference_vector(&["코난".to_string(), "란".to_string()])
            .await
            .unwrap();
        for (got, want) in vector.iter().zip(shared.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn group_vector_degrades_to_present_members() {
        // Only one member has a stored vector; the centroid is that
        // member's normalized vector.
        let store = Arc::new(MemoryStore::new());
        store.insert_users([
            user_with_vector("코난", Some(vec![2.0, 0.0])),
            user_with_vector("란", None),
        ]);

        let vector = recommender(store)
            .group_preference_vector(&["코난".to_string(), "란".to_string()])
            .await
            .unwrap();
        assert!((vector[0] - 1.0).abs() < 1e-6);
        assert!(vector[1].abs() < 1e-6);
    }

    #[tokio::test]
    async fn zero_vectors_yield_no_group_vector() {
        let store = Arc::new(MemoryStore::new());
        store.insert_users([user_with_vector("코난", Some(vec![0.0, 0.0]))]);

        let vector = recommender(store)
            .group_preference_vector(&["코난".to_string()])
            .await;
        assert!(vector.is_none());
    }

    #[tokio::test]
    async fn venues_without_embeddings_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([
            venue_with_embedding("v1", Some(vec![1.0, 0.0])),
            venue_with_embedding("v2", None),
        ]);

        let results = recommender(store)
            .search_by_vector(&[1.0, 0.0], 10, &FilterCriteria::default(), &HashSet::new())
            .await;

        let ids: Vec<&str> = results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["v1"]);
    }

    #[tokio::test]
    async fn results_are_ordered_by_similarity() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([
            venue_with_embedding("far", Some(vec![0.0, 1.0])),
            venue_with_embedding("near", Some(vec![1.0, 0.0])),
            venue_with_embedding("mid", Some(vec![0.7, 0.7])),
        ]);

        let results = recommender(store)
            .search_by_vector(&[1.0, 0.0], 10, &FilterCriteria::default(), &HashSet::new())
            .await;

        let ids: Vec<&str> = results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
    }

    #[tokio::test]
    async fn user_context_search_excludes_own_history() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([
            venue_with_embedding("v1", Some(vec![1.0, 0.0])),
            venue_with_embedding("v2", Some(vec![0.9, 0.1])),
        ]);
        store.insert_users([UserRecord {
            nickname: "코난".into(),
            played: vec!["v1".into()],
            embedding: Some(vec![1.0, 0.0]),
        }]);

        let results = recommender(store)
            .search_by_user_context(
                &["코난".to_string()],
                "",
                10,
                &FilterCriteria::default(),
                &HashSet::new(),
            )
            .await;

        let ids: Vec<&str> = results.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["v2"]);
    }

    #[tokio::test]
    async fn user_context_search_is_empty_without_preference_vector() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([venue_with_embedding("v1", Some(vec![1.0, 0.0]))]);
        store.insert_users([user_with_vector("코난", None)]);

        let results = recommender(store)
            .search_by_user_context(
                &["코난".to_string()],
                "공포",
                10,
                &FilterCriteria::default(),
                &HashSet::new(),
            )
            .await;
        assert!(results.is_empty());
    }

    struct StubEmbedder(Vec<f32>);

    impl TextEmbedder for StubEmbedder {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(self.0.clone())
        }
        fn dimension(&self) -> usize {
            self.0.len()
        }
    }

    #[tokio::test]
    async fn text_search_uses_the_embedder() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([
            venue_with_embedding("near", Some(vec![1.0, 0.0])),
            venue_with_embedding("far", Some(vec![0.0, 1.0])),
        ]);

        let recommender = VectorRecommender::new(
            store,
            Some(Arc::new(StubEmbedder(vec![1.0, 0.0]))),
            RecConfig::default().search,
        );
        let results = recommender
            .search_by_text("공포 테마", &FilterCriteria::default(), &HashSet::new())
            .await;
        assert_eq!(results[0].id, "near");
    }

    #[tokio::test]
    async fn text_search_without_embedder_is_empty() {
        let store = Arc::new(MemoryStore::new());
        store.insert_venues([venue_with_embedding("v1", Some(vec![1.0, 0.0]))]);

        let results = recommender(store)
            .search_by_text("공포", &FilterCriteria::default(), &HashSet::new())
            .await;
        assert!(results.is_empty());
    }
}
