use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_buffer::NullBuffer;
use arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

use super::{CatalogStore, StoreError, StoreResult, MEMBERSHIP_QUERY_CAP};
use crate::types::{value_to_id, RatingProfile, UserRecord, VenueRecord};

const THEMES_TABLE: &str = "themes";
const USERS_TABLE: &str = "users";

/// Upper bound on a full-catalog scan. Far above any real catalog size;
/// exists because Lance applies a small default limit when none is set.
const VENUE_SCAN_CAP: usize = 10_000;

/// LanceDB-backed catalog store: a `themes` table for venue records and a
/// `users` table for participant profiles. Play history is kept as a JSON
/// string column because the ingestion pipeline emits mixed numeric/string
/// ids; ids are normalized to strings at read time.
pub struct LanceStore {
    db: lancedb::Connection,
    dimension: usize,
}

impl LanceStore {
    pub async fn new(path: &str, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let store = Self { db, dimension };
        store.ensure_table(THEMES_TABLE, store.venue_schema()).await?;
        store.ensure_table(USERS_TABLE, store.user_schema()).await?;
        Ok(store)
    }

    fn embedding_field(&self) -> Field {
        Field::new(
            "embedding",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                self.dimension as i32,
            ),
            true,
        )
    }

    fn venue_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("doc_key", DataType::Utf8, false),
            Field::new("ref_id", DataType::Utf8, false),
            Field::new("title", DataType::Utf8, false),
            Field::new("store_name", DataType::Utf8, false),
            Field::new("location", DataType::Utf8, false),
            Field::new("genre", DataType::Utf8, false),
            Field::new("description", DataType::Utf8, false),
            Field::new("alias", DataType::Utf8, false),
            Field::new("party_size", DataType::Float32, true),
            Field::new("rating_overall", DataType::Float32, false),
            Field::new("rating_fear", DataType::Float32, false),
            Field::new("rating_difficulty", DataType::Float32, false),
            Field::new("rating_activity", DataType::Float32, false),
            Field::new("rating_problem", DataType::Float32, false),
            Field::new("rating_story", DataType::Float32, false),
            Field::new("rating_interior", DataType::Float32, false),
            Field::new("rating_staging", DataType::Float32, false),
            self.embedding_field(),
        ]))
    }

    fn user_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("nickname", DataType::Utf8, false),
            Field::new("played_json", DataType::Utf8, false),
            self.embedding_field(),
        ]))
    }

    async fn ensure_table(&self, name: &str, schema: Arc<Schema>) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&name.to_string()) {
            return Ok(());
        }

        // Create with a single seed record, then delete it.
        let seed_columns: Vec<Arc<dyn Array>> = schema
            .fields()
            .iter()
            .map(|field| match field.data_type() {
                DataType::Utf8 => Arc::new(StringArray::from(vec!["__seed__"])) as Arc<dyn Array>,
                DataType::Float32 => Arc::new(Float32Array::from(vec![0.0f32])) as Arc<dyn Array>,
                _ => Arc::new(self.embedding_array(&[None])) as Arc<dyn Array>,
            })
            .collect();

        let batch = RecordBatch::try_new(schema.clone(), seed_columns)
            .context("Failed to create seed RecordBatch")?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.db
            .create_table(name, Box::new(batches))
            .execute()
            .await
            .with_context(|| format!("Failed to create {} table", name))?;

        let table = self.db.open_table(name).execute().await?;
        let key = schema_key_column(name);
        table.delete(&format!("{} = '__seed__'", key)).await.ok();
        Ok(())
    }

    fn embedding_array(&self, vectors: &[Option<&[f32]>]) -> FixedSizeListArray {
        let mut flat = Vec::with_capacity(vectors.len() * self.dimension);
        let mut validity = Vec::with_capacity(vectors.len());
        for vector in vectors {
            match vector {
                Some(v) if v.len() == self.dimension => {
                    flat.extend_from_slice(v);
                    validity.push(true);
                }
                _ => {
                    flat.extend(std::iter::repeat(0.0f32).take(self.dimension));
                    validity.push(false);
                }
            }
        }
        FixedSizeListArray::new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimension as i32,
            Arc::new(Float32Array::from(flat)) as Arc<dyn Array>,
            Some(NullBuffer::from(validity)),
        )
    }

    /// Insert or replace venue records, used by the ingestion path.
    pub async fn upsert_venues(&self, records: Vec<VenueRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let table = self
            .db
            .open_table(THEMES_TABLE)
            .execute()
            .await
            .context("Failed to open themes table")?;

        for chunk in records.iter().collect::<Vec<_>>().chunks(50) {
            let keys: Vec<String> = chunk
                .iter()
                .map(|r| format!("'{}'", r.doc_key.replace('\'', "''")))
                .collect();
            table
                .delete(&format!("doc_key IN ({})", keys.join(", ")))
                .await
                .ok();
        }

        let schema = self.venue_schema();
        let vectors: Vec<Option<&[f32]>> =
            records.iter().map(|r| r.embedding.as_deref()).collect();
        let party_sizes: Vec<Option<f32>> = records.iter().map(|r| r.party_size).collect();
        let rating = |f: fn(&RatingProfile) -> f32| -> Vec<f32> {
            records.iter().map(|r| f(&r.ratings)).collect()
        };

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                string_column(&records, |r| r.doc_key.as_str()),
                string_column(&records, |r| r.ref_id.as_deref().unwrap_or("")),
                string_column(&records, |r| r.title.as_str()),
                string_column(&records, |r| r.store_name.as_str()),
                string_column(&records, |r| r.location.as_str()),
                string_column(&records, |r| r.genre.as_str()),
                string_column(&records, |r| r.description.as_str()),
                string_column(&records, |r| r.alias.as_deref().unwrap_or("")),
                Arc::new(Float32Array::from(party_sizes)),
                Arc::new(Float32Array::from(rating(|r| r.overall))),
                Arc::new(Float32Array::from(rating(|r| r.fear))),
                Arc::new(Float32Array::from(rating(|r| r.difficulty))),
                Arc::new(Float32Array::from(rating(|r| r.activity))),
                Arc::new(Float32Array::from(rating(|r| r.problem))),
                Arc::new(Float32Array::from(rating(|r| r.story))),
                Arc::new(Float32Array::from(rating(|r| r.interior))),
                Arc::new(Float32Array::from(rating(|r| r.staging))),
                Arc::new(self.embedding_array(&vectors)),
            ],
        )
        .context("Failed to create venue RecordBatch")?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .context("Failed to insert venues")?;

        tracing::debug!("Upserted {} venues into LanceDB", records.len());
        Ok(())
    }

    /// Insert or replace user profiles, used by the ingestion path.
    pub async fn upsert_users(&self, records: Vec<UserRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let table = self
            .db
            .open_table(USERS_TABLE)
            .execute()
            .await
            .context("Failed to open users table")?;
        for record in records {
            self.write_user(&table, &record).await?;
        }
        Ok(())
    }

    /// Replace a single user row: delete by nickname, re-add. Relies on the
    /// store's per-call atomicity; this core adds no locking of its own.
    async fn write_user(&self, table: &lancedb::Table, user: &UserRecord) -> Result<()> {
        table
            .delete(&format!(
                "nickname = '{}'",
                user.nickname.replace('\'', "''")
            ))
            .await
            .ok();

        let schema = self.user_schema();
        let played_json =
            serde_json::to_string(&user.played).context("Failed to encode play history")?;
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![user.nickname.as_str()])) as Arc<dyn Array>,
                Arc::new(StringArray::from(vec![played_json.as_str()])),
                Arc::new(self.embedding_array(&[user.embedding.as_deref()])),
            ],
        )
        .context("Failed to create user RecordBatch")?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .context("Failed to write user record")?;
        Ok(())
    }

    async fn fetch_user(&self, nickname: &str) -> Result<Option<UserRecord>> {
        let table = self.db.open_table(USERS_TABLE).execute().await?;
        let results = table
            .query()
            .only_if(format!("nickname = '{}'", nickname.replace('\'', "''")))
            .limit(1)
            .execute()
            .await
            .context("LanceDB user lookup failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_users_from_batches(&batches).into_iter().next())
    }

    async fn query_venues(&self, predicate: Option<String>, limit: usize) -> Result<Vec<VenueRecord>> {
        let table = self.db.open_table(THEMES_TABLE).execute().await?;
        let mut query = table.query();
        if let Some(pred) = predicate {
            query = query.only_if(pred);
        }
        query = query.limit(limit);

        let results = query.execute().await.context("LanceDB venue query failed")?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_venues_from_batches(&batches))
    }
}

#[async_trait::async_trait]
impl CatalogStore for LanceStore {
    async fn top_rated_venues(&self, limit: usize) -> StoreResult<Vec<VenueRecord>> {
        // Lance scans are unordered, so order in memory: the catalog is
        // small enough to pull whole, sort by overall rating, keep the top.
        let mut records = self.query_venues(None, VENUE_SCAN_CAP).await?;
        records.sort_by(|a, b| b.ratings.overall.total_cmp(&a.ratings.overall));
        records.truncate(limit);
        Ok(records)
    }

    async fn venues_in_location(
        &self,
        location: &str,
        limit: usize,
    ) -> StoreResult<Vec<VenueRecord>> {
        let predicate = format!("location = '{}'", location.replace('\'', "''"));
        Ok(self.query_venues(Some(predicate), limit).await?)
    }

    async fn users_by_nicknames(&self, nicknames: &[String]) -> StoreResult<Vec<UserRecord>> {
        if nicknames.is_empty() {
            return Ok(Vec::new());
        }

        let table = self
            .db
            .open_table(USERS_TABLE)
            .execute()
            .await
            .context("Failed to open users table")?;
        let mut users = Vec::new();

        // Membership predicates are capped, so query in chunks.
        for chunk in nicknames.chunks(MEMBERSHIP_QUERY_CAP) {
            let quoted: Vec<String> = chunk
                .iter()
                .map(|n| format!("'{}'", n.replace('\'', "''")))
                .collect();
            let results = table
                .query()
                .only_if(format!("nickname IN ({})", quoted.join(", ")))
                .execute()
                .await
                .context("LanceDB user membership query failed")?;
            let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
                .await
                .context("Failed to collect user batches")?;
            users.extend(extract_users_from_batches(&batches));
        }

        Ok(users)
    }

    async fn add_played(&self, nickname: &str, venue_id: &str) -> StoreResult<()> {
        let mut user = self
            .fetch_user(nickname)
            .await?
            .ok_or_else(|| StoreError::UserNotFound(nickname.to_string()))?;

        let id = venue_id.trim().to_string();
        if user.played.contains(&id) {
            return Ok(());
        }
        user.played.push(id);

        let table = self.db.open_table(USERS_TABLE).execute().await.context("Failed to open users table")?;
        self.write_user(&table, &user).await?;
        Ok(())
    }

    async fn remove_played(&self, nickname: &str, venue_id: &str) -> StoreResult<()> {
        let mut user = self
            .fetch_user(nickname)
            .await?
            .ok_or_else(|| StoreError::UserNotFound(nickname.to_string()))?;

        let id = venue_id.trim();
        if !user.played.iter().any(|p| p == id) {
            return Ok(());
        }
        user.played.retain(|p| p != id);

        let table = self.db.open_table(USERS_TABLE).execute().await.context("Failed to open users table")?;
        self.write_user(&table, &user).await?;
        Ok(())
    }
}

fn schema_key_column(table: &str) -> &'static str {
    if table == USERS_TABLE {
        "nickname"
    } else {
        "doc_key"
    }
}

fn string_column<T>(records: &[T], get: impl Fn(&T) -> &str) -> Arc<dyn Array> {
    let values: Vec<&str> = records.iter().map(|r| get(r)).collect();
    Arc::new(StringArray::from(values))
}

fn read_string(batch: &RecordBatch, name: &str, row: usize) -> String {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .map(|c| c.value(row).to_string())
        .unwrap_or_default()
}

fn read_f32(batch: &RecordBatch, name: &str, row: usize) -> f32 {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
        .map(|c| if c.is_null(row) { 0.0 } else { c.value(row) })
        .unwrap_or(0.0)
}

fn read_embedding(batch: &RecordBatch, row: usize) -> Option<Vec<f32>> {
    let column = batch
        .column_by_name("embedding")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())?;
    if column.is_null(row) {
        return None;
    }
    let values = column.value(row);
    let floats = values.as_any().downcast_ref::<Float32Array>()?;
    Some(floats.values().to_vec())
}

fn extract_venues_from_batches(batches: &[RecordBatch]) -> Vec<VenueRecord> {
    let mut records = Vec::new();
    for batch in batches {
        for row in 0..batch.num_rows() {
            let doc_key = read_string(batch, "doc_key", row);
            if doc_key.is_empty() || doc_key == "__seed__" {
                continue;
            }
            let ref_id = read_string(batch, "ref_id", row);
            let alias = read_string(batch, "alias", row);
            let party_size = batch
                .column_by_name("party_size")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .and_then(|c| (!c.is_null(row)).then(|| c.value(row)));

            records.push(VenueRecord {
                doc_key,
                ref_id: (!ref_id.is_empty()).then_some(ref_id),
                title: read_string(batch, "title", row),
                store_name: read_string(batch, "store_name", row),
                location: read_string(batch, "location", row),
                genre: read_string(batch, "genre", row),
                description: read_string(batch, "description", row),
                alias: (!alias.is_empty()).then_some(alias),
                party_size,
                ratings: RatingProfile {
                    overall: read_f32(batch, "rating_overall", row),
                    fear: read_f32(batch, "rating_fear", row),
                    difficulty: read_f32(batch, "rating_difficulty", row),
                    activity: read_f32(batch, "rating_activity", row),
                    problem: read_f32(batch, "rating_problem", row),
                    story: read_f32(batch, "rating_story", row),
                    interior: read_f32(batch, "rating_interior", row),
                    staging: read_f32(batch, "rating_staging", row),
                },
                embedding: read_embedding(batch, row),
            });
        }
    }
    records
}

fn extract_users_from_batches(batches: &[RecordBatch]) -> Vec<UserRecord> {
    let mut records = Vec::new();
    for batch in batches {
        for row in 0..batch.num_rows() {
            let nickname = read_string(batch, "nickname", row);
            if nickname.is_empty() || nickname == "__seed__" {
                continue;
            }
            let played_json = read_string(batch, "played_json", row);
            let played = serde_json::from_str::<Vec<serde_json::Value>>(&played_json)
                .map(|values| values.iter().filter_map(value_to_id).collect())
                .unwrap_or_default();

            records.push(UserRecord {
                nickname,
                played,
                embedding: read_embedding(batch, row),
            });
        }
    }
    records
}
