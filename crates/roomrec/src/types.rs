use serde::{Deserialize, Deserializer, Serialize};

/// One escape-room theme as stored in the catalog.
///
/// `doc_key` is the store's internal document key; `ref_id` is the stable
/// reference id assigned by the ingestion pipeline. The two are reconciled
/// by [`VenueRecord::canonical_id`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueRecord {
    pub doc_key: String,
    #[serde(default)]
    pub ref_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub store_name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub description: String,
    /// Alternate short title / initials, matched as a fallback when
    /// resolving a theme name mentioned in chat.
    #[serde(default)]
    pub alias: Option<String>,
    /// Average party size; absent means the venue accepts any group.
    #[serde(default)]
    pub party_size: Option<f32>,
    #[serde(default)]
    pub ratings: RatingProfile,
    /// Semantic embedding of title + description. Absent on legacy records,
    /// which are then skipped by vector search rather than scored as zero.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl VenueRecord {
    /// Canonical id: the `ref_id` attribute when present, else the document
    /// key. Always a trimmed string so that numeric and string forms of the
    /// same id compare equal downstream.
    pub fn canonical_id(&self) -> String {
        match &self.ref_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => self.doc_key.trim().to_string(),
        }
    }
}

/// The eight rating dimensions of a venue. Missing values read as 0.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingProfile {
    pub overall: f32,
    pub fear: f32,
    pub difficulty: f32,
    pub activity: f32,
    pub problem: f32,
    pub story: f32,
    pub interior: f32,
    pub staging: f32,
}

/// One participant profile. The nickname is the sole lookup key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    pub nickname: String,
    /// Venue reference ids the user has completed. The ingestion pipeline is
    /// not consistent about numeric vs string ids, so deserialization
    /// normalizes both to strings.
    #[serde(default, deserialize_with = "deserialize_id_list")]
    pub played: Vec<String>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Accepts `[1, "2", 3]` and yields `["1", "2", "3"]`.
fn deserialize_id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<serde_json::Value> = Vec::deserialize(deserializer)?;
    Ok(raw.iter().filter_map(value_to_id).collect())
}

/// Normalize a loosely-typed id value (number or string) to its canonical
/// string form. Returns `None` for empty strings and non-scalar values.
pub fn value_to_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Candidate view projected out of a venue record for ranking and reply
/// composition. Reordering a candidate list never mutates these fields.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
    pub store: String,
    pub location: String,
    pub genre: String,
    /// Description excerpt, first ~150 chars.
    pub desc: String,
    pub ratings: RatingProfile,
    /// Raw embedding, kept for downstream re-ranking.
    #[serde(skip)]
    pub vector: Option<Vec<f32>>,
    /// Cosine similarity to the query vector, set by the vector retriever.
    pub similarity: Option<f32>,
}

const DESC_EXCERPT_CHARS: usize = 150;

impl Candidate {
    pub fn from_record(record: &VenueRecord) -> Self {
        Self {
            id: record.canonical_id(),
            title: record.title.clone(),
            store: record.store_name.clone(),
            location: record.location.clone(),
            genre: record.genre.clone(),
            desc: record.description.chars().take(DESC_EXCERPT_CHARS).collect(),
            ratings: record.ratings,
            vector: record.embedding.clone(),
            similarity: None,
        }
    }
}

/// Structured filter criteria extracted from one turn's query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterCriteria {
    pub locations: Vec<String>,
    pub keywords: Vec<String>,
    pub min_rating: Option<f32>,
    pub party_size: Option<u32>,
    pub mentioned_users: Vec<String>,
}

impl FilterCriteria {
    /// Structured attribute checks shared by both retrievers: region
    /// containment, minimum rating, and party-size proximity.
    ///
    /// Region data is not consistently normalized, so the check is a
    /// case/whitespace-insensitive substring test against the concatenation
    /// of the venue's location and store name. A venue with no recorded
    /// party size passes the size check.
    pub fn accepts(&self, venue: &VenueRecord, party_tolerance: f32) -> bool {
        if !self.locations.is_empty() {
            let haystack =
                normalize_match_key(&format!("{} {}", venue.location, venue.store_name));
            let hit = self.locations.iter().any(|loc| {
                let needle = normalize_match_key(loc);
                !needle.is_empty() && haystack.contains(&needle)
            });
            if !hit {
                return false;
            }
        }

        if let Some(min) = self.min_rating {
            if venue.ratings.overall < min {
                return false;
            }
        }

        if let Some(size) = self.party_size {
            if let Some(avg) = venue.party_size {
                if (avg - size as f32).abs() > party_tolerance {
                    return false;
                }
            }
        }

        true
    }

    /// Carry-over merge for "show different results": start from the
    /// previous turn's criteria and let any newly-specified region, rating,
    /// or party-size narrow them. Mentioned users accumulate.
    pub fn narrowed_by(&self, newer: &FilterCriteria) -> FilterCriteria {
        let mut merged = self.clone();
        if !newer.locations.is_empty() {
            merged.locations = newer.locations.clone();
        }
        if !newer.keywords.is_empty() {
            merged.keywords = newer.keywords.clone();
        }
        if newer.min_rating.is_some() {
            merged.min_rating = newer.min_rating;
        }
        if newer.party_size.is_some() {
            merged.party_size = newer.party_size;
        }
        for user in &newer.mentioned_users {
            if !merged.mentioned_users.contains(user) {
                merged.mentioned_users.push(user.clone());
            }
        }
        merged
    }
}

/// Case-folded, whitespace-stripped key for tolerant substring matching.
pub fn normalize_match_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<String>()
        .to_lowercase()
}
