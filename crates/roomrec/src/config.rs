use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecConfig {
    pub data_dir: PathBuf,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model_dir: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Candidates returned per result bucket.
    pub bucket_limit: usize,
    /// Rating-ordered pool loaded by the rule-based retriever. Must be large
    /// enough to survive downstream filtering.
    pub rule_pool_size: usize,
    /// Broad pool loaded by the vector retriever when no single-region
    /// store predicate applies.
    pub vector_pool_size: usize,
    /// Result count of the text-embedding fallback search before the final
    /// keyword re-rank truncates it.
    pub text_pool_size: usize,
    /// Bounded scan used when resolving a theme name to a venue id.
    pub theme_scan_limit: usize,
    /// Party-size proximity window: a venue passes when its average party
    /// size is within this distance of the requested size.
    pub party_tolerance: f32,
    /// Fetch inflation applied before keyword re-ranking so the re-rank has
    /// a wider pool to choose from.
    pub rerank_multiplier: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Groq API key. Absent means the engine reports a configuration error
    /// instead of attempting retrieval.
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl RecConfig {
    /// Validate config values, returning errors for clearly broken
    /// configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.embedding.max_length == 0 {
            return Err("embedding.max_length must be > 0".into());
        }
        if self.search.bucket_limit == 0 {
            return Err("search.bucket_limit must be > 0".into());
        }
        if self.search.rule_pool_size == 0 || self.search.vector_pool_size == 0 {
            return Err("search pool sizes must be > 0".into());
        }
        if self.search.theme_scan_limit == 0 {
            return Err("search.theme_scan_limit must be > 0".into());
        }
        if self.search.party_tolerance < 0.0 {
            return Err("search.party_tolerance must be >= 0".into());
        }
        if self.search.rerank_multiplier == 0 {
            return Err("search.rerank_multiplier must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing
    /// fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for RecConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("roomrec");

        let model_dir = if Path::new("models").exists() {
            PathBuf::from("models")
        } else if let Ok(env_path) = std::env::var("MODEL_PATH") {
            PathBuf::from(env_path)
        } else {
            data_dir.join("models")
        };

        Self {
            data_dir,
            embedding: EmbeddingConfig {
                model_dir,
                dimension: 384,
                max_length: 256,
                cache_size: 1000,
            },
            search: SearchConfig {
                bucket_limit: 3,
                rule_pool_size: 200,
                vector_pool_size: 200,
                text_pool_size: 20,
                theme_scan_limit: 500,
                party_tolerance: 1.0,
                rerank_multiplier: 4,
            },
            llm: LlmConfig {
                api_key: std::env::var("GROQ_API_KEY").ok(),
                model: "llama-3.3-70b-versatile".to_string(),
                temperature: 0.3,
                max_tokens: 1024,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RecConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_bucket_limit_is_rejected() {
        let mut config = RecConfig::default();
        config.search.bucket_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_party_tolerance_is_rejected() {
        let mut config = RecConfig::default();
        config.search.party_tolerance = -0.5;
        assert!(config.validate().is_err());
    }
}
