//! Multilingual MiniLM sentence embedder over ONNX Runtime.

use anyhow::{anyhow, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::Tokenizer;

use super::TextEmbedder;

#[derive(Clone)]
pub struct MiniLmConfig {
    pub model_path: PathBuf,
    pub tokenizer_path: PathBuf,
    pub dimension: usize,
    pub max_length: usize,
    pub cache_size: usize,
}

impl MiniLmConfig {
    /// Locate a paraphrase-multilingual-MiniLM export under `model_dir`.
    pub fn auto_detect(model_dir: &Path) -> Option<Self> {
        let base_path = if model_dir.join("paraphrase-multilingual-MiniLM-L12-v2").exists() {
            model_dir.join("paraphrase-multilingual-MiniLM-L12-v2")
        } else if model_dir.join("model.onnx").exists() {
            model_dir.to_path_buf()
        } else {
            return None;
        };

        let model_path = base_path.join("model.onnx");
        let tokenizer_path = base_path.join("tokenizer.json");
        if !model_path.exists() || !tokenizer_path.exists() {
            return None;
        }

        Some(Self {
            model_path,
            tokenizer_path,
            dimension: 384,
            max_length: 256,
            cache_size: 1000,
        })
    }
}

pub struct MiniLmEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
    config: MiniLmConfig,
    cache: Arc<RwLock<lru::LruCache<u64, Vec<f32>>>>,
}

impl MiniLmEmbedder {
    pub fn new(config: MiniLmConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(anyhow!(
                "Model file not found at: {}",
                config.model_path.display()
            ));
        }

        let model_bytes = std::fs::read(&config.model_path)
            .map_err(|e| anyhow!("Failed to read model: {:?}", e))?;

        let num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let session = Session::builder()
            .map_err(|e| anyhow!("Session builder: {:?}", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Optimization level: {:?}", e))?
            .with_intra_threads(num_threads)
            .map_err(|e| anyhow!("Intra threads: {:?}", e))?
            .with_inter_threads(1)
            .map_err(|e| anyhow!("Inter threads: {:?}", e))?
            .commit_from_memory(&model_bytes)
            .map_err(|e| anyhow!("Failed to load model: {:?}", e))?;

        let tokenizer = Tokenizer::from_file(&config.tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer: {:?}", e))?;

        let cache_size = std::num::NonZeroUsize::new(config.cache_size.max(1))
            .ok_or_else(|| anyhow!("cache_size must be > 0"))?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
            config,
            cache: Arc::new(RwLock::new(lru::LruCache::new(cache_size))),
        })
    }

    fn cache_key(text: &str) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        hasher.finish()
    }

    fn run_inference(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("Tokenization failed: {:?}", e))?;

        let max_len = self.config.max_length;
        let mut ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        ids.truncate(max_len);
        let mut mask: Vec<i64> = vec![1; ids.len()];
        ids.resize(max_len, 0);
        mask.resize(max_len, 0);

        let shape = vec![1usize, max_len];
        let input_ids = Value::from_array((shape.clone(), ids))
            .map_err(|e| anyhow!("input_ids tensor: {:?}", e))?;
        let attention_mask = Value::from_array((shape, mask.clone()))
            .map_err(|e| anyhow!("attention_mask tensor: {:?}", e))?;

        let inputs = ort::inputs![
            "input_ids" => input_ids,
            "attention_mask" => attention_mask,
        ];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| anyhow!("Inference failed: {:?}", e))?;

        let output_name = outputs
            .iter()
            .find(|(name, _)| *name == "last_hidden_state" || *name == "token_embeddings")
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| anyhow!("Model produced no token embedding output"))?;

        let (shape, data) = outputs[output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| anyhow!("Failed to extract output '{}': {:?}", output_name, e))?;

        let seq_len = shape[1] as usize;
        let hidden_dim = shape[2] as usize;

        // Masked mean pooling over token positions.
        let mut pooled = vec![0.0f32; hidden_dim];
        let mut mask_sum = 0.0f32;
        for pos in 0..seq_len {
            let mask_val = mask.get(pos).copied().unwrap_or(0) as f32;
            if mask_val > 0.0 {
                mask_sum += mask_val;
                let offset = pos * hidden_dim;
                for dim in 0..hidden_dim {
                    pooled[dim] += data[offset + dim] * mask_val;
                }
            }
        }
        if mask_sum > 0.0 {
            for value in &mut pooled {
                *value /= mask_sum;
            }
        }

        let norm: f32 = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-12 {
            for value in &mut pooled {
                *value /= norm;
            }
        }

        Ok(pooled)
    }
}

impl TextEmbedder for MiniLmEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::cache_key(text);
        if let Some(cached) = self.cache.write().get(&key) {
            return Ok(cached.clone());
        }

        let embedding = self.run_inference(text)?;
        self.cache.write().put(key, embedding.clone());
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }
}
