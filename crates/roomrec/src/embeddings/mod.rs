pub mod minilm;

pub use minilm::{MiniLmConfig, MiniLmEmbedder};

use anyhow::Result;

/// Black-box text → fixed-dimension vector function. Deterministic for
/// identical input. The paraphrase model family used here has no
/// query/passage asymmetry, so a single entry point covers both free-text
/// queries and (out-of-scope) catalog ingestion.
pub trait TextEmbedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding vector dimension.
    fn dimension(&self) -> usize;
}
