pub mod groq;

pub use groq::GroqClient;

use anyhow::Result;
use async_trait::async_trait;

/// Black-box text/JSON completion function. With `json_mode` the model is
/// instructed (and, where the API supports it, constrained) to emit a
/// single JSON object.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str, json_mode: bool) -> Result<String>;
}

/// Strip a wrapping Markdown code fence from a model response. Models in
/// JSON mode still occasionally wrap their output in ```json fences; the
/// parser runs on the inner body. Text without a fence passes through
/// trimmed.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) up to the first newline.
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(strip_code_fences("  {\"a\": 1} "), "{\"a\": 1}");
    }

    #[test]
    fn json_fence_is_removed() {
        let wrapped = "```json\n{\"action\": \"recommend\"}\n```";
        assert_eq!(strip_code_fences(wrapped), "{\"action\": \"recommend\"}");
    }

    #[test]
    fn bare_fence_is_removed() {
        let wrapped = "```\n{\"a\": 1}\n```";
        assert_eq!(strip_code_fences(wrapped), "{\"a\": 1}");
    }
}
