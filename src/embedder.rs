//! EmbedderPort / ChatPort — capability interfaces to the external dense-text
//! model and chat-completion collaborators (§6). The core only ever depends
//! on these traits; concrete HTTP clients live here, stubs live in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::config::{Config, EmbeddingProvider};
use crate::error::{Result, SearchgrepError};

const MAX_INPUT_CHARS: usize = 8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    Doc,
    Query,
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_INPUT_CHARS) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// `embed(texts, kind) -> vectors`. Implementations must return one vector
/// per input text, all of equal dimensionality, with `output[i]`
/// corresponding to `input[i]`.
#[async_trait]
pub trait EmbedderPort: Send + Sync {
    async fn embed(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Vec<f32>>>;
}

/// `complete(system, user, maxTokens) -> text`.
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String>;
}

/// Build the configured `EmbedderPort` from a loaded [`Config`].
pub fn build_embedder(config: &Config) -> std::sync::Arc<dyn EmbedderPort> {
    match config.embedding_provider {
        EmbeddingProvider::Openai => std::sync::Arc::new(OpenAiEmbedder::new(config)),
        EmbeddingProvider::Local => std::sync::Arc::new(LocalEmbedder::new(config)),
    }
}

/// Build the configured `ChatPort`, or `None` if no remote auth is configured.
pub fn build_chat(config: &Config) -> Option<std::sync::Arc<dyn ChatPort>> {
    config
        .openai_api_key
        .clone()
        .map(|key| std::sync::Arc::new(OpenAiChat::new(config, key)) as std::sync::Arc<dyn ChatPort>)
}

// ---------------------------------------------------------------------------
// Remote (OpenAI-compatible) embedder
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedDatum>,
}

#[derive(Deserialize)]
struct OpenAiEmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: OnceCell<reqwest::Client>,
}

impl OpenAiEmbedder {
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: config.embedding_model.clone(),
            api_key: config.openai_api_key.clone(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &reqwest::Client {
        self.client.get_or_init(reqwest::Client::new).await
    }
}

#[async_trait]
impl EmbedderPort for OpenAiEmbedder {
    async fn embed(&self, texts: &[String], _kind: EmbedKind) -> Result<Vec<Vec<f32>>> {
        let Some(api_key) = &self.api_key else {
            return Err(SearchgrepError::ConfigMissing {
                capability: "EmbedderPort(openai)",
                detail: "OPENAI_API_KEY is not set".to_string(),
            });
        };
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<&str> = texts.iter().map(|t| truncate(t)).collect();
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));

        let resp = self
            .client()
            .await
            .post(&url)
            .bearer_auth(api_key)
            .json(&OpenAiEmbedRequest {
                model: &self.model,
                input: truncated,
            })
            .send()
            .await
            .map_err(|e| SearchgrepError::EmbedderFailure(e.into()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SearchgrepError::EmbedderFailure(anyhow::anyhow!(
                "openai embeddings request failed ({status}): {body}"
            )));
        }

        let mut parsed: OpenAiEmbedResponse = resp
            .json()
            .await
            .map_err(|e| SearchgrepError::EmbedderFailure(e.into()))?;

        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        validate_equal_dims(&vectors)?;
        Ok(vectors)
    }
}

// ---------------------------------------------------------------------------
// Local (Ollama-compatible) embedder — one request per text.
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

pub struct LocalEmbedder {
    base_url: String,
    model: String,
    client: OnceCell<reqwest::Client>,
}

impl LocalEmbedder {
    pub fn new(config: &Config) -> Self {
        Self {
            base_url: config.local_embedding_url.clone(),
            model: config.embedding_model.clone(),
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &reqwest::Client {
        self.client.get_or_init(reqwest::Client::new).await
    }
}

#[async_trait]
impl EmbedderPort for LocalEmbedder {
    async fn embed(&self, texts: &[String], _kind: EmbedKind) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let resp = self
                .client()
                .await
                .post(&url)
                .json(&OllamaEmbedRequest {
                    model: &self.model,
                    prompt: truncate(text),
                })
                .send()
                .await
                .map_err(|e| SearchgrepError::EmbedderFailure(e.into()))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(SearchgrepError::EmbedderFailure(anyhow::anyhow!(
                    "local embeddings request failed ({status}): {body}"
                )));
            }

            let parsed: OllamaEmbedResponse = resp
                .json()
                .await
                .map_err(|e| SearchgrepError::EmbedderFailure(e.into()))?;
            vectors.push(parsed.embedding);
        }

        validate_equal_dims(&vectors)?;
        Ok(vectors)
    }
}

fn validate_equal_dims(vectors: &[Vec<f32>]) -> Result<()> {
    if let Some(first) = vectors.first() {
        let dim = first.len();
        if vectors.iter().any(|v| v.len() != dim) {
            return Err(SearchgrepError::EmbedderFailure(anyhow::anyhow!(
                "embedder returned vectors of mismatched dimensionality"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Remote chat completion
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChatChoice>,
}

#[derive(Deserialize)]
struct OpenAiChatChoice {
    message: OpenAiChatChoiceMessage,
}

#[derive(Deserialize)]
struct OpenAiChatChoiceMessage {
    content: String,
}

pub struct OpenAiChat {
    base_url: String,
    model: String,
    api_key: String,
    client: OnceCell<reqwest::Client>,
}

impl OpenAiChat {
    pub fn new(config: &Config, api_key: String) -> Self {
        Self {
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: "gpt-4o-mini".to_string(),
            api_key,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &reqwest::Client {
        self.client.get_or_init(reqwest::Client::new).await
    }
}

#[async_trait]
impl ChatPort for OpenAiChat {
    async fn complete(&self, system: &str, user: &str, max_tokens: u32) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let resp = self
            .client()
            .await
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&OpenAiChatRequest {
                model: &self.model,
                messages: vec![
                    ChatMessage { role: "system", content: system },
                    ChatMessage { role: "user", content: user },
                ],
                max_tokens,
            })
            .send()
            .await
            .map_err(|e| SearchgrepError::ChatFailure(e.into()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SearchgrepError::ChatFailure(anyhow::anyhow!(
                "chat completion request failed ({status}): {body}"
            )));
        }

        let parsed: OpenAiChatResponse = resp
            .json()
            .await
            .map_err(|e| SearchgrepError::ChatFailure(e.into()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Deterministic stub embedder: every vector is `dim`-wide, derived from a
    /// cheap hash of the input text so distinct texts get distinct vectors.
    pub struct StubEmbedder {
        pub dim: usize,
        pub calls: AtomicUsize,
        pub last_texts: Mutex<Vec<String>>,
    }

    impl StubEmbedder {
        pub fn new(dim: usize) -> Self {
            Self {
                dim,
                calls: AtomicUsize::new(0),
                last_texts: Mutex::new(Vec::new()),
            }
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            let h = crate::hash::hash_content(text.as_bytes());
            let seed = h.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
            (0..self.dim)
                .map(|i| ((seed.wrapping_add(i as u64) % 1000) as f32) / 1000.0)
                .collect()
        }
    }

    #[async_trait]
    impl EmbedderPort for StubEmbedder {
        async fn embed(&self, texts: &[String], _kind: EmbedKind) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_texts.lock().unwrap() = texts.to_vec();
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }
    }

    pub struct StubChat {
        pub response: String,
    }

    #[async_trait]
    impl ChatPort for StubChat {
        async fn complete(&self, _system: &str, _user: &str, _max_tokens: u32) -> Result<String> {
            Ok(self.response.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::StubEmbedder;
    use super::*;

    #[tokio::test]
    async fn stub_embedder_is_deterministic() {
        let e = StubEmbedder::new(8);
        let texts = vec!["hello".to_string(), "world".to_string()];
        let a = e.embed(&texts, EmbedKind::Doc).await.unwrap();
        let b = e.embed(&texts, EmbedKind::Doc).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
    }

    #[test]
    fn truncates_to_max_input_chars() {
        let long = "a".repeat(9000);
        assert_eq!(truncate(&long).len(), MAX_INPUT_CHARS);
    }

    #[test]
    fn mismatched_dims_rejected() {
        let vectors = vec![vec![0.0, 0.0], vec![0.0, 0.0, 0.0]];
        assert!(validate_equal_dims(&vectors).is_err());
    }
}
