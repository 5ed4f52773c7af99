//! Embedding generation via an OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Maximum characters to send per text to the embedding API. Chunking keeps
/// inputs well under this; the guard protects against oversized outliers.
const MAX_EMBED_CHARS: usize = 3_000;

const BATCH_SIZE: usize = 64;

/// External text-embedding collaborator.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

#[derive(Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_embedding(t).to_string())
            .collect();

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in truncated.chunks(BATCH_SIZE) {
            let mut req = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .json(&EmbedRequest {
                    model: &self.model,
                    input: batch,
                });
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await?;
            if !resp.status().is_success() {
                anyhow::bail!("embedding API returned {}", resp.status());
            }

            let body: EmbedResponse = resp.json().await?;
            if body.data.len() != batch.len() {
                anyhow::bail!(
                    "embedding API returned {} vectors for {} inputs",
                    body.data.len(),
                    batch.len()
                );
            }
            all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
        }

        Ok(all_embeddings)
    }
}

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char
/// boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
