use crate::endpoint::base_url;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use tracing::debug;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Inputs per `/v1/embeddings` request.
pub const EMBEDDING_BATCH_SIZE: usize = 1_000;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;
}

/// Hashed character trigrams, L2-normalized. Deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

async fn embed_in_batches<F, Fut>(
    texts: &[String],
    batch_size: usize,
    mut embed_batch: F,
) -> Result<Vec<Vec<f32>>, SearchError>
where
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Vec<Vec<f32>>, SearchError>>,
{
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        vectors.extend(embed_batch(batch.to_vec()).await?);
    }
    Ok(vectors)
}

pub fn openai_dimensions(model: &str) -> Option<usize> {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1_536),
        "text-embedding-3-large" => Some(3_072),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, SearchError> {
        let model = model.into();
        let dimensions = openai_dimensions(&model).ok_or_else(|| {
            SearchError::Request(format!("unknown embedding dimensions for model {model}"))
        })?;
        Ok(Self {
            client: Client::new(),
            endpoint: base_url(base)?.join("v1/embeddings")?,
            api_key: api_key.into(),
            model,
            dimensions,
        })
    }

    async fn request(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>, SearchError> {
        debug!(model = %self.model, inputs = batch.len(), "requesting embeddings");
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": batch }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "openai-embeddings".to_string(),
                details: response.status().to_string(),
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != batch.len() {
            return Err(SearchError::BackendResponse {
                backend: "openai-embeddings".to_string(),
                details: format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    parsed.data.len()
                ),
            });
        }
        parsed.data.sort_by_key(|row| row.index);
        Ok(parsed.data.into_iter().map(|row| row.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        embed_in_batches(texts, EMBEDDING_BATCH_SIZE, |batch| self.request(batch)).await
    }
}

#[cfg(test)]
mod tests {
    use super::{
        embed_in_batches, openai_dimensions, CharacterNgramEmbedder, Embedder, OpenAiEmbedder,
        EMBEDDING_BATCH_SIZE,
    };
    use crate::SearchError;
    use std::sync::Mutex;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed_one("Pot odds and implied odds");
        let second = embedder.embed_one("Pot odds and implied odds");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vectors = embedder
            .embed(&["abc".to_string(), "".to_string()])
            .await
            .expect("offline embedding");
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|vector| vector.len() == 32));
    }

    #[test]
    fn unknown_openai_model_is_rejected() {
        assert_eq!(openai_dimensions("text-embedding-3-large"), Some(3_072));
        assert!(OpenAiEmbedder::new("https://api.openai.com", "key", "mystery-model").is_err());
    }

    #[tokio::test]
    async fn large_inputs_are_split_into_ordered_batches() -> Result<(), SearchError> {
        let texts = (0..2_500).map(|i| i.to_string()).collect::<Vec<_>>();
        let calls = Mutex::new(Vec::new());

        let vectors = embed_in_batches(&texts, EMBEDDING_BATCH_SIZE, |batch| {
            if let Ok(mut calls) = calls.lock() {
                calls.push(batch.len());
            }
            async move {
                Ok(batch
                    .iter()
                    .map(|text| vec![text.parse::<f32>().unwrap_or(-1.0)])
                    .collect())
            }
        })
        .await?;

        assert_eq!(*calls.lock().expect("calls lock"), vec![1_000, 1_000, 500]);
        assert_eq!(vectors.len(), 2_500);
        assert!(vectors
            .iter()
            .enumerate()
            .all(|(i, vector)| vector == &vec![i as f32]));
        Ok(())
    }

    #[tokio::test]
    async fn empty_input_sends_no_batch() -> Result<(), SearchError> {
        let mut calls = 0;
        let vectors = embed_in_batches(&[], EMBEDDING_BATCH_SIZE, |_batch| {
            calls += 1;
            async { Ok(Vec::new()) }
        })
        .await?;

        assert!(vectors.is_empty());
        assert_eq!(calls, 0);
        Ok(())
    }

    #[tokio::test]
    async fn failed_batch_fails_the_whole_call() {
        let texts = (0..3).map(|i| i.to_string()).collect::<Vec<_>>();
        let result = embed_in_batches(&texts, 2, |batch| async move {
            if batch.len() < 2 {
                Err(SearchError::Request("rate limited".to_string()))
            } else {
                Ok(vec![vec![0.0]; batch.len()])
            }
        })
        .await;

        assert!(matches!(result, Err(SearchError::Request(_))));
    }
}
