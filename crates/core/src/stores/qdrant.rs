use crate::embeddings::Embedder;
use crate::endpoint::base_url;
use crate::models::{ContentType, IndexDocument, RetrievalCandidate, UnitMetadata};
use crate::stores::point_id;
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

pub struct QdrantStore {
    endpoint: Url,
    collection: String,
    client: Client,
    embedder: Arc<dyn Embedder>,
}

impl QdrantStore {
    pub fn new(
        endpoint: &str,
        collection: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: base_url(endpoint)?,
            collection: collection.into(),
            client: Client::new(),
            embedder,
        })
    }

    fn url(&self, suffix: &str) -> Result<Url, SearchError> {
        Ok(self
            .endpoint
            .join(&format!("collections/{}{}", self.collection, suffix))?)
    }

    fn backend_error(status: StatusCode) -> SearchError {
        SearchError::BackendResponse {
            backend: "qdrant".to_string(),
            details: status.to_string(),
        }
    }

    pub async fn ensure_collection(&self) -> Result<(), SearchError> {
        let response = self.client.get(self.url("")?).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            return Err(Self::backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.url("")?)
            .json(&json!({
                "vectors": {
                    "size": self.embedder.dimensions(),
                    "distance": "Euclid",
                }
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }
        info!(collection = %self.collection, "created qdrant collection");
        Ok(())
    }
}

fn candidate_from_hit(hit: &Value) -> Option<RetrievalCandidate> {
    let payload = hit.get("payload")?;
    let content_type = match payload.get("type").and_then(Value::as_str)? {
        "table" => ContentType::Table,
        _ => ContentType::Text,
    };
    let page = payload.get("page").and_then(Value::as_u64).unwrap_or(0) as u32;
    let page_label = payload
        .get("page_label")
        .and_then(Value::as_u64)
        .map_or(page + 1, |label| label as u32);

    Some(RetrievalCandidate {
        document: IndexDocument {
            content: payload
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            metadata: UnitMetadata {
                page,
                page_label,
                source: payload
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown")
                    .to_string(),
                content_type,
            },
        },
        // Qdrant reports plain L2; retrieval thresholds are on squared L2.
        score: hit
            .get("score")
            .and_then(Value::as_f64)
            .map_or(f64::MAX, |distance| distance * distance),
    })
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn add_documents(&self, documents: &[IndexDocument]) -> Result<(), SearchError> {
        if documents.is_empty() {
            return Ok(());
        }
        self.ensure_collection().await?;

        let texts = documents
            .iter()
            .map(|document| document.content.clone())
            .collect::<Vec<_>>();
        let embeddings = self.embedder.embed(&texts).await?;

        if documents.len() != embeddings.len() {
            return Err(SearchError::Request(format!(
                "embedding count {} doesn't match document count {}",
                embeddings.len(),
                documents.len()
            )));
        }

        let points = documents
            .iter()
            .zip(embeddings.iter())
            .map(|(document, embedding)| {
                if embedding.len() != self.embedder.dimensions() {
                    return Err(SearchError::Request(format!(
                        "embedding dimension {} != {}",
                        embedding.len(),
                        self.embedder.dimensions()
                    )));
                }

                Ok(json!({
                    "id": point_id(document).to_string(),
                    "vector": embedding,
                    "payload": {
                        "content": document.content,
                        "type": document.metadata.content_type.as_str(),
                        "source": document.metadata.source,
                        "page": document.metadata.page,
                        "page_label": document.metadata.page_label,
                    },
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let response = self
            .client
            .put(self.url("/points?wait=true")?)
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        debug!(collection = %self.collection, points = points.len(), "upserted points");
        Ok(())
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        content_type: ContentType,
    ) -> Result<Vec<RetrievalCandidate>, SearchError> {
        let query_vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Request("embedder returned no query vector".to_string()))?;

        let response = self
            .client
            .post(self.url("/points/search")?)
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
                "filter": {
                    "must": [
                        { "key": "type", "match": { "value": content_type.as_str() } }
                    ]
                },
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Self::backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits.iter().filter_map(candidate_from_hit).collect())
    }

    async fn reset_collection(&self) -> Result<(), SearchError> {
        let response = self.client.delete(self.url("")?).send().await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(Self::backend_error(response.status()));
        }
        info!(collection = %self.collection, "dropped qdrant collection");
        self.ensure_collection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_hits_map_to_candidates() {
        let hit = json!({
            "id": "8f0b6d8e-0000-0000-0000-000000000000",
            "score": 0.6,
            "payload": {
                "content": "| Hand | Equity |",
                "type": "table",
                "source": "/docs/poker.pdf",
                "page": 1,
                "page_label": 2,
            }
        });

        let candidate = candidate_from_hit(&hit).expect("payload present");

        assert!((candidate.score - 0.36).abs() < 1e-9);
        assert_eq!(candidate.document.metadata.content_type, ContentType::Table);
        assert_eq!(candidate.document.metadata.page_label, 2);
        assert_eq!(candidate.document.metadata.source_name(), "poker.pdf");
    }

    #[test]
    fn missing_score_never_passes_a_threshold() {
        let hit = json!({ "payload": { "content": "fold", "type": "text" } });
        let candidate = candidate_from_hit(&hit).expect("payload present");
        assert_eq!(candidate.score, f64::MAX);
    }

    #[test]
    fn hits_without_payload_are_skipped() {
        assert!(candidate_from_hit(&json!({ "id": 1, "score": 0.1 })).is_none());
    }

    #[test]
    fn collection_urls_are_rooted_at_the_endpoint() -> Result<(), SearchError> {
        let store = QdrantStore::new(
            "http://localhost:6333",
            "pdf_units",
            Arc::new(crate::CharacterNgramEmbedder::default()),
        )?;
        assert_eq!(
            store.url("/points/search")?.as_str(),
            "http://localhost:6333/collections/pdf_units/points/search"
        );
        Ok(())
    }
}
