use crate::models::{ContentType, IndexDocument, RetrievalCandidate};
use crate::SearchError;
use async_trait::async_trait;

/// Persistent similarity-searchable store. Scores are squared L2 distances:
/// lower is more similar.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add_documents(&self, documents: &[IndexDocument]) -> Result<(), SearchError>;

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        content_type: ContentType,
    ) -> Result<Vec<RetrievalCandidate>, SearchError>;

    async fn reset_collection(&self) -> Result<(), SearchError>;
}
