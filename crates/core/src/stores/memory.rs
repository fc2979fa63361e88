use crate::embeddings::Embedder;
use crate::models::{ContentType, IndexDocument, RetrievalCandidate};
use crate::stores::point_id;
use crate::traits::VectorIndex;
use crate::SearchError;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

struct StoredPoint {
    id: Uuid,
    vector: Vec<f32>,
    document: IndexDocument,
}

pub struct InMemoryIndex {
    embedder: Arc<dyn Embedder>,
    points: RwLock<Vec<StoredPoint>>,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            points: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.points.read().map(|points| points.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> SearchError {
        SearchError::BackendResponse {
            backend: "memory".to_string(),
            details: "index lock poisoned".to_string(),
        }
    }
}

fn squared_l2(left: &[f32], right: &[f32]) -> f64 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let diff = f64::from(*a) - f64::from(*b);
            diff * diff
        })
        .sum()
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn add_documents(&self, documents: &[IndexDocument]) -> Result<(), SearchError> {
        let texts = documents
            .iter()
            .map(|document| document.content.clone())
            .collect::<Vec<_>>();
        let vectors = self.embedder.embed(&texts).await?;

        let mut points = self.points.write().map_err(|_| Self::poisoned())?;
        for (document, vector) in documents.iter().zip(vectors) {
            let id = point_id(document);
            let point = StoredPoint {
                id,
                vector,
                document: document.clone(),
            };
            match points.iter_mut().find(|existing| existing.id == id) {
                Some(existing) => *existing = point,
                None => points.push(point),
            }
        }
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
            .unwrap_or_default();

        let points = self.points.read().map_err(|_| Self::poisoned())?;
        let mut hits = points
            .iter()
            .filter(|point| point.document.metadata.content_type == content_type)
            .map(|point| RetrievalCandidate {
                document: point.document.clone(),
                score: squared_l2(&query_vector, &point.vector),
            })
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| left.score.total_cmp(&right.score));
        hits.truncate(k);
        Ok(hits)
    }

    async fn reset_collection(&self) -> Result<(), SearchError> {
        self.points.write().map_err(|_| Self::poisoned())?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitMetadata;
    use crate::CharacterNgramEmbedder;

    fn document(content: &str, page: u32, content_type: ContentType) -> IndexDocument {
        IndexDocument {
            content: content.to_string(),
            metadata: UnitMetadata::new(page, "/docs/poker.pdf", content_type),
        }
    }

    fn index() -> InMemoryIndex {
        InMemoryIndex::new(Arc::new(CharacterNgramEmbedder::default()))
    }

    #[tokio::test]
    async fn search_is_filtered_by_content_type() -> Result<(), SearchError> {
        let index = index();
        index
            .add_documents(&[
                document("expected value of a call", 0, ContentType::Text),
                document("| Hand | Equity |", 1, ContentType::Table),
            ])
            .await?;

        let tables = index
            .similarity_search("expected value of a call", 5, ContentType::Table)
            .await?;

        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].document.metadata.content_type, ContentType::Table);
        Ok(())
    }

    #[tokio::test]
    async fn exact_match_ranks_first_with_zero_distance() -> Result<(), SearchError> {
        let index = index();
        index
            .add_documents(&[
                document("bluffing on the river", 0, ContentType::Text),
                document("pot odds for drawing hands", 1, ContentType::Text),
            ])
            .await?;

        let hits = index
            .similarity_search("pot odds for drawing hands", 2, ContentType::Text)
            .await?;

        assert_eq!(hits[0].document.content, "pot odds for drawing hands");
        assert!(hits[0].score < 1e-6);
        assert!(hits[0].score <= hits[1].score);
        Ok(())
    }

    #[tokio::test]
    async fn re_adding_a_unit_does_not_duplicate_it() -> Result<(), SearchError> {
        let index = index();
        let unit = document("position matters", 0, ContentType::Text);
        index.add_documents(&[unit.clone()]).await?;
        index.add_documents(&[unit]).await?;
        assert_eq!(index.len(), 1);
        Ok(())
    }

    /// Embeds the stored unit at (1, 0) and anything else 0.6 away in L2.
    struct FixedAngleEmbedder;

    #[async_trait]
    impl Embedder for FixedAngleEmbedder {
        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
            Ok(texts
                .iter()
                .map(|text| {
                    if text.starts_with("Bluffing") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.82, (1.0f32 - 0.82 * 0.82).sqrt()]
                    }
                })
                .collect())
        }
    }

    #[test]
    fn distance_is_squared_l2() {
        assert!((squared_l2(&[1.0, 0.0], &[0.0, 1.0]) - 2.0).abs() < 1e-9);
        assert!((squared_l2(&[3.0, 4.0], &[0.0, 0.0]) - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn text_at_l2_point_six_passes_the_text_threshold() -> Result<(), SearchError> {
        let index = InMemoryIndex::new(Arc::new(FixedAngleEmbedder));
        index
            .add_documents(&[document(
                "Bluffing works best on dry boards.",
                4,
                ContentType::Text,
            )])
            .await?;

        let hits = index
            .similarity_search("when should I bluff", 3, ContentType::Text)
            .await?;
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.36).abs() < 1e-4);

        let context = crate::Retriever::new(&index)
            .context("when should I bluff")
            .await?;
        assert!(context.contains("Bluffing works best on dry boards."));
        assert!(context.contains("Page 5]"));
        Ok(())
    }

    #[tokio::test]
    async fn reset_empties_the_index() -> Result<(), SearchError> {
        let index = index();
        index
            .add_documents(&[document("fold equity", 0, ContentType::Text)])
            .await?;
        index.reset_collection().await?;

        assert!(index.is_empty());
        assert!(index
            .similarity_search("fold equity", 3, ContentType::Text)
            .await?
            .is_empty());
        Ok(())
    }
}
