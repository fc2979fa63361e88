use crate::models::{ContentType, RetrievalCandidate};
use crate::traits::VectorIndex;
use crate::SearchError;
use tracing::debug;

pub const TABLE_K: usize = 1;
pub const TEXT_K: usize = 3;
pub const TABLE_SCORE_MAX: f64 = 0.40;
pub const TEXT_SCORE_MAX: f64 = 0.50;

/// Context returned when no candidate passes its threshold.
pub const NO_RELEVANT_SOURCES: &str = "No relevant sources.";

pub struct Retriever<'a, V: VectorIndex + ?Sized> {
    index: &'a V,
}

impl<'a, V: VectorIndex + ?Sized> Retriever<'a, V> {
    pub fn new(index: &'a V) -> Self {
        Self { index }
    }

    /// Surviving candidates, tables first, each group in index order.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievalCandidate>, SearchError> {
        let (tables, texts) = tokio::try_join!(
            self.index
                .similarity_search(query, TABLE_K, ContentType::Table),
            self.index.similarity_search(query, TEXT_K, ContentType::Text)
        )?;

        let tables = within_threshold(tables, TABLE_SCORE_MAX);
        let texts = within_threshold(texts, TEXT_SCORE_MAX);
        debug!(tables = tables.len(), texts = texts.len(), "retrieved context");

        Ok(tables.into_iter().chain(texts).collect())
    }

    pub async fn context(&self, query: &str) -> Result<String, SearchError> {
        let candidates = self.retrieve(query).await?;
        Ok(render_context(&candidates))
    }
}

fn within_threshold(candidates: Vec<RetrievalCandidate>, max_score: f64) -> Vec<RetrievalCandidate> {
    candidates
        .into_iter()
        .filter(|candidate| candidate.score <= max_score)
        .collect()
}

pub fn format_candidate(candidate: &RetrievalCandidate) -> String {
    let metadata = &candidate.document.metadata;
    format!(
        "[{} - Page {}]: {}",
        metadata.source_name(),
        metadata.page_label,
        candidate.document.content
    )
}

pub fn render_context(candidates: &[RetrievalCandidate]) -> String {
    if candidates.is_empty() {
        return NO_RELEVANT_SOURCES.to_string();
    }
    candidates
        .iter()
        .map(format_candidate)
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{IndexDocument, UnitMetadata};
    use async_trait::async_trait;

    /// Returns canned hits per content type, ignoring the query.
    pub(crate) struct CannedIndex {
        pub tables: Vec<RetrievalCandidate>,
        pub texts: Vec<RetrievalCandidate>,
    }

    #[async_trait]
    impl VectorIndex for CannedIndex {
        async fn add_documents(&self, _documents: &[IndexDocument]) -> Result<(), SearchError> {
            Ok(())
        }

        async fn similarity_search(
            &self,
            _query: &str,
            k: usize,
            content_type: ContentType,
        ) -> Result<Vec<RetrievalCandidate>, SearchError> {
            let hits = match content_type {
                ContentType::Table => &self.tables,
                ContentType::Text => &self.texts,
            };
            Ok(hits.iter().take(k).cloned().collect())
        }

        async fn reset_collection(&self) -> Result<(), SearchError> {
            Ok(())
        }
    }

    pub(crate) fn candidate(
        content: &str,
        page: u32,
        content_type: ContentType,
        score: f64,
    ) -> RetrievalCandidate {
        RetrievalCandidate {
            document: IndexDocument {
                content: content.to_string(),
                metadata: UnitMetadata::new(page, "/data/pdfs/strategy.pdf", content_type),
            },
            score,
        }
    }

    #[tokio::test]
    async fn score_equal_to_threshold_is_kept() -> Result<(), SearchError> {
        let index = CannedIndex {
            tables: vec![candidate("table", 1, ContentType::Table, TABLE_SCORE_MAX)],
            texts: vec![
                candidate("kept", 0, ContentType::Text, TEXT_SCORE_MAX),
                candidate("dropped", 2, ContentType::Text, TEXT_SCORE_MAX + 1e-9),
            ],
        };

        let hits = Retriever::new(&index).retrieve("odds").await?;
        let contents = hits
            .iter()
            .map(|hit| hit.document.content.as_str())
            .collect::<Vec<_>>();

        assert_eq!(contents, vec!["table", "kept"]);
        Ok(())
    }

    #[tokio::test]
    async fn tables_are_listed_before_text_regardless_of_score() -> Result<(), SearchError> {
        let index = CannedIndex {
            tables: vec![candidate("| Hand | Equity |", 1, ContentType::Table, 0.39)],
            texts: vec![
                candidate("first text", 0, ContentType::Text, 0.01),
                candidate("second text", 2, ContentType::Text, 0.2),
            ],
        };

        let context = Retriever::new(&index).context("equity").await?;

        assert_eq!(
            context,
            "[strategy.pdf - Page 2]: | Hand | Equity |\n\n\
             [strategy.pdf - Page 1]: first text\n\n\
             [strategy.pdf - Page 3]: second text"
        );
        Ok(())
    }

    #[tokio::test]
    async fn only_top_k_of_each_type_is_considered() -> Result<(), SearchError> {
        let index = CannedIndex {
            tables: vec![
                candidate("t1", 0, ContentType::Table, 0.1),
                candidate("t2", 0, ContentType::Table, 0.1),
            ],
            texts: (0..5)
                .map(|page| candidate("text", page, ContentType::Text, 0.1))
                .collect(),
        };

        let hits = Retriever::new(&index).retrieve("q").await?;
        assert_eq!(hits.len(), TABLE_K + TEXT_K);
        Ok(())
    }

    #[tokio::test]
    async fn nothing_under_threshold_yields_the_sentinel() -> Result<(), SearchError> {
        let index = CannedIndex {
            tables: vec![candidate("table", 0, ContentType::Table, 0.41)],
            texts: vec![candidate("text", 0, ContentType::Text, 0.9)],
        };

        let context = Retriever::new(&index).context("anything").await?;
        assert_eq!(context, NO_RELEVANT_SOURCES);
        Ok(())
    }
}
