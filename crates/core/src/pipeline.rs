use crate::chunking::{ChunkStrategy, Chunker, ChunkingOptions, DEFAULT_EMBEDDING_MODEL};
use crate::document::{DocumentRecord, Stage, StageStatus};
use crate::error::IngestError;
use crate::extractor::ExtractionStrategy;
use crate::status::StatusStore;
use crate::traits::VectorIndex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub documents_dir: PathBuf,
    pub tables_dir: PathBuf,
    pub status_file: PathBuf,
    pub embedding_model: String,
    pub chunk_strategy: ChunkStrategy,
    pub chunking: ChunkingOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("data/pdfs"),
            tables_dir: PathBuf::from("data/tables"),
            status_file: PathBuf::from("data/status.json"),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chunk_strategy: ChunkStrategy::default(),
            chunking: ChunkingOptions::default(),
        }
    }
}

/// PDF file names directly inside `folder`, sorted. Subdirectories are not
/// searched.
pub fn discover_pdf_files(folder: &Path) -> Vec<String> {
    let mut files = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect::<Vec<_>>();

    files.sort_unstable();
    files
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Completed,
    Skipped,
    Failed(String),
}

/// Reported after each file of a batch. `index` is one-based.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    pub index: usize,
    pub total: usize,
    pub file_name: &'a str,
    pub outcome: &'a FileOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPdf {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<FailedPdf>,
}

pub struct PipelineCoordinator {
    config: PipelineConfig,
    status_store: StatusStore,
    chunker: Chunker,
    index: Arc<dyn VectorIndex>,
    records: BTreeMap<String, DocumentRecord>,
}

fn lookup_mut<'a>(
    records: &'a mut BTreeMap<String, DocumentRecord>,
    file_name: &str,
) -> Result<&'a mut DocumentRecord, IngestError> {
    records
        .get_mut(file_name)
        .ok_or_else(|| IngestError::UnknownDocument(file_name.to_string()))
}

impl PipelineCoordinator {
    pub fn new(config: PipelineConfig, index: Arc<dyn VectorIndex>) -> Result<Self, IngestError> {
        let chunker = Chunker::for_strategy(
            config.chunk_strategy,
            &config.embedding_model,
            config.chunking,
        )?;
        Self::with_chunker(config, chunker, index)
    }

    pub fn with_chunker(
        config: PipelineConfig,
        chunker: Chunker,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self, IngestError> {
        fs::create_dir_all(&config.documents_dir)?;
        fs::create_dir_all(&config.tables_dir)?;

        let mut coordinator = Self {
            status_store: StatusStore::new(&config.status_file),
            config,
            chunker,
            index,
            records: BTreeMap::new(),
        };
        coordinator.refresh();
        Ok(coordinator)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn index(&self) -> Arc<dyn VectorIndex> {
        Arc::clone(&self.index)
    }

    pub fn refresh(&mut self) {
        let persisted = self.status_store.load();
        for file_name in discover_pdf_files(&self.config.documents_dir) {
            if self.records.contains_key(&file_name) {
                continue;
            }
            let status = persisted.get(&file_name).copied().unwrap_or_default();
            let record = DocumentRecord::new(file_name.clone(), &self.config.documents_dir)
                .with_status(status);
            self.records.insert(file_name, record);
        }
    }

    pub fn documents(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn record(&self, file_name: &str) -> Result<&DocumentRecord, IngestError> {
        self.records
            .get(file_name)
            .ok_or_else(|| IngestError::UnknownDocument(file_name.to_string()))
    }

    pub fn status_table(&self) -> Vec<(String, StageStatus)> {
        self.records
            .iter()
            .map(|(name, record)| (name.clone(), record.status()))
            .collect()
    }

    pub fn next_stage(&self, file_name: &str) -> Result<Option<Stage>, IngestError> {
        Ok(self.record(file_name)?.status().next_stage())
    }

    pub fn default_selection(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, record)| !record.status().vectorized)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn load(&mut self, file_name: &str, strategy: ExtractionStrategy) -> Result<(), IngestError> {
        let extractor = strategy.extractor();
        let record = lookup_mut(&mut self.records, file_name)?;
        record.load(extractor.as_ref(), &self.config.tables_dir)
    }

    pub fn clean(&mut self, file_name: &str) -> Result<(), IngestError> {
        lookup_mut(&mut self.records, file_name)?.clean()
    }

    pub fn chunk(&mut self, file_name: &str) -> Result<(), IngestError> {
        let record = lookup_mut(&mut self.records, file_name)?;
        record.chunk(&self.chunker)
    }

    pub fn annotate(&mut self, file_name: &str) -> Result<(), IngestError> {
        lookup_mut(&mut self.records, file_name)?.annotate()
    }

    /// Pushes the document to the index, then persists its flags. This is
    /// the only point where status reaches the status file.
    pub async fn vectorize(&mut self, file_name: &str) -> Result<(), IngestError> {
        let record = lookup_mut(&mut self.records, file_name)?;
        record.vectorize(self.index.as_ref()).await?;

        if let Err(save_error) = self.status_store.save(file_name, record.status()) {
            error!(file = file_name, error = %save_error, "error saving status file");
        }
        Ok(())
    }

    pub async fn run_stage(
        &mut self,
        file_name: &str,
        stage: Stage,
        strategy: ExtractionStrategy,
    ) -> Result<(), IngestError> {
        match stage {
            Stage::Load => self.load(file_name, strategy),
            Stage::Clean => self.clean(file_name),
            Stage::Chunk => self.chunk(file_name),
            Stage::Annotate => self.annotate(file_name),
            Stage::Vectorize => self.vectorize(file_name).await,
        }
    }

    pub async fn run_through(
        &mut self,
        file_name: &str,
        through: Stage,
        strategy: ExtractionStrategy,
    ) -> Result<(), IngestError> {
        while let Some(stage) = self.next_stage(file_name)? {
            if stage > through {
                break;
            }
            self.run_stage(file_name, stage, strategy).await?;
        }
        Ok(())
    }

    /// Processes `selection` one file at a time through vectorization. A
    /// failing file keeps its last completed stage and the batch moves on.
    pub async fn process_all<F>(
        &mut self,
        selection: &[String],
        strategy: ExtractionStrategy,
        mut on_progress: F,
    ) -> BatchReport
    where
        F: FnMut(BatchProgress<'_>),
    {
        let total = selection.len();
        let mut report = BatchReport::default();

        for (position, file_name) in selection.iter().enumerate() {
            let outcome = match self.next_stage(file_name) {
                Ok(None) => FileOutcome::Skipped,
                Ok(Some(_)) => match self.run_through(file_name, Stage::Vectorize, strategy).await {
                    Ok(()) => FileOutcome::Completed,
                    Err(reason) => FileOutcome::Failed(reason.to_string()),
                },
                Err(reason) => FileOutcome::Failed(reason.to_string()),
            };

            match &outcome {
                FileOutcome::Completed => report.completed.push(file_name.clone()),
                FileOutcome::Skipped => report.skipped.push(file_name.clone()),
                FileOutcome::Failed(reason) => {
                    warn!(file = %file_name, %reason, "error processing {}", file_name);
                    report.failed.push(FailedPdf {
                        file_name: file_name.clone(),
                        reason: reason.clone(),
                    });
                }
            }

            on_progress(BatchProgress {
                index: position + 1,
                total,
                file_name,
                outcome: &outcome,
            });
        }

        info!(
            completed = report.completed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "process all documents done"
        );
        report
    }

    pub async fn reset(&mut self) -> Result<(), IngestError> {
        self.status_store.clear()?;
        clear_directory(&self.config.tables_dir)?;
        self.index.reset_collection().await?;

        self.records.clear();
        self.refresh();
        info!("cleared all documents");
        Ok(())
    }
}

fn clear_directory(dir: &Path) -> Result<(), IngestError> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::ErrorKind;
    use crate::extractor::test_pdf::{write_pdf, write_sample_with_table};
    use crate::models::ContentType;
    use crate::stores::InMemoryIndex;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _root: TempDir,
        config: PipelineConfig,
        index: Arc<InMemoryIndex>,
    }

    impl Fixture {
        fn new() -> Result<Self, Box<dyn std::error::Error>> {
            let root = tempdir()?;
            let config = PipelineConfig {
                documents_dir: root.path().join("pdfs"),
                tables_dir: root.path().join("tables"),
                status_file: root.path().join("status.json"),
                chunk_strategy: ChunkStrategy::Character,
                ..PipelineConfig::default()
            };
            fs::create_dir_all(&config.documents_dir)?;
            Ok(Self {
                _root: root,
                config,
                index: Arc::new(InMemoryIndex::new(Arc::new(
                    CharacterNgramEmbedder::default(),
                ))),
            })
        }

        fn pdf(&self, name: &str) -> PathBuf {
            self.config.documents_dir.join(name)
        }

        fn coordinator(&self) -> Result<PipelineCoordinator, IngestError> {
            PipelineCoordinator::new(self.config.clone(), self.index.clone())
        }
    }

    const LAYOUT: ExtractionStrategy = ExtractionStrategy::LayoutAware;

    #[test]
    fn discovery_is_flat_sorted_and_pdf_only() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("b.pdf"), b"%PDF-1.4")?;
        fs::write(dir.path().join("a.PDF"), b"%PDF-1.4")?;
        fs::write(dir.path().join("notes.txt"), b"notes")?;
        fs::write(nested.join("c.pdf"), b"%PDF-1.4")?;

        assert_eq!(discover_pdf_files(dir.path()), vec!["a.PDF", "b.pdf"]);
        Ok(())
    }

    #[test]
    fn initialisation_creates_missing_directories() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        fs::remove_dir_all(&fixture.config.documents_dir)?;

        let coordinator = fixture.coordinator()?;

        assert!(fixture.config.documents_dir.is_dir());
        assert!(fixture.config.tables_dir.is_dir());
        assert_eq!(coordinator.documents().count(), 0);
        Ok(())
    }

    #[test]
    fn out_of_order_stage_is_rejected_without_mutation() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        write_sample_with_table(&fixture.pdf("guide.pdf"))?;
        let mut coordinator = fixture.coordinator()?;

        let error = coordinator.chunk("guide.pdf").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::PreconditionViolation);
        assert_eq!(coordinator.record("guide.pdf")?.status(), StageStatus::default());

        let unknown = coordinator.clean("missing.pdf").unwrap_err();
        assert!(matches!(unknown, IngestError::UnknownDocument(_)));
        Ok(())
    }

    #[tokio::test]
    async fn layout_aware_load_yields_pages_tables_and_artifact(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        write_sample_with_table(&fixture.pdf("guide.pdf"))?;
        let mut coordinator = fixture.coordinator()?;

        coordinator.load("guide.pdf", LAYOUT)?;

        let record = coordinator.record("guide.pdf")?;
        assert_eq!(record.pages.len(), 3);
        assert_eq!(record.tables.len(), 1);
        assert!(record.pages[1].content.contains("[TABLE 1]"));
        assert!(!record.pages[1].content.contains("85%"));
        assert_eq!(record.tables[0].metadata.content_type, ContentType::Table);
        assert!(fixture.config.tables_dir.join("guide_page_2_table.txt").is_file());
        assert_eq!(coordinator.next_stage("guide.pdf")?, Some(Stage::Clean));
        Ok(())
    }

    #[tokio::test]
    async fn flags_only_move_forward() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        write_sample_with_table(&fixture.pdf("guide.pdf"))?;
        let mut coordinator = fixture.coordinator()?;

        coordinator.load("guide.pdf", LAYOUT)?;
        let repeated = coordinator.load("guide.pdf", LAYOUT).unwrap_err();
        assert!(matches!(repeated, IngestError::AlreadyComplete { .. }));
        assert!(coordinator.chunk("guide.pdf").is_err());

        let status = coordinator.record("guide.pdf")?.status();
        assert_eq!(status.as_flags(), [true, false, false, false, false]);
        Ok(())
    }

    #[tokio::test]
    async fn only_vectorized_status_survives_a_restart() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        write_sample_with_table(&fixture.pdf("done.pdf"))?;
        write_sample_with_table(&fixture.pdf("partial.pdf"))?;

        {
            let mut coordinator = fixture.coordinator()?;
            coordinator
                .run_through("done.pdf", Stage::Vectorize, LAYOUT)
                .await?;
            coordinator
                .run_through("partial.pdf", Stage::Chunk, LAYOUT)
                .await?;
            assert_eq!(coordinator.next_stage("partial.pdf")?, Some(Stage::Annotate));
        }

        let restarted = fixture.coordinator()?;
        assert_eq!(restarted.next_stage("done.pdf")?, None);
        assert_eq!(restarted.record("partial.pdf")?.status(), StageStatus::default());
        assert_eq!(restarted.default_selection(), vec!["partial.pdf".to_string()]);
        assert!(restarted.record("done.pdf")?.pages.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn batch_continues_past_a_corrupt_file() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        fs::write(fixture.pdf("broken.pdf"), b"%PDF-1.4\n%broken")?;
        write_pdf(
            &fixture.pdf("ok.pdf"),
            &[vec![(72, 750, "Position is power at the poker table.")]],
        )?;
        let mut coordinator = fixture.coordinator()?;

        let selection = coordinator.default_selection();
        let mut seen = Vec::new();
        let report = coordinator
            .process_all(&selection, LAYOUT, |progress| {
                seen.push((progress.index, progress.total, progress.file_name.to_string()));
            })
            .await;

        assert_eq!(
            seen,
            vec![(1, 2, "broken.pdf".to_string()), (2, 2, "ok.pdf".to_string())]
        );
        assert_eq!(report.completed, vec!["ok.pdf".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].file_name, "broken.pdf");
        assert_eq!(coordinator.record("broken.pdf")?.status(), StageStatus::default());
        assert!(!fixture.index.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn batch_skips_vectorized_files() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        write_sample_with_table(&fixture.pdf("guide.pdf"))?;
        let mut coordinator = fixture.coordinator()?;
        let selection = vec!["guide.pdf".to_string()];

        let first = coordinator.process_all(&selection, LAYOUT, |_| {}).await;
        let second = coordinator.process_all(&selection, LAYOUT, |_| {}).await;

        assert_eq!(first.completed, selection);
        assert_eq!(second.skipped, selection);
        assert!(second.completed.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn reset_wipes_status_artifacts_and_index() -> Result<(), Box<dyn std::error::Error>> {
        let fixture = Fixture::new()?;
        write_sample_with_table(&fixture.pdf("a.pdf"))?;
        write_sample_with_table(&fixture.pdf("b.pdf"))?;
        let mut coordinator = fixture.coordinator()?;
        let selection = coordinator.default_selection();
        let report = coordinator.process_all(&selection, LAYOUT, |_| {}).await;
        assert_eq!(report.completed.len(), 2);
        assert!(fixture.config.status_file.is_file());

        coordinator.reset().await?;

        assert!(!fixture.config.status_file.exists());
        assert_eq!(fs::read_dir(&fixture.config.tables_dir)?.count(), 0);
        assert!(fixture.index.is_empty());
        assert_eq!(coordinator.default_selection().len(), 2);

        coordinator.reset().await?;
        Ok(())
    }
}
