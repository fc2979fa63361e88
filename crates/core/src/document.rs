use crate::chunking::Chunker;
use crate::error::IngestError;
use crate::extractor::{write_table_artifact, PdfExtractor};
use crate::models::{ChunkUnit, IndexDocument, PageUnit, TableUnit};
use crate::normalizer::normalize_text;
use crate::traits::VectorIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Load,
    Clean,
    Chunk,
    Annotate,
    Vectorize,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Load,
        Stage::Clean,
        Stage::Chunk,
        Stage::Annotate,
        Stage::Vectorize,
    ];

    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::Load => None,
            Stage::Clean => Some(Stage::Load),
            Stage::Chunk => Some(Stage::Clean),
            Stage::Annotate => Some(Stage::Chunk),
            Stage::Vectorize => Some(Stage::Annotate),
        }
    }

    pub fn flag_name(self) -> &'static str {
        match self {
            Stage::Load => "loaded",
            Stage::Clean => "cleaned",
            Stage::Chunk => "chunked",
            Stage::Annotate => "annotated",
            Stage::Vectorize => "vectorized",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Clean => "clean",
            Stage::Chunk => "chunk",
            Stage::Annotate => "annotate",
            Stage::Vectorize => "vectorize",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Stage {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "load" => Ok(Stage::Load),
            "clean" => Ok(Stage::Clean),
            "chunk" => Ok(Stage::Chunk),
            "annotate" => Ok(Stage::Annotate),
            "vectorize" => Ok(Stage::Vectorize),
            other => Err(IngestError::Configuration(format!("unknown stage: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageStatus {
    #[serde(default)]
    pub loaded: bool,
    #[serde(default)]
    pub cleaned: bool,
    #[serde(default)]
    pub chunked: bool,
    #[serde(default)]
    pub annotated: bool,
    #[serde(default)]
    pub vectorized: bool,
}

impl StageStatus {
    pub fn is_complete(&self, stage: Stage) -> bool {
        match stage {
            Stage::Load => self.loaded,
            Stage::Clean => self.cleaned,
            Stage::Chunk => self.chunked,
            Stage::Annotate => self.annotated,
            Stage::Vectorize => self.vectorized,
        }
    }

    fn mark(&mut self, stage: Stage) {
        match stage {
            Stage::Load => self.loaded = true,
            Stage::Clean => self.cleaned = true,
            Stage::Chunk => self.chunked = true,
            Stage::Annotate => self.annotated = true,
            Stage::Vectorize => self.vectorized = true,
        }
    }

    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|stage| !self.is_complete(*stage))
    }

    pub fn as_flags(&self) -> [bool; 5] {
        [
            self.loaded,
            self.cleaned,
            self.chunked,
            self.annotated,
            self.vectorized,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct DocumentRecord {
    file_name: String,
    path: PathBuf,
    status: StageStatus,
    pub pages: Vec<PageUnit>,
    pub tables: Vec<TableUnit>,
    pub chunks: Vec<ChunkUnit>,
}

impl DocumentRecord {
    pub fn new(file_name: impl Into<String>, documents_dir: &Path) -> Self {
        let file_name = file_name.into();
        Self {
            path: documents_dir.join(&file_name),
            file_name,
            status: StageStatus::default(),
            pages: Vec::new(),
            tables: Vec::new(),
            chunks: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: StageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> StageStatus {
        self.status
    }

    fn ensure_ready(&self, stage: Stage) -> Result<(), IngestError> {
        if let Some(previous) = stage.previous() {
            if !self.status.is_complete(previous) {
                return Err(IngestError::Precondition {
                    file: self.file_name.clone(),
                    stage,
                    required: previous.flag_name(),
                });
            }
        }

        if self.status.is_complete(stage) {
            return Err(IngestError::AlreadyComplete {
                file: self.file_name.clone(),
                stage,
            });
        }

        Ok(())
    }

    fn complete(&mut self, stage: Stage, message: impl fmt::Display) {
        self.status.mark(stage);
        info!(file = %self.file_name, stage = %stage, "[{}] {}", self.file_name, message);
    }

    pub fn load(
        &mut self,
        extractor: &dyn PdfExtractor,
        tables_dir: &Path,
    ) -> Result<(), IngestError> {
        self.ensure_ready(Stage::Load)?;
        info!(file = %self.file_name, strategy = extractor.name(), "[{}] pdf load", self.file_name);

        let extracted = match extractor.extract(&self.path) {
            Ok(extracted) => extracted,
            Err(reason) => {
                error!(file = %self.file_name, %reason, "error with loading the pdf");
                return Err(IngestError::Extraction {
                    file: self.file_name.clone(),
                    reason: reason.to_string(),
                });
            }
        };

        for table in &extracted.tables {
            let page_label = table.metadata.page_label;
            if let Err(io_error) =
                write_table_artifact(tables_dir, &self.file_name, page_label, &table.content)
            {
                error!(file = %self.file_name, page_label, error = %io_error, "error writing table artifact");
                return Err(IngestError::Io(io_error));
            }
        }

        self.pages = extracted.pages;
        self.tables = extracted.tables;
        self.chunks.clear();
        let message = format!(
            "pdf load done: {} text pages, {} tables",
            self.pages.len(),
            self.tables.len()
        );
        self.complete(Stage::Load, message);
        Ok(())
    }

    pub fn clean(&mut self) -> Result<(), IngestError> {
        self.ensure_ready(Stage::Clean)?;

        let cleaned = self
            .pages
            .iter()
            .map(|page| PageUnit {
                content: normalize_text(&page.content),
                metadata: page.metadata.clone(),
            })
            .collect();

        self.pages = cleaned;
        self.complete(Stage::Clean, "pdf cleaning done");
        Ok(())
    }

    pub fn chunk(&mut self, chunker: &Chunker) -> Result<(), IngestError> {
        self.ensure_ready(Stage::Chunk)?;

        let chunks = match chunker.split_pages(&self.pages) {
            Ok(chunks) => chunks,
            Err(chunk_error) => {
                error!(file = %self.file_name, error = %chunk_error, "error with chunking the pdf");
                return Err(chunk_error);
            }
        };

        self.chunks = chunks;
        let message = format!("pdf chunked into {} chunks", self.chunks.len());
        self.complete(Stage::Chunk, message);
        Ok(())
    }

    /// Extension point for chunk enrichment. Currently flips the flag only.
    pub fn annotate(&mut self) -> Result<(), IngestError> {
        self.ensure_ready(Stage::Annotate)?;
        self.complete(Stage::Annotate, "pdf annotated");
        Ok(())
    }

    pub fn index_documents(&self) -> Vec<IndexDocument> {
        self.chunks
            .iter()
            .map(IndexDocument::from)
            .chain(self.tables.iter().map(IndexDocument::from))
            .collect()
    }

    pub async fn vectorize<V>(&mut self, index: &V) -> Result<(), IngestError>
    where
        V: VectorIndex + ?Sized,
    {
        self.ensure_ready(Stage::Vectorize)?;

        let documents = self.index_documents();
        if let Err(index_error) = index.add_documents(&documents).await {
            error!(file = %self.file_name, error = %index_error, "error with vectorizing and storing the pdf");
            return Err(IngestError::Index(index_error));
        }

        let message = format!("pdf vectorized and stored: {} documents", documents.len());
        self.complete(Stage::Vectorize, message);
        Ok(())
    }
}
