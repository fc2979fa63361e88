use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Table,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Table => "table",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitMetadata {
    pub page: u32,
    pub page_label: u32,
    pub source: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
}

impl UnitMetadata {
    pub fn new(page: u32, source: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            page,
            page_label: page + 1,
            source: source.into(),
            content_type,
        }
    }

    pub fn source_name(&self) -> &str {
        Path::new(&self.source)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(&self.source)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageUnit {
    pub content: String,
    pub metadata: UnitMetadata,
}

pub type TableUnit = PageUnit;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpanUnit {
    Token,
    Char,
}

/// Half-open `[start, end)` range inside the source page, in tokens or chars.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkSpan {
    pub unit: SpanUnit,
    pub start: usize,
    pub end: usize,
}

impl ChunkSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkUnit {
    pub content: String,
    pub metadata: UnitMetadata,
    pub span: ChunkSpan,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexDocument {
    pub content: String,
    pub metadata: UnitMetadata,
}

impl From<&ChunkUnit> for IndexDocument {
    fn from(chunk: &ChunkUnit) -> Self {
        Self {
            content: chunk.content.clone(),
            metadata: chunk.metadata.clone(),
        }
    }
}

impl From<&PageUnit> for IndexDocument {
    fn from(unit: &PageUnit) -> Self {
        Self {
            content: unit.content.clone(),
            metadata: unit.metadata.clone(),
        }
    }
}

/// A raw hit from the index. Lower `score` means more similar.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalCandidate {
    pub document: IndexDocument,
    pub score: f64,
}
