pub mod chat;
pub mod chunking;
pub mod document;
pub mod embeddings;
pub mod endpoint;
pub mod error;
pub mod extractor;
mod fonts;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod retriever;
pub mod status;
pub mod stores;
pub mod tables;
pub mod traits;

pub use chat::{
    AssistantReply, ChatModel, ChatSession, ChatSettings, Conversation, Focus, GenerationRequest,
    GroundingMode, OpenAiChatModel, ResponseStyle, TokenStream, Turn,
};
pub use chunking::{
    ChunkStrategy, Chunker, ChunkingOptions, TiktokenTokenizer, Tokenizer, DEFAULT_EMBEDDING_MODEL,
};
pub use document::{DocumentRecord, Stage, StageStatus};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    EMBEDDING_BATCH_SIZE,
};
pub use error::{ChatError, ErrorKind, IngestError, SearchError};
pub use extractor::{
    ExtractedDocument, ExtractionStrategy, LayoutAwareExtractor, PdfExtractor, SimpleExtractor,
};
pub use models::{
    ChunkSpan, ChunkUnit, ContentType, IndexDocument, PageUnit, RetrievalCandidate, SpanUnit,
    TableUnit, UnitMetadata,
};
pub use normalizer::normalize_text;
pub use pipeline::{
    discover_pdf_files, BatchProgress, BatchReport, FailedPdf, FileOutcome, PipelineConfig,
    PipelineCoordinator,
};
pub use retriever::{Retriever, NO_RELEVANT_SOURCES};
pub use status::StatusStore;
pub use stores::{InMemoryIndex, QdrantStore};
pub use traits::VectorIndex;
