pub mod memory;
pub mod qdrant;

pub use memory::InMemoryIndex;
pub use qdrant::QdrantStore;

use crate::models::IndexDocument;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Stable point id: re-adding the same unit overwrites instead of duplicating.
pub fn point_id(document: &IndexDocument) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(document.metadata.source.as_bytes());
    hasher.update(document.metadata.page.to_le_bytes());
    hasher.update(document.metadata.content_type.as_str().as_bytes());
    hasher.update(document.content.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}
