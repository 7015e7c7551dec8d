// vesper_core/src/repo.rs
use crate::domain::{ChunkRecord, FileRecord, NewChunk, NewFile};
use crate::error::Result;

/// Durable File/Chunk index. Implementations guarantee that a chunk batch is
/// visible all-or-nothing and that chunks never exist without their file.
pub trait MetadataStore: Send + Sync {
    /// Insert and commit a File Record; returns its id.
    fn create_file(&self, file: &NewFile) -> Result<i64>;

    /// Commit the complete chunk set of `file_id` in one transaction.
    fn append_chunks(&self, file_id: i64, chunks: &[NewChunk]) -> Result<()>;

    fn list_files(&self) -> Result<Vec<FileRecord>>;

    /// Chunks of one file ordered by sequence index.
    fn chunks_for(&self, file_id: i64) -> Result<Vec<ChunkRecord>>;

    /// Delete a File Record and, by cascade, its chunks.
    fn purge_file(&self, file_id: i64) -> Result<()>;

    /// Flush and release the underlying handle.
    fn close(self: Box<Self>) -> Result<()>;
}
