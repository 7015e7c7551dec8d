use crate::domain::{FileRecord, FileRow};
use crate::error::Result;
use crate::repo::MetadataStore;

impl From<FileRecord> for FileRow {
    fn from(f: FileRecord) -> Self {
        FileRow {
            id: f.id,
            name: f.name,
            is_dir: f.is_dir,
            chunks: f.chunk_count,
            encoded_len: f.encoded_len,
            created_at: f.created_at,
        }
    }
}

/// Every record in index order. Names are stored in the clear, so listing
/// needs no passphrase.
pub fn list(index: &dyn MetadataStore) -> Result<Vec<FileRow>> {
    Ok(index.list_files()?.into_iter().map(FileRow::from).collect())
}
