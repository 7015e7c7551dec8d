use std::path::PathBuf;

use crate::error::Result;
use crate::index::sqlite::SqliteIndex;
use crate::repo::MetadataStore;

pub enum Backend {
    Sqlite(PathBuf),
    Memory,
}

pub fn open_index(backend: Backend) -> Result<Box<dyn MetadataStore>> {
    match backend {
        Backend::Sqlite(path) => Ok(Box::new(SqliteIndex::open(&path)?)),
        Backend::Memory => Ok(Box::new(SqliteIndex::open_in_memory()?)),
    }
}
