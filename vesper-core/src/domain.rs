// vesper_core/src/domain.rs
use crate::codec::CodecId;
use crate::crypto::cipher::Iv;

/// File Record as inserted; the index assigns the id.
#[derive(Clone, Debug)]
pub struct NewFile {
    /// Path relative to the input root, `/`-separated.
    pub name: String,
    pub is_dir: bool,
    pub probe_plain: String,
    pub probe_cipher: Vec<u8>,
    pub file_iv: Iv,
    pub codec: CodecId,
    pub chunk_count: u64,
    pub encoded_len: u64,
    pub created_at: i64,
}

#[derive(Clone, Debug)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub is_dir: bool,
    pub probe_plain: String,
    pub probe_cipher: Vec<u8>,
    pub file_iv: Iv,
    pub codec: CodecId,
    pub chunk_count: u64,
    pub encoded_len: u64,
    pub created_at: i64,
}

#[derive(Clone, Debug)]
pub struct NewChunk {
    pub seq: u64,
    pub wrapped_key: Vec<u8>,
    pub wrapped_name: Vec<u8>,
    /// Encoded length of this chunk before padding.
    pub plain_len: u64,
    pub checksum: String,
}

#[derive(Clone, Debug)]
pub struct ChunkRecord {
    pub id: i64,
    pub file_id: i64,
    pub seq: u64,
    pub wrapped_key: Vec<u8>,
    pub wrapped_name: Vec<u8>,
    pub plain_len: u64,
    pub checksum: String,
}

/// Listing row; carries no key material.
#[derive(Clone, Debug)]
pub struct FileRow {
    pub id: i64,
    pub name: String,
    pub is_dir: bool,
    pub chunks: u64,
    pub encoded_len: u64,
    pub created_at: i64,
}
