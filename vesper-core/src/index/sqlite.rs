//! SQLite-backed File/Chunk index.
//!
//! One connection behind a mutex; every write is its own transaction, so a
//! chunk batch is committed all-or-nothing and readers never observe a
//! partial set.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use time::OffsetDateTime;

use crate::codec::CodecId;
use crate::crypto::cipher::{BLOCK_LEN, Iv};
use crate::domain::{ChunkRecord, FileRecord, NewChunk, NewFile};
use crate::error::{Result, VesperError};
use crate::repo::MetadataStore;

const SCHEMA_VERSION: i64 = 1;

pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open or create the index file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        let idx = Self {
            conn: Mutex::new(conn),
        };
        idx.migrate()?;
        Ok(idx)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VesperError::integrity("index connection lock poisoned"))
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;
        let current: i64 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        if current > SCHEMA_VERSION {
            return Err(VesperError::config(format!(
                "index schema v{current} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if current < 1 {
            migrate_v1(&conn)?;
        }
        Ok(())
    }
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS file (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            is_dir INTEGER NOT NULL,
            probe_plain TEXT NOT NULL,
            probe_cipher BLOB NOT NULL,
            file_iv BLOB NOT NULL,
            codec INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL,
            encoded_len INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chunk (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES file(id) ON DELETE CASCADE,
            seq INTEGER NOT NULL,
            wrapped_key BLOB NOT NULL,
            wrapped_name BLOB NOT NULL,
            plain_len INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            UNIQUE (file_id, seq)
        );

        INSERT OR REPLACE INTO schema_version (version) VALUES (1);
        "#,
    )?;
    Ok(())
}

fn to_i64(v: u64, what: &str) -> Result<i64> {
    i64::try_from(v).map_err(|_| VesperError::integrity(format!("{what} out of range: {v}")))
}

fn to_u64(v: i64, what: &str) -> Result<u64> {
    u64::try_from(v).map_err(|_| VesperError::integrity(format!("negative {what}: {v}")))
}

struct RawFile {
    id: i64,
    name: String,
    is_dir: bool,
    probe_plain: String,
    probe_cipher: Vec<u8>,
    file_iv: Vec<u8>,
    codec: i64,
    chunk_count: i64,
    encoded_len: i64,
    created_at: i64,
}

impl RawFile {
    fn into_record(self) -> Result<FileRecord> {
        let file_iv: Iv = self.file_iv.as_slice().try_into().map_err(|_| {
            VesperError::integrity(format!(
                "file {}: IV must be {BLOCK_LEN} bytes, got {}",
                self.name,
                self.file_iv.len()
            ))
        })?;
        let codec = u8::try_from(self.codec)
            .map_err(|_| VesperError::integrity(format!("file {}: bad codec", self.name)))
            .and_then(CodecId::try_from)?;
        Ok(FileRecord {
            id: self.id,
            name: self.name,
            is_dir: self.is_dir,
            probe_plain: self.probe_plain,
            probe_cipher: self.probe_cipher,
            file_iv,
            codec,
            chunk_count: to_u64(self.chunk_count, "chunk_count")?,
            encoded_len: to_u64(self.encoded_len, "encoded_len")?,
            created_at: self.created_at,
        })
    }
}

impl MetadataStore for SqliteIndex {
    fn create_file(&self, file: &NewFile) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO file (name, is_dir, probe_plain, probe_cipher, file_iv, codec,
                               chunk_count, encoded_len, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                file.name,
                file.is_dir,
                file.probe_plain,
                file.probe_cipher,
                &file.file_iv[..],
                file.codec as u8 as i64,
                to_i64(file.chunk_count, "chunk_count")?,
                to_i64(file.encoded_len, "encoded_len")?,
                file.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn append_chunks(&self, file_id: i64, chunks: &[NewChunk]) -> Result<()> {
        for (i, c) in chunks.iter().enumerate() {
            if c.seq != i as u64 {
                return Err(VesperError::integrity(format!(
                    "chunk batch for file {file_id} is not contiguous at position {i}"
                )));
            }
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let expected: Option<i64> = tx
            .query_row(
                "SELECT chunk_count FROM file WHERE id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .optional()?;
        let expected = expected
            .ok_or_else(|| VesperError::integrity(format!("no file record {file_id}")))?;
        if to_u64(expected, "chunk_count")? != chunks.len() as u64 {
            return Err(VesperError::integrity(format!(
                "file {file_id} expects {expected} chunks, batch has {}",
                chunks.len()
            )));
        }
        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM chunk WHERE file_id = ?1",
            params![file_id],
            |row| row.get(0),
        )?;
        if existing != 0 {
            return Err(VesperError::integrity(format!(
                "file {file_id} already has committed chunks"
            )));
        }

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunk (file_id, seq, wrapped_key, wrapped_name, plain_len, checksum)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for c in chunks {
                stmt.execute(params![
                    file_id,
                    to_i64(c.seq, "seq")?,
                    c.wrapped_key,
                    c.wrapped_name,
                    to_i64(c.plain_len, "plain_len")?,
                    c.checksum,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, is_dir, probe_plain, probe_cipher, file_iv, codec,
                    chunk_count, encoded_len, created_at
             FROM file ORDER BY id",
        )?;
        let raws = stmt
            .query_map([], |row| {
                Ok(RawFile {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    is_dir: row.get(2)?,
                    probe_plain: row.get(3)?,
                    probe_cipher: row.get(4)?,
                    file_iv: row.get(5)?,
                    codec: row.get(6)?,
                    chunk_count: row.get(7)?,
                    encoded_len: row.get(8)?,
                    created_at: row.get(9)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raws.into_iter().map(RawFile::into_record).collect()
    }

    fn chunks_for(&self, file_id: i64) -> Result<Vec<ChunkRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, file_id, seq, wrapped_key, wrapped_name, plain_len, checksum
             FROM chunk WHERE file_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![file_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                    row.get::<_, Vec<u8>>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(
                |(id, file_id, seq, wrapped_key, wrapped_name, plain_len, checksum)| {
                    Ok(ChunkRecord {
                        id,
                        file_id,
                        seq: to_u64(seq, "seq")?,
                        wrapped_key,
                        wrapped_name,
                        plain_len: to_u64(plain_len, "plain_len")?,
                        checksum,
                    })
                },
            )
            .collect()
    }

    fn purge_file(&self, file_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM file WHERE id = ?1", params![file_id])?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| VesperError::integrity("index connection lock poisoned"))?;
        conn.close().map_err(|(_, e)| VesperError::Index(e))
    }
}

pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_file(name: &str, chunk_count: u64) -> NewFile {
        NewFile {
            name: name.to_string(),
            is_dir: false,
            probe_plain: "p".repeat(16),
            probe_cipher: vec![1u8; 16],
            file_iv: [2u8; 16],
            codec: CodecId::Hex,
            chunk_count,
            encoded_len: chunk_count * 32,
            created_at: 0,
        }
    }

    fn chunk(seq: u64) -> NewChunk {
        NewChunk {
            seq,
            wrapped_key: vec![seq as u8; 32],
            wrapped_name: vec![9u8; 32],
            plain_len: 32,
            checksum: "00".repeat(32),
        }
    }

    #[test]
    fn create_and_list() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        let a = idx.create_file(&new_file("a.txt", 0)).unwrap();
        let b = idx.create_file(&new_file("dir/b.txt", 2)).unwrap();
        let files = idx.list_files().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, a);
        assert_eq!(files[1].id, b);
        assert_eq!(files[1].name, "dir/b.txt");
        assert_eq!(files[1].file_iv, [2u8; 16]);
        assert_eq!(files[1].codec, CodecId::Hex);
    }

    #[test]
    fn chunks_come_back_in_sequence_order() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        let id = idx.create_file(&new_file("f", 3)).unwrap();
        idx.append_chunks(id, &[chunk(0), chunk(1), chunk(2)]).unwrap();
        let got = idx.chunks_for(id).unwrap();
        assert_eq!(got.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(got[2].wrapped_key, vec![2u8; 32]);
    }

    #[test]
    fn gapped_batch_is_rejected_and_nothing_is_visible() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        let id = idx.create_file(&new_file("f", 2)).unwrap();
        let err = idx.append_chunks(id, &[chunk(0), chunk(2)]).unwrap_err();
        assert!(matches!(err, VesperError::Integrity(_)));
        assert!(idx.chunks_for(id).unwrap().is_empty());
    }

    #[test]
    fn short_batch_is_rejected() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        let id = idx.create_file(&new_file("f", 3)).unwrap();
        assert!(idx.append_chunks(id, &[chunk(0), chunk(1)]).is_err());
        assert!(idx.chunks_for(id).unwrap().is_empty());
    }

    #[test]
    fn second_batch_is_rejected() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        let id = idx.create_file(&new_file("f", 1)).unwrap();
        idx.append_chunks(id, &[chunk(0)]).unwrap();
        assert!(idx.append_chunks(id, &[chunk(0)]).is_err());
        assert_eq!(idx.chunks_for(id).unwrap().len(), 1);
    }

    #[test]
    fn chunks_cannot_precede_their_file() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        assert!(idx.append_chunks(42, &[chunk(0)]).is_err());
    }

    #[test]
    fn purge_cascades_to_chunks() {
        let idx = SqliteIndex::open_in_memory().unwrap();
        let id = idx.create_file(&new_file("f", 2)).unwrap();
        idx.append_chunks(id, &[chunk(0), chunk(1)]).unwrap();
        idx.purge_file(id).unwrap();
        assert!(idx.list_files().unwrap().is_empty());
        assert!(idx.chunks_for(id).unwrap().is_empty());
        let conn = idx.conn().unwrap();
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunk", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn file_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data.sqlite");
        {
            let idx = SqliteIndex::open(&path).unwrap();
            let id = idx.create_file(&new_file("kept", 1)).unwrap();
            idx.append_chunks(id, &[chunk(0)]).unwrap();
            Box::new(idx).close().unwrap();
        }
        let idx = SqliteIndex::open(&path).unwrap();
        let files = idx.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(idx.chunks_for(files[0].id).unwrap().len(), 1);
    }
}
