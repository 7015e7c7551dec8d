//! Reassembly: every File Record is probe-tested against the supplied
//! master key; matching records are rebuilt from their chunks.
//!
//! A record that does not match is `Excluded`, never an error. A record that
//! matches but cannot be rebuilt exactly (missing chunk, bad checksum, length
//! mismatch) ends `Failed` and the run continues with the next one.

use crate::codec::codec_for;
use crate::config::EngineConfig;
use crate::crypto::cipher::{BLOCK_LEN, BlockCipher, Region, checksum_matches, chunk_key};
use crate::crypto::master::MasterKey;
use crate::domain::{ChunkRecord, FileRecord};
use crate::error::{Result, VesperError};
use crate::repo::MetadataStore;
use crate::secret::is_opaque_name;
use crate::stats::{Failure, RestoreState, RestoreSummary};
use crate::util::paths::safe_join;
use crate::util::pool::build_pool;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Rebuild every file `master` can open into `dest`.
pub fn restore(
    index: &dyn MetadataStore,
    output: &Path,
    dest: &Path,
    master: &MasterKey,
    engine: &EngineConfig,
) -> Result<RestoreSummary> {
    fs::create_dir_all(dest)?;
    let summary = run(index, output, Some(dest), master, engine)?;
    info!(
        files = summary.files,
        dirs = summary.dirs,
        excluded = summary.excluded,
        failed = summary.failed.len(),
        "restore finished"
    );
    Ok(summary)
}

/// Same checks as [`restore`], nothing written.
pub fn verify(
    index: &dyn MetadataStore,
    output: &Path,
    master: &MasterKey,
    engine: &EngineConfig,
) -> Result<RestoreSummary> {
    let summary = run(index, output, None, master, engine)?;
    info!(
        files = summary.files,
        dirs = summary.dirs,
        excluded = summary.excluded,
        failed = summary.failed.len(),
        "verify finished"
    );
    Ok(summary)
}

/// Decrypt the opaque ciphertext filename of one chunk.
pub(crate) fn chunk_name(master: &MasterKey, rec: &FileRecord, chunk: &ChunkRecord) -> Result<String> {
    let raw = master.unwrap(&rec.file_iv, Region::ChunkName, chunk.seq, &chunk.wrapped_name)?;
    String::from_utf8(raw)
        .ok()
        .filter(|n| is_opaque_name(n))
        .ok_or_else(|| VesperError::integrity(format!("chunk {} has no valid stored name", chunk.seq)))
}

fn run(
    index: &dyn MetadataStore,
    output: &Path,
    dest: Option<&Path>,
    master: &MasterKey,
    engine: &EngineConfig,
) -> Result<RestoreSummary> {
    let records = index.list_files()?;
    let mut states = vec![RestoreState::Pending; records.len()];
    let mut summary = RestoreSummary::default();

    // Records sharing a name are rebuilt in index order by one worker, so
    // the newest one lands last.
    let mut dirs = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut slot_of: HashMap<&str, usize> = HashMap::new();

    for (i, rec) in records.iter().enumerate() {
        if !master.probe_matches(rec.file_iv, &rec.probe_plain, &rec.probe_cipher) {
            debug!(name = %rec.name, "probe mismatch, excluded");
            states[i] = RestoreState::Excluded;
            summary.excluded += 1;
            continue;
        }
        states[i] = RestoreState::ProbeTested;
        if rec.is_dir {
            dirs.push(i);
        } else {
            let slot = *slot_of.entry(rec.name.as_str()).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(i);
        }
    }
    debug!(
        records = records.len(),
        excluded = summary.excluded,
        "probe test done"
    );

    for &i in &dirs {
        let rec = &records[i];
        match make_dir(dest, &rec.name) {
            Ok(()) => {
                states[i] = RestoreState::Reassembled;
                summary.dirs += 1;
            }
            Err(e) => {
                warn!(name = %rec.name, error = %e, "directory not restored");
                states[i] = RestoreState::Failed;
                summary.failed.push(Failure {
                    name: rec.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    for &i in groups.iter().flatten() {
        states[i] = RestoreState::Decrypting;
    }

    let reader = ChunkReader { index, output, master };
    let pool = build_pool(engine.workers)?;
    let results: Vec<Vec<(usize, Result<u64>)>> = pool.install(|| {
        groups
            .par_iter()
            .map(|group| {
                group
                    .iter()
                    .map(|&i| (i, reader.restore_file(&records[i], dest)))
                    .collect::<Vec<_>>()
            })
            .collect()
    });

    for (i, res) in results.into_iter().flatten() {
        let rec = &records[i];
        match res {
            Ok(bytes) => {
                states[i] = RestoreState::Reassembled;
                summary.files += 1;
                summary.bytes += bytes;
            }
            Err(e) => {
                warn!(name = %rec.name, error = %e, "file not restored");
                states[i] = RestoreState::Failed;
                summary.failed.push(Failure {
                    name: rec.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    summary.outcomes = records.into_iter().map(|r| r.name).zip(states).collect();
    Ok(summary)
}

fn make_dir(dest: Option<&Path>, name: &str) -> Result<()> {
    let path = safe_join(dest.unwrap_or(Path::new(".")), name)?;
    if dest.is_some() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

struct ChunkReader<'a> {
    index: &'a dyn MetadataStore,
    output: &'a Path,
    master: &'a MasterKey,
}

impl<'a> ChunkReader<'a> {
    fn restore_file(&self, rec: &FileRecord, dest: Option<&Path>) -> Result<u64> {
        let path = safe_join(dest.unwrap_or(Path::new(".")), &rec.name)?;
        let bytes = self.reassemble(rec)?;
        if dest.is_some() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, &bytes[..])?;
        }
        debug!(name = %rec.name, bytes = bytes.len(), "file reassembled");
        Ok(bytes.len() as u64)
    }

    /// Original bytes of one file record, or an integrity error.
    fn reassemble(&self, rec: &FileRecord) -> Result<Zeroizing<Vec<u8>>> {
        let chunks = self.index.chunks_for(rec.id)?;
        if chunks.len() as u64 != rec.chunk_count {
            return Err(VesperError::integrity(format!(
                "expected {} chunks, found {}",
                rec.chunk_count,
                chunks.len()
            )));
        }

        // the recorded length is untrusted, so the preallocation is capped
        let mut encoded = Zeroizing::new(Vec::with_capacity((rec.encoded_len as usize).min(1 << 24)));
        for (expected, chunk) in chunks.iter().enumerate() {
            if chunk.seq != expected as u64 {
                return Err(VesperError::integrity(format!(
                    "chunk sequence broken at {expected}"
                )));
            }
            let piece = self.open_chunk(rec, chunk)?;
            encoded.extend_from_slice(&piece);
        }

        if encoded.len() as u64 != rec.encoded_len {
            return Err(VesperError::integrity(format!(
                "reassembled {} encoded bytes, expected {}",
                encoded.len(),
                rec.encoded_len
            )));
        }
        Ok(Zeroizing::new(codec_for(rec.codec).decode(&encoded)?))
    }

    /// Decrypt one chunk and trim it to its recorded length.
    fn open_chunk(&self, rec: &FileRecord, chunk: &ChunkRecord) -> Result<Zeroizing<Vec<u8>>> {
        let secret = Zeroizing::new(self.master.unwrap(
            &rec.file_iv,
            Region::ChunkKey,
            chunk.seq,
            &chunk.wrapped_key,
        )?);
        let name = chunk_name(self.master, rec, chunk)?;

        let ciphertext = match fs::read(self.output.join(&name)) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VesperError::integrity(format!(
                    "chunk {} ciphertext is missing",
                    chunk.seq
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let key = chunk_key(&secret);
        if !checksum_matches(&key, &ciphertext, &chunk.checksum) {
            return Err(VesperError::integrity(format!(
                "chunk {} checksum mismatch",
                chunk.seq
            )));
        }

        let plain_len = chunk.plain_len as usize;
        if ciphertext.len() != plain_len.next_multiple_of(BLOCK_LEN) {
            return Err(VesperError::integrity(format!(
                "chunk {} is {} bytes, expected {}",
                chunk.seq,
                ciphertext.len(),
                plain_len.next_multiple_of(BLOCK_LEN)
            )));
        }

        let mut block = Zeroizing::new(BlockCipher::new(&key, rec.file_iv).decrypt(&ciphertext)?);
        block.truncate(plain_len);
        Ok(block)
    }
}
