//! Removal of stored files and directories from the index and the output
//! directory.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::crypto::master::MasterKey;
use crate::error::{Result, VesperError};
use crate::read::extract::chunk_name;
use crate::repo::MetadataStore;

/// Delete every record named `name`, or stored below it, that `master` can
/// open, together with its ciphertext files. Returns the number of records
/// removed. Records belonging to another passphrase are left alone.
pub fn purge(
    index: &dyn MetadataStore,
    output: &Path,
    master: &MasterKey,
    name: &str,
) -> Result<usize> {
    let name = name.trim_end_matches('/');
    if name.is_empty() {
        return Err(VesperError::config("purge needs a non-empty name"));
    }
    let prefix = format!("{name}/");

    let mut removed = 0;
    for rec in index.list_files()? {
        if rec.name != name && !rec.name.starts_with(&prefix) {
            continue;
        }
        if !master.probe_matches(rec.file_iv, &rec.probe_plain, &rec.probe_cipher) {
            debug!(id = rec.id, "record not owned by this passphrase, kept");
            continue;
        }
        // every name resolves before anything is unlinked
        let opaque: Vec<String> = index
            .chunks_for(rec.id)?
            .iter()
            .map(|chunk| chunk_name(master, &rec, chunk))
            .collect::<Result<_>>()?;
        for (seq, file) in opaque.iter().enumerate() {
            match fs::remove_file(output.join(file)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(name = %rec.name, seq, "ciphertext already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }
        index.purge_file(rec.id)?;
        removed += 1;
    }

    info!(name, removed, "purge finished");
    Ok(removed)
}
