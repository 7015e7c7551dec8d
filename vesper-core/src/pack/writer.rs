use crate::codec::{FILLER, codec_for};
use crate::config::EngineConfig;
use crate::crypto::cipher::{
    BLOCK_LEN, BlockCipher, Iv, Region, chunk_checksum, chunk_key, random_iv,
};
use crate::crypto::master::MasterKey;
use crate::domain::{NewChunk, NewFile};
use crate::error::Result;
use crate::index::sqlite::now_unix;
use crate::repo::MetadataStore;
use crate::secret::{Alphabet, NameReserver, generate_secret};
use crate::stats::{Failure, StoreSummary};
use crate::util::paths::child_name;
use crate::util::pool::build_pool;
use crate::walk::{IgnoreList, Node, enumerate};
use rayon::prelude::*;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// One input path scheduled for storing.
#[derive(Clone, Debug)]
struct Item {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

/// Flatten the tree in pre-order, so a directory always precedes its
/// contents. Returns the number of nodes skipped by the ignore list.
fn plan(nodes: &[Node], prefix: &str, ignore: &IgnoreList, out: &mut Vec<Item>) -> u64 {
    let mut skipped = 0;
    for node in nodes {
        let name = node.name();
        if ignore.matches(OsStr::new(&name)) {
            skipped += 1;
            continue;
        }
        let rel = child_name(prefix, &name);
        match node {
            Node::Leaf(path) => out.push(Item {
                name: rel,
                path: path.clone(),
                is_dir: false,
            }),
            Node::Directory { path, children, .. } => {
                out.push(Item {
                    name: rel.clone(),
                    path: path.clone(),
                    is_dir: true,
                });
                skipped += plan(children, &rel, ignore, out);
            }
        }
    }
    skipped
}

struct Stored {
    chunks: u64,
    bytes: u64,
}

/// Everything one store run shares across workers. Ciphers are built per
/// call from `master`, never shared.
struct ChunkWriter<'a> {
    index: &'a dyn MetadataStore,
    master: &'a MasterKey,
    engine: &'a EngineConfig,
    names: NameReserver,
    secret_chars: Vec<char>,
}

impl<'a> ChunkWriter<'a> {
    /// Fresh (file IV, probe plaintext, probe ciphertext).
    fn new_probe(&self) -> Result<(Iv, String, Vec<u8>)> {
        let iv = random_iv()?;
        let plain = generate_secret(self.engine.probe_len, &self.secret_chars)?;
        let cipher = self.master.probe(iv, &plain)?;
        Ok((iv, plain.to_string(), cipher))
    }

    fn store_dir(&self, item: &Item) -> Result<()> {
        let (file_iv, probe_plain, probe_cipher) = self.new_probe()?;
        let id = self.index.create_file(&NewFile {
            name: item.name.clone(),
            is_dir: true,
            probe_plain,
            probe_cipher,
            file_iv,
            codec: self.engine.codec,
            chunk_count: 0,
            encoded_len: 0,
            created_at: now_unix(),
        })?;
        debug!(name = %item.name, id, "directory record committed");
        Ok(())
    }

    fn store_file(&self, item: &Item) -> Result<Stored> {
        let raw = Zeroizing::new(fs::read(&item.path)?);
        let encoded = Zeroizing::new(codec_for(self.engine.codec).encode(&raw));
        let chunk_count = encoded.len().div_ceil(self.engine.block_len) as u64;

        let (file_iv, probe_plain, probe_cipher) = self.new_probe()?;
        let id = self.index.create_file(&NewFile {
            name: item.name.clone(),
            is_dir: false,
            probe_plain,
            probe_cipher,
            file_iv,
            codec: self.engine.codec,
            chunk_count,
            encoded_len: encoded.len() as u64,
            created_at: now_unix(),
        })?;

        let mut written = Vec::new();
        let res = self
            .encrypt_chunks(&encoded, &file_iv, &mut written)
            .and_then(|chunks| self.index.append_chunks(id, &chunks));
        if let Err(e) = res {
            // Leave neither orphan ciphertext nor a chunkless record behind.
            for p in &written {
                if let Err(rm) = fs::remove_file(p) {
                    warn!(name = %item.name, error = %rm, "could not remove partial ciphertext");
                }
            }
            if let Err(pe) = self.index.purge_file(id) {
                warn!(name = %item.name, error = %pe, "could not purge incomplete record");
            }
            return Err(e);
        }

        debug!(name = %item.name, id, chunks = chunk_count, "file stored");
        Ok(Stored {
            chunks: chunk_count,
            bytes: raw.len() as u64,
        })
    }

    fn encrypt_chunks(
        &self,
        encoded: &[u8],
        file_iv: &Iv,
        written: &mut Vec<PathBuf>,
    ) -> Result<Vec<NewChunk>> {
        let mut chunks = Vec::with_capacity(encoded.len().div_ceil(self.engine.block_len));
        for (seq, piece) in encoded.chunks(self.engine.block_len).enumerate() {
            let seq = seq as u64;
            let mut block = Zeroizing::new(piece.to_vec());
            block.resize(piece.len().next_multiple_of(BLOCK_LEN), FILLER);

            let secret = generate_secret(self.engine.key_len, &self.secret_chars)?;
            let key = chunk_key(secret.as_bytes());
            let ciphertext = BlockCipher::new(&key, *file_iv).encrypt(&block)?;

            let (name, mut f) = self.names.reserve()?;
            written.push(self.names.dir().join(&name));
            f.write_all(&ciphertext)?;
            f.sync_data()?;

            chunks.push(NewChunk {
                seq,
                wrapped_key: self
                    .master
                    .wrap(file_iv, Region::ChunkKey, seq, secret.as_bytes())?,
                wrapped_name: self
                    .master
                    .wrap(file_iv, Region::ChunkName, seq, name.as_bytes())?,
                plain_len: piece.len() as u64,
                checksum: chunk_checksum(&key, &ciphertext),
            });
        }
        Ok(chunks)
    }
}

/// Encrypt the tree under `root` into `output`, recording every path in
/// `index`. Per-file failures are collected, not fatal.
pub fn store(
    root: &Path,
    output: &Path,
    index: &dyn MetadataStore,
    master: &MasterKey,
    engine: &EngineConfig,
) -> Result<StoreSummary> {
    engine.validate()?;
    fs::create_dir_all(output)?;

    let ignore = IgnoreList::new(&engine.ignore);
    let walk = enumerate(root, &ignore)?;
    let mut items = Vec::new();
    let skipped = plan(&walk.nodes, "", &ignore, &mut items);

    let writer = ChunkWriter {
        index,
        master,
        engine,
        names: NameReserver::new(output, engine.name_len)?,
        secret_chars: Alphabet::named(engine.alphabets.as_slice()).characters()?,
    };

    let mut summary = StoreSummary {
        ignored: walk.ignored.len() as u64 + skipped,
        ..Default::default()
    };
    for (path, reason) in &walk.errors {
        let name = path.strip_prefix(root).unwrap_or(path).display().to_string();
        warn!(name = %name, error = %reason, "path not enumerated");
        summary.failed.push(Failure {
            name,
            reason: reason.clone(),
        });
    }

    let (dirs, files): (Vec<&Item>, Vec<&Item>) = items.iter().partition(|i| i.is_dir);

    for item in dirs {
        match writer.store_dir(item) {
            Ok(()) => summary.dirs += 1,
            Err(e) => {
                warn!(name = %item.name, error = %e, "directory not stored");
                summary.failed.push(Failure {
                    name: item.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let pool = build_pool(engine.workers)?;
    let results: Vec<(&Item, Result<Stored>)> = pool.install(|| {
        files
            .par_iter()
            .map(|item| (*item, writer.store_file(item)))
            .collect()
    });

    for (item, res) in results {
        match res {
            Ok(s) => {
                summary.files += 1;
                summary.chunks += s.chunks;
                summary.bytes += s.bytes;
            }
            Err(e) => {
                warn!(name = %item.name, error = %e, "file not stored");
                summary.failed.push(Failure {
                    name: item.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    info!(
        files = summary.files,
        dirs = summary.dirs,
        chunks = summary.chunks,
        ignored = summary.ignored,
        failed = summary.failed.len(),
        "store finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::master::test_kdf;
    use crate::index::sqlite::SqliteIndex;

    fn engine() -> EngineConfig {
        EngineConfig {
            workers: 2,
            ..Default::default()
        }
    }

    #[test]
    fn scenario_notes_txt() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(input.path().join("notes.txt"), vec![b'n'; 1500]).unwrap();

        let idx = SqliteIndex::open_in_memory().unwrap();
        let master = MasterKey::derive("lolliepop", &test_kdf()).unwrap();
        let summary = store(input.path(), output.path(), &idx, &master, &engine()).unwrap();

        assert_eq!(summary.files, 1);
        assert_eq!(summary.bytes, 1500);
        let files = idx.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert!(!files[0].is_dir);
        assert_eq!(files[0].name, "notes.txt");
        // 1500 bytes -> 3000 hex units -> 1024 + 1024 + 952
        assert_eq!(files[0].chunk_count, 3);
        let chunks = idx.chunks_for(files[0].id).unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.plain_len).collect::<Vec<_>>(),
            vec![1024, 1024, 952]
        );
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), 3);
    }

    #[test]
    fn probe_ciphertext_is_reproducible() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(input.path().join("a"), b"abc").unwrap();
        let idx = SqliteIndex::open_in_memory().unwrap();
        let master = MasterKey::derive("pw", &test_kdf()).unwrap();
        store(input.path(), output.path(), &idx, &master, &engine()).unwrap();

        let rec = &idx.list_files().unwrap()[0];
        assert_eq!(rec.probe_plain.len() % BLOCK_LEN, 0);
        assert!(master.probe_matches(rec.file_iv, &rec.probe_plain, &rec.probe_cipher));
    }

    #[test]
    fn directories_precede_their_children() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::create_dir_all(input.path().join("docs/deep")).unwrap();
        fs::write(input.path().join("docs/deep/x.txt"), b"x").unwrap();
        let idx = SqliteIndex::open_in_memory().unwrap();
        let master = MasterKey::derive("pw", &test_kdf()).unwrap();
        let s = store(input.path(), output.path(), &idx, &master, &engine()).unwrap();
        assert_eq!((s.dirs, s.files), (2, 1));

        let names: Vec<_> = idx
            .list_files()
            .unwrap()
            .into_iter()
            .map(|f| (f.name, f.is_dir))
            .collect();
        assert_eq!(
            names,
            vec![
                ("docs".to_string(), true),
                ("docs/deep".to_string(), true),
                ("docs/deep/x.txt".to_string(), false),
            ]
        );
    }

    #[test]
    fn invalid_block_len_fails_before_any_work() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(input.path().join("a"), b"abc").unwrap();
        let idx = SqliteIndex::open_in_memory().unwrap();
        let master = MasterKey::derive("pw", &test_kdf()).unwrap();
        let bad = EngineConfig {
            block_len: 1000,
            ..engine()
        };
        let err = store(input.path(), output.path(), &idx, &master, &bad).unwrap_err();
        assert!(matches!(err, crate::error::VesperError::Config(_)));
        assert!(idx.list_files().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_entry_does_not_stop_the_run() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(input.path().join("good.txt"), b"good").unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", input.path().join("zz-dangling"))
            .unwrap();

        let idx = SqliteIndex::open_in_memory().unwrap();
        let master = MasterKey::derive("pw", &test_kdf()).unwrap();
        let s = store(input.path(), output.path(), &idx, &master, &engine()).unwrap();

        assert_eq!(s.files, 1);
        assert_eq!(s.failed.len(), 1);
        assert_eq!(s.failed[0].name, "zz-dangling");
        let names: Vec<_> = idx.list_files().unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["good.txt".to_string()]);
    }

    /// Index whose chunk commit fails for one named file.
    struct RejectingIndex {
        inner: SqliteIndex,
        reject: &'static str,
    }

    impl MetadataStore for RejectingIndex {
        fn create_file(&self, file: &NewFile) -> Result<i64> {
            self.inner.create_file(file)
        }

        fn append_chunks(&self, file_id: i64, chunks: &[NewChunk]) -> Result<()> {
            let target = self
                .inner
                .list_files()?
                .into_iter()
                .any(|f| f.id == file_id && f.name == self.reject);
            if target {
                return Err(std::io::Error::other("disk full").into());
            }
            self.inner.append_chunks(file_id, chunks)
        }

        fn list_files(&self) -> Result<Vec<crate::domain::FileRecord>> {
            self.inner.list_files()
        }

        fn chunks_for(&self, file_id: i64) -> Result<Vec<crate::domain::ChunkRecord>> {
            self.inner.chunks_for(file_id)
        }

        fn purge_file(&self, file_id: i64) -> Result<()> {
            self.inner.purge_file(file_id)
        }

        fn close(self: Box<Self>) -> Result<()> {
            Box::new(self.inner).close()
        }
    }

    #[test]
    fn failed_commit_rolls_back_only_that_file() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        // 700 bytes -> 1400 hex units -> 2 chunks written before the commit
        fs::write(input.path().join("doomed.txt"), vec![b'd'; 700]).unwrap();
        fs::write(input.path().join("keep.txt"), b"keep").unwrap();

        let idx = RejectingIndex {
            inner: SqliteIndex::open_in_memory().unwrap(),
            reject: "doomed.txt",
        };
        let master = MasterKey::derive("pw", &test_kdf()).unwrap();
        let s = store(input.path(), output.path(), &idx, &master, &engine()).unwrap();

        assert_eq!(s.files, 1);
        assert_eq!(s.failed.len(), 1);
        assert_eq!(s.failed[0].name, "doomed.txt");

        let files = idx.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "keep.txt");
        let keep_chunks = idx.chunks_for(files[0].id).unwrap().len();
        assert_eq!(keep_chunks, 1);
        assert_eq!(fs::read_dir(output.path()).unwrap().count(), keep_chunks);

        let dest = tempfile::tempdir().unwrap();
        let r = crate::read::extract::restore(&idx, output.path(), dest.path(), &master, &engine())
            .unwrap();
        assert_eq!((r.files, r.failed.len()), (1, 0));
        assert_eq!(fs::read(dest.path().join("keep.txt")).unwrap(), b"keep");
        assert!(!dest.path().join("doomed.txt").exists());
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        fs::write(input.path().join("empty"), b"").unwrap();
        let idx = SqliteIndex::open_in_memory().unwrap();
        let master = MasterKey::derive("pw", &test_kdf()).unwrap();
        let s = store(input.path(), output.path(), &idx, &master, &engine()).unwrap();
        assert_eq!((s.files, s.chunks), (1, 0));
        assert_eq!(idx.list_files().unwrap()[0].chunk_count, 0);
    }
}
