//! Random secrets over configurable character sets, and collision-checked
//! opaque filenames for ciphertext.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use zeroize::Zeroizing;

use crate::crypto::cipher::BLOCK_LEN;
use crate::error::{Result, VesperError};

/// Upper bound on whole-string resamples before alignment is declared unreachable.
const MAX_ALIGN_ATTEMPTS: usize = 4096;
const MAX_NAME_ATTEMPTS: usize = 64;

pub const DEFAULT_ALPHABETS: &[&str] = &[
    "Basic Latin",
    "Hiragana",
    "Katakana",
    "CJK Unified Ideographs",
];

pub const FILENAME_SAFE: &str = "Filename Safe";

/// Named Unicode block as a half-open code point range.
struct CharacterRange {
    name: &'static str,
    min: u32,
    max: u32,
}

const fn range(name: &'static str, min: u32, max: u32) -> CharacterRange {
    CharacterRange { name, min, max }
}

static CHARACTER_RANGES: &[CharacterRange] = &[
    range("ASCII", 33, 122),
    range("Basic Latin", 32, 127),
    range("Latin-1 Supplement", 160, 255),
    range("Latin Extended-A", 256, 383),
    range("Latin Extended-B", 384, 591),
    range("IPA Extensions", 592, 687),
    range("Greek and Coptic", 880, 1023),
    range("Cyrillic", 1024, 1279),
    range("Armenian", 1328, 1423),
    range("Hebrew", 1424, 1535),
    range("Arabic", 1536, 1791),
    range("Syriac", 1792, 1871),
    range("Thaana", 1920, 1983),
    range("Devanagari", 2304, 2431),
    range("Bengali", 2432, 2559),
    range("Gurmukhi", 2560, 2687),
    range("Gujarati", 2688, 2815),
    range("Oriya", 2816, 2943),
    range("Tamil", 2944, 3071),
    range("Telugu", 3072, 3199),
    range("Kannada", 3200, 3327),
    range("Malayalam", 3328, 3455),
    range("Sinhala", 3456, 3583),
    range("Thai", 3584, 3711),
    range("Lao", 3712, 3839),
    range("Tibetan", 3840, 4095),
    range("Myanmar", 4096, 4255),
    range("Georgian", 4256, 4351),
    range("Hangul Jamo", 4352, 4607),
    range("Ethiopic", 4608, 4991),
    range("Cherokee", 5024, 5119),
    range("Ogham", 5760, 5791),
    range("Runic", 5792, 5887),
    range("Khmer", 6016, 6143),
    range("Mongolian", 6144, 6319),
    range("Greek Extended", 7936, 8191),
    range("Arrows", 8592, 8703),
    range("Mathematical Operators", 8704, 8959),
    range("Box Drawing", 9472, 9599),
    range("Geometric Shapes", 9632, 9727),
    range("Miscellaneous Symbols", 9728, 9983),
    range("Dingbats", 9984, 10175),
    range("Braille Patterns", 10240, 10495),
    range("CJK Radicals Supplement", 11904, 12031),
    range("Hiragana", 12352, 12447),
    range("Katakana", 12448, 12543),
    range("CJK Unified Ideographs", 19968, 40959),
    range("Hangul Syllables", 44032, 55215),
    range("Gothic", 66352, 66383),
    range("Musical Symbols", 119040, 119295),
];

fn filename_safe() -> Vec<char> {
    ('0'..='9').chain('A'..='Z').chain('a'..='z').collect()
}

/// Character set for secrets: named blocks or an explicit set.
#[derive(Clone, Debug)]
pub enum Alphabet {
    Named(Vec<String>),
    Explicit(Vec<char>),
}

impl Alphabet {
    pub fn named<S: AsRef<str>>(names: &[S]) -> Self {
        Alphabet::Named(names.iter().map(|s| s.as_ref().to_string()).collect())
    }

    pub fn filename_safe() -> Self {
        Alphabet::Named(vec![FILENAME_SAFE.to_string()])
    }

    /// Expand to the concrete, de-duplicated character list.
    pub fn characters(&self) -> Result<Vec<char>> {
        let mut out: Vec<char> = match self {
            Alphabet::Explicit(chars) => chars.clone(),
            Alphabet::Named(names) => {
                let mut acc = Vec::new();
                for name in names {
                    acc.extend(resolve_named(name)?);
                }
                acc
            }
        };
        out.sort_unstable();
        out.dedup();
        if out.is_empty() {
            return Err(VesperError::config("alphabet has no characters"));
        }
        Ok(out)
    }
}

fn resolve_named(name: &str) -> Result<Vec<char>> {
    if name.eq_ignore_ascii_case(FILENAME_SAFE) {
        return Ok(filename_safe());
    }
    let r = CHARACTER_RANGES
        .iter()
        .find(|r| r.name.eq_ignore_ascii_case(name))
        .ok_or_else(|| VesperError::config(format!("unknown alphabet: {name}")))?;
    // Surrogates and other non-scalar values drop out here.
    Ok((r.min..r.max).filter_map(char::from_u32).collect())
}

pub fn alphabet_names() -> impl Iterator<Item = &'static str> {
    std::iter::once(FILENAME_SAFE).chain(CHARACTER_RANGES.iter().map(|r| r.name))
}

/// Draw `len` characters from `chars`, resampling the whole string until
/// its UTF-8 byte length is block aligned.
pub fn generate_secret(len: usize, chars: &[char]) -> Result<Zeroizing<String>> {
    if chars.is_empty() {
        return Err(VesperError::config("alphabet has no characters"));
    }
    if len == 0 {
        return Err(VesperError::config("secret length must be non-zero"));
    }
    let mut rng = OsRng;
    for _ in 0..MAX_ALIGN_ATTEMPTS {
        let mut s = Zeroizing::new(String::with_capacity(len * 4));
        for _ in 0..len {
            if let Some(c) = chars.choose(&mut rng) {
                s.push(*c);
            }
        }
        if s.len() % BLOCK_LEN == 0 {
            return Ok(s);
        }
    }
    Err(VesperError::config(format!(
        "cannot reach {BLOCK_LEN}-byte alignment with {len} characters from this alphabet"
    )))
}

/// Issues opaque ciphertext filenames in one output directory. A name is
/// reserved both in-process and on disk (`create_new`), so concurrent
/// workers and concurrent processes never receive the same one.
pub struct NameReserver {
    dir: PathBuf,
    len: usize,
    chars: Vec<char>,
    issued: Mutex<HashSet<String>>,
}

impl NameReserver {
    pub fn new(dir: &Path, len: usize) -> Result<Self> {
        if len == 0 || len % BLOCK_LEN != 0 {
            return Err(VesperError::config(format!(
                "opaque name length must be a positive multiple of {BLOCK_LEN}"
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            len,
            chars: filename_safe(),
            issued: Mutex::new(HashSet::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the reserved name and the freshly created, empty file.
    pub fn reserve(&self) -> Result<(String, File)> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = generate_secret(self.len, &self.chars)?.to_string();
            {
                let mut issued = self
                    .issued
                    .lock()
                    .map_err(|_| VesperError::Crypto("name reservation lock poisoned".into()))?;
                if !issued.insert(name.clone()) {
                    continue;
                }
            }
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&name))
            {
                Ok(f) => return Ok((name, f)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(VesperError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "could not allocate a unique output name",
        )))
    }

    pub fn issued_count(&self) -> usize {
        self.issued.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Opaque names are generated from `Filename Safe` only; anything else
/// read back from the index is rejected before touching the filesystem.
pub fn is_opaque_name(name: &str) -> bool {
    !name.is_empty() && name.len() % BLOCK_LEN == 0 && name.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_block_aligned() {
        let chars = Alphabet::named(DEFAULT_ALPHABETS).characters().unwrap();
        for len in [16usize, 32, 64] {
            let s = generate_secret(len, &chars).unwrap();
            assert_eq!(s.chars().count(), len);
            assert_eq!(s.len() % BLOCK_LEN, 0);
        }
    }

    #[test]
    fn explicit_alphabet_is_respected() {
        let s = generate_secret(32, &['x', 'y']).unwrap();
        assert!(s.chars().all(|c| c == 'x' || c == 'y'));
    }

    #[test]
    fn unreachable_alignment_is_config_error() {
        // 5 three-byte characters = 15 bytes, never aligned.
        let err = generate_secret(5, &['あ']).unwrap_err();
        assert!(matches!(err, VesperError::Config(_)));
    }

    #[test]
    fn empty_alphabet_is_config_error() {
        assert!(Alphabet::Explicit(vec![]).characters().is_err());
        assert!(generate_secret(16, &[]).is_err());
    }

    #[test]
    fn named_lookup_is_case_insensitive() {
        let a = Alphabet::named(&["hiragana"]).characters().unwrap();
        assert!(a.contains(&'あ'));
        let fs = Alphabet::filename_safe().characters().unwrap();
        assert_eq!(fs.len(), 62);
    }

    #[test]
    fn reserved_names_are_unique_and_created() {
        let dir = tempfile::tempdir().unwrap();
        let r = NameReserver::new(dir.path(), 32).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let (name, _f) = r.reserve().unwrap();
            assert!(is_opaque_name(&name));
            assert!(dir.path().join(&name).exists());
            assert!(seen.insert(name));
        }
        assert_eq!(r.issued_count(), 50);
    }

    #[test]
    fn concurrent_reservations_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let r = NameReserver::new(dir.path(), 16).unwrap();
        let names: Vec<String> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| s.spawn(|| (0..25).map(|_| r.reserve().unwrap().0).collect::<Vec<_>>()))
                .collect();
            workers.into_iter().flat_map(|w| w.join().unwrap()).collect()
        });
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), 200);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 200);
    }

    #[test]
    fn opaque_name_filter() {
        assert!(is_opaque_name("abcdefghijklmnop"));
        assert!(!is_opaque_name("../../etc/passwd"));
        assert!(!is_opaque_name("short"));
    }
}
