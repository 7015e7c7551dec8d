use crate::codec::CodecId;
use crate::crypto::cipher::BLOCK_LEN;
use crate::error::{Result, VesperError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration, loaded from `vesper.toml` when one is given.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub engine: EngineConfig,
    pub kdf: KdfConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Tree to encrypt
    pub input: PathBuf,
    /// Directory holding opaque ciphertext files
    pub output: PathBuf,
    /// SQLite index file
    pub index: PathBuf,
    /// Destination for reconstructed originals
    pub restore: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::from("./input"),
            output: PathBuf::from("./output"),
            index: PathBuf::from("./output/data.sqlite"),
            restore: PathBuf::from("./restore"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chunk size in units of the encoded representation.
    pub block_len: usize,
    /// Worker threads (0 = one per CPU)
    pub workers: usize,
    /// Literal substrings; any path whose name contains one is skipped.
    pub ignore: Vec<String>,
    pub codec: CodecId,
    /// Chunk secret length, in characters
    pub key_len: usize,
    /// Probe plaintext length, in characters
    pub probe_len: usize,
    /// Opaque filename length, in characters
    pub name_len: usize,
    /// Named character blocks that chunk secrets and probes are drawn from
    pub alphabets: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_len: 1024,
            workers: 0,
            ignore: vec![".DS_Store".to_string()],
            codec: CodecId::Hex,
            key_len: 32,
            probe_len: 64,
            name_len: 32,
            alphabets: crate::secret::DEFAULT_ALPHABETS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_len == 0 || self.block_len % BLOCK_LEN != 0 {
            return Err(VesperError::config(format!(
                "block_len must be a positive multiple of {BLOCK_LEN}, got {}",
                self.block_len
            )));
        }
        if self.key_len == 0 || self.probe_len == 0 {
            return Err(VesperError::config("secret lengths must be non-zero"));
        }
        if self.name_len == 0 || self.name_len % BLOCK_LEN != 0 {
            return Err(VesperError::config(format!(
                "name_len must be a positive multiple of {BLOCK_LEN}, got {}",
                self.name_len
            )));
        }
        if self.ignore.iter().any(|s| s.is_empty()) {
            return Err(VesperError::config("ignore entries must be non-empty"));
        }
        // Resolving also rejects unknown names and empty sets.
        crate::secret::Alphabet::named(self.alphabets.as_slice()).characters()?;
        Ok(())
    }
}

/// Argon2id cost parameters for the master key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// "text" or "json"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Load from a TOML file, or fall back to defaults when `path` is None.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| VesperError::config(format!("config parse: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        crate::crypto::master::kdf_params(&self.kdf)?;
        match self.log.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(VesperError::config(format!("unknown log format: {other}"))),
        }
    }
}
