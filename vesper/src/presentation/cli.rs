use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use vesper_core::Config;

#[derive(Parser, Debug)]
#[command(author, version, about = "vesper: chunked file encryption over an SQLite index", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "vesper_core=trace" (RUST_LOG wins)
    #[arg(long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(flatten)]
    pub paths: PathArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Per-invocation overrides of the `[paths]` and `[engine]` config.
#[derive(Args, Debug, Default)]
pub struct PathArgs {
    /// Tree to encrypt
    #[arg(long, global = true)]
    pub input: Option<PathBuf>,
    /// Ciphertext directory
    #[arg(long, global = true)]
    pub output: Option<PathBuf>,
    /// SQLite index file
    #[arg(long, global = true)]
    pub index: Option<PathBuf>,
    /// Restore destination
    #[arg(long = "restore-dir", global = true)]
    pub restore: Option<PathBuf>,
    #[arg(long, global = true)]
    pub workers: Option<usize>,
}

impl PathArgs {
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(p) = &self.input {
            cfg.paths.input = p.clone();
        }
        if let Some(p) = &self.output {
            cfg.paths.output = p.clone();
        }
        if let Some(p) = &self.index {
            cfg.paths.index = p.clone();
        }
        if let Some(p) = &self.restore {
            cfg.paths.restore = p.clone();
        }
        if let Some(w) = self.workers {
            cfg.engine.workers = w;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encrypt the input tree into the output directory
    Store,

    /// Rebuild every file the passphrase opens
    #[command(alias = "retrieve")]
    Restore,

    /// List indexed records (no passphrase needed)
    List,

    /// Reassemble everything in memory and report, writing nothing
    Verify,

    /// Remove a stored file or directory and its ciphertext
    Purge {
        /// Recorded name, relative to the input root
        name: String,
    },

    /// Print a random string drawn from named character blocks
    Secret {
        /// Length in characters
        #[arg(long, default_value_t = 32)]
        length: usize,
        /// Named block; repeat to combine (see --list-alphabets)
        #[arg(long = "alphabet")]
        alphabets: Vec<String>,
        /// Explicit character set, overrides --alphabet
        #[arg(long)]
        chars: Option<String>,
        /// Print the known block names and exit
        #[arg(long = "list-alphabets")]
        list_alphabets: bool,
    },

    /// Ask for the mode on the terminal: Store / Retrieve? [s/r]
    Interactive,
}
