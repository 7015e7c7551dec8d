#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod error;
pub mod repo;
pub mod repo_factory;
pub mod secret;
pub mod stats;
pub mod walk;

pub mod util {
    pub mod paths;
    pub mod pool;
}

pub mod codec;

pub mod crypto {
    pub mod cipher;
    pub mod master;
}

pub mod index {
    pub mod sqlite;
}

pub mod pack {
    pub mod writer;
}

pub mod read {
    pub mod extract;
}

pub mod crud;
pub mod list;

// Re-exports: stable API surface
pub use config::{Config, EngineConfig, KdfConfig};
pub use crud::purge;
pub use crypto::master::MasterKey;
pub use error::{Result, VesperError};
pub use list::list;
pub use pack::writer::store;
pub use read::extract::{restore, verify};
pub use repo::MetadataStore;
pub use repo_factory::{Backend, open_index};
pub use stats::{RestoreState, RestoreSummary, StoreSummary};
