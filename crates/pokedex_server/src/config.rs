//! Command-line and environment configuration.
//!
//! Every flag has a `POKEDEX_*` environment fallback.

use clap::Parser;
use pokedex_core::repo::allocator::DEFAULT_MAX_ATTEMPTS;
use pokedex_core::{EmptyListPolicy, ExistenceCheck, RepositoryOptions, UpdateMode};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "pokedex-server", version, about = "Serves the pokemons collection over HTTP")]
pub struct Cli {
    /// Socket address to listen on.
    #[arg(long, env = "POKEDEX_ADDR", default_value = "127.0.0.1:8000")]
    pub addr: SocketAddr,

    /// SQLite database file holding the collection.
    #[arg(long, env = "POKEDEX_DB_PATH", default_value = "pokedex.sqlite3")]
    pub db_path: PathBuf,

    /// Keep the collection in process memory; takes precedence over --db-path.
    #[arg(long, env = "POKEDEX_IN_MEMORY")]
    pub in_memory: bool,

    /// Directory served for every non-API path.
    #[arg(long, env = "POKEDEX_PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    /// trace|debug|info|warn|error; defaults by build mode.
    #[arg(long, env = "POKEDEX_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Absolute directory for rotating log files; logs go to stderr when unset.
    #[arg(long, env = "POKEDEX_LOG_DIR")]
    pub log_dir: Option<String>,

    /// Existence check before update/delete: direct|scan.
    #[arg(long, env = "POKEDEX_EXISTENCE_CHECK", default_value_t = ExistenceCheck::DirectLookup)]
    pub existence_check: ExistenceCheck,

    /// Update behavior: replace|preserve-created-at.
    #[arg(long, env = "POKEDEX_UPDATE_MODE", default_value_t = UpdateMode::Replace)]
    pub update_mode: UpdateMode,

    /// Empty collection listing: not-found|empty-ok.
    #[arg(long, env = "POKEDEX_EMPTY_LIST", default_value_t = EmptyListPolicy::NotFound)]
    pub empty_list: EmptyListPolicy,

    /// Bound on optimistic id allocation attempts.
    #[arg(long, env = "POKEDEX_ALLOCATOR_MAX_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub allocator_max_attempts: u32,
}

impl Cli {
    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            existence_check: self.existence_check,
            update_mode: self.update_mode,
            empty_list: self.empty_list,
            allocator_max_attempts: self.allocator_max_attempts,
        }
    }
}
