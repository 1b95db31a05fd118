//! CLI subcommands for `taskd`. Each module owns one `clap` subcommand tree
//! and talks to `taskd_core` only through `taskd_core::api` and `Store`.

pub mod batch;
pub mod daemon;
pub mod task;

use std::path::PathBuf;
use std::sync::Arc;

use taskd_core::{CoreConfig, Store};

/// Loads config (env, then an optional `--config` file) and opens the store.
/// Shared by every subcommand that touches the database directly.
pub fn open_store(config_path: Option<&str>) -> anyhow::Result<(Arc<Store>, CoreConfig)> {
    let config = load_config(config_path)?;
    let store = Arc::new(Store::open(&config.db_path)?);
    Ok((store, config))
}

pub fn load_config(config_path: Option<&str>) -> anyhow::Result<CoreConfig> {
    let mut config = CoreConfig::from_env()?;
    if let Some(path) = config_path {
        config.merge_file(&PathBuf::from(path))?;
    }
    Ok(config)
}
