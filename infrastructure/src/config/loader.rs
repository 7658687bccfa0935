//! Configuration loading with multi-source merging.

use super::file_config::FileConfig;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::Path;

/// Load configuration, lowest priority first: built-in defaults, the given
/// TOML file, then `CONCLAVE_`-prefixed environment variables (`__`
/// separates nesting, e.g. `CONCLAVE_THRESHOLD__MIN_ROUNDS=1`).
pub fn load_file_config(path: Option<&Path>) -> Result<FileConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Toml::file(path));
    }
    figment
        .merge(Env::prefixed("CONCLAVE_").split("__"))
        .extract()
        .map_err(Box::new)
}
