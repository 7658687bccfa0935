//! File configuration
//!
//! Raw TOML shapes, figment-based loading (file merged with
//! `CONCLAVE_`-prefixed environment variables) and conversion into the
//! validated domain [`MeetingConfig`].

mod file_config;
mod loader;

pub use file_config::{FileAgentConfig, FileConfig, FileProviderCredentials, FileProvidersConfig};
pub use loader::load_file_config;
