//! Configuration for the globe terrain subsystem.
//!
//! Settings persist to disk as RON, accept CLI overrides via clap, and stay
//! forward/backward compatible through `#[serde(default)]` sections.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{CacheConfig, Config, DebugConfig, ProviderConfig, TerrainConfig, default_config_dir};
pub use error::ConfigError;
