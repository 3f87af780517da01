//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Command-line arguments. CLI values override settings loaded from `globe.ron`.
#[derive(Parser, Debug)]
#[command(name = "globe-demo", about = "Headless terrain LOD flight over a procedural globe")]
pub struct CliArgs {
    /// Quadtree levels spanned by one elevation tile.
    #[arg(long)]
    pub resolution_power: Option<u8>,

    /// Maximum tile requests in flight.
    #[arg(long)]
    pub max_pending_requests: Option<usize>,

    /// Number of frames to simulate.
    #[arg(long, default_value_t = 600)]
    pub frames: u32,

    /// Procedural terrain seed.
    #[arg(long)]
    pub seed: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(rho) = args.resolution_power {
            self.terrain.resolution_power = rho;
        }
        if let Some(max) = args.max_pending_requests {
            self.terrain.max_pending_requests = max;
        }
        if let Some(seed) = args.seed {
            self.provider.seed = seed;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs::parse_from(["globe-demo", "--resolution-power", "6", "--seed", "99"]);
        config.apply_cli_overrides(&args);
        assert_eq!(config.terrain.resolution_power, 6);
        assert_eq!(config.provider.seed, 99);
        assert_eq!(config.terrain.max_pending_requests, 10);
        assert_eq!(args.frames, 600);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        let args = CliArgs::parse_from(["globe-demo"]);
        config.apply_cli_overrides(&args);
        assert_eq!(config, original);
    }
}
