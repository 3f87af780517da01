//! Configuration structs with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "globe.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Terrain tree settings.
    pub terrain: TerrainConfig,
    /// Node and mesh cache eviction tuning.
    pub cache: CacheConfig,
    /// Tile provider settings.
    pub provider: ProviderConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Terrain quadtree settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerrainConfig {
    /// Number of quadtree levels one elevation tile spans (ρ).
    pub resolution_power: u8,
    /// Maximum number of tile requests in flight at once.
    pub max_pending_requests: usize,
    /// Subdivision exponent of the meshes materialized for visible nodes.
    pub mesh_lod: u8,
    /// Deepest quadtree level the traversal will descend to.
    pub max_level: u8,
    /// Split threshold: a node is refined while its ground size divided by
    /// the eye distance exceeds this value.
    pub lod_factor: f64,
}

/// Eviction thresholds. See `globe_terrain::TreeSettings`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Evict nodes once the cache exceeds this multiple of the peak touch count.
    pub reduce_thresh: f64,
    /// After node eviction, keep this multiple of the peak touch count.
    pub reduce_factor: f64,
    /// Never evict meshes while at most this many are cached.
    pub mesh_floor: usize,
    /// Evict meshes once the cache exceeds this multiple of the frame's touched meshes.
    pub mesh_thresh: f64,
    /// After mesh eviction, keep this multiple of the frame's touched meshes.
    pub mesh_factor: f64,
    /// Number of frames of touch history for the peak tracker.
    pub hist_window: usize,
}

/// Procedural tile provider settings (demo).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    /// Worker threads producing tiles (0 = based on CPU count).
    pub worker_threads: usize,
    /// Artificial latency added to every tile in milliseconds.
    pub latency_ms: u64,
    /// Noise seed.
    pub seed: u32,
    /// Deepest tile level served; tiles at this level are leaves.
    pub max_level: u8,
    /// Peak terrain amplitude in meters.
    pub amplitude_m: f64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Write JSON logs to `logs/` next to the config file, also in
    /// release builds.
    pub file_logging: bool,
}

// --- Default implementations ---

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            resolution_power: 8,
            max_pending_requests: 10,
            mesh_lod: 5,
            max_level: 20,
            lod_factor: 2.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reduce_thresh: 1.5,
            reduce_factor: 1.2,
            mesh_floor: 300,
            mesh_thresh: 1.5,
            mesh_factor: 1.2,
            hist_window: 200,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            latency_ms: 5,
            seed: 7,
            max_level: 12,
            amplitude_m: 4000.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            file_logging: false,
        }
    }
}

/// Platform config directory, e.g. `~/.config/globe` on Linux.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("globe")
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Reject values the terrain tree cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: String| Err(ConfigError::Invalid { field, reason });
        let rho = self.terrain.resolution_power;
        if !(1..=16).contains(&rho) {
            return invalid("terrain.resolution_power", format!("{rho} is outside 1..=16"));
        }
        if self.terrain.max_pending_requests == 0 {
            return invalid("terrain.max_pending_requests", "must be at least 1".into());
        }
        if self.terrain.lod_factor <= 0.0 {
            let factor = self.terrain.lod_factor;
            return invalid("terrain.lod_factor", format!("{factor} is not positive"));
        }
        let cache = &self.cache;
        if cache.reduce_factor < 1.0 || cache.reduce_thresh < cache.reduce_factor {
            return invalid(
                "cache.reduce_factor",
                format!(
                    "need 1 <= reduce_factor ({}) <= reduce_thresh ({})",
                    cache.reduce_factor, cache.reduce_thresh
                ),
            );
        }
        if cache.mesh_factor < 1.0 || cache.mesh_thresh < cache.mesh_factor {
            return invalid(
                "cache.mesh_factor",
                format!(
                    "need 1 <= mesh_factor ({}) <= mesh_thresh ({})",
                    cache.mesh_factor, cache.mesh_thresh
                ),
            );
        }
        if cache.hist_window == 0 {
            return invalid("cache.hist_window", "must be at least 1".into());
        }
        Ok(())
    }

    /// Save config to the given directory as `globe.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);
        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(config_dir.join(CONFIG_FILE), serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = std::fs::read_to_string(config_dir.join(CONFIG_FILE))
            .map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
        new_config.validate()?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(ron_str.contains("resolution_power: 8"));
        assert!(ron_str.contains("mesh_floor: 300"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config: Config = ron::from_str("(terrain: (resolution_power: 6))").unwrap();
        assert_eq!(config.terrain.resolution_power, 6);
        assert_eq!(config.terrain.max_pending_requests, 10);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.terrain.max_pending_requests = 32;
        config.cache.hist_window = 50;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.terrain.resolution_power = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("terrain.resolution_power"), "got {err}");

        let mut config = Config::default();
        config.cache.reduce_factor = 2.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "cache.reduce_factor", .. })
        ));
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "(cache: (hist_window: 0))").unwrap();
        assert!(matches!(
            Config::load_or_create(dir.path()),
            Err(ConfigError::Invalid { field: "cache.hist_window", .. })
        ));
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();
        assert!(config.reload(dir.path()).unwrap().is_none());

        let mut modified = config.clone();
        modified.terrain.mesh_lod = 3;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().terrain.mesh_lod, 3);
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "{{not valid}}").unwrap();
        let result = Config::load_or_create(dir.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
