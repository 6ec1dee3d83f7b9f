// Configuration loading and parsing (auction.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// auction.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub auction: AuctionConfig,
    pub storage: StorageConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuctionConfig {
    pub turn_duration_secs: u64,
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub db_path: String,
    pub watch_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub path: String,
}

impl AuctionConfig {
    pub fn turn_duration(&self) -> Duration {
        Duration::from_secs(self.turn_duration_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl StorageConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

const CONFIG_DIR: &str = "config";
const DEFAULTS_DIR: &str = "defaults";
const CONFIG_FILE: &str = "auction.toml";

/// Load and validate `config/auction.toml` under `base_dir`, without seeding
/// it from defaults first. `load_config()` does both.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join(CONFIG_DIR).join(CONFIG_FILE);
    let text = read_file(&path)?;
    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

/// Seed `config/auction.toml` from `defaults/auction.toml` on first run.
///
/// An existing config is left alone, so operator edits survive upgrades.
/// Returns the path written, if any.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join(CONFIG_DIR).join(CONFIG_FILE);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join(DEFAULTS_DIR).join(CONFIG_FILE);
    if !source.exists() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither {} nor {} exists; run from the crate directory",
                target.display(),
                source.display()
            ),
        });
    }

    let copy_error = |e: std::io::Error| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {} to {}: {e}", source.display(), target.display()),
    };
    std::fs::create_dir_all(base_dir.join(CONFIG_DIR)).map_err(copy_error)?;
    std::fs::copy(&source, &target).map_err(copy_error)?;

    info!("Seeded {} from defaults", target.display());
    Ok(Some(target))
}

/// Load config relative to the current working directory, seeding it from
/// defaults on first run.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    let durations: &[(&str, u64)] = &[
        ("auction.turn_duration_secs", config.auction.turn_duration_secs),
        ("auction.tick_interval_ms", config.auction.tick_interval_ms),
        ("storage.watch_interval_ms", config.storage.watch_interval_ms),
    ];
    for (name, val) in durations {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    if config.storage.db_path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "storage.db_path".into(),
            message: "must not be empty".into(),
        });
    }

    if config.export.path.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "export.path".into(),
            message: "must not be empty".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    /// Helper: returns the path to the auction-house crate root
    /// (works whether `cargo test` runs from the crate root or repo root).
    fn project_root() -> PathBuf {
        let cwd = std::env::current_dir().unwrap();
        if cwd.join("defaults").exists() {
            cwd
        } else if cwd.join("crates/auction-house/defaults").exists() {
            cwd.join("crates/auction-house")
        } else {
            panic!("Cannot locate defaults/ directory from CWD {:?}", cwd);
        }
    }

    /// Helper: fresh temp dir with config/auction.toml containing `text`.
    fn config_dir_with(name: &str, text: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/auction.toml"), text).unwrap();
        tmp
    }

    fn default_text() -> String {
        fs::read_to_string(project_root().join("defaults/auction.toml")).unwrap()
    }

    #[test]
    fn load_valid_config_from_defaults() {
        let tmp = std::env::temp_dir().join("auction_config_test_defaults");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::copy(
            project_root().join("defaults/auction.toml"),
            tmp.join("defaults/auction.toml"),
        )
        .unwrap();

        let copied = ensure_config_file(&tmp).expect("should seed config from defaults");
        assert_eq!(copied, Some(tmp.join("config/auction.toml")));
        // Second run leaves it alone.
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);

        let config = load_config_from(&tmp).expect("should load valid config");
        assert_eq!(config.auction.turn_duration(), Duration::from_secs(30));
        assert_eq!(config.auction.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.storage.db_path, "auction-house.db");
        assert_eq!(config.storage.watch_interval(), Duration::from_millis(500));
        assert_eq!(config.export.path, "auction_results.csv");

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn existing_config_is_not_overwritten() {
        let tmp = std::env::temp_dir().join("auction_config_test_keep");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("defaults/auction.toml"), default_text()).unwrap();
        let edited = default_text().replace("turn_duration_secs = 30", "turn_duration_secs = 45");
        fs::write(tmp.join("config/auction.toml"), &edited).unwrap();

        assert_eq!(ensure_config_file(&tmp).unwrap(), None);

        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.auction.turn_duration_secs, 45);

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn config_without_defaults_is_fine() {
        let tmp = config_dir_with("auction_config_test_no_defaults", &default_text());
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        assert!(load_config_from(&tmp).is_ok());
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn missing_defaults_and_config_is_an_error() {
        let tmp = std::env::temp_dir().join("auction_config_test_empty");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();

        let err = ensure_config_file(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_auction_toml() {
        let tmp = std::env::temp_dir().join("auction_config_test_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();

        let err = load_config_from(&tmp).unwrap_err();
        match err {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("auction.toml")),
            other => panic!("expected FileNotFound, got {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_turn_duration() {
        let text = default_text().replace("turn_duration_secs = 30", "turn_duration_secs = 0");
        let tmp = config_dir_with("auction_config_test_zero_turn", &text);

        let err = load_config_from(&tmp).unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => {
                assert_eq!(field, "auction.turn_duration_secs")
            }
            other => panic!("expected ValidationError, got {other}"),
        }

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_watch_interval() {
        let text = default_text().replace("watch_interval_ms = 500", "watch_interval_ms = 0");
        let tmp = config_dir_with("auction_config_test_zero_watch", &text);

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "storage.watch_interval_ms"));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_empty_db_path() {
        let text = default_text().replace("db_path = \"auction-house.db\"", "db_path = \"\"");
        let tmp = config_dir_with("auction_config_test_empty_db", &text);

        assert!(matches!(
            load_config_from(&tmp),
            Err(ConfigError::ValidationError { .. })
        ));

        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_names_the_file() {
        let tmp = config_dir_with("auction_config_test_bad_toml", "[auction\nturn = ");

        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        assert!(err.to_string().contains("auction.toml"));

        let _ = fs::remove_dir_all(&tmp);
    }
}
