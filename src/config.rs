//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! (falling back to built-in defaults when the file is absent), then applies
//! `AGENTSENSE_DB_PATH` and `AGENTSENSE_LOG_LEVEL` env overrides. Only the
//! binary uses this — the library takes explicit paths and values.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// Fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backing database file (already expanded, no `~`).
    pub db_path: PathBuf,
    pub log_level: String,
    /// Default cap on entities returned by the `recall` command.
    pub recall_max_entities: usize,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    store: RawStore,
    #[serde(default)]
    recall: RawRecall,
}

#[derive(Deserialize)]
struct RawStore {
    #[serde(default = "default_db_path")]
    db_path: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Deserialize)]
struct RawRecall {
    #[serde(default = "default_max_entities")]
    max_entities: usize,
}

impl Default for RawStore {
    fn default() -> Self {
        Self { db_path: default_db_path(), log_level: default_log_level() }
    }
}

impl Default for RawRecall {
    fn default() -> Self {
        Self { max_entities: default_max_entities() }
    }
}

fn default_db_path() -> String {
    "~/.agentsense/agentsense.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_entities() -> usize {
    5
}

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    let db_path_override = env::var("AGENTSENSE_DB_PATH").ok();
    let log_level_override = env::var("AGENTSENSE_LOG_LEVEL").ok();
    load_from(
        Path::new("config/default.toml"),
        db_path_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let parsed: RawConfig = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?
    } else {
        RawConfig::default()
    };

    let db_path_str = db_path_override.unwrap_or(&parsed.store.db_path).to_string();
    let log_level = log_level_override.unwrap_or(&parsed.store.log_level).to_string();

    Ok(Config {
        db_path: expand_home(&db_path_str),
        log_level,
        recall_max_entities: parsed.recall.max_entities,
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[store]
db_path = "/tmp/graph-test.db"
log_level = "debug"

[recall]
max_entities = 8
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/graph-test.db"));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.recall_max_entities, 8);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_from(Path::new("/nonexistent/config.toml"), None, None).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.recall_max_entities, 5);
        assert!(cfg.db_path.ends_with(".agentsense/agentsense.db"));
    }

    #[test]
    fn overrides_win() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/other.db"), Some("trace")).unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(cfg.log_level, "trace");
    }

    #[test]
    fn malformed_toml_errors() {
        let f = write_toml("store = not toml [");
        let result = load_from(f.path(), None, None);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("config error"));
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.agentsense");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".agentsense"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }
}
