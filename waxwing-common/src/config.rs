//! Configuration loading and root folder resolution
//!
//! Resolution priority for the music root folder:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter directive, e.g. "info" or "waxwing_ident=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Identification section of the TOML config
///
/// Every field is optional; the engine supplies defaults for anything left
/// unset. Credentials may also arrive via environment variables, which take
/// precedence over the TOML values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyToml {
    pub acceptance_threshold: Option<f64>,
    pub usefulness_floor: Option<f64>,
    pub worker_limit: Option<usize>,
    pub max_attempts: Option<u32>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_cap_ms: Option<u64>,
    /// "source-priority" or "latest-adapter"
    pub tie_break: Option<String>,
    pub lookup_enabled: Option<bool>,
    pub lookup_endpoint: Option<String>,
    pub lookup_api_key: Option<String>,
    pub lookup_timeout_secs: Option<u64>,
    pub spectral_enabled: Option<bool>,
    pub spectral_index_path: Option<String>,
    pub spectral_min_similarity: Option<f64>,
    pub enrich_enabled: Option<bool>,
    pub enrich_endpoint: Option<String>,
    pub enrich_timeout_secs: Option<u64>,
    pub cache_max_entries: Option<usize>,
    pub cache_max_age_days: Option<i64>,
}

/// Organizer section of the TOML config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganizeToml {
    /// Rename pattern, e.g. "{artist}/{album}/{track} - {title}"
    pub pattern: Option<String>,
    /// Destination root; defaults to the scanned root folder
    pub target_root: Option<String>,
}

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<String>,
    pub cache_path: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub identify: IdentifyToml,
    #[serde(default)]
    pub organize: OrganizeToml,
}

/// Load and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load the config file from the default location, if one exists
///
/// Looks for `~/.config/waxwing/config.toml` (and `/etc/waxwing/config.toml`
/// on Linux). Absence is not an error; all values then come from defaults,
/// CLI arguments, and the environment.
pub fn load_default_config() -> Result<Option<TomlConfig>> {
    for candidate in default_config_paths() {
        if candidate.exists() {
            return load_toml_config(&candidate).map(Some);
        }
    }
    Ok(None)
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("waxwing").join("config.toml"));
    }
    if cfg!(target_os = "linux") {
        paths.push(PathBuf::from("/etc/waxwing/config.toml"));
    }
    paths
}

/// Resolve the music root folder
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    config: Option<&TomlConfig>,
) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("WAXWING_ROOT_FOLDER") {
        return Ok(PathBuf::from(path));
    }

    // Priority 3: TOML config file
    if let Some(root) = config.and_then(|c| c.root_folder.as_deref()) {
        return Ok(PathBuf::from(root));
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_root_folder())
}

/// OS-dependent default music folder
fn default_root_folder() -> PathBuf {
    if let Some(dir) = dirs::audio_dir() {
        return dir;
    }
    if let Some(home) = dirs::home_dir() {
        return home.join("Music");
    }
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_arg_wins() {
        let config = TomlConfig {
            root_folder: Some("/from/toml".to_string()),
            ..Default::default()
        };
        let resolved = resolve_root_folder(Some("/from/cli"), Some(&config)).unwrap();
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }

    #[test]
    fn test_toml_used_when_no_cli_arg() {
        let config = TomlConfig {
            root_folder: Some("/from/toml".to_string()),
            ..Default::default()
        };
        let resolved = resolve_root_folder(None, Some(&config)).unwrap();
        assert_eq!(resolved, PathBuf::from("/from/toml"));
    }

    #[test]
    fn test_parse_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            r#"
root_folder = "/music"
cache_path = "/var/cache/waxwing.db"

[logging]
level = "debug"

[identify]
acceptance_threshold = 0.9
worker_limit = 8
lookup_api_key = "abc123"
tie_break = "latest-adapter"

[organize]
pattern = "{{artist}}/{{title}}"
"#
        )
        .unwrap();

        let config = load_toml_config(&path).unwrap();
        assert_eq!(config.root_folder.as_deref(), Some("/music"));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.identify.acceptance_threshold, Some(0.9));
        assert_eq!(config.identify.worker_limit, Some(8));
        assert_eq!(config.identify.lookup_api_key.as_deref(), Some("abc123"));
        assert_eq!(config.organize.pattern.as_deref(), Some("{artist}/{title}"));
    }

    #[test]
    fn test_missing_sections_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "root_folder = \"/music\"\n").unwrap();

        let config = load_toml_config(&path).unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.identify.acceptance_threshold.is_none());
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "root_folder = [not toml").unwrap();

        match load_toml_config(&path) {
            Err(Error::Config(_)) => {}
            other => panic!("expected Config error, got {:?}", other),
        }
    }
}
