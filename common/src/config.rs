//! Configuration parsing – reads either a `KEY=VALUE` file (`bagrec.conf`)
//! or a TOML file using the recorder node's parameter names
//! (`dataFolder`, `fileDuration`, `loggedTopics`).
//!
//! The configuration is validated once at load time and is read-only
//! afterwards.  Any problem with the session parameters is fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::selector::WILDCARD;

/// Default topics recorded when the config does not name any.
pub const DEFAULT_TOPICS: [&str; 3] = ["/rosout", "/system_messenger", "/labjack_ain"];

/// Errors raised while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in {}: {source}", .path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("File duration must be a positive number of seconds, got {0}")]
    NonPositiveDuration(i64),

    #[error("No logged topics configured")]
    NoTopics,

    #[error("Logged topic #{0} is blank")]
    BlankTopic(usize),

    #[error("Wildcard \"*\" cannot be combined with explicit topics: {0:?}")]
    MixedWildcard(Vec<String>),
}

/// Parameters of a single capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Directory under which each session's `Bag_<timestamp>` folder is created.
    pub output_root: PathBuf,
    /// Maximum duration of a single bag file before the writer splits it.
    pub file_duration_secs: u64,
    /// Topic selectors.  A lone `"*"` records every topic.
    pub stream_selectors: Vec<String>,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ── session ──────────────────────────────────────────────────────
    pub session: SessionConfig,

    // ── capture sink ─────────────────────────────────────────────────
    /// Storage plugin handed to the recorder (e.g. `mcap`, `sqlite3`).
    pub storage_id: String,
    /// Executable used to record, invoked as `<cmd> bag record ...`.
    pub record_command: String,

    // ── control ──────────────────────────────────────────────────────
    /// Address the control HTTP server listens on.
    pub listen_addr: String,
    /// Roll over to a fresh bag directory every N seconds (0 = never).
    pub reset_interval_secs: u64,
    /// Begin recording as soon as the process is up.
    pub start_on_boot: bool,
}

impl Config {
    /// Default config path.
    pub fn default_path() -> &'static str {
        "/etc/bagrec/bagrec.conf"
    }
}

/// Values as they appear in either file format, before defaults and
/// validation are applied.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawConfig {
    data_folder: Option<String>,
    file_duration: Option<i64>,
    logged_topics: Option<Vec<String>>,
    storage_id: Option<String>,
    record_command: Option<String>,
    listen_addr: Option<String>,
    reset_interval_secs: Option<u64>,
    start_on_boot: Option<bool>,
}

/// Load and validate the configuration at `path`.
///
/// Files with a `.toml` extension are parsed as TOML; anything else is
/// read as `KEY=VALUE` lines.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let raw: RawConfig = if path.extension().and_then(|e| e.to_str()) == Some("toml") {
        toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        raw_from_conf(&parse_conf(&text))?
    };

    let config = finish(raw)?;
    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Map `KEY=VALUE` pairs onto the raw config.
fn raw_from_conf(map: &HashMap<String, String>) -> Result<RawConfig, ConfigError> {
    let get = |key: &str| -> Option<String> { map.get(key).cloned() };

    let file_duration = match get("FILE_DURATION") {
        Some(v) => Some(v.parse::<i64>().map_err(|_| ConfigError::InvalidValue {
            key: "FILE_DURATION",
            value: v.clone(),
        })?),
        None => None,
    };
    let reset_interval_secs = match get("RESET_INTERVAL_SECS") {
        Some(v) => Some(v.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
            key: "RESET_INTERVAL_SECS",
            value: v.clone(),
        })?),
        None => None,
    };

    Ok(RawConfig {
        data_folder: get("DATA_FOLDER").filter(|s| !s.is_empty()),
        file_duration,
        logged_topics: get("LOGGED_TOPICS")
            .map(|s| s.split(',').map(|t| t.trim().to_string()).collect()),
        storage_id: get("STORAGE_ID").filter(|s| !s.is_empty()),
        record_command: get("RECORD_COMMAND").filter(|s| !s.is_empty()),
        listen_addr: get("LISTEN_ADDR").filter(|s| !s.is_empty()),
        reset_interval_secs,
        start_on_boot: get("START_ON_BOOT").map(|v| v == "1" || v.eq_ignore_ascii_case("true")),
    })
}

/// Apply defaults and validate.
fn finish(raw: RawConfig) -> Result<Config, ConfigError> {
    let file_duration = raw.file_duration.unwrap_or(60);
    if file_duration <= 0 {
        return Err(ConfigError::NonPositiveDuration(file_duration));
    }

    let topics = raw
        .logged_topics
        .unwrap_or_else(|| DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect());
    validate_topics(&topics)?;

    let config = Config {
        session: SessionConfig {
            output_root: PathBuf::from(raw.data_folder.unwrap_or_else(|| "/home/m2/Data".into())),
            file_duration_secs: file_duration as u64,
            stream_selectors: topics,
        },
        storage_id: raw.storage_id.unwrap_or_else(|| "mcap".into()),
        record_command: raw.record_command.unwrap_or_else(|| "ros2".into()),
        listen_addr: raw.listen_addr.unwrap_or_else(|| "0.0.0.0:8090".into()),
        reset_interval_secs: raw.reset_interval_secs.unwrap_or(0),
        start_on_boot: raw.start_on_boot.unwrap_or(true),
    };

    if config.reset_interval_secs > 0
        && config.reset_interval_secs < config.session.file_duration_secs
    {
        warn!(
            "RESET_INTERVAL_SECS ({}) is shorter than FILE_DURATION ({}); bags will never split",
            config.reset_interval_secs, config.session.file_duration_secs
        );
    }

    Ok(config)
}

fn validate_topics(topics: &[String]) -> Result<(), ConfigError> {
    if topics.is_empty() {
        return Err(ConfigError::NoTopics);
    }
    if let Some(i) = topics.iter().position(|t| t.trim().is_empty()) {
        // A single blank entry is what an empty `LOGGED_TOPICS=` yields.
        if topics.len() == 1 {
            return Err(ConfigError::NoTopics);
        }
        return Err(ConfigError::BlankTopic(i));
    }
    if topics.len() > 1 && topics.iter().any(|t| t == WILDCARD) {
        return Err(ConfigError::MixedWildcard(topics.to_vec()));
    }
    Ok(())
}

/// Parse `KEY=VALUE` lines into a map, stripping optional double-quotes.
fn parse_conf(text: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            let key = key.trim();
            let val = val.trim().trim_matches('"');
            map.insert(key.to_string(), val.to_string());
        }
    }
    map
}

// ─── tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn write_conf(name: &str, content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_parse_conf() {
        let text = r#"
# comment
DATA_FOLDER=/data
FILE_DURATION="120"
LOGGED_TOPICS="/a, /b"
"#;
        let map = parse_conf(text);
        assert_eq!(map["DATA_FOLDER"], "/data");
        assert_eq!(map["FILE_DURATION"], "120");
        assert_eq!(map["LOGGED_TOPICS"], "/a, /b");
    }

    #[test]
    fn test_defaults() {
        let (_dir, path) = write_conf("bagrec.conf", "# nothing set\n");
        let config = load(&path).unwrap();
        assert_eq!(config.session.output_root, PathBuf::from("/home/m2/Data"));
        assert_eq!(config.session.file_duration_secs, 60);
        assert_eq!(
            config.session.stream_selectors,
            vec!["/rosout", "/system_messenger", "/labjack_ain"]
        );
        assert_eq!(config.storage_id, "mcap");
        assert_eq!(config.reset_interval_secs, 0);
        assert!(config.start_on_boot);
    }

    #[test]
    fn test_load_key_value() {
        let (_dir, path) = write_conf(
            "bagrec.conf",
            "DATA_FOLDER=/data\nFILE_DURATION=30\nLOGGED_TOPICS=/a,/b\nSTART_ON_BOOT=0\n",
        );
        let config = load(&path).unwrap();
        assert_eq!(config.session.output_root, PathBuf::from("/data"));
        assert_eq!(config.session.file_duration_secs, 30);
        assert_eq!(config.session.stream_selectors, vec!["/a", "/b"]);
        assert!(!config.start_on_boot);
    }

    #[test]
    fn test_load_toml() {
        let (_dir, path) = write_conf(
            "bagrec.toml",
            r#"
dataFolder = "/data"
fileDuration = 60
loggedTopics = ["*"]
resetIntervalSecs = 3600
"#,
        );
        let config = load(&path).unwrap();
        assert_eq!(config.session.stream_selectors, vec!["*"]);
        assert_eq!(config.reset_interval_secs, 3600);
    }

    #[test]
    fn test_empty_topics_rejected() {
        let (_dir, path) = write_conf("bagrec.conf", "LOGGED_TOPICS=\n");
        assert!(matches!(load(&path), Err(ConfigError::NoTopics)));

        let (_dir, path) = write_conf("bagrec.toml", "loggedTopics = []\n");
        assert!(matches!(load(&path), Err(ConfigError::NoTopics)));
    }

    #[test]
    fn test_blank_topic_rejected() {
        let (_dir, path) = write_conf("bagrec.conf", "LOGGED_TOPICS=/a,,/b\n");
        assert!(matches!(load(&path), Err(ConfigError::BlankTopic(1))));
    }

    #[test]
    fn test_mixed_wildcard_rejected() {
        let (_dir, path) = write_conf("bagrec.conf", "LOGGED_TOPICS=*,/foo\n");
        assert!(matches!(load(&path), Err(ConfigError::MixedWildcard(_))));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let (_dir, path) = write_conf("bagrec.conf", "FILE_DURATION=0\n");
        assert!(matches!(load(&path), Err(ConfigError::NonPositiveDuration(0))));

        let (_dir, path) = write_conf("bagrec.conf", "FILE_DURATION=soon\n");
        assert!(matches!(
            load(&path),
            Err(ConfigError::InvalidValue { key: "FILE_DURATION", .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = load(Path::new("/nonexistent/bagrec.conf")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
