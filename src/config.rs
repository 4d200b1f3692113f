use std::path::PathBuf;
use std::str::FromStr;

fn parsed<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    get(key).and_then(|s| s.trim().parse().ok())
}

/// Runtime settings, read from `SLOTBOOK_*` environment variables.
/// Unset or unparseable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub compact_threshold: u64,
    /// Comma-separated admin emails or principal ids.
    pub admins: String,
    pub holidays_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            port: parsed(&get, "SLOTBOOK_PORT").unwrap_or(5480),
            bind: get("SLOTBOOK_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: get("SLOTBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            password: get("SLOTBOOK_PASSWORD").unwrap_or_else(|| "slotbook".into()),
            max_connections: parsed(&get, "SLOTBOOK_MAX_CONNECTIONS").unwrap_or(256),
            compact_threshold: parsed(&get, "SLOTBOOK_COMPACT_THRESHOLD").unwrap_or(1000),
            admins: get("SLOTBOOK_ADMINS").unwrap_or_default(),
            holidays_file: get("SLOTBOOK_HOLIDAYS_FILE")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            metrics_port: parsed(&get, "SLOTBOOK_METRICS_PORT"),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slots.wal")
    }

    pub fn directory_path(&self) -> PathBuf {
        self.data_dir.join("directory.json")
    }
}
