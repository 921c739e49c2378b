use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Server settings, read once from `GYMBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    /// JSON array of user profiles loaded into the directory at startup.
    pub seed_users: Option<PathBuf>,
    pub compact_threshold: u64,
    /// `None` disables the completion sweep.
    pub sweep_interval: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5000,
            data_dir: PathBuf::from("./data"),
            metrics_port: None,
            seed_users: None,
            compact_threshold: 1000,
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key → value source. Unparseable numbers fall
    /// back to the default with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sweep_secs = parse_or(
            "GYMBOOK_SWEEP_INTERVAL_SECS",
            text("GYMBOOK_SWEEP_INTERVAL_SECS"),
            60u64,
        );

        Self {
            bind: text("GYMBOOK_BIND").unwrap_or(defaults.bind),
            port: parse_or("GYMBOOK_PORT", text("GYMBOOK_PORT"), defaults.port),
            data_dir: text("GYMBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            metrics_port: text("GYMBOOK_METRICS_PORT").and_then(|v| match v.trim().parse() {
                Ok(port) => Some(port),
                Err(_) => {
                    warn!("GYMBOOK_METRICS_PORT={v:?} is not a port; metrics disabled");
                    None
                }
            }),
            seed_users: text("GYMBOOK_SEED_USERS").map(PathBuf::from),
            compact_threshold: parse_or(
                "GYMBOOK_COMPACT_THRESHOLD",
                text("GYMBOOK_COMPACT_THRESHOLD"),
                defaults.compact_threshold,
            ),
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<T: FromStr + std::fmt::Display>(key: &str, value: Option<String>, default: T) -> T {
    let Some(value) = value else {
        return default;
    };
    match value.trim().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!("{key}={value:?} is not valid; using {default}");
            default
        }
    }
}
