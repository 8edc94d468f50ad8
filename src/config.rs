use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a number, got {value:?}")]
    NotANumber { name: &'static str, value: String },
}

/// Server settings, read once from `CARBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    /// JSON array of vehicles seeding the in-memory directory.
    pub vehicles_file: Option<PathBuf>,
    /// Shared secret the auth gateway must present, if set.
    pub gateway_token: Option<String>,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub request_timeout: Duration,
    pub max_connections: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 10000,
            data_dir: PathBuf::from("./data"),
            vehicles_file: None,
            gateway_token: None,
            metrics_port: None,
            compact_threshold: 1000,
            request_timeout: Duration::from_secs(10),
            max_connections: 256,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::NotANumber { name, value }),
        _ => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let non_empty = |name: &str| get(name).filter(|v| !v.trim().is_empty());
        Ok(Self {
            bind: non_empty("CARBOOK_BIND").unwrap_or(defaults.bind),
            port: parse_var(&get, "CARBOOK_PORT")?.unwrap_or(defaults.port),
            data_dir: non_empty("CARBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            vehicles_file: non_empty("CARBOOK_VEHICLES_FILE").map(PathBuf::from),
            gateway_token: non_empty("CARBOOK_GATEWAY_TOKEN"),
            metrics_port: parse_var(&get, "CARBOOK_METRICS_PORT")?,
            compact_threshold: parse_var(&get, "CARBOOK_COMPACT_THRESHOLD")?
                .unwrap_or(defaults.compact_threshold),
            request_timeout: parse_var::<u64>(&get, "CARBOOK_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_connections: parse_var(&get, "CARBOOK_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }
}
