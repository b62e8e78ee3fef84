use crate::watcher::WatchConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Directory watched when no argument is given.
pub const ROOT_ENV: &str = "VAULT_ROOT";
/// Debounce in milliseconds when no argument is given.
pub const DEBOUNCE_ENV: &str = "VAULT_WATCH_DEBOUNCE_MS";

/// Daemon configuration: command-line values with environment fallbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory to watch
    pub root: PathBuf,
    pub watch: WatchConfig,
}

impl Config {
    /// Resolve from explicit arguments, falling back to the process
    /// environment.
    pub fn resolve(root: Option<String>, debounce_ms: Option<u64>) -> Result<Self, ConfigError> {
        Self::resolve_with(root, debounce_ms, |name| std::env::var(name).ok())
    }

    /// Resolve with a custom environment lookup.
    pub fn resolve_with(
        root: Option<String>,
        debounce_ms: Option<u64>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let root = root
            .or_else(|| env(ROOT_ENV))
            .ok_or(ConfigError::MissingRoot)?;

        let debounce = match debounce_ms {
            Some(ms) => Duration::from_millis(ms),
            None => match env(DEBOUNCE_ENV) {
                Some(raw) => Duration::from_millis(
                    raw.trim()
                        .parse()
                        .map_err(|_| ConfigError::InvalidDebounce(raw.clone()))?,
                ),
                None => WatchConfig::default().debounce,
            },
        };

        Ok(Self {
            root: expand_tilde(&root),
            watch: WatchConfig { debounce },
        })
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No directory given and VAULT_ROOT is not set")]
    MissingRoot,

    #[error("VAULT_WATCH_DEBOUNCE_MS must be a whole number of milliseconds, got {0:?}")]
    InvalidDebounce(String),
}
