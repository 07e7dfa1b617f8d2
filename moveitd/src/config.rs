use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_POLL_SECS: u64 = 10;
pub const DEFAULT_MAX_CONCURRENT_ACTIONS: usize = 4;
pub const DEFAULT_LIST_PAGE_SIZE: u32 = 100;

pub const ENV_BASE_URL: &str = "MOVEIT_BASE_URL";
pub const ENV_SYNC_DIR: &str = "MOVEIT_SYNC_DIR";
pub const ENV_USERNAME: &str = "MOVEIT_USERNAME";
pub const ENV_PASSWORD: &str = "MOVEIT_PASSWORD";
pub const ENV_POLL_SECS: &str = "MOVEIT_POLL_SECS";
pub const ENV_MAX_CONCURRENT_ACTIONS: &str = "MOVEIT_MAX_CONCURRENT_ACTIONS";
pub const ENV_LIST_PAGE_SIZE: &str = "MOVEIT_LIST_PAGE_SIZE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    MissingVar(&'static str),
    #[error("sync directory {path} is unavailable: {source}")]
    SyncDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sync path is not a directory: {0}")]
    NotADirectory(PathBuf),
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything one run needs, fixed at startup and handed to the engine.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub base_url: String,
    pub sync_dir: PathBuf,
    pub poll_interval: Duration,
    pub max_concurrent_actions: usize,
    pub list_page_size: u32,
    pub credentials: Credentials,
}

impl SessionConfig {
    pub fn new(
        base_url: impl Into<String>,
        sync_dir: impl Into<PathBuf>,
        credentials: Credentials,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            sync_dir: sync_dir.into(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_SECS),
            max_concurrent_actions: DEFAULT_MAX_CONCURRENT_ACTIONS,
            list_page_size: DEFAULT_LIST_PAGE_SIZE,
            credentials,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let home = dirs::home_dir();
        Self::from_lookup(|name| std::env::var(name).ok(), home.as_deref())
    }

    pub fn from_lookup<F>(lookup: F, home: Option<&Path>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingVar(name))
        };

        let base_url = required(ENV_BASE_URL)?;
        let sync_dir = required(ENV_SYNC_DIR)?;
        let sync_dir = match home {
            Some(home) => expand_with_home(sync_dir.trim(), home),
            None => PathBuf::from(sync_dir.trim()),
        };
        let credentials = Credentials::new(required(ENV_USERNAME)?, required(ENV_PASSWORD)?);

        Ok(Self {
            base_url: base_url.trim().to_string(),
            sync_dir,
            poll_interval: Duration::from_secs(read_u64(&lookup, ENV_POLL_SECS, DEFAULT_POLL_SECS)),
            max_concurrent_actions: read_u64(
                &lookup,
                ENV_MAX_CONCURRENT_ACTIONS,
                DEFAULT_MAX_CONCURRENT_ACTIONS as u64,
            ) as usize,
            list_page_size: read_u64(&lookup, ENV_LIST_PAGE_SIZE, u64::from(DEFAULT_LIST_PAGE_SIZE))
                .min(u64::from(u32::MAX)) as u32,
            credentials,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Resolves the sync directory to an absolute, existing directory.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let canonical = std::fs::canonicalize(&self.sync_dir).map_err(|source| {
            ConfigError::SyncDir {
                path: self.sync_dir.clone(),
                source,
            }
        })?;
        if !canonical.is_dir() {
            return Err(ConfigError::NotADirectory(canonical));
        }
        self.sync_dir = canonical;
        Ok(self)
    }
}

pub fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn expands_tilde_to_home_dir() {
        let home = PathBuf::from("/tmp/home-user");
        assert_eq!(
            expand_with_home("~/Transfer", &home),
            PathBuf::from("/tmp/home-user/Transfer")
        );
        assert_eq!(expand_with_home("/abs", &home), PathBuf::from("/abs"));
    }

    #[test]
    fn reads_required_values_and_defaults() {
        let lookup = lookup_from(&[
            (ENV_BASE_URL, "https://transfer.example"),
            (ENV_SYNC_DIR, "~/Transfer"),
            (ENV_USERNAME, "alice"),
            (ENV_PASSWORD, "secret"),
        ]);
        let config =
            SessionConfig::from_lookup(lookup, Some(Path::new("/home/alice"))).unwrap();

        assert_eq!(config.base_url, "https://transfer.example");
        assert_eq!(config.sync_dir, PathBuf::from("/home/alice/Transfer"));
        assert_eq!(config.poll_interval, Duration::from_secs(DEFAULT_POLL_SECS));
        assert_eq!(config.max_concurrent_actions, DEFAULT_MAX_CONCURRENT_ACTIONS);
        assert_eq!(config.list_page_size, DEFAULT_LIST_PAGE_SIZE);
        assert_eq!(config.credentials.username, "alice");
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let lookup = lookup_from(&[
            (ENV_BASE_URL, "https://transfer.example"),
            (ENV_SYNC_DIR, "/data"),
            (ENV_USERNAME, "alice"),
            (ENV_PASSWORD, "secret"),
            (ENV_POLL_SECS, "soon"),
            (ENV_MAX_CONCURRENT_ACTIONS, "0"),
            (ENV_LIST_PAGE_SIZE, "25"),
        ]);
        let config = SessionConfig::from_lookup(lookup, None).unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(DEFAULT_POLL_SECS));
        assert_eq!(config.max_concurrent_actions, DEFAULT_MAX_CONCURRENT_ACTIONS);
        assert_eq!(config.list_page_size, 25);
    }

    #[test]
    fn missing_credentials_are_reported_by_name() {
        let lookup = lookup_from(&[
            (ENV_BASE_URL, "https://transfer.example"),
            (ENV_SYNC_DIR, "/data"),
            (ENV_USERNAME, "alice"),
        ]);
        let err = SessionConfig::from_lookup(lookup, None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ENV_PASSWORD)));
    }

    #[test]
    fn debug_output_hides_password() {
        let creds = Credentials::new("alice", "hunter2");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn validate_rejects_missing_dir_and_files() {
        let dir = tempdir().unwrap();
        let creds = Credentials::new("a", "b");

        let missing = SessionConfig::new("http://x", dir.path().join("nope"), creds.clone());
        assert!(matches!(missing.validate(), Err(ConfigError::SyncDir { .. })));

        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();
        let not_dir = SessionConfig::new("http://x", &file, creds.clone());
        assert!(matches!(not_dir.validate(), Err(ConfigError::NotADirectory(_))));

        let ok = SessionConfig::new("http://x", dir.path(), creds).validate().unwrap();
        assert!(ok.sync_dir.is_absolute());
    }
}
