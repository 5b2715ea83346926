use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Port the relay listens on when nothing overrides it.
pub const DEFAULT_PORT: u16 = 8080;

/// Listen backlog for the accept socket.
pub const DEFAULT_BACKLOG: u32 = 5;

/// Server configuration, optionally loaded from TOML.
///
/// Every field has a default, so an empty file (or no file at all) yields
/// the fixed setup: port 8080, `cert.pem` and `key.pem` in the working
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port bound on all IPv4 interfaces.
    pub port: u16,
    /// PEM certificate chain presented to clients.
    pub cert_path: PathBuf,
    /// PEM private key matching `cert_path`.
    pub key_path: PathBuf,
    /// Pending-connection backlog passed to `listen(2)`.
    pub backlog: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            cert_path: PathBuf::from("cert.pem"),
            key_path: PathBuf::from("key.pem"),
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl ServerConfig {
    /// Read `path` as TOML. A file that does not exist yields `None`; one
    /// that exists but cannot be read or parsed is an error.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::ReadFailed(path.to_path_buf(), e)),
        };
        toml::from_str(&contents)
            .map(Some)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Resolve the effective config: the file at `path` if given and present,
    /// defaults otherwise, with `port` taking precedence over both.
    pub fn resolve(path: Option<&Path>, port: Option<u16>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => {
                let loaded = Self::load(p)?;
                if loaded.is_none() {
                    tracing::warn!(path = %p.display(), "config file not found, using defaults");
                }
                loaded.unwrap_or_default()
            }
            None => Self::default(),
        };
        if let Some(port) = port {
            config.port = port;
        }
        Ok(config)
    }
}

/// A config file that exists but is unusable. Both variants carry the path.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(PathBuf, std::io::Error),
    ParseFailed(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => write!(f, "cannot read config {}: {}", path.display(), e),
            Self::ParseFailed(path, e) => write!(f, "invalid config {}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFailed(_, e) => Some(e),
            Self::ParseFailed(_, e) => Some(e),
        }
    }
}
