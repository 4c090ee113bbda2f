//! Server configuration.
//!
//! [`ServerConfig`] is what the protocol server needs at runtime.
//! [`FileConfig`] is the optional TOML file read by the binary; every field
//! is optional and explicit command-line flags take precedence.

use cellfs_discovery::DiscoveryConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::constants::DEFAULT_IDLE_TIMEOUT;

/// Runtime settings of an [`FsServer`](crate::FsServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Refuse write opens and mutating unary calls with `NotPermitted`.
    pub read_only: bool,
    /// Close a session after this long without a request.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Contents of a `cellfs-server` TOML config file.
///
/// ```toml
/// root = "/srv/share"
/// bind = "0.0.0.0:8100"
/// service = "cellfs.FS"
/// read_only = true
///
/// [discovery]
/// group = "224.0.0.1:9999"
/// announce_interval = 1.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub root: Option<PathBuf>,
    pub bind: Option<SocketAddr>,
    pub service: Option<String>,
    pub hostname: Option<String>,
    pub read_only: Option<bool>,
    pub announce: Option<bool>,
    pub fast_read: Option<bool>,
    /// Seconds.
    pub idle_timeout: Option<f64>,
    pub discovery: Option<DiscoveryConfig>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid idle_timeout {0}")]
    IdleTimeout(f64),
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn idle_timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.idle_timeout
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::IdleTimeout(secs)))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
root = "/srv/share"
read_only = true
idle_timeout = 2.5

[discovery]
group = "239.1.2.3:7000"
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.root.as_deref(), Some(Path::new("/srv/share")));
        assert_eq!(config.read_only, Some(true));
        assert_eq!(config.bind, None);
        assert_eq!(
            config.idle_timeout().unwrap(),
            Some(Duration::from_millis(2500))
        );

        let discovery = config.discovery.unwrap();
        assert_eq!(discovery.group, "239.1.2.3:7000".parse().unwrap());
        assert_eq!(discovery.announce_interval, DiscoveryConfig::default().announce_interval);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "roots = \"/x\"").unwrap();
        assert!(matches!(
            FileConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            FileConfig::load(Path::new("/nonexistent/cellfs.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
