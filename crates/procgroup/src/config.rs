//! Client configuration.

use std::path::{Path, PathBuf};

/// Environment variable overriding the daemon socket path.
pub const SOCKET_PATH_ENV: &str = "PROCGROUP_SOCKET";

/// Default daemon socket location.
pub const DEFAULT_SOCKET_PATH: &str = "/run/procgroup/procgroup.sock";

/// Resolves the daemon socket path: the `PROCGROUP_SOCKET` environment
/// variable when set and non-empty, otherwise [`DEFAULT_SOCKET_PATH`].
#[must_use]
pub fn default_socket_path() -> PathBuf {
    match std::env::var_os(SOCKET_PATH_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_SOCKET_PATH),
    }
}

/// Connection settings for a [`GroupClient`](crate::GroupClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path of the daemon's Unix socket.
    pub socket_path: PathBuf,
}

impl ClientConfig {
    /// Configuration pointing at an explicit socket path.
    #[must_use]
    pub fn with_socket_path(path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}
