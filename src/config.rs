// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Server configuration.

use crate::auth::PASSWORD_RECORD_LENGTH;
use crate::repository::valid_filename;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Boat server configuration, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,

    /// TCP port to listen on (default: 8235)
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Root directory holding `tmp/` and the user repositories
    #[serde(default = "default_repository_root")]
    pub repository_root: PathBuf,

    /// TLS certificate chain file (PEM)
    pub tls_cert_path: PathBuf,

    /// TLS private key file (PEM)
    pub tls_key_path: PathBuf,

    /// Accounts allowed to upload
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// A single account entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub username: String,

    /// `salt || lowercase-hex HMAC-SHA-256 digest`, as produced by
    /// `boatd --hash-password`.
    pub password_record: String,

    /// Repository directory name; restricted to the filename character set.
    pub repository: String,

    #[serde(default)]
    pub versioning_enabled: bool,
}

fn default_listen_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_listen_port() -> u16 {
    8235
}

fn default_repository_root() -> PathBuf {
    PathBuf::from("/var/lib/boat")
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_port == 0 {
            return Err(ConfigError::InvalidValue("listen_port cannot be 0".into()));
        }
        if self.users.is_empty() {
            return Err(ConfigError::InvalidValue(
                "at least one user must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            if user.username.is_empty() {
                return Err(ConfigError::InvalidValue("username cannot be empty".into()));
            }
            if !seen.insert(user.username.as_str()) {
                return Err(ConfigError::InvalidValue(format!(
                    "duplicate user '{}'",
                    user.username
                )));
            }
            if user.password_record.len() != PASSWORD_RECORD_LENGTH {
                return Err(ConfigError::InvalidValue(format!(
                    "password record for '{}' must be {} characters",
                    user.username, PASSWORD_RECORD_LENGTH
                )));
            }
            if !valid_filename(&user.repository) {
                return Err(ConfigError::InvalidValue(format!(
                    "repository for '{}' is not a valid directory name",
                    user.username
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}
