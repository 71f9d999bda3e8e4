//! Environment-driven configuration, matching the variables this router has
//! always read from its surrounding environment rather than a config file
//! or remote config service (there is only ever one process per host, and
//! restarting it to pick up a new cluster topology is an acceptable cost —
//! see spec.md §3 lifecycle: caches and connections live for the process
//! lifetime).

use std::collections::VecDeque;
use std::env;

use crate::error::{Result, RouterError};

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| RouterError::Configuration(format!("missing required env var {key}")))
}

fn required_u16(key: &str) -> Result<u16> {
    required(key)?
        .parse()
        .map_err(|_| RouterError::Configuration(format!("{key} must be a valid port number")))
}

fn optional(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_u16(key: &str, default: u16) -> Result<u16> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| RouterError::Configuration(format!("{key} must be a valid port number"))),
        Err(_) => Ok(default),
    }
}

fn optional_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| RouterError::Configuration(format!("{key} must be an integer"))),
        Err(_) => Ok(default),
    }
}

/// Connection parameters for the central directory database, passed
/// through verbatim to the directory client helper.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Optional schema prefix applied to the `collection` and `node`
    /// tables (e.g. `nimbusio_central`). Unqualified by default.
    pub schema: Option<String>,
}

/// Liveness store location (Redis).
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
}

impl RedisConfig {
    pub fn url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.db)
    }
}

/// Top-level router configuration, assembled from environment variables at
/// process start. See spec.md §6 for the authoritative variable list.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub service_domain: String,
    pub web_server_port: u16,
    pub web_writer_port: u16,
    pub management_api_request_dest: VecDeque<String>,
    pub redis: RedisConfig,
    pub directory: DirectoryConfig,
}

impl RouterConfig {
    pub fn from_env() -> Result<Self> {
        let service_domain = required("SERVICE_DOMAIN")?;
        let web_server_port = required_u16("WEB_SERVER_PORT")?;
        let web_writer_port = required_u16("WEB_WRITER_PORT")?;

        let dest_list = required("MANAGEMENT_API_REQUEST_DEST")?;
        let management_api_request_dest: VecDeque<String> = dest_list
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();
        if management_api_request_dest.is_empty() {
            return Err(RouterError::Configuration(
                "MANAGEMENT_API_REQUEST_DEST must list at least one host".to_string(),
            ));
        }

        let redis = RedisConfig {
            host: optional("REDIS_HOST", "localhost"),
            port: optional_u16("REDIS_PORT", 6379)?,
            db: optional_i64("REDIS_DB", 0)?,
        };

        let directory = DirectoryConfig {
            host: optional("DIRECTORY_HOST", "localhost"),
            port: optional_u16("DIRECTORY_PORT", 5432)?,
            database: required("DIRECTORY_DATABASE")?,
            user: required("DIRECTORY_USER")?,
            password: env::var("DIRECTORY_PASSWORD").unwrap_or_default(),
            schema: env::var("DIRECTORY_SCHEMA").ok(),
        };

        Ok(Self {
            service_domain,
            web_server_port,
            web_writer_port,
            management_api_request_dest,
            redis,
            directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_url_format() {
        let cfg = RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            db: 2,
        };
        assert_eq!(cfg.url(), "redis://localhost:6379/2");
    }
}
