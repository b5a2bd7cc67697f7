// Copyright 2020 Joyent, Inc.

//! Runtime settings for a function service.
//!
//! A `Config` is assembled once at startup and handed to the server by
//! reference; nothing mutates it afterwards.

use std::net::SocketAddr;
use std::time::Duration;

use serde_derive::Deserialize;
use thiserror::Error;

pub const DEFAULT_NAME: &str = "fast-function";
pub const DEFAULT_PORT: u16 = 2030;
pub const DEFAULT_INVOKE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Service name used in log records.
    pub name: String,
    pub address: SocketAddr,
    /// Deadline for a single invocation; `None` waits forever.
    pub invoke_timeout_ms: Option<u64>,
    /// Largest Fast frame payload accepted from a caller.
    pub max_message_length: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invoke timeout must be greater than zero")]
    ZeroInvokeTimeout,
    #[error("max message length must be greater than zero")]
    ZeroMessageLength,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            name: String::from(DEFAULT_NAME),
            address: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            invoke_timeout_ms: Some(DEFAULT_INVOKE_TIMEOUT_MS),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

impl Config {
    pub fn invoke_timeout(&self) -> Option<Duration> {
        self.invoke_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.invoke_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroInvokeTimeout);
        }
        if self.max_message_length == 0 {
            return Err(ConfigError::ZeroMessageLength);
        }
        Ok(())
    }
}
