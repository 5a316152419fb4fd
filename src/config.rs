use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    settings::{resolve_settings, CaptureSettings, DEFAULT_CAPTURE_SETTINGS},
    utils::{
        DEFAULT_CAPTURE_COMMAND, DEFAULT_VALKEY_ADDR, DEFAULT_VALKEY_PORT, REQUEST_QUEUE_KEY,
        RESULT_QUEUE_KEY,
    },
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config_read: could not read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config_parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config_invalid: {0}")]
    Invalid(String),
}

/// Worker configuration, read once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub output_dir: PathBuf,
    #[serde(default)]
    pub queue_address: Option<String>,
    #[serde(default)]
    pub request_queue: Option<String>,
    #[serde(default)]
    pub result_queue: Option<String>,
    #[serde(default)]
    pub capture_command: Option<String>,
    #[serde(default)]
    pub capture_settings: Option<CaptureSettings>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(data)?;
        if config.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("outputDir must not be empty".into()));
        }
        Ok(config)
    }

    /// Redis/Valkey connection url. Falls back to `VALKEY_ADDR`/`VALKEY_PORT`
    /// when no address is configured.
    pub fn queue_url(&self) -> String {
        match &self.queue_address {
            Some(addr) if addr.contains("://") => addr.clone(),
            Some(addr) => format!("redis://{}", addr),
            None => {
                let addr = std::env::var("VALKEY_ADDR").unwrap_or(DEFAULT_VALKEY_ADDR.into());
                let port = std::env::var("VALKEY_PORT").unwrap_or(DEFAULT_VALKEY_PORT.into());
                format!("redis://{}:{}/", addr, port)
            }
        }
    }

    pub fn request_queue(&self) -> String {
        self.request_queue
            .clone()
            .unwrap_or(REQUEST_QUEUE_KEY.into())
    }

    pub fn result_queue(&self) -> String {
        self.result_queue.clone().unwrap_or(RESULT_QUEUE_KEY.into())
    }

    pub fn capture_command(&self) -> String {
        self.capture_command
            .clone()
            .unwrap_or(DEFAULT_CAPTURE_COMMAND.into())
    }

    /// Engine defaults with this file's `captureSettings` applied on top.
    pub fn capture_settings(&self) -> CaptureSettings {
        resolve_settings(&DEFAULT_CAPTURE_SETTINGS, self.capture_settings.as_ref())
    }
}
