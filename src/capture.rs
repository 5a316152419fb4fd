use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::{fs, process::Command};

use crate::{
    settings::CaptureSettings,
    utils::{get_random_string, to_kebab_case, ARCHIVE_EXTENSION, DEFAULT_CAPTURE_COMMAND},
};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("capture_failed: {url}: {reason}")]
    Failed { url: String, reason: String },
}

impl CaptureError {
    pub fn failed(url: &str, reason: &str) -> CaptureError {
        CaptureError::Failed {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Anything that can turn a url into a WACZ archive.
#[async_trait]
pub trait CaptureEngine: Send + Sync {
    async fn capture(&self, url: &str, settings: &CaptureSettings)
        -> Result<Vec<u8>, CaptureError>;
}

/// Runs one capture through `engine`. No retries happen here; a failure is
/// handed back to the caller as is.
pub async fn capture<E: CaptureEngine + ?Sized>(
    engine: &E,
    url: &str,
    settings: &CaptureSettings,
) -> Result<Vec<u8>, CaptureError> {
    if url.trim().is_empty() {
        return Err(CaptureError::failed(url, "empty seed url"));
    }
    debug!("capturing {}", url);
    let archive = engine.capture(url, settings).await?;
    if archive.is_empty() {
        return Err(CaptureError::failed(url, "engine returned an empty archive"));
    }
    debug!("captured {} ({} bytes)", url, archive.len());
    Ok(archive)
}

/// Capture engine backed by the Scoop command line tool.
pub struct ScoopEngine {
    options: ScoopOptions,
}

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct ScoopOptions {
    // executable to run, looked up in PATH
    #[builder(default = "self.default_command()")]
    command: String,
    // arguments placed before the url, e.g. `["scoop"]` when command is `npx`
    #[builder(default = "vec![]")]
    prefix_args: Vec<String>,
    // parent directory for the per-capture scratch folders
    #[builder(default = "None")]
    scratch_dir: Option<PathBuf>,
}

impl ScoopOptions {
    pub fn default_builder() -> ScoopOptionsBuilder {
        ScoopOptionsBuilder::default()
    }
}

impl ScoopOptionsBuilder {
    fn default_command(&self) -> String {
        DEFAULT_CAPTURE_COMMAND.into()
    }
}

impl ScoopEngine {
    pub fn new(options: ScoopOptions) -> Self {
        ScoopEngine { options }
    }

    // one private folder per capture, under `scratch_dir` or the system temp dir
    async fn scratch_dir(&self) -> std::io::Result<PathBuf> {
        let parent = match &self.options.scratch_dir {
            Some(parent) => parent.clone(),
            None => std::env::temp_dir(),
        };
        let dir = parent.join(format!("capture-worker-{}", get_random_string(11)));
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    fn command_args(&self, url: &str, output: &PathBuf, settings: &CaptureSettings) -> Vec<String> {
        let mut args = self.options.prefix_args.clone();
        args.push(url.into());
        args.push("--output".into());
        args.push(output.to_string_lossy().into_owned());
        args.push("--format".into());
        args.push(ARCHIVE_EXTENSION.into());
        for (key, value) in settings.iter() {
            if let Some(v) = setting_to_arg(value) {
                args.push(format!("--{}", to_kebab_case(key)));
                args.push(v);
            }
        }
        args
    }
}

fn setting_to_arg(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|i| match i {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<String>>()
                .join(","),
        ),
        other => Some(other.to_string()),
    }
}

fn last_line(output: &[u8]) -> String {
    String::from_utf8_lossy(output)
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

#[async_trait]
impl CaptureEngine for ScoopEngine {
    async fn capture(
        &self,
        url: &str,
        settings: &CaptureSettings,
    ) -> Result<Vec<u8>, CaptureError> {
        let dir = self
            .scratch_dir()
            .await
            .map_err(|e| CaptureError::failed(url, &format!("scratch directory: {}", e)))?;
        let output = dir.join(format!("capture.{}", ARCHIVE_EXTENSION));
        let args = self.command_args(url, &output, settings);

        debug!("running {} with args: {:?}", self.options.command, args);
        let res = Command::new(&self.options.command)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await;

        let archive = match res {
            Err(e) => Err(CaptureError::failed(
                url,
                &format!("could not run {}: {}", self.options.command, e),
            )),
            Ok(out) if !out.status.success() => Err(CaptureError::failed(
                url,
                &format!("{} exited with {}: {}", self.options.command, out.status, last_line(&out.stderr)),
            )),
            Ok(_) => fs::read(&output)
                .await
                .map_err(|e| CaptureError::failed(url, &format!("no archive produced: {}", e))),
        };

        if let Err(e) = fs::remove_dir_all(&dir).await {
            warn!("could not remove scratch directory {:?}: {}", dir, e);
        }

        archive
    }
}
