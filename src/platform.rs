use std::{env, path::PathBuf};

use crate::error::{GctxError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Platform {
    MacOS,
    Linux,
    Windows,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::MacOS => write!(f, "macOS"),
            Platform::Linux => write!(f, "Linux"),
            Platform::Windows => write!(f, "Windows"),
        }
    }
}

pub fn detect() -> Platform {
    match env::consts::OS {
        "macos" => Platform::MacOS,
        "windows" => Platform::Windows,
        _ => Platform::Linux,
    }
}

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(GctxError::NoHomeDir)
}

/// Directory gcloud keeps its state in. `CLOUDSDK_CONFIG` wins when set,
/// exactly as gcloud itself resolves it.
pub fn gcloud_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("CLOUDSDK_CONFIG").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    match detect() {
        Platform::Windows => dirs::config_dir()
            .map(|d| d.join("gcloud"))
            .ok_or(GctxError::NoHomeDir),
        // gcloud uses ~/.config on macOS too, not ~/Library/Application Support
        Platform::MacOS | Platform::Linux => Ok(home_dir()?.join(".config").join("gcloud")),
    }
}

pub fn gcloud_program() -> &'static str {
    match detect() {
        Platform::Windows => "gcloud.cmd",
        Platform::MacOS | Platform::Linux => "gcloud",
    }
}
