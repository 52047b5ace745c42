use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{error::Result, platform};

/// File name gcloud writes application default credentials to.
pub const ADC_FILE_NAME: &str = "application_default_credentials.json";

const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Runtime locations and knobs, resolved once per invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root of gctx state: registry file plus stored credential slots.
    pub config_dir: PathBuf,
    /// The shared credential file gcloud and client libraries read.
    pub adc_path: PathBuf,
    /// gcloud executable to shell out to.
    pub gcloud: String,
    pub watch_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let config_dir = match env::var_os("GCTX_HOME").filter(|v| !v.is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => platform::home_dir()?.join(".config").join("gctx"),
        };

        let adc_path = platform::gcloud_config_dir()?.join(ADC_FILE_NAME);

        let gcloud = env::var("GCTX_GCLOUD")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| platform::gcloud_program().to_string());

        let watch_timeout = env::var("GCTX_WATCH_TIMEOUT")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_WATCH_TIMEOUT);

        Ok(Settings {
            config_dir,
            adc_path,
            gcloud,
            watch_timeout,
        })
    }

    /// Settings rooted at an arbitrary directory, used by tests.
    #[cfg(test)]
    pub fn rooted_at(root: &Path) -> Self {
        Settings {
            config_dir: root.join("gctx"),
            adc_path: root.join("gcloud").join(ADC_FILE_NAME),
            gcloud: "gcloud".to_string(),
            watch_timeout: Duration::from_millis(200),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    pub fn slot_dir(&self) -> PathBuf {
        self.config_dir.join("adc")
    }
}

pub fn display_path(path: &Path) -> String {
    match platform::home_dir() {
        Ok(home) => match path.strip_prefix(&home) {
            Ok(rest) => format!("~/{}", rest.display()),
            Err(_) => path.display().to_string(),
        },
        Err(_) => path.display().to_string(),
    }
}
