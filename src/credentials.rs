use serde::Deserialize;
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

use crate::error::{GctxError, Result};

/// Fields of an application default credentials file we expect to be able to
/// parse. Extra fields are ignored; missing ones default to empty.
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct AdcCredential {
    #[allow(dead_code)]
    pub client_id: String,
    #[allow(dead_code)]
    pub client_secret: String,
    pub quota_project_id: String,
    #[allow(dead_code)]
    pub refresh_token: String,
    #[allow(dead_code)]
    #[serde(rename = "type")]
    pub kind: String,
}

/// Swaps the shared ADC file in and out of per-account slots.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    live_path: PathBuf,
    slot_dir: PathBuf,
}

impl CredentialStore {
    pub fn new(live_path: impl Into<PathBuf>, slot_dir: impl Into<PathBuf>) -> Self {
        CredentialStore {
            live_path: live_path.into(),
            slot_dir: slot_dir.into(),
        }
    }

    #[cfg(test)]
    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn slot_path(&self, account: &str) -> PathBuf {
        self.slot_dir.join(format!("{account}_adc.json"))
    }

    /// Copy the live ADC file into the account's slot. Returns the slot path.
    pub fn save(&self, account: &str) -> Result<PathBuf> {
        if !self.live_path.is_file() {
            return Err(GctxError::CredentialsNotFound(self.live_path.clone()));
        }
        // Validate the exact bytes that get copied; gcloud may rewrite the file.
        let bytes = read_credentials(&self.live_path)?;
        parse(&self.live_path, &bytes)?;

        ensure_private_dir(&self.slot_dir)?;
        let slot = self.slot_path(account);
        write_file_600(&slot, &bytes)?;

        tracing::debug!(
            "saved {} -> {}",
            self.live_path.display(),
            slot.display()
        );
        Ok(slot)
    }

    /// Put the account's slot back in place of the live ADC file.
    ///
    /// The slot is written to a sibling temp file and renamed over the live
    /// path, so readers see either the old file or the new one, never a mix.
    pub fn restore(&self, account: &str) -> Result<()> {
        let slot = self.slot_path(account);
        if !slot.is_file() {
            return Err(GctxError::CredentialsNotFound(slot));
        }
        let bytes = read_credentials(&slot)?;
        parse(&slot, &bytes)?;

        if let Some(parent) = self.live_path.parent() {
            fs::create_dir_all(parent).map_err(|e| GctxError::io(parent, e))?;
        }

        let temp_path = temp_path_for(&self.live_path);
        if let Err(e) = write_file_600(&temp_path, &bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &self.live_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(GctxError::io(&self.live_path, e));
        }

        tracing::debug!("restored {} -> {}", slot.display(), self.live_path.display());
        Ok(())
    }

    /// Remove the account's slot. A slot that is already gone is not an error.
    pub fn remove(&self, account: &str) -> Result<()> {
        let slot = self.slot_path(account);
        match fs::remove_file(&slot) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GctxError::io(slot, e)),
        }
    }
}

/// Parse `path` as an ADC file. Success means structurally plausible only.
pub fn validate(path: &Path) -> Result<AdcCredential> {
    let content = read_credentials(path)?;
    parse(path, &content)
}

fn read_credentials(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => GctxError::CredentialsNotFound(path.to_path_buf()),
        _ => GctxError::io(path, e),
    })
}

fn parse(path: &Path, content: &[u8]) -> Result<AdcCredential> {
    serde_json::from_slice(content).map_err(|source| GctxError::InvalidFormat {
        path: path.to_path_buf(),
        source,
    })
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn temp_path_for(path: &Path) -> PathBuf {
    path.with_extension(format!("tmp.{}", std::process::id()))
}

fn ensure_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| GctxError::io(dir, e))?;

    #[cfg(unix)]
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
        .map_err(|e| GctxError::io(dir, e))?;

    Ok(())
}

/// Open `path` for writing, readable by the owner only before any byte lands.
fn open_private(path: &Path) -> Result<fs::File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let f = options.open(path).map_err(|e| GctxError::io(path, e))?;

    // `mode` only applies to newly created files.
    #[cfg(unix)]
    f.set_permissions(fs::Permissions::from_mode(0o600))
        .map_err(|e| GctxError::io(path, e))?;

    Ok(f)
}

fn write_file_600(path: &Path, content: &[u8]) -> Result<()> {
    let mut f = open_private(path)?;
    f.write_all(content).map_err(|e| GctxError::io(path, e))?;
    f.sync_all().map_err(|e| GctxError::io(path, e))
}
