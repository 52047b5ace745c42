use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GctxError>;

#[derive(Error, Debug)]
pub enum GctxError {
    #[error("account '{0}' not found")]
    AccountNotFound(String),

    #[error("no credentials found at {}", .0.display())]
    CredentialsNotFound(PathBuf),

    #[error("account '{0}' already exists")]
    AlreadyExists(String),

    #[error("invalid credentials file {}: {source}", path.display())]
    InvalidFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("timed out after {}s waiting for fresh credentials", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("`{command}` failed: {message}")]
    ExternalTool { command: String, message: String },

    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot find home directory")]
    NoHomeDir,
}

impl GctxError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        GctxError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GctxError::AccountNotFound(_) | GctxError::CredentialsNotFound(_)
        )
    }

    /// True when gcloud refused the call because the login has expired.
    pub fn needs_reauth(&self) -> bool {
        match self {
            GctxError::ExternalTool { message, .. } => {
                message.to_ascii_lowercase().contains("reauthentication required")
            }
            _ => false,
        }
    }
}
