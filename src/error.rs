//! Error taxonomy for the update engine.
//!
//! Leaf helpers (HTTP, archive, config store, process table) report `anyhow`
//! errors with context; the package and orchestrator layers wrap them into
//! [`UpdateError`] so callers can tell which stage failed and for which package.

use thiserror::Error;

/// Boxed leaf error kept as the `source` of a typed failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a package pipeline stage or of the update run itself.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Local installed-version probe failed.
    #[error("Failed to detect installed {package} version:\n\n{source}")]
    Detection {
        package: String,
        #[source]
        source: BoxError,
    },

    /// Remote version or asset lookup failed.
    #[error("Failed to detect latest {package} version:\n\n{source}")]
    Feed {
        package: String,
        #[source]
        source: BoxError,
    },

    /// The release payload could not be fetched.
    #[error("Failed to download {package} update:\n\n{source}")]
    Download {
        package: String,
        #[source]
        source: BoxError,
    },

    /// Signature verification of downloaded data failed.
    #[error("{asset} integrity verification failed!\nPlease restart the installer and try again!")]
    Integrity { asset: String },

    /// A required executable could not be found, started or stopped in time.
    #[error("{message}")]
    ProcessControl { executable: String, message: String },

    /// File deployment (write, move, unpack) failed.
    #[error("Failed to install {package}:\n\n{source}")]
    Install {
        package: String,
        #[source]
        source: BoxError,
    },

    /// Persisting the package state failed.
    #[error("Failed to save update state: {0}")]
    State(#[source] BoxError),

    /// An update run was requested while another one is still active.
    #[error("Update is already in progress")]
    Busy,
}

impl UpdateError {
    pub(crate) fn detection(package: &str, err: impl Into<BoxError>) -> Self {
        Self::Detection {
            package: package.to_string(),
            source: err.into(),
        }
    }

    pub(crate) fn feed(package: &str, err: impl Into<BoxError>) -> Self {
        Self::Feed {
            package: package.to_string(),
            source: err.into(),
        }
    }

    pub(crate) fn download(package: &str, err: impl Into<BoxError>) -> Self {
        Self::Download {
            package: package.to_string(),
            source: err.into(),
        }
    }

    pub(crate) fn install(package: &str, err: impl Into<BoxError>) -> Self {
        Self::Install {
            package: package.to_string(),
            source: err.into(),
        }
    }

    pub(crate) fn integrity(asset: impl Into<String>) -> Self {
        Self::Integrity {
            asset: asset.into(),
        }
    }

    pub(crate) fn process_control(executable: &str, message: impl Into<String>) -> Self {
        Self::ProcessControl {
            executable: executable.to_string(),
            message: message.into(),
        }
    }
}
