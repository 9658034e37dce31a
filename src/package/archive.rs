//! Package deployed by unpacking its archive into a directory.

use std::fs;
use std::path::{Path, PathBuf};

use super::{read_version_marker, write_version_marker, InstallContext, Installable};
use crate::error::UpdateError;

/// Unpacks the asset into `target_dir` and records the version next to it.
#[derive(Debug, Clone)]
pub struct ArchiveInstaller {
    package_name: String,
    target_dir: PathBuf,
}

impl ArchiveInstaller {
    pub fn new(package_name: impl Into<String>, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            package_name: package_name.into(),
            target_dir: target_dir.into(),
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    fn marker_path(&self) -> PathBuf {
        self.target_dir
            .join(format!(".{}.version", self.package_name.to_lowercase()))
    }
}

impl Installable for ArchiveInstaller {
    fn installed_version(&self) -> anyhow::Result<String> {
        read_version_marker(&self.marker_path())
    }

    fn install(&mut self, ctx: &mut InstallContext<'_>, clean: bool) -> Result<(), UpdateError> {
        if clean && self.target_dir.exists() {
            tracing::info!(dir = %self.target_dir.display(), "removing previous installation");
            fs::remove_dir_all(&self.target_dir)
                .map_err(|e| UpdateError::install(ctx.package_name(), e))?;
        }

        ctx.unpack_downloaded_asset(&self.target_dir)?;

        write_version_marker(&self.marker_path(), ctx.version())
            .map_err(|e| UpdateError::install(ctx.package_name(), e))
    }
}
