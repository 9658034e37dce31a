//! Remote release feed contract.
//!
//! A [`VersionSource`] answers "what is the latest version of this package,
//! where is its asset, and what is its detached signature", and streams asset
//! bytes with progress callbacks.

pub(crate) mod client;
pub mod github;

use anyhow::{bail, Result};
use regex::Regex;

pub use github::GitHubReleases;

/// Placeholder replaced with the version in asset file name templates.
pub const VERSION_PLACEHOLDER: &str = "{version}";

/// Block size used for payload downloads (128 KiB).
pub const DOWNLOAD_BLOCK_SIZE: usize = 128 * 1024;

/// Latest release as reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: String,
    pub download_url: String,
    /// Detached signature; empty when the release notes carry none.
    pub signature: String,
}

/// Source of release metadata and payloads.
pub trait VersionSource: Send + Sync {
    /// Look up the latest release matching the package's rules.
    ///
    /// The version is the first capture group of `version_pattern`, the asset is
    /// the one named `asset_file_name(filename_template, version)`, and the
    /// signature is the first capture group of `signature_pattern`.
    fn fetch_latest_release(
        &self,
        version_pattern: &Regex,
        filename_template: &str,
        signature_pattern: &Regex,
    ) -> Result<Release>;

    /// Download `url`, calling `progress(downloaded, total)` after every block.
    fn download_data(
        &self,
        url: &str,
        block_size: usize,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Vec<u8>>;
}

/// Expand an asset file name template for `version`.
pub fn asset_file_name(template: &str, version: &str) -> String {
    template.replace(VERSION_PLACEHOLDER, version)
}

/// First capture group of `pattern` in `text`, if any.
pub fn first_capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract the version token from the first candidate text that matches.
pub fn extract_version<'a>(
    pattern: &Regex,
    candidates: impl IntoIterator<Item = &'a str>,
) -> Result<String> {
    for text in candidates {
        if let Some(version) = first_capture(pattern, text) {
            return Ok(version);
        }
    }
    bail!("No version matching '{}' found in release", pattern.as_str())
}
