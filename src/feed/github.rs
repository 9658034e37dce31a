//! GitHub Releases implementation of [`VersionSource`].

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use super::client::{
    create_http_client, read_with_progress, validate_response_status, MAX_PAYLOAD_SIZE,
};
use super::{asset_file_name, extract_version, first_capture, Release, VersionSource};

const GITHUB_API: &str = "https://api.github.com";

/// GitHub release information.
#[derive(Debug, Deserialize)]
pub(crate) struct GitHubRelease {
    #[serde(default)]
    pub(crate) name: Option<String>,
    pub(crate) tag_name: String,
    #[serde(default)]
    pub(crate) body: Option<String>,
    #[serde(default)]
    pub(crate) assets: Vec<GitHubAsset>,
}

/// GitHub release asset information.
#[derive(Debug, Deserialize)]
pub(crate) struct GitHubAsset {
    pub(crate) name: String,
    pub(crate) browser_download_url: String,
}

/// Latest-release feed of one GitHub repository.
#[derive(Debug, Clone)]
pub struct GitHubReleases {
    owner: String,
    repo: String,
    api_base: String,
}

impl GitHubReleases {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            api_base: GITHUB_API.to_string(),
        }
    }

    /// Point the client at a different API host (GitHub Enterprise, mirrors).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, self.owner, self.repo
        )
    }

    fn get_latest_release(&self) -> Result<GitHubRelease> {
        let client = create_http_client()?;
        let response = client
            .get(self.latest_release_url())
            .header("Accept", "application/vnd.github+json")
            .send()
            .context("Failed to check for updates")?;

        validate_response_status(&response, "Failed to fetch release info")?;

        response.json().context("Failed to parse release info")
    }
}

/// Resolve version, asset URL and signature from a release.
pub(crate) fn resolve_release(
    release: &GitHubRelease,
    version_pattern: &Regex,
    filename_template: &str,
    signature_pattern: &Regex,
) -> Result<Release> {
    let body = release.body.as_deref().unwrap_or_default();
    let candidates = [
        release.name.as_deref().unwrap_or_default(),
        release.tag_name.as_str(),
        body,
    ];
    let version = extract_version(version_pattern, candidates)
        .with_context(|| format!("Failed to parse version of release {}", release.tag_name))?;

    let asset_name = asset_file_name(filename_template, &version);
    let asset = release
        .assets
        .iter()
        .find(|a| a.name == asset_name)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Release {} has no asset named {asset_name}",
                release.tag_name
            )
        })?;

    let signature = first_capture(signature_pattern, body).unwrap_or_default();
    if signature.is_empty() {
        tracing::warn!(release = %release.tag_name, "release notes carry no signature");
    }

    Ok(Release {
        version,
        download_url: asset.browser_download_url.clone(),
        signature,
    })
}

impl VersionSource for GitHubReleases {
    fn fetch_latest_release(
        &self,
        version_pattern: &Regex,
        filename_template: &str,
        signature_pattern: &Regex,
    ) -> Result<Release> {
        tracing::info!(repo = %format!("{}/{}", self.owner, self.repo), "checking latest release");
        let release = self.get_latest_release()?;
        resolve_release(&release, version_pattern, filename_template, signature_pattern)
    }

    fn download_data(
        &self,
        url: &str,
        block_size: usize,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Vec<u8>> {
        let client = create_http_client()?;
        let response = client
            .get(url)
            .send()
            .with_context(|| format!("Failed to download {url}"))?;
        validate_response_status(&response, "Download failed")?;

        let content_length = response.content_length();
        read_with_progress(response, content_length, block_size, MAX_PAYLOAD_SIZE, progress)
    }
}
