//! HTTP client helpers for the release feed.
//!
//! Provides a client with timeouts and size-limited, progress-reporting downloads.

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client, Response};
use std::io::Read;
use std::time::Duration;

pub(crate) const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Total request timeout, transfer included
pub(crate) const HTTP_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Maximum accepted payload size for package archives (512 MB).
pub(crate) const MAX_PAYLOAD_SIZE: u64 = 512 * 1024 * 1024;

/// Build an HTTP client that cannot hang forever on an unresponsive server.
pub(crate) fn create_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
        .user_agent(concat!("xxmi-installer/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

/// Fail with the HTTP status when the response is not a success.
pub(crate) fn validate_response_status(response: &Response, context: &str) -> Result<()> {
    if !response.status().is_success() {
        let status = response.status();
        bail!(
            "{}: HTTP {} - {}",
            context,
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        );
    }
    Ok(())
}

/// Read a body in `block_size` chunks, enforcing `max_size`.
///
/// `progress(downloaded, total)` fires after every chunk; `total` is the
/// Content-Length, or 0 when the server does not send one.
pub(crate) fn read_with_progress<R: Read>(
    mut reader: R,
    content_length: Option<u64>,
    block_size: usize,
    max_size: u64,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<Vec<u8>> {
    if let Some(length) = content_length {
        if length > max_size {
            bail!(
                "Content-Length {length} bytes exceeds maximum allowed size of {max_size} bytes"
            );
        }
    }

    let total = content_length.unwrap_or(0);
    let mut bytes = Vec::with_capacity(total as usize);
    let mut buffer = vec![0u8; block_size.max(1)];
    let mut downloaded: u64 = 0;

    loop {
        let n = reader
            .read(&mut buffer)
            .context("Failed to read response body")?;
        if n == 0 {
            break;
        }
        downloaded += n as u64;
        if downloaded > max_size {
            bail!("Download size exceeds maximum allowed size of {max_size} bytes");
        }
        bytes.extend_from_slice(&buffer[..n]);
        progress(downloaded, total);
    }

    Ok(bytes)
}
