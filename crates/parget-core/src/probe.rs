//! URL metadata probe
//!
//! A single HEAD request yielding the resource size, a filename and whether
//! the origin accepts byte ranges. The engine requires `Content-Length`;
//! `Accept-Ranges` is optional and its absence only disables parallelism.

use crate::error::EngineError;
use parget_types::ResourceInfo;
use reqwest::Client;
use tracing::info;
use url::Url;

/// Probe `url` with a HEAD request.
pub async fn probe(client: &Client, url: &Url) -> Result<ResourceInfo, EngineError> {
    info!("probing {url}");

    let response = client.head(url.as_str()).send().await?;

    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::UnexpectedStatus {
            status: status.as_u16(),
        });
    }

    let raw_length = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .ok_or(EngineError::MissingContentLength)?;
    let size: u64 = raw_length
        .parse()
        .map_err(|_| EngineError::InvalidContentLength(raw_length.to_string()))?;

    let supports_ranges = response
        .headers()
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "bytes")
        .unwrap_or(false);

    let filename = filename_for(&response, url);

    info!(size, supports_ranges, %filename, "probe complete");

    Ok(ResourceInfo {
        url: url.clone(),
        filename,
        size,
        supports_ranges,
    })
}

/// Pick a filename: `Content-Disposition` when the origin sends one,
/// otherwise the URL path basename.
fn filename_for(response: &reqwest::Response, url: &Url) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.split("filename=")
                .nth(1)
                .map(|s| s.trim_matches('"').to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            url.path_segments()
                .and_then(|mut s| s.next_back())
                .filter(|s| !s.is_empty())
                .unwrap_or("download")
                .to_string()
        })
}
