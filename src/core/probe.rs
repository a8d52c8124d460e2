//! Remote metadata probing
//!
//! Learns the size and modification time of a resource without downloading
//! its body. Redirect chains are followed by the HTTP client, so everything
//! reported here describes the final resolved resource.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, LAST_MODIFIED, RANGE};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};

/// Authoritative size and modification time of a remote resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    pub size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Probe `url` with HEAD, falling back to a one-byte ranged GET when the
/// server rejects HEAD or omits the length.
pub async fn probe(
    client: &Client,
    url: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProbeResult> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = probe_head(client, url, timeout) => result,
    }
}

async fn probe_head(client: &Client, url: &str, timeout: Duration) -> Result<ProbeResult> {
    debug!("HEAD {url}");
    let response = client.head(url).timeout(timeout).send().await?;
    let status = response.status();

    if status.is_success() {
        if let Some(size) = header_u64(response.headers(), CONTENT_LENGTH) {
            return Ok(ProbeResult {
                size,
                modified_at: last_modified(response.headers()),
            });
        }
        debug!("HEAD {} carried no Content-Length, trying ranged GET", response.url());
    } else {
        debug!("HEAD {} answered {status}, trying ranged GET", response.url());
    }

    probe_range(client, url, timeout).await
}

async fn probe_range(client: &Client, url: &str, timeout: Duration) -> Result<ProbeResult> {
    let response = client
        .get(url)
        .header(RANGE, "bytes=0-0")
        .timeout(timeout)
        .send()
        .await?;
    let status = response.status();
    let final_url = response.url().to_string();
    let headers = response.headers();

    let size = match status {
        StatusCode::PARTIAL_CONTENT => content_range_total(headers),
        s if s.is_success() => header_u64(headers, CONTENT_LENGTH),
        _ => {
            return Err(Error::HttpStatus {
                url: final_url,
                status: status.as_u16(),
            })
        }
    };
    let size = size.ok_or_else(|| Error::InvalidInput(format!("{final_url} did not report its size")))?;
    let modified_at = last_modified(headers);

    // Dropping the response aborts the body; only headers were needed.
    drop(response);
    Ok(ProbeResult { size, modified_at })
}

fn header_u64(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Total length from `Content-Range: bytes 0-0/12345`
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit_once('/'))
        .and_then(|(_, total)| total.trim().parse::<u64>().ok())
}

fn last_modified(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get(LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
}
