//! Mirror failover
//!
//! Candidates are probed one at a time, in the caller's preference order.
//! The first mirror that answers a probe wins; later candidates are never
//! contacted.

use std::time::Duration;

use log::{debug, warn};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};
use crate::core::probe::{probe, ProbeResult};

/// Return the first candidate whose probe succeeds, with its probe result.
///
/// Fails with [`Error::NoReachableUrl`] carrying the last probe error when
/// every candidate is down. Cancellation aborts the iteration immediately.
pub async fn select_first_reachable<S: AsRef<str>>(
    client: &Client,
    urls: &[S],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(String, ProbeResult)> {
    let mut last = None;

    for url in urls {
        let url = url.as_ref();
        match probe(client, url, timeout, cancel).await {
            Ok(result) => {
                debug!("Selected {url} ({} bytes)", result.size);
                return Ok((url.to_string(), result));
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                warn!("Mirror unreachable: {url}: {e}");
                last = Some(Box::new(e));
            }
        }
    }

    Err(Error::NoReachableUrl {
        tried: urls.len(),
        last,
    })
}
