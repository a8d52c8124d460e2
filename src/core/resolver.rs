//! External URL resolver
//!
//! Some images have no stable download link; a helper program is asked for
//! the current one and the last `label: https://...` line of its output wins.

use std::process::Stdio;
use std::time::Duration;

use log::{debug, warn};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::core::error::{Error, Result};

/// Marker the helper prints when the upstream site refused the lookup
const FAILING_STATUS_MARKER: &str = "failing HTTP status code";

/// How to invoke the helper program
#[derive(Debug, Clone)]
pub struct ResolverCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl ResolverCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Run the helper and extract a download URL from its stdout.
    ///
    /// `Ok(None)` means the helper ran but produced nothing usable (non-zero
    /// exit, no URL, or an upstream HTTP failure). Spawn failures, timeouts
    /// and cancellation are errors.
    pub async fn resolve(&self, cancel: &CancellationToken) -> Result<Option<String>> {
        debug!("Running resolver {} {:?}", self.program, self.args);

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            out = tokio::time::timeout(self.timeout, child.wait_with_output()) => match out {
                Ok(out) => out?,
                Err(_) => {
                    return Err(Error::Transport(format!(
                        "resolver {} timed out after {:?}",
                        self.program, self.timeout
                    )))
                }
            },
        };

        if !output.status.success() {
            warn!("Resolver {} exited with {}", self.program, output.status);
            return Ok(None);
        }

        Ok(parse_last_url(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Last URL printed as `label: http(s)://...` at the end of a line.
pub fn parse_last_url(output: &str) -> Option<String> {
    if output.contains(FAILING_STATUS_MARKER) {
        return None;
    }

    output.lines().rev().find_map(labelled_url)
}

fn labelled_url(line: &str) -> Option<String> {
    let line = line.trim_end();
    let start = line.rfind("https://").or_else(|| line.rfind("http://"))?;
    let (label, url) = line.split_at(start);

    if url.contains(char::is_whitespace) {
        return None;
    }
    let label = label.trim_end();
    if label.len() < 2 || !label.ends_with(':') || label.ends_with("::") {
        return None;
    }
    Some(url.to_string())
}
