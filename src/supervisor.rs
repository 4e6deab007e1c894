//! Restarting loop driver.
//!
//! Every long-running component body is a fallible step function; the
//! supervisor runs it forever, logging failures and pausing between
//! iterations. An error never kills the loop, only delays the next attempt.

use eyre::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    /// Component name used in log lines.
    pub name: &'static str,
    /// Pause after a step completes normally.
    pub on_resolved: Duration,
    /// Pause after a step returns an error.
    pub on_rejected: Duration,
}

/// Drive `step` forever, invoking `on_failure` for every failed iteration.
/// Only returns if the surrounding task is aborted.
pub async fn forever<F, Fut, E>(options: LoopOptions, mut step: F, mut on_failure: E)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
    E: FnMut(&eyre::Report),
{
    loop {
        match step().await {
            Ok(()) => {
                debug!(component = options.name, "loop iteration complete");
                sleep(options.on_resolved).await;
            }
            Err(err) => {
                warn!(component = options.name, error = %err, "loop iteration failed, retrying");
                on_failure(&err);
                sleep(options.on_rejected).await;
            }
        }
    }
}
