//! Operation context: one deadline and one cancellation token per command
//!
//! Every `run` entry point builds a single [`OpContext`] from the user's
//! `--timeout` and threads it by reference through every step and wait, so
//! the deadline and external cancellation reach all API calls uniformly.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Deadline-bound, cancelable context for one command invocation
#[derive(Clone, Debug)]
pub struct OpContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl OpContext {
    /// Context expiring `timeout` from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout, CancellationToken::new())
    }

    /// Context with an explicit deadline and cancellation token
    pub fn with_deadline(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// Deadline of this context
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline (zero once expired)
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Token cancelled on external interruption (e.g. Ctrl-C)
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the context was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`Error::Canceled`] or [`Error::Timeout`] if the context is
    /// no longer usable
    pub fn ensure_live(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Canceled {
                condition: what.to_string(),
            });
        }
        if self.is_expired() {
            return Err(Error::timeout(what));
        }
        Ok(())
    }

    /// Run `fut` bounded by this context.
    ///
    /// Returns [`Error::Timeout`] or [`Error::Canceled`] labelled with
    /// `what` if the deadline passes or the token fires first.
    pub async fn run<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_live(what)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Canceled { condition: what.to_string() }),
            _ = tokio::time::sleep_until(self.deadline) => Err(Error::timeout(what)),
            res = fut => res,
        }
    }
}
