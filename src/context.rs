//! Deadline and cancellation carried through a resolution.

use crate::dns::ResolveError;
use std::future::{pending, Future};
use tokio::{
    sync::watch,
    time::{sleep_until, Duration, Instant},
};

/// Per-call resolution context.
///
/// Cancellation is signalled by sending `true` on the watch channel the
/// receiver was taken from. A dropped sender never cancels.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl ResolveContext {
    /// A context that never expires and cannot be cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline(Instant::now() + timeout)
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), ResolveError> {
        if self.is_cancelled() {
            return Err(ResolveError::Cancelled);
        }
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => Err(ResolveError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drives `fut` to completion unless the context is cancelled or expires first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ResolveError> {
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ResolveError::Cancelled),
            _ = deadline => Err(ResolveError::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }

    async fn cancelled(&self) {
        let Some(rx) = &self.cancel else {
            return pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            pending::<()>().await;
        }
    }
}
