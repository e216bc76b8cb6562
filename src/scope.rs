//! View lifetimes and mutation retry policy

use crate::error::{Error, Result};
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Cancellation scope tied to one view.
///
/// Futures passed through [`ViewScope::run`] resolve to [`Error::Cancelled`]
/// once the scope is closed or dropped, and the inner future is dropped with
/// whatever result it would have produced.
#[derive(Debug)]
pub struct ViewScope {
    closed: watch::Sender<bool>,
}

impl Default for ViewScope {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewScope {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self { closed }
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Runs `fut` until it completes or the scope closes, whichever is first.
    /// The returned future does not borrow the scope.
    pub fn run<T, F>(&self, fut: F) -> impl Future<Output = Result<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let mut closed = self.closed.subscribe();
        async move {
            if *closed.borrow_and_update() {
                return Err(Error::Cancelled);
            }
            tokio::select! {
                biased;
                _ = wait_closed(&mut closed) => {
                    debug!("view closed, discarding response");
                    Err(Error::Cancelled)
                }
                result = fut => result,
            }
        }
    }
}

impl Drop for ViewScope {
    fn drop(&mut self) {
        self.closed.send_replace(true);
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    loop {
        if *closed.borrow_and_update() {
            return;
        }
        if closed.changed().await.is_err() {
            return;
        }
    }
}

/// How often a failed mutation is repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationPolicy {
    pub retries: u32,
}

impl MutationPolicy {
    /// Item creation; a repeat could insert twice.
    pub const INSERT_ITEM: Self = Self { retries: 0 };
    pub const UPDATE_ITEM: Self = Self { retries: 1 };
    pub const DELETE_ITEM: Self = Self { retries: 1 };
    pub const UPDATE_PROFILE: Self = Self { retries: 1 };

    /// Calls `op` and repeats it up to `retries` times while the error is
    /// retryable.
    pub async fn run<T, F, Fut>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    warn!(mutation = name, attempt, error = %e, "retrying mutation");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
