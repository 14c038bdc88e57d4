//! Per-request execution scope: route, context and cancellation

use crate::error::{CacheError, Result};
use crate::models::{CacheResponseStatus, HttpHost};
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

/// Per-request state visible to the caller after execution
///
/// Recording the cache response status never alters control flow.
#[derive(Debug, Default)]
pub struct CacheContext {
    status: RwLock<CacheResponseStatus>,
}

impl CacheContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// How the request was answered
    pub fn cache_response_status(&self) -> CacheResponseStatus {
        self.status.read().map(|s| *s).unwrap_or_default()
    }

    pub(crate) fn set_cache_response_status(&self, status: CacheResponseStatus) {
        if let Ok(mut current) = self.status.write() {
            *current = status;
        }
    }
}

/// Cancels every pending step of the request it was created with
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Execution scope of a single request
///
/// Cloning the scope shares its context and cancellation signal.
#[derive(Debug, Clone)]
pub struct ExecScope {
    route: HttpHost,
    context: Arc<CacheContext>,
    cancelled: watch::Receiver<bool>,
}

impl ExecScope {
    /// Create a scope for a request routed to `route`
    ///
    /// Dropping the returned handle makes the request uncancellable.
    pub fn new(route: HttpHost) -> (Self, CancelHandle) {
        let (tx, cancelled) = watch::channel(false);
        let scope = ExecScope {
            route,
            context: Arc::new(CacheContext::new()),
            cancelled,
        };
        (scope, CancelHandle { tx })
    }

    /// Target host used when the request URI carries no authority
    pub fn route(&self) -> &HttpHost {
        &self.route
    }

    pub fn context(&self) -> &Arc<CacheContext> {
        &self.context
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Run `fut` unless the request is cancelled first
    ///
    /// # Returns
    /// * `Err(CacheError::Interrupted)` if cancellation wins the race
    pub async fn interruptible<F: Future>(&self, fut: F) -> Result<F::Output> {
        if self.is_cancelled() {
            return Err(CacheError::Interrupted);
        }

        let mut cancelled = self.cancelled.clone();
        tokio::select! {
            biased;
            _ = wait_for_cancel(&mut cancelled) => Err(CacheError::Interrupted),
            output = fut => Ok(output),
        }
    }

    /// Run a fallible step, flattening cancellation into its error
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.interruptible(fut).await?
    }
}

async fn wait_for_cancel(cancelled: &mut watch::Receiver<bool>) {
    // the sender is gone, so cancellation can never arrive
    if cancelled.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}
