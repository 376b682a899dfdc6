//! Per-call cancellation and deadline context.
//!
//! Every engine operation takes a `Context`. When the context is cancelled, or
//! its deadline passes, the in-flight native call is dropped and the operation
//! returns `DbError::Cancelled` / `DbError::DeadlineExceeded`.

use crate::errors::DbError;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Context {
    cancel: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// Owner side of a cancellable context. Dropping it does not cancel.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { cancel: rx, deadline: None }
    }

    #[must_use]
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (Self { cancel: rx, deadline: None }, CancelHandle { tx })
    }

    /// Returns a copy of this context that also expires after `timeout`.
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self { cancel: self.cancel.clone(), deadline: Some(deadline) }
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// The error this context would produce right now, if any.
    #[must_use]
    pub fn err(&self) -> Option<DbError> {
        if self.is_cancelled() {
            return Some(DbError::Cancelled);
        }
        match self.deadline {
            Some(dl) if Instant::now() >= dl => Some(DbError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DbError {
        let mut rx = self.cancel.clone();
        let cancelled = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                // Sender gone without cancelling: this context can no longer be cancelled.
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };
        match self.deadline {
            Some(dl) => tokio::select! {
                () = cancelled => DbError::Cancelled,
                () = tokio::time::sleep_until(dl) => DbError::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                DbError::Cancelled
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn background_is_never_cancelled() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());
        assert!(ctx.err().is_none());
    }

    #[tokio::test]
    async fn cancel_handle_resolves_done() {
        let (ctx, handle) = Context::with_cancel();
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.done().await }
        });
        handle.cancel();
        let err = waiter.await.unwrap();
        assert!(matches!(err, DbError::Cancelled));
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn deadline_resolves_done() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let err = ctx.done().await;
        assert!(matches!(err, DbError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(DbError::DeadlineExceeded)));
    }

    #[test]
    fn with_timeout_keeps_earlier_deadline() {
        let short = Context::background().with_timeout(Duration::from_millis(5));
        let longer = short.with_timeout(Duration::from_secs(60));
        assert_eq!(short.deadline(), longer.deadline());
    }
}
