//! Cooperative cancellation.
//!
//! The orchestrator checks a [`CancelSignal`] before every page fetch and
//! before every record, and races in-flight requests against it. Cancelling
//! never commits the page being processed.

use tokio::sync::watch;

use tap::ExtractError;

/// Triggers cancellation of every [`CancelSignal`] cloned from its pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observes cancellation requested through a [`CancelHandle`].
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that is never cancelled.
    pub fn never() -> Self {
        let (_handle, signal) = cancel_pair();
        signal
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns [`ExtractError::Cancelled`] once cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Cancelled`] if the signal fired.
    pub fn check(&self) -> Result<(), ExtractError> {
        if self.is_cancelled() {
            Err(ExtractError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when cancellation is requested.
    ///
    /// Never resolves if the handle is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let sender_dropped = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if sender_dropped {
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn signal_reports_cancellation() {
        let (handle, signal) = cancel_pair();
        assert!(signal.check().is_ok());
        handle.cancel();
        assert!(matches!(signal.check(), Err(ExtractError::Cancelled)));
        assert!(signal.clone().is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel() {
        let (handle, signal) = cancel_pair();
        let waiter = tokio::spawn(async move { signal.cancelled().await });
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn never_signal_does_not_resolve() {
        let signal = CancelSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(20), signal.cancelled()).await;
        assert!(waited.is_err());
        assert!(!signal.is_cancelled());
    }
}
