use std::sync::Arc;

use tokio::sync::watch;

/// Process-wide signal for failures that escape the per-request boundary.
///
/// Once raised it stays raised; the server loop stops accepting connections.
#[derive(Debug, Clone)]
pub struct FatalSignal {
    sender: Arc<watch::Sender<Option<String>>>,
}

impl Default for FatalSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl FatalSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Raise the signal. The first reason wins.
    pub fn raise(&self, reason: impl Into<String>) {
        let reason = reason.into();
        portcullis_telemetry::log_fatal_error!(reason = %reason, "fatal error raised");
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn is_raised(&self) -> bool {
        self.sender.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.sender.subscribe()
    }

    /// Resolve once the signal is raised.
    pub async fn raised(&self) -> String {
        let mut receiver = self.subscribe();
        loop {
            if let Some(reason) = receiver.borrow_and_update().clone() {
                return reason;
            }
            if receiver.changed().await.is_err() {
                // The sender lives in `self`, so this never happens while we are borrowed.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let signal = FatalSignal::new();
        assert!(!signal.is_raised());
        signal.raise("first");
        signal.raise("second");
        assert!(signal.is_raised());
        assert_eq!(signal.reason().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn raised_resolves_for_clones() {
        let signal = FatalSignal::new();
        let clone = signal.clone();
        let waiter = tokio::spawn(async move { clone.raised().await });
        tokio::task::yield_now().await;
        signal.raise("boom");
        assert_eq!(waiter.await.unwrap(), "boom");
    }
}
