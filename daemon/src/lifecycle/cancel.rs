//! Cooperative cancellation shared between tasks

use std::sync::Arc;

use tokio::sync::watch;

/// A cloneable cancellation flag.
///
/// Every clone observes the same flag. Tokens created with [`child`]
/// are cancelled together with their parent but can also be cancelled on
/// their own without affecting the parent.
///
/// [`child`]: CancelToken::child
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel this token and all of its children
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once cancelled
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Create a token that is cancelled whenever this one is.
    ///
    /// Must be called from within a tokio runtime.
    pub fn child(&self) -> Self {
        let child = Self::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }

        let parent = self.clone();
        let forward = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => forward.cancel(),
                _ = forward.cancelled() => {}
            }
        });

        child
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
