// Cooperative stop signal shared between a session and its running operation.

use tokio_util::sync::CancellationToken;

/// Single-trigger, monotonic cancellation flag.
///
/// Cloning yields another handle to the same signal. The operation is expected
/// to poll [`CancelToken::is_triggered`] (or await [`CancelToken::triggered`])
/// at its own suspension points; nothing is preempted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: CancellationToken::new(),
        }
    }

    /// Set the flag. Later calls are no-ops.
    pub fn trigger(&self) {
        self.inner.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolves once the token has been triggered.
    pub async fn triggered(&self) {
        self.inner.cancelled().await
    }
}
