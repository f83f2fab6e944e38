//! Cancellation helpers
//!
//! Every storage operation takes a [`CancellationToken`]; deadlines are
//! tokens cancelled by a timer.

use std::future::Future;
use std::ops::Deref;
use std::time::Duration;

use certstore_core::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Run `fut` unless `cancel` fires first
///
/// The in-flight request is dropped on cancellation. An already-cancelled
/// token fails without polling `fut` at all.
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::cancelled(operation));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::cancelled(operation)),
        result = fut => result,
    }
}

/// Deadline token returned by [`cancel_after`]
///
/// Derefs to the underlying [`CancellationToken`]. Dropping it cancels the
/// token, which also ends its timer task.
#[derive(Debug)]
pub struct Deadline {
    token: CancellationToken,
}

impl Deadline {
    /// The cancellation token the deadline fires
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Deref for Deadline {
    type Target = CancellationToken;

    fn deref(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Child of `parent` that is cancelled once `timeout` elapses
///
/// Must be called from within a Tokio runtime. The timer task lives until
/// the deadline fires or the returned guard is dropped.
pub fn cancel_after(parent: &CancellationToken, timeout: Duration) -> Deadline {
    let child = parent.child_token();
    let timer = child.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => {}
            _ = tokio::time::sleep(timeout) => timer.cancel(),
        }
    });

    Deadline { token: child }
}
