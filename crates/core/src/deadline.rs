//! The run deadline: a single-shot timer that can be re-armed while the
//! user corrects a recoverable mistake.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Handle to the deadline task.
///
/// The timer moves `Armed → Fired` or `Armed → Cancelled`, both terminal;
/// `on_fire` runs at most once. Clones share the same underlying timer.
#[derive(Debug, Clone)]
pub(crate) struct Deadline {
    reset_tx: mpsc::UnboundedSender<()>,
    cancel: CancellationToken,
    reset_on_error: bool,
}

impl Deadline {
    /// Arm the deadline. `on_fire` runs on the timer's own task when the
    /// full duration elapses without a reset or cancellation.
    pub(crate) fn spawn<F>(timeout: Duration, reset_on_error: bool, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (reset_tx, mut reset_rx) = mpsc::unbounded_channel::<()>();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut resets_open = true;
            'armed: loop {
                let sleep = tokio::time::sleep(timeout);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = &mut sleep => {
                            on_fire();
                            return;
                        }
                        received = reset_rx.recv(), if resets_open => match received {
                            // Re-arm at the full duration.
                            Some(()) => continue 'armed,
                            None => resets_open = false,
                        },
                    }
                }
            }
        });
        Self {
            reset_tx,
            cancel,
            reset_on_error,
        }
    }

    /// Re-arm the timer at its full duration. No-op unless the run was
    /// configured to reset on recoverable errors, and after fire/cancel.
    pub(crate) fn reset(&self) {
        if self.reset_on_error {
            let _ = self.reset_tx.send(());
        }
    }

    /// Cancel the timer. Later resets are no-ops.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}
