//! Deadline supervision for a job's unit of work.
//!
//! The work runs in its own Tokio task and hands its result back through a
//! [`Responder`]. The supervisor waits for that result up to a deadline. On
//! expiry it cancels the work's [`CancellationToken`] and closes the
//! responder; whichever of the two sides reaches the responder first decides
//! the outcome and the other side's write becomes a no-op.
//!
//! Cancellation is advisory. The work only stops at the checkpoints where it
//! looks at the token, and an external computation that never looks keeps
//! running until it returns on its own.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::JobError;

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Single-use response slot. The first call to [`respond`](Self::respond) or
/// [`close`](Self::close) wins; every later call returns `false`.
#[derive(Debug)]
pub struct Responder<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Responder<T> {
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let responder = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
        });
        (responder, rx)
    }

    /// Deliver `value` if nobody has responded or closed yet.
    pub fn respond(&self, value: T) -> bool {
        // Send while holding the lock so a failed `close` always finds the
        // value already in the channel.
        let mut slot = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Claim the slot without writing. Returns `false` if a response already went out.
    pub fn close(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

/// How a supervised unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionOutcome {
    /// The work delivered a response before the deadline.
    CompletedNormally,
    /// The deadline passed first; the work was cancelled and its late response suppressed.
    CancelledOnTimeout,
    /// The work ended (or panicked) without delivering a response.
    FailedWithException,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    deadline: Duration,
}

impl TimeoutSupervisor {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }


    /// Spawn `work` and wait for its response for at most the deadline.
    ///
    /// `work` receives the cancellation token and the responder it must
    /// answer through. It may keep running after this returns.
    pub async fn supervise<T, F, Fut>(&self, work: F) -> (SupervisionOutcome, Result<T, JobError>)
    where
        T: Send + 'static,
        F: FnOnce(CancellationToken, Arc<Responder<Result<T, JobError>>>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (responder, mut rx) = Responder::channel();
        let mut handle = tokio::spawn(work(cancel.clone(), Arc::clone(&responder)));

        let deadline = tokio::time::sleep(self.deadline);
        tokio::pin!(deadline);

        tokio::select! {
            biased;

            received = &mut rx => match received {
                Ok(result) => (SupervisionOutcome::CompletedNormally, result),
                Err(_) => (
                    SupervisionOutcome::FailedWithException,
                    Err(JobError::Internal("Job ended without a response".into())),
                ),
            },
            joined = &mut handle => match rx.try_recv() {
                Ok(result) => (SupervisionOutcome::CompletedNormally, result),
                Err(_) => {
                    let reason = match joined {
                        Ok(()) => "Job ended without a response".to_string(),
                        Err(e) => format!("Job task failed: {e}"),
                    };
                    tracing::error!(error = %reason, "Supervised job failed");
                    (SupervisionOutcome::FailedWithException, Err(JobError::Internal(reason)))
                }
            },
            () = &mut deadline => {
                cancel.cancel();
                if responder.close() {
                    let after_ms = self.deadline.as_millis() as u64;
                    tracing::warn!(after_ms, "Job timed out, cancelling");
                    (SupervisionOutcome::CancelledOnTimeout, Err(JobError::TimedOut { after_ms }))
                } else {
                    // The work responded in the same instant; its answer stands.
                    match rx.try_recv() {
                        Ok(result) => (SupervisionOutcome::CompletedNormally, result),
                        Err(_) => (
                            SupervisionOutcome::FailedWithException,
                            Err(JobError::Internal("Job response was lost".into())),
                        ),
                    }
                }
            }
        }
    }
}
