//! Grouped tasks that share one cancellation domain.
//!
//! Every stage of the pipeline is a [`TaskGroup`] over its workers, and the
//! stage groups are themselves tasks of a parent group. All groups of one run
//! share a single [`Supervision`]: the first worker that fails records its
//! error and cancels the shared token, every other worker observes the token
//! at its next send or receive and bails out with [`PackError::Cancelled`].

use std::{future::Future, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::PackError;

/// The cancellation token and first-error slot shared by all groups of a run.
#[derive(Clone, Default)]
pub(crate) struct Supervision {
    cancel: CancellationToken,
    first_error: Arc<Mutex<Option<PackError>>>,
}

impl Supervision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Records `err` if it is the first real error and cancels the run.
    pub fn fail(&self, err: PackError) {
        if !err.is_cancelled() {
            let mut slot = self.first_error.lock();
            if slot.is_none() {
                tracing::debug!("cancelling the pipeline: {err}");
                *slot = Some(err);
            }
        }
        self.cancel.cancel();
    }

    /// Takes the error that triggered cancellation, if any.
    pub fn take_error(&self) -> Option<PackError> {
        self.first_error.lock().take()
    }
}

/// A set of tasks that is awaited as a whole.
pub(crate) struct TaskGroup {
    supervision: Supervision,
    tasks: JoinSet<Result<(), PackError>>,
}

impl TaskGroup {
    pub fn new(supervision: &Supervision) -> Self {
        Self {
            supervision: supervision.clone(),
            tasks: JoinSet::new(),
        }
    }

    /// Spawns a task. If it fails the whole run is cancelled.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), PackError>> + Send + 'static,
    {
        let supervision = self.supervision.clone();
        self.tasks.spawn(async move {
            task.await.map_err(|err| {
                supervision.fail(err);
                PackError::Cancelled
            })
        });
    }

    /// Spawns a blocking task. If it fails the whole run is cancelled.
    pub fn spawn_blocking<F>(&mut self, task: F)
    where
        F: FnOnce() -> Result<(), PackError> + Send + 'static,
    {
        let supervision = self.supervision.clone();
        self.tasks.spawn_blocking(move || {
            task().map_err(|err| {
                supervision.fail(err);
                PackError::Cancelled
            })
        });
    }

    /// Waits for every task in the group. Returns [`PackError::Cancelled`]
    /// if any task failed; the error that caused it is kept in the
    /// [`Supervision`]. Panics of tasks are resumed here.
    pub async fn wait(mut self) -> Result<(), PackError> {
        let mut result = Ok(());
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined.map_err(PackError::from).and_then(|r| r) {
                result = Err(err);
            }
        }
        result
    }
}

/// Receives the next item, or `None` once every sender is gone.
pub(crate) async fn recv<T>(
    input: &flume::Receiver<T>,
    cancel: &CancellationToken,
) -> Result<Option<T>, PackError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PackError::Cancelled),
        item = input.recv_async() => Ok(item.ok()),
    }
}

/// Hands `item` to the next stage, waiting until a receiver takes it.
pub(crate) async fn send<T>(
    output: &flume::Sender<T>,
    item: T,
    cancel: &CancellationToken,
) -> Result<(), PackError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PackError::Cancelled),
        sent = output.send_async(item) => sent.map_err(|_| PackError::Cancelled),
    }
}

/// How often a blocked [`send_blocking`] looks at the cancellation token.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The blocking counterpart of [`send`], for producers that run on a
/// blocking thread.
pub(crate) fn send_blocking<T>(
    output: &flume::Sender<T>,
    mut item: T,
    cancel: &CancellationToken,
) -> Result<(), PackError> {
    loop {
        if cancel.is_cancelled() {
            return Err(PackError::Cancelled);
        }
        match output.send_timeout(item, POLL_INTERVAL) {
            Ok(()) => return Ok(()),
            Err(flume::SendTimeoutError::Timeout(returned)) => item = returned,
            Err(flume::SendTimeoutError::Disconnected(_)) => return Err(PackError::Cancelled),
        }
    }
}
