use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{CheckResult, CheckerError, CheckerLauncher, CheckerProcess};
use crate::cancel::CancelToken;
use crate::concurrency::ConcurrencyToken;
use crate::mutants::Mutant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Uninitialized,
    Initializing,
    Ready,
    InitFailed,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Ready,
    Busy,
    Disposed,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("checker pool failed to start: {0}")]
    Init(#[source] CheckerError),
    #[error("checker pool initialization was cancelled")]
    Cancelled,
    #[error("checker pool needs at least one concurrency token")]
    NoTokens,
    #[error("checker pool has been disposed")]
    Disposed,
    #[error("checker pool is not usable in state {0:?}")]
    NotReady(PoolState),
}

/// A checker handed out by [`CheckerPool::acquire`]. Hand it back with
/// [`CheckerPool::release`].
pub struct CheckerWorker {
    id: usize,
    process: Arc<dyn CheckerProcess>,
}

impl CheckerWorker {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn check(&self, mutant: &Mutant) -> Result<CheckResult, CheckerError> {
        self.process.check(mutant)
    }
}

impl std::fmt::Debug for CheckerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckerWorker").field("id", &self.id).finish()
    }
}

struct Slot {
    process: Arc<dyn CheckerProcess>,
    state: WorkerState,
}

struct Inner {
    state: PoolState,
    slots: Vec<Slot>,
    idle: VecDeque<usize>,
    /// Workers whose launch is still in flight.
    starting: usize,
    /// Aborts in-flight launches; set while `initialize` runs.
    launch_cancel: Option<CancelToken>,
}

/// Fixed-size set of checker workers, one per concurrency token.
///
/// Initialization is all-or-nothing: either every worker reports ready or the
/// started ones are terminated and the pool ends in `InitFailed`.
pub struct CheckerPool {
    launcher: Arc<dyn CheckerLauncher>,
    inner: Mutex<Inner>,
    available: Condvar,
}

impl CheckerPool {
    pub fn new(launcher: Arc<dyn CheckerLauncher>) -> Self {
        Self {
            launcher,
            inner: Mutex::new(Inner {
                state: PoolState::Uninitialized,
                slots: Vec::new(),
                idle: VecDeque::new(),
                starting: 0,
                launch_cancel: None,
            }),
            available: Condvar::new(),
        }
    }

    /// Start one worker per token, all concurrently, and wait for every one of
    /// them to be ready. The first launch failure aborts the launches still in
    /// flight.
    pub fn initialize(
        &self,
        tokens: impl IntoIterator<Item = ConcurrencyToken>,
        cancel: &CancelToken,
    ) -> Result<(), PoolError> {
        let tokens: Vec<ConcurrencyToken> = tokens.into_iter().collect();
        let launch_cancel = cancel.child();
        {
            let mut inner = self.inner.lock();
            match inner.state {
                PoolState::Uninitialized if tokens.is_empty() => {
                    inner.state = PoolState::InitFailed;
                    return Err(PoolError::NoTokens);
                }
                PoolState::Uninitialized => inner.state = PoolState::Initializing,
                PoolState::Disposed => return Err(PoolError::Disposed),
                other => return Err(PoolError::NotReady(other)),
            }
            inner.starting = tokens.len();
            inner.launch_cancel = Some(launch_cancel.clone());
        }
        debug!(workers = tokens.len(), "starting checker workers");

        let mut started: Vec<(usize, Arc<dyn CheckerProcess>)> = Vec::with_capacity(tokens.len());
        let mut first_error = None;
        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel();
            for token in &tokens {
                let tx = tx.clone();
                let launcher = &self.launcher;
                let launch_cancel = &launch_cancel;
                scope.spawn(move || {
                    let outcome = if launch_cancel.is_cancelled() {
                        Err(CheckerError::Cancelled)
                    } else {
                        launcher.launch(token, launch_cancel)
                    };
                    let _ = tx.send((token.slot(), outcome));
                });
            }
            drop(tx);

            // Outcomes arrive in completion order so the first failure is the earliest one.
            for (slot, outcome) in rx {
                match outcome {
                    Ok(process) => started.push((slot, process)),
                    Err(CheckerError::Cancelled) => {}
                    Err(e) => {
                        warn!(slot, error = %e, "checker worker failed to start");
                        if first_error.is_none() {
                            first_error = Some(e);
                            launch_cancel.cancel();
                        }
                    }
                }
            }
        });

        let mut inner = self.inner.lock();
        inner.starting = 0;
        inner.launch_cancel = None;
        let failure = if inner.state == PoolState::Disposed {
            Some(PoolError::Disposed)
        } else if let Some(e) = first_error {
            Some(PoolError::Init(e))
        } else if cancel.is_cancelled() || started.len() != tokens.len() {
            Some(PoolError::Cancelled)
        } else {
            None
        };

        if let Some(err) = failure {
            if inner.state != PoolState::Disposed {
                inner.state = PoolState::InitFailed;
            }
            drop(inner);
            self.available.notify_all();
            for (_, process) in &started {
                process.terminate();
            }
            debug!(terminated = started.len(), "checker pool torn down after failed start");
            return Err(err);
        }

        started.sort_by_key(|(slot, _)| *slot);
        inner.slots = started
            .into_iter()
            .map(|(_, process)| Slot {
                process,
                state: WorkerState::Ready,
            })
            .collect();
        inner.idle = (0..inner.slots.len()).collect();
        inner.state = PoolState::Ready;
        info!(workers = inner.slots.len(), "checker pool ready");
        drop(inner);
        self.available.notify_all();
        Ok(())
    }

    /// Take a ready worker, waiting until one is released if all are busy.
    pub fn acquire(&self) -> Result<CheckerWorker, PoolError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(worker) = Self::try_take(&mut inner)? {
                return Ok(worker);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`, returning `Ok(None)`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Option<CheckerWorker>, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let Some(worker) = Self::try_take(&mut inner)? {
                return Ok(Some(worker));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            self.available.wait_until(&mut inner, deadline);
        }
    }

    fn try_take(inner: &mut Inner) -> Result<Option<CheckerWorker>, PoolError> {
        match inner.state {
            PoolState::Disposed => Err(PoolError::Disposed),
            PoolState::Uninitialized | PoolState::InitFailed => Err(PoolError::NotReady(inner.state)),
            PoolState::Initializing => Ok(None),
            PoolState::Ready => Ok(inner.idle.pop_front().map(|id| {
                let slot = &mut inner.slots[id];
                slot.state = WorkerState::Busy;
                CheckerWorker {
                    id,
                    process: Arc::clone(&slot.process),
                }
            })),
        }
    }

    /// Return a worker to the pool. After disposal the worker is dropped silently.
    pub fn release(&self, worker: CheckerWorker) {
        let mut inner = self.inner.lock();
        if inner.state == PoolState::Disposed {
            return;
        }
        match inner.slots.get_mut(worker.id) {
            Some(slot) if slot.state == WorkerState::Busy && Arc::ptr_eq(&slot.process, &worker.process) => {
                slot.state = WorkerState::Ready;
                inner.idle.push_back(worker.id);
                drop(inner);
                self.available.notify_one();
            }
            _ => warn!(worker = worker.id, "released a worker this pool does not have checked out"),
        }
    }

    /// Terminate every worker, busy or not, and wake all waiting callers.
    /// Calling it again does nothing.
    pub fn dispose(&self) {
        let processes: Vec<Arc<dyn CheckerProcess>> = {
            let mut inner = self.inner.lock();
            if inner.state == PoolState::Disposed {
                return;
            }
            inner.state = PoolState::Disposed;
            if let Some(launch_cancel) = inner.launch_cancel.take() {
                launch_cancel.cancel();
            }
            inner.idle.clear();
            inner
                .slots
                .iter_mut()
                .map(|slot| {
                    slot.state = WorkerState::Disposed;
                    Arc::clone(&slot.process)
                })
                .collect()
        };
        self.available.notify_all();
        for process in &processes {
            process.terminate();
        }
        info!(workers = processes.len(), "checker pool disposed");
    }

    pub fn state(&self) -> PoolState {
        self.inner.lock().state
    }

    /// Workers owned by the pool that have not been disposed.
    pub fn worker_count(&self) -> usize {
        self.inner.lock()
            .slots
            .iter()
            .filter(|s| s.state != WorkerState::Disposed)
            .count()
    }

    /// Workers available to `acquire` right now.
    pub fn ready_count(&self) -> usize {
        self.inner.lock().idle.len()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        let inner = self.inner.lock();
        let mut states: Vec<WorkerState> = inner.slots.iter().map(|s| s.state).collect();
        states.extend(std::iter::repeat_n(WorkerState::Starting, inner.starting));
        states
    }
}

impl Drop for CheckerPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for CheckerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CheckerPool")
            .field("state", &inner.state)
            .field("workers", &inner.slots.len())
            .field("ready", &inner.idle.len())
            .finish()
    }
}
