//! Checker workers validate mutants cheaply (for example with a type check)
//! before they reach the test runners.

pub mod pool;
pub mod process;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::concurrency::ConcurrencyToken;
use crate::mutants::Mutant;

pub use pool::{CheckerPool, CheckerWorker, PoolError, PoolState, WorkerState};
pub use process::ProcessLauncher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CheckResult {
    Passed,
    CompileError { reason: String },
}

#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("failed to spawn checker `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("checker {slot} failed its handshake: {reason}")]
    Handshake { slot: usize, reason: String },
    #[error("checker {slot} did not report ready within {timeout:?}")]
    HandshakeTimeout { slot: usize, timeout: Duration },
    #[error("checker sent an invalid response: {0}")]
    Protocol(String),
    #[error("checker process has been terminated")]
    Terminated,
    #[error("checker launch was cancelled")]
    Cancelled,
    #[error("checker I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A running checker. Implementations must let `terminate` proceed while
/// another thread is blocked inside `check`.
pub trait CheckerProcess: Send + Sync {
    fn check(&self, mutant: &Mutant) -> Result<CheckResult, CheckerError>;

    /// Stop the checker. Repeated calls are no-ops.
    fn terminate(&self);

    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Starts one checker for one concurrency token. Returns once the checker is
/// ready to accept work, or with [`CheckerError::Cancelled`] soon after
/// `cancel` fires. Nothing may be left running on any error.
pub trait CheckerLauncher: Send + Sync {
    fn launch(
        &self,
        token: &ConcurrencyToken,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn CheckerProcess>, CheckerError>;
}

/// Used when no checker command is configured: every mutant passes.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughLauncher;

impl CheckerLauncher for PassthroughLauncher {
    fn launch(
        &self,
        _token: &ConcurrencyToken,
        cancel: &CancelToken,
    ) -> Result<Arc<dyn CheckerProcess>, CheckerError> {
        if cancel.is_cancelled() {
            return Err(CheckerError::Cancelled);
        }
        Ok(Arc::new(PassthroughChecker))
    }
}

struct PassthroughChecker;

impl CheckerProcess for PassthroughChecker {
    fn check(&self, _mutant: &Mutant) -> Result<CheckResult, CheckerError> {
        Ok(CheckResult::Passed)
    }

    fn terminate(&self) {}
}
