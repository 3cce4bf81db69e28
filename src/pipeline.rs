//! Instrument, reconcile, rewrite, then build the sandbox and the checker pool
//! side by side. The caller either gets a fully provisioned [`PipelineContext`]
//! or an error with nothing left running.

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use thiserror::Error;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::checker::{CheckerLauncher, CheckerPool, PoolError};
use crate::concurrency::{ConcurrencyTokenProvider, DEFAULT_RESERVED_EXECUTION_CORES};
use crate::files;
use crate::input::InputFiles;
use crate::instrumenter::{InstrumentError, Instrumenter, MutatorDescriptor};
use crate::mutants::Mutant;
use crate::sandbox::{Sandbox, SandboxError, SandboxOptions};
use crate::tsconfig::{self, ManifestRewriteError};

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("instrumentation failed: {0}")]
    Instrumentation(#[from] InstrumentError),
    #[error("tsconfig rewrite failed: {0}")]
    ManifestRewrite(#[from] ManifestRewriteError),
    #[error("checker pool failed: {0}")]
    PoolInit(#[source] PoolError),
    #[error("sandbox creation failed: {0}")]
    Sandbox(#[source] SandboxError),
    #[error("preparation was cancelled")]
    Cancelled,
}

impl PrepareError {
    /// Short name of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            PrepareError::Instrumentation(_) => "instrument",
            PrepareError::ManifestRewrite(_) => "rewrite",
            PrepareError::PoolInit(_) => "checker-pool",
            PrepareError::Sandbox(_) => "sandbox",
            PrepareError::Cancelled => "cancelled",
        }
    }
}

impl From<PoolError> for PrepareError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Cancelled => PrepareError::Cancelled,
            other => PrepareError::PoolInit(other),
        }
    }
}

impl From<SandboxError> for PrepareError {
    fn from(e: SandboxError) -> Self {
        match e {
            SandboxError::Cancelled => PrepareError::Cancelled,
            other => PrepareError::Sandbox(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrepareOptions {
    pub reserved_cores: usize,
    /// Overrides the detected core count when set.
    pub concurrency: Option<usize>,
    pub sandbox: SandboxOptions,
}

impl PrepareOptions {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            reserved_cores: DEFAULT_RESERVED_EXECUTION_CORES,
            concurrency: None,
            sandbox: SandboxOptions::new(temp_dir),
        }
    }
}

impl Default for PrepareOptions {
    fn default() -> Self {
        Self::new(".mutator-tmp")
    }
}

/// Everything the mutation-execution stage needs. Owned outright by the caller.
#[derive(Debug)]
pub struct PipelineContext {
    sandbox: Sandbox,
    mutants: Vec<Mutant>,
    checker_pool: Arc<CheckerPool>,
}

impl PipelineContext {
    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn mutants(&self) -> &[Mutant] {
        &self.mutants
    }

    pub fn checker_pool(&self) -> &Arc<CheckerPool> {
        &self.checker_pool
    }

    pub fn into_parts(self) -> (Sandbox, Vec<Mutant>, Arc<CheckerPool>) {
        (self.sandbox, self.mutants, self.checker_pool)
    }

    /// Stop the checkers, then remove the sandbox.
    pub fn dispose(self) -> Result<(), SandboxError> {
        self.checker_pool.dispose();
        self.sandbox.dispose()
    }
}

enum Branch {
    Pool(Result<(), PoolError>),
    Sandbox(Result<Sandbox, SandboxError>),
}

pub fn prepare(
    input: &InputFiles,
    descriptor: &MutatorDescriptor,
    instrumenter: &dyn Instrumenter,
    launcher: Arc<dyn CheckerLauncher>,
    options: &PrepareOptions,
    cancel: &CancelToken,
) -> Result<PipelineContext, PrepareError> {
    let to_mutate = input.files_to_mutate();
    let instrumented = instrumenter.instrument(&to_mutate, descriptor)?;
    info!(
        files = instrumented.files.len(),
        mutants = instrumented.mutants.len(),
        "instrumented"
    );
    if cancel.is_cancelled() {
        return Err(PrepareError::Cancelled);
    }

    let reconciled = files::reconcile(input.files(), &instrumented.files);
    let rewritten = tsconfig::rewrite(reconciled)?;

    let provider = ConcurrencyTokenProvider::from_host(options.concurrency, options.reserved_cores);
    let pool = Arc::new(CheckerPool::new(launcher));
    // Cancelled when either branch fails so the other stops early.
    let branch_cancel = cancel.child();

    let branches: Vec<Branch> = thread::scope(|scope| {
        let (tx, rx) = mpsc::channel();

        let pool_tx = tx.clone();
        let pool_ref = &pool;
        let pool_cancel = &branch_cancel;
        scope.spawn(move || {
            let result = pool_ref.initialize(provider.checker_tokens(), pool_cancel);
            let _ = pool_tx.send(Branch::Pool(result));
        });

        let files = &rewritten;
        let sandbox_cancel = &branch_cancel;
        scope.spawn(move || {
            let result = Sandbox::create(files, &options.sandbox, sandbox_cancel);
            let _ = tx.send(Branch::Sandbox(result));
        });

        let mut done = Vec::with_capacity(2);
        for branch in rx {
            let failed = matches!(&branch, Branch::Pool(Err(_)) | Branch::Sandbox(Err(_)));
            if failed {
                branch_cancel.cancel();
                pool.dispose();
            }
            done.push(branch);
        }
        done
    });

    let mut first_error: Option<PrepareError> = None;
    let mut sandbox = None;
    for branch in branches {
        match branch {
            Branch::Pool(Ok(())) => {}
            Branch::Pool(Err(e)) => {
                first_error.get_or_insert(e.into());
            }
            Branch::Sandbox(Ok(s)) => sandbox = Some(s),
            Branch::Sandbox(Err(e)) => {
                first_error.get_or_insert(e.into());
            }
        }
    }

    match (first_error, sandbox) {
        (None, Some(sandbox)) => {
            info!(
                sandbox = %sandbox.root().display(),
                mutants = instrumented.mutants.len(),
                checkers = pool.worker_count(),
                "preparation complete"
            );
            Ok(PipelineContext {
                sandbox,
                mutants: instrumented.mutants,
                checker_pool: pool,
            })
        }
        (err, sandbox) => {
            pool.dispose();
            if let Some(sandbox) = sandbox {
                if let Err(e) = sandbox.dispose() {
                    warn!(error = %e, "failed to clean up sandbox after a failed run");
                }
            }
            Err(err.unwrap_or(PrepareError::Cancelled))
        }
    }
}
