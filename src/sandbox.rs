use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::files::ReconciledFileSet;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to create sandbox directory in {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("refusing to place {file} in the sandbox: path must be relative and stay inside the project")]
    InvalidPath { file: Utf8PathBuf },
    #[error("failed to write {file} into the sandbox: {source}")]
    Write {
        file: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove sandbox {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sandbox creation was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Directory the sandbox is created in.
    pub temp_dir: PathBuf,
    /// Included in the sandbox directory name so concurrent runs are told apart.
    pub session: String,
    /// Project whose `node_modules` gets linked into the sandbox.
    pub project_root: Option<PathBuf>,
    pub symlink_node_modules: bool,
}

impl SandboxOptions {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            session: generate_session_id(),
            project_root: None,
            symlink_node_modules: true,
        }
    }
}

pub fn generate_session_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}

/// An isolated copy of the project on disk. The directory is removed when the
/// sandbox is disposed or dropped.
#[derive(Debug)]
pub struct Sandbox {
    dir: TempDir,
    files: Vec<Utf8PathBuf>,
}

impl Sandbox {
    /// Materialize every file under a fresh directory. On any failure the
    /// partially written directory is removed before the error is returned.
    pub fn create(
        files: &ReconciledFileSet,
        options: &SandboxOptions,
        cancel: &CancelToken,
    ) -> Result<Sandbox, SandboxError> {
        fs::create_dir_all(&options.temp_dir).map_err(|source| SandboxError::CreateDir {
            path: options.temp_dir.clone(),
            source,
        })?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("sandbox-{}-", options.session))
            .tempdir_in(&options.temp_dir)
            .map_err(|source| SandboxError::CreateDir {
                path: options.temp_dir.clone(),
                source,
            })?;
        debug!(sandbox = %dir.path().display(), files = files.len(), "materializing sandbox");

        let mut written = Vec::with_capacity(files.len());
        for file in files.files() {
            if cancel.is_cancelled() {
                return Err(discard(dir, SandboxError::Cancelled));
            }
            if let Err(e) = write_file(dir.path(), file.name(), file.content().as_bytes()) {
                return Err(discard(dir, e));
            }
            written.push(file.name().to_path_buf());
        }

        if options.symlink_node_modules {
            if let Some(root) = &options.project_root {
                link_node_modules(root, dir.path());
            }
        }

        info!(sandbox = %dir.path().display(), files = written.len(), "sandbox ready");
        Ok(Sandbox { dir, files: written })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Identities of the files written, in set order.
    pub fn files(&self) -> &[Utf8PathBuf] {
        &self.files
    }

    /// Where a project file lives inside the sandbox.
    pub fn sandbox_file_name(&self, name: &Utf8Path) -> PathBuf {
        self.dir.path().join(name.as_std_path())
    }

    pub fn dispose(self) -> Result<(), SandboxError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|source| SandboxError::Remove { path: path.clone(), source })?;
        debug!(sandbox = %path.display(), "sandbox removed");
        Ok(())
    }

    /// Keep the directory on disk and return its path.
    pub fn persist(self) -> PathBuf {
        self.dir.keep()
    }
}

fn discard(dir: TempDir, err: SandboxError) -> SandboxError {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        warn!(sandbox = %path.display(), error = %e, "failed to remove partial sandbox");
    }
    err
}

fn write_file(root: &Path, name: &Utf8Path, bytes: &[u8]) -> Result<(), SandboxError> {
    let safe = name.components().all(|c| matches!(c, Utf8Component::Normal(_) | Utf8Component::CurDir));
    if !safe || name.as_str().is_empty() {
        return Err(SandboxError::InvalidPath { file: name.to_path_buf() });
    }
    let dest = root.join(name.as_std_path());
    let write_err = |source| SandboxError::Write { file: name.to_path_buf(), source };
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(&dest, bytes).map_err(write_err)
}

#[cfg(unix)]
fn link_node_modules(project_root: &Path, sandbox: &Path) {
    let source = project_root.join("node_modules");
    if !source.is_dir() {
        return;
    }
    let target = sandbox.join("node_modules");
    if target.exists() {
        return;
    }
    if let Err(e) = std::os::unix::fs::symlink(&source, &target) {
        warn!(error = %e, "could not link node_modules into the sandbox");
    }
}

#[cfg(not(unix))]
fn link_node_modules(_project_root: &Path, _sandbox: &Path) {}
