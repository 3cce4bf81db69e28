use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::files::{normalize_name, FileContent, SourceFile};

const SKIP_NAMES: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    "target",
    "dist",
    "build",
    "coverage",
    ".next",
    ".nuxt",
    ".mutator-tmp",
    ".mutator-state.json",
];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not a UTF-8 path")]
    NonUtf8Path { path: PathBuf },
    #[error("file to mutate {0} is not part of the project")]
    UnknownMutateTarget(Utf8PathBuf),
}

/// All project files plus the subset selected for mutation.
#[derive(Debug, Clone, Default)]
pub struct InputFiles {
    files: Vec<SourceFile>,
    mutate: Vec<Utf8PathBuf>,
}

impl InputFiles {
    /// Every name in `mutate` must be present in `files`.
    pub fn new(files: Vec<SourceFile>, mutate: Vec<Utf8PathBuf>) -> Result<Self, InputError> {
        let mutate: Vec<Utf8PathBuf> = mutate.into_iter().map(normalize_name).collect();
        for name in &mutate {
            if !files.iter().any(|f| f.name() == name) {
                return Err(InputError::UnknownMutateTarget(name.clone()));
            }
        }
        Ok(Self { files, mutate })
    }

    /// Walk `root`, skipping VCS, dependency and build output directories as
    /// well as every path in `skip_dirs` (the sandbox base, for one).
    pub fn discover(root: &Path, mutate: Vec<Utf8PathBuf>, skip_dirs: &[PathBuf]) -> Result<Self, InputError> {
        let mut files = Vec::new();
        collect_files(root, Utf8Path::new(""), skip_dirs, &mut files)?;
        files.sort_by(|a, b| a.name().cmp(b.name()));
        debug!(root = %root.display(), files = files.len(), "discovered input files");
        Self::new(files, mutate)
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn mutate(&self) -> &[Utf8PathBuf] {
        &self.mutate
    }

    pub fn files_to_mutate(&self) -> Vec<SourceFile> {
        self.files
            .iter()
            .filter(|f| self.mutate.iter().any(|m| m == f.name()))
            .cloned()
            .collect()
    }
}

fn should_skip(name: &str) -> bool {
    SKIP_NAMES.contains(&name) || name.ends_with(".pyc")
}

fn read_err(path: &Path) -> impl FnOnce(std::io::Error) -> InputError {
    let path = path.to_path_buf();
    move |source| InputError::Read { path, source }
}

fn collect_files(
    dir: &Path,
    prefix: &Utf8Path,
    skip_dirs: &[PathBuf],
    out: &mut Vec<SourceFile>,
) -> Result<(), InputError> {
    for entry in fs::read_dir(dir).map_err(read_err(dir))? {
        let entry = entry.map_err(read_err(dir))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            return Err(InputError::NonUtf8Path { path: entry.path() });
        };
        if should_skip(name) {
            continue;
        }
        let path = entry.path();
        if skip_dirs.iter().any(|skip| *skip == path) {
            debug!(path = %path.display(), "skipping excluded directory");
            continue;
        }
        let rel = prefix.join(name);
        let ft = entry.file_type().map_err(read_err(&path))?;
        if ft.is_dir() {
            collect_files(&path, &rel, skip_dirs, out)?;
        } else if ft.is_file() {
            let bytes = fs::read(&path).map_err(read_err(&path))?;
            let content = match String::from_utf8(bytes) {
                Ok(text) => FileContent::Text(text),
                Err(e) => FileContent::Binary(e.into_bytes()),
            };
            out.push(SourceFile::new(rel, content));
        }
        // Symlinks and special files are left out
    }
    Ok(())
}
