use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::mutants::Mutant;
use crate::pipeline::PipelineContext;

/// What a `prepare` run produced, persisted so `status` can show it later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareSummary {
    pub session: String,
    pub sandbox: String,
    pub sandbox_kept: bool,
    pub files: usize,
    pub instrumented_files: usize,
    pub mutants: usize,
    pub checkers: usize,
    pub mutants_by_mutator: BTreeMap<String, usize>,
    pub duration_ms: u64,
}

impl PrepareSummary {
    pub fn from_context(ctx: &PipelineContext, session: &str, duration_ms: u64) -> Self {
        let instrumented_files = ctx
            .mutants()
            .iter()
            .map(|m| &m.location.file)
            .collect::<BTreeSet<_>>()
            .len();
        Self {
            session: session.to_string(),
            sandbox: ctx.sandbox().root().display().to_string(),
            sandbox_kept: false,
            files: ctx.sandbox().files().len(),
            instrumented_files,
            mutants: ctx.mutants().len(),
            checkers: ctx.checker_pool().worker_count(),
            mutants_by_mutator: count_by_mutator(ctx.mutants()),
            duration_ms,
        }
    }
}

pub fn count_by_mutator(mutants: &[Mutant]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for m in mutants {
        *counts.entry(m.mutator.clone()).or_insert(0) += 1;
    }
    counts
}

fn state_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".mutator-state.json")
}

pub fn save_last_run(summary: &PrepareSummary) {
    save_to_path(summary, &state_path());
}

pub fn load_last_run() -> Option<PrepareSummary> {
    load_from_path(&state_path())
}

pub fn save_to_path(summary: &PrepareSummary, path: &Path) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!(path = %path.display(), error = %e, "could not save run state");
            }
        }
        Err(e) => warn!(error = %e, "could not serialize run state"),
    }
}

pub fn load_from_path(path: &Path) -> Option<PrepareSummary> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}
