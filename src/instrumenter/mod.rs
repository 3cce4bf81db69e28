//! Mutant switching for JavaScript and TypeScript sources.
//!
//! The pipeline only depends on the [`Instrumenter`] trait. [`SwitchInstrumenter`]
//! is the bundled implementation: it parses each file with tree-sitter, discovers
//! mutations inside function bodies and rewrites the file so every mutant can be
//! activated at runtime through `globalThis.__mutantActive`.

mod discover;
pub mod operators;
mod switch;

use std::collections::HashMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tree_sitter::{Node, Parser};

use crate::files::{FileContent, SourceFile};
use crate::mutants::{InstrumentResult, Location, Mutant, MutantStatus, Position};
use crate::Language;
use discover::Candidate;
use switch::{Switch, SwitchSet};

pub use switch::{ACTIVE_MUTANT, PREAMBLE};

/// Mutator plugin configuration handed to the instrumenter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutatorDescriptor {
    /// Enabled mutator families (`equality`, `logical`, ...). Empty enables all.
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Individual mutator names to leave out (`boundary`, `bool_flip`, ...).
    #[serde(default)]
    pub excluded_mutations: Vec<String>,
}

impl MutatorDescriptor {
    pub fn allows(&self, family: operators::Family, mutator: &str) -> bool {
        let family_on = self.plugins.is_empty() || self.plugins.iter().any(|p| p == family.as_str());
        family_on && !self.excluded_mutations.iter().any(|m| m == mutator)
    }
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("cannot instrument {file}: unsupported file type")]
    UnsupportedLanguage { file: Utf8PathBuf },
    #[error("cannot instrument {file}: content is not valid UTF-8 text")]
    NotText { file: Utf8PathBuf },
    #[error("cannot instrument {file}: failed to load grammar: {reason}")]
    Grammar { file: Utf8PathBuf, reason: String },
    #[error("cannot instrument {file}: syntax error at {line}:{column}")]
    Parse {
        file: Utf8PathBuf,
        line: usize,
        column: usize,
    },
}

pub trait Instrumenter: Sync {
    /// Instrument `files` and return the variants that received at least one
    /// mutant, plus the full mutant catalog. The input is left untouched.
    fn instrument(
        &self,
        files: &[SourceFile],
        descriptor: &MutatorDescriptor,
    ) -> Result<InstrumentResult, InstrumentError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SwitchInstrumenter;

impl Instrumenter for SwitchInstrumenter {
    fn instrument(
        &self,
        files: &[SourceFile],
        descriptor: &MutatorDescriptor,
    ) -> Result<InstrumentResult, InstrumentError> {
        let mut result = InstrumentResult::default();
        let mut next_id = 0usize;

        for file in files {
            let name = file.name().to_path_buf();
            let language = crate::detect_language(&name)
                .ok_or_else(|| InstrumentError::UnsupportedLanguage { file: name.clone() })?;
            let FileContent::Text(source) = file.content() else {
                return Err(InstrumentError::NotText { file: name });
            };

            let mut parser = Parser::new();
            let grammar = match language {
                Language::JavaScript => tree_sitter_javascript::LANGUAGE,
                Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT,
                Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX,
            };
            parser
                .set_language(&grammar.into())
                .map_err(|e| InstrumentError::Grammar {
                    file: name.clone(),
                    reason: e.to_string(),
                })?;
            let tree = parser.parse(source, None).ok_or_else(|| InstrumentError::Parse {
                file: name.clone(),
                line: 1,
                column: 1,
            })?;
            let root = tree.root_node();
            if root.has_error() {
                let at = first_error(root).unwrap_or(root).start_position();
                return Err(InstrumentError::Parse {
                    file: name,
                    line: at.row + 1,
                    column: at.column + 1,
                });
            }

            let candidates: Vec<Candidate> = discover::discover(root, source)
                .into_iter()
                .filter(|c| descriptor.allows(c.family, c.mutator))
                .collect();
            debug!(file = %name, mutants = candidates.len(), "discovered mutants");
            if candidates.is_empty() {
                continue;
            }

            let mut switches: HashMap<usize, SwitchSet> = HashMap::new();
            for c in candidates {
                let id = next_id.to_string();
                next_id += 1;

                let (p_start, p_end) = c.placement_range;
                let alternative = format!(
                    "{}{}{}",
                    &source[p_start..c.span.0],
                    c.replacement,
                    &source[c.span.1..p_end]
                );
                switches
                    .entry(c.node_id)
                    .or_insert_with(|| SwitchSet { placement: c.placement, switches: Vec::new() })
                    .switches
                    .push(Switch { id: id.clone(), alternative });

                result.mutants.push(Mutant {
                    id,
                    location: Location {
                        file: name.clone(),
                        start: Position { line: c.start.row + 1, column: c.start.column + 1 },
                        end: Position { line: c.end.row + 1, column: c.end.column + 1 },
                        start_byte: c.span.0,
                        end_byte: c.span.1,
                    },
                    mutator: c.mutator.to_string(),
                    original: c.original,
                    replacement: c.replacement,
                    status: MutantStatus::Pending,
                });
            }

            let instrumented = switch::emit_file(root, source, &switches);
            let mut variant = SourceFile::text(name, instrumented);
            if let Some(map) = file.source_map() {
                variant = variant.with_source_map(map);
            }
            result.files.push(variant);
        }

        Ok(result)
    }
}

fn first_error(node: Node) -> Option<Node> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    children
        .into_iter()
        .filter(|c| c.has_error() || c.is_missing())
        .find_map(first_error)
}
