use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::files::SourceFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// 1-based
    pub line: usize,
    /// 1-based
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: Utf8PathBuf,
    pub start: Position,
    pub end: Position,
    pub start_byte: usize,
    pub end_byte: usize,
}

/// Mutant outcome. Everything but `Pending` is assigned by later stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MutantStatus {
    #[default]
    Pending,
    Killed,
    Survived,
    Timeout,
    Unviable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutant {
    pub id: String,
    pub location: Location,
    pub mutator: String,
    pub original: String,
    pub replacement: String,
    pub status: MutantStatus,
}

#[derive(Debug, Clone, Default)]
pub struct InstrumentResult {
    pub files: Vec<SourceFile>,
    pub mutants: Vec<Mutant>,
}
