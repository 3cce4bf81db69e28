use std::collections::{HashMap, HashSet};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            FileContent::Text(s) => s.as_bytes(),
            FileContent::Binary(b) => b,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FileContent::Text(s) => Some(s),
            FileContent::Binary(_) => None,
        }
    }
}

/// A project file keyed by its path relative to the project root.
///
/// Values are never mutated in place: an instrumented variant is a new
/// `SourceFile` carrying the same `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    name: Utf8PathBuf,
    content: FileContent,
    source_map: Option<String>,
}

impl SourceFile {
    pub fn new(name: impl Into<Utf8PathBuf>, content: FileContent) -> Self {
        Self {
            name: normalize_name(name.into()),
            content,
            source_map: None,
        }
    }

    pub fn text(name: impl Into<Utf8PathBuf>, text: impl Into<String>) -> Self {
        Self::new(name, FileContent::Text(text.into()))
    }

    pub fn with_source_map(mut self, source_map: impl Into<String>) -> Self {
        self.source_map = Some(source_map.into());
        self
    }

    pub fn name(&self) -> &Utf8Path {
        &self.name
    }

    pub fn content(&self) -> &FileContent {
        &self.content
    }

    pub fn source_map(&self) -> Option<&str> {
        self.source_map.as_deref()
    }
}

pub(crate) fn normalize_name(name: Utf8PathBuf) -> Utf8PathBuf {
    let s = name.as_str().replace('\\', "/");
    let s = s.trim_start_matches("./");
    Utf8PathBuf::from(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOrigin {
    Original,
    Instrumented,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledFile {
    pub file: SourceFile,
    pub origin: FileOrigin,
}

/// The complete project file list after instrumented variants were merged in.
/// Holds exactly one entry per original identity, in original order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciledFileSet {
    entries: Vec<ReconciledFile>,
}

impl ReconciledFileSet {
    pub fn files(&self) -> impl Iterator<Item = &SourceFile> {
        self.entries.iter().map(|e| &e.file)
    }

    pub fn entries(&self) -> &[ReconciledFile] {
        &self.entries
    }

    pub fn get(&self, name: &Utf8Path) -> Option<&SourceFile> {
        self.entries.iter().map(|e| &e.file).find(|f| f.name() == name)
    }

    pub fn contains(&self, name: &Utf8Path) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn instrumented_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.origin == FileOrigin::Instrumented)
            .count()
    }

    /// Swap the content of an existing entry, keeping its position and origin.
    /// Returns false when no entry has that identity.
    pub(crate) fn replace(&mut self, file: SourceFile) -> bool {
        match self.entries.iter_mut().find(|e| e.file.name() == file.name()) {
            Some(entry) => {
                entry.file = file;
                true
            }
            None => false,
        }
    }
}

/// Substitute each original file with its instrumented variant when one exists.
pub fn reconcile(original: &[SourceFile], instrumented: &[SourceFile]) -> ReconciledFileSet {
    let mut by_name: HashMap<&Utf8Path, &SourceFile> =
        instrumented.iter().map(|f| (f.name(), f)).collect();

    let mut seen: HashSet<&Utf8Path> = HashSet::with_capacity(original.len());
    let mut entries = Vec::with_capacity(original.len());
    for file in original {
        // Duplicate originals keep only their first occurrence.
        if !seen.insert(file.name()) {
            warn!(file = %file.name(), "duplicate input file ignored");
            continue;
        }
        let entry = match by_name.remove(file.name()) {
            Some(variant) => ReconciledFile {
                file: variant.clone(),
                origin: FileOrigin::Instrumented,
            },
            None => ReconciledFile {
                file: file.clone(),
                origin: FileOrigin::Original,
            },
        };
        entries.push(entry);
    }

    for stray in by_name.keys() {
        warn!(file = %stray, "instrumented file has no original counterpart");
    }

    ReconciledFileSet { entries }
}
