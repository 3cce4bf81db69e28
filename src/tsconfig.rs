//! Rewrites `tsconfig*.json` references so they resolve inside the sandbox.
//!
//! Relative `extends`, `references[].path` and `files[]` entries are resolved
//! against the manifest's directory and rewritten to the normalized path of the
//! file actually present in the set. A reference that leaves the project or
//! names a file that is not in the set means the file universe is inconsistent
//! and fails the run.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::files::{FileContent, ReconciledFileSet, SourceFile};

#[derive(Debug, Error)]
pub enum ManifestRewriteError {
    #[error("{manifest}: invalid tsconfig: {reason}")]
    Parse { manifest: Utf8PathBuf, reason: String },
    #[error("{manifest}: reference {reference:?} points outside the project")]
    OutsideProject {
        manifest: Utf8PathBuf,
        reference: String,
    },
    #[error("{manifest}: reference {reference:?} does not resolve to a file in the project")]
    Missing {
        manifest: Utf8PathBuf,
        reference: String,
    },
}

pub fn is_manifest(name: &Utf8Path) -> bool {
    name.file_name()
        .is_some_and(|f| f.starts_with("tsconfig") && f.ends_with(".json"))
}

pub fn rewrite(mut files: ReconciledFileSet) -> Result<ReconciledFileSet, ManifestRewriteError> {
    let manifests: Vec<SourceFile> = files
        .files()
        .filter(|f| is_manifest(f.name()))
        .cloned()
        .collect();

    for manifest in manifests {
        if let Some(updated) = rewrite_manifest(&manifest, &files)? {
            debug!(manifest = %manifest.name(), "rewrote tsconfig references");
            files.replace(updated);
        }
    }
    Ok(files)
}

#[derive(Clone, Copy)]
enum RefKind {
    Extends,
    ProjectReference,
    File,
}

struct Resolver<'a> {
    manifest: &'a Utf8Path,
    dir: &'a Utf8Path,
    files: &'a ReconciledFileSet,
}

impl Resolver<'_> {
    /// Returns the rewritten reference, or `None` when it is left as-is.
    fn resolve(&self, reference: &str, kind: RefKind) -> Result<Option<String>, ManifestRewriteError> {
        let relative = reference.starts_with("./") || reference.starts_with("../");
        // Bare `extends` specifiers name packages, not project files.
        if matches!(kind, RefKind::Extends) && !relative {
            return Ok(None);
        }

        let joined = self.dir.join(reference);
        let target = normalize(&joined).ok_or_else(|| ManifestRewriteError::OutsideProject {
            manifest: self.manifest.to_path_buf(),
            reference: reference.to_string(),
        })?;

        let candidates: Vec<Utf8PathBuf> = match kind {
            RefKind::Extends if !reference.ends_with(".json") => {
                vec![target.clone(), Utf8PathBuf::from(format!("{target}.json"))]
            }
            RefKind::ProjectReference if !reference.ends_with(".json") => {
                vec![target.join("tsconfig.json"), target.clone()]
            }
            _ => vec![target],
        };

        let found = candidates
            .into_iter()
            .find(|c| self.files.contains(c))
            .ok_or_else(|| ManifestRewriteError::Missing {
                manifest: self.manifest.to_path_buf(),
                reference: reference.to_string(),
            })?;

        let rewritten = relative_reference(self.dir, &found);
        let unchanged = rewritten.trim_start_matches("./") == reference.trim_start_matches("./");
        Ok((!unchanged).then_some(rewritten))
    }

    fn rewrite_slot(&self, slot: &mut Value, kind: RefKind) -> Result<bool, ManifestRewriteError> {
        let Value::String(reference) = slot else {
            return Ok(false);
        };
        match self.resolve(reference, kind)? {
            Some(rewritten) => {
                *slot = Value::String(rewritten);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn rewrite_manifest(
    manifest: &SourceFile,
    files: &ReconciledFileSet,
) -> Result<Option<SourceFile>, ManifestRewriteError> {
    let name = manifest.name();
    let parse_error = |reason: String| ManifestRewriteError::Parse {
        manifest: name.to_path_buf(),
        reason,
    };
    let FileContent::Text(text) = manifest.content() else {
        return Err(parse_error("not UTF-8 text".to_string()));
    };
    let mut config: Value =
        serde_json::from_str(&strip_jsonc(text)).map_err(|e| parse_error(e.to_string()))?;

    let resolver = Resolver {
        manifest: name,
        dir: name.parent().unwrap_or(Utf8Path::new("")),
        files,
    };
    let mut changed = false;

    if let Some(extends) = config.get_mut("extends") {
        match extends {
            Value::Array(items) => {
                for item in items {
                    changed |= resolver.rewrite_slot(item, RefKind::Extends)?;
                }
            }
            slot => changed |= resolver.rewrite_slot(slot, RefKind::Extends)?,
        }
    }
    if let Some(Value::Array(references)) = config.get_mut("references") {
        for reference in references {
            if let Some(path) = reference.get_mut("path") {
                changed |= resolver.rewrite_slot(path, RefKind::ProjectReference)?;
            }
        }
    }
    if let Some(Value::Array(entries)) = config.get_mut("files") {
        for entry in entries {
            changed |= resolver.rewrite_slot(entry, RefKind::File)?;
        }
    }

    if !changed {
        return Ok(None);
    }
    let mut out = serde_json::to_string_pretty(&config).map_err(|e| parse_error(e.to_string()))?;
    out.push('\n');
    Ok(Some(SourceFile::text(name.to_path_buf(), out)))
}

/// Lexically resolve `.` and `..`. Returns `None` if the path climbs above the root.
fn normalize(path: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            Utf8Component::Normal(p) => parts.push(p),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                parts.pop()?;
            }
            Utf8Component::RootDir | Utf8Component::Prefix(_) => return None,
        }
    }
    Some(parts.join("/").into())
}

fn relative_reference(from_dir: &Utf8Path, target: &Utf8Path) -> String {
    let from: Vec<&str> = from_dir.iter().collect();
    let to: Vec<&str> = target.iter().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<&str> = vec![".."; from.len() - common];
    parts.extend(&to[common..]);
    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{joined}")
    }
}

/// Drop `//` and `/* */` comments and trailing commas so tsconfig parses as JSON.
fn strip_jsonc(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for n in chars.by_ref() {
                    if n == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for n in chars.by_ref() {
                    if prev == '*' && n == '/' {
                        break;
                    }
                    prev = n;
                }
            }
            _ => out.push(c),
        }
    }
    strip_trailing_commas(&out)
}

fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        if c == '"' {
            in_string = true;
        }
        if c == ',' {
            let next = input[i + 1..].chars().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonc_comments_and_trailing_commas_are_removed() {
        let input = r#"{
  // compiler settings
  "compilerOptions": { "strict": true, /* inline */ },
  "include": ["src/**/*", "http://x"],
}"#;
        let value: Value = serde_json::from_str(&strip_jsonc(input)).unwrap();
        assert_eq!(value["compilerOptions"]["strict"], Value::Bool(true));
        assert_eq!(value["include"][1], "http://x");
    }

    #[test]
    fn normalize_rejects_escaping_paths() {
        assert_eq!(normalize(Utf8Path::new("a/../b/./c")), Some("b/c".into()));
        assert_eq!(normalize(Utf8Path::new("../x")), None);
    }

    #[test]
    fn relative_reference_prefixes_current_dir() {
        assert_eq!(relative_reference(Utf8Path::new(""), Utf8Path::new("tsconfig.base.json")), "./tsconfig.base.json");
        assert_eq!(
            relative_reference(Utf8Path::new("packages/app"), Utf8Path::new("packages/lib/tsconfig.json")),
            "../lib/tsconfig.json"
        );
    }

    #[test]
    fn manifest_names() {
        assert!(is_manifest(Utf8Path::new("tsconfig.json")));
        assert!(is_manifest(Utf8Path::new("pkg/tsconfig.build.json")));
        assert!(!is_manifest(Utf8Path::new("package.json")));
    }
}
