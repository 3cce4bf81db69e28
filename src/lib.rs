pub mod cancel;
pub mod checker;
pub mod concurrency;
pub mod files;
pub mod input;
pub mod instrumenter;
pub mod logging;
pub mod mutants;
pub mod output;
pub mod pipeline;
pub mod sandbox;
pub mod state;
pub mod tsconfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    JavaScript,
    TypeScript,
    Tsx,
}

pub fn detect_language(path: &camino::Utf8Path) -> Option<Language> {
    match path.extension()? {
        "js" | "mjs" | "cjs" => Some(Language::JavaScript),
        "ts" | "mts" | "cts" => Some(Language::TypeScript),
        "tsx" | "jsx" => Some(Language::Tsx),
        _ => None,
    }
}
