//! Source language detection and interpreter selection

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Languages a reference program may be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    JavaScript,
    Shell,
    Unknown,
}

impl Language {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("py") => Language::Python,
            Some("js") | Some("mjs") | Some("cjs") => Language::JavaScript,
            Some("sh") => Language::Shell,
            _ => Language::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::Shell => "shell",
            Language::Unknown => "Unknown",
        }
    }

    /// File extension used when materializing a candidate for this language.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Language::Python => Some("py"),
            Language::JavaScript => Some("js"),
            Language::Shell => Some("sh"),
            Language::Unknown => None,
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Interpreter binaries used to launch programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreters {
    pub python: String,
    pub node: String,
    pub shell: String,
}

impl Default for Interpreters {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            node: "node".to_string(),
            shell: "sh".to_string(),
        }
    }
}

impl Interpreters {
    /// Interpreter for `language`, or `None` when the program runs directly.
    pub fn for_language(&self, language: Language) -> Option<&str> {
        match language {
            Language::Python => Some(self.python.as_str()),
            Language::JavaScript => Some(self.node.as_str()),
            Language::Shell => Some(self.shell.as_str()),
            Language::Unknown => None,
        }
    }
}
