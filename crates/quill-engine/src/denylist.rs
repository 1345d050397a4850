use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_DENYLIST_JSON: &str = include_str!("../resources/default_denylist.json");

/// Override file shape: `{"phrases": [...], "replace": false}`.
#[derive(Debug, Deserialize)]
struct DenylistFile {
    #[serde(default)]
    replace: bool,
    #[serde(default)]
    phrases: Vec<String>,
}

/// Phrases that mark a stage output as "the model had nothing to say".
///
/// Matching is a case-insensitive substring test. The built-in set is only a
/// starting point; callers extend or replace it from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denylist {
    phrases: Vec<String>,
}

impl Denylist {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut denylist = Self {
            phrases: Vec::new(),
        };
        denylist.extend(phrases);
        denylist
    }

    pub fn empty() -> Self {
        Self {
            phrases: Vec::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut denylist = Self::empty();
        denylist.merge_json(DEFAULT_DENYLIST_JSON);
        denylist
    }

    /// Built-in phrases, then `~/.quill/denylist.json` when present, then `path`
    /// when given. Only an explicit `path` that cannot be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(home_override_path().as_deref(), path)
    }

    /// Like [`Self::load`] with the user-level override file given explicitly.
    /// A user file that is missing is skipped; one that is unreadable or invalid
    /// is skipped with a warning.
    pub fn load_from(user_file: Option<&Path>, path: Option<&Path>) -> Result<Self> {
        let mut denylist = Self::builtin();
        if let Some(user_file) = user_file {
            match fs::read_to_string(user_file) {
                Ok(raw) => match serde_json::from_str::<DenylistFile>(&raw) {
                    Ok(file) => denylist.apply(file),
                    Err(err) => warn!(
                        path = %user_file.display(),
                        error = %err,
                        "ignoring invalid denylist override"
                    ),
                },
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(
                    path = %user_file.display(),
                    error = %err,
                    "ignoring unreadable denylist override"
                ),
            }
        }
        if let Some(path) = path {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed reading denylist {}", path.display()))?;
            let file: DenylistFile = serde_json::from_str(&raw)
                .with_context(|| format!("invalid denylist JSON in {}", path.display()))?;
            denylist.apply(file);
        }
        Ok(denylist)
    }

    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn extend<I, S>(&mut self, phrases: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for phrase in phrases {
            let normalized = phrase.as_ref().trim().to_lowercase();
            if normalized.is_empty() || self.phrases.contains(&normalized) {
                continue;
            }
            self.phrases.push(normalized);
        }
    }

    /// The first phrase contained in `text`, if any.
    pub fn matches(&self, text: &str) -> Option<&str> {
        let lowered = text.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| lowered.contains(phrase.as_str()))
            .map(String::as_str)
    }

    fn merge_json(&mut self, raw: &str) {
        let Ok(file) = serde_json::from_str::<DenylistFile>(raw) else {
            return;
        };
        self.apply(file);
    }

    fn apply(&mut self, file: DenylistFile) {
        if file.replace {
            self.phrases.clear();
        }
        self.extend(file.phrases);
    }
}

impl Default for Denylist {
    fn default() -> Self {
        Self::builtin()
    }
}

fn home_override_path() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".quill").join("denylist.json"))
}
