//! Named target lists
//!
//! Plain text files under `<data_dir>/lists/<name>.txt`, one handle per
//! line. Loading normalizes handles (whitespace trimmed, leading '@'
//! stripped) and drops blanks and duplicates while preserving first-seen
//! order.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{OutreachError, Result};
use crate::types::Target;

#[derive(Clone)]
pub struct TargetLists {
    dir: PathBuf,
}

impl TargetLists {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        TargetLists {
            dir: data_dir.as_ref().join("lists"),
        }
    }

    fn list_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(OutreachError::InvalidInput(format!(
                "invalid list name '{}'",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.txt", name)))
    }

    /// Load and normalize a named list
    pub fn load(&self, name: &str) -> Result<Vec<Target>> {
        let path = self.list_path(name)?;
        let content = std::fs::read_to_string(&path).map_err(|e| {
            OutreachError::InvalidInput(format!("cannot read list '{}': {}", name, e))
        })?;

        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for line in content.lines() {
            if let Some(target) = Target::parse(line) {
                if seen.insert(target.dedup_key()) {
                    targets.push(target);
                }
            }
        }

        debug!(list = name, count = targets.len(), "Loaded target list");
        Ok(targets)
    }

    /// Append handles to a list, creating it if needed
    pub fn append(&self, name: &str, handles: &[String]) -> Result<()> {
        let path = self.list_path(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OutreachError::InvalidInput(format!("cannot create list dir: {}", e))
            })?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                OutreachError::InvalidInput(format!("cannot open list '{}': {}", name, e))
            })?;

        for handle in handles {
            if let Some(target) = Target::parse(handle) {
                writeln!(file, "{}", target.0).map_err(|e| {
                    OutreachError::InvalidInput(format!("cannot write list '{}': {}", name, e))
                })?;
            }
        }
        Ok(())
    }

    /// Names of all lists present on disk
    pub fn names(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        names
    }
}
