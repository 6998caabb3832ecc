//! Legacy port patch: a literal substring replacement in the child's source.

use std::path::Path;

use portbridge_core::config::PatchConfig;

use super::SupervisorError;

/// Result of applying a [`PortPatch`] to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The literal was found and replaced this many times.
    Applied { occurrences: usize },
    /// The literal is absent; the file was not touched.
    NotFound,
}

/// Exact-match substitution of one literal for another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPatch {
    search: String,
    replace: String,
}

impl PortPatch {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }

    pub fn from_config(config: &PatchConfig) -> Self {
        Self::new(config.search.clone(), config.replace.clone())
    }

    /// Patched copy of `content`, or `None` if the literal does not occur.
    pub fn apply_to_str(&self, content: &str) -> Option<(String, usize)> {
        if self.search.is_empty() {
            return None;
        }
        let occurrences = content.matches(self.search.as_str()).count();
        if occurrences == 0 {
            return None;
        }
        Some((content.replace(&self.search, &self.replace), occurrences))
    }

    /// Rewrite `path` in place. The file is only written when the literal
    /// is present.
    pub async fn apply(&self, path: &Path) -> Result<PatchOutcome, SupervisorError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| SupervisorError::Patch {
                    path: path.to_path_buf(),
                    source,
                })?;

        let Some((patched, occurrences)) = self.apply_to_str(&content) else {
            return Ok(PatchOutcome::NotFound);
        };

        tokio::fs::write(path, patched)
            .await
            .map_err(|source| SupervisorError::Patch {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(PatchOutcome::Applied { occurrences })
    }
}
