//! Logical ↔ physical path translation.
//!
//! The catalog only ever stores *logical* paths: `/`-separated strings
//! relative to the application root. Historical rows were written under
//! three different conventions, so reading a logical path tries an ordered
//! list of [`Candidate`] builders and takes the first one naming an existing file.
//!
//! Writing never goes through that list: new files are always placed at
//! [`PathResolver::write_location`], which is the application-root form.

use crate::error::EditionError;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// One way of turning a logical path into a filesystem location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Candidate {
    /// Relative to the application root. The only convention used for writes.
    AppRoot,
    /// The stored string as-is: absolute, or relative to the working directory.
    Literal,
    /// Relative to the working directory with an explicit `./` prefix.
    CurrentDir,
}

impl Candidate {
    /// Default resolution order.
    pub const DEFAULT_ORDER: [Candidate; 3] =
        [Candidate::AppRoot, Candidate::Literal, Candidate::CurrentDir];

    fn build(&self, root: &Path, original: &str, stripped: &str) -> PathBuf {
        match self {
            Candidate::AppRoot => root.join(stripped),
            Candidate::Literal => PathBuf::from(original),
            Candidate::CurrentDir => Path::new(".").join(stripped),
        }
    }
}

/// Resolves logical paths against the application root and legacy conventions.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    order: Vec<Candidate>,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            order: Candidate::DEFAULT_ORDER.to_vec(),
        }
    }

    /// Replace the candidate order. New conventions are appended here.
    pub fn with_order(mut self, order: Vec<Candidate>) -> Self {
        self.order = order;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every location a logical path could refer to, in priority order.
    pub fn candidates(&self, logical: &str) -> Vec<PathBuf> {
        let stripped = strip_leading_separators(logical);
        let mut out: Vec<PathBuf> = Vec::with_capacity(self.order.len());
        for candidate in &self.order {
            let path = candidate.build(&self.root, logical, stripped);
            if !out.contains(&path) {
                out.push(path);
            }
        }
        out
    }

    /// Resolve a logical path to the first candidate that is a regular file.
    ///
    /// Directories never match: every stored path names a PDF or an image.
    pub fn resolve(&self, logical: &str) -> Result<PathBuf, EditionError> {
        let stripped = strip_leading_separators(logical);
        let mut tried = Vec::with_capacity(self.order.len());

        for candidate in &self.order {
            let path = candidate.build(&self.root, logical, stripped);
            if path.is_file() {
                if *candidate != Candidate::AppRoot {
                    warn!(logical, ?candidate, "Resolved through legacy path convention");
                } else {
                    debug!(logical, path = %path.display(), "Resolved");
                }
                return Ok(path);
            }
            if !tried.contains(&path) {
                tried.push(path);
            }
        }

        Err(EditionError::PathNotFound {
            logical: logical.to_string(),
            tried,
        })
    }

    /// Physical location for a new file with this logical path.
    pub fn write_location(&self, logical: &str) -> PathBuf {
        self.root.join(strip_leading_separators(logical))
    }

    /// Canonical logical form of a physical path under the root.
    ///
    /// Fails with `Internal` when the path lies outside the root.
    pub fn to_logical(&self, physical: &Path) -> Result<String, EditionError> {
        let relative = physical.strip_prefix(&self.root).map_err(|_| {
            EditionError::Internal(format!(
                "'{}' is outside the application root '{}'",
                physical.display(),
                self.root.display()
            ))
        })?;

        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();

        if parts.is_empty() {
            return Err(EditionError::Internal(format!(
                "'{}' is the application root, not a file under it",
                physical.display()
            )));
        }
        Ok(parts.join("/"))
    }
}

fn strip_leading_separators(logical: &str) -> &str {
    logical.trim_start_matches(['/', '\\'])
}
