//! Source file-set resolution.
//!
//! Expands a glob pattern into a [`FileSet`]: the existing regular files it
//! matches, sorted lexicographically so every run sees the same file indices.
//!
//! # Examples
//!
//! ```no_run
//! use hypercopy::io::glob::resolve;
//!
//! let files = resolve("lake/Ventas_*.csv")?;
//! for (idx, path) in files.iter().enumerate() {
//!     println!("{idx}: {}", path.display());
//! }
//! # Ok::<(), hypercopy::HyperError>(())
//! ```

use crate::error::{HyperError, Result};
use glob::{MatchOptions, glob_with};
use std::path::{Path, PathBuf};

/// Ordered list of input files for one run.
///
/// The position of a path in the set is its *file index*, which fixes the
/// logical row order of the container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileSet {
    paths: Vec<PathBuf>,
}

impl FileSet {
    /// Build from explicit paths; they are sorted and de-duplicated.
    #[must_use]
    pub fn from_paths(mut paths: Vec<PathBuf>) -> Self {
        paths.sort();
        paths.dedup();
        Self { paths }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    #[must_use]
    pub fn get(&self, file_index: usize) -> Option<&Path> {
        self.paths.get(file_index).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Check pattern syntax without touching the filesystem.
///
/// # Errors
/// [`HyperError::InvalidPattern`] for an empty or malformed pattern.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(HyperError::InvalidPattern("pattern is empty".into()));
    }
    glob::Pattern::new(pattern)
        .map(|_| ())
        .map_err(|e| HyperError::InvalidPattern(format!("{pattern}: {e}")))
}

/// Expand `pattern` into a sorted [`FileSet`].
///
/// Supports the usual syntax: `*`, `?`, `**` for any depth of directories and
/// `[...]` character classes. Directories that match are skipped. Zero matches
/// is an empty set, not an error.
///
/// # Errors
/// - [`HyperError::InvalidPattern`] when the pattern does not parse.
/// - [`HyperError::Glob`] when a directory on the walk cannot be read.
pub fn resolve(pattern: &str) -> Result<FileSet> {
    validate_pattern(pattern)?;
    let options = MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let entries = glob_with(pattern, options)
        .map_err(|e| HyperError::InvalidPattern(format!("{pattern}: {e}")))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            HyperError::Glob(format!(
                "reading {} while expanding {pattern}: {}",
                e.path().display(),
                e.error()
            ))
        })?;
        if path.is_file() {
            paths.push(path);
        }
    }

    Ok(FileSet::from_paths(paths))
}
