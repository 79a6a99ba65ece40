//! Bracket-tolerant filename globbing.
//!
//! `[` and `]` are glob metacharacters, so a literal name like
//! `report [1].pdf` never matches its own pattern. [`wglob`] retries such
//! patterns with the brackets turned into single-character wildcards.

use std::path::{Path, PathBuf};

use super::error::{VfsError, VfsResult};

/// Glob `pattern`, falling back to a bracket-relaxed match.
///
/// The literal pattern runs first. When it yields nothing (or is not a valid
/// pattern) and contains `[`/`]`, each bracket is replaced by `?` and the
/// results are kept only if they live in the pattern's parent directory.
pub fn wglob(pattern: &str) -> VfsResult<Vec<PathBuf>> {
    let has_brackets = pattern.contains(['[', ']']);

    let mut files = match glob_paths(pattern) {
        Ok(files) => files,
        Err(_) if has_brackets => Vec::new(),
        Err(e) => return Err(e),
    };

    if files.is_empty() && has_brackets {
        let relaxed = pattern.replace(['[', ']'], "?");
        let parent = Path::new(pattern).parent();
        files = glob_paths(&relaxed)?
            .into_iter()
            .filter(|f| f.parent() == parent)
            .collect();
    }

    files.sort();
    Ok(files)
}

fn glob_paths(pattern: &str) -> VfsResult<Vec<PathBuf>> {
    let paths = glob::glob(pattern)
        .map_err(|e| VfsError::invalid_path(format!("{pattern}: {e}")))?;
    // Unreadable entries are dropped, as a shell glob would.
    Ok(paths.filter_map(Result::ok).collect())
}
