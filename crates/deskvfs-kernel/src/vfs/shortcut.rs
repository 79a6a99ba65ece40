//! Shortcut files: small records pointing at another virtual path.
//!
//! A shortcut is a JSON file with the `.shortcut` extension stored in place.
//! It names its target by virtual path and owning handler, never by real
//! path, so it survives remounts. Following a shortcut is always exactly one
//! hop; a shortcut pointing at another shortcut yields that shortcut file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::error::{VfsError, VfsResult};
use super::translate::{PathTranslator, Resolved, split_vpath};

/// Reserved extension of shortcut files, including the dot.
pub const SHORTCUT_EXT: &str = ".shortcut";

/// Records larger than this are not shortcuts.
const MAX_RECORD_BYTES: u64 = 64 * 1024;

/// What a shortcut points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortcutKind {
    #[default]
    File,
    Folder,
}

/// Parsed shortcut record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortcutRecord {
    #[serde(default)]
    pub kind: ShortcutKind,
    /// Display name.
    pub name: String,
    /// Target virtual path.
    pub target: String,
    /// Id of the handler owning the target.
    pub handler: String,
}

/// Whether a path carries the shortcut extension.
pub fn is_shortcut_path(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(SHORTCUT_EXT))
        .unwrap_or(false)
}

/// Read and parse a shortcut file.
pub async fn read_shortcut(real: &Path) -> VfsResult<ShortcutRecord> {
    let meta = tokio::fs::metadata(real)
        .await
        .map_err(|e| VfsError::from_io(e, real.display().to_string()))?;
    if meta.is_dir() || meta.len() > MAX_RECORD_BYTES {
        return Err(VfsError::parse_failure(format!(
            "{} is not a shortcut record",
            real.display()
        )));
    }
    let bytes = tokio::fs::read(real)
        .await
        .map_err(|e| VfsError::from_io(e, real.display().to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VfsError::parse_failure(format!("{}: {}", real.display(), e)))
}

/// Read a shortcut, treating any failure as "not a shortcut".
pub async fn try_read_shortcut(real: &Path) -> Option<ShortcutRecord> {
    match read_shortcut(real).await {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::debug!("ignoring unreadable shortcut {}: {}", real.display(), e);
            None
        }
    }
}

/// Creates, reads and follows shortcuts through the translator.
#[derive(Debug, Clone)]
pub struct ShortcutResolver {
    translator: PathTranslator,
}

impl ShortcutResolver {
    pub fn new(translator: PathTranslator) -> Self {
        Self { translator }
    }

    /// Create a shortcut at `at` pointing to `target`.
    ///
    /// The shortcut extension is appended to `at` when missing. The target
    /// must exist. Returns the shortcut's virtual path and record.
    pub async fn create(
        &self,
        at: &str,
        target: &str,
        name: Option<&str>,
    ) -> VfsResult<(String, ShortcutRecord)> {
        let target = self.translator.resolve(target).await?;
        let meta = tokio::fs::metadata(&target.real)
            .await
            .map_err(|e| VfsError::from_io(e, target.vpath.clone()))?;

        let at = if at.ends_with(SHORTCUT_EXT) {
            at.to_string()
        } else {
            format!("{at}{SHORTCUT_EXT}")
        };
        let location = self.translator.resolve(&at).await?;
        location.handler.check_writable()?;
        if tokio::fs::try_exists(&location.real).await? {
            return Err(VfsError::already_exists(location.vpath));
        }

        let record = ShortcutRecord {
            kind: if meta.is_dir() {
                ShortcutKind::Folder
            } else {
                ShortcutKind::File
            },
            name: name
                .map(str::to_string)
                .unwrap_or_else(|| split_vpath(&target.vpath).1.to_string()),
            target: target.vpath.clone(),
            handler: target.handler.id.clone(),
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| VfsError::other(format!("encode shortcut: {e}")))?;
        tokio::fs::write(&location.real, json).await?;

        tracing::debug!("shortcut {} -> {}", location.vpath, record.target);
        Ok((location.vpath, record))
    }

    /// Read the record of the shortcut at `vpath`.
    pub async fn read(&self, vpath: &str) -> VfsResult<ShortcutRecord> {
        let location = self.translator.resolve(vpath).await?;
        read_shortcut(&location.real).await
    }

    /// Resolve the target of a shortcut, one hop only.
    pub async fn follow(&self, vpath: &str) -> VfsResult<Resolved> {
        let record = self.read(vpath).await?;
        self.translator.resolve(&record.target).await
    }

    /// Delete the shortcut at `vpath`. The target is untouched.
    pub async fn delete(&self, vpath: &str) -> VfsResult<()> {
        let location = self.translator.resolve(vpath).await?;
        location.handler.check_writable()?;
        if !is_shortcut_path(&location.real) {
            return Err(VfsError::invalid_path(format!("{} is not a shortcut", location.vpath)));
        }
        tokio::fs::remove_file(&location.real)
            .await
            .map_err(|e| VfsError::from_io(e, location.vpath))
    }
}
