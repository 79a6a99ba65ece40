//! Core VFS types.
//!
//! Everything here is computed on demand and serialized straight to
//! clients; none of it is persisted except [`TrashRecord`].

use serde::{Deserialize, Serialize};

use super::shortcut::ShortcutRecord;

/// Mount state of a handler.
///
/// The only transitions are `Unmounted -> Mounted` and `Mounted -> Unmounted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountState {
    /// Storage is offline; paths under the handler do not resolve.
    #[default]
    Unmounted,
    /// Storage is online.
    Mounted,
}

impl MountState {
    /// Returns true if the handler is mounted.
    pub fn is_mounted(&self) -> bool {
        matches!(self, MountState::Mounted)
    }
}

/// User-facing description of a single file or directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileData {
    /// Base name.
    pub name: String,
    /// Virtual path, as clients address it.
    pub vpath: String,
    /// Real path on the host, always forward-slashed.
    pub real_path: String,
    /// Whether this is a directory.
    pub is_dir: bool,
    /// Size in bytes.
    pub size: u64,
    /// Size formatted by [`format_size`](super::metadata::format_size).
    pub display_size: String,
    /// Modification time, unix seconds.
    pub mod_time: i64,
    /// Whether the file is shared with other users.
    pub is_shared: bool,
    /// Parsed record when the file is a readable shortcut.
    pub shortcut: Option<ShortcutRecord>,
}

/// Extended properties for property-inspection views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileProperties {
    pub vpath: String,
    pub storage_path: String,
    pub basename: String,
    pub virtual_dirname: String,
    pub storage_dirname: String,
    /// Extension including the leading dot, or empty.
    pub ext: String,
    pub mime_type: String,
    pub size: u64,
    /// `ls -l` style permission string, e.g. `drwxr-xr-x`.
    pub permission: String,
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub last_mod_time: String,
    pub last_mod_unix: i64,
    pub is_dir: bool,
}

/// Restore metadata for an item held in a handler's trash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrashRecord {
    /// Name of the item inside the trash root.
    pub name: String,
    /// Virtual path of the item inside the trash root.
    pub vpath: String,
    /// Extension of the original name, including the leading dot.
    pub ext: String,
    pub is_dir: bool,
    pub size: u64,
    /// Removal time, unix seconds.
    pub removed_at: i64,
    /// Removal time, local `%Y-%m-%d %H:%M:%S`.
    pub removed_date: String,
    /// Where the item lived before it was trashed.
    pub original_vpath: String,
    pub original_name: String,
}

/// Result of a recursive size walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirSize {
    /// Total bytes of every counted file.
    pub bytes: u64,
    /// Number of counted files (directories are not counted).
    pub files: u64,
    /// Entries that could not be read and were left out of the sum.
    pub skipped: u64,
}

impl DirSize {
    /// True when some entries could not be read, so the sum is a lower bound.
    pub fn is_partial(&self) -> bool {
        self.skipped > 0
    }

    /// `(bytes, files)` pair.
    pub fn totals(&self) -> (u64, u64) {
        (self.bytes, self.files)
    }
}
