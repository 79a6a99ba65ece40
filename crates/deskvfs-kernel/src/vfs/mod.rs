//! Virtual filesystem layer.
//!
//! Maps a platform-agnostic virtual namespace onto storage handlers: local
//! directories, removable devices and per-user home trees. Key components:
//!
//! - [`HandlerRegistry`] - registered handlers and their mount state
//! - [`PathTranslator`] - virtual ↔ real path resolution, name search
//! - [`MountManager`] - device mounting through a [`MountStrategy`]
//! - [`ShortcutResolver`] - `.shortcut` reference files
//! - [`MetadataResolver`] - file descriptors and extended properties
//! - [`TrashStore`] - soft delete with restore metadata
//! - [`SizeAggregator`] - recursive size accounting
//!
//! ## Design Decisions
//!
//! - **Longest-prefix routing**: the most specific virtual root wins, on
//!   component boundaries.
//! - **Mounted before resolved**: paths under an unmounted handler do not
//!   resolve at all.
//! - **One-hop shortcuts**: a shortcut is followed once, never chained.

mod config;
mod error;
mod glob;
mod handler;
mod metadata;
mod mount;
mod registry;
mod shortcut;
mod size;
mod translate;
mod trash;
mod types;

pub use config::{HandlerConfig, KV_DEFAULT_KEY, KV_TABLE, StorageConfig};
pub use error::{VfsError, VfsResult};
pub use self::glob::wglob;
pub use handler::{Handler, HandlerFlags};
pub use metadata::{
    GENERIC_MIME, MetadataResolver, detect_mime, format_size, human_time, permission_string,
};
pub use mount::{
    DirectoryProbe, LinuxMount, MountManager, MountOutcome, MountStrategy, default_strategy,
};
pub use registry::{HandlerInfo, HandlerRegistry, Route};
pub use shortcut::{
    SHORTCUT_EXT, ShortcutKind, ShortcutRecord, ShortcutResolver, is_shortcut_path,
    read_shortcut, try_read_shortcut,
};
pub use size::{SizeAggregator, is_inside_hidden_folder};
pub use translate::{PathTranslator, Resolved, decode_uri, normalize_vpath};
pub use trash::{TRASH_DIR, TRASH_INFO_EXT, TrashStore};
pub use types::{DirSize, FileData, FileProperties, MountState, TrashRecord};
