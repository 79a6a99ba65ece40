//! # deskvfs-kernel
//!
//! Virtual filesystem layer for a web desktop.
//!
//! Exposes a platform-agnostic virtual namespace backed by storage handlers:
//! local folders, removable devices and per-user home trees. On top of path
//! translation it provides:
//! - Device mounting through a per-platform strategy
//! - Shortcut files that point at other virtual paths, one hop at a time
//! - File descriptors and extended properties (MIME, permissions)
//! - A recycle bin with restore metadata
//! - Recursive size accounting for quotas
//!
//! [`DeskVfs`] wires one of each component together.

pub mod desk;
pub mod identity;
pub mod kv;
pub mod vfs;

pub use desk::DeskVfs;
pub use identity::{IdentityOracle, StaticIdentity};
pub use kv::{KvError, KvResult, KvStore, MemoryKv, SqliteKv};
pub use vfs::{
    DirSize, FileData, FileProperties, Handler, HandlerConfig, HandlerFlags, MountOutcome,
    MountState, MountStrategy, Resolved, ShortcutRecord, StorageConfig, TrashRecord, VfsError,
    VfsResult, default_strategy, format_size,
};
