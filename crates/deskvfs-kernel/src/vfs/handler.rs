//! Storage handlers: one registered backend plus its virtual-root mapping.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::config::HandlerConfig;
use super::error::{VfsError, VfsResult};
use super::translate::normalize_vpath;

/// Mount and access flags of a handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerFlags {
    /// Mount the device at startup.
    pub auto_mount: bool,
    /// Reject writes (trash, restore, shortcut creation).
    pub read_only: bool,
    /// Each caller sees `root/<username>` instead of `root`.
    pub per_user: bool,
}

/// A registered storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    /// Unique handler id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Filesystem-type tag (`ext4`, `ntfs`, `vfat`, `local`, ...).
    pub fs_type: String,
    /// Real directory backing the virtual root.
    pub root: PathBuf,
    /// Normalized virtual root, e.g. `/media/usb0`.
    pub vroot: String,
    /// Block device backing the handler, if any.
    pub device: Option<String>,
    /// Where the device is mounted; defaults to `root`.
    pub mount_point: Option<PathBuf>,
    pub flags: HandlerFlags,
}

impl Handler {
    /// Create a plain local handler with no device.
    ///
    /// The root is canonicalized when it exists (e.g. macOS `/tmp` →
    /// `/private/tmp`) so reverse translation matches walked paths.
    pub fn new(
        id: impl Into<String>,
        vroot: &str,
        root: impl Into<PathBuf>,
    ) -> VfsResult<Self> {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Ok(Self {
            id: id.into(),
            name: String::new(),
            fs_type: "local".to_string(),
            root,
            vroot: normalize_vpath(vroot)?,
            device: None,
            mount_point: None,
            flags: HandlerFlags::default(),
        })
    }

    /// Build a handler from its persisted configuration entry.
    pub fn from_config(cfg: &HandlerConfig) -> VfsResult<Self> {
        if cfg.id.trim().is_empty() {
            return Err(VfsError::config("storage entry without id"));
        }
        let root = expand(&cfg.path)?;
        let mut handler = Self::new(cfg.id.clone(), &cfg.vroot, root)?;
        handler.name = if cfg.name.is_empty() {
            cfg.id.clone()
        } else {
            cfg.name.clone()
        };
        handler.fs_type = cfg.filesystem.clone();
        handler.device = cfg.mountdev.clone().filter(|d| !d.is_empty());
        handler.mount_point = match cfg.mountpt.as_deref() {
            Some(p) if !p.is_empty() => Some(expand(p)?),
            _ => None,
        };
        handler.flags = HandlerFlags {
            auto_mount: cfg.automount,
            read_only: cfg.readonly,
            per_user: cfg.per_user,
        };
        Ok(handler)
    }

    /// Set the filesystem-type tag.
    pub fn with_fs_type(mut self, fs_type: impl Into<String>) -> Self {
        self.fs_type = fs_type.into();
        self
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the backing device and its mount point.
    pub fn with_device(
        mut self,
        device: impl Into<String>,
        mount_point: impl Into<PathBuf>,
    ) -> Self {
        self.device = Some(device.into());
        self.mount_point = Some(mount_point.into());
        self
    }

    /// Replace the flags.
    pub fn with_flags(mut self, flags: HandlerFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether two handlers sit on the same backend.
    ///
    /// Only the filesystem-type tag decides; path prefixes say nothing about
    /// backend identity.
    pub fn same_backend(&self, other: &Handler) -> bool {
        self.fs_type == other.fs_type
    }

    /// Where the device gets mounted.
    pub fn effective_mount_point(&self) -> &Path {
        self.mount_point.as_deref().unwrap_or(&self.root)
    }

    /// Real root for a caller: `root` or `root/<user>` for per-user handlers.
    pub fn root_for(&self, user: Option<&str>) -> VfsResult<PathBuf> {
        if !self.flags.per_user {
            return Ok(self.root.clone());
        }
        match user {
            Some(u) if is_plain_segment(u) => Ok(self.root.join(u)),
            Some(u) => Err(VfsError::invalid_path(format!("bad user name: {u}"))),
            None => Err(VfsError::permission_denied(format!(
                "{} requires a caller identity",
                self.vroot
            ))),
        }
    }

    /// Error unless the handler accepts writes.
    pub fn check_writable(&self) -> VfsResult<()> {
        if self.flags.read_only {
            Err(VfsError::ReadOnly(self.id.clone()))
        } else {
            Ok(())
        }
    }
}

fn is_plain_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

/// Expand `~` and environment variables in a configured path.
fn expand(path: &str) -> VfsResult<PathBuf> {
    shellexpand::full(path)
        .map(|p| PathBuf::from(p.as_ref()))
        .map_err(|e| VfsError::config(format!("cannot expand {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_backend_uses_fs_type_only() {
        let a = Handler::new("a", "/a", "/srv/shared").unwrap().with_fs_type("ext4");
        let b = Handler::new("b", "/b", "/srv/shared").unwrap().with_fs_type("ntfs");
        let c = Handler::new("c", "/c", "/mnt/other").unwrap().with_fs_type("ext4");

        // Same root, different backend.
        assert!(!a.same_backend(&b));
        // Different root, same backend.
        assert!(a.same_backend(&c));
    }

    #[test]
    fn test_vroot_normalized() {
        let h = Handler::new("h", "media/usb0/", "/mnt/usb0").unwrap();
        assert_eq!(h.vroot, "/media/usb0");
    }

    #[test]
    fn test_per_user_root() {
        let h = Handler::new("home", "/home", "/srv/users")
            .unwrap()
            .with_flags(HandlerFlags { per_user: true, ..Default::default() });
        assert_eq!(h.root_for(Some("amy")).unwrap(), PathBuf::from("/srv/users/amy"));
        assert!(matches!(h.root_for(None), Err(VfsError::PermissionDenied(_))));
        assert!(matches!(h.root_for(Some("..")), Err(VfsError::InvalidPath(_))));
    }

    #[test]
    fn test_mount_point_defaults_to_root() {
        let h = Handler::new("h", "/h", "/srv/h").unwrap();
        assert_eq!(h.effective_mount_point(), Path::new("/srv/h"));
        let h = h.with_device("/dev/sdb1", "/media/sdb1");
        assert_eq!(h.effective_mount_point(), Path::new("/media/sdb1"));
    }

    #[test]
    fn test_from_config() {
        let cfg = HandlerConfig {
            id: "usb".into(),
            name: String::new(),
            path: "/media/usb".into(),
            vroot: "/usb".into(),
            filesystem: "vfat".into(),
            mountdev: Some("/dev/sdc1".into()),
            mountpt: Some(String::new()),
            automount: true,
            readonly: false,
            per_user: false,
        };
        let h = Handler::from_config(&cfg).unwrap();
        assert_eq!(h.name, "usb");
        assert_eq!(h.device.as_deref(), Some("/dev/sdc1"));
        assert!(h.mount_point.is_none());
        assert!(h.flags.auto_mount);
    }
}
