//! File descriptors and extended properties.
//!
//! Everything here is derived fresh from the real path on every call. Sizes
//! and times are never cached.

use std::fs::Metadata;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};
use tokio::io::AsyncReadExt;

use super::error::{VfsError, VfsResult};
use super::shortcut::{is_shortcut_path, try_read_shortcut};
use super::translate::{PathTranslator, join_vpath, split_vpath, to_slash};
use super::types::{FileData, FileProperties};

const SIZE_UNITS: [&str; 8] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB"];

/// Bytes read from the head of a file for content sniffing.
const SNIFF_BYTES: usize = 8192;

/// Fallback MIME type when sniffing finds nothing.
pub const GENERIC_MIME: &str = "application/octet-stream";

/// Human-readable size with binary (1024) units.
///
/// Picks the largest unit whose scaled value is at least 1:
/// `format_size(1536, 2) == "1.50KB"`.
pub fn format_size(bytes: u64, decimals: usize) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while unit < SIZE_UNITS.len() - 1 && value / 1024.0 >= 1.0 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.*}{}", decimals, value, SIZE_UNITS[unit])
}

/// `ls -l` style permission string.
pub fn permission_string(meta: &Metadata) -> String {
    let kind = if meta.is_dir() {
        'd'
    } else if meta.file_type().is_symlink() {
        'l'
    } else {
        '-'
    };

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode()
    };
    #[cfg(not(unix))]
    let mode: u32 = if meta.permissions().readonly() { 0o444 } else { 0o666 };

    let mut s = String::with_capacity(10);
    s.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}

/// Modification time in unix seconds; `-1` when the platform has none.
pub fn mod_time_unix(meta: &Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(-1)
}

/// Local `%Y-%m-%d %H:%M:%S` rendering of a timestamp.
pub fn human_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Best-effort MIME type and canonical extension by content sniffing.
///
/// Never fails: unreadable or unrecognised content yields
/// `application/octet-stream` with an empty extension.
pub async fn detect_mime(real: &Path) -> (String, String) {
    let head = match read_head(real).await {
        Ok(head) => head,
        Err(e) => {
            tracing::debug!("mime sniff failed for {}: {}", real.display(), e);
            return (GENERIC_MIME.to_string(), String::new());
        }
    };

    if let Some(kind) = infer::get(&head) {
        return (kind.mime_type().to_string(), format!(".{}", kind.extension()));
    }
    if !head.is_empty() && !head.contains(&0) && std::str::from_utf8(&head).is_ok() {
        return ("text/plain; charset=utf-8".to_string(), ".txt".to_string());
    }
    (GENERIC_MIME.to_string(), String::new())
}

async fn read_head(real: &Path) -> std::io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(real).await?;
    let mut head = Vec::with_capacity(SNIFF_BYTES);
    file.take(SNIFF_BYTES as u64).read_to_end(&mut head).await?;
    Ok(head)
}

/// Extension of a file name including the dot, or empty.
pub(crate) fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        Some(i) if i > 0 => name[i..].to_string(),
        _ => String::new(),
    }
}

/// Builds [`FileData`] and [`FileProperties`] from virtual paths.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    translator: PathTranslator,
    size_decimals: usize,
}

impl MetadataResolver {
    pub fn new(translator: PathTranslator) -> Self {
        Self {
            translator,
            size_decimals: 2,
        }
    }

    /// Decimal places used for `display_size`.
    pub fn with_size_decimals(mut self, decimals: usize) -> Self {
        self.size_decimals = decimals;
        self
    }

    /// Describe the file or directory at `vpath`.
    pub async fn stat(&self, vpath: &str) -> VfsResult<FileData> {
        let resolved = self.translator.resolve(vpath).await?;
        let meta = tokio::fs::metadata(&resolved.real)
            .await
            .map_err(|e| VfsError::from_io(e, resolved.vpath.clone()))?;
        Ok(self.file_data(&resolved.vpath, &resolved.real, &meta).await)
    }

    /// List a directory, sorted by name.
    ///
    /// Entries that vanish between the listing and their stat are skipped.
    pub async fn list(&self, vdir: &str, include_hidden: bool) -> VfsResult<Vec<FileData>> {
        let resolved = self.translator.resolve(vdir).await?;
        let mut dir = tokio::fs::read_dir(&resolved.real)
            .await
            .map_err(|e| VfsError::from_io(e, resolved.vpath.clone()))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !include_hidden && name.starts_with('.') {
                continue;
            }
            let real = entry.path();
            let meta = match tokio::fs::metadata(&real).await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::debug!("skipping {}: {}", real.display(), e);
                    continue;
                }
            };
            let vpath = join_vpath(&resolved.vpath, &name);
            entries.push(self.file_data(&vpath, &real, &meta).await);
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Extended properties of the file or directory at `vpath`.
    pub async fn properties(&self, vpath: &str) -> VfsResult<FileProperties> {
        let resolved = self.translator.resolve(vpath).await?;
        let meta = tokio::fs::metadata(&resolved.real)
            .await
            .map_err(|e| VfsError::from_io(e, resolved.vpath.clone()))?;
        // Permissions describe the entry itself, links included.
        let entry_meta = tokio::fs::symlink_metadata(&resolved.real)
            .await
            .map_err(|e| VfsError::from_io(e, resolved.vpath.clone()))?;

        let (virtual_dirname, basename) = split_vpath(&resolved.vpath);
        let mime_type = if meta.is_dir() {
            "inode/directory".to_string()
        } else {
            detect_mime(&resolved.real).await.0
        };
        let storage_dirname = resolved
            .real
            .parent()
            .map(to_slash)
            .unwrap_or_default();

        Ok(FileProperties {
            vpath: resolved.vpath.clone(),
            storage_path: to_slash(&resolved.real),
            basename: basename.to_string(),
            virtual_dirname: virtual_dirname.to_string(),
            storage_dirname,
            ext: if meta.is_dir() {
                String::new()
            } else {
                extension_of(basename)
            },
            mime_type,
            size: if meta.is_dir() { 0 } else { meta.len() },
            permission: permission_string(&entry_meta),
            last_mod_time: meta.modified().map(human_time).unwrap_or_default(),
            last_mod_unix: mod_time_unix(&meta),
            is_dir: meta.is_dir(),
        })
    }

    async fn file_data(&self, vpath: &str, real: &Path, meta: &Metadata) -> FileData {
        let size = if meta.is_dir() { 0 } else { meta.len() };
        let shortcut = if !meta.is_dir() && is_shortcut_path(real) {
            try_read_shortcut(real).await
        } else {
            None
        };
        let name = real
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| split_vpath(vpath).1.to_string());

        FileData {
            name,
            vpath: vpath.to_string(),
            real_path: to_slash(real),
            is_dir: meta.is_dir(),
            size,
            display_size: format_size(size, self.size_decimals),
            mod_time: mod_time_unix(meta),
            is_shared: false,
            shortcut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::vfs::handler::Handler;
    use crate::vfs::registry::HandlerRegistry;
    use crate::vfs::shortcut::{ShortcutKind, ShortcutRecord};
    use crate::vfs::types::MountState;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (MetadataResolver, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register(Handler::new("docs", "/docs", dir.path()).unwrap())
            .await
            .unwrap();
        registry.set_state("docs", MountState::Mounted).await.unwrap();
        let translator = PathTranslator::new(registry, Arc::new(StaticIdentity::anonymous()));
        (MetadataResolver::new(translator), dir)
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0, 2), "0.00Bytes");
        assert_eq!(format_size(1023, 0), "1023Bytes");
        assert_eq!(format_size(1024, 2), "1.00KB");
        assert_eq!(format_size(1536, 2), "1.50KB");
        assert_eq!(format_size(5 * 1024 * 1024, 1), "5.0MB");
        assert_eq!(format_size(1024u64.pow(4), 1), "1.0TB");
        assert_eq!(format_size(u64::MAX, 2), "16.00EB");
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("a.tar.gz"), ".gz");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of(".bashrc"), "");
    }

    #[tokio::test]
    async fn test_stat_file() {
        let (resolver, dir) = setup().await;
        std::fs::write(dir.path().join("a.txt"), vec![b'x'; 1536]).unwrap();

        let data = resolver.stat("/docs/a.txt").await.unwrap();
        assert_eq!(data.name, "a.txt");
        assert_eq!(data.vpath, "/docs/a.txt");
        assert!(!data.is_dir);
        assert_eq!(data.size, 1536);
        assert_eq!(data.display_size, "1.50KB");
        assert!(data.mod_time > 0);
        assert!(data.shortcut.is_none());
    }

    #[tokio::test]
    async fn test_stat_missing_is_not_found() {
        let (resolver, _dir) = setup().await;
        let err = resolver.stat("/docs/nope.txt").await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(p) if p == "/docs/nope.txt"));
    }

    #[tokio::test]
    async fn test_size_is_fresh() {
        let (resolver, dir) = setup().await;
        let path = dir.path().join("grow.log");
        std::fs::write(&path, b"12345").unwrap();
        assert_eq!(resolver.stat("/docs/grow.log").await.unwrap().size, 5);
        std::fs::write(&path, b"1234567890").unwrap();
        assert_eq!(resolver.stat("/docs/grow.log").await.unwrap().size, 10);
    }

    #[tokio::test]
    async fn test_stat_shortcut() {
        let (resolver, dir) = setup().await;
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let record = ShortcutRecord {
            kind: ShortcutKind::File,
            name: "a".into(),
            target: "/docs/a.txt".into(),
            handler: "docs".into(),
        };
        let json = serde_json::to_vec(&record).unwrap();
        std::fs::write(dir.path().join("a.shortcut"), json).unwrap();
        std::fs::write(dir.path().join("broken.shortcut"), b"\x00garbage").unwrap();

        let data = resolver.stat("/docs/a.shortcut").await.unwrap();
        assert_eq!(data.shortcut, Some(record));

        let data = resolver.stat("/docs/broken.shortcut").await.unwrap();
        assert!(data.shortcut.is_none());
        assert_eq!(data.size, 8);
    }

    #[tokio::test]
    async fn test_list() {
        let (resolver, dir) = setup().await;
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"h").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let names: Vec<_> = resolver
            .list("/docs", false)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.vpath)
            .collect();
        assert_eq!(names, vec!["/docs/a.txt", "/docs/b.txt", "/docs/sub"]);
        assert_eq!(resolver.list("/docs", true).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_properties() {
        let (resolver, dir) = setup().await;
        std::fs::create_dir(dir.path().join("pics")).unwrap();
        // Minimal PNG signature is enough for sniffing.
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D];
        std::fs::write(dir.path().join("pics/cat.dat"), png).unwrap();
        std::fs::write(dir.path().join("pics/notes.md"), b"# hello").unwrap();
        std::fs::write(dir.path().join("pics/blob.bin"), [0u8, 1, 2, 3]).unwrap();

        let props = resolver.properties("/docs/pics/cat.dat").await.unwrap();
        assert_eq!(props.mime_type, "image/png");
        assert_eq!(props.ext, ".dat");
        assert_eq!(props.basename, "cat.dat");
        assert_eq!(props.virtual_dirname, "/docs/pics");
        assert!(props.storage_dirname.ends_with("/pics"));
        assert!(props.permission.starts_with('-'));
        assert_eq!(props.size, png.len() as u64);

        let props = resolver.properties("/docs/pics/notes.md").await.unwrap();
        assert!(props.mime_type.starts_with("text/plain"));

        let props = resolver.properties("/docs/pics/blob.bin").await.unwrap();
        assert_eq!(props.mime_type, GENERIC_MIME);

        let props = resolver.properties("/docs/pics").await.unwrap();
        assert!(props.is_dir);
        assert_eq!(props.mime_type, "inode/directory");
        assert!(props.permission.starts_with('d'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_properties_of_symlink() {
        let (resolver, dir) = setup().await;
        std::fs::write(dir.path().join("target.txt"), b"pointed at").unwrap();
        std::os::unix::fs::symlink("target.txt", dir.path().join("alias.txt")).unwrap();

        let props = resolver.properties("/docs/alias.txt").await.unwrap();
        assert!(props.permission.starts_with('l'), "{}", props.permission);
        assert_eq!(props.size, 10);
        assert!(!props.is_dir);

        let target = resolver.properties("/docs/target.txt").await.unwrap();
        assert!(target.permission.starts_with('-'));
    }

    #[tokio::test]
    async fn test_detect_mime_missing_file() {
        let (mime, ext) = detect_mime(Path::new("/definitely/not/here.png")).await;
        assert_eq!(mime, GENERIC_MIME);
        assert!(ext.is_empty());
    }
}
