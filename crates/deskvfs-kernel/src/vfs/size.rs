//! Recursive directory size accounting.
//!
//! Walks are synchronous and block the calling thread. Use
//! [`SizeAggregator::directory_size_cancellable`] from async code that must
//! stay responsive.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::error::{VfsError, VfsResult};
use super::translate::{PathTranslator, Resolved};
use super::types::DirSize;

/// Whether any segment of `path` starts with a dot.
///
/// Pass a path relative to the walk root; absolute host paths often carry
/// dotted segments of their own.
pub fn is_inside_hidden_folder(path: &Path) -> bool {
    path.components().any(|c| match c {
        std::path::Component::Normal(s) => s.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Sum file sizes below `root`.
///
/// Unreadable entries below the root are counted in `skipped`. An unreadable
/// root is an error.
pub(crate) fn walk_size(
    root: &Path,
    include_hidden: bool,
    cancel: Option<&CancellationToken>,
) -> VfsResult<DirSize> {
    std::fs::symlink_metadata(root)
        .map_err(|e| VfsError::from_io(e, root.display().to_string()))?;

    let mut total = DirSize::default();
    let walker = WalkDir::new(root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| {
        include_hidden
            || e.depth() == 0
            || !is_inside_hidden_folder(e.path().strip_prefix(root).unwrap_or(e.path()))
    }) {
        if cancel.is_some_and(|t| t.is_cancelled()) {
            return Err(VfsError::Cancelled);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() == 0 => {
                return Err(match e.into_io_error() {
                    Some(io) => VfsError::from_io(io, root.display().to_string()),
                    None => VfsError::other(format!("cannot walk {}", root.display())),
                });
            }
            Err(e) => {
                tracing::debug!("size walk skipped an entry: {}", e);
                total.skipped += 1;
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => {
                total.bytes += meta.len();
                total.files += 1;
            }
            Err(e) => {
                tracing::debug!("size walk skipped {}: {}", entry.path().display(), e);
                total.skipped += 1;
            }
        }
    }

    if total.is_partial() {
        tracing::warn!(
            "size of {} is partial: {} entries unreadable",
            root.display(),
            total.skipped
        );
    }
    Ok(total)
}

/// Computes aggregate sizes of virtual directories.
#[derive(Debug, Clone)]
pub struct SizeAggregator {
    translator: PathTranslator,
}

/// Whether the resolved path sits below a hidden segment of its handler.
///
/// Only the virtual segments under the handler root are tested. A hidden
/// target that does not exist is still `NotFound`.
async fn hidden_target(resolved: &Resolved) -> VfsResult<bool> {
    let below = resolved
        .vpath
        .strip_prefix(resolved.handler.vroot.as_str())
        .unwrap_or(&resolved.vpath)
        .trim_start_matches('/');
    if !is_inside_hidden_folder(Path::new(below)) {
        return Ok(false);
    }
    tokio::fs::symlink_metadata(&resolved.real)
        .await
        .map_err(|e| VfsError::from_io(e, resolved.vpath.clone()))?;
    Ok(true)
}

impl SizeAggregator {
    pub fn new(translator: PathTranslator) -> Self {
        Self { translator }
    }

    /// Total bytes and file count under `vpath`.
    ///
    /// With `include_hidden` false, anything below a dot-prefixed segment is
    /// left out, including segments of `vpath` itself.
    #[tracing::instrument(skip(self))]
    pub async fn directory_size(&self, vpath: &str, include_hidden: bool) -> VfsResult<DirSize> {
        let resolved = self.translator.resolve(vpath).await?;
        if !include_hidden && hidden_target(&resolved).await? {
            return Ok(DirSize::default());
        }
        walk_size(&resolved.real, include_hidden, None).map_err(|e| match e {
            VfsError::NotFound(_) => VfsError::not_found(resolved.vpath.clone()),
            e => e,
        })
    }

    /// Like [`directory_size`](Self::directory_size), on a blocking worker.
    ///
    /// Returns `Cancelled` once `cancel` fires.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn directory_size_cancellable(
        &self,
        vpath: &str,
        include_hidden: bool,
        cancel: CancellationToken,
    ) -> VfsResult<DirSize> {
        let resolved = self.translator.resolve(vpath).await?;
        if cancel.is_cancelled() {
            return Err(VfsError::Cancelled);
        }
        if !include_hidden && hidden_target(&resolved).await? {
            return Ok(DirSize::default());
        }

        let root = resolved.real.clone();
        let result =
            tokio::task::spawn_blocking(move || walk_size(&root, include_hidden, Some(&cancel)))
                .await
                .map_err(|e| VfsError::other(format!("size walk panicked: {e}")))?;
        result.map_err(|e| match e {
            VfsError::NotFound(_) => VfsError::not_found(resolved.vpath),
            e => e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::vfs::handler::Handler;
    use crate::vfs::registry::HandlerRegistry;
    use crate::vfs::types::MountState;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (SizeAggregator, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register(Handler::new("data", "/data", dir.path()).unwrap())
            .await
            .unwrap();
        registry.set_state("data", MountState::Mounted).await.unwrap();
        let translator = PathTranslator::new(registry, Arc::new(StaticIdentity::anonymous()));
        (SizeAggregator::new(translator), dir)
    }

    #[test]
    fn test_is_inside_hidden_folder() {
        assert!(is_inside_hidden_folder(Path::new(".git/config")));
        assert!(is_inside_hidden_folder(Path::new("a/.cache/b/c.bin")));
        assert!(is_inside_hidden_folder(Path::new(".env")));
        assert!(!is_inside_hidden_folder(Path::new("a/b/c.txt")));
        assert!(!is_inside_hidden_folder(Path::new("a/./b")));
        assert!(!is_inside_hidden_folder(Path::new("../a")));
    }

    #[tokio::test]
    async fn test_hidden_segments_excluded() {
        let (agg, dir) = setup().await;
        std::fs::create_dir_all(dir.path().join("proj/.hidden/deep")).unwrap();
        std::fs::write(dir.path().join("proj/.hidden/deep/blob"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join("proj/visible.txt"), vec![0u8; 50]).unwrap();

        let visible = agg.directory_size("/data/proj", false).await.unwrap();
        assert_eq!(visible.totals(), (50, 1));
        assert!(!visible.is_partial());

        let all = agg.directory_size("/data/proj", true).await.unwrap();
        assert_eq!(all.totals(), (150, 2));
    }

    #[tokio::test]
    async fn test_hidden_target_excluded() {
        let (agg, dir) = setup().await;
        std::fs::create_dir_all(dir.path().join("proj/.cache")).unwrap();
        std::fs::write(dir.path().join("proj/.cache/blob"), vec![0u8; 100]).unwrap();

        let hidden = agg.directory_size("/data/proj/.cache", false).await.unwrap();
        assert_eq!(hidden, DirSize::default());
        let token = CancellationToken::new();
        let hidden = agg
            .directory_size_cancellable("/data/proj/.cache", false, token)
            .await
            .unwrap();
        assert_eq!(hidden, DirSize::default());

        let all = agg.directory_size("/data/proj/.cache", true).await.unwrap();
        assert_eq!(all.totals(), (100, 1));

        let err = agg.directory_size("/data/.ghost", false).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_subdirectory_is_partial() {
        use std::os::unix::fs::PermissionsExt;

        let (agg, dir) = setup().await;
        let locked = dir.path().join("proj/locked");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::write(locked.join("secret"), vec![0u8; 64]).unwrap();
        std::fs::write(dir.path().join("proj/open.txt"), vec![0u8; 20]).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

        // Permission bits do not bind every user (root).
        let enforced = std::fs::read_dir(&locked).is_err();
        let size = agg.directory_size("/data/proj", true).await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        if !enforced {
            return;
        }

        let size = size.unwrap();
        assert!(size.is_partial());
        assert_eq!(size.totals(), (20, 1));
        assert!(size.skipped >= 1);
    }

    #[tokio::test]
    async fn test_empty_and_missing() {
        let (agg, dir) = setup().await;
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let empty = agg.directory_size("/data/empty", true).await.unwrap();
        assert_eq!(empty, DirSize::default());

        let err = agg.directory_size("/data/ghost", true).await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(p) if p == "/data/ghost"));
    }

    #[tokio::test]
    async fn test_single_file() {
        let (agg, dir) = setup().await;
        std::fs::write(dir.path().join("one.bin"), vec![0u8; 42]).unwrap();
        let size = agg.directory_size("/data/one.bin", false).await.unwrap();
        assert_eq!(size.totals(), (42, 1));
    }

    #[tokio::test]
    async fn test_cancellable_matches_blocking() {
        let (agg, dir) = setup().await;
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/x"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("a/b/y"), vec![0u8; 20]).unwrap();

        let token = CancellationToken::new();
        let size = agg
            .directory_size_cancellable("/data/a", false, token)
            .await
            .unwrap();
        assert_eq!(size.totals(), (30, 2));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let (agg, dir) = setup().await;
        std::fs::write(dir.path().join("x"), b"x").unwrap();

        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            agg.directory_size_cancellable("/data", true, token).await,
            Err(VfsError::Cancelled)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_not_followed() {
        let (agg, dir) = setup().await;
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::fs::write(dir.path().join("real/f"), vec![0u8; 10]).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

        let size = agg.directory_size("/data", true).await.unwrap();
        assert_eq!(size.totals(), (10, 1));
    }
}
