//! Recycle bin.
//!
//! Each handler keeps its trash under `<vroot>/.trash`. A trashed item is
//! renamed to `<unix-ts>-<name>` and gets a sibling `<stored>.trashinfo`
//! JSON record holding everything needed to restore it. Content and record
//! are created and removed as a pair; when only one half of a purge lands,
//! the leftover record is detected and removed by the next [`TrashStore::list`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::error::{VfsError, VfsResult};
use super::metadata::{extension_of, human_time};
use super::size::walk_size;
use super::translate::{PathTranslator, Resolved, join_vpath, normalize_vpath, split_vpath};
use super::types::TrashRecord;

/// Name of the per-handler trash directory.
pub const TRASH_DIR: &str = ".trash";

/// Suffix of trash metadata records.
pub const TRASH_INFO_EXT: &str = ".trashinfo";

/// Soft-delete store with restore metadata.
#[derive(Debug, Clone)]
pub struct TrashStore {
    translator: PathTranslator,
}

fn info_path(content: &Path) -> PathBuf {
    let mut name = content.as_os_str().to_owned();
    name.push(TRASH_INFO_EXT);
    PathBuf::from(name)
}

async fn read_record(path: &Path) -> VfsResult<TrashRecord> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| VfsError::from_io(e, path.display().to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VfsError::parse_failure(format!("{}: {}", path.display(), e)))
}

/// Whether `path` (named `name`) is the record of another trashed item.
///
/// A trashed file may itself end in the record suffix; only a record that
/// decodes and names its sibling counts.
async fn is_record_of_sibling(path: &Path, name: &str) -> bool {
    match name.strip_suffix(TRASH_INFO_EXT) {
        Some(content_name) => read_record(path)
            .await
            .is_ok_and(|record| record.name == content_name),
        None => false,
    }
}

async fn remove_any(path: &Path) -> std::io::Result<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}

impl TrashStore {
    pub fn new(translator: PathTranslator) -> Self {
        Self { translator }
    }

    /// Resolve the trash directory of the handler owning `vpath`.
    async fn trash_dir(&self, vpath: &str) -> VfsResult<Resolved> {
        let owner = self.translator.resolve(vpath).await?;
        self.translator
            .resolve(&join_vpath(&owner.handler.vroot, TRASH_DIR))
            .await
    }

    /// Resolve a path that must name an item directly inside a trash root.
    async fn trashed_item(&self, vpath: &str) -> VfsResult<(Resolved, PathBuf)> {
        let item = self.translator.resolve(vpath).await?;
        let trash_vroot = join_vpath(&item.handler.vroot, TRASH_DIR);
        let (parent, name) = split_vpath(&item.vpath);
        if parent != trash_vroot || is_record_of_sibling(&item.real, name).await {
            return Err(VfsError::invalid_path(format!(
                "{} is not a trashed item",
                item.vpath
            )));
        }
        let info = info_path(&item.real);
        Ok((item, info))
    }

    /// Move the item at `vpath` into its handler's trash.
    #[tracing::instrument(skip(self))]
    pub async fn trash(&self, vpath: &str) -> VfsResult<TrashRecord> {
        let item = self.translator.resolve(vpath).await?;
        item.handler.check_writable()?;

        let trash_vroot = join_vpath(&item.handler.vroot, TRASH_DIR);
        if item.vpath == item.handler.vroot
            || item.vpath == trash_vroot
            || item.vpath.starts_with(&format!("{trash_vroot}/"))
        {
            return Err(VfsError::invalid_path(format!("cannot trash {}", item.vpath)));
        }

        let meta = tokio::fs::symlink_metadata(&item.real)
            .await
            .map_err(|e| VfsError::from_io(e, item.vpath.clone()))?;
        let size = if meta.is_dir() {
            let root = item.real.clone();
            tokio::task::spawn_blocking(move || walk_size(&root, true, None))
                .await
                .map_err(|e| VfsError::other(format!("size walk panicked: {e}")))??
                .bytes
        } else {
            meta.len()
        };

        let trash = self.trash_dir(&item.vpath).await?;
        tokio::fs::create_dir_all(&trash.real).await?;

        let original_name = split_vpath(&item.vpath).1.to_string();
        let now = SystemTime::now();
        let ts = now
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let mut stored = format!("{ts}-{original_name}");
        let mut n = 1;
        while tokio::fs::try_exists(trash.real.join(&stored)).await?
            || tokio::fs::try_exists(info_path(&trash.real.join(&stored))).await?
        {
            stored = format!("{ts}-{n}-{original_name}");
            n += 1;
        }
        let content = trash.real.join(&stored);

        tokio::fs::rename(&item.real, &content).await?;

        let record = TrashRecord {
            name: stored.clone(),
            vpath: join_vpath(&trash.vpath, &stored),
            ext: if meta.is_dir() {
                String::new()
            } else {
                extension_of(&original_name)
            },
            is_dir: meta.is_dir(),
            size,
            removed_at: ts,
            removed_date: human_time(now),
            original_vpath: item.vpath.clone(),
            original_name,
        };

        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| VfsError::other(format!("encode trash record: {e}")))?;
        if let Err(e) = tokio::fs::write(info_path(&content), json).await {
            // Without a record the item could never be restored; put it back.
            tracing::warn!("writing trash record for {} failed: {}", item.vpath, e);
            if let Err(back) = tokio::fs::rename(&content, &item.real).await {
                tracing::warn!(
                    "could not move {} back out of the trash: {}",
                    item.vpath,
                    back
                );
            }
            return Err(e.into());
        }

        tracing::info!("trashed {} as {}", item.vpath, record.vpath);
        Ok(record)
    }

    /// List the trash of the handler owning `vroot`, newest first.
    ///
    /// Records whose content is gone are deleted. Content without a record
    /// is reported and skipped.
    pub async fn list(&self, vroot: &str) -> VfsResult<Vec<TrashRecord>> {
        let trash = self.trash_dir(vroot).await?;
        let mut dir = match tokio::fs::read_dir(&trash.real).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        let mut records = Vec::new();
        let mut record_files = HashSet::new();
        let mut has_record = HashSet::new();
        for name in &names {
            let Some(content_name) = name.strip_suffix(TRASH_INFO_EXT) else {
                continue;
            };
            let info = trash.real.join(name);
            let record = match read_record(&info).await {
                Ok(record) if record.name == content_name => record,
                // A trashed file that merely ends in the record suffix.
                _ => continue,
            };
            record_files.insert(name.as_str());
            has_record.insert(content_name);

            if tokio::fs::try_exists(trash.real.join(content_name)).await? {
                records.push(record);
            } else {
                match tokio::fs::remove_file(&info).await {
                    Ok(()) => tracing::info!("removed orphaned trash record {}", info.display()),
                    Err(e) => tracing::warn!(
                        "orphaned trash record {} could not be removed: {}",
                        info.display(),
                        e
                    ),
                }
            }
        }

        for name in &names {
            if !record_files.contains(name.as_str()) && !has_record.contains(name.as_str()) {
                tracing::warn!(
                    "trashed item {} has no restore record",
                    trash.real.join(name).display()
                );
            }
        }

        records.sort_by(|a, b| b.removed_at.cmp(&a.removed_at).then(a.name.cmp(&b.name)));
        Ok(records)
    }

    /// Move a trashed item back to where it came from.
    ///
    /// The original parent directory must still exist (`Conflict` otherwise)
    /// and the original path must be free (`AlreadyExists` otherwise).
    /// Returns the restored virtual path.
    #[tracing::instrument(skip(self))]
    pub async fn restore(&self, trashed_vpath: &str) -> VfsResult<String> {
        let (item, info) = self.trashed_item(trashed_vpath).await?;
        item.handler.check_writable()?;
        if !tokio::fs::try_exists(&item.real).await? {
            return Err(VfsError::not_found(item.vpath));
        }
        let record = read_record(&info).await?;

        let original_vpath = normalize_vpath(&record.original_vpath)?;
        let (parent_vpath, _) = split_vpath(&original_vpath);
        let parent = self.translator.resolve(parent_vpath).await.map_err(|e| {
            VfsError::conflict(format!("{parent_vpath} is no longer available: {e}"))
        })?;
        let parent_is_dir = tokio::fs::metadata(&parent.real)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !parent_is_dir {
            return Err(VfsError::conflict(format!(
                "original location {parent_vpath} no longer exists"
            )));
        }

        let original = self.translator.resolve(&original_vpath).await?;
        if tokio::fs::try_exists(&original.real).await? {
            return Err(VfsError::already_exists(original.vpath));
        }

        tokio::fs::rename(&item.real, &original.real).await?;
        if let Err(e) = tokio::fs::remove_file(&info).await {
            tracing::warn!("stale trash record {} left behind: {}", info.display(), e);
        }

        tracing::info!("restored {} to {}", item.vpath, original.vpath);
        Ok(original.vpath)
    }

    /// Permanently delete a trashed item and its record.
    ///
    /// Content goes first: if that fails nothing changes. A record that
    /// cannot be removed afterwards is healed by the next listing.
    #[tracing::instrument(skip(self))]
    pub async fn purge(&self, trashed_vpath: &str) -> VfsResult<()> {
        let (item, info) = self.trashed_item(trashed_vpath).await?;
        item.handler.check_writable()?;

        let content_exists = tokio::fs::try_exists(&item.real).await?;
        let info_exists = tokio::fs::try_exists(&info).await?;
        if !content_exists && !info_exists {
            return Err(VfsError::not_found(item.vpath));
        }

        if content_exists {
            remove_any(&item.real).await?;
        }
        if info_exists {
            if let Err(e) = tokio::fs::remove_file(&info).await {
                tracing::warn!(
                    "purged {} but its record {} remains: {}",
                    item.vpath,
                    info.display(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Purge everything in the trash of the handler owning `vroot`.
    ///
    /// Returns the number of items purged.
    pub async fn empty(&self, vroot: &str) -> VfsResult<usize> {
        let records = self.list(vroot).await?;
        let mut purged = 0;
        for record in &records {
            self.purge(&record.vpath).await?;
            purged += 1;
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;
    use crate::vfs::handler::{Handler, HandlerFlags};
    use crate::vfs::registry::HandlerRegistry;
    use crate::vfs::types::MountState;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (TrashStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register(Handler::new("docs", "/docs", dir.path()).unwrap())
            .await
            .unwrap();
        registry.set_state("docs", MountState::Mounted).await.unwrap();
        let translator = PathTranslator::new(registry, Arc::new(StaticIdentity::anonymous()));
        (TrashStore::new(translator), dir)
    }

    #[tokio::test]
    async fn test_trash_and_restore_round_trip() {
        let (store, dir) = setup().await;
        std::fs::create_dir(dir.path().join("work")).unwrap();
        std::fs::write(dir.path().join("work/plan.md"), b"the plan").unwrap();

        let record = store.trash("/docs/work/plan.md").await.unwrap();
        assert_eq!(record.original_vpath, "/docs/work/plan.md");
        assert_eq!(record.original_name, "plan.md");
        assert_eq!(record.ext, ".md");
        assert_eq!(record.size, 8);
        assert!(record.vpath.starts_with("/docs/.trash/"));
        assert!(!dir.path().join("work/plan.md").exists());

        let restored = store.restore(&record.vpath).await.unwrap();
        assert_eq!(restored, "/docs/work/plan.md");
        assert_eq!(std::fs::read(dir.path().join("work/plan.md")).unwrap(), b"the plan");
        assert!(store.list("/docs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trash_directory() {
        let (store, dir) = setup().await;
        std::fs::create_dir_all(dir.path().join("album/raw")).unwrap();
        std::fs::write(dir.path().join("album/a.jpg"), vec![0u8; 30]).unwrap();
        std::fs::write(dir.path().join("album/raw/b.raw"), vec![0u8; 70]).unwrap();

        let record = store.trash("/docs/album").await.unwrap();
        assert!(record.is_dir);
        assert_eq!(record.size, 100);
        assert!(record.ext.is_empty());

        store.restore(&record.vpath).await.unwrap();
        assert!(dir.path().join("album/raw/b.raw").exists());
    }

    #[tokio::test]
    async fn test_restore_needs_original_parent() {
        let (store, dir) = setup().await;
        std::fs::create_dir(dir.path().join("tmp")).unwrap();
        std::fs::write(dir.path().join("tmp/x.txt"), b"x").unwrap();

        let record = store.trash("/docs/tmp/x.txt").await.unwrap();
        std::fs::remove_dir(dir.path().join("tmp")).unwrap();

        assert!(matches!(
            store.restore(&record.vpath).await,
            Err(VfsError::Conflict(_))
        ));
        // Still in the trash.
        assert_eq!(store.list("/docs").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_refuses_to_overwrite() {
        let (store, dir) = setup().await;
        std::fs::write(dir.path().join("a.txt"), b"old").unwrap();
        let record = store.trash("/docs/a.txt").await.unwrap();
        std::fs::write(dir.path().join("a.txt"), b"new").unwrap();

        assert!(matches!(
            store.restore(&record.vpath).await,
            Err(VfsError::AlreadyExists(_))
        ));
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_same_name_twice() {
        let (store, dir) = setup().await;
        std::fs::write(dir.path().join("a.txt"), b"1").unwrap();
        let first = store.trash("/docs/a.txt").await.unwrap();
        std::fs::write(dir.path().join("a.txt"), b"2").unwrap();
        let second = store.trash("/docs/a.txt").await.unwrap();

        assert_ne!(first.vpath, second.vpath);
        assert_eq!(store.list("/docs").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge() {
        let (store, dir) = setup().await;
        std::fs::write(dir.path().join("junk.bin"), b"junk").unwrap();
        let record = store.trash("/docs/junk.bin").await.unwrap();

        store.purge(&record.vpath).await.unwrap();
        assert!(store.list("/docs").await.unwrap().is_empty());
        let leftovers = std::fs::read_dir(dir.path().join(TRASH_DIR)).unwrap().count();
        assert_eq!(leftovers, 0);
        assert!(store.purge(&record.vpath).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_orphaned_record_is_healed() {
        let (store, dir) = setup().await;
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        let a = store.trash("/docs/a.txt").await.unwrap();
        store.trash("/docs/b.txt").await.unwrap();

        // Simulate a purge that removed the content but not the record.
        std::fs::remove_file(dir.path().join(TRASH_DIR).join(&a.name)).unwrap();
        let info = dir.path().join(TRASH_DIR).join(format!("{}{}", a.name, TRASH_INFO_EXT));
        assert!(info.exists());

        let records = store.list("/docs").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_name, "b.txt");
        assert!(!info.exists());
    }

    #[tokio::test]
    async fn test_trashed_file_named_like_a_record() {
        let (store, dir) = setup().await;
        std::fs::write(dir.path().join("odd.trashinfo"), b"not a record").unwrap();

        let record = store.trash("/docs/odd.trashinfo").await.unwrap();
        let records = store.list("/docs").await.unwrap();
        assert_eq!(records, vec![record.clone()]);
        assert!(dir.path().join(TRASH_DIR).join(&record.name).exists());

        let restored = store.restore(&record.vpath).await.unwrap();
        assert_eq!(restored, "/docs/odd.trashinfo");
        assert_eq!(std::fs::read(dir.path().join("odd.trashinfo")).unwrap(), b"not a record");

        let record = store.trash("/docs/odd.trashinfo").await.unwrap();
        store.purge(&record.vpath).await.unwrap();
        assert!(store.list("/docs").await.unwrap().is_empty());

        std::fs::write(dir.path().join("odd.trashinfo"), b"again").unwrap();
        std::fs::write(dir.path().join("plain.txt"), b"plain").unwrap();
        store.trash("/docs/odd.trashinfo").await.unwrap();
        store.trash("/docs/plain.txt").await.unwrap();
        assert_eq!(store.empty("/docs").await.unwrap(), 2);
        assert_eq!(std::fs::read_dir(dir.path().join(TRASH_DIR)).unwrap().count(), 0);

        // Real records are still not trashed items.
        std::fs::write(dir.path().join("plain.txt"), b"plain").unwrap();
        let plain = store.trash("/docs/plain.txt").await.unwrap();
        let info_vpath = format!("{}{}", plain.vpath, TRASH_INFO_EXT);
        assert!(matches!(
            store.purge(&info_vpath).await,
            Err(VfsError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_cannot_trash_roots() {
        let (store, dir) = setup().await;
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        store.trash("/docs/a.txt").await.unwrap();

        assert!(matches!(store.trash("/docs").await, Err(VfsError::InvalidPath(_))));
        assert!(matches!(store.trash("/docs/.trash").await, Err(VfsError::InvalidPath(_))));
        assert!(matches!(
            store.restore("/docs/a.txt").await,
            Err(VfsError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_empty() {
        let (store, dir) = setup().await;
        for name in ["a", "b", "c"] {
            std::fs::write(dir.path().join(name), name).unwrap();
            store.trash(&format!("/docs/{name}")).await.unwrap();
        }
        assert_eq!(store.empty("/docs").await.unwrap(), 3);
        assert!(store.list("/docs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_handler() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let registry = Arc::new(HandlerRegistry::new());
        let handler = Handler::new("ro", "/ro", dir.path())
            .unwrap()
            .with_flags(HandlerFlags { read_only: true, ..Default::default() });
        registry.register(handler).await.unwrap();
        registry.set_state("ro", MountState::Mounted).await.unwrap();
        let store = TrashStore::new(PathTranslator::new(
            registry,
            Arc::new(StaticIdentity::anonymous()),
        ));

        assert!(matches!(store.trash("/ro/a.txt").await, Err(VfsError::ReadOnly(_))));
        assert!(dir.path().join("a.txt").exists());
    }
}
