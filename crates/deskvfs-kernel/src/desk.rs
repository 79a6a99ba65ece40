//! DeskVfs: one explicitly constructed instance of the whole layer.
//!
//! Owns a registry, the translator over it, a mount manager and the
//! resolvers built on the translator. Construct one per process (or per
//! test) and share it; there is no global state.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::identity::IdentityOracle;
use crate::vfs::{
    DirSize, FileData, FileProperties, Handler, HandlerInfo, HandlerRegistry, MetadataResolver,
    MountManager, MountOutcome, MountState, MountStrategy, PathTranslator, Resolved,
    ShortcutRecord, ShortcutResolver, SizeAggregator, StorageConfig, TrashRecord, TrashStore,
    VfsResult, format_size,
};

/// The virtual filesystem layer.
#[derive(Debug, Clone)]
pub struct DeskVfs {
    registry: Arc<HandlerRegistry>,
    translator: PathTranslator,
    mounts: MountManager,
    metadata: MetadataResolver,
    shortcuts: ShortcutResolver,
    trash: TrashStore,
    sizes: SizeAggregator,
}

impl DeskVfs {
    /// Create an empty layer.
    pub fn new(strategy: Arc<dyn MountStrategy>, identity: Arc<dyn IdentityOracle>) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let translator = PathTranslator::new(registry.clone(), identity);
        Self {
            mounts: MountManager::new(strategy),
            metadata: MetadataResolver::new(translator.clone()),
            shortcuts: ShortcutResolver::new(translator.clone()),
            trash: TrashStore::new(translator.clone()),
            sizes: SizeAggregator::new(translator.clone()),
            registry,
            translator,
        }
    }

    /// Build a layer from a storage configuration.
    ///
    /// Entries that fail to register or activate are logged and left out
    /// (or left unmounted); the rest come up normally.
    pub async fn from_config(
        config: &StorageConfig,
        strategy: Arc<dyn MountStrategy>,
        identity: Arc<dyn IdentityOracle>,
    ) -> Self {
        let vfs = Self::new(strategy, identity);
        for entry in &config.storages {
            let handler = match Handler::from_config(entry) {
                Ok(handler) => handler,
                Err(e) => {
                    tracing::warn!("skipping storage {:?}: {}", entry.id, e);
                    continue;
                }
            };
            if let Err(e) = vfs.add_handler(handler).await {
                tracing::warn!("storage {} is offline: {}", entry.id, e);
            }
        }
        vfs
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn translator(&self) -> &PathTranslator {
        &self.translator
    }

    pub fn mount_manager(&self) -> &MountManager {
        &self.mounts
    }

    /// Register a handler and bring it online.
    ///
    /// A handler that registers but fails to activate stays registered
    /// and unmounted; the activation error is returned.
    pub async fn add_handler(&self, handler: Handler) -> VfsResult<()> {
        let handler = self.registry.register(handler).await?;
        self.mounts.activate(&self.registry, &handler.id).await
    }

    /// Remove a handler, taking it offline first.
    pub async fn remove_handler(&self, id: &str) -> VfsResult<Arc<Handler>> {
        if let Err(e) = self.mounts.deactivate(&self.registry, id).await {
            if e.is_not_found() {
                return Err(e);
            }
            tracing::warn!("removing handler {} without a clean unmount: {}", id, e);
        }
        self.registry
            .unregister(id)
            .await
            .ok_or_else(|| crate::vfs::VfsError::not_found(format!("handler {id}")))
    }

    /// Registered handlers with their mount state.
    pub async fn mounts(&self) -> Vec<HandlerInfo> {
        self.registry.list().await
    }

    pub async fn activate(&self, id: &str) -> VfsResult<()> {
        self.mounts.activate(&self.registry, id).await
    }

    pub async fn deactivate(&self, id: &str) -> VfsResult<()> {
        self.mounts.deactivate(&self.registry, id).await
    }

    /// Mark handlers whose storage disappeared as unmounted.
    pub async fn refresh(&self) -> Vec<String> {
        self.mounts.refresh(&self.registry).await
    }

    // ========================================================================
    // Mounting
    // ========================================================================

    /// Mount `device` at `point`, then bring up handlers living below it.
    pub async fn mount(
        &self,
        point: &Path,
        device: &str,
        fs_type: &str,
    ) -> VfsResult<MountOutcome> {
        let outcome = self.mounts.mount(point, device, fs_type).await?;
        for info in self.handlers_below(point).await {
            if info.state.is_mounted() {
                continue;
            }
            if let Err(e) = self.mounts.activate(&self.registry, &info.handler.id).await {
                tracing::warn!("handler {} did not come up: {}", info.handler.id, e);
            }
        }
        Ok(outcome)
    }

    /// Unmount `point` and take the handlers below it offline.
    ///
    /// Returns `false` if nothing was mounted there. Handler states only
    /// change once the unmount went through.
    pub async fn unmount(&self, point: &Path) -> VfsResult<bool> {
        if !self.mounts.unmount(point).await? {
            return Ok(false);
        }
        for info in self.handlers_below(point).await {
            self.registry
                .set_state(&info.handler.id, MountState::Unmounted)
                .await?;
        }
        Ok(true)
    }

    async fn handlers_below(&self, point: &Path) -> Vec<HandlerInfo> {
        self.registry
            .list()
            .await
            .into_iter()
            .filter(|info| {
                info.handler.root.starts_with(point)
                    || info.handler.effective_mount_point() == point
            })
            .collect()
    }

    // ========================================================================
    // Paths and metadata
    // ========================================================================

    pub async fn resolve(&self, vpath: &str) -> VfsResult<Resolved> {
        self.translator.resolve(vpath).await
    }

    pub async fn to_virtual(&self, real: &Path) -> VfsResult<String> {
        self.translator.to_virtual(real).await
    }

    pub async fn stat(&self, vpath: &str) -> VfsResult<FileData> {
        self.metadata.stat(vpath).await
    }

    pub async fn properties(&self, vpath: &str) -> VfsResult<FileProperties> {
        self.metadata.properties(vpath).await
    }

    pub async fn list(&self, vdir: &str, include_hidden: bool) -> VfsResult<Vec<FileData>> {
        self.metadata.list(vdir, include_hidden).await
    }

    pub async fn search(&self, vpattern: &str) -> VfsResult<Vec<String>> {
        self.translator.search(vpattern).await
    }

    // ========================================================================
    // Sizes
    // ========================================================================

    pub async fn directory_size(&self, vpath: &str, include_hidden: bool) -> VfsResult<DirSize> {
        self.sizes.directory_size(vpath, include_hidden).await
    }

    pub async fn directory_size_cancellable(
        &self,
        vpath: &str,
        include_hidden: bool,
        cancel: CancellationToken,
    ) -> VfsResult<DirSize> {
        self.sizes
            .directory_size_cancellable(vpath, include_hidden, cancel)
            .await
    }

    pub fn format_size(&self, bytes: u64, decimals: usize) -> String {
        format_size(bytes, decimals)
    }

    // ========================================================================
    // Trash
    // ========================================================================

    pub async fn trash(&self, vpath: &str) -> VfsResult<TrashRecord> {
        self.trash.trash(vpath).await
    }

    pub async fn list_trash(&self, vroot: &str) -> VfsResult<Vec<TrashRecord>> {
        self.trash.list(vroot).await
    }

    pub async fn restore(&self, trashed_vpath: &str) -> VfsResult<String> {
        self.trash.restore(trashed_vpath).await
    }

    pub async fn purge(&self, trashed_vpath: &str) -> VfsResult<()> {
        self.trash.purge(trashed_vpath).await
    }

    pub async fn empty_trash(&self, vroot: &str) -> VfsResult<usize> {
        self.trash.empty(vroot).await
    }

    // ========================================================================
    // Shortcuts
    // ========================================================================

    pub async fn create_shortcut(
        &self,
        at: &str,
        target: &str,
        name: Option<&str>,
    ) -> VfsResult<(String, ShortcutRecord)> {
        self.shortcuts.create(at, target, name).await
    }

    pub async fn read_shortcut(&self, vpath: &str) -> VfsResult<ShortcutRecord> {
        self.shortcuts.read(vpath).await
    }

    pub async fn follow_shortcut(&self, vpath: &str) -> VfsResult<Resolved> {
        self.shortcuts.follow(vpath).await
    }

    pub async fn delete_shortcut(&self, vpath: &str) -> VfsResult<()> {
        self.shortcuts.delete(vpath).await
    }
}
