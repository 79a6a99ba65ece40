//! Handler registry with longest-prefix routing.
//!
//! Maps virtual roots to handlers and tracks each handler's mount state.
//! The registry is read-mostly: lookups take a shared lock for the duration
//! of the match only, and device attach/detach takes the exclusive lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::error::{VfsError, VfsResult};
use super::handler::Handler;
use super::types::MountState;

/// A handler together with its current mount state.
#[derive(Debug, Clone)]
pub struct HandlerInfo {
    pub handler: Arc<Handler>,
    pub state: MountState,
}

#[derive(Debug)]
struct Entry {
    handler: Arc<Handler>,
    state: MountState,
}

/// Result of routing a virtual path.
#[derive(Debug, Clone)]
pub struct Route {
    pub handler: Arc<Handler>,
    pub state: MountState,
    /// Path below the virtual root, without a leading `/`.
    pub relative: String,
}

/// Owns every registered handler, keyed by normalized virtual root.
///
/// Virtual roots are matched by longest prefix on component boundaries: with
/// `/media` and `/media/usb0` both registered, `/media/usb0/a.txt` routes to
/// `/media/usb0` while `/mediafiles` routes nowhere.
pub struct HandlerRegistry {
    handlers: RwLock<BTreeMap<String, Entry>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &"<locked>")
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a handler in the `Unmounted` state.
    ///
    /// Fails with `AlreadyExists` if the id or the virtual root is already
    /// taken, and with `Conflict` if the real root contains or lies inside
    /// another handler's root. Nested roots would give one real path two
    /// virtual names.
    pub async fn register(&self, handler: Handler) -> VfsResult<Arc<Handler>> {
        let mut handlers = self.handlers.write().await;
        if handlers.contains_key(&handler.vroot) {
            return Err(VfsError::already_exists(handler.vroot));
        }
        if handlers.values().any(|e| e.handler.id == handler.id) {
            return Err(VfsError::already_exists(format!("handler id {}", handler.id)));
        }
        if let Some(other) = handlers.values().find(|e| {
            e.handler.root.starts_with(&handler.root) || handler.root.starts_with(&e.handler.root)
        }) {
            return Err(VfsError::conflict(format!(
                "root of {} ({}) overlaps {} ({})",
                handler.id,
                handler.root.display(),
                other.handler.id,
                other.handler.root.display()
            )));
        }
        let handler = Arc::new(handler);
        handlers.insert(
            handler.vroot.clone(),
            Entry {
                handler: Arc::clone(&handler),
                state: MountState::Unmounted,
            },
        );
        Ok(handler)
    }

    /// Remove a handler by id.
    ///
    /// Returns the removed handler, or `None` if no such id was registered.
    pub async fn unregister(&self, id: &str) -> Option<Arc<Handler>> {
        let mut handlers = self.handlers.write().await;
        let vroot = handlers
            .iter()
            .find(|(_, e)| e.handler.id == id)
            .map(|(vroot, _)| vroot.clone())?;
        handlers.remove(&vroot).map(|e| e.handler)
    }

    /// Look up a handler by id.
    pub async fn get(&self, id: &str) -> VfsResult<HandlerInfo> {
        let handlers = self.handlers.read().await;
        handlers
            .values()
            .find(|e| e.handler.id == id)
            .map(|e| HandlerInfo {
                handler: Arc::clone(&e.handler),
                state: e.state,
            })
            .ok_or_else(|| VfsError::not_found(format!("handler {id}")))
    }

    /// List all handlers in virtual-root order.
    pub async fn list(&self) -> Vec<HandlerInfo> {
        let handlers = self.handlers.read().await;
        handlers
            .values()
            .map(|e| HandlerInfo {
                handler: Arc::clone(&e.handler),
                state: e.state,
            })
            .collect()
    }

    /// Current mount state of a handler.
    pub async fn state(&self, id: &str) -> VfsResult<MountState> {
        self.get(id).await.map(|info| info.state)
    }

    /// Record a mount state transition.
    ///
    /// Returns the previous state.
    pub async fn set_state(&self, id: &str, state: MountState) -> VfsResult<MountState> {
        let mut handlers = self.handlers.write().await;
        let entry = handlers
            .values_mut()
            .find(|e| e.handler.id == id)
            .ok_or_else(|| VfsError::not_found(format!("handler {id}")))?;
        let previous = entry.state;
        entry.state = state;
        Ok(previous)
    }

    /// Route a normalized virtual path to its handler.
    ///
    /// Unmounted handlers are returned too; callers decide what to do with
    /// them. Unknown roots fail with `NoMountPoint`.
    pub async fn route(&self, vpath: &str) -> VfsResult<Route> {
        let handlers = self.handlers.read().await;

        let mut best: Option<(&String, &Entry)> = None;
        for (vroot, entry) in handlers.iter() {
            let is_match = vroot == "/"
                || vpath == vroot
                || vpath
                    .strip_prefix(vroot.as_str())
                    .is_some_and(|rest| rest.starts_with('/'));
            if is_match && best.is_none_or(|(b, _)| vroot.len() > b.len()) {
                best = Some((vroot, entry));
            }
        }

        match best {
            Some((vroot, entry)) => {
                let relative = if vroot == "/" {
                    vpath.trim_start_matches('/')
                } else {
                    vpath[vroot.len()..].trim_start_matches('/')
                };
                Ok(Route {
                    handler: Arc::clone(&entry.handler),
                    state: entry.state,
                    relative: relative.to_string(),
                })
            }
            None => Err(VfsError::no_mount_point(vpath)),
        }
    }
}
