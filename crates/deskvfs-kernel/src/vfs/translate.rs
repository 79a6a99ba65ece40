//! Virtual path ↔ real path translation.
//!
//! [`PathTranslator`] is the single resolution point of the VFS: metadata,
//! trash, shortcuts and size accounting all go through it, so the
//! virtual-to-real mapping stays consistent no matter who asks.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::identity::IdentityOracle;

use super::error::{VfsError, VfsResult};
use super::glob::wglob;
use super::handler::Handler;
use super::registry::HandlerRegistry;

/// A virtual path resolved against its handler.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub handler: Arc<Handler>,
    /// Normalized virtual path.
    pub vpath: String,
    /// Real path on the host.
    pub real: PathBuf,
}

/// Normalize a virtual path.
///
/// Ensures a leading `/`, drops empty and `.` segments and trailing slashes,
/// and folds `..` lexically. Climbing above `/` fails with `PathEscapesRoot`.
/// Backslashes are treated as separators.
pub fn normalize_vpath(vpath: &str) -> VfsResult<String> {
    let mut parts: Vec<&str> = Vec::new();
    for seg in vpath.split(['/', '\\']) {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(VfsError::path_escapes_root(vpath));
                }
            }
            s => parts.push(s),
        }
    }
    Ok(format!("/{}", parts.join("/")))
}

/// Join a virtual root and a relative path.
pub(crate) fn join_vpath(vroot: &str, relative: &str) -> String {
    match (vroot, relative) {
        (root, "") => root.to_string(),
        ("/", rel) => format!("/{rel}"),
        (root, rel) => format!("{root}/{rel}"),
    }
}

/// Split a normalized virtual path into parent and base name.
pub(crate) fn split_vpath(vpath: &str) -> (&str, &str) {
    match vpath.rfind('/') {
        Some(0) => ("/", &vpath[1..]),
        Some(i) => (&vpath[..i], &vpath[i + 1..]),
        None => ("/", vpath),
    }
}

/// Render a path with forward slashes.
pub(crate) fn to_slash(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '\\' {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

/// Percent-decode a client-supplied path, keeping literal `+` signs.
pub fn decode_uri(input: &str) -> VfsResult<String> {
    percent_encoding::percent_decode_str(input)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| VfsError::invalid_path(format!("{input}: {e}")))
}

const MAX_LINK_HOPS: usize = 8;

/// Canonicalize the longest existing prefix of `path` and append the rest.
///
/// A dangling symlink on the way is followed to its target, up to `hops`
/// times. Returns `None` when the links do not settle.
fn canonicalize_existing(path: &Path, hops: usize) -> Option<PathBuf> {
    for ancestor in path.ancestors() {
        let rest = path.strip_prefix(ancestor).ok()?;
        if let Ok(canonical) = dunce::canonicalize(ancestor) {
            return Some(if rest.as_os_str().is_empty() {
                canonical
            } else {
                canonical.join(rest)
            });
        }
        let is_link = std::fs::symlink_metadata(ancestor).is_ok_and(|m| m.is_symlink());
        if is_link {
            let hops = hops.checked_sub(1)?;
            let target = std::fs::read_link(ancestor).ok()?;
            let target = match ancestor.parent() {
                Some(parent) => parent.join(target),
                None => target,
            };
            return canonicalize_existing(&target.join(rest), hops);
        }
    }
    None
}

/// Resolves virtual paths through the handler registry.
#[derive(Clone)]
pub struct PathTranslator {
    registry: Arc<HandlerRegistry>,
    identity: Arc<dyn IdentityOracle>,
}

impl std::fmt::Debug for PathTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathTranslator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl PathTranslator {
    pub fn new(registry: Arc<HandlerRegistry>, identity: Arc<dyn IdentityOracle>) -> Self {
        Self { registry, identity }
    }

    /// The registry this translator reads.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// The caller, if it is a known user.
    fn caller(&self) -> Option<String> {
        self.identity
            .caller()
            .filter(|u| self.identity.user_exists(u))
    }

    /// Resolve a virtual path to its handler and real path.
    ///
    /// The handler must be mounted. The path may not exist yet; the
    /// canonical form of its longest existing prefix must stay under the
    /// handler root so symlinks cannot escape the backend.
    pub async fn resolve(&self, vpath: &str) -> VfsResult<Resolved> {
        let vpath = normalize_vpath(vpath)?;
        let route = self.registry.route(&vpath).await?;
        if !route.state.is_mounted() {
            return Err(VfsError::not_mounted(route.handler.id.clone()));
        }

        let root = route.handler.root_for(self.caller().as_deref())?;
        let real = if route.relative.is_empty() {
            root.clone()
        } else {
            root.join(&route.relative)
        };

        let canonical_root = dunce::canonicalize(&root).unwrap_or_else(|_| root.clone());
        let escapes = canonicalize_existing(&real, MAX_LINK_HOPS)
            .is_none_or(|canonical| !canonical.starts_with(&canonical_root));
        if escapes {
            return Err(VfsError::path_escapes_root(format!(
                "{vpath} leaves {}",
                route.handler.vroot
            )));
        }

        Ok(Resolved {
            handler: route.handler,
            vpath,
            real,
        })
    }

    /// Map a real path back to its virtual path.
    ///
    /// The handler whose (caller-specific) root is the longest prefix of
    /// `real` owns it.
    pub async fn to_virtual(&self, real: &Path) -> VfsResult<String> {
        let caller = self.caller();
        let mut best: Option<(PathBuf, Arc<Handler>)> = None;

        for info in self.registry.list().await {
            let Ok(root) = info.handler.root_for(caller.as_deref()) else {
                continue;
            };
            if real.starts_with(&root)
                && best
                    .as_ref()
                    .is_none_or(|(b, _)| root.components().count() > b.components().count())
            {
                best = Some((root, info.handler));
            }
        }

        let (root, handler) = best
            .ok_or_else(|| VfsError::not_found(format!("no handler owns {}", real.display())))?;
        let relative = real
            .strip_prefix(&root)
            .map_err(|_| VfsError::not_found(real.display().to_string()))?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(s) => segments.push(s.to_string_lossy().into_owned()),
                Component::CurDir => {}
                _ => return Err(VfsError::invalid_path(real.display().to_string())),
            }
        }
        Ok(join_vpath(&handler.vroot, &segments.join("/")))
    }

    /// Find files by name pattern, tolerating literal brackets.
    ///
    /// `vpattern` is a virtual path whose final segments may hold glob
    /// metacharacters. Results are virtual paths.
    pub async fn search(&self, vpattern: &str) -> VfsResult<Vec<String>> {
        let resolved = self.resolve(vpattern).await?;
        let pattern = to_slash(&resolved.real);

        let mut results = Vec::new();
        for real in wglob(&pattern)? {
            results.push(self.to_virtual(&real).await?);
        }
        Ok(results)
    }
}
