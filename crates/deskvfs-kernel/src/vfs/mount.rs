//! Bringing handler storage online and offline.
//!
//! Platform differences live behind [`MountStrategy`]; the process picks one
//! at startup with [`default_strategy`]. [`MountManager`] enforces the
//! preconditions and drives the registry's `Unmounted ⇄ Mounted` state.
//!
//! Nothing here locks per mount point. Two concurrent `mount` calls on the
//! same point race between the check and the mount; callers serialize.

use std::path::Path;
use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::process::Command;

use super::error::{VfsError, VfsResult};
use super::registry::HandlerRegistry;
use super::types::MountState;

/// Platform-specific mount probing and mounting.
#[async_trait]
pub trait MountStrategy: Send + Sync + std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether [`mount`](Self::mount) can do anything on this platform.
    fn supports_mount(&self) -> bool;

    /// Whether something is mounted at `point`.
    async fn check_mounted(&self, point: &Path) -> bool;

    /// Mount `device` at `point`.
    async fn mount(&self, point: &Path, _device: &str, _fs_type: &str) -> VfsResult<()> {
        Err(VfsError::unsupported_platform(format!(
            "{} cannot mount {}",
            self.name(),
            point.display()
        )))
    }

    /// Unmount whatever is mounted at `point`.
    async fn unmount(&self, point: &Path) -> VfsResult<()> {
        Err(VfsError::unsupported_platform(format!(
            "{} cannot unmount {}",
            self.name(),
            point.display()
        )))
    }
}

/// Treats "exists and is a directory" as mounted.
///
/// Cannot tell a real mount from a plain folder. Used where the OS mounts
/// removable media by itself and there is no mount facility to drive.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryProbe;

#[async_trait]
impl MountStrategy for DirectoryProbe {
    fn name(&self) -> &'static str {
        "directory-probe"
    }

    fn supports_mount(&self) -> bool {
        false
    }

    async fn check_mounted(&self, point: &Path) -> bool {
        tokio::fs::metadata(point)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }
}

/// Probes with `mountpoint(1)` and mounts with `mount(8)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxMount;

const MOUNTPOINT_MARKER: &str = " is a mountpoint";

fn combined_output(out: &Output) -> String {
    let mut s = String::from_utf8_lossy(&out.stdout).into_owned();
    s.push_str(&String::from_utf8_lossy(&out.stderr));
    s
}

#[async_trait]
impl MountStrategy for LinuxMount {
    fn name(&self) -> &'static str {
        "linux"
    }

    fn supports_mount(&self) -> bool {
        true
    }

    async fn check_mounted(&self, point: &Path) -> bool {
        match Command::new("mountpoint").arg(point).output().await {
            Ok(out) => out.status.success() && combined_output(&out).contains(MOUNTPOINT_MARKER),
            Err(e) => {
                tracing::debug!("mountpoint probe failed for {}: {}", point.display(), e);
                false
            }
        }
    }

    async fn mount(&self, point: &Path, device: &str, fs_type: &str) -> VfsResult<()> {
        let out = Command::new("mount")
            .arg("-t")
            .arg(fs_type)
            .arg(device)
            .arg(point)
            .output()
            .await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(VfsError::other(format!(
                "mount {} on {} exited with {}: {}",
                device,
                point.display(),
                out.status,
                combined_output(&out).trim()
            )))
        }
    }

    async fn unmount(&self, point: &Path) -> VfsResult<()> {
        let out = Command::new("umount").arg(point).output().await?;
        if out.status.success() {
            Ok(())
        } else {
            Err(VfsError::other(format!(
                "umount {} exited with {}: {}",
                point.display(),
                out.status,
                combined_output(&out).trim()
            )))
        }
    }
}

/// The strategy for the platform this binary was built for.
pub fn default_strategy() -> Arc<dyn MountStrategy> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(LinuxMount)
    }

    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(DirectoryProbe)
    }
}

/// What a successful [`MountManager::mount`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MountOutcome {
    /// The device was mounted by this call.
    Mounted,
    /// Something was already mounted there; nothing was attempted.
    AlreadyMounted,
}

/// Validates and performs mounts, and keeps handler state in sync.
#[derive(Debug, Clone)]
pub struct MountManager {
    strategy: Arc<dyn MountStrategy>,
}

impl MountManager {
    pub fn new(strategy: Arc<dyn MountStrategy>) -> Self {
        Self { strategy }
    }

    /// The active strategy.
    pub fn strategy(&self) -> &Arc<dyn MountStrategy> {
        &self.strategy
    }

    /// Whether something is mounted at `point`.
    pub async fn check_mounted(&self, point: &Path) -> bool {
        self.strategy.check_mounted(point).await
    }

    /// Mount `device` (of type `fs_type`) at `point`.
    ///
    /// Idempotent: an already-mounted point is reported as
    /// [`MountOutcome::AlreadyMounted`] without a second attempt. After
    /// mounting, the point must exist or the call fails with `NotFound`.
    #[tracing::instrument(skip(self), fields(strategy = self.strategy.name()))]
    pub async fn mount(
        &self,
        point: &Path,
        device: &str,
        fs_type: &str,
    ) -> VfsResult<MountOutcome> {
        let result = self.try_mount(point, device, fs_type).await;
        if let Err(e) = &result {
            tracing::warn!("mount of {} on {} failed: {}", device, point.display(), e);
        }
        result
    }

    async fn try_mount(
        &self,
        point: &Path,
        device: &str,
        fs_type: &str,
    ) -> VfsResult<MountOutcome> {
        if !self.strategy.supports_mount() {
            return Err(VfsError::unsupported_platform(format!(
                "mounting is not supported by the {} strategy",
                self.strategy.name()
            )));
        }
        if device.is_empty() {
            return Err(VfsError::invalid_path(format!(
                "no device given for {}",
                point.display()
            )));
        }
        if !exists(Path::new(device)).await {
            return Err(VfsError::not_found(format!("device {device}")));
        }
        if point.as_os_str().is_empty() {
            return Err(VfsError::invalid_path(format!("no mount point given for {device}")));
        }

        if self.strategy.check_mounted(point).await {
            tracing::info!("{} already mounted", point.display());
            return Ok(MountOutcome::AlreadyMounted);
        }

        tracing::info!("mounting {} ({}) on {}", device, fs_type, point.display());
        self.strategy.mount(point, device, fs_type).await?;

        if !exists(point).await {
            return Err(VfsError::not_found(format!(
                "mount point {} missing after mount",
                point.display()
            )));
        }
        Ok(MountOutcome::Mounted)
    }

    /// Unmount `point`. Returns `false` if nothing was mounted there.
    #[tracing::instrument(skip(self), fields(strategy = self.strategy.name()))]
    pub async fn unmount(&self, point: &Path) -> VfsResult<bool> {
        if !self.strategy.supports_mount() {
            return Err(VfsError::unsupported_platform(format!(
                "unmounting is not supported by the {} strategy",
                self.strategy.name()
            )));
        }
        if !self.strategy.check_mounted(point).await {
            return Ok(false);
        }
        tracing::info!("unmounting {}", point.display());
        if let Err(e) = self.strategy.unmount(point).await {
            tracing::warn!("unmount of {} failed: {}", point.display(), e);
            return Err(e);
        }
        Ok(true)
    }

    /// Bring a registered handler online.
    ///
    /// Auto-mount handlers get their device mounted first. In every case the
    /// handler root must then be an existing directory.
    pub async fn activate(&self, registry: &HandlerRegistry, id: &str) -> VfsResult<()> {
        let info = registry.get(id).await?;
        if info.state.is_mounted() {
            return Ok(());
        }
        let handler = info.handler;

        if handler.flags.auto_mount {
            let device = handler.device.as_deref().unwrap_or_default();
            self.mount(handler.effective_mount_point(), device, &handler.fs_type)
                .await?;
        }

        if !is_dir(&handler.root).await {
            tracing::warn!(
                "handler {} root {} is not available",
                handler.id,
                handler.root.display()
            );
            return Err(VfsError::not_found(format!(
                "root of handler {}: {}",
                handler.id,
                handler.root.display()
            )));
        }

        registry.set_state(id, MountState::Mounted).await?;
        tracing::info!("handler {} mounted at {}", handler.id, handler.vroot);
        Ok(())
    }

    /// Take a handler offline, unmounting its device if it was auto-mounted.
    pub async fn deactivate(&self, registry: &HandlerRegistry, id: &str) -> VfsResult<()> {
        let info = registry.get(id).await?;
        let handler = info.handler;
        if handler.flags.auto_mount && handler.device.is_some() && self.strategy.supports_mount() {
            self.unmount(handler.effective_mount_point()).await?;
        }
        registry.set_state(id, MountState::Unmounted).await?;
        tracing::info!("handler {} unmounted", handler.id);
        Ok(())
    }

    /// Mark handlers whose root vanished as unmounted (device loss).
    ///
    /// Returns the ids that went offline.
    pub async fn refresh(&self, registry: &HandlerRegistry) -> Vec<String> {
        let mut lost = Vec::new();
        for info in registry.list().await {
            if info.state.is_mounted() && !is_dir(&info.handler.root).await {
                tracing::warn!("handler {} lost its storage", info.handler.id);
                if registry
                    .set_state(&info.handler.id, MountState::Unmounted)
                    .await
                    .is_ok()
                {
                    lost.push(info.handler.id.clone());
                }
            }
        }
        lost
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}
