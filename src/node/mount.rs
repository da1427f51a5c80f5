//! Mount-point reconciliation
//!
//! The OS mount table is the source of truth for lifecycle state. These
//! helpers compare a target path against it and converge idempotently:
//! create what is missing, unmount what is broken, remove what is left.

use crate::domain::ports::MountUtil;
use crate::error::{Error, Result};
use crate::node::platform::PlatformProfile;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// `path` made absolute against the current directory
pub(crate) fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

async fn listed_in_mount_table(mounter: &dyn MountUtil, target: &str) -> Result<bool> {
    let target_abs = absolute(Path::new(target));
    Ok(mounter
        .list_mounts()
        .await?
        .iter()
        .any(|m| Path::new(&m.path) == target_abs))
}

/// Reconcile `target` as a mount point
///
/// Returns `true` if a healthy mount is already present. Otherwise the
/// target directory exists afterwards (unless the platform's mount call
/// creates it) and `false` is returned. A mount whose directory cannot be
/// listed is unmounted so the caller remounts it.
pub async fn ensure_mount_point(
    mounter: &dyn MountUtil,
    platform: &PlatformProfile,
    target: &str,
) -> Result<bool> {
    let mut mounted = match mounter.is_mount_point(target).await {
        Ok(mounted) => mounted,
        Err(e) if e.kind() == ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Mount probe on {} failed ({}), treating as mounted", target, e);
            true
        }
    };

    // The probe cannot classify every bind mount
    if !mounted && platform.cross_check_mount_list && listed_in_mount_table(mounter, target).await? {
        mounted = true;
    }

    if mounted {
        match tokio::fs::read_dir(target).await {
            Ok(_) => {
                debug!("Already mounted on target {}", target);
                return Ok(true);
            }
            Err(e) => {
                warn!("ReadDir {} failed with {}, unmounting this directory", target, e);
                if let Err(e) = mounter.unmount(target).await {
                    error!("Unmount of broken mount {} failed: {}", target, e);
                    return Err(e);
                }
                return Ok(false);
            }
        }
    }

    if !platform.mount_creates_target {
        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| Error::MountFailed {
                target: target.to_string(),
                reason: format!("mkdir failed: {}", e),
            })?;
    }

    Ok(false)
}

/// Unmount `target` if mounted and remove it
///
/// An absent target is success. With `extensive`, the active mount list is
/// consulted in addition to the mount probe.
pub async fn cleanup_mount_point(mounter: &dyn MountUtil, target: &str, extensive: bool) -> Result<()> {
    let mounted = match tokio::fs::symlink_metadata(target).await {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("Target {} does not exist, nothing to clean up", target);
            return Ok(());
        }
        Err(e) => {
            warn!("Stat of {} failed ({}), treating as a corrupted mount", target, e);
            true
        }
        Ok(_) => match mounter.is_mount_point(target).await {
            Ok(true) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                warn!("Mount probe on {} failed ({}), treating as mounted", target, e);
                true
            }
            Ok(false) => extensive && listed_in_mount_table(mounter, target).await?,
        },
    };

    if mounted {
        info!("Unmounting {}", target);
        mounter
            .unmount(target)
            .await
            .map_err(|e| Error::UnmountFailed {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
    }

    remove_target(target).await
}

async fn remove_target(target: &str) -> Result<()> {
    let result = match tokio::fs::symlink_metadata(target).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir(target).await,
        Ok(_) => tokio::fs::remove_file(target).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            debug!("Removed {}", target);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::UnmountFailed {
            target: target.to_string(),
            reason: format!("remove failed: {}", e),
        }),
    }
}

/// Prepare the publish target for the platform's mount primitive
pub async fn prepare_publish_path(platform: &PlatformProfile, target: &str) -> Result<()> {
    if !platform.prepare_publish_target {
        return Ok(());
    }

    if let Some(parent) = Path::new(target).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    match tokio::fs::symlink_metadata(target).await {
        Ok(meta) if meta.is_dir() => {
            debug!("Removing leftover publish directory {}", target);
            tokio::fs::remove_dir(target).await?;
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Create `target` as a file so a block device can be bind-mounted onto it
pub async fn ensure_block_target_file(
    mounter: &dyn MountUtil,
    platform: &PlatformProfile,
    target: &str,
) -> Result<()> {
    let parent = Path::new(target)
        .parent()
        .and_then(|p| p.to_str())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::invalid(format!("target path {} has no parent", target)))?;
    ensure_mount_point(mounter, platform, parent).await?;

    info!("Making block target file {}", target);
    let created = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(target)
        .await;
    if let Err(e) = created {
        if let Err(remove_err) = tokio::fs::remove_file(target).await {
            if remove_err.kind() != ErrorKind::NotFound {
                warn!("Could not remove partial target {}: {}", target, remove_err);
            }
        }
        return Err(Error::MountFailed {
            target: target.to_string(),
            reason: format!("could not create file: {}", e),
        });
    }
    Ok(())
}
