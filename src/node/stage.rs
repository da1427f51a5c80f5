//! Staging Engine
//!
//! Stage formats the attached disk if it carries no filesystem and mounts
//! it at the node-local staging path. Unstage reverses it.

use super::mount::{cleanup_mount_point, ensure_mount_point};
use super::{params, perf, NodeServer};
use crate::domain::ports::{NodeStageVolumeRequest, NodeUnstageVolumeRequest};
use crate::error::{Error, Result};
use tracing::{debug, error, info, instrument, warn};

impl NodeServer {
    /// Stage a volume at its staging path
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    pub async fn stage_volume(&self, req: &NodeStageVolumeRequest) -> Result<()> {
        if req.volume_id.is_empty() {
            return Err(Error::invalid("Volume ID not provided"));
        }
        let target = req.staging_target_path.as_str();
        if target.is_empty() {
            return Err(Error::invalid("Staging target not provided"));
        }
        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| Error::invalid("Volume capability not provided"))?;
        let max_shares = params::max_shares(&req.volume_context)?;
        params::validate_capability(capability, max_shares)?;

        let _guard = self.volume_locks.acquire(&req.volume_id)?;

        let lun = req
            .publish_context
            .get(params::LUN)
            .ok_or_else(|| Error::invalid("lun not provided"))?;
        let mut source = self.device_locator.resolve(lun).await?;

        if capability.is_block() {
            debug!("Block volume {} needs no staging", req.volume_id);
            return Ok(());
        }

        if self.config.enable_perf_optimization {
            let attrs = perf::disk_perf_attributes(&req.volume_context).map_err(|e| {
                Error::PerfOptimization {
                    device: source.clone(),
                    reason: format!("failed to get perf attributes: {}", e),
                }
            })?;
            perf::optimize_disk(self.tuner.as_ref(), &source, &attrs).await?;
        }

        if ensure_mount_point(self.mounter.as_ref(), &self.platform, target).await? {
            debug!("Already mounted on target {}", target);
            return Ok(());
        }

        // Context overrides capability, which overrides the platform default
        let mut fs_type = self.platform.default_fs_type.to_string();
        let mut mount_flags: &[String] = &[];
        if let Some(mnt) = capability.mount_volume() {
            if !mnt.fs_type.is_empty() {
                fs_type = mnt.fs_type.to_lowercase();
            }
            mount_flags = &mnt.mount_flags;
        }
        let context_fs_type = params::fs_type(&req.volume_context);
        if !context_fs_type.is_empty() {
            fs_type = context_fs_type;
        }
        let options = params::collect_mount_options(&fs_type, mount_flags);

        if let Some(partition) = params::partition(&req.volume_context) {
            source = format!("{}-part{}", source, partition);
        }

        info!(
            "Formatting {} and mounting at {} with mount options {:?}",
            source, target, options
        );
        self.mounter
            .format_and_mount(&source, target, &fs_type, &options)
            .await
            .map_err(|e| {
                error!("Format and mount of {} failed: {}", source, e);
                Error::MountFailed {
                    target: target.to_string(),
                    reason: format!("could not format {} (lun: {}) and mount it: {}", source, lun, e),
                }
            })?;
        info!("Formatted {} and mounted at {}", source, target);

        let need_resize = params::resize_required(&req.volume_context)
            || match self.needs_resize(&source, target).await {
                Ok(need) => need,
                Err(e) => {
                    warn!("Could not determine if volume {} needs resize: {}", req.volume_id, e);
                    false
                }
            };

        if need_resize {
            info!("Filesystem resize initiating on {}", target);
            self.mounter
                .resize_filesystem(&source, target)
                .await
                .map_err(|e| Error::ResizeFailed {
                    volume_id: req.volume_id.clone(),
                    device: source.clone(),
                    reason: e.to_string(),
                })?;
            info!("Filesystem resize successful on {}", target);
        }

        Ok(())
    }

    /// Unmount and remove a volume's staging path
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    pub async fn unstage_volume(&self, req: &NodeUnstageVolumeRequest) -> Result<()> {
        if req.volume_id.is_empty() {
            return Err(Error::invalid("Volume ID not provided"));
        }
        let target = req.staging_target_path.as_str();
        if target.is_empty() {
            return Err(Error::invalid("Staging target not provided"));
        }

        let _guard = self.volume_locks.acquire(&req.volume_id)?;

        info!("Unmounting staging target {}", target);
        cleanup_mount_point(self.mounter.as_ref(), target, true).await?;
        info!("Unmounted staging target {}", target);
        Ok(())
    }

    /// Whether the device has grown past the filesystem on it
    async fn needs_resize(&self, device: &str, mount_path: &str) -> Result<bool> {
        let device_size = self.mounter.block_size_bytes(device).await?;
        let geometry = self.mounter.filesystem_geometry(device, mount_path).await?;
        // Last partial block is never usable by the filesystem
        Ok(device_size > geometry.size_bytes() + geometry.block_size)
    }
}
