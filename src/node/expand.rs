//! Expand Engine
//!
//! Grows the filesystem of a staged volume after the disk itself was
//! enlarged, then checks the measured size against the request.

use super::mount::absolute;
use super::NodeServer;
use crate::domain::ports::{NodeExpandVolumeRequest, NodeExpandVolumeResponse};
use crate::error::{Error, Result};
use std::path::Path;
use tracing::{error, info, instrument, warn};

pub const GIB: u64 = 1 << 30;

/// Whole GiB needed to hold `bytes`, rounded up
pub fn round_up_gib(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}

impl NodeServer {
    /// Expand the filesystem at `volume_path` to cover the requested capacity
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    pub async fn expand_volume(&self, req: &NodeExpandVolumeRequest) -> Result<NodeExpandVolumeResponse> {
        if req.volume_id.is_empty() {
            return Err(Error::invalid("Volume ID not provided"));
        }
        let request_gib = round_up_gib(req.capacity_range.map(|r| r.required_bytes).unwrap_or(0));

        let volume_path = req.volume_path.as_str();
        if volume_path.is_empty() {
            return Err(Error::invalid("volume path must be provided"));
        }

        let mut is_block = self.mounter.path_is_device(volume_path).await.map_err(|e| {
            Error::NotFound(format!(
                "failed to determine device path for volumePath [{}]: {}",
                volume_path, e
            ))
        })?;
        if !is_block {
            is_block = req
                .volume_capability
                .as_ref()
                .is_some_and(|cap| cap.is_block());
        }

        if is_block {
            if self.config.enable_disk_online_resize {
                info!("Rescanning all devices for block volume {}", req.volume_id);
                if let Err(e) = self.mounter.rescan_all_devices().await {
                    warn!("Rescan of all devices failed: {}", e);
                }
            }
            info!("Skipping resize of block volume {}", req.volume_id);
            return Ok(NodeExpandVolumeResponse::default());
        }

        let _guard = self.volume_locks.acquire(&req.volume_id)?;

        let device = self.device_from_mount_path(volume_path).await?;

        if self.config.enable_disk_online_resize {
            info!("Rescanning device {} for volume {}", device, req.volume_id);
            if let Err(e) = self.mounter.rescan_device(&device).await {
                warn!("Rescan of device {} failed: {}", device, e);
            }
        }

        // Kept until the measured size shows whether the resize mattered
        let resize_error = match self.mounter.resize_filesystem(&device, volume_path).await {
            Ok(()) => None,
            Err(e) => {
                let err = Error::ResizeFailed {
                    volume_id: req.volume_id.clone(),
                    device: device.clone(),
                    reason: e.to_string(),
                };
                error!("{}, will continue checking whether the volume has been resized", err);
                Some(err)
            }
        };

        let measure_path = if self.platform.measure_size_on_volume_path {
            volume_path
        } else {
            device.as_str()
        };
        let size_bytes = self
            .mounter
            .block_size_bytes(measure_path)
            .await
            .map_err(|e| {
                Error::Internal(format!(
                    "could not get size of block volume at path {}: {}",
                    measure_path, e
                ))
            })?;

        let size_gib = round_up_gib(size_bytes);
        if size_gib < request_gib {
            return Err(resize_error.unwrap_or(Error::ResizeIncomplete {
                requested_gib: request_gib,
                actual_gib: size_gib,
            }));
        }

        info!("Resized volume {} to {} bytes", req.volume_id, size_bytes);
        Ok(NodeExpandVolumeResponse {
            capacity_bytes: size_bytes,
        })
    }

    /// Device backing the mount at `mount_path`
    async fn device_from_mount_path(&self, mount_path: &str) -> Result<String> {
        let mount_abs = absolute(Path::new(mount_path));
        self.mounter
            .list_mounts()
            .await?
            .into_iter()
            .find(|m| Path::new(&m.path) == mount_abs)
            .map(|m| m.device)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "could not determine device path for volume path {}",
                    mount_path
                ))
            })
    }
}
