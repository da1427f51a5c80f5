//! Publish Engine
//!
//! Bind-mounts a staged volume, or the raw device for block volumes, into a
//! consumer's target path. Runs without the volume lock: each call touches
//! only its own target under an already stable staging mount.

use super::mount::{cleanup_mount_point, ensure_block_target_file, ensure_mount_point, prepare_publish_path};
use super::{params, NodeServer};
use crate::domain::ports::{NodePublishVolumeRequest, NodeUnpublishVolumeRequest};
use crate::error::{Error, Result};
use tracing::{debug, info, instrument};

impl NodeServer {
    /// Publish a volume at its target path
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    pub async fn publish_volume(&self, req: &NodePublishVolumeRequest) -> Result<()> {
        if req.volume_id.is_empty() {
            return Err(Error::invalid("Volume ID missing in the request"));
        }
        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| Error::invalid("Volume capability missing in request"))?;
        let max_shares = params::max_shares(&req.volume_context)?;
        params::validate_capability(capability, max_shares)?;

        if req.staging_target_path.is_empty() {
            return Err(Error::invalid("Staging target not provided"));
        }
        let target = req.target_path.as_str();
        if target.is_empty() {
            return Err(Error::invalid("Target path not provided"));
        }

        prepare_publish_path(&self.platform, target)
            .await
            .map_err(|e| Error::Internal(format!("Target path could not be prepared: {}", e)))?;

        let mut options = vec!["bind".to_string()];
        if req.readonly {
            options.push("ro".to_string());
        }

        let source = if capability.is_block() {
            let lun = req
                .publish_context
                .get(params::LUN)
                .ok_or_else(|| Error::invalid("lun not provided"))?;
            let device = self.device_locator.resolve(lun).await?;
            debug!("Found device {} for block publish with lun {}", device, lun);
            ensure_block_target_file(self.mounter.as_ref(), &self.platform, target).await?;
            device
        } else {
            if ensure_mount_point(self.mounter.as_ref(), &self.platform, target).await? {
                debug!("Already mounted on target {}", target);
                return Ok(());
            }
            req.staging_target_path.clone()
        };

        info!("Mounting {} at {}", source, target);
        self.mounter
            .mount(&source, target, "", &options)
            .await
            .map_err(|e| Error::MountFailed {
                target: target.to_string(),
                reason: format!("could not mount {}: {}", source, e),
            })?;
        info!("Mounted {} at {}", source, target);
        Ok(())
    }

    /// Remove a volume's bind mount from its target path
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    pub async fn unpublish_volume(&self, req: &NodeUnpublishVolumeRequest) -> Result<()> {
        if req.volume_id.is_empty() {
            return Err(Error::invalid("Volume ID missing in the request"));
        }
        let target = req.target_path.as_str();
        if target.is_empty() {
            return Err(Error::invalid("Target path missing in request"));
        }

        info!("Unmounting volume {} on {}", req.volume_id, target);
        cleanup_mount_point(
            self.mounter.as_ref(),
            target,
            self.platform.extensive_unpublish_check,
        )
        .await?;
        info!("Unmounted volume {} on {}", req.volume_id, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{
        AccessMode, NodeStageVolumeRequest, NodeUnstageVolumeRequest, VolumeCapability,
    };
    use crate::node::testing::{harness, Harness};
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;
    use std::path::Path;

    const VOLUME_ID: &str = "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/disks/pvc-2";

    fn lun_context() -> BTreeMap<String, String> {
        BTreeMap::from([(params::LUN.to_string(), "3".to_string())])
    }

    fn publish_request(staging: &str, target: &str, capability: VolumeCapability) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: VOLUME_ID.into(),
            staging_target_path: staging.into(),
            target_path: target.into(),
            volume_capability: Some(capability),
            publish_context: lun_context(),
            volume_context: BTreeMap::new(),
            readonly: false,
        }
    }

    fn rwo() -> VolumeCapability {
        VolumeCapability::mount("ext4", vec![], AccessMode::SingleNodeWriter)
    }

    fn join(tmp: &tempfile::TempDir, rel: &str) -> String {
        tmp.path().join(rel).to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_round_trip_leaves_no_mounts() {
        let Harness { server, mounter, .. } = harness();
        let tmp = tempfile::tempdir().unwrap();
        let staging = join(&tmp, "plugins/disk/globalmount");
        let target = join(&tmp, "pods/uid/volumes/pv/mount");
        mounter.attach(3, "/dev/sdc");

        server
            .stage_volume(&NodeStageVolumeRequest {
                volume_id: VOLUME_ID.into(),
                staging_target_path: staging.clone(),
                volume_capability: Some(rwo()),
                publish_context: lun_context(),
                volume_context: BTreeMap::new(),
            })
            .await
            .unwrap();
        server
            .publish_volume(&publish_request(&staging, &target, rwo()))
            .await
            .unwrap();
        assert_eq!(mounter.mounts().len(), 2);

        server
            .unpublish_volume(&NodeUnpublishVolumeRequest {
                volume_id: VOLUME_ID.into(),
                target_path: target.clone(),
            })
            .await
            .unwrap();
        server
            .unstage_volume(&NodeUnstageVolumeRequest {
                volume_id: VOLUME_ID.into(),
                staging_target_path: staging.clone(),
            })
            .await
            .unwrap();

        assert!(mounter.mounts().is_empty());
        assert!(!Path::new(&target).exists());
        assert!(!Path::new(&staging).exists());
    }

    #[tokio::test]
    async fn test_bind_options() {
        let Harness { server, mounter, .. } = harness();
        let tmp = tempfile::tempdir().unwrap();

        let mut req = publish_request(&join(&tmp, "staging"), &join(&tmp, "target"), rwo());
        req.readonly = true;
        server.publish_volume(&req).await.unwrap();
        assert_eq!(mounter.last_mount_options(), vec!["bind", "ro"]);
        assert_eq!(mounter.mounts()[0].device, join(&tmp, "staging"));
    }

    #[tokio::test]
    async fn test_publish_already_mounted_short_circuits() {
        let Harness { server, mounter, .. } = harness();
        let tmp = tempfile::tempdir().unwrap();
        let target = join(&tmp, "target");
        std::fs::create_dir(&target).unwrap();
        mounter.insert_mount(&join(&tmp, "staging"), &target);

        server
            .publish_volume(&publish_request(&join(&tmp, "staging"), &target, rwo()))
            .await
            .unwrap();
        assert_eq!(mounter.mount_calls(), 0);
    }

    #[tokio::test]
    async fn test_block_publish_binds_device_onto_file() {
        let Harness { server, mounter, .. } = harness();
        let tmp = tempfile::tempdir().unwrap();
        let target = join(&tmp, "pods/uid/volumeDevices/publish/pv");
        mounter.attach(3, "/dev/sdd");

        let req = publish_request(
            &join(&tmp, "staging"),
            &target,
            VolumeCapability::block(AccessMode::SingleNodeWriter),
        );
        server.publish_volume(&req).await.unwrap();

        assert!(Path::new(&target).is_file());
        let mounts = mounter.mounts();
        assert_eq!(mounts[0].device, "/dev/sdd");
        assert_eq!(mounts[0].path, target);
    }

    #[tokio::test]
    async fn test_block_publish_requires_lun() {
        let Harness { server, .. } = harness();
        let mut req = publish_request(
            "/staging",
            "/target",
            VolumeCapability::block(AccessMode::SingleNodeWriter),
        );
        req.publish_context.clear();
        assert_matches!(server.publish_volume(&req).await, Err(Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_publish_not_blocked_by_volume_lock() {
        let Harness { server, .. } = harness();
        let tmp = tempfile::tempdir().unwrap();
        let _staging_in_progress = server.volume_locks().acquire(VOLUME_ID).unwrap();

        server
            .publish_volume(&publish_request(&join(&tmp, "staging"), &join(&tmp, "target"), rwo()))
            .await
            .unwrap();
        server
            .unpublish_volume(&NodeUnpublishVolumeRequest {
                volume_id: VOLUME_ID.into(),
                target_path: join(&tmp, "target"),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_publish_validation() {
        let Harness { server, .. } = harness();

        let mut req = publish_request("/staging", "/target", rwo());
        req.volume_capability = None;
        assert_matches!(server.publish_volume(&req).await, Err(Error::InvalidArgument(_)));

        let req = publish_request("", "/target", rwo());
        assert_matches!(server.publish_volume(&req).await, Err(Error::InvalidArgument(_)));

        let req = publish_request("/staging", "", rwo());
        assert_matches!(server.publish_volume(&req).await, Err(Error::InvalidArgument(_)));

        let req = publish_request(
            "/staging",
            "/target",
            VolumeCapability::mount("ext4", vec![], AccessMode::MultiNodeMultiWriter),
        );
        assert_matches!(server.publish_volume(&req).await, Err(Error::InvalidArgument(_)));

        let req = NodeUnpublishVolumeRequest {
            volume_id: VOLUME_ID.into(),
            target_path: String::new(),
        };
        assert_matches!(server.unpublish_volume(&req).await, Err(Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_unpublish_absent_target() {
        let Harness { server, mounter, .. } = harness();
        server
            .unpublish_volume(&NodeUnpublishVolumeRequest {
                volume_id: VOLUME_ID.into(),
                target_path: "/nonexistent/pods/uid/mount".into(),
            })
            .await
            .unwrap();
        assert_eq!(mounter.unmount_calls(), 0);
    }
}
