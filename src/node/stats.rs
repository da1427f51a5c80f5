use super::NodeServer;
use crate::domain::ports::{
    NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, UsageUnit, VolumeUsage,
};
use crate::error::{Error, Result};
use std::io::ErrorKind;
use tracing::{error, instrument};

impl NodeServer {
    /// Capacity and inode usage of a published or staged volume
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    pub async fn get_volume_stats(&self, req: &NodeGetVolumeStatsRequest) -> Result<NodeGetVolumeStatsResponse> {
        if req.volume_id.is_empty() {
            return Err(Error::invalid("NodeGetVolumeStats volume ID was empty"));
        }
        let path = req.volume_path.as_str();
        if path.is_empty() {
            return Err(Error::invalid("NodeGetVolumeStats volume path was empty"));
        }

        self.volume_usage(path).await.map_err(|e| {
            error!("Failed to get volume stats for {} at {}: {}", req.volume_id, path, e);
            e
        })
    }

    async fn volume_usage(&self, path: &str) -> Result<NodeGetVolumeStatsResponse> {
        match tokio::fs::metadata(path).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("path {} does not exist", path)));
            }
            Err(e) => return Err(Error::Internal(format!("failed to stat {}: {}", path, e))),
        }

        let is_block = self
            .mounter
            .path_is_device(path)
            .await
            .map_err(|e| Error::Internal(format!("failed to determine whether {} is a block device: {}", path, e)))?;

        if is_block {
            let total = self.mounter.block_size_bytes(path).await?;
            return Ok(NodeGetVolumeStatsResponse {
                usage: vec![VolumeUsage {
                    unit: UsageUnit::Bytes,
                    available: 0,
                    total,
                    used: 0,
                }],
            });
        }

        let stats = self.mounter.fs_stats(path).await?;
        Ok(NodeGetVolumeStatsResponse {
            usage: vec![
                VolumeUsage {
                    unit: UsageUnit::Bytes,
                    available: stats.bytes_available,
                    total: stats.bytes_total,
                    used: stats.bytes_used,
                },
                VolumeUsage {
                    unit: UsageUnit::Inodes,
                    available: stats.inodes_free,
                    total: stats.inodes_total,
                    used: stats.inodes_used,
                },
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::FsStats;
    use crate::error::ErrorCode;
    use crate::node::testing::harness;
    use assert_matches::assert_matches;

    fn request(path: &str) -> NodeGetVolumeStatsRequest {
        NodeGetVolumeStatsRequest {
            volume_id: "disk-1".into(),
            volume_path: path.into(),
        }
    }

    #[tokio::test]
    async fn test_filesystem_usage() {
        let h = harness();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().to_str().unwrap();
        h.mounter.set_fs_stats(
            path,
            FsStats {
                bytes_available: 600,
                bytes_total: 1000,
                bytes_used: 400,
                inodes_free: 90,
                inodes_total: 100,
                inodes_used: 10,
            },
        );

        let resp = h.server.get_volume_stats(&request(path)).await.unwrap();
        assert_eq!(resp.usage.len(), 2);
        assert_eq!(resp.usage[0].unit, UsageUnit::Bytes);
        assert_eq!(resp.usage[0].used, 400);
        assert_eq!(resp.usage[1].unit, UsageUnit::Inodes);
        assert_eq!(resp.usage[1].available, 90);
    }

    #[tokio::test]
    async fn test_block_usage_reports_total_only() {
        let h = harness();
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("pv");
        std::fs::write(&target, b"").unwrap();
        let target = target.to_str().unwrap();
        h.mounter.mark_device(target);
        h.mounter.set_block_size(target, 1 << 30);

        let resp = h.server.get_volume_stats(&request(target)).await.unwrap();
        assert_eq!(resp.usage.len(), 1);
        assert_eq!(resp.usage[0].total, 1 << 30);
    }

    #[tokio::test]
    async fn test_errors() {
        let h = harness();
        let err = h
            .server
            .get_volume_stats(&request("/nonexistent/stats/path"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        assert_matches!(
            h.server.get_volume_stats(&request("")).await,
            Err(Error::InvalidArgument(_))
        );
        let mut req = request("/tmp");
        req.volume_id.clear();
        assert_matches!(h.server.get_volume_stats(&req).await, Err(Error::InvalidArgument(_)));
    }
}
