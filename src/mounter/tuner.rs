//! Block queue tuning through sysfs

use crate::domain::ports::DeviceTuner;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const SYS_BLOCK: &str = "/sys/block";

/// Writes `<sys_block>/<device>/<attribute>` for each setting
#[derive(Debug, Clone)]
pub struct SysfsDeviceTuner {
    sys_block: PathBuf,
}

impl Default for SysfsDeviceTuner {
    fn default() -> Self {
        Self::new(SYS_BLOCK)
    }
}

impl SysfsDeviceTuner {
    pub fn new(sys_block: impl Into<PathBuf>) -> Self {
        Self {
            sys_block: sys_block.into(),
        }
    }

    /// Kernel name of `device`, following udev links such as `/dev/disk/azure/scsi1/lun0`
    async fn kernel_name(device: &str) -> Result<String> {
        let resolved = tokio::fs::canonicalize(device)
            .await
            .unwrap_or_else(|_| PathBuf::from(device));
        resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Internal(format!("cannot derive kernel device name from {}", device)))
    }
}

#[async_trait]
impl DeviceTuner for SysfsDeviceTuner {
    async fn apply(&self, device: &str, settings: &BTreeMap<String, String>) -> Result<()> {
        let name = Self::kernel_name(device).await?;
        let base = self.sys_block.join(&name);

        for (attribute, value) in settings {
            let path = base.join(Path::new(attribute));
            debug!("Writing {} to {}", value, path.display());
            tokio::fs::write(&path, value).await?;
        }
        info!("Applied {} settings to {}", settings.len(), name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_writes_attributes() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = tmp.path().join("sdc/queue");
        std::fs::create_dir_all(&queue).unwrap();

        let tuner = SysfsDeviceTuner::new(tmp.path());
        let settings = BTreeMap::from([
            ("queue/scheduler".to_string(), "none".to_string()),
            ("queue/nr_requests".to_string(), "256".to_string()),
        ]);
        tuner.apply("/dev/sdc", &settings).await.unwrap();

        assert_eq!(std::fs::read_to_string(queue.join("scheduler")).unwrap(), "none");
        assert_eq!(std::fs::read_to_string(queue.join("nr_requests")).unwrap(), "256");
    }

    #[tokio::test]
    async fn test_missing_attribute_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let tuner = SysfsDeviceTuner::new(tmp.path());
        let settings = BTreeMap::from([("queue/scheduler".to_string(), "none".to_string())]);
        assert!(tuner.apply("/dev/sdz", &settings).await.is_err());
    }
}
