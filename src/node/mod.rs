//! Node Server Module
//!
//! Lifecycle engines of the node agent:
//!
//! - **Staging**: format-if-needed, mount and resize-on-stage
//! - **Publishing**: bind mounts into consumer paths, raw-block passthrough
//! - **Expansion**: online filesystem growth with post-condition check
//! - **Node info**: identity, topology and attach-limit resolution
//!
//! Stage, unstage and expand hold the per-volume lock for their whole run;
//! publish and unpublish do not.

pub mod capacity;
pub mod config;
pub mod device;
pub mod expand;
pub mod info;
pub mod locks;
pub mod mount;
pub mod params;
pub mod perf;
pub mod platform;
pub mod poll;
pub mod publish;
pub mod stage;
pub mod stats;

pub use capacity::{max_data_disk_count, DEFAULT_VOLUME_LIMIT};
pub use config::NodeConfig;
pub use device::{DeviceLocator, DEVICE_POLL_INTERVAL, DEVICE_POLL_TIMEOUT};
pub use info::{is_valid_availability_zone, vmss_instance_name};
pub use locks::{VolumeLockGuard, VolumeLocks};
pub use platform::{HostOs, PlatformProfile};

use crate::domain::ports::{CloudProviderRef, DeviceTunerRef, MountUtilRef};

/// Node-side volume lifecycle service
pub struct NodeServer {
    config: NodeConfig,
    platform: PlatformProfile,
    mounter: MountUtilRef,
    cloud: CloudProviderRef,
    tuner: DeviceTunerRef,
    volume_locks: VolumeLocks,
    device_locator: DeviceLocator,
}

impl NodeServer {
    /// Create a node server for the host platform
    pub fn new(
        config: NodeConfig,
        mounter: MountUtilRef,
        cloud: CloudProviderRef,
        tuner: DeviceTunerRef,
    ) -> Self {
        let platform = PlatformProfile::for_host(config.enable_windows_host_process);
        Self::with_platform(config, platform, mounter, cloud, tuner)
    }

    /// Create a node server with an explicit platform profile
    pub fn with_platform(
        config: NodeConfig,
        platform: PlatformProfile,
        mounter: MountUtilRef,
        cloud: CloudProviderRef,
        tuner: DeviceTunerRef,
    ) -> Self {
        let device_locator = DeviceLocator::new(mounter.clone());
        Self {
            config,
            platform,
            mounter,
            cloud,
            tuner,
            volume_locks: VolumeLocks::new(),
            device_locator,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn platform(&self) -> &PlatformProfile {
        &self.platform
    }

    pub fn volume_locks(&self) -> &VolumeLocks {
        &self.volume_locks
    }
}
