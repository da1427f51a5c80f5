//! Platform capability set
//!
//! Mount-creation behaviour, mount-table cross-checks and unpublish
//! strictness differ between Linux and Windows hosts. The differences are
//! captured once here and selected when the node server is constructed.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LINUX_FS_TYPE: &str = "ext4";
pub const DEFAULT_WINDOWS_FS_TYPE: &str = "ntfs";

/// Host operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Linux,
    Windows,
}

/// Per-platform behaviour switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    pub os: HostOs,
    /// Filesystem used when neither the capability nor the context names one
    pub default_fs_type: &'static str,
    /// Mount primitive creates the target itself; skip mkdir
    pub mount_creates_target: bool,
    /// Cross-check mount probes against the active mount list
    pub cross_check_mount_list: bool,
    /// Unpublish runs the extensive mount-point check before removal
    pub extensive_unpublish_check: bool,
    /// Publish removes a leftover target directory and creates its parent
    pub prepare_publish_target: bool,
    /// Without instance metadata, zone is looked up by node name
    pub zone_by_node_name_without_metadata: bool,
    /// Expansion measures the size on the volume path instead of the device
    pub measure_size_on_volume_path: bool,
}

impl PlatformProfile {
    pub fn linux() -> Self {
        Self {
            os: HostOs::Linux,
            default_fs_type: DEFAULT_LINUX_FS_TYPE,
            mount_creates_target: false,
            cross_check_mount_list: true,
            extensive_unpublish_check: true,
            prepare_publish_target: false,
            zone_by_node_name_without_metadata: false,
            measure_size_on_volume_path: false,
        }
    }

    /// Windows host; `host_process` selects host-process container mode
    pub fn windows(host_process: bool) -> Self {
        Self {
            os: HostOs::Windows,
            default_fs_type: DEFAULT_WINDOWS_FS_TYPE,
            mount_creates_target: true,
            cross_check_mount_list: false,
            extensive_unpublish_check: false,
            prepare_publish_target: true,
            zone_by_node_name_without_metadata: true,
            measure_size_on_volume_path: host_process,
        }
    }

    /// Profile of the platform this binary was built for
    pub fn for_host(windows_host_process: bool) -> Self {
        if cfg!(windows) {
            Self::windows(windows_host_process)
        } else {
            Self::linux()
        }
    }
}

impl Default for PlatformProfile {
    fn default() -> Self {
        Self::for_host(false)
    }
}
