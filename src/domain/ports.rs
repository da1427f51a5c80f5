//! Domain Ports - Core trait definitions for the node agent
//!
//! These traits define the boundaries between the lifecycle engines and the
//! host: the mount/filesystem utility, the cloud platform and the device
//! tuner. Adapters implement them; tests substitute fakes.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Volume Capability
// =============================================================================

/// Access mode requested for a volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    #[default]
    Unknown,
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
    SingleNodeSingleWriter,
    SingleNodeMultiWriter,
}

impl AccessMode {
    /// Whether the mode allows more than one node to attach the volume
    pub fn is_multi_node(&self) -> bool {
        matches!(
            self,
            AccessMode::MultiNodeReaderOnly
                | AccessMode::MultiNodeSingleWriter
                | AccessMode::MultiNodeMultiWriter
        )
    }
}

/// Raw block access, no filesystem semantics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVolume {}

/// Filesystem mount access
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountVolume {
    /// Filesystem type, empty for the platform default
    #[serde(default)]
    pub fs_type: String,
    /// Extra mount flags
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

/// How the volume is consumed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessType {
    Block(BlockVolume),
    Mount(MountVolume),
}

/// Capability the orchestrator requests for a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCapability {
    #[serde(default)]
    pub access_type: Option<AccessType>,
    #[serde(default)]
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// Filesystem-mount capability
    pub fn mount(fs_type: impl Into<String>, mount_flags: Vec<String>, mode: AccessMode) -> Self {
        Self {
            access_type: Some(AccessType::Mount(MountVolume {
                fs_type: fs_type.into(),
                mount_flags,
            })),
            access_mode: mode,
        }
    }

    /// Raw-block capability
    pub fn block(mode: AccessMode) -> Self {
        Self {
            access_type: Some(AccessType::Block(BlockVolume {})),
            access_mode: mode,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.access_type, Some(AccessType::Block(_)))
    }

    pub fn mount_volume(&self) -> Option<&MountVolume> {
        match &self.access_type {
            Some(AccessType::Mount(m)) => Some(m),
            _ => None,
        }
    }
}

// =============================================================================
// Lifecycle Requests/Responses
// =============================================================================

/// Request to stage (format + mount) a volume at its node-local path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStageVolumeRequest {
    pub volume_id: String,
    pub staging_target_path: String,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Carries the attachment slot under `LUN`
    #[serde(default)]
    pub publish_context: BTreeMap<String, String>,
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
}

/// Request to unstage a volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUnstageVolumeRequest {
    pub volume_id: String,
    pub staging_target_path: String,
}

/// Request to bind-mount a staged volume into a consumer path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePublishVolumeRequest {
    pub volume_id: String,
    /// Source of the bind mount
    pub staging_target_path: String,
    pub target_path: String,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    #[serde(default)]
    pub publish_context: BTreeMap<String, String>,
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
    #[serde(default)]
    pub readonly: bool,
}

/// Request to remove a consumer bind mount
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
}

/// Requested capacity bounds in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityRange {
    #[serde(default)]
    pub required_bytes: u64,
    #[serde(default)]
    pub limit_bytes: u64,
}

/// Request to grow the filesystem of an attached volume
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExpandVolumeRequest {
    pub volume_id: String,
    pub volume_path: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
}

/// Result of an expansion: the measured capacity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExpandVolumeResponse {
    pub capacity_bytes: u64,
}

/// Request for usage statistics of a published or staged path
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGetVolumeStatsRequest {
    pub volume_id: String,
    pub volume_path: String,
}

/// Unit of a usage entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageUnit {
    Bytes,
    Inodes,
}

/// A single usage entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeUsage {
    pub unit: UsageUnit,
    pub available: u64,
    pub total: u64,
    pub used: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGetVolumeStatsResponse {
    pub usage: Vec<VolumeUsage>,
}

// =============================================================================
// Node Identity
// =============================================================================

/// Topology segments, e.g. `{"topology.kubernetes.io/zone": "eastus-1"}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub segments: BTreeMap<String, String>,
}

/// Information reported at node registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub node_id: String,
    pub max_volumes_per_node: i64,
    pub accessible_topology: Topology,
}

/// Capabilities advertised by the node service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeCapability {
    StageUnstageVolume,
    ExpandVolume,
    GetVolumeStats,
    SingleNodeMultiWriter,
}

// =============================================================================
// Mount Utility Port
// =============================================================================

/// Entry of the active mount table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountPoint {
    /// Mounted device or source (e.g., /dev/sdc)
    pub device: String,
    /// Mount path
    pub path: String,
    /// Filesystem type
    pub fs_type: String,
    /// Mount options
    pub options: Vec<String>,
}

/// Filesystem usage as reported by statvfs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsStats {
    pub bytes_available: u64,
    pub bytes_total: u64,
    pub bytes_used: u64,
    pub inodes_free: u64,
    pub inodes_total: u64,
    pub inodes_used: u64,
}

/// Filesystem geometry read from the superblock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsGeometry {
    pub block_size: u64,
    pub block_count: u64,
}

impl FsGeometry {
    pub fn size_bytes(&self) -> u64 {
        self.block_size.saturating_mul(self.block_count)
    }
}

/// Port for the host's mount, format, resize and rescan primitives
///
/// Path probes return `std::io::Result` so callers can distinguish a missing
/// path from other failures.
#[async_trait]
pub trait MountUtil: Send + Sync {
    /// Whether `path` is currently a mount point
    async fn is_mount_point(&self, path: &str) -> std::io::Result<bool>;

    /// All entries of the active mount table
    async fn list_mounts(&self) -> Result<Vec<MountPoint>>;

    /// Mount `device` at `target`; an empty `fs_type` lets the host pick
    async fn mount(&self, device: &str, target: &str, fs_type: &str, options: &[String]) -> Result<()>;

    /// Unmount `target`
    async fn unmount(&self, target: &str) -> Result<()>;

    /// Format `device` with `fs_type` if it carries no filesystem, then mount
    async fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<()>;

    /// Grow the filesystem on `device` mounted at `mount_path` to the device size
    async fn resize_filesystem(&self, device: &str, mount_path: &str) -> Result<()>;

    /// Size in bytes of the block device (or volume) at `path`
    async fn block_size_bytes(&self, path: &str) -> Result<u64>;

    /// Geometry of the filesystem on `device` mounted at `mount_path`
    async fn filesystem_geometry(&self, device: &str, mount_path: &str) -> Result<FsGeometry>;

    /// Usage statistics of the filesystem containing `path`
    async fn fs_stats(&self, path: &str) -> Result<FsStats>;

    /// Whether `path` is a block device node
    async fn path_is_device(&self, path: &str) -> std::io::Result<bool>;

    /// Ask every storage host adapter to rescan its bus
    async fn rescan_bus(&self) -> Result<()>;

    /// Ask every attached disk to re-read its capacity
    async fn rescan_all_devices(&self) -> Result<()>;

    /// Ask a single disk to re-read its capacity
    async fn rescan_device(&self, device: &str) -> Result<()>;

    /// Device path of the disk presented at `slot`, if it is visible yet
    async fn find_disk_by_slot(&self, slot: u32) -> Result<Option<String>>;
}

// =============================================================================
// Cloud Provider Port
// =============================================================================

/// Fault domain of the local instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub failure_domain: String,
    pub region: String,
}

/// Compute section of the instance metadata document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vm_size: String,
    #[serde(default)]
    pub vm_scale_set_name: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub platform_fault_domain: String,
}

/// Zone and instance type taken from the orchestrator's node object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLabels {
    pub zone: Option<String>,
    pub instance_type: Option<String>,
}

/// Port for cloud platform queries
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Zone of the local instance via the metadata service
    async fn zone(&self) -> Result<Zone>;

    /// Zone of `node_name` without the metadata service
    async fn zone_by_node_name(&self, node_name: &str) -> Result<Zone>;

    /// Instance metadata, `None` when the metadata service is not in use
    async fn instance_metadata(&self) -> Result<Option<InstanceMetadata>>;

    /// Instance type of `node_name` from the cloud instance API
    async fn instance_type(&self, node_name: &str) -> Result<String>;

    /// Zone and instance type labels of `node_name`
    async fn node_labels(&self, node_name: &str) -> Result<NodeLabels>;
}

// =============================================================================
// Device Tuner Port
// =============================================================================

/// Port for applying block-queue settings to a device
#[async_trait]
pub trait DeviceTuner: Send + Sync {
    /// Apply `settings` (sysfs attribute → value) to `device`
    async fn apply(&self, device: &str, settings: &BTreeMap<String, String>) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type MountUtilRef = Arc<dyn MountUtil>;
pub type CloudProviderRef = Arc<dyn CloudProvider>;
pub type DeviceTunerRef = Arc<dyn DeviceTuner>;
