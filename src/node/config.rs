//! Node agent configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Driver name reported in the topology key
pub const DEFAULT_DRIVER_NAME: &str = "disk.csi.azure.com";

/// Configuration for the node server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    pub driver_name: String,
    /// Node name; also the fallback node ID
    pub node_id: String,
    /// Region the node runs in; empty when unknown
    pub location: String,
    /// Report zone topology segments
    pub support_zone: bool,
    /// Resolve zone and instance type from node labels
    pub get_node_info_from_labels: bool,
    /// Use the instance name from metadata as node ID
    pub get_node_id_from_imds: bool,
    pub use_instance_metadata: bool,
    /// Maximum attachable volumes; negative means resolve from the VM size
    pub volume_attach_limit: i64,
    /// Slots held back from the resolved limit
    pub reserved_data_disk_slot_num: i64,
    pub enable_perf_optimization: bool,
    pub enable_disk_online_resize: bool,
    pub enable_windows_host_process: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            node_id: String::new(),
            location: String::new(),
            support_zone: true,
            get_node_info_from_labels: false,
            get_node_id_from_imds: false,
            use_instance_metadata: true,
            volume_attach_limit: -1,
            reserved_data_disk_slot_num: 0,
            enable_perf_optimization: false,
            enable_disk_online_resize: true,
            enable_windows_host_process: false,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Topology key for the driver's zone segment
    pub fn topology_key(&self) -> String {
        format!("topology.{}/zone", self.driver_name)
    }
}
