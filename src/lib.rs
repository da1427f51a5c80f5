//! Disk CSI Node Agent
//!
//! Node-resident half of a block-disk CSI plugin. It turns a disk the
//! control plane attached to this instance into a usable volume and back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Node API (REST/JSON)                         │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────┐  │
//! │  │ Stage/Unstage│  │Publish/Unpub │  │    Expand    │  │NodeInfo │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘  └────┬────┘  │
//! │         └─────────┬───────┴─────────────────┘               │       │
//! │         ┌─────────┴─────────┐   ┌────────────────┐  ┌───────┴─────┐ │
//! │         │ Volume Lock Table │   │ Device Locator │  │Capacity Tbl │ │
//! │         └───────────────────┘   └────────────────┘  └─────────────┘ │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Ports: MountUtil │ CloudProvider │ DeviceTuner                     │
//! │  Adapters: SystemMounter (Linux) │ AzureCloud (IMDS + kube) │ sysfs │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`node`]: Lifecycle engines, lock table, device locator, node info
//! - [`api`]: HTTP surface over the node server
//! - [`mounter`]: Host mount utility and device tuner
//! - [`cloud`]: Instance metadata and node-label provider
//! - [`domain`]: Request types and collaborator ports
//! - [`error`]: Error types and status classes

pub mod api;
pub mod cloud;
pub mod domain;
pub mod error;
pub mod mounter;
pub mod node;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use cloud::{AzureCloud, ImdsClient, ImdsConfig, NodeLabelReader};

pub use domain::ports::{
    AccessMode, CloudProvider, DeviceTuner, MountUtil, NodeCapability, NodeExpandVolumeRequest,
    NodeExpandVolumeResponse, NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodeInfo,
    NodePublishVolumeRequest, NodeStageVolumeRequest, NodeUnpublishVolumeRequest,
    NodeUnstageVolumeRequest, VolumeCapability,
};

pub use error::{Error, ErrorCode, Result};

#[cfg(unix)]
pub use mounter::SystemMounter;
pub use mounter::SysfsDeviceTuner;

pub use node::{NodeConfig, NodeServer, PlatformProfile, VolumeLocks};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
