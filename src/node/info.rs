//! Node Info Provider
//!
//! Resolves node identity, zone topology and the attachable volume limit at
//! registration time. Each input has a preferred source and a fallback chain
//! ending in the orchestrator's node labels.

use super::capacity::max_data_disk_count;
use super::NodeServer;
use crate::domain::ports::{NodeCapability, NodeInfo, NodeLabels, Topology, Zone};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument, warn};

/// Well-known topology key mirrored from the driver key
pub const WELL_KNOWN_TOPOLOGY_KEY: &str = "topology.kubernetes.io/zone";

/// Capabilities advertised by the node service
pub const NODE_CAPABILITIES: &[NodeCapability] = &[
    NodeCapability::StageUnstageVolume,
    NodeCapability::ExpandVolume,
    NodeCapability::GetVolumeStats,
    NodeCapability::SingleNodeMultiWriter,
];

/// Whether `zone` is an availability zone of `region`
///
/// With no region configured any `<a>-<b>` value is accepted.
pub fn is_valid_availability_zone(zone: &str, region: &str) -> bool {
    let zone = zone.to_lowercase();
    if region.is_empty() {
        let mut parts = zone.split('-');
        return matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty()
        );
    }
    let prefix = format!("{}-", region.to_lowercase());
    matches!(zone.strip_prefix(&prefix), Some("1" | "2" | "3"))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Decode a scale-set compute name into its orchestrator node name
///
/// `aks-nodepool1-12345678-vmss_13` becomes `aks-nodepool1-12345678-vmss00000d`.
pub fn vmss_instance_name(compute_name: &str) -> Result<String> {
    let (prefix, id) = compute_name
        .rsplit_once('_')
        .ok_or_else(|| Error::NodeInfo(format!("{} is not a scale set instance name", compute_name)))?;
    let id: u64 = id
        .parse()
        .map_err(|_| Error::NodeInfo(format!("invalid instance id in {}", compute_name)))?;
    Ok(format!("{}{:0>6}", prefix, to_base36(id)))
}

impl NodeServer {
    /// Static capability list
    pub fn get_capabilities(&self) -> Vec<NodeCapability> {
        NODE_CAPABILITIES.to_vec()
    }

    /// Node identity, attach limit and topology
    #[instrument(skip(self), fields(node_id = %self.config.node_id))]
    pub async fn get_node_info(&self) -> Result<NodeInfo> {
        let topology_key = self.config.topology_key();
        let mut segments = BTreeMap::from([(topology_key.clone(), String::new())]);
        let mut labels: Option<NodeLabels> = None;

        if self.config.support_zone {
            let zone = self.resolve_zone(&mut labels).await?;
            info!("Node {} failure domain: {}", self.config.node_id, zone.failure_domain);
            if is_valid_availability_zone(&zone.failure_domain, &self.config.location) {
                segments.insert(topology_key, zone.failure_domain.clone());
                segments.insert(WELL_KNOWN_TOPOLOGY_KEY.to_string(), zone.failure_domain);
            } else if !zone.failure_domain.is_empty() {
                debug!("Dropping zone {} not valid in region {}", zone.failure_domain, self.config.location);
            }
        }

        let mut max_volumes = self.config.volume_attach_limit;
        if max_volumes < 0 {
            let instance_type = self.resolve_instance_type(&mut labels).await;
            let (count, _) = max_data_disk_count(&instance_type);
            max_volumes = count - self.config.reserved_data_disk_slot_num;
        }

        Ok(NodeInfo {
            node_id: self.resolve_node_id().await,
            max_volumes_per_node: max_volumes,
            accessible_topology: Topology { segments },
        })
    }

    async fn read_labels(&self) -> Result<NodeLabels> {
        self.cloud
            .node_labels(&self.config.node_id)
            .await
            .map_err(|e| {
                Error::NodeInfo(format!(
                    "GetNodeInfoFromLabels on node({}) failed with {}",
                    self.config.node_id, e
                ))
            })
    }

    async fn resolve_zone(&self, labels: &mut Option<NodeLabels>) -> Result<Zone> {
        let mut zone = Zone::default();

        if self.config.get_node_info_from_labels {
            *labels = Some(self.read_labels().await?);
        } else {
            let queried = if self.platform.zone_by_node_name_without_metadata
                && !self.config.use_instance_metadata
            {
                self.cloud.zone_by_node_name(&self.config.node_id).await
            } else {
                self.cloud.zone().await
            };
            match queried {
                Ok(z) => zone = z,
                Err(e) => {
                    warn!(
                        "Get zone({}) failed with: {}, fall back to node labels",
                        self.config.node_id, e
                    );
                    *labels = Some(self.read_labels().await?);
                }
            }
        }

        if zone.failure_domain.is_empty() {
            if let Some(label_zone) = labels.as_ref().and_then(|l| l.zone.clone()) {
                zone.failure_domain = label_zone;
            }
        }
        Ok(zone)
    }

    /// Instance type from metadata, then the cloud API, then node labels;
    /// empty if every source fails
    async fn resolve_instance_type(&self, labels: &mut Option<NodeLabels>) -> String {
        if !self.config.get_node_info_from_labels {
            if self.config.use_instance_metadata {
                match self.cloud.instance_metadata().await {
                    Ok(Some(m)) if !m.vm_size.is_empty() => {
                        debug!("Instance type {} from metadata", m.vm_size);
                        return m.vm_size;
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Instance metadata query failed: {}", e),
                }
            }
            match self.cloud.instance_type(&self.config.node_id).await {
                Ok(t) if !t.is_empty() => return t,
                Ok(_) => {}
                Err(e) => warn!("Get instance type({}) failed with: {}", self.config.node_id, e),
            }
            warn!("Falling back to instance type from node labels");
        }

        if let Some(t) = labels.as_ref().and_then(|l| l.instance_type.clone()) {
            return t;
        }
        match self.read_labels().await {
            Ok(fresh) => {
                let t = fresh.instance_type.clone().unwrap_or_default();
                *labels = Some(fresh);
                t
            }
            Err(e) => {
                warn!("{}", e);
                String::new()
            }
        }
    }

    async fn resolve_node_id(&self) -> String {
        let configured = self.config.node_id.clone();
        if !(self.config.get_node_id_from_imds && self.config.use_instance_metadata) {
            return configured;
        }

        match self.cloud.instance_metadata().await {
            Ok(Some(m)) if !m.name.is_empty() => {
                if m.vm_scale_set_name.is_empty() {
                    return m.name;
                }
                match vmss_instance_name(&m.name) {
                    Ok(id) => id,
                    Err(e) => {
                        error!("Scale set name decoding failed: {}, using {}", e, m.name);
                        m.name
                    }
                }
            }
            Ok(_) => configured,
            Err(e) => {
                warn!("Instance metadata query failed: {}, keeping node ID {}", e, configured);
                configured
            }
        }
    }
}
