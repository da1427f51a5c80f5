//! Zone and instance type from the Kubernetes node object

use crate::domain::ports::NodeLabels;
use crate::error::Result;
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::debug;

pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const LEGACY_ZONE_LABEL: &str = "failure-domain.beta.kubernetes.io/zone";
pub const REGION_LABEL: &str = "topology.kubernetes.io/region";
pub const LEGACY_REGION_LABEL: &str = "failure-domain.beta.kubernetes.io/region";
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";
pub const LEGACY_INSTANCE_TYPE_LABEL: &str = "beta.kubernetes.io/instance-type";

fn first_of(labels: &BTreeMap<String, String>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| labels.get(*k))
        .find(|v| !v.is_empty())
        .cloned()
}

/// Zone and instance type from a node's label set
pub fn node_labels_from(labels: &BTreeMap<String, String>) -> NodeLabels {
    NodeLabels {
        zone: first_of(labels, &[ZONE_LABEL, LEGACY_ZONE_LABEL]),
        instance_type: first_of(labels, &[INSTANCE_TYPE_LABEL, LEGACY_INSTANCE_TYPE_LABEL]),
    }
}

/// Legacy failure-domain zone and the node's region
pub fn legacy_zone_from(labels: &BTreeMap<String, String>) -> (Option<String>, Option<String>) {
    (
        first_of(labels, &[LEGACY_ZONE_LABEL]),
        first_of(labels, &[REGION_LABEL, LEGACY_REGION_LABEL]),
    )
}

/// Reads node labels through the API server
#[derive(Clone)]
pub struct NodeLabelReader {
    nodes: Api<Node>,
}

impl NodeLabelReader {
    pub fn new(client: Client) -> Self {
        Self {
            nodes: Api::all(client),
        }
    }

    pub async fn labels(&self, node_name: &str) -> Result<BTreeMap<String, String>> {
        let node = self.nodes.get(node_name).await?;
        debug!("Read labels of node {}", node_name);
        Ok(node.metadata.labels.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_current_labels_win() {
        let set = labels(&[
            (ZONE_LABEL, "eastus2-1"),
            (LEGACY_ZONE_LABEL, "eastus2-3"),
            (INSTANCE_TYPE_LABEL, "Standard_D8s_v3"),
            (LEGACY_INSTANCE_TYPE_LABEL, "Standard_D2s_v3"),
        ]);
        let parsed = node_labels_from(&set);
        assert_eq!(parsed.zone.as_deref(), Some("eastus2-1"));
        assert_eq!(parsed.instance_type.as_deref(), Some("Standard_D8s_v3"));
    }

    #[test]
    fn test_legacy_labels_and_empty_values() {
        let set = labels(&[
            (ZONE_LABEL, ""),
            (LEGACY_ZONE_LABEL, "0"),
            (LEGACY_REGION_LABEL, "westeurope"),
        ]);
        let parsed = node_labels_from(&set);
        assert_eq!(parsed.zone.as_deref(), Some("0"));
        assert_eq!(parsed.instance_type, None);

        let (zone, region) = legacy_zone_from(&set);
        assert_eq!(zone.as_deref(), Some("0"));
        assert_eq!(region.as_deref(), Some("westeurope"));
    }
}
