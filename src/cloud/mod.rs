//! Cloud platform adapter
//!
//! `AzureCloud` answers the node-info queries from two sources:
//! - the instance metadata service ([`imds`]) for the local instance
//! - the orchestrator's node object ([`labels`]) for label-based lookups
//!
//! Either source may be absent; queries needing it then fail and the node
//! info provider falls back to the other.

pub mod imds;
pub mod labels;

#[cfg(test)]
pub(crate) mod fake;

pub use imds::{zone_from_metadata, ImdsClient, ImdsConfig};
pub use labels::NodeLabelReader;

use crate::domain::ports::{CloudProvider, InstanceMetadata, NodeLabels, Zone};
use crate::error::{Error, Result};
use crate::node::vmss_instance_name;
use async_trait::async_trait;
use tracing::debug;

/// Production cloud provider
pub struct AzureCloud {
    imds: Option<ImdsClient>,
    labels: Option<NodeLabelReader>,
}

impl AzureCloud {
    pub fn new(imds: Option<ImdsClient>, labels: Option<NodeLabelReader>) -> Self {
        Self { imds, labels }
    }

    fn imds(&self) -> Result<&ImdsClient> {
        self.imds
            .as_ref()
            .ok_or_else(|| Error::CloudProvider("instance metadata service is disabled".into()))
    }

    fn labels(&self) -> Result<&NodeLabelReader> {
        self.labels
            .as_ref()
            .ok_or_else(|| Error::CloudProvider("no Kubernetes client configured".into()))
    }
}

/// VM size of `metadata` if it describes `node_name`
pub fn instance_type_for(metadata: &InstanceMetadata, node_name: &str) -> Result<String> {
    let describes_node = metadata.name.eq_ignore_ascii_case(node_name)
        || vmss_instance_name(&metadata.name)
            .map(|n| n.eq_ignore_ascii_case(node_name))
            .unwrap_or(false);
    if !describes_node {
        return Err(Error::CloudProvider(format!(
            "instance type of remote node {} is not available from local metadata",
            node_name
        )));
    }
    if metadata.vm_size.is_empty() {
        return Err(Error::CloudProvider(format!("no VM size reported for {}", node_name)));
    }
    Ok(metadata.vm_size.clone())
}

#[async_trait]
impl CloudProvider for AzureCloud {
    async fn zone(&self) -> Result<Zone> {
        let metadata = self.imds()?.compute().await?;
        zone_from_metadata(&metadata)
    }

    async fn zone_by_node_name(&self, node_name: &str) -> Result<Zone> {
        let set = self.labels()?.labels(node_name).await?;
        let (zone, region) = labels::legacy_zone_from(&set);
        let failure_domain = zone.ok_or_else(|| {
            Error::CloudProvider(format!("node {} carries no failure-domain label", node_name))
        })?;
        debug!("Zone of {} from node labels: {}", node_name, failure_domain);
        Ok(Zone {
            failure_domain,
            region: region.unwrap_or_default(),
        })
    }

    async fn instance_metadata(&self) -> Result<Option<InstanceMetadata>> {
        match &self.imds {
            Some(imds) => Ok(Some(imds.compute().await?)),
            None => Ok(None),
        }
    }

    async fn instance_type(&self, node_name: &str) -> Result<String> {
        let metadata = self.imds()?.compute().await?;
        instance_type_for(&metadata, node_name)
    }

    async fn node_labels(&self, node_name: &str) -> Result<NodeLabels> {
        let set = self.labels()?.labels(node_name).await?;
        Ok(labels::node_labels_from(&set))
    }
}
