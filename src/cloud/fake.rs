//! Scriptable cloud provider for tests
//!
//! Every query fails until a value is set, except instance metadata (absent)
//! and node labels (empty).

use crate::domain::ports::{CloudProvider, InstanceMetadata, NodeLabels, Zone};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

struct State {
    zone: Option<Zone>,
    zone_by_node_name: Option<Zone>,
    metadata: Result<Option<InstanceMetadata>>,
    instance_type: Option<String>,
    labels: Result<NodeLabels>,
    zone_calls: usize,
    label_reads: usize,
}

impl Default for State {
    fn default() -> Self {
        Self {
            zone: None,
            zone_by_node_name: None,
            metadata: Ok(None),
            instance_type: None,
            labels: Ok(NodeLabels::default()),
            zone_calls: 0,
            label_reads: 0,
        }
    }
}

#[derive(Default)]
pub struct FakeCloud {
    state: Mutex<State>,
}

fn unavailable(what: &str) -> Error {
    Error::CloudProvider(format!("{} not available", what))
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_zone(&self, zone: Zone) {
        self.state.lock().zone = Some(zone);
    }

    pub fn set_zone_by_node_name(&self, zone: Zone) {
        self.state.lock().zone_by_node_name = Some(zone);
    }

    pub fn set_metadata(&self, metadata: InstanceMetadata) {
        self.state.lock().metadata = Ok(Some(metadata));
    }

    pub fn fail_metadata(&self) {
        self.state.lock().metadata = Err(unavailable("instance metadata"));
    }

    pub fn set_instance_type(&self, instance_type: &str) {
        self.state.lock().instance_type = Some(instance_type.to_string());
    }

    pub fn set_labels(&self, labels: NodeLabels) {
        self.state.lock().labels = Ok(labels);
    }

    pub fn fail_labels(&self) {
        self.state.lock().labels = Err(unavailable("node object"));
    }

    /// Calls to the metadata zone query
    pub fn zone_calls(&self) -> usize {
        self.state.lock().zone_calls
    }

    pub fn label_reads(&self) -> usize {
        self.state.lock().label_reads
    }
}

fn replay<T: Clone>(result: &Result<T>) -> Result<T> {
    match result {
        Ok(v) => Ok(v.clone()),
        Err(e) => Err(Error::CloudProvider(e.to_string())),
    }
}

#[async_trait]
impl CloudProvider for FakeCloud {
    async fn zone(&self) -> Result<Zone> {
        let mut state = self.state.lock();
        state.zone_calls += 1;
        state.zone.clone().ok_or_else(|| unavailable("zone"))
    }

    async fn zone_by_node_name(&self, _node_name: &str) -> Result<Zone> {
        self.state
            .lock()
            .zone_by_node_name
            .clone()
            .ok_or_else(|| unavailable("zone by node name"))
    }

    async fn instance_metadata(&self) -> Result<Option<InstanceMetadata>> {
        replay(&self.state.lock().metadata)
    }

    async fn instance_type(&self, _node_name: &str) -> Result<String> {
        self.state
            .lock()
            .instance_type
            .clone()
            .ok_or_else(|| unavailable("instance type"))
    }

    async fn node_labels(&self, _node_name: &str) -> Result<NodeLabels> {
        let mut state = self.state.lock();
        state.label_reads += 1;
        replay(&state.labels)
    }
}
