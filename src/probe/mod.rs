// OVS sampling installer.
//
// When a bridge node shows up in the topology, the handler allocates an
// sFlow agent for it, then points the bridge's sampling configuration at the
// agent's UDP target through the switch-control collaborator. Sampling rows
// are tagged with a probe id derived from the bridge uuid so an existing row
// survives agent restarts and is reused instead of duplicated.

pub mod cache;

pub use cache::TopologyPathResolver;

use std::sync::Arc;

use crate::error::AgentError;
use crate::graph::path::is_ownership_edge;
use crate::graph::{metadata, Graph, MetadataValue, Node};
use crate::sflow::SflowAgentAllocator;

pub const SFLOW_AGENT_IFACE: &str = "lo";
pub const SFLOW_HEADER_SIZE: u32 = 256;
pub const SFLOW_SAMPLING_RATE: u32 = 1;
pub const SFLOW_POLLING: u32 = 0;

/// One row of the switch's sampling table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingRow {
    pub agent_iface: String,
    pub targets: String,
    pub header: u32,
    pub sampling: u32,
    pub polling: u32,
    /// Stored under `external_ids.probe-id`; the reuse key.
    pub probe_id: String,
}

/// Transactional switch-control collaborator.
///
/// `find_sampling_row` selects on the sampling table by the
/// `external_ids.probe-id` entry and returns the row's `_uuid`;
/// `insert_sampling_row` returns the new row's `_uuid`;
/// `set_bridge_sflow` updates the bridge row's `sflow` reference
/// (`None` clears it).
pub trait SwitchClient: Send + Sync {
    fn find_sampling_row(&self, probe_id: &str) -> Result<Option<String>, AgentError>;
    fn insert_sampling_row(&self, row: &SamplingRow) -> Result<String, AgentError>;
    fn set_bridge_sflow(&self, bridge_uuid: &str, row_uuid: Option<&str>)
        -> Result<(), AgentError>;
}

/// Deterministic sampling-row tag for a bridge.
pub fn probe_id(bridge_uuid: &str) -> String {
    format!("TopoflowSFlowProbe_{}", bridge_uuid.replace('-', "_"))
}

fn is_ovs_bridge(n: &Node) -> bool {
    let has_uuid = n
        .metadata
        .get("UUID")
        .and_then(MetadataValue::as_str)
        .is_some_and(|u| !u.is_empty());
    has_uuid && n.metadata.get("Type").and_then(MetadataValue::as_str) == Some("ovsbridge")
}

fn bridge_uuid(n: &Node) -> Option<String> {
    n.metadata
        .get("UUID")
        .and_then(MetadataValue::as_str)
        .map(str::to_string)
}

/// Installs and removes sampling configuration on OVS bridges.
pub struct OvsProbeHandler {
    graph: Arc<Graph>,
    switch: Arc<dyn SwitchClient>,
    allocator: Arc<SflowAgentAllocator>,
    resolver: Arc<TopologyPathResolver>,
}

impl OvsProbeHandler {
    pub fn new(
        graph: Arc<Graph>,
        switch: Arc<dyn SwitchClient>,
        allocator: Arc<SflowAgentAllocator>,
        resolver: Arc<TopologyPathResolver>,
    ) -> Self {
        Self {
            graph,
            switch,
            allocator,
            resolver,
        }
    }

    /// Install sampling on a bridge node. Non-bridge nodes are ignored.
    pub fn register_probe(&self, node: &Node) -> Result<(), AgentError> {
        if !is_ovs_bridge(node) {
            return Ok(());
        }

        // The bridge must be attached to a host before sampling makes sense.
        let to_host = self.graph.lookup_shortest_path(
            &node.id,
            &metadata([("Type", "host")]),
            is_ownership_edge,
        );
        if to_host.is_empty() {
            return Err(AgentError::PathResolution(format!(
                "failed to determine probe path for {}",
                node.name()
            )));
        }

        let Some(uuid) = bridge_uuid(node) else {
            return Ok(());
        };
        let allocation = self.allocator.alloc(&uuid, self.resolver.clone())?;
        let agent = allocation.agent();

        let id = probe_id(&uuid);
        let row_uuid = match self.switch.find_sampling_row(&id)? {
            Some(existing) => {
                log::info!("using already registered sflow row {id}({existing})");
                existing
            }
            None => {
                let row = SamplingRow {
                    agent_iface: SFLOW_AGENT_IFACE.to_string(),
                    targets: agent.target(),
                    header: SFLOW_HEADER_SIZE,
                    sampling: SFLOW_SAMPLING_RATE,
                    polling: SFLOW_POLLING,
                    probe_id: id.clone(),
                };
                log::info!("registering new sflow row {id}");
                self.switch.insert_sampling_row(&row)?
            }
        };

        self.switch.set_bridge_sflow(&uuid, Some(&row_uuid))
    }

    /// Clear the bridge's sampling reference and release its agent. The row
    /// itself is left for the switch to garbage-collect.
    pub fn unregister_probe(&self, node: &Node) -> Result<(), AgentError> {
        if !is_ovs_bridge(node) {
            return Ok(());
        }
        let Some(uuid) = bridge_uuid(node) else {
            return Ok(());
        };
        self.switch.set_bridge_sflow(&uuid, None)?;
        self.allocator.release(&uuid);
        Ok(())
    }

    /// Force-expire every allocated agent's table. Testing path only.
    pub fn flush(&self) {
        for agent in self.allocator.agents() {
            agent.flush();
        }
    }

    pub fn stop(&self) {
        self.allocator.release_all();
        self.resolver.stop();
    }
}
