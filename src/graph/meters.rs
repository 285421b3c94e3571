//! Metering types

use super::node::NodeHandle;

/// Port meter (single channel)
#[derive(Debug, Clone, Default)]
pub struct PortMeter {
    pub peak: f32,
}

impl PortMeter {
    pub fn new(peak: f32) -> Self {
        Self { peak }
    }
}

/// Node meter (all ports)
#[derive(Debug, Clone)]
pub struct NodeMeter {
    pub handle: NodeHandle,
    pub inputs: Vec<PortMeter>,
    pub outputs: Vec<PortMeter>,
}

impl NodeMeter {
    pub fn new(handle: NodeHandle) -> Self {
        Self {
            handle,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

/// All meters for the graph
#[derive(Debug, Clone, Default)]
pub struct GraphMeters {
    pub nodes: Vec<NodeMeter>,
    pub timestamp: u64,
}

impl GraphMeters {
    pub fn new() -> Self {
        Self::default()
    }
}
