//! Audio Routing Graph - DAG of processing nodes
//!
//! ノードは処理のみを行い、ルーティングとレベル制御は Edge が担う。
//! 閉路は編集時に拒否され、レンダーパスは常に確保なしで走る。

mod buffer;
mod edge;
mod graph;
mod meters;
mod node;

pub mod processor;

pub use buffer::AudioBuffer;
pub use edge::{Connection, Edge, EdgeId};
pub use graph::{AudioGraph, GraphError, PrepareSpec};
pub use meters::{GraphMeters, NodeMeter, PortMeter};
pub use node::{AudioNode, NodeHandle, NodeState, NodeType, PortId};
pub use processor::GraphProcessor;

/// Maximum frames per audio callback
pub const MAX_FRAMES: usize = 4096;
