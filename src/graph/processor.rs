//! Graph Processor - locking shell around the graph

use super::edge::{Connection, EdgeId};
use super::graph::{AudioGraph, GraphError};
use super::meters::{GraphMeters, NodeMeter, PortMeter};
use super::node::{AudioNode, NodeHandle, NodeType, PortId};
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// グラフプロセッサ
///
/// グラフを RwLock で包み、制御スレッドの編集とレンダースレッドの
/// 処理を調停する。レンダー側は try_write で、取れなければその
/// ブロックをスキップする（無音）。ブロックして待つことはない。
pub struct GraphProcessor {
    /// The audio graph (RwLock for synchronized access)
    graph: Arc<RwLock<AudioGraph>>,
    /// Meters (ArcSwap for lock-free reads from UI thread)
    meters: Arc<ArcSwap<GraphMeters>>,
    /// Rendered block count
    timestamp: AtomicU64,
}

impl GraphProcessor {
    /// Create a new graph processor
    pub fn new() -> Self {
        Self {
            graph: Arc::new(RwLock::new(AudioGraph::new())),
            meters: Arc::new(ArcSwap::from_pointee(GraphMeters::new())),
            timestamp: AtomicU64::new(0),
        }
    }

    /// Add a node to the graph
    pub fn add_node(&self, node: Box<dyn AudioNode>) -> NodeHandle {
        let mut graph = self.graph.write();
        let handle = graph.add_node(node);
        graph.rebuild_order_if_needed();
        handle
    }

    /// Remove a node from the graph
    pub fn remove_node(&self, handle: NodeHandle) -> bool {
        let mut graph = self.graph.write();
        let result = graph.remove_node(handle);
        if result {
            graph.rebuild_order_if_needed();
        }
        result
    }

    /// Check whether a connection would be accepted
    pub fn can_connect(&self, conn: &Connection) -> bool {
        self.graph.read().can_connect(conn)
    }

    /// Add a connection to the graph
    pub fn add_connection(&self, conn: Connection) -> Result<EdgeId, GraphError> {
        let mut graph = self.graph.write();
        let id = graph.add_connection(conn)?;
        graph.rebuild_order_if_needed();
        Ok(id)
    }

    /// Remove a connection (by endpoint tuple)
    pub fn remove_connection(&self, conn: &Connection) -> bool {
        let mut graph = self.graph.write();
        let result = graph.remove_connection(conn);
        if result {
            graph.rebuild_order_if_needed();
        }
        result
    }

    /// Remove an edge (by id)
    pub fn remove_edge(&self, edge_id: EdgeId) -> bool {
        let mut graph = self.graph.write();
        let result = graph.remove_edge(edge_id);
        if result {
            graph.rebuild_order_if_needed();
        }
        result
    }

    /// Set edge gain
    pub fn set_edge_gain(&self, edge_id: EdgeId, gain: f32) -> bool {
        self.graph.write().set_edge_gain(edge_id, gain)
    }

    /// Set edge muted state
    pub fn set_edge_muted(&self, edge_id: EdgeId, muted: bool) -> bool {
        self.graph.write().set_edge_muted(edge_id, muted)
    }

    /// 再生準備（制御スレッドから）
    pub fn prepare(&self, sample_rate: f64, block_size: usize) {
        self.graph.write().prepare(sample_rate, block_size);
    }

    /// リソース解放（制御スレッドから）
    pub fn release(&self) {
        self.graph.write().release();
    }

    /// Execute with read access to the graph
    pub fn with_graph<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&AudioGraph) -> R,
    {
        let graph = self.graph.read();
        f(&graph)
    }

    /// Execute with write access to the graph
    pub fn with_graph_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut AudioGraph) -> R,
    {
        let mut graph = self.graph.write();
        let result = f(&mut graph);
        graph.rebuild_order_if_needed();
        result
    }

    /// オーディオ処理を実行
    ///
    /// Called from the audio callback. Returns false if the graph was
    /// locked by an editor (the block is skipped and sinks keep their
    /// previous cache).
    pub fn process_block(&self, frames: usize) -> bool {
        let Some(mut graph) = self.graph.try_write() else {
            return false; // Skip if locked
        };

        graph.render_block(frames);
        self.timestamp.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Number of blocks rendered so far
    pub fn rendered_blocks(&self) -> u64 {
        self.timestamp.load(Ordering::Relaxed)
    }

    /// Get the latest meter snapshot (lock-free read)
    pub fn meters(&self) -> Arc<GraphMeters> {
        self.meters.load_full()
    }

    /// メータースナップショットを採取（制御スレッドから）
    ///
    /// レンダーパスはバッファ内のピークキャッシュを更新するだけで、
    /// スナップショット構築はここで行う。グラフが取れなければ
    /// 前回のスナップショットを返す。
    pub fn collect_meters(&self) -> Arc<GraphMeters> {
        let Some(graph) = self.graph.try_read() else {
            return self.meters.load_full();
        };

        let mut meters = GraphMeters::new();
        meters.timestamp = self.timestamp.load(Ordering::Relaxed);

        for &handle in graph.processing_order() {
            if let Some(node) = graph.get_node(handle) {
                let mut node_meter = NodeMeter::new(handle);
                for level in node.input_peak_levels() {
                    node_meter.inputs.push(PortMeter::new(level));
                }
                for level in node.output_peak_levels() {
                    node_meter.outputs.push(PortMeter::new(level));
                }
                meters.nodes.push(node_meter);
            }
        }

        drop(graph);
        let snapshot = Arc::new(meters);
        self.meters.store(snapshot.clone());
        snapshot
    }

    /// シンクノードの入力を読み出す（出力コールバック用）
    pub fn read_sink_output(
        &self,
        handle: NodeHandle,
        channel: usize,
        output: &mut [f32],
    ) -> bool {
        // Try to get read access - if locked, return silence
        let Some(graph) = self.graph.try_read() else {
            output.fill(0.0);
            return false;
        };

        if let Some(node) = graph.get_node(handle) {
            if node.node_type() != NodeType::Sink {
                output.fill(0.0);
                return false;
            }

            if let Some(buf) = node.input_buffer(PortId::new(channel as u8)) {
                let samples = buf.samples();
                let len = output.len().min(samples.len());
                output[..len].copy_from_slice(&samples[..len]);
                // Zero-fill remaining
                output[len..].fill(0.0);
                return true;
            }
        }

        output.fill(0.0);
        false
    }
}

impl Default for GraphProcessor {
    fn default() -> Self {
        Self::new()
    }
}
