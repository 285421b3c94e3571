//! Audio Graph - DAG-based routing with topological sort

use super::edge::{Connection, Edge, EdgeId};
use super::node::{AudioNode, NodeHandle, NodeState};
use super::MAX_FRAMES;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

/// グラフ編集の失敗理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown node handle {0}")]
    UnknownNode(u32),
    #[error("port {port} out of range on node {node}")]
    InvalidPort { node: u32, port: u8 },
    #[error("connection already exists")]
    DuplicateConnection,
    #[error("connection would create a cycle")]
    CycleDetected,
}

/// prepare 済みグラフの再生条件
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepareSpec {
    pub sample_rate: f64,
    pub block_size: usize,
}

struct NodeEntry {
    node: Box<dyn AudioNode>,
    state: NodeState,
}

/// オーディオグラフ
///
/// ノードとエッジを所有し、トポロジカルソートで処理順序を決定する。
/// 閉路は編集時に拒否されるため、レンダーパスでの検査は不要。
pub struct AudioGraph {
    /// ノード格納（アリーナ所有）
    nodes: HashMap<NodeHandle, NodeEntry>,
    /// エッジ
    edges: Vec<Edge>,
    /// 処理順序（トポロジカルソート済み）
    processing_order: Vec<NodeHandle>,
    /// 次のノードハンドル
    next_handle: u32,
    /// 次のエッジID
    next_edge_id: u32,
    /// グラフが変更されたかどうか (rebuild needed)
    dirty: bool,
    /// prepare 済みなら Some
    prepared: Option<PrepareSpec>,
}

impl AudioGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            processing_order: Vec::new(),
            next_handle: 1, // Start from 1 (0 is reserved)
            next_edge_id: 1,
            dirty: false,
            prepared: None,
        }
    }

    /// ノードを追加
    ///
    /// 追加直後のノードは不活性（無音）。グラフを prepare（または
    /// 再 prepare）するまで process されない。
    pub fn add_node(&mut self, node: Box<dyn AudioNode>) -> NodeHandle {
        let handle = NodeHandle::new(self.next_handle);
        self.next_handle += 1;
        debug!(node = handle.raw(), label = node.label(), "add node");
        self.nodes.insert(
            handle,
            NodeEntry {
                node,
                state: NodeState::Created,
            },
        );
        self.dirty = true;
        handle
    }

    /// ノードを削除（関連エッジも自動削除）
    pub fn remove_node(&mut self, handle: NodeHandle) -> bool {
        match self.nodes.remove(&handle) {
            Some(mut entry) => {
                if entry.state == NodeState::Prepared {
                    entry.node.release();
                }
                // このノードに触れるエッジだけを削除
                self.edges
                    .retain(|e| e.source() != handle && e.target() != handle);
                self.dirty = true;
                debug!(node = handle.raw(), "remove node");
                true
            }
            None => false,
        }
    }

    /// ノードを取得
    pub fn get_node(&self, handle: NodeHandle) -> Option<&dyn AudioNode> {
        self.nodes.get(&handle).map(|e| e.node.as_ref())
    }

    /// ノードを取得（可変）
    pub fn get_node_mut(&mut self, handle: NodeHandle) -> Option<&mut (dyn AudioNode + '_)> {
        match self.nodes.get_mut(&handle) {
            Some(entry) => Some(&mut *entry.node),
            None => None,
        }
    }

    /// ノードのライフサイクル状態を取得
    pub fn node_state(&self, handle: NodeHandle) -> Option<NodeState> {
        self.nodes.get(&handle).map(|e| e.state)
    }

    /// すべてのノードハンドルを取得
    pub fn node_handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.keys().copied()
    }

    /// ノード数を取得
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// 接続を検証（変更なし）
    ///
    /// 端点の存在、ポート範囲、重複、閉路をこの順で検査する。
    pub fn validate_connection(&self, conn: &Connection) -> Result<(), GraphError> {
        let source = self
            .nodes
            .get(&conn.source)
            .ok_or(GraphError::UnknownNode(conn.source.raw()))?;
        let target = self
            .nodes
            .get(&conn.target)
            .ok_or(GraphError::UnknownNode(conn.target.raw()))?;

        if conn.source_port.index() >= source.node.output_port_count() {
            return Err(GraphError::InvalidPort {
                node: conn.source.raw(),
                port: conn.source_port.into(),
            });
        }
        if conn.target_port.index() >= target.node.input_port_count() {
            return Err(GraphError::InvalidPort {
                node: conn.target.raw(),
                port: conn.target_port.into(),
            });
        }

        if self.edges.iter().any(|e| e.connection == *conn) {
            return Err(GraphError::DuplicateConnection);
        }

        if self.would_cycle(conn) {
            return Err(GraphError::CycleDetected);
        }

        Ok(())
    }

    /// 接続できるか（純粋な検査、変更なし）
    pub fn can_connect(&self, conn: &Connection) -> bool {
        self.validate_connection(conn).is_ok()
    }

    /// エッジを追加
    pub fn add_connection(&mut self, conn: Connection) -> Result<EdgeId, GraphError> {
        self.validate_connection(&conn)?;

        let id = EdgeId::new(self.next_edge_id);
        self.next_edge_id += 1;
        self.edges.push(Edge::new(id, conn));
        self.dirty = true;
        debug!(
            source = conn.source.raw(),
            target = conn.target.raw(),
            "add connection"
        );
        Ok(id)
    }

    /// 接続を削除（4つ組で指定）
    pub fn remove_connection(&mut self, conn: &Connection) -> bool {
        let len_before = self.edges.len();
        self.edges.retain(|e| e.connection != *conn);
        let removed = self.edges.len() < len_before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// エッジを削除（ID で指定）
    pub fn remove_edge(&mut self, id: EdgeId) -> bool {
        let len_before = self.edges.len();
        self.edges.retain(|e| e.id != id);
        let removed = self.edges.len() < len_before;
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// エッジを取得
    pub fn get_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// エッジを取得（可変）
    pub fn get_edge_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        self.edges.iter_mut().find(|e| e.id == id)
    }

    /// すべてのエッジを取得
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// エッジ数を取得
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// エッジのゲインを更新（リビルド不要）
    pub fn set_edge_gain(&mut self, id: EdgeId, gain: f32) -> bool {
        if let Some(edge) = self.edges.iter_mut().find(|e| e.id == id) {
            edge.set_gain(gain);
            true
        } else {
            false
        }
    }

    /// エッジのミュートを更新（リビルド不要）
    pub fn set_edge_muted(&mut self, id: EdgeId, muted: bool) -> bool {
        if let Some(edge) = self.edges.iter_mut().find(|e| e.id == id) {
            edge.set_muted(muted);
            true
        } else {
            false
        }
    }

    /// ターゲットノードへのエッジを取得
    pub fn edges_to(&self, target: NodeHandle) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.target() == target)
    }

    /// ソースノードからのエッジを取得
    pub fn edges_from(&self, source: NodeHandle) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.source() == source)
    }

    /// 候補エッジが閉路を作るか
    ///
    /// target から既存エッジを辿って source に到達できるなら、
    /// source → target を足した瞬間に閉路になる。
    fn would_cycle(&self, conn: &Connection) -> bool {
        if conn.source == conn.target {
            return true;
        }

        let mut visited: Vec<NodeHandle> = Vec::new();
        let mut stack: Vec<NodeHandle> = vec![conn.target];

        while let Some(current) = stack.pop() {
            if current == conn.source {
                return true;
            }
            if visited.contains(&current) {
                continue;
            }
            visited.push(current);

            for edge in self.edges.iter().filter(|e| e.source() == current) {
                stack.push(edge.target());
            }
        }

        false
    }

    /// 処理順序を取得
    pub fn processing_order(&self) -> &[NodeHandle] {
        &self.processing_order
    }

    /// 処理順序を再計算（必要な場合のみ）
    pub fn rebuild_order_if_needed(&mut self) {
        if self.dirty {
            self.rebuild_order();
        }
    }

    /// 処理順序を再計算
    pub fn rebuild_order(&mut self) {
        self.processing_order = self.topological_sort();
        self.dirty = false;
    }

    /// トポロジカルソート (Kahn's algorithm)
    ///
    /// レディ集合を最小ヒープで持ち、同率はハンドル昇順で解決する。
    /// 同じグラフからは常に同じ順序が得られる。
    fn topological_sort(&self) -> Vec<NodeHandle> {
        let mut in_degree: HashMap<NodeHandle, usize> = HashMap::new();
        let mut adjacency: HashMap<NodeHandle, Vec<NodeHandle>> = HashMap::new();

        for &handle in self.nodes.keys() {
            in_degree.insert(handle, 0);
            adjacency.insert(handle, Vec::new());
        }

        // ノード間の重複エッジ（別ポート）は 1 本として数える
        for edge in &self.edges {
            if let Some(adj) = adjacency.get_mut(&edge.source()) {
                if !adj.contains(&edge.target()) {
                    adj.push(edge.target());
                    if let Some(deg) = in_degree.get_mut(&edge.target()) {
                        *deg += 1;
                    }
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<NodeHandle>> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&handle, _)| Reverse(handle))
            .collect();

        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(handle)) = ready.pop() {
            result.push(handle);

            if let Some(neighbors) = adjacency.get(&handle) {
                for &neighbor in neighbors {
                    if let Some(deg) = in_degree.get_mut(&neighbor) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            ready.push(Reverse(neighbor));
                        }
                    }
                }
            }
        }

        // 編集時に閉路を拒否しているため起こらないはず
        if result.len() != self.nodes.len() {
            warn!(
                processed = result.len(),
                total = self.nodes.len(),
                "cycle detected during sort"
            );
        }

        result
    }

    /// グラフが prepare 済みか
    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    /// 現在の再生条件を取得
    pub fn prepare_spec(&self) -> Option<PrepareSpec> {
        self.prepared
    }

    /// 再生準備
    ///
    /// 処理順でノードを prepare する。Created / Released のノードも
    /// ここで Prepared に昇格する（再 prepare 可）。
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize) {
        let block_size = block_size.min(MAX_FRAMES);
        self.rebuild_order_if_needed();

        for i in 0..self.processing_order.len() {
            let handle = self.processing_order[i];
            if let Some(entry) = self.nodes.get_mut(&handle) {
                entry.node.prepare(sample_rate, block_size);
                entry.state = NodeState::Prepared;
            }
        }

        self.prepared = Some(PrepareSpec {
            sample_rate,
            block_size,
        });
    }

    /// リソース解放
    ///
    /// 冪等。以降 render_block は無音になる。
    pub fn release(&mut self) {
        for entry in self.nodes.values_mut() {
            if entry.state == NodeState::Prepared {
                entry.node.release();
                entry.state = NodeState::Released;
            }
        }
        self.prepared = None;
    }

    /// 1 ブロックをレンダー（ホットパス、確保なし）
    ///
    /// 1. 全ノードのバッファをクリア
    /// 2. 処理順に、各ノードへの有効な入力エッジを加算ミックス
    /// 3. Prepared のノードのみ process（それ以外は無音のまま）
    pub fn render_block(&mut self, frames: usize) {
        if self.prepared.is_none() {
            return;
        }
        self.rebuild_order_if_needed();
        let frames = frames.min(MAX_FRAMES);

        let Self {
            nodes,
            edges,
            processing_order,
            ..
        } = self;

        for handle in processing_order.iter() {
            if let Some(entry) = nodes.get_mut(handle) {
                entry.node.clear_buffers(frames);
            }
        }

        for &handle in processing_order.iter() {
            for edge in edges.iter().filter(|e| e.target() == handle && e.is_active()) {
                let (source, target) = (edge.source(), edge.target());
                if source == target {
                    continue;
                }
                let [Some(src_entry), Some(tgt_entry)] =
                    nodes.get_disjoint_mut([&source, &target])
                else {
                    continue;
                };

                let Some(src_buf) = src_entry.node.output_buffer(edge.source_port()) else {
                    continue;
                };
                if let Some(tgt_buf) = tgt_entry.node.input_buffer_mut(edge.target_port()) {
                    tgt_buf.mix_from(src_buf, edge.gain);
                }
            }

            if let Some(entry) = nodes.get_mut(&handle) {
                if entry.state == NodeState::Prepared {
                    entry.node.process(frames);
                }
            }
        }
    }
}

impl Default for AudioGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PortId;
    use crate::nodes::gain::GainNode;
    use crate::nodes::noise::WhiteNoiseNode;
    use crate::nodes::sink::DeviceSinkNode;

    fn conn(s: NodeHandle, sp: u8, t: NodeHandle, tp: u8) -> Connection {
        Connection::new(s, PortId::new(sp), t, PortId::new(tp))
    }

    #[test]
    fn test_add_remove_node() {
        let mut graph = AudioGraph::new();

        let handle = graph.add_node(Box::new(WhiteNoiseNode::new("Test")));
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(handle).is_some());
        assert_eq!(graph.node_state(handle), Some(NodeState::Created));
        assert_eq!(graph.node_handles().collect::<Vec<_>>(), vec![handle]);

        assert!(graph.remove_node(handle));
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.node_handles().count(), 0);
        assert!(!graph.remove_node(handle));
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let mut graph = AudioGraph::new();
        let src = graph.add_node(Box::new(WhiteNoiseNode::new("Src")));
        let sink = graph.add_node(Box::new(DeviceSinkNode::new("Out", 2)));

        let c = conn(src, 0, sink, 0);
        assert!(graph.add_connection(c).is_ok());
        assert_eq!(
            graph.add_connection(c),
            Err(GraphError::DuplicateConnection)
        );
        // 別ポートなら可
        assert!(graph.add_connection(conn(src, 0, sink, 1)).is_ok());
    }

    #[test]
    fn test_port_range_validated() {
        let mut graph = AudioGraph::new();
        let src = graph.add_node(Box::new(WhiteNoiseNode::new("Src")));
        let sink = graph.add_node(Box::new(DeviceSinkNode::new("Out", 2)));

        // ノイズは出力 1 ポートのみ
        assert!(matches!(
            graph.add_connection(conn(src, 1, sink, 0)),
            Err(GraphError::InvalidPort { .. })
        ));
        assert!(matches!(
            graph.add_connection(conn(src, 0, sink, 2)),
            Err(GraphError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut graph = AudioGraph::new();
        let src = graph.add_node(Box::new(WhiteNoiseNode::new("Src")));
        let ghost = NodeHandle::from_raw(999);

        assert_eq!(
            graph.add_connection(conn(src, 0, ghost, 0)),
            Err(GraphError::UnknownNode(999))
        );
    }

    #[test]
    fn test_cycle_rejected() {
        let mut graph = AudioGraph::new();
        let a = graph.add_node(Box::new(GainNode::new("A", 1)));
        let b = graph.add_node(Box::new(GainNode::new("B", 1)));

        assert!(graph.add_connection(conn(a, 0, b, 0)).is_ok());
        assert!(!graph.can_connect(&conn(b, 0, a, 0)));
        assert_eq!(
            graph.add_connection(conn(b, 0, a, 0)),
            Err(GraphError::CycleDetected)
        );
        // 自己ループも閉路
        assert_eq!(
            graph.add_connection(conn(a, 0, a, 0)),
            Err(GraphError::CycleDetected)
        );
        // 失敗してもグラフは変わらない
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_indirect_cycle_rejected() {
        let mut graph = AudioGraph::new();
        let a = graph.add_node(Box::new(GainNode::new("A", 1)));
        let b = graph.add_node(Box::new(GainNode::new("B", 1)));
        let c = graph.add_node(Box::new(GainNode::new("C", 1)));

        graph.add_connection(conn(a, 0, b, 0)).unwrap();
        graph.add_connection(conn(b, 0, c, 0)).unwrap();
        assert_eq!(
            graph.add_connection(conn(c, 0, a, 0)),
            Err(GraphError::CycleDetected)
        );
    }

    #[test]
    fn test_topological_order_property() {
        let mut graph = AudioGraph::new();

        let src = graph.add_node(Box::new(WhiteNoiseNode::new("Src")));
        let bus = graph.add_node(Box::new(GainNode::new("Bus", 1)));
        let sink = graph.add_node(Box::new(DeviceSinkNode::new("Out", 2)));

        graph.add_connection(conn(src, 0, bus, 0)).unwrap();
        graph.add_connection(conn(bus, 0, sink, 0)).unwrap();

        graph.rebuild_order();

        let order = graph.processing_order();
        assert_eq!(order.len(), 3);

        // すべてのエッジで source が target より先
        for edge in graph.edges() {
            let s = order.iter().position(|&h| h == edge.source()).unwrap();
            let t = order.iter().position(|&h| h == edge.target()).unwrap();
            assert!(s < t);
        }
    }

    #[test]
    fn test_topological_order_tie_break_by_handle() {
        let mut graph = AudioGraph::new();
        // 独立ノードはハンドル昇順で並ぶ
        let a = graph.add_node(Box::new(WhiteNoiseNode::new("A")));
        let b = graph.add_node(Box::new(WhiteNoiseNode::new("B")));
        let c = graph.add_node(Box::new(WhiteNoiseNode::new("C")));

        graph.rebuild_order();
        assert_eq!(graph.processing_order(), &[a, b, c]);
    }

    #[test]
    fn test_remove_node_drops_exactly_its_edges() {
        let mut graph = AudioGraph::new();
        let a = graph.add_node(Box::new(GainNode::new("A", 1)));
        let b = graph.add_node(Box::new(GainNode::new("B", 1)));
        let c = graph.add_node(Box::new(GainNode::new("C", 1)));

        graph.add_connection(conn(a, 0, b, 0)).unwrap();
        graph.add_connection(conn(b, 0, c, 0)).unwrap();
        graph.add_connection(conn(a, 0, c, 0)).unwrap();

        assert!(graph.remove_node(b));

        assert_eq!(graph.edge_count(), 1);
        let remaining = &graph.edges()[0];
        assert_eq!(remaining.source(), a);
        assert_eq!(remaining.target(), c);
    }

    #[test]
    fn test_edge_queries_by_endpoint() {
        let mut graph = AudioGraph::new();
        let a = graph.add_node(Box::new(WhiteNoiseNode::new("A")));
        let b = graph.add_node(Box::new(WhiteNoiseNode::new("B")));
        let sink = graph.add_node(Box::new(DeviceSinkNode::new("Out", 2)));

        let id_a = graph.add_connection(conn(a, 0, sink, 0)).unwrap();
        let id_b = graph.add_connection(conn(b, 0, sink, 1)).unwrap();

        // 入力側: sink には 2 本、ソースには 0 本
        let inbound: Vec<EdgeId> = graph.edges_to(sink).map(|e| e.id).collect();
        assert_eq!(inbound, vec![id_a, id_b]);
        assert_eq!(graph.edges_to(a).count(), 0);

        // 出力側: 各ソースから 1 本ずつ
        assert_eq!(graph.edges_from(a).map(|e| e.id).collect::<Vec<_>>(), vec![id_a]);
        assert_eq!(graph.edges_from(b).map(|e| e.id).collect::<Vec<_>>(), vec![id_b]);

        let edge = graph.get_edge(id_b).unwrap();
        assert_eq!(edge.source(), b);
        assert_eq!(edge.gain, 1.0);
        assert!(graph.get_edge(EdgeId::new(999)).is_none());
    }

    #[test]
    fn test_remove_connection_by_tuple() {
        let mut graph = AudioGraph::new();
        let src = graph.add_node(Box::new(WhiteNoiseNode::new("Src")));
        let sink = graph.add_node(Box::new(DeviceSinkNode::new("Out", 2)));

        let c = conn(src, 0, sink, 0);
        graph.add_connection(c).unwrap();
        assert!(graph.remove_connection(&c));
        assert!(!graph.remove_connection(&c));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_prepare_release_lifecycle() {
        let mut graph = AudioGraph::new();
        let src = graph.add_node(Box::new(WhiteNoiseNode::new("Src")));

        assert!(!graph.is_prepared());
        assert!(graph.prepare_spec().is_none());
        graph.prepare(48000.0, 512);
        assert!(graph.is_prepared());
        assert_eq!(
            graph.prepare_spec(),
            Some(PrepareSpec {
                sample_rate: 48000.0,
                block_size: 512
            })
        );
        assert_eq!(graph.node_state(src), Some(NodeState::Prepared));

        graph.release();
        assert!(!graph.is_prepared());
        assert!(graph.prepare_spec().is_none());
        assert_eq!(graph.node_state(src), Some(NodeState::Released));

        // 再 prepare で復帰
        graph.prepare(44100.0, 256);
        assert_eq!(graph.node_state(src), Some(NodeState::Prepared));
    }
}
