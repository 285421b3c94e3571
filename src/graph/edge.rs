//! Edge (Send) and connection identity

use super::node::{NodeHandle, PortId};

/// Edge の一意識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(u32);

impl EdgeId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl From<u32> for EdgeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<EdgeId> for u32 {
    fn from(edge: EdgeId) -> Self {
        edge.0
    }
}

/// 接続の同一性（4つ組）
///
/// 同じ 4つ組の接続は 1 本しか存在できない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub source: NodeHandle,
    pub source_port: PortId,
    pub target: NodeHandle,
    pub target_port: PortId,
}

impl Connection {
    pub fn new(
        source: NodeHandle,
        source_port: PortId,
        target: NodeHandle,
        target_port: PortId,
    ) -> Self {
        Self {
            source,
            source_port,
            target,
            target_port,
        }
    }
}

/// エッジ（送り）
///
/// ソースノードの出力ポートからターゲットノードの入力ポートへの接続。
/// レベル制御（ゲイン・ミュート）はここで行う。既定値 gain=1.0,
/// muted=false なら純粋な加算ミックスになる。
#[derive(Debug, Clone)]
pub struct Edge {
    /// 一意な識別子
    pub id: EdgeId,
    /// 接続の同一性
    pub connection: Connection,
    /// 送りレベル（リニアゲイン 0.0 ~ 2.0+）
    pub gain: f32,
    /// ミュート
    pub muted: bool,
}

impl Edge {
    /// Create a new edge
    pub fn new(id: EdgeId, connection: Connection) -> Self {
        Self {
            id,
            connection,
            gain: 1.0,
            muted: false,
        }
    }

    pub fn source(&self) -> NodeHandle {
        self.connection.source
    }

    pub fn source_port(&self) -> PortId {
        self.connection.source_port
    }

    pub fn target(&self) -> NodeHandle {
        self.connection.target
    }

    pub fn target_port(&self) -> PortId {
        self.connection.target_port
    }

    /// このエッジが有効か（ミュートされておらず、ゲインがある）
    pub fn is_active(&self) -> bool {
        !self.muted && self.gain > 0.0001
    }

    /// Set gain (clamped to non-negative)
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.max(0.0);
    }

    /// Set muted state
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }
}
