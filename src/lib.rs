//! patchbay - real-time audio routing graph engine
//!
//! ノードの DAG をブロック単位でレンダーする。編集は制御スレッド、
//! レンダーはデバイスのコールバックスレッドから。
//!
//! - [`graph`]: グラフ本体（ノード・エッジ・処理順・レンダー）
//! - [`nodes`]: ノード実装（ノイズ・ゲイン・ストリーム取り込み・シンク）
//! - [`device`]: デバイスブリッジとコールバック配線
//! - [`config`]: JSON 設定からのグラフ構築

pub mod config;
pub mod device;
pub mod graph;
pub mod nodes;

pub use config::{ConfigError, GraphConfig};
pub use device::{BridgeState, DeviceBridge, DeviceError, GraphRenderCallback, IoCallback, IoDevice};
pub use graph::{
    AudioGraph, Connection, GraphError, GraphProcessor, NodeHandle, NodeState, NodeType, PortId,
};
pub use nodes::{DeviceSinkNode, GainNode, IngestOptions, StreamIngestNode, WhiteNoiseNode};
