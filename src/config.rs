//! Graph description - serde JSON config to a built graph

use crate::graph::{Connection, GraphProcessor, NodeHandle, PortId};
use crate::nodes::{DeviceSinkNode, GainNode, IngestOptions, StreamIngestNode, WhiteNoiseNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// 設定の読み込み・構築の失敗理由
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate node name: {0}")]
    DuplicateName(String),
    #[error("connection references unknown node: {0}")]
    UnknownNode(String),
    #[error(transparent)]
    Graph(#[from] crate::graph::GraphError),
}

fn default_channels() -> usize {
    2
}

fn default_buffer_blocks() -> usize {
    4
}

fn default_backoff_ms() -> u64 {
    500
}

/// ノード定義
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeSpec {
    WhiteNoise {
        name: String,
        #[serde(default)]
        seed: Option<u32>,
    },
    Gain {
        name: String,
        gain_db: f32,
        #[serde(default)]
        ramp_seconds: f64,
        #[serde(default = "default_channels")]
        channels: usize,
    },
    Stream {
        name: String,
        path: PathBuf,
        #[serde(default = "default_channels")]
        channels: usize,
        #[serde(default = "default_buffer_blocks")]
        buffer_blocks: usize,
        #[serde(default = "default_backoff_ms")]
        reopen_backoff_ms: u64,
    },
    DeviceSink {
        name: String,
        #[serde(default = "default_channels")]
        channels: usize,
    },
}

impl NodeSpec {
    pub fn name(&self) -> &str {
        match self {
            NodeSpec::WhiteNoise { name, .. }
            | NodeSpec::Gain { name, .. }
            | NodeSpec::Stream { name, .. }
            | NodeSpec::DeviceSink { name, .. } => name,
        }
    }
}

/// 接続定義（ノードは名前で参照）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub source: String,
    #[serde(default)]
    pub source_channel: u8,
    pub destination: String,
    #[serde(default)]
    pub destination_channel: u8,
}

/// グラフ全体の設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
}

impl GraphConfig {
    /// Parse a JSON string
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// 設定どおりにノードと接続を組み上げる
    ///
    /// 成功すると名前 → ハンドルの対応表を返す。構築後に prepare
    /// するのは呼び出し側の責務。
    pub fn build(
        &self,
        processor: &GraphProcessor,
    ) -> Result<HashMap<String, NodeHandle>, ConfigError> {
        let mut handles: HashMap<String, NodeHandle> = HashMap::new();

        for spec in &self.nodes {
            if handles.contains_key(spec.name()) {
                return Err(ConfigError::DuplicateName(spec.name().to_string()));
            }

            let handle = match spec {
                NodeSpec::WhiteNoise { name, seed } => {
                    let node = match seed {
                        Some(seed) => WhiteNoiseNode::with_seed(name.clone(), *seed),
                        None => WhiteNoiseNode::new(name.clone()),
                    };
                    processor.add_node(Box::new(node))
                }
                NodeSpec::Gain {
                    name,
                    gain_db,
                    ramp_seconds,
                    channels,
                } => {
                    let mut node = GainNode::new(name.clone(), *channels);
                    node.set_ramp_seconds(*ramp_seconds);
                    node.set_gain_db(*gain_db);
                    processor.add_node(Box::new(node))
                }
                NodeSpec::Stream {
                    name,
                    path,
                    channels,
                    buffer_blocks,
                    reopen_backoff_ms,
                } => {
                    let options = IngestOptions {
                        path: path.clone(),
                        channels: *channels,
                        buffer_blocks: *buffer_blocks,
                        reopen_backoff: Duration::from_millis(*reopen_backoff_ms),
                    };
                    processor.add_node(Box::new(StreamIngestNode::new(name.clone(), options)))
                }
                NodeSpec::DeviceSink { name, channels } => {
                    processor.add_node(Box::new(DeviceSinkNode::new(name.clone(), *channels)))
                }
            };

            handles.insert(spec.name().to_string(), handle);
        }

        for conn in &self.connections {
            let source = *handles
                .get(&conn.source)
                .ok_or_else(|| ConfigError::UnknownNode(conn.source.clone()))?;
            let target = *handles
                .get(&conn.destination)
                .ok_or_else(|| ConfigError::UnknownNode(conn.destination.clone()))?;

            processor.add_connection(Connection::new(
                source,
                PortId::new(conn.source_channel),
                target,
                PortId::new(conn.destination_channel),
            ))?;
        }

        debug!(
            nodes = handles.len(),
            connections = self.connections.len(),
            "graph built from config"
        );
        Ok(handles)
    }
}
