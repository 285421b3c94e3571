//! White Noise Source

use crate::graph::{AudioBuffer, AudioNode, NodeType, PortId};
use std::any::Any;

const DEFAULT_SEED: u32 = 0x2F6E_2B1D;

/// ホワイトノイズソース
///
/// xorshift32 による一様ノイズ [-1.0, 1.0)。シードを固定すれば
/// 出力は決定的になる。出力 1 ポート。
pub struct WhiteNoiseNode {
    /// 表示ラベル
    label: String,
    /// PRNG 状態
    state: u32,
    /// reset 用の初期シード
    seed: u32,
    /// 出力バッファ（モノラル = 1ポート）
    output_buffers: Vec<AudioBuffer>,
}

impl WhiteNoiseNode {
    /// Create a new noise source with the default seed
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_seed(label, DEFAULT_SEED)
    }

    /// Create a new noise source with an explicit seed
    pub fn with_seed(label: impl Into<String>, seed: u32) -> Self {
        let seed = if seed == 0 { DEFAULT_SEED } else { seed };
        Self {
            label: label.into(),
            state: seed,
            seed,
            output_buffers: vec![AudioBuffer::new()],
        }
    }

    fn next_sample(&mut self) -> f32 {
        // xorshift32
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        // 上位 24bit を [0, 1) に正規化して [-1, 1) へ
        (x >> 8) as f32 * (1.0 / 16_777_216.0) * 2.0 - 1.0
    }
}

impl AudioNode for WhiteNoiseNode {
    fn node_type(&self) -> NodeType {
        NodeType::Source
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn input_port_count(&self) -> usize {
        0 // ソースは入力なし
    }

    fn output_port_count(&self) -> usize {
        self.output_buffers.len()
    }

    fn input_buffer(&self, _port: PortId) -> Option<&AudioBuffer> {
        None
    }

    fn input_buffer_mut(&mut self, _port: PortId) -> Option<&mut AudioBuffer> {
        None
    }

    fn output_buffer(&self, port: PortId) -> Option<&AudioBuffer> {
        self.output_buffers.get(port.index())
    }

    fn output_buffer_mut(&mut self, port: PortId) -> Option<&mut AudioBuffer> {
        self.output_buffers.get_mut(port.index())
    }

    fn prepare(&mut self, _sample_rate: f64, _block_size: usize) {}

    fn process(&mut self, frames: usize) {
        for i in 0..frames.min(crate::graph::MAX_FRAMES) {
            let sample = self.next_sample();
            self.output_buffers[0].samples_mut()[i] = sample;
        }
        self.output_buffers[0].update_peak();
    }

    fn release(&mut self) {}

    fn reset(&mut self) {
        self.state = self.seed;
    }

    fn clear_buffers(&mut self, frames: usize) {
        for buf in &mut self.output_buffers {
            buf.clear(frames);
        }
    }

    fn input_peak_levels(&self) -> Vec<f32> {
        Vec::new()
    }

    fn output_peak_levels(&self) -> Vec<f32> {
        self.output_buffers
            .iter()
            .map(|b| b.cached_peak())
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
