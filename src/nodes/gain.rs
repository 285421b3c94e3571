//! Gain Stage - dB gain with linear ramp

use crate::graph::{AudioBuffer, AudioNode, NodeType, PortId};
use std::any::Any;

/// dB → リニアゲイン
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

/// ゲインステージ
///
/// 入出力とも N ポート（対称）。ゲインは dB で設定し、リニアゲインを
/// 毎サンプル線形ランプで目標値へ動かす。ランプの最終サンプルは
/// 丸め誤差なしで目標値に着地する。0 dB かつランプなしなら
/// ビット単位のパススルー。
pub struct GainNode {
    /// 表示ラベル
    label: String,
    /// 設定値（dB）
    gain_db: f32,
    /// 目標リニアゲイン
    target_gain: f32,
    /// 現在のリニアゲイン（ブロック間で持ち越す）
    current_gain: f32,
    /// ランプの 1 サンプルあたり増分
    step: f32,
    /// ランプ残りサンプル数
    ramp_remaining: usize,
    /// ランプ時間（秒）
    ramp_seconds: f64,
    sample_rate: f64,
    prepared: bool,
    /// 入力バッファ
    input_buffers: Vec<AudioBuffer>,
    /// 出力バッファ
    output_buffers: Vec<AudioBuffer>,
}

impl GainNode {
    /// Create a new gain node (0 dB, no ramp)
    pub fn new(label: impl Into<String>, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            label: label.into(),
            gain_db: 0.0,
            target_gain: 1.0,
            current_gain: 1.0,
            step: 0.0,
            ramp_remaining: 0,
            ramp_seconds: 0.0,
            sample_rate: 0.0,
            prepared: false,
            input_buffers: (0..channels).map(|_| AudioBuffer::new()).collect(),
            output_buffers: (0..channels).map(|_| AudioBuffer::new()).collect(),
        }
    }

    /// Get the configured gain in dB
    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// 現在の瞬時リニアゲイン
    pub fn current_gain(&self) -> f32 {
        self.current_gain
    }

    /// ランプ時間を設定（秒、0 で即時）
    pub fn set_ramp_seconds(&mut self, seconds: f64) {
        self.ramp_seconds = seconds.max(0.0);
    }

    /// ゲインを設定（dB）
    ///
    /// prepare 済みでランプ時間があれば ramp_seconds かけて目標へ。
    /// それ以外は即座にスナップする。
    pub fn set_gain_db(&mut self, db: f32) {
        self.gain_db = db;
        self.target_gain = db_to_linear(db);

        let ramp_samples = (self.ramp_seconds * self.sample_rate).round() as usize;
        if self.prepared && ramp_samples > 0 {
            self.step = (self.target_gain - self.current_gain) / ramp_samples as f32;
            self.ramp_remaining = ramp_samples;
        } else {
            self.current_gain = self.target_gain;
            self.step = 0.0;
            self.ramp_remaining = 0;
        }
    }
}

impl AudioNode for GainNode {
    fn node_type(&self) -> NodeType {
        NodeType::Bus
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn input_port_count(&self) -> usize {
        self.input_buffers.len()
    }

    fn output_port_count(&self) -> usize {
        self.output_buffers.len()
    }

    fn input_buffer(&self, port: PortId) -> Option<&AudioBuffer> {
        self.input_buffers.get(port.index())
    }

    fn input_buffer_mut(&mut self, port: PortId) -> Option<&mut AudioBuffer> {
        self.input_buffers.get_mut(port.index())
    }

    fn output_buffer(&self, port: PortId) -> Option<&AudioBuffer> {
        self.output_buffers.get(port.index())
    }

    fn output_buffer_mut(&mut self, port: PortId) -> Option<&mut AudioBuffer> {
        self.output_buffers.get_mut(port.index())
    }

    fn prepare(&mut self, sample_rate: f64, _block_size: usize) {
        self.sample_rate = sample_rate;
        self.prepared = true;
        // prepare でランプは打ち切り、目標値から始める
        self.current_gain = self.target_gain;
        self.step = 0.0;
        self.ramp_remaining = 0;
    }

    fn process(&mut self, frames: usize) {
        let frames = frames.min(crate::graph::MAX_FRAMES);
        for i in 0..frames {
            if self.ramp_remaining > 0 {
                self.ramp_remaining -= 1;
                self.current_gain = if self.ramp_remaining == 0 {
                    self.target_gain
                } else {
                    self.current_gain + self.step
                };
            }
            let g = self.current_gain;

            for ch in 0..self.output_buffers.len() {
                let sample = self.input_buffers[ch].samples()[i];
                self.output_buffers[ch].samples_mut()[i] = sample * g;
            }
        }

        for buf in &mut self.output_buffers {
            buf.set_valid_frames(frames);
            buf.update_peak();
        }
    }

    fn release(&mut self) {
        self.prepared = false;
    }

    fn reset(&mut self) {
        self.current_gain = self.target_gain;
        self.step = 0.0;
        self.ramp_remaining = 0;
    }

    fn clear_buffers(&mut self, frames: usize) {
        for buf in &mut self.input_buffers {
            buf.clear(frames);
        }
        for buf in &mut self.output_buffers {
            buf.clear(frames);
        }
    }

    fn input_peak_levels(&self) -> Vec<f32> {
        self.input_buffers.iter().map(|b| b.cached_peak()).collect()
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
