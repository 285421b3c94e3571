//! Device Sink Node - hands rendered blocks to the device side

use crate::device::{DeviceInfo, IoCallback};
use crate::graph::{AudioBuffer, AudioNode, NodeType, PortId};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// レンダー済みブロックのキャッシュ
///
/// グラフ側（process）とデバイス側（SinkTap）の橋渡し。
/// ロックの保持は 1 ブロック分のコピーのみ。
struct SinkCache {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

/// 出力先ノード
///
/// 入力 N ポート、出力なし。process で入力バッファをキャッシュへ
/// コピーし、デバイスコールバックは tap() 経由でそれを読む。
/// グラフがブロックをスキップした場合、キャッシュは前回の内容を保つ。
pub struct DeviceSinkNode {
    /// 表示ラベル
    label: String,
    /// 入力バッファ（チャンネル数分）
    input_buffers: Vec<AudioBuffer>,
    cache: Arc<Mutex<SinkCache>>,
}

impl DeviceSinkNode {
    /// Create a new sink node
    pub fn new(label: impl Into<String>, channels: usize) -> Self {
        let channels = channels.max(1);
        Self {
            label: label.into(),
            input_buffers: (0..channels).map(|_| AudioBuffer::new()).collect(),
            cache: Arc::new(Mutex::new(SinkCache {
                channels: (0..channels).map(|_| Vec::new()).collect(),
                frames: 0,
            })),
        }
    }

    /// Create a stereo sink
    pub fn new_stereo(label: impl Into<String>) -> Self {
        Self::new(label, 2)
    }

    /// デバイス側の読み出しハンドルを取得
    pub fn tap(&self) -> SinkTap {
        SinkTap {
            cache: self.cache.clone(),
        }
    }
}

impl AudioNode for DeviceSinkNode {
    fn node_type(&self) -> NodeType {
        NodeType::Sink
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn input_port_count(&self) -> usize {
        self.input_buffers.len()
    }

    fn output_port_count(&self) -> usize {
        0 // シンクは出力なし
    }

    fn input_buffer(&self, port: PortId) -> Option<&AudioBuffer> {
        self.input_buffers.get(port.index())
    }

    fn input_buffer_mut(&mut self, port: PortId) -> Option<&mut AudioBuffer> {
        self.input_buffers.get_mut(port.index())
    }

    fn output_buffer(&self, _port: PortId) -> Option<&AudioBuffer> {
        None // シンクは出力バッファなし
    }

    fn output_buffer_mut(&mut self, _port: PortId) -> Option<&mut AudioBuffer> {
        None
    }

    fn prepare(&mut self, _sample_rate: f64, block_size: usize) {
        let mut cache = self.cache.lock();
        for ch in cache.channels.iter_mut() {
            ch.clear();
            ch.resize(block_size, 0.0);
        }
        cache.frames = 0;
    }

    fn process(&mut self, frames: usize) {
        for buf in &mut self.input_buffers {
            buf.set_valid_frames(frames);
            buf.update_peak();
        }

        let mut cache = self.cache.lock();
        for (ch, buf) in self.input_buffers.iter().enumerate() {
            let dst = &mut cache.channels[ch];
            let n = frames.min(dst.len());
            dst[..n].copy_from_slice(&buf.samples()[..n]);
        }
        cache.frames = frames.min(cache.channels.first().map_or(0, |c| c.len()));
    }

    fn release(&mut self) {
        let mut cache = self.cache.lock();
        for ch in cache.channels.iter_mut() {
            ch.clear();
        }
        cache.frames = 0;
    }

    fn clear_buffers(&mut self, frames: usize) {
        for buf in &mut self.input_buffers {
            buf.clear(frames);
        }
    }

    fn input_peak_levels(&self) -> Vec<f32> {
        self.input_buffers.iter().map(|b| b.cached_peak()).collect()
    }

    fn output_peak_levels(&self) -> Vec<f32> {
        Vec::new() // シンクは出力なし
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// シンクキャッシュのデバイス側読み出し
///
/// IoCallback としてブリッジに登録し、担当チャンネルへキャッシュを
/// 書き出す。担当外のチャンネルには触れない。
#[derive(Clone)]
pub struct SinkTap {
    cache: Arc<Mutex<SinkCache>>,
}

impl IoCallback for SinkTap {
    fn io_callback(&self, _inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        let cache = self.cache.lock();
        for (ch, out) in outputs.iter_mut().enumerate() {
            let Some(src) = cache.channels.get(ch) else {
                break;
            };
            let frames = frames.min(out.len());
            let n = frames.min(cache.frames);
            out[..n].copy_from_slice(&src[..n]);
            out[n..frames].fill(0.0);
        }
    }

    fn about_to_start(&self, _info: &DeviceInfo) {}

    fn stopped(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_reads_processed_block() {
        let mut sink = DeviceSinkNode::new_stereo("out");
        assert_eq!(sink.input_port_count(), 2);
        sink.prepare(48000.0, 8);

        sink.clear_buffers(4);
        sink.input_buffer_mut(PortId::new(0))
            .unwrap()
            .write_samples(&[0.1, 0.2, 0.3, 0.4]);
        sink.input_buffer_mut(PortId::new(1))
            .unwrap()
            .write_samples(&[-0.1, -0.2, -0.3, -0.4]);
        sink.process(4);

        let tap = sink.tap();
        let mut left = [9.0f32; 4];
        let mut right = [9.0f32; 4];
        {
            let mut outputs: Vec<&mut [f32]> = vec![&mut left, &mut right];
            tap.io_callback(&[], &mut outputs, 4);
        }
        assert_eq!(left, [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(right, [-0.1, -0.2, -0.3, -0.4]);
    }

    #[test]
    fn test_tap_zero_fills_beyond_cached_frames() {
        let mut sink = DeviceSinkNode::new("out", 1);
        sink.prepare(48000.0, 8);

        sink.clear_buffers(2);
        sink.input_buffer_mut(PortId::new(0))
            .unwrap()
            .write_samples(&[0.5, 0.5]);
        sink.process(2);

        let tap = sink.tap();
        let mut out = [9.0f32; 4];
        {
            let mut outputs: Vec<&mut [f32]> = vec![&mut out];
            tap.io_callback(&[], &mut outputs, 4);
        }
        assert_eq!(out, [0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_tap_leaves_unowned_channels_alone() {
        let mut sink = DeviceSinkNode::new("out", 1);
        sink.prepare(48000.0, 4);
        sink.clear_buffers(4);
        sink.process(4);

        let tap = sink.tap();
        let mut own = [9.0f32; 4];
        let mut other = [9.0f32; 4];
        {
            let mut outputs: Vec<&mut [f32]> = vec![&mut own, &mut other];
            tap.io_callback(&[], &mut outputs, 4);
        }
        assert_eq!(own, [0.0; 4]);
        assert_eq!(other, [9.0; 4]);
    }
}
