//! Stream Ingest Source - byte stream (FIFO/file) reader with jitter buffer

use crate::graph::{AudioBuffer, AudioNode, NodeType, PortId};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::any::Any;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// i16 → f32 変換スケール
pub(crate) const SCALE: f32 = 1.0 / 0x7fff as f32;

/// リングが詰まった / 枯れたときの再試行間隔
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// ストリーム取り込みの設定
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// 読み込み元（FIFO または通常ファイル）
    pub path: PathBuf,
    /// インターリーブされたチャンネル数
    pub channels: usize,
    /// ジッタバッファ閾値（ブロック数 K）
    pub buffer_blocks: usize,
    /// open 失敗時の再試行間隔
    pub reopen_backoff: Duration,
}

impl IngestOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            channels: 2,
            buffer_blocks: 4,
            reopen_backoff: Duration::from_millis(500),
        }
    }
}

struct ReaderHandle {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// ストリーム取り込みノード
///
/// バックグラウンドのリーダースレッドがバイト列（リトルエンディアン
/// i16 インターリーブ）を f32 に変換して SPSC リングへ積む。
/// レンダー側はブロック単位のジッタバッファで読む:
/// buffering カウンタが K から 0 まで、リングに 1 ブロック分の
/// データがあるときだけ減り、その間は無音を出す。走行中に枯れたら
/// 無音に戻り、buffering = K から再スタートする。
pub struct StreamIngestNode {
    /// 表示ラベル
    label: String,
    options: IngestOptions,
    /// 出力バッファ（チャンネル数分）
    output_buffers: Vec<AudioBuffer>,
    /// リング消費側。ロックの保持は 1 ブロック分の pop のみ
    consumer: Mutex<Option<HeapCons<f32>>>,
    reader: Option<ReaderHandle>,
    /// ジッタバッファの残りカウント（ブロック）
    buffering: usize,
}

impl StreamIngestNode {
    pub fn new(label: impl Into<String>, options: IngestOptions) -> Self {
        let channels = options.channels.max(1);
        Self {
            label: label.into(),
            options: IngestOptions { channels, ..options },
            output_buffers: (0..channels).map(|_| AudioBuffer::new()).collect(),
            consumer: Mutex::new(None),
            reader: None,
            buffering: 0,
        }
    }

    /// ジッタバッファ充填中か
    pub fn is_buffering(&self) -> bool {
        self.buffering > 0
    }

    fn shutdown_reader(&mut self) {
        if let Some(handle) = self.reader.take() {
            let _ = handle.stop_tx.send(());
            let _ = handle.join.join();
            debug!(label = %self.label, "ingest reader stopped");
        }
        *self.consumer.lock() = None;
    }
}

impl AudioNode for StreamIngestNode {
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

    /// リーダースレッドを起動（再 prepare なら作り直す）
    fn prepare(&mut self, _sample_rate: f64, block_size: usize) {
        self.shutdown_reader();

        let block_size = block_size.max(1);
        let channels = self.options.channels;
        let capacity =
            (block_size * channels * self.options.buffer_blocks).max(block_size * channels * 2);
        let rb = HeapRb::<f32>::new(capacity);
        let (producer, consumer) = rb.split();
        *self.consumer.lock() = Some(consumer);

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let path = self.options.path.clone();
        let backoff = self.options.reopen_backoff;
        let label = self.label.clone();
        let join = std::thread::Builder::new()
            .name(format!("ingest-{label}"))
            .spawn(move || run_reader(&path, backoff, producer, &stop_rx))
            .ok();

        match join {
            Some(join) => {
                debug!(label = %self.label, "ingest reader started");
                self.reader = Some(ReaderHandle { stop_tx, join });
            }
            None => warn!(label = %self.label, "failed to spawn ingest reader"),
        }

        self.buffering = self.options.buffer_blocks;
    }

    fn process(&mut self, frames: usize) {
        let frames = frames.min(crate::graph::MAX_FRAMES);
        let channels = self.output_buffers.len();
        let needed = frames * channels;

        let mut guard = self.consumer.lock();
        let available = match (*guard).as_ref() {
            Some(cons) => cons.occupied_len(),
            None => 0,
        };

        if self.buffering > 0 {
            // 充填中: データが 1 ブロック分たまっているときだけ前進
            if available >= needed {
                self.buffering -= 1;
            }
        } else if available >= needed {
            if let Some(cons) = (*guard).as_mut() {
                for i in 0..frames {
                    for ch in 0..channels {
                        let sample = cons.try_pop().unwrap_or(0.0);
                        self.output_buffers[ch].samples_mut()[i] = sample;
                    }
                }
            }
        } else if (*guard).is_some() {
            // 走行中に枯れた。無音に戻して充填し直す
            self.buffering = self.options.buffer_blocks;
        }
        drop(guard);

        for buf in &mut self.output_buffers {
            buf.set_valid_frames(frames);
            buf.update_peak();
        }
    }

    fn release(&mut self) {
        self.shutdown_reader();
        self.buffering = 0;
    }

    fn reset(&mut self) {
        self.buffering = self.options.buffer_blocks;
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

impl Drop for StreamIngestNode {
    fn drop(&mut self) {
        self.shutdown_reader();
    }
}

/// リトルエンディアン i16 列を f32 にデコードする
///
/// 奇数バイトで切れた場合、余った下位バイトは carry に持ち越す。
pub(crate) fn decode_i16le(bytes: &[u8], carry: &mut Option<u8>, out: &mut Vec<f32>) {
    let mut data = bytes;

    if let Some(lo) = carry.take() {
        match data.split_first() {
            Some((&hi, rest)) => {
                out.push(i16::from_le_bytes([lo, hi]) as f32 * SCALE);
                data = rest;
            }
            None => {
                *carry = Some(lo);
                return;
            }
        }
    }

    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        out.push(i16::from_le_bytes([pair[0], pair[1]]) as f32 * SCALE);
    }
    if let [lo] = chunks.remainder() {
        *carry = Some(*lo);
    }
}

/// リーダースレッド本体
///
/// open に失敗したら backoff 待ちで再試行。読めたバイトはデコードして
/// リングへ。リングが満杯・ソースが空のときは短く待って続行する。
/// 待ちはすべて停止シグナルで中断できる。
fn run_reader(
    path: &std::path::Path,
    backoff: Duration,
    mut producer: HeapProd<f32>,
    stop_rx: &Receiver<()>,
) {
    let mut raw = [0u8; 4096];
    let mut samples: Vec<f32> = Vec::with_capacity(raw.len() / 2);

    // stop シグナル受信または送信側消滅で true
    let wait = |timeout: Duration| -> bool {
        !matches!(stop_rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    };

    'reopen: loop {
        if stop_rx.try_recv().is_ok() {
            return;
        }

        let mut file = match File::open(path) {
            Ok(f) => {
                debug!(path = %path.display(), "ingest stream opened");
                f
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "ingest open failed, retrying");
                if wait(backoff) {
                    return;
                }
                continue 'reopen;
            }
        };
        let mut carry: Option<u8> = None;

        loop {
            if stop_rx.try_recv().is_ok() {
                return;
            }

            match file.read(&mut raw) {
                Ok(0) => {
                    // FIFO が一時的に枯れた。待って読み直す
                    if wait(POLL_INTERVAL) {
                        return;
                    }
                }
                Ok(n) => {
                    samples.clear();
                    decode_i16le(&raw[..n], &mut carry, &mut samples);

                    let mut pending = &samples[..];
                    while !pending.is_empty() {
                        let pushed = producer.push_slice(pending);
                        pending = &pending[pushed..];
                        if !pending.is_empty() && wait(POLL_INTERVAL) {
                            return;
                        }
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), %err, "ingest read failed, reopening");
                    if wait(backoff) {
                        return;
                    }
                    continue 'reopen;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_decode_i16le_values() {
        let mut carry = None;
        let mut out = Vec::new();
        // 0x4000 = 16384, 0xC000 = -16384
        decode_i16le(&[0x00, 0x40, 0x00, 0xC0], &mut carry, &mut out);
        assert_eq!(out, vec![16384.0 * SCALE, -16384.0 * SCALE]);
        assert!(carry.is_none());
    }

    #[test]
    fn test_decode_i16le_carries_odd_byte() {
        let mut carry = None;
        let mut out = Vec::new();

        decode_i16le(&[0x00, 0x40, 0xFF], &mut carry, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(carry, Some(0xFF));

        // 持ち越しバイトが次のチャンクの下位になる
        decode_i16le(&[0x7F], &mut carry, &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], i16::from_le_bytes([0xFF, 0x7F]) as f32 * SCALE);
        assert!(carry.is_none());
    }

    fn write_fixture(samples: &[i16]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for s in samples {
            file.write_all(&s.to_le_bytes()).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_buffering_emits_k_silent_blocks_then_data() {
        let block = 64;
        let samples: Vec<i16> = (0..512).map(|i| (i * 16) as i16).collect();
        let file = write_fixture(&samples);

        let mut options = IngestOptions::new(file.path());
        options.channels = 1;
        options.buffer_blocks = 2;
        let mut node = StreamIngestNode::new("feed", options);
        node.prepare(48000.0, block);

        // リーダーがリングを満たすのを待つ
        std::thread::sleep(Duration::from_millis(100));

        let mut render = |node: &mut StreamIngestNode| -> Vec<f32> {
            node.clear_buffers(block);
            node.process(block);
            node.output_buffer(PortId::new(0)).unwrap().samples().to_vec()
        };

        // ちょうど K ブロックの無音
        for _ in 0..2 {
            assert!(node.is_buffering());
            let out = render(&mut node);
            assert!(out.iter().all(|&s| s == 0.0));
        }

        // その後は先頭サンプルから順に出る
        assert!(!node.is_buffering());
        let out = render(&mut node);
        let expected: Vec<f32> = samples[..block].iter().map(|&s| s as f32 * SCALE).collect();
        assert_eq!(out, expected);

        node.release();
    }

    #[test]
    fn test_underrun_reenters_buffering() {
        let block = 64;
        // 1 ブロック分しかないソース
        let samples: Vec<i16> = vec![1000; block];
        let file = write_fixture(&samples);

        let mut options = IngestOptions::new(file.path());
        options.channels = 1;
        options.buffer_blocks = 1;
        let mut node = StreamIngestNode::new("feed", options);
        node.prepare(48000.0, block);
        std::thread::sleep(Duration::from_millis(100));

        // 充填 1 ブロック → データ 1 ブロック
        node.clear_buffers(block);
        node.process(block);
        node.clear_buffers(block);
        node.process(block);
        assert!(node
            .output_buffer(PortId::new(0))
            .unwrap()
            .samples()
            .iter()
            .all(|&s| s != 0.0));

        // 枯れたので無音 + 再充填
        node.clear_buffers(block);
        node.process(block);
        assert!(node
            .output_buffer(PortId::new(0))
            .unwrap()
            .samples()
            .iter()
            .all(|&s| s == 0.0));
        assert!(node.is_buffering());

        node.release();
    }

    #[test]
    fn test_missing_path_stays_silent() {
        let mut options = IngestOptions::new("/nonexistent/patchbay-feed");
        options.channels = 1;
        options.buffer_blocks = 1;
        options.reopen_backoff = Duration::from_millis(10);
        let mut node = StreamIngestNode::new("feed", options);
        node.prepare(48000.0, 64);

        std::thread::sleep(Duration::from_millis(50));
        node.clear_buffers(64);
        node.process(64);
        assert!(node
            .output_buffer(PortId::new(0))
            .unwrap()
            .samples()
            .iter()
            .all(|&s| s == 0.0));

        // release でリーダーは backoff 待ちから即座に抜ける
        node.release();
    }
}
