//! Device Bridge - fans the device callback out to listeners
//!
//! 実デバイスのバックエンドは IoDevice トレイトの向こう側。
//! ブリッジは open/start/stop/close の状態機械と、コールバック
//! リスナーへの登録順ディスパッチだけを受け持つ。

use crate::graph::GraphProcessor;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// デバイス操作の失敗理由
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("failed to open device: {0}")]
    Open(String),
    #[error("failed to start device: {0}")]
    Start(String),
    #[error("invalid state: expected {expected}, device is {actual:?}")]
    InvalidState {
        expected: &'static str,
        actual: BridgeState,
    },
}

/// ブリッジの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Closed,
    Opened,
    Running,
}

/// 再生条件のスナップショット（about_to_start で配られる）
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub input_channels: usize,
    pub output_channels: usize,
    pub sample_rate: f64,
    pub buffer_size: usize,
}

/// デバイスバックエンドの契約
///
/// OS 固有のバックエンド（CoreAudio, ALSA, ...）はこのトレイトで
/// 差し込む。open/start が失敗したら Err を返す。
pub trait IoDevice: Send + Sync {
    fn name(&self) -> &str;
    fn open(&self) -> Result<(), DeviceError>;
    fn close(&self);
    fn start(&self) -> Result<(), DeviceError>;
    fn stop(&self);
    fn input_channel_count(&self) -> usize;
    fn output_channel_count(&self) -> usize;
    fn current_sample_rate(&self) -> f64;
    fn current_buffer_size(&self) -> usize;
}

/// デバイスコールバックの受け手
///
/// io_callback はレンダースレッドから呼ばれる。ブロック禁止。
pub trait IoCallback: Send + Sync {
    /// 再生開始直前（走行中に登録された場合は登録時に合成される）
    fn about_to_start(&self, _info: &DeviceInfo) {}

    /// 1 ブロックの入出力
    fn io_callback(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize);

    /// 再生停止後（走行中に解除された場合は解除時に合成される）
    fn stopped(&self) {}

    /// デバイスエラーの通知
    fn device_error(&self, _message: &str) {}
}

/// デバイスブリッジ
///
/// 状態機械: Closed → Opened → Running → Opened → Closed。
/// dispatch_io はリスナーリストのロックを保持したまま登録順に
/// 転送する。ロックの保持区間は短く、リスナーはブロックしない前提。
pub struct DeviceBridge {
    device: Arc<dyn IoDevice>,
    callbacks: Mutex<Vec<Arc<dyn IoCallback>>>,
    state: Mutex<BridgeState>,
    /// ディスパッチ済みブロック数（単調増加）
    blocks: AtomicU64,
}

impl DeviceBridge {
    pub fn new(device: Arc<dyn IoDevice>) -> Self {
        Self {
            device,
            callbacks: Mutex::new(Vec::new()),
            state: Mutex::new(BridgeState::Closed),
            blocks: AtomicU64::new(0),
        }
    }

    /// 現在の状態
    pub fn state(&self) -> BridgeState {
        *self.state.lock()
    }

    /// 現在の再生条件
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.device.name().to_string(),
            input_channels: self.device.input_channel_count(),
            output_channels: self.device.output_channel_count(),
            sample_rate: self.device.current_sample_rate(),
            buffer_size: self.device.current_buffer_size(),
        }
    }

    /// デバイスを開く（Closed → Opened）
    pub fn open(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if *state != BridgeState::Closed {
            return Err(DeviceError::InvalidState {
                expected: "Closed",
                actual: *state,
            });
        }
        self.device.open()?;
        *state = BridgeState::Opened;
        info!(device = self.device.name(), "device opened");
        Ok(())
    }

    /// 再生開始（Opened → Running）
    ///
    /// 登録済みリスナー全員に about_to_start を配ってから走行に入る。
    pub fn start(&self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        if *state != BridgeState::Opened {
            return Err(DeviceError::InvalidState {
                expected: "Opened",
                actual: *state,
            });
        }
        self.device.start()?;

        let info = self.info();
        let callbacks = self.callbacks.lock();
        for cb in callbacks.iter() {
            cb.about_to_start(&info);
        }
        drop(callbacks);

        *state = BridgeState::Running;
        info!(device = self.device.name(), "device started");
        Ok(())
    }

    /// 再生停止（Running → Opened）。走行中でなければ何もしない
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if *state != BridgeState::Running {
            return;
        }
        self.device.stop();

        let callbacks = self.callbacks.lock();
        for cb in callbacks.iter() {
            cb.stopped();
        }
        drop(callbacks);

        *state = BridgeState::Opened;
        info!(device = self.device.name(), "device stopped");
    }

    /// デバイスを閉じる（必要なら stop も行う）
    pub fn close(&self) {
        self.stop();
        let mut state = self.state.lock();
        if *state != BridgeState::Opened {
            return;
        }
        self.device.close();
        *state = BridgeState::Closed;
        info!(device = self.device.name(), "device closed");
    }

    /// リスナーを登録（登録順がディスパッチ順）
    ///
    /// 走行中なら、その場で about_to_start を合成してから参加させる。
    /// 既に登録済みなら false。
    pub fn add_callback(&self, cb: Arc<dyn IoCallback>) -> bool {
        let state = self.state.lock();
        let mut callbacks = self.callbacks.lock();
        if callbacks.iter().any(|c| Arc::ptr_eq(c, &cb)) {
            return false;
        }
        if *state == BridgeState::Running {
            cb.about_to_start(&self.info());
        }
        callbacks.push(cb);
        debug!(count = callbacks.len(), "callback added");
        true
    }

    /// リスナーを解除
    ///
    /// 走行中なら stopped を合成する。
    pub fn remove_callback(&self, cb: &Arc<dyn IoCallback>) -> bool {
        let state = self.state.lock();
        let mut callbacks = self.callbacks.lock();
        let Some(pos) = callbacks.iter().position(|c| Arc::ptr_eq(c, cb)) else {
            return false;
        };
        let removed = callbacks.remove(pos);
        if *state == BridgeState::Running {
            removed.stopped();
        }
        debug!(count = callbacks.len(), "callback removed");
        true
    }

    /// 1 ブロックをディスパッチ（デバイスのレンダースレッドから）
    pub fn dispatch_io(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
        let callbacks = self.callbacks.lock();
        for cb in callbacks.iter() {
            cb.io_callback(inputs, outputs, frames);
        }
    }

    /// デバイスエラーをリスナーへ転送
    pub fn dispatch_error(&self, message: &str) {
        let callbacks = self.callbacks.lock();
        for cb in callbacks.iter() {
            cb.device_error(message);
        }
    }

    /// ディスパッチ済みブロック数
    pub fn blocks_dispatched(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }
}

/// グラフをデバイスコールバックとして駆動するアダプタ
///
/// about_to_start → prepare、io_callback → process_block、
/// stopped → release。シンクの SinkTap より先に登録すること
/// （各ブロックでグラフのレンダーがタップの読み出しに先行する）。
pub struct GraphRenderCallback {
    processor: Arc<GraphProcessor>,
}

impl GraphRenderCallback {
    pub fn new(processor: Arc<GraphProcessor>) -> Self {
        Self { processor }
    }
}

impl IoCallback for GraphRenderCallback {
    fn about_to_start(&self, info: &DeviceInfo) {
        self.processor.prepare(info.sample_rate, info.buffer_size);
    }

    fn io_callback(&self, _inputs: &[&[f32]], _outputs: &mut [&mut [f32]], frames: usize) {
        self.processor.process_block(frames);
    }

    fn stopped(&self) {
        self.processor.release();
    }
}

/// クロージャをリスナーにするアダプタ
pub struct FnCallback<F> {
    f: F,
}

impl<F> FnCallback<F>
where
    F: Fn(&[&[f32]], &mut [&mut [f32]], usize) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> IoCallback for FnCallback<F>
where
    F: Fn(&[&[f32]], &mut [&mut [f32]], usize) + Send + Sync,
{
    fn io_callback(&self, inputs: &[&[f32]], outputs: &mut [&mut [f32]], frames: usize) {
        (self.f)(inputs, outputs, frames)
    }
}
