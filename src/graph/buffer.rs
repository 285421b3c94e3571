//! Audio Buffer implementation

use super::MAX_FRAMES;

/// モノラルオーディオバッファ
///
/// 重要: 構築時に一度だけ確保され、レンダーパスでは再確保しない。
/// `valid_frames` が現在のブロック長を示す。
pub struct AudioBuffer {
    data: Box<[f32; MAX_FRAMES]>,
    valid_frames: usize,
    /// Cached peak level (updated during process)
    peak: f32,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self {
            data: Box::new([0.0; MAX_FRAMES]),
            valid_frames: 0,
            peak: 0.0,
        }
    }

    /// Clear the buffer (fill with zeros)
    pub fn clear(&mut self, frames: usize) {
        let frames = frames.min(MAX_FRAMES);
        self.data[..frames].fill(0.0);
        self.valid_frames = frames;
        self.peak = 0.0;
    }

    /// Get the number of valid frames
    pub fn valid_frames(&self) -> usize {
        self.valid_frames
    }

    /// Set the number of valid frames
    pub fn set_valid_frames(&mut self, frames: usize) {
        self.valid_frames = frames.min(MAX_FRAMES);
    }

    /// Get samples as a slice
    pub fn samples(&self) -> &[f32] {
        &self.data[..self.valid_frames]
    }

    /// Get samples as a mutable slice
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.data[..self.valid_frames]
    }

    /// Mix from another buffer with gain: self += source * gain
    pub fn mix_from(&mut self, source: &AudioBuffer, gain: f32) {
        let frames = self.valid_frames.min(source.valid_frames);
        if frames > 0 && gain.abs() > 0.0001 {
            for (dst, src) in self.data[..frames].iter_mut().zip(&source.data[..frames]) {
                *dst += src * gain;
            }
        }
    }

    /// Copy from another buffer
    pub fn copy_from(&mut self, source: &AudioBuffer) {
        let frames = self.valid_frames.min(source.valid_frames);
        self.data[..frames].copy_from_slice(&source.data[..frames]);
    }

    /// Write raw samples directly into the buffer
    pub fn write_samples(&mut self, samples: &[f32]) {
        let frames = samples.len().min(MAX_FRAMES);
        self.data[..frames].copy_from_slice(&samples[..frames]);
        self.valid_frames = frames;
    }

    /// Get cached peak level without recalculating
    pub fn cached_peak(&self) -> f32 {
        self.peak
    }

    /// Update peak cache
    pub fn update_peak(&mut self) {
        let mut peak = 0.0f32;
        for &s in &self.data[..self.valid_frames] {
            let a = s.abs();
            if a > peak {
                peak = a;
            }
        }
        self.peak = peak;
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for AudioBuffer {
    fn clone(&self) -> Self {
        let mut new = Self::new();
        new.data.copy_from_slice(&*self.data);
        new.valid_frames = self.valid_frames;
        new.peak = self.peak;
        new
    }
}
