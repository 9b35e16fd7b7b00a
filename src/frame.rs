//! Frame representation and the previous-frame cache the motion detectors share.
//!
//! - `Frame`: owns a timestamped color buffer and lazily derives a cached
//!   grayscale view.
//! - `Preprocessor`: hands each detector the current grayscale view plus a
//!   handle to the immediately prior grayscale frame. Holds a single-slot
//!   cache that is swapped only after every detector has consumed it.
//! - `FramePool`: recycles grayscale buffers for the previous-frame slot and
//!   the liveness reference frame so the pipeline does not allocate per frame.

use std::collections::VecDeque;

/// Channel order is fixed at construction; the watermark and detectors never
/// reinterpret it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// A single captured color frame.
///
/// `width * height * 3 == color.len()` is an invariant enforced at
/// construction; nothing downstream revalidates it.
pub struct Frame {
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub order: ChannelOrder,
    color: Vec<u8>,
    gray: Option<GrayFrame>,
}

impl Frame {
    pub fn new(timestamp: f64, width: u32, height: u32, order: ChannelOrder, color: Vec<u8>) -> anyhow::Result<Self> {
        let expected = width as usize * height as usize * 3;
        if color.len() != expected {
            return Err(anyhow::anyhow!(
                "frame buffer size mismatch: expected {} bytes for {}x{}, got {}",
                expected,
                width,
                height,
                color.len()
            ));
        }
        Ok(Self {
            timestamp,
            width,
            height,
            order,
            color,
            gray: None,
        })
    }

    pub fn color(&self) -> &[u8] {
        &self.color
    }

    pub fn color_mut(&mut self) -> &mut [u8] {
        self.gray = None; // invalidate cache: color edits (watermark, rescue) change luminance
        &mut self.color
    }

    /// Overwrite the color buffer in place (e.g. after a rescue/correction
    /// filter produced a whole new buffer of the same dimensions).
    pub fn replace_color(&mut self, color: Vec<u8>) -> anyhow::Result<()> {
        let expected = self.width as usize * self.height as usize * 3;
        if color.len() != expected {
            return Err(anyhow::anyhow!("replacement buffer size mismatch"));
        }
        self.color = color;
        self.gray = None;
        Ok(())
    }

    /// Grayscale view, computed on first access and cached for the life of
    /// the frame (or until the color buffer is mutated).
    pub fn grayscale(&mut self) -> &GrayFrame {
        if self.gray.is_none() {
            self.gray = Some(GrayFrame::from_color(&self.color, self.width, self.height, self.order));
        }
        self.gray.as_ref().unwrap()
    }
}

/// Standard ITU-R BT.601 luminance weights, matching how every example in
/// this pack that touches raw pixels derives grayscale from RGB/BGR.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

#[derive(Clone)]
pub struct GrayFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl GrayFrame {
    pub fn from_color(color: &[u8], width: u32, height: u32, order: ChannelOrder) -> Self {
        let mut pixels = Vec::with_capacity((width * height) as usize);
        for chunk in color.chunks_exact(3) {
            let (r, g, b) = match order {
                ChannelOrder::Rgb => (chunk[0], chunk[1], chunk[2]),
                ChannelOrder::Bgr => (chunk[2], chunk[1], chunk[0]),
            };
            let y = LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32;
            pixels.push(y.round().clamp(0.0, 255.0) as u8);
        }
        Self { width, height, pixels }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn mean(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().map(|&p| p as f32).sum::<f32>() / self.pixels.len() as f32
    }
}

/// Single-slot cache of the previous grayscale frame.
///
/// Swapped only after every detector for the current frame has read it, so a
/// detector never observes a half-updated cache mid-frame. Empty on the
/// first frame; motion-dependent detectors treat an empty cache as
/// "skip, not tripped" per spec.
pub struct Preprocessor {
    previous: Option<GrayFrame>,
    pool: FramePool,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            previous: None,
            pool: FramePool::new(),
        }
    }

    pub fn previous(&self) -> Option<&GrayFrame> {
        self.previous.as_ref()
    }

    pub fn is_first_frame(&self) -> bool {
        self.previous.is_none()
    }

    /// Swap in the just-processed frame's grayscale view as the new
    /// "previous" for the next frame. The old previous buffer is recycled
    /// into the pool rather than dropped.
    pub fn advance(&mut self, current: GrayFrame) {
        if let Some(old) = self.previous.replace(current) {
            self.pool.recycle(old);
        }
    }

    /// Shared pool backing both the previous-frame cache and the liveness
    /// reference frame, so both buffers are recycled through the one pool
    /// rather than each allocating independently.
    pub fn pool_mut(&mut self) -> &mut FramePool {
        &mut self.pool
    }

    /// Releases every pooled buffer. Called on pipeline shutdown.
    pub fn release_pool(&mut self) {
        self.pool.clear();
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Recycles grayscale pixel buffers so the previous-frame slot and the
/// liveness reference frame do not allocate fresh `Vec<u8>`s every cycle.
pub struct FramePool {
    spares: VecDeque<Vec<u8>>,
    max_spares: usize,
}

impl FramePool {
    pub fn new() -> Self {
        Self {
            spares: VecDeque::new(),
            max_spares: 4,
        }
    }

    pub fn take(&mut self, len: usize) -> Vec<u8> {
        if let Some(mut buf) = self.spares.pop_front() {
            buf.clear();
            buf.resize(len, 0);
            buf
        } else {
            vec![0u8; len]
        }
    }

    fn recycle(&mut self, frame: GrayFrame) {
        if self.spares.len() < self.max_spares {
            self.spares.push_back(frame.pixels);
        }
    }

    /// Release every pooled buffer. Called on pipeline shutdown.
    pub fn clear(&mut self) {
        self.spares.clear();
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(w: u32, h: u32, r: u8, g: u8, b: u8) -> Frame {
        let mut buf = Vec::with_capacity((w * h * 3) as usize);
        for _ in 0..(w * h) {
            buf.extend_from_slice(&[r, g, b]);
        }
        Frame::new(0.0, w, h, ChannelOrder::Rgb, buf).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffer_size() {
        let err = Frame::new(0.0, 4, 4, ChannelOrder::Rgb, vec![0u8; 10]);
        assert!(err.is_err());
    }

    #[test]
    fn grayscale_of_white_is_white() {
        let mut frame = solid_frame(2, 2, 255, 255, 255);
        let gray = frame.grayscale();
        assert!(gray.pixels.iter().all(|&p| p == 255));
    }

    #[test]
    fn grayscale_cache_invalidated_on_mutation() {
        let mut frame = solid_frame(1, 1, 0, 0, 0);
        assert_eq!(frame.grayscale().get(0, 0), 0);
        frame.color_mut()[0] = 255;
        frame.color_mut()[1] = 255;
        frame.color_mut()[2] = 255;
        assert_eq!(frame.grayscale().get(0, 0), 255);
    }

    #[test]
    fn preprocessor_starts_empty() {
        let pre = Preprocessor::new();
        assert!(pre.is_first_frame());
        assert!(pre.previous().is_none());
    }

    #[test]
    fn preprocessor_advances_to_immediately_prior_frame() {
        let mut pre = Preprocessor::new();
        let mut f1 = solid_frame(2, 2, 10, 10, 10);
        pre.advance(f1.grayscale().clone());
        assert!(!pre.is_first_frame());
        assert_eq!(pre.previous().unwrap().get(0, 0), 10);

        let mut f2 = solid_frame(2, 2, 200, 200, 200);
        pre.advance(f2.grayscale().clone());
        assert_eq!(pre.previous().unwrap().get(0, 0), 200);
    }

    #[test]
    fn frame_pool_recycles_buffers() {
        let mut pool = FramePool::new();
        let buf = pool.take(16);
        assert_eq!(buf.len(), 16);
    }
}
