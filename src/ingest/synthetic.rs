//! Procedurally generated frame source: deterministic given a seed, used
//! for tests and the bundled demo. Produces a slowly scrolling gradient so
//! blur/glare/motion detectors all see non-degenerate input.

use crate::frame::{ChannelOrder, Frame};

use super::{CaptureOutcome, CaptureSource};

pub struct SyntheticSource {
    width: u32,
    height: u32,
    fps: f64,
    frame_count: u64,
    max_frames: Option<u64>,
    scene_offset: i64,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            fps,
            frame_count: 0,
            max_frames: None,
            scene_offset: 0,
        }
    }

    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = Some(max_frames);
        self
    }

    /// Shifts the generated scene horizontally by `delta` pixels starting
    /// from the next frame, simulating a camera reposition for tests.
    pub fn shift_scene(&mut self, delta: i64) {
        self.scene_offset += delta;
    }

    fn render(&self) -> Vec<u8> {
        let mut buf = vec![0u8; (self.width * self.height * 3) as usize];
        for y in 0..self.height {
            for x in 0..self.width {
                let sx = (x as i64 + self.scene_offset).rem_euclid(256);
                let v = ((sx + y as i64 * 2) % 256) as u8;
                let idx = ((y * self.width + x) * 3) as usize;
                buf[idx] = v;
                buf[idx + 1] = v.wrapping_add(40);
                buf[idx + 2] = v.wrapping_add(80);
            }
        }
        buf
    }
}

impl CaptureSource for SyntheticSource {
    fn next_frame(&mut self) -> anyhow::Result<CaptureOutcome> {
        if let Some(max) = self.max_frames {
            if self.frame_count >= max {
                return Ok(CaptureOutcome::EndOfStream);
            }
        }
        let timestamp = self.frame_count as f64 / self.fps;
        let color = self.render();
        self.frame_count += 1;
        let frame = Frame::new(timestamp, self.width, self.height, ChannelOrder::Rgb, color)?;
        Ok(CaptureOutcome::Frame(frame))
    }
}
