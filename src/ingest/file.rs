//! Local file frame source: reads a directory of already-decoded still
//! images (PNG/JPEG) in sorted filename order and replays them as a
//! timestamped frame stream at a fixed rate. Video container demuxing is
//! out of scope; a real deployment decodes upstream of this boundary.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::frame::{ChannelOrder, Frame};

use super::{CaptureOutcome, CaptureSource};

pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    index: usize,
    fps: f64,
    healthy: bool,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        if !dir.is_dir() {
            return Err(anyhow!("image sequence source requires a directory: {}", dir.display()));
        }
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
                    Some("png") | Some("jpg") | Some("jpeg")
                )
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(anyhow!("no PNG/JPEG frames found in {}", dir.display()));
        }
        Ok(Self { paths, index: 0, fps, healthy: true })
    }
}

impl CaptureSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<CaptureOutcome> {
        if self.index >= self.paths.len() {
            return Ok(CaptureOutcome::EndOfStream);
        }
        let path = &self.paths[self.index];
        let decoded = image::open(path);
        let img = match decoded {
            Ok(img) => img.to_rgb8(),
            Err(err) => {
                self.healthy = false;
                return Err(anyhow!("failed to decode {}: {}", path.display(), err));
            }
        };
        let timestamp = self.index as f64 / self.fps;
        let (width, height) = (img.width(), img.height());
        let frame = Frame::new(timestamp, width, height, ChannelOrder::Rgb, img.into_raw())?;
        self.index += 1;
        Ok(CaptureOutcome::Frame(frame))
    }

    fn is_healthy(&self) -> bool {
        self.healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_directory() {
        let result = ImageSequenceSource::open(Path::new("/nonexistent/path/for/test"), 10.0);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = ImageSequenceSource::open(dir.path(), 10.0);
        assert!(result.is_err());
    }

    #[test]
    fn reads_frames_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        for (i, value) in [10u8, 200u8].iter().enumerate() {
            let img = image::RgbImage::from_pixel(4, 4, image::Rgb([*value, *value, *value]));
            img.save(dir.path().join(format!("frame_{:03}.png", i))).unwrap();
        }
        let mut source = ImageSequenceSource::open(dir.path(), 5.0).unwrap();
        let CaptureOutcome::Frame(first) = source.next_frame().unwrap() else { panic!("expected frame") };
        assert_eq!(first.color()[0], 10);
        let CaptureOutcome::Frame(second) = source.next_frame().unwrap() else { panic!("expected frame") };
        assert_eq!(second.color()[0], 200);
        assert!(matches!(source.next_frame().unwrap(), CaptureOutcome::EndOfStream));
    }
}
