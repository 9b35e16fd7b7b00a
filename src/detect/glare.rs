//! Glare detector: tri-band histogram signature, plus the CLAHE-based
//! rescue path that replaces the emitted frame when glare trips.

use crate::config::Thresholds;
use crate::frame::GrayFrame;

use super::{AuxValue, DetectionSignal, DetectorKind};

pub struct GlareDetector;

impl GlareDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn step(&mut self, gray: &GrayFrame, thresholds: &Thresholds) -> DetectionSignal {
        let _ = thresholds;
        let histogram = histogram256(gray);
        let total = gray.pixels.len().max(1) as f32;
        let dark_pct = histogram[0..=50].iter().sum::<u32>() as f32 / total * 100.0;
        let mid_pct = histogram[51..252].iter().sum::<u32>() as f32 / total * 100.0;
        let bright_pct = histogram[252..=255].iter().sum::<u32>() as f32 / total * 100.0;

        let tripped = dark_pct > 30.0 && bright_pct > 1.0 && mid_pct < 60.0;

        let mut aux = super::Auxiliary::new();
        aux.insert("dark_pct", AuxValue::Float(dark_pct));
        aux.insert("mid_pct", AuxValue::Float(mid_pct));
        aux.insert("bright_pct", AuxValue::Float(bright_pct));
        aux.insert("histogram", AuxValue::Histogram256(Box::new(histogram)));

        DetectionSignal {
            detector: DetectorKind::Glare,
            raw_metric: bright_pct,
            tripped,
            auxiliary: aux,
        }
    }
}

impl Default for GlareDetector {
    fn default() -> Self {
        Self::new()
    }
}

pub fn histogram256(gray: &GrayFrame) -> [u32; 256] {
    let mut bins = [0u32; 256];
    for &p in &gray.pixels {
        bins[p as usize] += 1;
    }
    bins
}

/// Converts RGB to a perceptual lightness/chroma split: `l` is the plain
/// luminance plane (what CLAHE equalizes), `cb`/`cr` are chroma planes
/// carried through unchanged and merged back after equalization.
struct YCbCr {
    l: Vec<u8>,
    cb: Vec<i16>,
    cr: Vec<i16>,
}

fn to_ycbcr(color: &[u8]) -> YCbCr {
    let n = color.len() / 3;
    let mut l = Vec::with_capacity(n);
    let mut cb = Vec::with_capacity(n);
    let mut cr = Vec::with_capacity(n);
    for chunk in color.chunks_exact(3) {
        let (r, g, b) = (chunk[0] as f32, chunk[1] as f32, chunk[2] as f32);
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        l.push(y.round().clamp(0.0, 255.0) as u8);
        cb.push((-0.168736 * r - 0.331264 * g + 0.5 * b) as i16);
        cr.push((0.5 * r - 0.418688 * g - 0.081312 * b) as i16);
    }
    YCbCr { l, cb, cr }
}

fn from_ycbcr(y: &[u8], cb: &[i16], cr: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(y.len() * 3);
    for i in 0..y.len() {
        let yf = y[i] as f32;
        let cbf = cb[i] as f32;
        let crf = cr[i] as f32;
        let r = yf + 1.402 * crf;
        let g = yf - 0.344136 * cbf - 0.714136 * crf;
        let b = yf + 1.772 * cbf;
        out.push(r.round().clamp(0.0, 255.0) as u8);
        out.push(g.round().clamp(0.0, 255.0) as u8);
        out.push(b.round().clamp(0.0, 255.0) as u8);
    }
    out
}

/// Contrast-limited adaptive histogram equalization over a tiled grid.
/// Each tile's histogram is clipped at `clip_limit` (expressed as a
/// multiple of the tile's uniform bin height) and the excess redistributed
/// uniformly before building the cumulative mapping, the standard CLAHE
/// formulation. Interpolation between tile mappings uses bilinear weights
/// by tile-center distance so there are no block edges in the output.
fn clahe(plane: &[u8], width: u32, height: u32, clip_limit: f32, tiles: u32) -> Vec<u8> {
    let width = width as usize;
    let height = height as usize;
    let tiles = tiles.max(1) as usize;
    let tile_w = (width + tiles - 1) / tiles;
    let tile_h = (height + tiles - 1) / tiles;

    // Per-tile cumulative mapping tables.
    let mut mappings: Vec<Vec<[u8; 256]>> = Vec::with_capacity(tiles);
    for ty in 0..tiles {
        let mut row = Vec::with_capacity(tiles);
        for tx in 0..tiles {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            row.push(tile_mapping(plane, width, x0, y0, x1, y1, clip_limit));
        }
        mappings.push(row);
    }

    let mut out = vec![0u8; plane.len()];
    for y in 0..height {
        for x in 0..width {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
            let tx0 = fx.floor().clamp(0.0, (tiles - 1) as f32) as usize;
            let ty0 = fy.floor().clamp(0.0, (tiles - 1) as f32) as usize;
            let tx1 = (tx0 + 1).min(tiles - 1);
            let ty1 = (ty0 + 1).min(tiles - 1);
            let wx = (fx - tx0 as f32).clamp(0.0, 1.0);
            let wy = (fy - ty0 as f32).clamp(0.0, 1.0);

            let v = plane[y * width + x] as usize;
            let v00 = mappings[ty0][tx0][v] as f32;
            let v01 = mappings[ty0][tx1][v] as f32;
            let v10 = mappings[ty1][tx0][v] as f32;
            let v11 = mappings[ty1][tx1][v] as f32;
            let top = v00 * (1.0 - wx) + v01 * wx;
            let bottom = v10 * (1.0 - wx) + v11 * wx;
            let value = top * (1.0 - wy) + bottom * wy;
            out[y * width + x] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn tile_mapping(
    plane: &[u8],
    width: usize,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
    clip_limit: f32,
) -> [u8; 256] {
    let mut hist = [0u32; 256];
    let mut count = 0u32;
    for y in y0..y1 {
        for x in x0..x1 {
            hist[plane[y * width + x] as usize] += 1;
            count += 1;
        }
    }
    if count == 0 {
        let mut identity = [0u8; 256];
        for (i, slot) in identity.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return identity;
    }

    let clip = ((clip_limit * count as f32 / 256.0).max(1.0)) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let redistribute = excess / 256;
    let remainder = excess % 256;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += redistribute;
        if (i as u32) < remainder {
            *bin += 1;
        }
    }

    let mut cdf = [0u32; 256];
    let mut running = 0u32;
    for (i, &bin) in hist.iter().enumerate() {
        running += bin;
        cdf[i] = running;
    }
    let mut mapping = [0u8; 256];
    for i in 0..256 {
        mapping[i] = (cdf[i] as f32 * 255.0 / count as f32).round().clamp(0.0, 255.0) as u8;
    }
    mapping
}

/// Full rescue path from spec §4.3: CLAHE on lightness, merge back, unsharp
/// mask, then flatten originally-blown-out pixels to neutral gray.
pub fn rescue(color: &[u8], width: u32, height: u32, thresholds: &Thresholds) -> Vec<u8> {
    let ycbcr = to_ycbcr(color);
    let equalized_l = clahe(
        &ycbcr.l,
        width,
        height,
        thresholds.glare_clahe_clip_limit,
        thresholds.glare_clahe_tiles,
    );
    let merged = from_ycbcr(&equalized_l, &ycbcr.cb, &ycbcr.cr);
    let sharpened =
        super::blur::unsharp_mask_color(&merged, width, height, thresholds.glare_rescue_strength);

    let mut out = sharpened;
    for (i, chunk) in color.chunks_exact(3).enumerate() {
        if chunk.iter().any(|&c| c > 252) {
            out[i * 3] = 150;
            out[i * 3 + 1] = 150;
            out[i * 3 + 2] = 150;
        }
    }
    out
}
