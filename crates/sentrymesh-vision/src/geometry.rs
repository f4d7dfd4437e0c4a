//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Rotate/Flip, Crop and Resize (spec §4.4). All three operate on the raw
//! BGR byte buffer directly rather than routing through `image`'s colour
//! types, since geometry doesn't care about channel order.

use anyhow::{bail, Result};
use sentrymesh_core::{GpuFrame, PipelineContext, PuResult, SyncProcessingUnit};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    None,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(deg: i32) -> Option<Self> {
        match deg.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }
}

/// Flip axis codes match OpenCV's `cv::flip` convention (spec §4.4): -1 both
/// axes, 0 vertical, 1 horizontal.
#[derive(Clone, Copy, Debug)]
pub enum FlipCode {
    Both,
    Vertical,
    Horizontal,
}

impl FlipCode {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(FlipCode::Both),
            0 => Some(FlipCode::Vertical),
            1 => Some(FlipCode::Horizontal),
            _ => None,
        }
    }
}

pub struct RotateFlip {
    pub rotation: Rotation,
    pub flip: Option<FlipCode>,
}

impl SyncProcessingUnit for RotateFlip {
    fn name(&self) -> &str {
        "RotateFlip"
    }

    fn process(&mut self, frame: &mut GpuFrame, _ctx: &mut PipelineContext) -> PuResult {
        let (w, h) = frame.size();
        let (mut out, mut out_w, mut out_h) = (frame.data().to_vec(), w, h);

        match self.rotation {
            Rotation::None => {}
            Rotation::Deg90 => {
                out = rotate90(&out, w, h);
                out_w = h;
                out_h = w;
            }
            Rotation::Deg180 => out = rotate180(&out, w, h),
            Rotation::Deg270 => {
                out = rotate270(&out, w, h);
                out_w = h;
                out_h = w;
            }
        }

        if let Some(flip) = self.flip {
            out = flip_pixels(&out, out_w, out_h, flip);
        }

        *frame = GpuFrame::new(out_w, out_h, out);
        PuResult::SuccessAndContinue
    }
}

fn rotate90(src: &[u8], w: u32, h: u32) -> Vec<u8> {
    let (w, h) = (w as usize, h as usize);
    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let src_idx = (y * w + x) * 3;
            let dst_x = h - 1 - y;
            let dst_y = x;
            let dst_idx = (dst_y * h + dst_x) * 3;
            out[dst_idx..dst_idx + 3].copy_from_slice(&src[src_idx..src_idx + 3]);
        }
    }
    out
}

fn rotate270(src: &[u8], w: u32, h: u32) -> Vec<u8> {
    let (w, h) = (w as usize, h as usize);
    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let src_idx = (y * w + x) * 3;
            let dst_x = y;
            let dst_y = w - 1 - x;
            let dst_idx = (dst_y * h + dst_x) * 3;
            out[dst_idx..dst_idx + 3].copy_from_slice(&src[src_idx..src_idx + 3]);
        }
    }
    out
}

fn rotate180(src: &[u8], w: u32, h: u32) -> Vec<u8> {
    let mut out = src.to_vec();
    let total = (w * h) as usize;
    for i in 0..total / 2 {
        let j = total - 1 - i;
        for c in 0..3 {
            out.swap(i * 3 + c, j * 3 + c);
        }
    }
    out
}

fn flip_pixels(src: &[u8], w: u32, h: u32, code: FlipCode) -> Vec<u8> {
    let (w, h) = (w as usize, h as usize);
    let mut out = vec![0u8; src.len()];
    for y in 0..h {
        for x in 0..w {
            let (sx, sy) = match code {
                FlipCode::Horizontal => (w - 1 - x, y),
                FlipCode::Vertical => (x, h - 1 - y),
                FlipCode::Both => (w - 1 - x, h - 1 - y),
            };
            let src_idx = (sy * w + sx) * 3;
            let dst_idx = (y * w + x) * 3;
            out[dst_idx..dst_idx + 3].copy_from_slice(&src[src_idx..src_idx + 3]);
        }
    }
    out
}

/// Four fractional margins (spec §4.4). `left+right<1, top+bottom<1`.
pub struct Crop {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl SyncProcessingUnit for Crop {
    fn name(&self) -> &str {
        "Crop"
    }

    fn process(&mut self, frame: &mut GpuFrame, _ctx: &mut PipelineContext) -> PuResult {
        if self.left + self.right >= 1.0 || self.top + self.bottom >= 1.0 {
            return PuResult::FailureAndStop;
        }
        let (w, h) = frame.size();
        let x0 = (self.left * w as f32) as u32;
        let x1 = w - (self.right * w as f32) as u32;
        let y0 = (self.top * h as f32) as u32;
        let y1 = h - (self.bottom * h as f32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return PuResult::FailureAndStop;
        }

        let new_w = x1 - x0;
        let new_h = y1 - y0;
        let src = frame.data();
        let mut out = Vec::with_capacity((new_w * new_h * 3) as usize);
        for y in y0..y1 {
            let row_start = ((y * w + x0) * 3) as usize;
            let row_len = (new_w * 3) as usize;
            out.extend_from_slice(&src[row_start..row_start + row_len]);
        }
        *frame = GpuFrame::new(new_w, new_h, out);
        PuResult::SuccessAndContinue
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub enum Interpolation {
    Nearest,
    #[default]
    Linear,
    Cubic,
    Area,
}

impl Interpolation {
    fn filter_type(self) -> image::imageops::FilterType {
        use image::imageops::FilterType;
        match self {
            Interpolation::Nearest => FilterType::Nearest,
            // `image` has no dedicated "area" filter; Triangle is the closest
            // box-like downsampling kernel it ships.
            Interpolation::Linear | Interpolation::Area => FilterType::Triangle,
            Interpolation::Cubic => FilterType::CatmullRom,
        }
    }
}

pub enum ResizeTarget {
    Absolute { width: u32, height: u32 },
    Relative { scale: f32 },
}

pub struct Resize {
    pub target: ResizeTarget,
    pub interpolation: Interpolation,
}

impl SyncProcessingUnit for Resize {
    fn name(&self) -> &str {
        "Resize"
    }

    fn process(&mut self, frame: &mut GpuFrame, _ctx: &mut PipelineContext) -> PuResult {
        let (w, h) = frame.size();
        let (new_w, new_h) = match self.target {
            ResizeTarget::Absolute { width, height } => (width, height),
            ResizeTarget::Relative { scale } => (
                ((w as f32) * scale).round().max(1.0) as u32,
                ((h as f32) * scale).round().max(1.0) as u32,
            ),
        };
        if new_w == 0 || new_h == 0 {
            return PuResult::FailureAndStop;
        }

        let buf = match image::RgbImage::from_raw(w, h, frame.data().to_vec()) {
            Some(b) => b,
            None => return PuResult::FailureAndStop,
        };
        let resized = image::imageops::resize(&buf, new_w, new_h, self.interpolation.filter_type());
        *frame = GpuFrame::new(new_w, new_h, resized.into_raw());
        PuResult::SuccessAndContinue
    }
}

pub fn parse_interpolation(name: &str) -> Result<Interpolation> {
    Ok(match name {
        "nearest" => Interpolation::Nearest,
        "linear" => Interpolation::Linear,
        "cubic" => Interpolation::Cubic,
        "area" => Interpolation::Area,
        other => bail!("unknown interpolation '{other}'"),
    })
}
