//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The frame data model (spec §3.1 / §3.2): a GPU-resident image substitute
//! (an owned BGR byte buffer in this CPU reference workspace — see
//! DESIGN.md for the GPU-library substitution) plus the mutable per-frame
//! context that travels with it through the synchronous stages.

use std::time::Instant;

/// Owns a BGR8 image. Stands in for the GPU-resident matrix the production
/// system keeps on-device; `clone()` here is the "deep copy" the async PU
/// contract requires on enqueue (spec §3.1, §4.3).
#[derive(Clone, Debug)]
pub struct GpuFrame {
    width: u32,
    height: u32,
    /// Interleaved BGR, row-major, no padding.
    data: Vec<u8>,
}

impl GpuFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 3);
        Self {
            width,
            height,
            data,
        }
    }

    /// A solid grey placeholder frame, substituted when the real source is
    /// unavailable (spec §4.1).
    pub fn placeholder(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![128u8; width as usize * height as usize * 3],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Explicit deep copy, named to match the "deep-copies the frame into
    /// its queue" language in spec §4.3 rather than relying on an implicit
    /// `Clone::clone` call reading as free.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}

/// {name, uri, expected width, expected height} (spec §3.2).
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub uri: String,
    pub expected_width: u32,
    pub expected_height: u32,
}

/// A single axis-aligned box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    pub fn area(&self) -> f32 {
        (self.w.max(0.0)) * (self.h.max(0.0))
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// Remembered YOLO inference outputs (spec §3.2 `yolo`). Carried forward on
/// ticks where the object detector PU skips inference (§4.4).
#[derive(Clone, Debug, Default)]
pub struct YoloContext {
    pub input_size: (u32, u32),
    pub boxes: Vec<BBox>,
    pub class_ids: Vec<i32>,
    pub confidences: Vec<f32>,
    /// Indices into `boxes`/`class_ids`/`confidences` that survived NMS.
    pub kept_indices: Vec<usize>,
    /// Parallel to `kept_indices`: whether Object Prune marked it interesting.
    pub is_interesting: Vec<bool>,
}

impl YoloContext {
    pub fn kept(&self) -> impl Iterator<Item = usize> + '_ {
        self.kept_indices.iter().copied()
    }

    pub fn interesting_boxes(&self) -> impl Iterator<Item = &BBox> + '_ {
        self.kept_indices
            .iter()
            .zip(self.is_interesting.iter())
            .filter(|(_, interesting)| **interesting)
            .map(|(idx, _)| &self.boxes[*idx])
    }
}

/// One YuNet face detection (spec §3.2 `yunet`): bounding box plus five
/// landmark points, in frame coordinates.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaceDetection {
    pub bbox: BBox,
    pub landmarks: [(f32, f32); 5],
    pub confidence: f32,
}

/// Face recognition category (spec §3.3 Gallery, §4.4 Face Recognizer).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceCategory {
    Authorised,
    Unauthorised,
    Unknown,
}

/// One recognition result, aligned 1-to-1 with a `FaceDetection` (spec §3.2
/// `sface`).
#[derive(Clone, Debug)]
pub struct FaceRecognition {
    /// `None` renders as "Unknown".
    pub identity: Option<String>,
    pub similarity: f32,
    pub l2_norm: f32,
    pub category: FaceCategory,
    pub threshold_crossed: bool,
}

/// Mutable per-frame context that travels with the frame through the
/// synchronous pipeline (spec §3.2).
#[derive(Clone, Debug)]
pub struct PipelineContext {
    pub device: DeviceInfo,
    pub captured_from_real_device: bool,
    pub capture_timestamp: Instant,
    pub capture_from_this_device_since: Instant,
    pub frame_seq_num: u64,
    pub processing_unit_idx: usize,
    /// Fraction in [0,1]; -1.0 if undefined.
    pub change_rate: f32,
    pub fps: f32,
    pub yolo: YoloContext,
    pub yunet: Vec<FaceDetection>,
    pub sface: Vec<FaceRecognition>,
    pub text_to_overlay: String,
    pub latency_start_time: Option<Instant>,
}

impl PipelineContext {
    pub fn new(device: DeviceInfo, now: Instant) -> Self {
        Self {
            device,
            captured_from_real_device: false,
            capture_timestamp: now,
            capture_from_this_device_since: now,
            frame_seq_num: 0,
            processing_unit_idx: 0,
            change_rate: -1.0,
            fps: 0.0,
            yolo: YoloContext::default(),
            yunet: Vec::new(),
            sface: Vec::new(),
            text_to_overlay: String::new(),
            latency_start_time: None,
        }
    }

    /// Implements the invariant: toggling `captured_from_real_device`
    /// between ticks resets `capture_from_this_device_since` to the new
    /// tick's `capture_timestamp` (spec §3.5).
    pub fn stamp_tick(&mut self, now: Instant, captured_from_real_device: bool, seq: u64) {
        if captured_from_real_device != self.captured_from_real_device {
            self.capture_from_this_device_since = now;
        }
        self.captured_from_real_device = captured_from_real_device;
        self.capture_timestamp = now;
        self.frame_seq_num = seq;
        self.processing_unit_idx = 0;
        self.text_to_overlay.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_mid_grey_and_sized() {
        let f = GpuFrame::placeholder(4, 2);
        assert_eq!(f.size(), (4, 2));
        assert!(f.data().iter().all(|&b| b == 128));
    }

    #[test]
    fn stamp_tick_resets_since_on_toggle() {
        let now = Instant::now();
        let mut ctx = PipelineContext::new(
            DeviceInfo {
                name: "front-door".into(),
                uri: "rtsp://example".into(),
                expected_width: 640,
                expected_height: 480,
            },
            now,
        );
        ctx.stamp_tick(now, true, 1);
        let since_real = ctx.capture_from_this_device_since;

        let later = now + std::time::Duration::from_millis(33);
        ctx.stamp_tick(later, true, 2);
        assert_eq!(ctx.capture_from_this_device_since, since_real);

        let later2 = later + std::time::Duration::from_millis(33);
        ctx.stamp_tick(later2, false, 3);
        assert_eq!(ctx.capture_from_this_device_since, later2);
    }
}
