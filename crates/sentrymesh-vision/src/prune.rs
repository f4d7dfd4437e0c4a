//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Object Prune PU (spec §4.4): marks each detection `is_interesting`
//! against a class/region/size policy, with an optional debug overlay of
//! the restrictive edge corridors. The region policy is four independent
//! per-edge constraints (left/right/top/bottom), each checked against the
//! box's own corresponding normalised edge — not a single center-point
//! check — matching the ground-truth `YoloPruneDetectionResults::process`.

use image::Rgb;
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use sentrymesh_core::{GpuFrame, PipelineContext, PuResult, SyncProcessingUnit};

/// Normalised `[min, max]` admissible range for one edge of the box, in
/// `[0,1]` frame-fraction coordinates. Slightly wider than `[0,1]` by
/// default to absorb the same floating-point slack the original constraint
/// struct budgeted for.
#[derive(Clone, Copy, Debug)]
pub struct EdgeRange {
    pub min: f32,
    pub max: f32,
}

impl Default for EdgeRange {
    fn default() -> Self {
        Self { min: -0.01, max: 1.01 }
    }
}

impl EdgeRange {
    fn admits(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Clone, Debug, Default)]
pub struct SizeConstraint {
    pub min_area_ratio: Option<f32>,
    pub max_area_ratio: Option<f32>,
}

impl SizeConstraint {
    fn admits(&self, area_ratio: f32) -> bool {
        match (self.min_area_ratio, self.max_area_ratio) {
            (None, None) => true,
            (Some(min), None) => area_ratio >= min,
            (None, Some(max)) => area_ratio <= max,
            (Some(min), Some(max)) => area_ratio >= min || area_ratio <= max,
        }
    }
}

pub struct ObjectPrune {
    pub allowed_classes: Vec<i32>,
    pub left: EdgeRange,
    pub right: EdgeRange,
    pub top: EdgeRange,
    pub bottom: EdgeRange,
    pub size: SizeConstraint,
    pub debug_overlay: bool,
}

impl SyncProcessingUnit for ObjectPrune {
    fn name(&self) -> &str {
        "ObjectPrune"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let (w, h) = frame.size();
        let frame_area = (w as f32) * (h as f32);

        let kept = ctx.yolo.kept_indices.clone();
        let mut interesting = Vec::with_capacity(kept.len());
        for &idx in &kept {
            let bbox = ctx.yolo.boxes[idx];
            let class_id = ctx.yolo.class_ids[idx];

            let box_left = bbox.x / w as f32;
            let box_right = (bbox.x + bbox.w) / w as f32;
            let box_top = bbox.y / h as f32;
            let box_bottom = (bbox.y + bbox.h) / h as f32;

            let area_ratio = if frame_area > 0.0 {
                bbox.area() / frame_area
            } else {
                0.0
            };

            let class_ok = self.allowed_classes.is_empty() || self.allowed_classes.contains(&class_id);
            let region_ok = self.left.admits(box_left)
                && self.right.admits(box_right)
                && self.top.admits(box_top)
                && self.bottom.admits(box_bottom);
            let size_ok = self.size.admits(area_ratio);

            interesting.push(class_ok && region_ok && size_ok);
        }
        ctx.yolo.is_interesting = interesting;

        if self.debug_overlay {
            draw_edge_corridors(frame, w, h, self.left, self.right, self.top, self.bottom);
        }

        PuResult::SuccessAndContinue
    }
}

fn draw_edge_corridors(
    frame: &mut GpuFrame,
    w: u32,
    h: u32,
    left: EdgeRange,
    right: EdgeRange,
    top: EdgeRange,
    bottom: EdgeRange,
) {
    let mut img = image::RgbImage::from_raw(w, h, frame.data().to_vec())
        .expect("frame buffer length matches width*height*3");

    let tint = Rgb([255u8, 80, 0]);
    let blend = |img: &mut image::RgbImage, rect: Rect| {
        draw_filled_rect_mut(img, rect, tint);
    };

    let is_restrictive = |r: &EdgeRange| r.min > 0.001 || r.max < 0.999;

    if is_restrictive(&left) {
        let cw = (left.min.max(0.0) * w as f32) as i32;
        blend(&mut img, Rect::at(0, 0).of_size(cw.max(1) as u32, h));
    }
    if is_restrictive(&right) {
        let cx = (right.max.min(1.0) * w as f32) as i32;
        blend(&mut img, Rect::at(cx, 0).of_size((w as i32 - cx).max(1) as u32, h));
    }
    if is_restrictive(&top) {
        let ch = (top.min.max(0.0) * h as f32) as i32;
        blend(&mut img, Rect::at(0, 0).of_size(w, ch.max(1) as u32));
    }
    if is_restrictive(&bottom) {
        let cy = (bottom.max.min(1.0) * h as f32) as i32;
        blend(&mut img, Rect::at(0, cy).of_size(w, (h as i32 - cy).max(1) as u32));
    }

    *frame = GpuFrame::new(w, h, img.into_raw());
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrymesh_core::{BBox, DeviceInfo, YoloContext};
    use std::time::Instant;

    fn ctx_with_box(bbox: BBox, class_id: i32) -> PipelineContext {
        let mut c = PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 100,
                expected_height: 100,
            },
            Instant::now(),
        );
        c.yolo = YoloContext {
            input_size: (100, 100),
            boxes: vec![bbox],
            class_ids: vec![class_id],
            confidences: vec![0.9],
            kept_indices: vec![0],
            is_interesting: vec![false],
        };
        c
    }

    #[test]
    fn rejects_box_near_excluded_edge() {
        let mut frame = GpuFrame::placeholder(100, 100);
        let mut ctx = ctx_with_box(BBox { x: 90.0, y: 45.0, w: 8.0, h: 8.0 }, 0);
        let mut pu = ObjectPrune {
            allowed_classes: vec![0],
            left: EdgeRange { min: 0.1, max: 0.9 },
            right: EdgeRange { min: 0.1, max: 0.9 },
            top: EdgeRange::default(),
            bottom: EdgeRange::default(),
            size: SizeConstraint::default(),
            debug_overlay: false,
        };
        pu.process(&mut frame, &mut ctx);
        assert_eq!(ctx.yolo.is_interesting, vec![false]);
    }

    #[test]
    fn accepts_centred_box_of_allowed_class() {
        let mut frame = GpuFrame::placeholder(100, 100);
        let mut ctx = ctx_with_box(BBox { x: 45.0, y: 45.0, w: 10.0, h: 10.0 }, 0);
        let mut pu = ObjectPrune {
            allowed_classes: vec![0],
            left: EdgeRange { min: 0.1, max: 0.9 },
            right: EdgeRange { min: 0.1, max: 0.9 },
            top: EdgeRange { min: 0.1, max: 0.9 },
            bottom: EdgeRange { min: 0.1, max: 0.9 },
            size: SizeConstraint::default(),
            debug_overlay: false,
        };
        pu.process(&mut frame, &mut ctx);
        assert_eq!(ctx.yolo.is_interesting, vec![true]);
    }

    #[test]
    fn box_straddling_edge_boundary_is_rejected_even_though_center_is_inside() {
        // Center sits at x=0.5 (inside a [0.4, 1.01] left band) but the box's
        // own left edge (x=0.2) falls outside that band, so it must be
        // rejected even though a center-point check would have admitted it.
        let mut frame = GpuFrame::placeholder(100, 100);
        let mut ctx = ctx_with_box(BBox { x: 20.0, y: 10.0, w: 60.0, h: 10.0 }, 0);
        let mut pu = ObjectPrune {
            allowed_classes: vec![],
            left: EdgeRange { min: 0.4, max: 1.01 },
            right: EdgeRange::default(),
            top: EdgeRange::default(),
            bottom: EdgeRange::default(),
            size: SizeConstraint::default(),
            debug_overlay: false,
        };
        pu.process(&mut frame, &mut ctx);
        assert_eq!(ctx.yolo.is_interesting, vec![false]);
    }

    #[test]
    fn min_area_ratio_zero_admits_all_sizes() {
        let mut frame = GpuFrame::placeholder(100, 100);
        let mut ctx = ctx_with_box(BBox { x: 0.0, y: 0.0, w: 1.0, h: 1.0 }, 0);
        let mut pu = ObjectPrune {
            allowed_classes: vec![],
            left: EdgeRange::default(),
            right: EdgeRange::default(),
            top: EdgeRange::default(),
            bottom: EdgeRange::default(),
            size: SizeConstraint {
                min_area_ratio: Some(0.0),
                max_area_ratio: None,
            },
            debug_overlay: false,
        };
        pu.process(&mut frame, &mut ctx);
        assert_eq!(ctx.yolo.is_interesting, vec![true]);
    }
}
