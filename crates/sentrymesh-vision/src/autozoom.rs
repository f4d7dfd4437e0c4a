//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Auto-zoom PU (spec §4.4): keeps a smoothly-moving crop window covering
//! the union of interesting YOLO boxes, falling back to the full frame when
//! there is nothing to track.

use sentrymesh_core::{BBox, GpuFrame, PipelineContext, PuResult, SyncProcessingUnit};

#[derive(Clone, Copy, Debug)]
struct Window {
    cx: f32,
    cy: f32,
    w: f32,
}

pub struct AutoZoom {
    /// Fraction of the frame's width/height the fallback window occupies
    /// when there are no interesting boxes to track.
    pub output_scale_factor: f32,
    /// Output width / output height, preserved as the crop window migrates.
    pub output_aspect_ratio: f32,
    /// Maximum per-tick migration of the window centre or width, in pixels.
    pub smooth_step_pixel: f32,
    current: Option<Window>,
}

impl AutoZoom {
    pub fn new(output_scale_factor: f32, output_aspect_ratio: f32, smooth_step_pixel: f32) -> Self {
        Self {
            output_scale_factor,
            output_aspect_ratio,
            smooth_step_pixel,
            current: None,
        }
    }

    /// Union of `boxes` padded by 10% on every side (spec §4.4), or `None`
    /// if `boxes` is empty.
    fn union_with_padding(boxes: &[BBox]) -> Option<(f32, f32, f32, f32)> {
        let mut iter = boxes.iter();
        let first = iter.next()?;
        let mut x0 = first.x;
        let mut y0 = first.y;
        let mut x1 = first.x + first.w;
        let mut y1 = first.y + first.h;
        for b in iter {
            x0 = x0.min(b.x);
            y0 = y0.min(b.y);
            x1 = x1.max(b.x + b.w);
            y1 = y1.max(b.y + b.h);
        }
        let (w, h) = (x1 - x0, y1 - y0);
        let pad_x = w * 0.1;
        let pad_y = h * 0.1;
        Some((x0 - pad_x, y0 - pad_y, w + 2.0 * pad_x, h + 2.0 * pad_y))
    }

    fn target_window(&self, frame_w: f32, frame_h: f32, boxes: &[BBox]) -> Window {
        match Self::union_with_padding(boxes) {
            Some((x, y, w, h)) => {
                let cx = x + w / 2.0;
                let cy = y + h / 2.0;
                let target_w = w.max(h * self.output_aspect_ratio);
                Window { cx, cy, w: target_w }
            }
            None => Window {
                cx: frame_w / 2.0,
                cy: frame_h / 2.0,
                w: frame_w * self.output_scale_factor,
            },
        }
    }

    fn step_toward(from: f32, to: f32, max_step: f32) -> f32 {
        let delta = to - from;
        if delta.abs() <= max_step {
            to
        } else {
            from + max_step * delta.signum()
        }
    }

    fn clamp_to_frame(window: Window, frame_w: f32, frame_h: f32, aspect_ratio: f32) -> Window {
        let w = window.w.min(frame_w).max(1.0);
        let h = (w / aspect_ratio).min(frame_h).max(1.0);
        let w = h * aspect_ratio;
        let half_w = w / 2.0;
        let half_h = h / 2.0;
        let cx = window.cx.clamp(half_w, frame_w - half_w);
        let cy = window.cy.clamp(half_h, frame_h - half_h);
        Window { cx, cy, w }
    }
}

impl SyncProcessingUnit for AutoZoom {
    fn name(&self) -> &str {
        "AutoZoom"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let (fw, fh) = frame.size();
        let (fw, fh) = (fw as f32, fh as f32);

        let boxes: Vec<BBox> = ctx
            .yolo
            .kept_indices
            .iter()
            .zip(ctx.yolo.is_interesting.iter())
            .filter(|(_, &interesting)| interesting)
            .map(|(&idx, _)| ctx.yolo.boxes[idx])
            .collect();

        let target = self.target_window(fw, fh, &boxes);
        let previous = self.current.unwrap_or(target);
        let stepped = Window {
            cx: Self::step_toward(previous.cx, target.cx, self.smooth_step_pixel),
            cy: Self::step_toward(previous.cy, target.cy, self.smooth_step_pixel),
            w: Self::step_toward(previous.w, target.w, self.smooth_step_pixel),
        };
        let window = Self::clamp_to_frame(stepped, fw, fh, self.output_aspect_ratio);
        self.current = Some(window);

        let half_w = window.w / 2.0;
        let half_h = (window.w / self.output_aspect_ratio) / 2.0;
        let x0 = (window.cx - half_w).round() as u32;
        let y0 = (window.cy - half_h).round() as u32;
        let cw = (half_w * 2.0).round() as u32;
        let ch = (half_h * 2.0).round() as u32;

        let src = frame.data();
        let mut cropped = Vec::with_capacity((cw * ch * 3) as usize);
        for y in y0..(y0 + ch).min(fh as u32) {
            let row_start = ((y * fw as u32 + x0) * 3) as usize;
            let row_end = row_start + (cw * 3) as usize;
            if row_end > src.len() {
                return PuResult::FailureAndContinue;
            }
            cropped.extend_from_slice(&src[row_start..row_end]);
        }
        *frame = GpuFrame::new(cw, ch, cropped);
        PuResult::SuccessAndContinue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrymesh_core::{DeviceInfo, YoloContext};
    use std::time::Instant;

    fn ctx_with_interesting(boxes: Vec<BBox>) -> PipelineContext {
        let mut c = PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 200,
                expected_height: 100,
            },
            Instant::now(),
        );
        let n = boxes.len();
        c.yolo = YoloContext {
            input_size: (200, 100),
            boxes,
            class_ids: vec![0; n],
            confidences: vec![0.9; n],
            kept_indices: (0..n).collect(),
            is_interesting: vec![true; n],
        };
        c
    }

    #[test]
    fn falls_back_to_full_frame_scale_with_no_interesting_boxes() {
        let mut pu = AutoZoom::new(1.0, 2.0, 1000.0);
        let mut frame = GpuFrame::placeholder(200, 100);
        let mut ctx = ctx_with_interesting(vec![]);
        let result = pu.process(&mut frame, &mut ctx);
        assert!(matches!(result, PuResult::SuccessAndContinue));
        assert_eq!(frame.size().0, 200);
    }

    #[test]
    fn large_smooth_step_reaches_target_in_one_tick() {
        let mut pu = AutoZoom::new(1.0, 2.0, 10_000.0);
        let mut frame = GpuFrame::placeholder(200, 100);
        let mut ctx = ctx_with_interesting(vec![BBox { x: 80.0, y: 40.0, w: 20.0, h: 10.0 }]);
        pu.process(&mut frame, &mut ctx);
        let window = pu.current.expect("window computed");
        assert!((window.cx - 90.0).abs() < 1.0);
    }

    #[test]
    fn small_smooth_step_limits_migration_per_tick() {
        let mut pu = AutoZoom::new(1.0, 2.0, 1.0);
        let mut near = ctx_with_interesting(vec![BBox { x: 0.0, y: 40.0, w: 10.0, h: 10.0 }]);
        pu.process(&mut GpuFrame::placeholder(200, 100), &mut near);
        let first = pu.current.unwrap();

        let mut far = ctx_with_interesting(vec![BBox { x: 180.0, y: 40.0, w: 10.0, h: 10.0 }]);
        pu.process(&mut GpuFrame::placeholder(200, 100), &mut far);
        let second = pu.current.unwrap();
        assert!((second.cx - first.cx).abs() <= 1.0 + f32::EPSILON);
    }
}
