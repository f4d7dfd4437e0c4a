//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! The four overlay PUs (spec §4.4): boxes, landmarks, face identities, and
//! the free-form info/template text banner.

use anyhow::{Context, Result};
use chrono::Local;
use image::Rgb;
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use sentrymesh_core::{render_template, GpuFrame, PipelineContext, PuResult, SyncProcessingUnit, TemplateValues};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Loads a TTF/OTF font once at PU-construction time, from the path given
/// by the operator's `httpService`/overlay config. Every overlay PU shares
/// one `Arc<Font>` rather than re-reading the file per frame.
#[derive(Clone)]
pub struct OverlayFont(Arc<Font<'static>>);

impl OverlayFont {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading font file {}", path.display()))?;
        let font = Font::try_from_vec(bytes)
            .with_context(|| format!("parsing font file {}", path.display()))?;
        Ok(Self(Arc::new(font)))
    }
}

fn class_color(class_id: i32, interesting: bool) -> Rgb<u8> {
    if !interesting {
        return Rgb([140, 140, 140]);
    }
    // Deterministic per-class colour: a cheap hash into a fixed hue ramp.
    let hue = ((class_id as u32).wrapping_mul(2_654_435_761) % 360) as f32;
    let (r, g, b) = hsv_to_rgb(hue, 0.65, 0.95);
    Rgb([r, g, b])
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h as u32 {
        0..=59 => (c, x, 0.0),
        60..=119 => (x, c, 0.0),
        120..=179 => (0.0, c, x),
        180..=239 => (0.0, x, c),
        240..=299 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    )
}

fn to_rgb_image(frame: &GpuFrame) -> image::RgbImage {
    let (w, h) = frame.size();
    image::RgbImage::from_raw(w, h, frame.data().to_vec())
        .expect("frame buffer length matches width*height*3")
}

fn write_back(frame: &mut GpuFrame, img: image::RgbImage, w: u32, h: u32) {
    *frame = GpuFrame::new(w, h, img.into_raw());
}

/// Draws `text` twice: a black pass offset by one pixel in each direction
/// for the "glow", then the colour pass on top (spec §4.4 "white text with
/// a black glow"). A PU with no font configured silently skips drawing —
/// the frame still carries its boxes/overlays, just without labels.
fn draw_text_with_glow(img: &mut image::RgbImage, font: &Option<OverlayFont>, text: &str, x: i32, y: i32, height: f32, color: Rgb<u8>) {
    let Some(font) = font else { return };
    let font = &font.0;
    let scale = Scale::uniform(height);
    for (dx, dy) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
        draw_text_mut(img, Rgb([0, 0, 0]), x + dx, y + dy, scale, font, text);
    }
    draw_text_mut(img, color, x, y, scale, font, text);
}

/// Draws YOLO boxes with class colour, greyed if not interesting, and a
/// `"{class} {conf}"` label (spec §4.4 "Overlays").
pub struct OverlayBoxes {
    pub class_names: Vec<String>,
    pub font: Option<OverlayFont>,
}

impl SyncProcessingUnit for OverlayBoxes {
    fn name(&self) -> &str {
        "OverlayBoxes"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let (w, h) = frame.size();
        let mut img = to_rgb_image(frame);
        for (&idx, &interesting) in ctx.yolo.kept_indices.iter().zip(ctx.yolo.is_interesting.iter()) {
            let bbox = ctx.yolo.boxes[idx];
            let class_id = ctx.yolo.class_ids[idx];
            let confidence = ctx.yolo.confidences[idx];
            let color = class_color(class_id, interesting);
            let rect = Rect::at(bbox.x as i32, bbox.y as i32)
                .of_size(bbox.w.max(1.0) as u32, bbox.h.max(1.0) as u32);
            draw_hollow_rect_mut(&mut img, rect, color);

            let name = self
                .class_names
                .get(class_id as usize)
                .map(|s| s.as_str())
                .unwrap_or("obj");
            let label = format!("{name} {confidence:.2}");
            draw_text_with_glow(
                &mut img,
                &self.font,
                &label,
                bbox.x as i32,
                (bbox.y - 14.0).max(0.0) as i32,
                14.0,
                color,
            );
        }
        write_back(frame, img, w, h);
        PuResult::SuccessAndContinue
    }
}

/// Draws the five YuNet landmarks as small circles (spec §4.4).
pub struct OverlayLandmarks;

impl SyncProcessingUnit for OverlayLandmarks {
    fn name(&self) -> &str {
        "OverlayLandmarks"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let (w, h) = frame.size();
        let mut img = to_rgb_image(frame);
        for detection in &ctx.yunet {
            for &(x, y) in &detection.landmarks {
                draw_filled_circle_mut(&mut img, (x as i32, y as i32), 2, Rgb([0, 255, 0]));
            }
        }
        write_back(frame, img, w, h);
        PuResult::SuccessAndContinue
    }
}

/// Draws SFace identities adjacent to their corresponding YuNet box (spec
/// §4.4).
pub struct OverlayFaceIdentity {
    pub font: Option<OverlayFont>,
}

impl SyncProcessingUnit for OverlayFaceIdentity {
    fn name(&self) -> &str {
        "OverlayFaceIdentity"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let (w, h) = frame.size();
        let mut img = to_rgb_image(frame);
        for (detection, recognition) in ctx.yunet.iter().zip(ctx.sface.iter()) {
            let label = recognition.identity.as_deref().unwrap_or("Unknown");
            let color = if recognition.threshold_crossed {
                Rgb([0, 200, 0])
            } else {
                Rgb([200, 0, 0])
            };
            draw_text_with_glow(
                &mut img,
                &self.font,
                label,
                detection.bbox.x as i32,
                (detection.bbox.y + detection.bbox.h + 2.0) as i32,
                14.0,
                color,
            );
        }
        write_back(frame, img, w, h);
        PuResult::SuccessAndContinue
    }
}

/// Renders `ctx.text_to_overlay` and/or a formatted template as white text
/// with a black glow at the top of the frame (spec §4.4 "Overlays").
pub struct OverlayInfo {
    pub font: Option<OverlayFont>,
    pub template: Option<String>,
    pub text_height_ratio: f32,
}

impl SyncProcessingUnit for OverlayInfo {
    fn name(&self) -> &str {
        "OverlayInfo"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let (w, h) = frame.size();
        let mut img = to_rgb_image(frame);
        let scale = self.text_height_ratio * h as f32;

        let mut lines: Vec<String> = Vec::new();
        if !ctx.text_to_overlay.is_empty() {
            lines.extend(ctx.text_to_overlay.lines().map(|s| s.to_string()));
        }
        if let Some(template) = &self.template {
            let values = TemplateValues {
                device_name: ctx.device.name.clone(),
                timestamp: Some(Local::now()),
                change_rate: Some(ctx.change_rate.max(0.0)),
                fps: Some(ctx.fps),
                ..Default::default()
            };
            lines.push(render_template(template, &values));
        }

        for (i, line) in lines.iter().enumerate() {
            let y = (scale * i as f32) as i32;
            draw_text_with_glow(&mut img, &self.font, line, 4, y, scale.max(8.0), Rgb([255, 255, 255]));
        }

        write_back(frame, img, w, h);
        PuResult::SuccessAndContinue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrymesh_core::DeviceInfo;
    use std::time::Instant;

    #[test]
    fn overlay_landmarks_does_not_panic_on_empty_detections() {
        let mut frame = GpuFrame::placeholder(32, 32);
        let mut ctx = PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 32,
                expected_height: 32,
            },
            Instant::now(),
        );
        let mut pu = OverlayLandmarks;
        pu.process(&mut frame, &mut ctx);
        assert_eq!(frame.size(), (32, 32));
    }

    #[test]
    fn overlay_boxes_draws_nothing_with_no_detections() {
        let mut frame = GpuFrame::placeholder(32, 32);
        let mut ctx = PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 32,
                expected_height: 32,
            },
            Instant::now(),
        );
        let mut pu = OverlayBoxes {
            class_names: vec!["person".into()],
            font: None,
        };
        pu.process(&mut frame, &mut ctx);
        assert_eq!(frame.size(), (32, 32));
    }
}
