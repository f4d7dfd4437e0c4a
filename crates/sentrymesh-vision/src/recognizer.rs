//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Face Recognizer PU (spec §4.4 "Face Recognizer (SFace)"): for every
//! YuNet detection at or above the inference threshold, aligns/crops, embeds,
//! and matches against the gallery, producing one `sface` result per `yunet`
//! detection (spec §3.2).

use crate::backend::InferenceBackend;
use crate::gallery::{l2_normalise, Gallery};
use sentrymesh_core::{FaceCategory, FaceRecognition, GpuFrame, PipelineContext, PuResult, SyncProcessingUnit};

pub struct FaceRecognizer {
    backend: Box<dyn InferenceBackend>,
    gallery: Gallery,
    pub inference_confidence_threshold: f32,
    pub match_threshold: f32,
}

impl FaceRecognizer {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        gallery: Gallery,
        inference_confidence_threshold: f32,
        match_threshold: f32,
    ) -> Self {
        Self {
            backend,
            gallery,
            inference_confidence_threshold,
            match_threshold,
        }
    }
}

/// Crops the bounding box with a small margin and resizes to SFace's 112x112
/// input, a simplified stand-in for a landmark-driven similarity-transform
/// alignment (spec §4.4: "aligns/crops using the landmark geometry").
fn align_crop(frame: &GpuFrame, bbox: sentrymesh_core::BBox) -> Option<(Vec<u8>, u32, u32)> {
    let (w, h) = frame.size();
    let margin = 0.15;
    let x0 = (bbox.x - bbox.w * margin).max(0.0) as u32;
    let y0 = (bbox.y - bbox.h * margin).max(0.0) as u32;
    let x1 = ((bbox.x + bbox.w * (1.0 + margin)) as u32).min(w);
    let y1 = ((bbox.y + bbox.h * (1.0 + margin)) as u32).min(h);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let (cw, ch) = (x1 - x0, y1 - y0);
    let src = frame.data();
    let mut cropped = Vec::with_capacity((cw * ch * 3) as usize);
    for y in y0..y1 {
        let row_start = ((y * w + x0) * 3) as usize;
        cropped.extend_from_slice(&src[row_start..row_start + (cw * 3) as usize]);
    }
    let img = image::RgbImage::from_raw(cw, ch, cropped)?;
    let resized = image::imageops::resize(&img, 112, 112, image::imageops::FilterType::Triangle);
    Some((resized.into_raw(), 112, 112))
}

impl SyncProcessingUnit for FaceRecognizer {
    fn name(&self) -> &str {
        "FaceRecognizer"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let span = tracing::debug_span!("face_recognize", seq = ctx.frame_seq_num, faces = ctx.yunet.len());
        let _enter = span.enter();
        let mut results = Vec::with_capacity(ctx.yunet.len());
        for detection in &ctx.yunet {
            if detection.confidence < self.inference_confidence_threshold {
                results.push(FaceRecognition {
                    identity: None,
                    similarity: 0.0,
                    l2_norm: 0.0,
                    category: FaceCategory::Unknown,
                    threshold_crossed: false,
                });
                continue;
            }

            let Some((crop, cw, ch)) = align_crop(frame, detection.bbox) else {
                results.push(FaceRecognition {
                    identity: None,
                    similarity: 0.0,
                    l2_norm: 0.0,
                    category: FaceCategory::Unknown,
                    threshold_crossed: false,
                });
                continue;
            };

            let embedding = match self.backend.embed_face(&crop, cw, ch) {
                Ok(e) => l2_normalise(&e.0),
                Err(_) => {
                    results.push(FaceRecognition {
                        identity: None,
                        similarity: 0.0,
                        l2_norm: 0.0,
                        category: FaceCategory::Unknown,
                        threshold_crossed: false,
                    });
                    continue;
                }
            };
            let l2_norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();

            match self.gallery.best_match(&embedding) {
                Some((name, identity, score)) if score > self.match_threshold => {
                    results.push(FaceRecognition {
                        identity: Some(name.to_string()),
                        similarity: score,
                        l2_norm,
                        category: identity.category,
                        threshold_crossed: true,
                    });
                }
                Some((_, _, score)) => {
                    results.push(FaceRecognition {
                        identity: None,
                        similarity: score,
                        l2_norm,
                        category: FaceCategory::Unknown,
                        threshold_crossed: false,
                    });
                }
                None => {
                    results.push(FaceRecognition {
                        identity: None,
                        similarity: 0.0,
                        l2_norm,
                        category: FaceCategory::Unknown,
                        threshold_crossed: false,
                    });
                }
            }
        }
        ctx.sface = results;
        PuResult::SuccessAndContinue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use sentrymesh_core::{BBox, DeviceInfo, FaceDetection};
    use std::time::Instant;

    #[test]
    fn produces_one_result_per_yunet_detection() {
        let gallery = Gallery::default();
        let mut pu = FaceRecognizer::new(Box::new(NullBackend), gallery, 0.5, 0.6);
        let mut frame = GpuFrame::placeholder(64, 64);
        let mut ctx = PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 64,
                expected_height: 64,
            },
            Instant::now(),
        );
        ctx.yunet = vec![
            FaceDetection {
                bbox: BBox { x: 10.0, y: 10.0, w: 20.0, h: 20.0 },
                landmarks: [(0.0, 0.0); 5],
                confidence: 0.9,
            },
            FaceDetection {
                bbox: BBox { x: 30.0, y: 30.0, w: 20.0, h: 20.0 },
                landmarks: [(0.0, 0.0); 5],
                confidence: 0.2,
            },
        ];
        pu.process(&mut frame, &mut ctx);
        assert_eq!(ctx.sface.len(), 2);
        assert_eq!(ctx.sface[1].category, FaceCategory::Unknown);
    }

    #[test]
    fn empty_gallery_always_reports_unknown() {
        let gallery = Gallery::default();
        let mut pu = FaceRecognizer::new(Box::new(NullBackend), gallery, 0.0, 0.6);
        let mut frame = GpuFrame::placeholder(64, 64);
        let mut ctx = PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 64,
                expected_height: 64,
            },
            Instant::now(),
        );
        ctx.yunet = vec![FaceDetection {
            bbox: BBox { x: 10.0, y: 10.0, w: 20.0, h: 20.0 },
            landmarks: [(0.0, 0.0); 5],
            confidence: 0.9,
        }];
        pu.process(&mut frame, &mut ctx);
        assert!(ctx.sface[0].identity.is_none());
    }
}
