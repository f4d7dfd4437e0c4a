//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Object Detector PU (spec §4.4): throttles by `inference_interval_ms`,
//! copying cached results forward on skipped ticks; otherwise runs the
//! backend, rescales boxes, and keeps the NMS-surviving subset.

use crate::backend::InferenceBackend;
use crate::nms::non_max_suppression;
use sentrymesh_core::{GpuFrame, PipelineContext, PuResult, SyncProcessingUnit, YoloContext};
use std::time::{Duration, Instant};

pub struct ObjectDetector {
    backend: Box<dyn InferenceBackend>,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub inference_interval: Duration,
    pub input_size: (u32, u32),
    last_run: Option<Instant>,
}

impl ObjectDetector {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        confidence_threshold: f32,
        nms_threshold: f32,
        inference_interval: Duration,
        input_size: (u32, u32),
    ) -> Self {
        Self {
            backend,
            confidence_threshold,
            nms_threshold,
            inference_interval,
            input_size,
            last_run: None,
        }
    }
}

impl SyncProcessingUnit for ObjectDetector {
    fn name(&self) -> &str {
        "ObjectDetector"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let now = ctx.capture_timestamp;
        let due = match self.last_run {
            Some(last) => now.duration_since(last) >= self.inference_interval,
            None => true,
        };
        if !due {
            // Cached result already lives in ctx.yolo from the previous run;
            // nothing to do (spec §4.4 "copies cached results forward").
            return PuResult::SuccessAndContinue;
        }
        self.last_run = Some(now);

        let (w, h) = frame.size();
        let span = tracing::debug_span!("object_detect", seq = ctx.frame_seq_num, w, h);
        let _enter = span.enter();
        let raw = match self.backend.detect_objects(
            frame.data(),
            w,
            h,
            self.confidence_threshold,
        ) {
            Ok(raw) => raw,
            Err(_) => return PuResult::FailureAndContinue,
        };
        tracing::debug!(detections = raw.len(), "object_detect finished");

        let boxes: Vec<_> = raw.iter().map(|d| d.bbox).collect();
        let confidences: Vec<_> = raw.iter().map(|d| d.confidence).collect();
        let class_ids: Vec<_> = raw.iter().map(|d| d.class_id).collect();
        let kept = non_max_suppression(&boxes, &confidences, self.nms_threshold);

        ctx.yolo = YoloContext {
            input_size: self.input_size,
            boxes,
            class_ids,
            confidences,
            is_interesting: vec![true; kept.len()],
            kept_indices: kept,
        };
        PuResult::SuccessAndContinue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NullBackend, RawDetection};
    use anyhow::Result;
    use sentrymesh_core::{BBox, DeviceInfo, FaceDetection};

    struct FixedBackend {
        dets: Vec<RawDetection>,
        calls: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    }

    impl InferenceBackend for FixedBackend {
        fn detect_objects(
            &mut self,
            _frame_bgr: &[u8],
            _w: u32,
            _h: u32,
            _threshold: f32,
        ) -> Result<Vec<RawDetection>> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.dets.clone())
        }

        fn detect_faces(
            &mut self,
            _frame_bgr: &[u8],
            _w: u32,
            _h: u32,
            _threshold: f32,
        ) -> Result<Vec<FaceDetection>> {
            Ok(Vec::new())
        }

        fn embed_face(&mut self, _aligned_bgr: &[u8], _w: u32, _h: u32) -> Result<crate::backend::RawEmbedding> {
            Ok(crate::backend::RawEmbedding(vec![0.0; 4]))
        }
    }

    fn ctx_at(now: Instant) -> PipelineContext {
        let mut c = PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 8,
                expected_height: 8,
            },
            now,
        );
        c.capture_timestamp = now;
        c
    }

    #[test]
    fn throttles_inference_and_caches_result() {
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let backend = FixedBackend {
            dets: vec![RawDetection {
                bbox: BBox { x: 0.0, y: 0.0, w: 4.0, h: 4.0 },
                class_id: 0,
                confidence: 0.9,
            }],
            calls: calls.clone(),
        };
        let mut pu = ObjectDetector::new(Box::new(backend), 0.5, 0.5, Duration::from_millis(100), (8, 8));
        let mut frame = GpuFrame::placeholder(8, 8);
        let t0 = Instant::now();
        pu.process(&mut frame, &mut ctx_at(t0));
        pu.process(&mut frame, &mut ctx_at(t0 + Duration::from_millis(10)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        pu.process(&mut frame, &mut ctx_at(t0 + Duration::from_millis(150)));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn null_backend_produces_no_detections() {
        let mut pu = ObjectDetector::new(Box::new(NullBackend), 0.5, 0.5, Duration::from_millis(1), (8, 8));
        let mut frame = GpuFrame::placeholder(8, 8);
        let mut ctx = ctx_at(Instant::now());
        pu.process(&mut frame, &mut ctx);
        assert!(ctx.yolo.kept_indices.is_empty());
    }
}
