//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Face Detector PU (spec §4.4 "Face Detector (YuNet)"): same throttle/cache
//! shape as the object detector, backed by the same [`InferenceBackend`].

use crate::backend::InferenceBackend;
use crate::nms::non_max_suppression;
use sentrymesh_core::{GpuFrame, PipelineContext, PuResult, SyncProcessingUnit};
use std::time::{Duration, Instant};

pub struct FaceDetector {
    backend: Box<dyn InferenceBackend>,
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub inference_interval: Duration,
    last_run: Option<Instant>,
}

impl FaceDetector {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        confidence_threshold: f32,
        nms_threshold: f32,
        inference_interval: Duration,
    ) -> Self {
        Self {
            backend,
            confidence_threshold,
            nms_threshold,
            inference_interval,
            last_run: None,
        }
    }
}

impl SyncProcessingUnit for FaceDetector {
    fn name(&self) -> &str {
        "FaceDetector"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let now = ctx.capture_timestamp;
        let due = match self.last_run {
            Some(last) => now.duration_since(last) >= self.inference_interval,
            None => true,
        };
        if !due {
            return PuResult::SuccessAndContinue;
        }
        self.last_run = Some(now);

        let (w, h) = frame.size();
        let span = tracing::debug_span!("face_detect", seq = ctx.frame_seq_num, w, h);
        let _enter = span.enter();
        let candidates = match self
            .backend
            .detect_faces(frame.data(), w, h, self.confidence_threshold)
        {
            Ok(c) => c,
            Err(_) => return PuResult::FailureAndContinue,
        };
        tracing::debug!(faces = candidates.len(), "face_detect finished");

        let boxes: Vec<_> = candidates.iter().map(|f| f.bbox).collect();
        let confidences: Vec<_> = candidates.iter().map(|f| f.confidence).collect();
        let kept = non_max_suppression(&boxes, &confidences, self.nms_threshold);

        ctx.yunet = kept.into_iter().map(|i| candidates[i]).collect();
        PuResult::SuccessAndContinue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use sentrymesh_core::DeviceInfo;

    #[test]
    fn null_backend_produces_no_faces() {
        let mut pu = FaceDetector::new(Box::new(NullBackend), 0.5, 0.5, Duration::from_millis(1));
        let mut frame = GpuFrame::placeholder(8, 8);
        let mut ctx = PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 8,
                expected_height: 8,
            },
            Instant::now(),
        );
        pu.process(&mut frame, &mut ctx);
        assert!(ctx.yunet.is_empty());
    }
}
