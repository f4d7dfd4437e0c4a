//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Matrix Notifier (spec §4.7): an image path (person-in-ROI snapshot,
//! throttled by frame count) and a video path (`IDLE → RECORDING → IDLE`)
//! sharing one bearer-auth REST client. Runs as an [`AsyncSink`].

pub mod client;

use anyhow::Result;
use client::MatrixClient;
use log::{error, info, warn};
use sentrymesh_core::{AsyncSink, BBox, GpuFrame, JpegEncoder, PipelineContext, VideoWriter, VideoWriterFactory};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub struct MatrixConfig {
    pub home_server_url: String,
    pub access_token: String,
    pub room_id: String,
    pub person_class_id: i32,
    pub notification_interval_frame: u64,
    pub video_max_length: Duration,
    pub video_max_length_without_detection: Duration,
    pub codec: String,
    pub fps: u32,
    pub jpeg_quality: u8,
    pub scratch_dir: PathBuf,
    pub send_smoke_test: bool,
}

struct RecordingVideo {
    writer: Box<dyn VideoWriter>,
    path: PathBuf,
    start: Instant,
    without_detection_since: Instant,
    best_score: f32,
    best_frame: Option<GpuFrame>,
    frame_index: u64,
}

enum VideoState {
    Idle,
    Recording(RecordingVideo),
}

pub struct MatrixNotifier {
    client: MatrixClient,
    config: MatrixConfig,
    jpeg_encoder: Box<dyn JpegEncoder>,
    writer_factory: Box<dyn VideoWriterFactory>,
    video_state: VideoState,
    scratch_counter: AtomicU64,
}

/// Interesting person boxes for this tick: `(bbox, confidence)` pairs with
/// `class_id == person_class_id` and `is_interesting` (spec §4.7 "person
/// in ROI").
fn person_boxes(ctx: &PipelineContext, person_class_id: i32) -> Vec<(BBox, f32)> {
    ctx.yolo
        .kept_indices
        .iter()
        .zip(ctx.yolo.is_interesting.iter())
        .filter(|(&idx, &interesting)| interesting && ctx.yolo.class_ids[idx] == person_class_id)
        .map(|(&idx, _)| (ctx.yolo.boxes[idx], ctx.yolo.confidences[idx]))
        .collect()
}

/// `sum(area * confidence) * sqrt(count)` over interesting person boxes
/// (spec §4.7 "the frame with the highest ROI score").
fn roi_score(boxes: &[(BBox, f32)]) -> f32 {
    if boxes.is_empty() {
        return 0.0;
    }
    let sum: f32 = boxes.iter().map(|(bbox, conf)| bbox.area() * conf).sum();
    sum * (boxes.len() as f32).sqrt()
}

impl MatrixNotifier {
    pub fn new(
        config: MatrixConfig,
        jpeg_encoder: Box<dyn JpegEncoder>,
        writer_factory: Box<dyn VideoWriterFactory>,
    ) -> Result<Self> {
        let client = MatrixClient::new(
            config.home_server_url.clone(),
            config.access_token.clone(),
            config.room_id.clone(),
        )?;
        if config.send_smoke_test {
            if let Err(e) = client.send_text("MatrixPipeline started") {
                warn!("matrix: smoke test send failed: {e}");
            }
        }
        Ok(Self {
            client,
            config,
            jpeg_encoder,
            writer_factory,
            video_state: VideoState::Idle,
            scratch_counter: AtomicU64::new(0),
        })
    }

    fn image_path(&self, frame: &GpuFrame, ctx: &PipelineContext) {
        if self.config.notification_interval_frame == 0
            || ctx.frame_seq_num % self.config.notification_interval_frame != 0
        {
            return;
        }
        let boxes = person_boxes(ctx, self.config.person_class_id);
        if boxes.is_empty() {
            return;
        }
        let jpeg = match self.jpeg_encoder.encode(frame, self.config.jpeg_quality) {
            Ok(j) => j,
            Err(e) => {
                error!("matrix: image path jpeg encode failed: {e}");
                return;
            }
        };
        let (w, h) = frame.size();
        let size = jpeg.len();
        match self.client.upload(jpeg, "image/jpeg", "snapshot.jpg") {
            Ok(mxc) => {
                if let Err(e) = self.client.send_image(&mxc, w, h, size) {
                    error!("matrix: sending m.image event failed: {e}");
                }
            }
            Err(e) => error!("matrix: image upload failed: {e}"),
        }
    }

    fn scratch_path(&self) -> PathBuf {
        let id = self.scratch_counter.fetch_add(1, Ordering::SeqCst);
        self.config
            .scratch_dir
            .join(format!("sentrymesh-matrix-{}-{id}.mp4", std::process::id()))
    }

    fn start_recording(&mut self, frame: &GpuFrame) {
        let path = self.scratch_path();
        let (w, h) = frame.size();
        match self
            .writer_factory
            .open(&path, w, h, self.config.fps, &self.config.codec)
        {
            Ok(writer) => {
                let now = Instant::now();
                info!("matrix: video path armed, recording to {}", path.display());
                self.video_state = VideoState::Recording(RecordingVideo {
                    writer,
                    path,
                    start: now,
                    without_detection_since: now,
                    best_score: 0.0,
                    best_frame: None,
                    frame_index: 0,
                });
            }
            Err(e) => {
                error!("matrix: failed to open video writer at {}: {e}", path.display());
            }
        }
    }

    fn close_and_upload(&mut self, mut recording: RecordingVideo) {
        let frame_count = recording.writer.frame_count();
        if let Err(e) = recording.writer.release() {
            error!("matrix: failed to release video writer: {e}");
        }
        let duration_ms = (frame_count as u64 * 1000) / self.config.fps.max(1) as u64;

        let result: Result<()> = (|| {
            let video_bytes = fs::read(&recording.path)?;
            let video_size = video_bytes.len();
            let video_mxc = self.client.upload(video_bytes, "video/mp4", "clip.mp4")?;

            let thumbnail = recording
                .best_frame
                .as_ref()
                .map(|f| self.jpeg_encoder.encode(f, self.config.jpeg_quality))
                .transpose()?
                .unwrap_or_default();
            let (w, h) = recording
                .best_frame
                .as_ref()
                .map(|f| f.size())
                .unwrap_or((0, 0));
            let thumbnail_mxc = self.client.upload(thumbnail, "image/jpeg", "thumbnail.jpg")?;

            self.client
                .send_video(&video_mxc, &thumbnail_mxc, w, h, duration_ms, video_size)?;
            Ok(())
        })();

        if let Err(e) = result {
            error!("matrix: video upload/send failed: {e}");
        }

        if let Err(e) = fs::remove_file(&recording.path) {
            warn!("matrix: failed to remove scratch file {}: {e}", recording.path.display());
        }
    }
}

impl AsyncSink for MatrixNotifier {
    fn name(&self) -> &str {
        "MatrixNotifier"
    }

    fn on_frame_ready(&mut self, frame: GpuFrame, ctx: PipelineContext) {
        self.image_path(&frame, &ctx);

        let boxes = person_boxes(&ctx, self.config.person_class_id);
        let has_detection = !boxes.is_empty();
        let score = roi_score(&boxes);

        match std::mem::replace(&mut self.video_state, VideoState::Idle) {
            VideoState::Idle => {
                if has_detection {
                    self.start_recording(&frame);
                    if let VideoState::Recording(recording) = &mut self.video_state {
                        recording.best_score = score;
                        recording.best_frame = Some(frame.deep_copy());
                        let _ = recording.writer.write_frame(&frame, 0);
                        recording.frame_index = 1;
                    }
                }
            }
            VideoState::Recording(mut recording) => {
                let now = Instant::now();
                let fps = self.config.fps.max(1) as u64;
                let ts_ms = recording.frame_index * 1000 / fps;
                if let Err(e) = recording.writer.write_frame(&frame, ts_ms) {
                    warn!("matrix: write_frame failed: {e}");
                }
                recording.frame_index += 1;

                if has_detection {
                    recording.without_detection_since = now;
                    if score > recording.best_score {
                        recording.best_score = score;
                        recording.best_frame = Some(frame.deep_copy());
                    }
                }

                let duration_exceeded = now.duration_since(recording.start) >= self.config.video_max_length;
                let idle_exceeded = now.duration_since(recording.without_detection_since)
                    >= self.config.video_max_length_without_detection;

                if duration_exceeded || idle_exceeded {
                    self.close_and_upload(recording);
                    self.video_state = VideoState::Idle;
                } else {
                    self.video_state = VideoState::Recording(recording);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrymesh_core::{BBox as CoreBBox, DeviceInfo, YoloContext};

    #[test]
    fn roi_score_is_zero_with_no_boxes() {
        assert_eq!(roi_score(&[]), 0.0);
    }

    #[test]
    fn roi_score_scales_with_count_and_area() {
        let one = vec![(CoreBBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 }, 0.9)];
        let two = vec![
            (CoreBBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 }, 0.9),
            (CoreBBox { x: 20.0, y: 0.0, w: 10.0, h: 10.0 }, 0.9),
        ];
        assert!(roi_score(&two) > roi_score(&one));
    }

    #[test]
    fn person_boxes_filters_by_class_and_interesting() {
        let mut ctx = PipelineContext::new(
            DeviceInfo {
                name: "d".into(),
                uri: "u".into(),
                expected_width: 100,
                expected_height: 100,
            },
            Instant::now(),
        );
        ctx.yolo = YoloContext {
            input_size: (100, 100),
            boxes: vec![
                CoreBBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 },
                CoreBBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 },
            ],
            class_ids: vec![0, 1],
            confidences: vec![0.9, 0.9],
            kept_indices: vec![0, 1],
            is_interesting: vec![true, true],
        };
        let boxes = person_boxes(&ctx, 0);
        assert_eq!(boxes.len(), 1);
    }
}
