//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Segmented Video Recorder (spec §4.5): `DISABLED → IDLE ⇄ RECORDING`, a
//! pre-roll ring flushed on arming, and start/end hooks through the
//! External Program Runner. Runs as an [`AsyncSink`] behind an
//! `AsyncPuRuntime`, so disk writes never block the capture thread.

use chrono::{DateTime, Local};
use log::{error, warn};
use sentrymesh_core::{
    render_template, AsyncSink, GpuFrame, PipelineContext, TemplateValues, VideoWriter,
    VideoWriterFactory,
};
use sentrymesh_hooks::HookRunner;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub struct RecorderConfig {
    /// Template for the segment path, e.g. `"/var/lib/sentrymesh/{deviceName}/{timestamp:%Y%m%d_%H%M%S}.seg"`.
    pub filename_template: String,
    pub pre_record_frames: usize,
    pub change_rate_threshold: f32,
    pub cool_off_sec: u64,
    pub max_length_sec: u64,
    pub codec: String,
    pub fps: u32,
    pub quality: u8,
    pub on_video_starts: Option<String>,
    pub on_video_ends: Option<String>,
}

enum State {
    Disabled,
    Idle {
        preroll: VecDeque<(GpuFrame, PipelineContext)>,
    },
    Recording {
        writer: Box<dyn VideoWriter>,
        path: PathBuf,
        record_start: Instant,
        last_below_threshold: Option<Instant>,
        started_at_wall: DateTime<Local>,
        frame_index: u64,
    },
}

pub struct SegmentRecorder {
    config: RecorderConfig,
    writer_factory: Box<dyn VideoWriterFactory>,
    on_video_starts: HookRunner,
    on_video_ends: HookRunner,
    state: State,
}

impl SegmentRecorder {
    pub fn new(config: RecorderConfig, writer_factory: Box<dyn VideoWriterFactory>) -> Self {
        let preroll = VecDeque::with_capacity(config.pre_record_frames);
        Self {
            config,
            writer_factory,
            on_video_starts: HookRunner::new("onVideoStarts"),
            on_video_ends: HookRunner::new("onVideoEnds"),
            state: State::Idle { preroll },
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.state, State::Disabled)
    }

    fn arming_condition(&self, ctx: &PipelineContext) -> bool {
        ctx.change_rate >= self.config.change_rate_threshold
            && ctx.captured_from_real_device
            && ctx
                .capture_timestamp
                .duration_since(ctx.capture_from_this_device_since)
                >= Duration::from_secs(10)
    }

    fn arm(&mut self, device_name: &str, w: u32, h: u32, preroll: VecDeque<(GpuFrame, PipelineContext)>) {
        let now_wall = Local::now();
        let values = TemplateValues {
            device_name: device_name.to_string(),
            timestamp: Some(now_wall),
            ..Default::default()
        };
        let filename = render_template(&self.config.filename_template, &values);
        let path = PathBuf::from(&filename);

        let mut writer = match self
            .writer_factory
            .open(&path, w, h, self.config.fps, &self.config.codec)
        {
            Ok(writer) => writer,
            Err(e) => {
                error!("recorder: failed to open segment writer at {}: {e}", path.display());
                self.state = State::Disabled;
                return;
            }
        };

        let fps = self.config.fps.max(1) as u64;
        let mut frame_index = 0u64;
        for (frame, _) in &preroll {
            let ts_ms = frame_index * 1000 / fps;
            if let Err(e) = writer.write_frame(frame, ts_ms) {
                warn!("recorder: writing pre-roll frame failed: {e}");
            }
            frame_index += 1;
        }

        if let Some(command) = &self.config.on_video_starts {
            self.on_video_starts.fire(command, &[filename]);
        }

        self.state = State::Recording {
            writer,
            path,
            record_start: Instant::now(),
            last_below_threshold: None,
            started_at_wall: now_wall,
            frame_index,
        };
    }

    fn close(&mut self, writer: Box<dyn VideoWriter>, path: PathBuf) {
        if let Err(e) = writer.release() {
            error!("recorder: failed to release segment {}: {e}", path.display());
        }
        if let Some(command) = &self.config.on_video_ends {
            self.on_video_ends.fire(command, &[path.display().to_string()]);
        }
        self.state = State::Idle {
            preroll: VecDeque::with_capacity(self.config.pre_record_frames),
        };
    }
}

impl AsyncSink for SegmentRecorder {
    fn name(&self) -> &str {
        "SegmentRecorder"
    }

    fn on_frame_ready(&mut self, frame: GpuFrame, ctx: PipelineContext) {
        match std::mem::replace(&mut self.state, State::Disabled) {
            State::Disabled => {
                self.state = State::Disabled;
            }
            State::Idle { mut preroll } => {
                let should_arm = self.arming_condition(&ctx);
                let (w, h) = frame.size();
                let device_name = ctx.device.name.clone();
                preroll.push_back((frame, ctx));
                while preroll.len() > self.config.pre_record_frames {
                    preroll.pop_front();
                }
                if should_arm {
                    self.arm(&device_name, w, h, preroll);
                } else {
                    self.state = State::Idle { preroll };
                }
            }
            State::Recording {
                mut writer,
                path,
                record_start,
                mut last_below_threshold,
                started_at_wall,
                frame_index,
            } => {
                let now = Instant::now();
                let fps = self.config.fps.max(1) as u64;
                let ts_ms = frame_index * 1000 / fps;
                if let Err(e) = writer.write_frame(&frame, ts_ms) {
                    warn!("recorder: write_frame failed: {e}");
                }

                if ctx.change_rate < self.config.change_rate_threshold {
                    last_below_threshold.get_or_insert(now);
                } else {
                    last_below_threshold = None;
                }

                let duration_exceeded =
                    now.duration_since(record_start) >= Duration::from_secs(self.config.max_length_sec);
                let cooled_off = last_below_threshold
                    .map(|since| now.duration_since(since) >= Duration::from_secs(self.config.cool_off_sec))
                    .unwrap_or(false);

                if duration_exceeded || cooled_off {
                    self.close(writer, path);
                } else {
                    self.state = State::Recording {
                        writer,
                        path,
                        record_start,
                        last_below_threshold,
                        started_at_wall,
                        frame_index: frame_index + 1,
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use sentrymesh_core::DeviceInfo;
    use std::sync::{Arc, Mutex};

    struct CountingWriter {
        frames: Arc<Mutex<u32>>,
    }

    impl VideoWriter for CountingWriter {
        fn write_frame(&mut self, _frame: &GpuFrame, _timestamp_ms: u64) -> Result<()> {
            *self.frames.lock().unwrap() += 1;
            Ok(())
        }

        fn frame_count(&self) -> u32 {
            *self.frames.lock().unwrap()
        }

        fn release(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    struct CountingFactory {
        frames: Arc<Mutex<u32>>,
        opened: Arc<Mutex<u32>>,
    }

    impl VideoWriterFactory for CountingFactory {
        fn open(
            &self,
            _path: &std::path::Path,
            _w: u32,
            _h: u32,
            _fps: u32,
            _codec: &str,
        ) -> Result<Box<dyn VideoWriter>> {
            *self.opened.lock().unwrap() += 1;
            Ok(Box::new(CountingWriter {
                frames: Arc::clone(&self.frames),
            }))
        }
    }

    fn ctx_with(change_rate: f32, real: bool, since_secs: u64) -> PipelineContext {
        let mut c = PipelineContext::new(
            DeviceInfo {
                name: "front".into(),
                uri: "u".into(),
                expected_width: 4,
                expected_height: 4,
            },
            Instant::now() - Duration::from_secs(since_secs),
        );
        c.change_rate = change_rate;
        c.captured_from_real_device = real;
        c.capture_timestamp = Instant::now();
        c
    }

    #[test]
    fn stays_idle_below_threshold() {
        let frames = Arc::new(Mutex::new(0));
        let opened = Arc::new(Mutex::new(0));
        let config = RecorderConfig {
            filename_template: "{deviceName}.seg".into(),
            pre_record_frames: 3,
            change_rate_threshold: 0.5,
            cool_off_sec: 5,
            max_length_sec: 60,
            codec: "mjpeg".into(),
            fps: 15,
            quality: 80,
            on_video_starts: None,
            on_video_ends: None,
        };
        let mut recorder = SegmentRecorder::new(
            config,
            Box::new(CountingFactory {
                frames: Arc::clone(&frames),
                opened: Arc::clone(&opened),
            }),
        );
        for _ in 0..5 {
            recorder.on_frame_ready(GpuFrame::placeholder(4, 4), ctx_with(0.1, true, 20));
        }
        assert_eq!(*opened.lock().unwrap(), 0);
        assert!(matches!(recorder.state, State::Idle { .. }));
    }

    #[test]
    fn arms_and_flushes_preroll_when_threshold_crossed() {
        let frames = Arc::new(Mutex::new(0));
        let opened = Arc::new(Mutex::new(0));
        let config = RecorderConfig {
            filename_template: "{deviceName}.seg".into(),
            pre_record_frames: 3,
            change_rate_threshold: 0.5,
            cool_off_sec: 5,
            max_length_sec: 60,
            codec: "mjpeg".into(),
            fps: 15,
            quality: 80,
            on_video_starts: None,
            on_video_ends: None,
        };
        let mut recorder = SegmentRecorder::new(
            config,
            Box::new(CountingFactory {
                frames: Arc::clone(&frames),
                opened: Arc::clone(&opened),
            }),
        );
        for _ in 0..3 {
            recorder.on_frame_ready(GpuFrame::placeholder(4, 4), ctx_with(0.1, true, 20));
        }
        recorder.on_frame_ready(GpuFrame::placeholder(4, 4), ctx_with(0.9, true, 20));
        assert_eq!(*opened.lock().unwrap(), 1);
        assert!(matches!(recorder.state, State::Recording { .. }));
        // 3 pre-roll frames flushed plus the arming frame itself.
        assert_eq!(*frames.lock().unwrap(), 4);
    }

    #[test]
    fn does_not_arm_until_device_has_been_live_ten_seconds() {
        let frames = Arc::new(Mutex::new(0));
        let opened = Arc::new(Mutex::new(0));
        let config = RecorderConfig {
            filename_template: "{deviceName}.seg".into(),
            pre_record_frames: 0,
            change_rate_threshold: 0.5,
            cool_off_sec: 5,
            max_length_sec: 60,
            codec: "mjpeg".into(),
            fps: 15,
            quality: 80,
            on_video_starts: None,
            on_video_ends: None,
        };
        let mut recorder = SegmentRecorder::new(
            config,
            Box::new(CountingFactory {
                frames: Arc::clone(&frames),
                opened: Arc::clone(&opened),
            }),
        );
        recorder.on_frame_ready(GpuFrame::placeholder(4, 4), ctx_with(0.9, true, 1));
        assert_eq!(*opened.lock().unwrap(), 0);
    }
}
