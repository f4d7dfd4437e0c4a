//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Collect Stats, Control FPS and Measure Latency (spec §4.4). The
//! percentile tracker inside `MeasureLatency` is grounded on the original
//! implementation's `percentile_tracker.h`, reworked here as a small
//! windowed sample buffer rather than a running-histogram structure.

use image::{GrayImage, ImageBuffer, Luma};
use log::info;
use sentrymesh_core::{GpuFrame, PipelineContext, PuResult, SyncProcessingUnit};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

fn to_gray_scaled(frame: &GpuFrame, scale_factor: f32) -> GrayImage {
    let (w, h) = frame.size();
    let rgb = image::RgbImage::from_raw(w, h, frame.data().to_vec())
        .expect("frame buffer length always matches width*height*3");
    let gray: GrayImage = image::DynamicImage::ImageRgb8(rgb).into_luma8();
    let new_w = ((w as f32) * scale_factor).round().max(1.0) as u32;
    let new_h = ((h as f32) * scale_factor).round().max(1.0) as u32;
    image::imageops::resize(&gray, new_w, new_h, image::imageops::FilterType::Triangle)
}

/// Maintains the FPS sliding window and the blurred-grey-frame history used
/// for change-rate (spec §4.4 "Collect Stats").
pub struct CollectStats {
    pub window_seconds: f32,
    pub scale_factor: f32,
    pub kernel_size: u32,
    pub threshold_per_pixel: u8,
    pub frame_compare_interval: Duration,
    timestamps: VecDeque<Instant>,
    history: VecDeque<(Instant, GrayImage)>,
    last_size: Option<(u32, u32)>,
}

impl CollectStats {
    pub fn new(
        window_seconds: f32,
        scale_factor: f32,
        kernel_size: u32,
        threshold_per_pixel: u8,
        frame_compare_interval: Duration,
    ) -> Self {
        Self {
            window_seconds,
            scale_factor,
            kernel_size: kernel_size.max(1) | 1,
            threshold_per_pixel,
            frame_compare_interval,
            timestamps: VecDeque::new(),
            history: VecDeque::new(),
            last_size: None,
        }
    }

    fn compute_fps(&mut self, now: Instant) -> f32 {
        let cutoff = now.checked_sub(Duration::from_secs_f32(self.window_seconds));
        while let Some(front) = self.timestamps.front() {
            if let Some(cutoff) = cutoff {
                if *front < cutoff {
                    self.timestamps.pop_front();
                    continue;
                }
            }
            break;
        }
        self.timestamps.push_back(now);
        if self.timestamps.len() < 2 {
            return 0.0;
        }
        let span = now
            .duration_since(*self.timestamps.front().unwrap())
            .as_secs_f32();
        if span <= 0.0 {
            0.0
        } else {
            (self.timestamps.len() as f32 - 1.0) / span
        }
    }
}

impl SyncProcessingUnit for CollectStats {
    fn name(&self) -> &str {
        "CollectStats"
    }

    fn process(&mut self, frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let now = ctx.capture_timestamp;
        ctx.fps = self.compute_fps(now);

        let size = frame.size();
        if self.last_size != Some(size) {
            self.last_size = Some(size);
            self.history.clear();
            ctx.change_rate = 0.0;
            self.history.push_back((now, to_gray_scaled(frame, self.scale_factor)));
            return PuResult::SuccessAndContinue;
        }

        let current = to_gray_scaled(frame, self.scale_factor);
        let current = imageproc::filter::gaussian_blur_f32(&current, self.kernel_size as f32 / 3.0);

        let cutoff = now
            .checked_sub(self.frame_compare_interval)
            .unwrap_or(now);
        let reference = self
            .history
            .iter()
            .filter(|(ts, _)| *ts <= cutoff)
            .next_back();

        ctx.change_rate = match reference {
            Some((_, reference)) => change_rate(&current, reference, self.threshold_per_pixel),
            None => 0.0,
        };

        self.history.push_back((now, current));
        // Prune so the oldest kept frame is the newest one still >= interval old.
        while self.history.len() > 1 {
            let second_oldest_ts = self.history[1].0;
            if second_oldest_ts <= cutoff {
                self.history.pop_front();
            } else {
                break;
            }
        }

        PuResult::SuccessAndContinue
    }
}

fn change_rate(current: &GrayImage, reference: &GrayImage, threshold: u8) -> f32 {
    if current.dimensions() != reference.dimensions() {
        return 0.0;
    }
    let total = (current.width() * current.height()) as f32;
    if total == 0.0 {
        return 0.0;
    }
    let changed = current
        .pixels()
        .zip(reference.pixels())
        .filter(|(Luma([a]), Luma([b]))| a.abs_diff(*b) > threshold)
        .count();
    changed as f32 / total
}

/// Short-circuits downstream PUs once the measured rate exceeds `cap`
/// (spec §4.4 "Control FPS").
pub struct ControlFps {
    pub cap: f32,
    pub window_seconds: f32,
    timestamps: VecDeque<Instant>,
}

impl ControlFps {
    pub fn new(cap: f32, window_seconds: f32) -> Self {
        Self {
            cap,
            window_seconds,
            timestamps: VecDeque::new(),
        }
    }
}

impl SyncProcessingUnit for ControlFps {
    fn name(&self) -> &str {
        "ControlFps"
    }

    fn process(&mut self, _frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let now = ctx.capture_timestamp;
        let cutoff = now.checked_sub(Duration::from_secs_f32(self.window_seconds));
        while let Some(front) = self.timestamps.front() {
            if let Some(cutoff) = cutoff {
                if *front < cutoff {
                    self.timestamps.pop_front();
                    continue;
                }
            }
            break;
        }
        self.timestamps.push_back(now);

        let fps = if self.timestamps.len() < 2 {
            0.0
        } else {
            let span = now
                .duration_since(*self.timestamps.front().unwrap())
                .as_secs_f32();
            if span <= 0.0 {
                0.0
            } else {
                (self.timestamps.len() as f32 - 1.0) / span
            }
        };

        if fps > self.cap {
            self.timestamps.pop_back();
            return PuResult::SuccessAndStop;
        }
        PuResult::SuccessAndContinue
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatencyRole {
    Start,
    End,
}

/// Windowed percentile sampler (P50/P90/P99 by default), emitted to the log
/// once per `window` of wall-clock time.
pub struct MeasureLatency {
    pub role: LatencyRole,
    pub window: Duration,
    pub percentiles: Vec<f32>,
    samples: VecDeque<(Instant, Duration)>,
    last_emit: Option<Instant>,
}

impl MeasureLatency {
    pub fn new(role: LatencyRole, window: Duration) -> Self {
        Self {
            role,
            window,
            percentiles: vec![0.50, 0.90, 0.99],
            samples: VecDeque::new(),
            last_emit: None,
        }
    }

    fn maybe_emit(&mut self, now: Instant) {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.duration_since(last) >= self.window,
        };
        if !due {
            return;
        }
        self.last_emit = Some(now);
        if self.samples.is_empty() {
            return;
        }
        let mut sorted: Vec<f32> = self
            .samples
            .iter()
            .map(|(_, d)| d.as_secs_f32() * 1000.0)
            .collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let stats: Vec<String> = self
            .percentiles
            .iter()
            .map(|p| {
                let idx = ((sorted.len() as f32 - 1.0) * p).round() as usize;
                format!("p{:.0}={:.2}ms", p * 100.0, sorted[idx])
            })
            .collect();
        info!("latency window: {}", stats.join(" "));
    }
}

impl SyncProcessingUnit for MeasureLatency {
    fn name(&self) -> &str {
        "MeasureLatency"
    }

    fn process(&mut self, _frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let now = ctx.capture_timestamp;
        match self.role {
            LatencyRole::Start => {
                ctx.latency_start_time = Some(now);
            }
            LatencyRole::End => {
                if let Some(start) = ctx.latency_start_time {
                    let elapsed = now.saturating_duration_since(start);
                    self.samples.push_back((now, elapsed));
                    let cutoff = now.checked_sub(self.window);
                    while let Some((ts, _)) = self.samples.front() {
                        if let Some(cutoff) = cutoff {
                            if *ts < cutoff {
                                self.samples.pop_front();
                                continue;
                            }
                        }
                        break;
                    }
                    self.maybe_emit(now);
                }
            }
        }
        PuResult::SuccessAndContinue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrymesh_core::DeviceInfo;

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
    fn first_frame_has_zero_change_rate() {
        let mut stats = CollectStats::new(5.0, 0.5, 3, 10, Duration::from_millis(500));
        let mut frame = GpuFrame::placeholder(8, 8);
        let now = Instant::now();
        let mut c = ctx_at(now);
        stats.process(&mut frame, &mut c);
        assert_eq!(c.change_rate, 0.0);
    }

    #[test]
    fn fps_warms_up_from_zero() {
        let mut stats = CollectStats::new(5.0, 0.5, 3, 10, Duration::from_millis(500));
        let mut frame = GpuFrame::placeholder(4, 4);
        let t0 = Instant::now();
        let mut c0 = ctx_at(t0);
        stats.process(&mut frame, &mut c0);
        assert_eq!(c0.fps, 0.0);

        let t1 = t0 + Duration::from_millis(100);
        let mut c1 = ctx_at(t1);
        stats.process(&mut frame, &mut c1);
        assert!(c1.fps > 0.0);
    }

    #[test]
    fn control_fps_stops_pipeline_above_cap() {
        let mut pu = ControlFps::new(5.0, 1.0);
        let mut frame = GpuFrame::placeholder(2, 2);
        let t0 = Instant::now();
        let mut last = PuResult::SuccessAndContinue;
        for i in 0..20 {
            let t = t0 + Duration::from_millis(i * 10);
            last = pu.process(&mut frame, &mut ctx_at(t));
        }
        assert_eq!(last, PuResult::SuccessAndStop);
    }

    #[test]
    fn measure_latency_round_trips_elapsed() {
        let mut start = MeasureLatency::new(LatencyRole::Start, Duration::from_secs(60));
        let mut end = MeasureLatency::new(LatencyRole::End, Duration::from_secs(60));
        let mut frame = GpuFrame::placeholder(2, 2);
        let t0 = Instant::now();
        let mut ctx = ctx_at(t0);
        start.process(&mut frame, &mut ctx);
        assert_eq!(ctx.latency_start_time, Some(t0));
        ctx.capture_timestamp = t0 + Duration::from_millis(20);
        end.process(&mut frame, &mut ctx);
    }
}
