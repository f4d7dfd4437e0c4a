//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Turns one device's typed config section into a running
//! [`PipelineExecutor`] (spec §4.2 "Construction", §6 config schema).
//! Unknown PU `type` strings are logged and skipped rather than failing
//! the whole device, matching the config's own "Unknown types are logged
//! and skipped" contract.

use anyhow::{Context, Result};
use log::warn;
use sentrymesh_config::{DeviceConfig, PipelineEntryConfig};
use sentrymesh_core::{
    AsyncPuRuntime, CpuJpegEncoder, CpuVideoWriterFactory, DeviceInfo, PipelineExecutor, PuControl,
};
use sentrymesh_matrix::{MatrixConfig, MatrixNotifier};
use sentrymesh_recorder::{RecorderConfig, SegmentRecorder};
use sentrymesh_snapshot::{BasicAuthConfig, HttpSnapshotState, ShmSink, SnapshotConfig, SnapshotMultiplexer, ZmqSink};
use sentrymesh_vision::{
    backend::{InferenceBackend, NullBackend, OrtBackend},
    AutoZoom, Crop, FaceDetector, FaceRecognizer, Gallery, Interpolation, ObjectDetector,
    ObjectPrune, OverlayBoxes, OverlayFaceIdentity, OverlayFont, OverlayInfo, OverlayLandmarks,
    Resize, ResizeTarget, RotateFlip,
};
use sentrymesh_vision::{EdgeRange, SizeConstraint};
use sentrymesh_vision::geometry::{FlipCode, Rotation};
use sentrymesh_vision::stats::{CollectStats, ControlFps, LatencyRole, MeasureLatency};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::mqtt::{MqttConfig, MqttDetectionPublish, MqttPublisher};

pub struct BuiltPipeline {
    pub executor: PipelineExecutor,
    pub http_state: Option<Arc<HttpSnapshotState>>,
}

fn backend(model_path: &Option<String>, input_size: (u32, u32)) -> Box<dyn InferenceBackend> {
    match model_path {
        Some(path) => match OrtBackend::load(path, None, None, input_size) {
            Ok(b) => Box::new(b),
            Err(e) => {
                warn!("falling back to NullBackend: failed to load model {path}: {e:#}");
                Box::new(NullBackend)
            }
        },
        None => Box::new(NullBackend),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResizeOptions {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    scale: Option<f32>,
    #[serde(default)]
    interpolation: Option<String>,
}

fn parse_interpolation(name: Option<&str>) -> Interpolation {
    match name {
        Some("nearest") => Interpolation::Nearest,
        Some("cubic") => Interpolation::Cubic,
        Some("area") => Interpolation::Area,
        _ => Interpolation::Linear,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CropOptions {
    left: f32,
    right: f32,
    top: f32,
    bottom: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RotateFlipOptions {
    #[serde(default)]
    rotation_degrees: i32,
    #[serde(default)]
    flip_code: Option<i32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectDetectorOptions {
    #[serde(default)]
    model_path: Option<String>,
    #[serde(default = "default_confidence")]
    confidence_threshold: f32,
    #[serde(default = "default_nms")]
    nms_threshold: f32,
    #[serde(default = "default_inference_interval_ms")]
    inference_interval_ms: u64,
    #[serde(default = "default_input_dim")]
    input_width: u32,
    #[serde(default = "default_input_dim")]
    input_height: u32,
}

fn default_confidence() -> f32 {
    0.5
}
fn default_nms() -> f32 {
    0.45
}
fn default_inference_interval_ms() -> u64 {
    200
}
fn default_input_dim() -> u32 {
    640
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaceDetectorOptions {
    #[serde(default)]
    model_path: Option<String>,
    #[serde(default = "default_confidence")]
    confidence_threshold: f32,
    #[serde(default = "default_nms")]
    nms_threshold: f32,
    #[serde(default = "default_inference_interval_ms")]
    inference_interval_ms: u64,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "camelCase")]
struct EdgeConstraintOptions {
    #[serde(default = "default_edge_min")]
    min: f32,
    #[serde(default = "default_edge_max")]
    max: f32,
}

impl Default for EdgeConstraintOptions {
    fn default() -> Self {
        Self { min: default_edge_min(), max: default_edge_max() }
    }
}

fn default_edge_min() -> f32 {
    -0.01
}
fn default_edge_max() -> f32 {
    1.01
}

/// Four independent per-edge bands, matching the original's `left`/`right`/
/// `top`/`bottom` `Range` constraints rather than a single center-point box.
#[derive(Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "camelCase")]
struct EdgeConstraintsOptions {
    #[serde(default)]
    left: EdgeConstraintOptions,
    #[serde(default)]
    right: EdgeConstraintOptions,
    #[serde(default)]
    top: EdgeConstraintOptions,
    #[serde(default)]
    bottom: EdgeConstraintOptions,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ObjectPruneOptions {
    #[serde(default)]
    allowed_classes: Vec<i32>,
    #[serde(default)]
    edge_constraints: EdgeConstraintsOptions,
    #[serde(default)]
    min_area_ratio: Option<f32>,
    #[serde(default)]
    max_area_ratio: Option<f32>,
    #[serde(default)]
    debug_overlay: bool,
}

fn default_one() -> f32 {
    1.0
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FaceRecognizerOptions {
    #[serde(default)]
    model_path: Option<String>,
    gallery_root: String,
    #[serde(default = "default_confidence")]
    enrolment_confidence_threshold: f32,
    #[serde(default = "default_confidence")]
    inference_confidence_threshold: f32,
    #[serde(default = "default_match_threshold")]
    match_threshold: f32,
    #[serde(default)]
    authorised: Vec<String>,
}

fn default_match_threshold() -> f32 {
    0.6
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoZoomOptions {
    #[serde(default = "default_one")]
    output_scale_factor: f32,
    #[serde(default = "default_aspect")]
    output_aspect_ratio: f32,
    #[serde(default = "default_smooth_step")]
    smooth_step_pixel: f32,
}

fn default_aspect() -> f32 {
    16.0 / 9.0
}
fn default_smooth_step() -> f32 {
    24.0
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OverlayBoxesOptions {
    #[serde(default)]
    class_names: Vec<String>,
    #[serde(default)]
    font_path: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OverlayFaceIdentityOptions {
    #[serde(default)]
    font_path: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverlayInfoOptions {
    #[serde(default)]
    font_path: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default = "default_text_height_ratio")]
    text_height_ratio: f32,
}

fn default_text_height_ratio() -> f32 {
    0.04
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CollectStatsOptions {
    #[serde(default = "default_window_seconds")]
    window_seconds: f32,
    #[serde(default = "default_stats_scale")]
    scale_factor: f32,
    #[serde(default = "default_kernel_size")]
    kernel_size: u32,
    #[serde(default = "default_threshold_per_pixel")]
    threshold_per_pixel: u8,
    #[serde(default = "default_frame_compare_interval_ms")]
    frame_compare_interval_ms: u64,
}

fn default_window_seconds() -> f32 {
    5.0
}
fn default_stats_scale() -> f32 {
    0.25
}
fn default_kernel_size() -> u32 {
    5
}
fn default_threshold_per_pixel() -> u8 {
    25
}
fn default_frame_compare_interval_ms() -> u64 {
    500
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ControlFpsOptions {
    cap: f32,
    #[serde(default = "default_window_seconds")]
    window_seconds: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MeasureLatencyOptions {
    #[serde(default = "default_latency_role")]
    role: String,
    #[serde(default = "default_latency_window_sec")]
    window_sec: u64,
}

fn default_latency_role() -> String {
    "start".to_string()
}
fn default_latency_window_sec() -> u64 {
    60
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentRecorderOptions {
    filename_template: String,
    #[serde(default = "default_preroll")]
    pre_record_frames: usize,
    #[serde(default = "default_change_rate_threshold")]
    change_rate_threshold: f32,
    #[serde(default = "default_cool_off_sec")]
    cool_off_sec: u64,
    #[serde(default = "default_max_length_sec")]
    max_length_sec: u64,
    #[serde(default = "default_codec")]
    codec: String,
    #[serde(default = "default_fps")]
    fps: u32,
    #[serde(default = "default_quality")]
    quality: u8,
    #[serde(default)]
    on_video_starts: Option<String>,
    #[serde(default)]
    on_video_ends: Option<String>,
}

fn default_preroll() -> usize {
    30
}
fn default_change_rate_threshold() -> f32 {
    0.02
}
fn default_cool_off_sec() -> u64 {
    15
}
fn default_max_length_sec() -> u64 {
    300
}
fn default_codec() -> String {
    "h264".to_string()
}
fn default_fps() -> u32 {
    15
}
fn default_quality() -> u8 {
    85
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotMultiplexerOptions {
    #[serde(default = "default_refresh_interval_sec")]
    refresh_interval_sec: f64,
    #[serde(default = "default_quality")]
    quality: u8,
    #[serde(default)]
    file_path_template: Option<String>,
    #[serde(default)]
    shm_path: Option<String>,
    #[serde(default = "default_shm_size")]
    shm_size: usize,
    #[serde(default)]
    zmq_bind: Option<String>,
    #[serde(default = "default_zmq_send_hwm")]
    zmq_send_hwm: i32,
}

fn default_refresh_interval_sec() -> f64 {
    1.0
}
fn default_shm_size() -> usize {
    2_000_000
}
fn default_zmq_send_hwm() -> i32 {
    10
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixNotifierOptions {
    home_server_url: String,
    access_token: String,
    room_id: String,
    #[serde(default)]
    person_class_id: i32,
    #[serde(default = "default_notification_interval_frame")]
    notification_interval_frame: u64,
    #[serde(default = "default_video_max_length_sec")]
    video_max_length_sec: u64,
    #[serde(default = "default_video_max_length_without_detection_sec")]
    video_max_length_without_detection_sec: u64,
    #[serde(default = "default_codec")]
    codec: String,
    #[serde(default = "default_fps")]
    fps: u32,
    #[serde(default = "default_quality")]
    jpeg_quality: u8,
    #[serde(default = "default_scratch_dir")]
    scratch_dir: String,
    #[serde(default)]
    send_smoke_test: bool,
}

fn default_notification_interval_frame() -> u64 {
    1
}
fn default_video_max_length_sec() -> u64 {
    30
}
fn default_video_max_length_without_detection_sec() -> u64 {
    10
}
fn default_scratch_dir() -> String {
    std::env::temp_dir().to_string_lossy().into_owned()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MqttPublishOptions {
    broker: String,
    #[serde(default = "default_mqtt_port")]
    port: u16,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    ca_path: String,
    topic: String,
    #[serde(default)]
    class_ids: Option<Vec<i32>>,
}

fn default_mqtt_port() -> u16 {
    8883
}

/// Builds the pipeline for one device, returning the executor plus its
/// HTTP snapshot state (if a `SnapshotMultiplexer` entry enabled HTTP).
pub fn build(device_cfg: &DeviceConfig) -> Result<BuiltPipeline> {
    let device = DeviceInfo {
        name: device_cfg.device.name.clone(),
        uri: device_cfg.device.uri.clone(),
        expected_width: device_cfg.device.expected_frame_size.width,
        expected_height: device_cfg.device.expected_frame_size.height,
    };

    let http_state = device_cfg.http_service.as_ref().map(|svc| {
        let auth = match (&svc.username, &svc.password) {
            (Some(u), Some(p)) => Some(BasicAuthConfig {
                username: u.clone(),
                password: p.clone(),
            }),
            _ => None,
        };
        HttpSnapshotState::new(auth)
    });

    let mut executor = PipelineExecutor::new();

    for entry in &device_cfg.pipeline {
        if !entry.enabled {
            continue;
        }
        let control = PuControl::new(entry.active_hours());
        push_entry(&mut executor, entry, &device, control, http_state.as_ref())
            .with_context(|| format!("building pipeline entry of type '{}' for device '{}'", entry.kind, device.name))?;
    }

    Ok(BuiltPipeline { executor, http_state })
}

fn push_entry(
    executor: &mut PipelineExecutor,
    entry: &PipelineEntryConfig,
    device: &DeviceInfo,
    control: PuControl,
    http_state: Option<&Arc<HttpSnapshotState>>,
) -> Result<()> {
    match entry.kind.as_str() {
        "Resize" => {
            let opts: ResizeOptions = entry.parse_options()?;
            let target = match (opts.width, opts.height, opts.scale) {
                (Some(width), Some(height), _) => ResizeTarget::Absolute { width, height },
                (_, _, Some(scale)) => ResizeTarget::Relative { scale },
                _ => {
                    warn!("Resize entry needs width+height or scale, skipping");
                    return Ok(());
                }
            };
            executor.push_sync(
                Box::new(Resize {
                    target,
                    interpolation: parse_interpolation(opts.interpolation.as_deref()),
                }),
                control,
            );
        }
        "Crop" => {
            let opts: CropOptions = entry.parse_options()?;
            executor.push_sync(
                Box::new(Crop {
                    left: opts.left,
                    right: opts.right,
                    top: opts.top,
                    bottom: opts.bottom,
                }),
                control,
            );
        }
        "RotateFlip" => {
            let opts: RotateFlipOptions = entry.parse_options()?;
            let rotation = Rotation::from_degrees(opts.rotation_degrees).unwrap_or(Rotation::None);
            let flip = opts.flip_code.and_then(FlipCode::from_code);
            executor.push_sync(Box::new(RotateFlip { rotation, flip }), control);
        }
        "ObjectDetector" => {
            let opts: ObjectDetectorOptions = entry.parse_options()?;
            let input_size = (opts.input_width, opts.input_height);
            let backend = backend(&opts.model_path, input_size);
            executor.push_sync(
                Box::new(ObjectDetector::new(
                    backend,
                    opts.confidence_threshold,
                    opts.nms_threshold,
                    Duration::from_millis(opts.inference_interval_ms),
                    input_size,
                )),
                control,
            );
        }
        "FaceDetector" => {
            let opts: FaceDetectorOptions = entry.parse_options()?;
            let backend = backend(&opts.model_path, (320, 320));
            executor.push_sync(
                Box::new(FaceDetector::new(
                    backend,
                    opts.confidence_threshold,
                    opts.nms_threshold,
                    Duration::from_millis(opts.inference_interval_ms),
                )),
                control,
            );
        }
        "ObjectPrune" => {
            let opts: ObjectPruneOptions = entry.parse_options().unwrap_or_default();
            let edges = opts.edge_constraints;
            executor.push_sync(
                Box::new(ObjectPrune {
                    allowed_classes: opts.allowed_classes,
                    left: EdgeRange { min: edges.left.min, max: edges.left.max },
                    right: EdgeRange { min: edges.right.min, max: edges.right.max },
                    top: EdgeRange { min: edges.top.min, max: edges.top.max },
                    bottom: EdgeRange { min: edges.bottom.min, max: edges.bottom.max },
                    size: SizeConstraint {
                        min_area_ratio: opts.min_area_ratio,
                        max_area_ratio: opts.max_area_ratio,
                    },
                    debug_overlay: opts.debug_overlay,
                }),
                control,
            );
        }
        "FaceRecognizer" => {
            let opts: FaceRecognizerOptions = entry.parse_options()?;
            let mut backend = backend(&opts.model_path, (112, 112));
            let categories: HashMap<String, sentrymesh_core::FaceCategory> = opts
                .authorised
                .iter()
                .map(|name| (name.clone(), sentrymesh_core::FaceCategory::Authorised))
                .collect();
            let gallery = Gallery::build(
                &PathBuf::from(&opts.gallery_root),
                backend.as_mut(),
                opts.enrolment_confidence_threshold,
                &categories,
            )
            .unwrap_or_else(|e| {
                warn!("gallery build failed for '{}': {e:#}", opts.gallery_root);
                Gallery::default()
            });
            executor.push_sync(
                Box::new(FaceRecognizer::new(
                    backend,
                    gallery,
                    opts.inference_confidence_threshold,
                    opts.match_threshold,
                )),
                control,
            );
        }
        "AutoZoom" => {
            let opts: AutoZoomOptions = entry.parse_options()?;
            executor.push_sync(
                Box::new(AutoZoom::new(
                    opts.output_scale_factor,
                    opts.output_aspect_ratio,
                    opts.smooth_step_pixel,
                )),
                control,
            );
        }
        "OverlayBoxes" => {
            let opts: OverlayBoxesOptions = entry.parse_options().unwrap_or_default();
            executor.push_sync(
                Box::new(OverlayBoxes {
                    class_names: opts.class_names,
                    font: load_font(opts.font_path.as_deref()),
                }),
                control,
            );
        }
        "OverlayLandmarks" => {
            executor.push_sync(Box::new(OverlayLandmarks), control);
        }
        "OverlayFaceIdentity" => {
            let opts: OverlayFaceIdentityOptions = entry.parse_options().unwrap_or_default();
            executor.push_sync(
                Box::new(OverlayFaceIdentity { font: load_font(opts.font_path.as_deref()) }),
                control,
            );
        }
        "OverlayInfo" => {
            let opts: OverlayInfoOptions = entry.parse_options()?;
            executor.push_sync(
                Box::new(OverlayInfo {
                    font: load_font(opts.font_path.as_deref()),
                    template: opts.template,
                    text_height_ratio: opts.text_height_ratio,
                }),
                control,
            );
        }
        "CollectStats" => {
            let opts: CollectStatsOptions = entry.parse_options()?;
            executor.push_sync(
                Box::new(CollectStats::new(
                    opts.window_seconds,
                    opts.scale_factor,
                    opts.kernel_size,
                    opts.threshold_per_pixel,
                    Duration::from_millis(opts.frame_compare_interval_ms),
                )),
                control,
            );
        }
        "ControlFps" => {
            let opts: ControlFpsOptions = entry.parse_options()?;
            executor.push_sync(Box::new(ControlFps::new(opts.cap, opts.window_seconds)), control);
        }
        "MeasureLatency" => {
            let opts: MeasureLatencyOptions = entry.parse_options()?;
            let role = if opts.role.eq_ignore_ascii_case("end") {
                LatencyRole::End
            } else {
                LatencyRole::Start
            };
            executor.push_sync(
                Box::new(MeasureLatency::new(role, Duration::from_secs(opts.window_sec))),
                control,
            );
        }
        "SegmentRecorder" => {
            let opts: SegmentRecorderOptions = entry.parse_options()?;
            let recorder = SegmentRecorder::new(
                RecorderConfig {
                    filename_template: opts.filename_template,
                    pre_record_frames: opts.pre_record_frames,
                    change_rate_threshold: opts.change_rate_threshold,
                    cool_off_sec: opts.cool_off_sec,
                    max_length_sec: opts.max_length_sec,
                    codec: opts.codec,
                    fps: opts.fps,
                    quality: opts.quality,
                    on_video_starts: opts.on_video_starts,
                    on_video_ends: opts.on_video_ends,
                },
                Box::new(CpuVideoWriterFactory { quality: opts.quality }),
            );
            let runtime = AsyncPuRuntime::new(recorder, sentrymesh_core::DEFAULT_VIDEO_QUEUE_SIZE);
            executor.push_async(Box::new(runtime), control);
        }
        "SnapshotMultiplexer" => {
            let opts: SnapshotMultiplexerOptions = entry.parse_options()?;
            let shm = opts.shm_path.as_ref().and_then(|path| {
                ShmSink::create(path, opts.shm_size)
                    .map_err(|e| warn!("shm sink unavailable: {e:#}"))
                    .ok()
            });
            let zmq = opts.zmq_bind.as_ref().and_then(|endpoint| {
                ZmqSink::bind(endpoint, opts.zmq_send_hwm)
                    .map_err(|e| warn!("zmq sink unavailable: {e:#}"))
                    .ok()
            });
            let multiplexer = SnapshotMultiplexer::new(
                SnapshotConfig {
                    refresh_interval: Duration::from_secs_f64(opts.refresh_interval_sec),
                    quality: opts.quality,
                    file_path_template: opts.file_path_template,
                },
                Box::new(CpuJpegEncoder),
                http_state.cloned(),
                shm,
                zmq,
            );
            let runtime = AsyncPuRuntime::new(multiplexer, sentrymesh_core::DEFAULT_ZMQ_QUEUE_SIZE);
            executor.push_async(Box::new(runtime), control);
        }
        "MatrixNotifier" => {
            let opts: MatrixNotifierOptions = entry.parse_options()?;
            let notifier = MatrixNotifier::new(
                MatrixConfig {
                    home_server_url: opts.home_server_url,
                    access_token: opts.access_token,
                    room_id: opts.room_id,
                    person_class_id: opts.person_class_id,
                    notification_interval_frame: opts.notification_interval_frame,
                    video_max_length: Duration::from_secs(opts.video_max_length_sec),
                    video_max_length_without_detection: Duration::from_secs(
                        opts.video_max_length_without_detection_sec,
                    ),
                    codec: opts.codec,
                    fps: opts.fps,
                    jpeg_quality: opts.jpeg_quality,
                    scratch_dir: PathBuf::from(opts.scratch_dir),
                    send_smoke_test: opts.send_smoke_test,
                },
                Box::new(CpuJpegEncoder),
                Box::new(CpuVideoWriterFactory { quality: opts.jpeg_quality }),
            )
            .context("constructing Matrix notifier")?;
            let runtime = AsyncPuRuntime::new(notifier, sentrymesh_core::DEFAULT_VIDEO_QUEUE_SIZE);
            executor.push_async(Box::new(runtime), control);
        }
        "MqttPublish" => {
            let opts: MqttPublishOptions = entry.parse_options()?;
            let publisher = MqttPublisher::connect(
                &MqttConfig {
                    broker: opts.broker,
                    port: opts.port,
                    username: opts.username,
                    password: opts.password,
                    ca_path: opts.ca_path,
                    topic: opts.topic,
                },
                &format!("sentrymesh-{}", device.name),
            )
            .context("connecting MQTT publisher")?;
            executor.push_sync(
                Box::new(MqttDetectionPublish::new(publisher, opts.class_ids)),
                control,
            );
        }
        other => {
            warn!("unknown pipeline entry type '{other}' for device '{}', skipping", device.name);
        }
    }
    Ok(())
}

fn load_font(path: Option<&str>) -> Option<OverlayFont> {
    let path = path?;
    match OverlayFont::load(std::path::Path::new(path)) {
        Ok(font) => Some(font),
        Err(e) => {
            warn!("failed to load overlay font {path}: {e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrymesh_config::PipelineEntryConfig;

    fn entry(kind: &str, options: serde_json::Value) -> PipelineEntryConfig {
        PipelineEntryConfig {
            kind: kind.into(),
            turned_on_hours: None,
            enabled: true,
            options,
        }
    }

    fn device() -> DeviceInfo {
        DeviceInfo {
            name: "front-door".into(),
            uri: "rtsp://cam.local/live".into(),
            expected_width: 1280,
            expected_height: 720,
        }
    }

    #[test]
    fn resize_options_accept_scale_without_width_or_height() {
        let e = entry("Resize", serde_json::json!({"scale": 0.5}));
        let opts: ResizeOptions = e.parse_options().unwrap();
        assert_eq!(opts.width, None);
        assert_eq!(opts.height, None);
        assert_eq!(opts.scale, Some(0.5));
    }

    #[test]
    fn object_prune_options_default_fully_when_entry_has_no_fields() {
        let e = entry("ObjectPrune", serde_json::json!({}));
        let opts: ObjectPruneOptions = e.parse_options().unwrap_or_default();
        assert!(opts.allowed_classes.is_empty());
        assert_eq!(opts.edge_constraints.left.min, -0.01);
        assert_eq!(opts.edge_constraints.left.max, 1.01);
        assert_eq!(opts.min_area_ratio, None);
        assert_eq!(opts.max_area_ratio, None);
    }

    #[test]
    fn object_prune_options_parse_per_edge_constraints() {
        let e = entry(
            "ObjectPrune",
            serde_json::json!({"edgeConstraints": {"left": {"min": 0.1, "max": 0.9}}}),
        );
        let opts: ObjectPruneOptions = e.parse_options().unwrap_or_default();
        assert_eq!(opts.edge_constraints.left.min, 0.1);
        assert_eq!(opts.edge_constraints.left.max, 0.9);
        assert_eq!(opts.edge_constraints.right.min, -0.01);
        assert_eq!(opts.edge_constraints.right.max, 1.01);
    }

    #[test]
    fn segment_recorder_options_tolerate_missing_hooks() {
        let e = entry(
            "SegmentRecorder",
            serde_json::json!({"filenameTemplate": "clip-{timestamp}.bin"}),
        );
        let opts: SegmentRecorderOptions = e.parse_options().unwrap();
        assert_eq!(opts.on_video_starts, None);
        assert_eq!(opts.on_video_ends, None);
        assert_eq!(opts.pre_record_frames, 30);
        assert_eq!(opts.codec, "h264");
    }

    #[test]
    fn snapshot_multiplexer_options_tolerate_missing_shm_and_zmq() {
        let e = entry("SnapshotMultiplexer", serde_json::json!({}));
        let opts: SnapshotMultiplexerOptions = e.parse_options().unwrap();
        assert_eq!(opts.shm_path, None);
        assert_eq!(opts.zmq_bind, None);
        assert_eq!(opts.shm_size, 2_000_000);
        assert_eq!(opts.zmq_send_hwm, 10);
    }

    #[test]
    fn unknown_pipeline_entry_type_is_skipped_not_an_error() {
        let mut executor = PipelineExecutor::new();
        let e = entry("SomeFutureStage", serde_json::json!({}));
        let control = PuControl::new(e.active_hours());
        let result = push_entry(&mut executor, &e, &device(), control, None);
        assert!(result.is_ok());
    }

    #[test]
    fn resize_entry_missing_both_target_kinds_is_skipped_not_an_error() {
        let mut executor = PipelineExecutor::new();
        let e = entry("Resize", serde_json::json!({}));
        let control = PuControl::new(e.active_hours());
        let result = push_entry(&mut executor, &e, &device(), control, None);
        assert!(result.is_ok());
    }
}
