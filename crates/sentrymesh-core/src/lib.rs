//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Core data model and execution primitives for the per-feed frame
//! pipeline: the frame and its travelling context, the bounded SPSC queue,
//! the synchronous/asynchronous processing-unit interface, the pipeline
//! executor, and the small external-collaborator contracts (video/jpeg
//! writer) that later crates implement concretely.

pub mod executor;
pub mod frame;
pub mod pu;
pub mod queue;
pub mod ratelimit;
pub mod template;
pub mod termination;
pub mod writer;

pub use executor::{PipelineExecutor, PuControl};
pub use frame::{
    BBox, DeviceInfo, FaceCategory, FaceDetection, FaceRecognition, GpuFrame, PipelineContext,
    YoloContext,
};
pub use pu::{
    all_hours_active, is_hour_active, ActiveHours, AsyncProcessingUnit, AsyncPuRuntime,
    AsyncSink, PuResult, SyncProcessingUnit,
};
pub use queue::{BoundedQueue, DEFAULT_VIDEO_QUEUE_SIZE, DEFAULT_ZMQ_QUEUE_SIZE};
pub use ratelimit::{FrameThrottle, TimeThrottle};
pub use template::{render as render_template, TemplateValues};
pub use termination::Termination;
pub use writer::{
    CpuJpegEncoder, CpuVideoWriterFactory, JpegEncoder, SegmentWriter, VideoWriter,
    VideoWriterFactory,
};
