//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Vision processing units: geometry transforms, frame statistics, the
//! object/face inference backend and the detector/prune/recognizer/overlay
//! PUs built on top of it (spec §4.4).

pub mod autozoom;
pub mod backend;
pub mod detector;
pub mod face_detect;
pub mod gallery;
pub mod geometry;
pub mod nms;
pub mod overlay;
pub mod prune;
pub mod recognizer;
pub mod stats;

pub use autozoom::AutoZoom;
pub use backend::{InferenceBackend, NullBackend, OrtBackend, RawDetection, RawEmbedding};
pub use detector::ObjectDetector;
pub use face_detect::FaceDetector;
pub use gallery::{cosine_similarity, l2_normalise, Gallery, GalleryIdentity};
pub use geometry::{
    parse_interpolation, Crop, FlipCode, Interpolation, Resize, ResizeTarget, Rotation, RotateFlip,
};
pub use nms::non_max_suppression;
pub use overlay::{OverlayBoxes, OverlayFaceIdentity, OverlayFont, OverlayInfo, OverlayLandmarks};
pub use prune::{EdgeRange, ObjectPrune, SizeConstraint};
pub use recognizer::FaceRecognizer;
pub use stats::{CollectStats, ControlFps, LatencyRole, MeasureLatency};
