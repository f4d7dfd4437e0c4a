//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Per-device capture loop (spec §4.1) and the video source contract it is
//! built on.

pub mod capture;
pub mod source;

pub use capture::CaptureLoop;
pub use source::{FrameDecoder, PlaceholderDecoder, RetinaSourceFactory, VideoSource, VideoSourceFactory};
