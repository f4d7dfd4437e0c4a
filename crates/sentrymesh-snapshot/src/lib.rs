//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Snapshot Multiplexer (spec §4.6): encodes one frame to JPEG per cycle
//! and fans it out over every enabled transport. Runs as an [`AsyncSink`]
//! behind an `AsyncPuRuntime`, inheriting the shared drop-on-overflow
//! back-pressure policy (spec §4.3).

pub mod file_sink;
pub mod http;
pub mod proto;
pub mod shm_sink;
pub mod zmq_sink;

use anyhow::Result;
use chrono::Local;
use log::error;
use sentrymesh_core::{render_template, AsyncSink, GpuFrame, JpegEncoder, PipelineContext, TemplateValues, TimeThrottle};
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub use http::{router, BasicAuthConfig, HttpSnapshotState};
pub use shm_sink::ShmSink;
pub use zmq_sink::ZmqSink;

pub struct SnapshotConfig {
    pub refresh_interval: std::time::Duration,
    pub quality: u8,
    /// Template, e.g. `"/var/lib/sentrymesh/{deviceName}.jpg"` (spec §6).
    pub file_path_template: Option<String>,
}

pub struct SnapshotMultiplexer {
    config: SnapshotConfig,
    encoder: Box<dyn JpegEncoder>,
    throttle: TimeThrottle,
    http_state: Option<Arc<HttpSnapshotState>>,
    shm: Option<ShmSink>,
    zmq: Option<ZmqSink>,
}

impl SnapshotMultiplexer {
    pub fn new(
        config: SnapshotConfig,
        encoder: Box<dyn JpegEncoder>,
        http_state: Option<Arc<HttpSnapshotState>>,
        shm: Option<ShmSink>,
        zmq: Option<ZmqSink>,
    ) -> Self {
        let throttle = TimeThrottle::new(config.refresh_interval);
        Self {
            config,
            encoder,
            throttle,
            http_state,
            shm,
            zmq,
        }
    }

    fn publish_file(&self, device_name: &str, jpeg: &[u8]) -> Result<()> {
        if let Some(template) = &self.config.file_path_template {
            let values = TemplateValues {
                device_name: device_name.to_string(),
                timestamp: Some(Local::now()),
                ..Default::default()
            };
            let path = render_template(template, &values);
            file_sink::write_atomic(Path::new(&path), jpeg)?;
        }
        Ok(())
    }
}

impl AsyncSink for SnapshotMultiplexer {
    fn name(&self) -> &str {
        "SnapshotMultiplexer"
    }

    fn on_frame_ready(&mut self, frame: GpuFrame, ctx: PipelineContext) {
        let now = Instant::now();
        if !self.throttle.ready(now) {
            return;
        }

        let jpeg = match self.encoder.encode(&frame, self.config.quality) {
            Ok(j) => j,
            Err(e) => {
                error!("snapshot: jpeg encode failed: {e}");
                return;
            }
        };

        if let Some(http_state) = &self.http_state {
            http_state.publish(jpeg.clone());
        }

        if let Err(e) = self.publish_file(&ctx.device.name, &jpeg) {
            error!("snapshot: file transport failed: {e}");
        }

        if let Some(shm) = &mut self.shm {
            shm.publish(&jpeg);
        }

        if let Some(zmq) = &self.zmq {
            let ns = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0);
            zmq.publish(ns, &jpeg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrymesh_core::{CpuJpegEncoder, DeviceInfo};
    use std::time::Duration;

    fn ctx() -> PipelineContext {
        PipelineContext::new(
            DeviceInfo {
                name: "front".into(),
                uri: "u".into(),
                expected_width: 4,
                expected_height: 4,
            },
            Instant::now(),
        )
    }

    #[test]
    fn publishes_to_http_state_on_tick() {
        let http_state = HttpSnapshotState::new(None);
        let config = SnapshotConfig {
            refresh_interval: Duration::ZERO,
            quality: 80,
            file_path_template: None,
        };
        let mut multiplexer =
            SnapshotMultiplexer::new(config, Box::new(CpuJpegEncoder), Some(Arc::clone(&http_state)), None, None);
        multiplexer.on_frame_ready(GpuFrame::placeholder(4, 4), ctx());
        assert!(http_state.has_snapshot());
    }

    #[test]
    fn refresh_interval_throttles_publication() {
        let http_state = HttpSnapshotState::new(None);
        let config = SnapshotConfig {
            refresh_interval: Duration::from_secs(60),
            quality: 80,
            file_path_template: None,
        };
        let mut multiplexer =
            SnapshotMultiplexer::new(config, Box::new(CpuJpegEncoder), Some(Arc::clone(&http_state)), None, None);
        multiplexer.on_frame_ready(GpuFrame::placeholder(4, 4), ctx());
        assert!(http_state.has_snapshot());
        http_state.clear_for_test();
        multiplexer.on_frame_ready(GpuFrame::placeholder(4, 4), ctx());
        assert!(!http_state.has_snapshot());
    }
}
