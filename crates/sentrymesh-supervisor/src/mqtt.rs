//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Object-detection MQTT publish (spec §6): TLS to the broker on 8883,
//! QoS 2, JSON `{unix_time_ms, boxes:[{x,y,w,h}]}`, nothing sent when
//! `boxes` is empty. Runs as a `SyncProcessingUnit` so it shares the
//! capture thread's per-frame cadence rather than its own queue.

use log::{error, warn};
use rumqttc::{Client, MqttOptions, QoS, TlsConfiguration, Transport};
use sentrymesh_core::{GpuFrame, PipelineContext, PuResult, SyncProcessingUnit};
use serde::Serialize;
use std::fs;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_path: String,
    pub topic: String,
}

#[derive(Serialize)]
struct BoxPayload {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

#[derive(Serialize)]
struct DetectionPayload {
    unix_time_ms: u64,
    boxes: Vec<BoxPayload>,
}

pub struct MqttPublisher {
    client: Client,
    topic: String,
}

impl MqttPublisher {
    pub fn connect(config: &MqttConfig, client_id: &str) -> anyhow::Result<Self> {
        let mut options = MqttOptions::new(client_id, config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user.clone(), pass.clone());
        }
        let ca = fs::read(&config.ca_path)?;
        options.set_transport(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }));

        let (client, mut connection) = Client::new(options, 16);
        std::thread::spawn(move || {
            for notification in connection.iter() {
                if let Err(e) = notification {
                    warn!("mqtt: connection event error: {e}");
                }
            }
        });

        Ok(Self {
            client,
            topic: config.topic.clone(),
        })
    }
}

pub struct MqttDetectionPublish {
    publisher: MqttPublisher,
    class_filter: Option<Vec<i32>>,
}

impl MqttDetectionPublish {
    pub fn new(publisher: MqttPublisher, class_filter: Option<Vec<i32>>) -> Self {
        Self {
            publisher,
            class_filter,
        }
    }
}

impl SyncProcessingUnit for MqttDetectionPublish {
    fn name(&self) -> &str {
        "MqttDetectionPublish"
    }

    fn process(&mut self, _frame: &mut GpuFrame, ctx: &mut PipelineContext) -> PuResult {
        let boxes: Vec<BoxPayload> = ctx
            .yolo
            .kept_indices
            .iter()
            .filter(|&&idx| {
                self.class_filter
                    .as_ref()
                    .map(|allowed| allowed.contains(&ctx.yolo.class_ids[idx]))
                    .unwrap_or(true)
            })
            .map(|&idx| {
                let bbox = ctx.yolo.boxes[idx];
                BoxPayload {
                    x: bbox.x,
                    y: bbox.y,
                    w: bbox.w,
                    h: bbox.h,
                }
            })
            .collect();

        if boxes.is_empty() {
            return PuResult::SuccessAndContinue;
        }

        let unix_time_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let payload = DetectionPayload { unix_time_ms, boxes };

        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(e) = self
                    .publisher
                    .client
                    .publish(&self.publisher.topic, QoS::ExactlyOnce, false, bytes)
                {
                    error!("mqtt: publish failed: {e}");
                }
            }
            Err(e) => error!("mqtt: failed to serialise detection payload: {e}"),
        }

        PuResult::SuccessAndContinue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentrymesh_core::{BBox, DeviceInfo, PipelineContext};
    use std::time::Instant;

    fn ctx_with_boxes(entries: &[(i32, BBox)]) -> PipelineContext {
        let device = DeviceInfo {
            name: "test".into(),
            uri: "rtsp://test".into(),
            expected_width: 640,
            expected_height: 480,
        };
        let mut ctx = PipelineContext::new(device, Instant::now());
        for (i, (class_id, bbox)) in entries.iter().enumerate() {
            ctx.yolo.boxes.push(*bbox);
            ctx.yolo.class_ids.push(*class_id);
            ctx.yolo.confidences.push(1.0);
            ctx.yolo.kept_indices.push(i);
            ctx.yolo.is_interesting.push(true);
        }
        ctx
    }

    #[test]
    fn class_filter_keeps_only_matching_ids() {
        let boxes = [
            (0, BBox { x: 0.0, y: 0.0, w: 10.0, h: 10.0 }),
            (2, BBox { x: 5.0, y: 5.0, w: 10.0, h: 10.0 }),
        ];
        let ctx = ctx_with_boxes(&boxes);
        let filter = Some(vec![0]);
        let kept: Vec<BoxPayload> = ctx
            .yolo
            .kept_indices
            .iter()
            .filter(|&&idx| {
                filter
                    .as_ref()
                    .map(|allowed| allowed.contains(&ctx.yolo.class_ids[idx]))
                    .unwrap_or(true)
            })
            .map(|&idx| {
                let bbox = ctx.yolo.boxes[idx];
                BoxPayload { x: bbox.x, y: bbox.y, w: bbox.w, h: bbox.h }
            })
            .collect();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].x, 0.0);
    }

    #[test]
    fn detection_payload_serialises_with_unix_time_and_boxes() {
        let payload = DetectionPayload {
            unix_time_ms: 12345,
            boxes: vec![BoxPayload { x: 1.0, y: 2.0, w: 3.0, h: 4.0 }],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["unix_time_ms"], serde_json::json!(12345));
        assert_eq!(json["boxes"].as_array().unwrap().len(), 1);
    }
}
