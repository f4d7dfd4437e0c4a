//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Typed configuration schema (spec §6). The document itself is a
//! JSON-with-comments (JSONC) file; config *loading* (reading the file, CLI
//! flag parsing) is named an external collaborator in spec §1, but the
//! typed tree every PU is constructed from is not — each PU's `init` takes
//! one of the structs below, or a PU-specific struct parsed out of its
//! `options` value (spec §9 "typed config schema per PU kind").

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSection {
    pub name: String,
    pub uri: String,
    pub expected_frame_size: FrameSize,
}

/// One entry in a device's `pipeline` array (spec §6). `turnedOnHours`
/// defaults to all-24-true (spec §4.2). `options` carries the rest of the
/// object verbatim so each PU crate can deserialise its own typed struct out
/// of it without this crate knowing every PU kind up front.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PipelineEntryConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "turnedOnHours")]
    pub turned_on_hours: Option<[bool; 24]>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(flatten)]
    pub options: Value,
}

impl PipelineEntryConfig {
    pub fn active_hours(&self) -> [bool; 24] {
        self.turned_on_hours.unwrap_or([true; 24])
    }

    /// Deserialises `options` into a PU-specific config struct. Unknown PU
    /// types are logged and skipped by the caller rather than failing here
    /// (spec §4.2 "Unknown types are logged and skipped").
    pub fn parse_options<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_value(self.options.clone())
            .with_context(|| format!("parsing options for pipeline entry of type '{}'", self.kind))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpServiceConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    pub port: u16,
    #[serde(default)]
    pub use_https: bool,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_sec: f64,
    pub advertised_address: Option<String>,
}

fn default_interface() -> String {
    "0.0.0.0".to_string()
}

fn default_refresh_interval() -> f64 {
    1.0
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub pipeline: Vec<PipelineEntryConfig>,
    pub http_service: Option<HttpServiceConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootConfig {
    pub devices: Vec<DeviceConfig>,
}

/// Parses a JSONC document (spec §6). Fatal at startup on parse failure
/// (spec §7 error kind 7).
pub fn parse(text: &str) -> Result<RootConfig> {
    json5::from_str(text).context("failed to parse config document")
}

pub fn load(path: &Path) -> Result<RootConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    parse(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_device_with_comments_and_trailing_commas() {
        let doc = r#"
        {
          // one camera, no pipeline entries yet
          devices: [
            {
              device: { name: "front-door", uri: "rtsp://cam.local/live", expectedFrameSize: { width: 1280, height: 720 } },
              pipeline: [
                { type: "Resize", turnedOnHours: null, width: 640, height: 480 },
              ],
            },
          ],
        }
        "#;
        let cfg = parse(doc).unwrap();
        assert_eq!(cfg.devices.len(), 1);
        assert_eq!(cfg.devices[0].device.name, "front-door");
        assert_eq!(cfg.devices[0].pipeline[0].kind, "Resize");
        assert!(cfg.devices[0].pipeline[0].active_hours().iter().all(|h| *h));
    }

    #[derive(Deserialize)]
    struct ResizeOptions {
        width: u32,
        height: u32,
    }

    #[test]
    fn pu_options_parse_out_of_the_flattened_value() {
        let entry = PipelineEntryConfig {
            kind: "Resize".into(),
            turned_on_hours: None,
            enabled: true,
            options: serde_json::json!({"width": 320, "height": 240}),
        };
        let opts: ResizeOptions = entry.parse_options().unwrap();
        assert_eq!((opts.width, opts.height), (320, 240));
    }
}
