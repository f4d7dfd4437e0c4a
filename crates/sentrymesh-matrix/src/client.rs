//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Matrix REST contract (spec §4.7, §6): upload + `m.room.message` events
//! over bearer auth. Intentionally not `matrix-sdk` — the spec frames this
//! as a small REST contract, and the retrieved corpus never pulls in a
//! full Matrix SDK for this role.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct MatrixClient {
    http: reqwest::blocking::Client,
    home_server_url: String,
    access_token: String,
    room_id: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    content_uri: String,
}

impl MatrixClient {
    pub fn new(home_server_url: String, access_token: String, room_id: String) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .build()
            .context("building Matrix HTTP client")?;
        Ok(Self {
            http,
            home_server_url: home_server_url.trim_end_matches('/').to_string(),
            access_token,
            room_id,
        })
    }

    fn next_txn_id() -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        format!("sentrymesh-{nanos}")
    }

    /// `POST /_matrix/media/r0/upload`, returns the `mxc://` content URI.
    pub fn upload(&self, bytes: Vec<u8>, content_type: &str, filename: &str) -> Result<String> {
        let encoded_filename: String = url::form_urlencoded::byte_serialize(filename.as_bytes()).collect();
        let url = format!("{}/_matrix/media/r0/upload?filename={encoded_filename}", self.home_server_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .context("uploading media to Matrix")?;
        if !response.status().is_success() {
            bail!("Matrix upload failed with status {}", response.status());
        }
        let parsed: UploadResponse = response.json().context("parsing Matrix upload response")?;
        Ok(parsed.content_uri)
    }

    fn send_event(&self, event_type: &str, body: serde_json::Value) -> Result<()> {
        let txn_id = Self::next_txn_id();
        let url = format!(
            "{}/_matrix/client/r0/rooms/{}/send/{event_type}/{txn_id}",
            self.home_server_url, self.room_id
        );
        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .context("sending Matrix room event")?;
        if !response.status().is_success() {
            bail!("Matrix send event failed with status {}", response.status());
        }
        Ok(())
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send_event(
            "m.room.message",
            json!({ "msgtype": "m.text", "body": text }),
        )
    }

    pub fn send_image(&self, mxc: &str, width: u32, height: u32, size: usize) -> Result<()> {
        self.send_event(
            "m.room.message",
            json!({
                "msgtype": "m.image",
                "body": "snapshot.jpg",
                "url": mxc,
                "info": { "w": width, "h": height, "size": size, "mimetype": "image/jpeg" },
            }),
        )
    }

    pub fn send_video(
        &self,
        mxc: &str,
        thumbnail_mxc: &str,
        width: u32,
        height: u32,
        duration_ms: u64,
        size: usize,
    ) -> Result<()> {
        self.send_event(
            "m.room.message",
            json!({
                "msgtype": "m.video",
                "body": "clip.mp4",
                "url": mxc,
                "info": {
                    "w": width,
                    "h": height,
                    "size": size,
                    "duration": duration_ms,
                    "thumbnail_url": thumbnail_mxc,
                    "mimetype": "video/mp4",
                },
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_txn_id_is_unique_across_calls() {
        let a = MatrixClient::next_txn_id();
        let b = MatrixClient::next_txn_id();
        assert_ne!(a, b);
    }
}
