//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! ZeroMQ PUB snapshot transport (spec §4.6, §6): one protobuf-framed
//! message per published frame, sent best-effort.

use crate::proto::SnapshotRecord;
use anyhow::{Context, Result};
use log::error;
use prost::Message;

pub struct ZmqSink {
    socket: zmq::Socket,
    endpoint: String,
}

impl ZmqSink {
    pub fn bind(endpoint: &str, send_hwm: i32) -> Result<Self> {
        let ctx = zmq::Context::new();
        let socket = ctx.socket(zmq::PUB).context("creating ZMQ PUB socket")?;
        socket
            .set_sndhwm(send_hwm)
            .context("setting ZMQ send high-water mark")?;
        socket
            .bind(endpoint)
            .with_context(|| format!("binding ZMQ PUB socket to {endpoint}"))?;
        Ok(Self {
            socket,
            endpoint: endpoint.to_string(),
        })
    }

    /// Sends `{unixEpochNs, payload}` as one message. Send errors are
    /// logged; the frame is dropped (spec §4.6 "send errors are logged").
    pub fn publish(&self, unix_epoch_ns: i64, jpeg: &[u8]) {
        let record = SnapshotRecord {
            unix_epoch_ns,
            payload: jpeg.to_vec(),
        };
        let bytes = record.encode_to_vec();
        if let Err(e) = self.socket.send(bytes, zmq::DONTWAIT) {
            error!("zmq snapshot '{}': send failed: {e}", self.endpoint);
        }
    }
}
