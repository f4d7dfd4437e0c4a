//! SPDX-License-Identifier: GPL-3.0-or-later
//!
//! Wire format for the ZeroMQ snapshot transport (spec §6): a small
//! hand-declared `prost::Message` rather than a generated `.proto`, since
//! the schema is two fields and stable.

/// `{unixEpochNs: int64, payload: bytes(JPEG)}` (spec §6 "ZeroMQ snapshot").
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SnapshotRecord {
    #[prost(int64, tag = "1")]
    pub unix_epoch_ns: i64,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
}
