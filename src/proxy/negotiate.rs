//! Handshake answers.
//!
//! Drivers open every connection with an `ismaster` query on `admin.$cmd` to learn the
//! server's limits and wire versions. The proxy answers it itself with a fixed capability
//! document, so the backend is never asked. Any other `admin.$cmd` query is reported as
//! [`DispatchError::UnrecognizedNegotiation`] and left for the backend.
use bson::{Bson, DateTime, doc};

use super::dispatch::DispatchError;
use crate::wire::{QueryMessage, ReplyFlags, ReplyMessage};

pub const NEGOTIATION_NAMESPACE: &str = "admin.$cmd";

pub const MAX_BSON_OBJECT_SIZE: i32 = 16 * 1024 * 1024;
pub const MAX_MESSAGE_SIZE_BYTES: i32 = 48_000_000;
pub const MAX_WRITE_BATCH_SIZE: i32 = 1000;
pub const MAX_WIRE_VERSION: i32 = 5;
pub const MIN_WIRE_VERSION: i32 = 0;

pub fn is_negotiation(query: &QueryMessage) -> bool {
    query.namespace == NEGOTIATION_NAMESPACE
}

fn is_one(value: Option<&Bson>) -> bool {
    matches!(value, Some(Bson::Int32(1)) | Some(Bson::Int64(1)))
}

/// Builds the fixed capability reply for an `ismaster` handshake.
pub fn reply(query: &QueryMessage) -> Result<ReplyMessage, DispatchError> {
    let doc = &query.query;
    if !is_one(doc.get("ismaster")) && !is_one(doc.get("isMaster")) {
        return Err(DispatchError::UnrecognizedNegotiation(doc.to_string()));
    }

    Ok(ReplyMessage::single(
        ReplyFlags::SHARD_CONFIG_STALE,
        doc! {
            "ismaster": true,
            "maxBsonObjectSize": MAX_BSON_OBJECT_SIZE,
            "maxMessageSizeBytes": MAX_MESSAGE_SIZE_BYTES,
            "maxWriteBatchSize": MAX_WRITE_BATCH_SIZE,
            "localTime": DateTime::now(),
            "maxWireVersion": MAX_WIRE_VERSION,
            "minWireVersion": MIN_WIRE_VERSION,
            // Drivers have been seen to ignore this.
            "readOnly": false,
            "ok": 1,
        },
    ))
}
