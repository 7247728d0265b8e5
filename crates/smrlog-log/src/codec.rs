//! Record framing.
//!
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized LogPayload)]
//! ```

use smrlog_types::{LogPayload, LogPosition};

use crate::error::{LogError, LogResult};

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// Encode a payload into a framed record.
pub fn encode_frame(payload: &LogPayload) -> LogResult<Vec<u8>> {
    let body = bincode::serialize(payload).map_err(|e| LogError::Serialization(e.to_string()))?;
    let length = u32::try_from(body.len())
        .map_err(|_| LogError::Serialization(format!("payload of {} bytes", body.len())))?;
    let crc = crc32fast::hash(&body);

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a framed record stored at `position`.
pub fn decode_frame(position: LogPosition, frame: &[u8]) -> LogResult<LogPayload> {
    if frame.len() < HEADER_SIZE {
        return Err(LogError::InvalidFrame {
            position,
            reason: format!("{} bytes is shorter than the header", frame.len()),
        });
    }

    let length = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
    let expected = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
    let body = &frame[HEADER_SIZE..];
    if body.len() != length {
        return Err(LogError::InvalidFrame {
            position,
            reason: format!("header claims {length} bytes, found {}", body.len()),
        });
    }

    let actual = crc32fast::hash(body);
    if actual != expected {
        return Err(LogError::CrcMismatch {
            position,
            expected,
            actual,
        });
    }

    bincode::deserialize(body).map_err(|e| LogError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use serde_json::json;
    use smrlog_types::{StreamId, TransactionBatch, TransactionId, UpdateEntry};

    use super::*;

    #[test]
    fn transaction_batch_survives_framing() {
        let stream = StreamId::named("accounts");
        let mut updates = BTreeMap::new();
        updates.insert(
            stream,
            vec![UpdateEntry::new("deposit", vec![json!("alice"), json!(10)])],
        );
        let payload = LogPayload::Transaction(TransactionBatch {
            transaction: TransactionId::new(),
            snapshot: Some(LogPosition::new(3)),
            read_set: BTreeSet::from([stream]),
            updates,
        });

        let frame = encode_frame(&payload).unwrap();
        let decoded = decode_frame(LogPosition::new(9), &frame).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn flipped_byte_fails_crc() {
        let mut frame = encode_frame(&LogPayload::Update(UpdateEntry::new("inc", vec![]))).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;

        let err = decode_frame(LogPosition::new(1), &frame).unwrap_err();
        assert!(matches!(err, LogError::CrcMismatch { .. }));
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let frame = encode_frame(&LogPayload::Hole).unwrap();
        let err = decode_frame(LogPosition::new(2), &frame[..frame.len() - 1]).unwrap_err();
        assert!(matches!(err, LogError::InvalidFrame { .. }));

        let err = decode_frame(LogPosition::new(2), &frame[..3]).unwrap_err();
        assert!(matches!(err, LogError::InvalidFrame { .. }));
    }
}
