use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fixed part of an encoded record: id + remaining_ms + message length.
pub const RECORD_HEADER_LEN: usize = 8 + 8 + 4;

/// Identity of one scheduled alarm within a context. Assigned monotonically,
/// never reused while the context is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AlarmId(pub u64);

impl AlarmId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alarm-{}", self.0)
    }
}

/// Wire view of an alarm, either pending (in a snapshot) or just fired
/// (`remaining_ms == 0`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRecord {
    pub id: AlarmId,
    pub remaining_ms: u64,
    pub message: Bytes,
}

impl AlarmRecord {
    pub fn new(id: AlarmId, remaining_ms: u64, message: Bytes) -> Self {
        Self {
            id,
            remaining_ms,
            message,
        }
    }

    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.message.len()
    }

    /// `id: u64 | remaining_ms: u64 | len: u32 | message`, big-endian.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u64(self.id.0);
        buf.put_u64(self.remaining_ms);
        buf.put_u32(self.message.len() as u32);
        buf.put_slice(&self.message);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Decode exactly one record; trailing bytes are an error.
    pub fn decode(mut src: &[u8]) -> Result<Self, FrameError> {
        let record = Self::decode_from(&mut src)?;
        if src.has_remaining() {
            return Err(FrameError::TrailingBytes {
                remaining: src.remaining(),
            });
        }
        Ok(record)
    }

    fn decode_from(src: &mut &[u8]) -> Result<Self, FrameError> {
        ensure_remaining(src, RECORD_HEADER_LEN)?;
        let id = AlarmId(src.get_u64());
        let remaining_ms = src.get_u64();
        let len = src.get_u32() as usize;
        ensure_remaining(src, len)?;
        let message = Bytes::copy_from_slice(&src[..len]);
        src.advance(len);
        Ok(Self {
            id,
            remaining_ms,
            message,
        })
    }
}

/// Errors raised while decoding framed alarm records.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("frame has {remaining} unexpected trailing bytes")]
    TrailingBytes { remaining: usize },
}

fn ensure_remaining(src: &&[u8], needed: usize) -> Result<(), FrameError> {
    if src.remaining() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: src.remaining(),
        });
    }
    Ok(())
}

/// Batched list-alarms payload: `count: u32` followed by `count` records.
pub fn encode_snapshot(records: &[AlarmRecord]) -> Bytes {
    let len = 4 + records.iter().map(AlarmRecord::encoded_len).sum::<usize>();
    let mut buf = BytesMut::with_capacity(len);
    buf.put_u32(records.len() as u32);
    for record in records {
        record.encode_into(&mut buf);
    }
    buf.freeze()
}

pub fn decode_snapshot(mut src: &[u8]) -> Result<Vec<AlarmRecord>, FrameError> {
    ensure_remaining(&src, 4)?;
    let count = src.get_u32() as usize;
    // A record is at least RECORD_HEADER_LEN bytes; cap the allocation by what
    // the buffer could possibly hold.
    let mut records = Vec::with_capacity(count.min(src.remaining() / RECORD_HEADER_LEN));
    for _ in 0..count {
        records.push(AlarmRecord::decode_from(&mut src)?);
    }
    if src.has_remaining() {
        return Err(FrameError::TrailingBytes {
            remaining: src.remaining(),
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(id: u64, remaining_ms: u64, msg: &'static str) -> AlarmRecord {
        AlarmRecord::new(AlarmId(id), remaining_ms, Bytes::from_static(msg.as_bytes()))
    }

    #[test]
    fn test_record_layout_is_big_endian() {
        let encoded = record(1, 2, "hi").encode();
        assert_eq!(
            encoded.as_ref(),
            &[
                0, 0, 0, 0, 0, 0, 0, 1, // id
                0, 0, 0, 0, 0, 0, 0, 2, // remaining_ms
                0, 0, 0, 2, // len
                b'h', b'i',
            ]
        );
    }

    #[test]
    fn test_snapshot_preserves_order_and_binary_messages() {
        let records = vec![
            record(3, 10, "wake up"),
            AlarmRecord::new(AlarmId(7), 0, Bytes::from_static(&[0, 255, 10])),
            record(9, 5000, ""),
        ];
        let decoded = decode_snapshot(&encode_snapshot(&records)).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_empty_snapshot() {
        let encoded = encode_snapshot(&[]);
        assert_eq!(encoded.as_ref(), &[0, 0, 0, 0]);
        assert_eq!(decode_snapshot(&encoded).unwrap(), vec![]);
    }

    #[test]
    fn test_truncated_message_rejected() {
        let encoded = record(1, 0, "hello").encode();
        let err = AlarmRecord::decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                needed: 5,
                available: 4
            }
        );
    }

    #[test]
    fn test_snapshot_count_larger_than_payload_rejected() {
        let mut encoded = BytesMut::new();
        encoded.put_u32(u32::MAX);
        record(1, 0, "x").encode_into(&mut encoded);
        assert!(matches!(
            decode_snapshot(&encoded),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoded = BytesMut::from(record(1, 0, "x").encode().as_ref());
        encoded.put_u8(0);
        assert_eq!(
            AlarmRecord::decode(&encoded).unwrap_err(),
            FrameError::TrailingBytes { remaining: 1 }
        );
    }
}
