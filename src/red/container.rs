//! RFC 2198 container parsing and building
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |F|   block PT  |  timestamp offset         |   block length    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Non-last headers have F=1 and are four bytes. The last header is a single
//! byte with F=0 and describes the primary block, which fills the remainder.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use super::{
    wrap32, Encoding, MAX_RED_BLOCK_SIZE, MAX_RED_TIMESTAMP_OFFSET, RED_HEADER_SIZE,
    RED_LAST_HEADER_SIZE,
};
use crate::error::{RedError, Result};

/// A decoded non-last header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockHeader {
    payload_type: u8,
    timestamp_offset: u32,
    length: usize,
}

impl BlockHeader {
    fn parse(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..RED_HEADER_SIZE)?;
        Some(Self {
            payload_type: header[0] & 0x7f,
            timestamp_offset: (u16::from_be_bytes([header[1], header[2]]) >> 2) as u32,
            length: (((header[2] & 0x03) as usize) << 8) | header[3] as usize,
        })
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(0x80 | (self.payload_type & 0x7f));
        buf.put_u16(((self.timestamp_offset as u16) << 2) | (self.length >> 8) as u16);
        buf.put_u8((self.length & 0xff) as u8);
    }
}

/// Split a RED payload into its blocks.
///
/// Returns the redundant blocks oldest to newest followed by the primary
/// block, which carries `primary_sequence_number`. Payloads share the
/// buffer of `data`.
pub fn split_encodings(
    opus_payload_type: u8,
    primary_timestamp: u32,
    data: &Bytes,
    primary_sequence_number: Option<u16>,
) -> Result<Vec<Encoding>> {
    let mut headers = Vec::new();
    let mut cursor = 0usize;
    // Header bytes plus declared block lengths so far
    let mut total = 0usize;

    loop {
        let first = *data
            .get(cursor)
            .ok_or(RedError::MalformedContainer("missing last header"))?;

        if first & 0x80 == 0 {
            let payload_type = first & 0x7f;
            if payload_type != opus_payload_type {
                return Err(RedError::PayloadTypeMismatch {
                    expected: opus_payload_type,
                    found: payload_type,
                });
            }
            total += RED_LAST_HEADER_SIZE;
            break;
        }

        let header = BlockHeader::parse(&data[cursor..])
            .ok_or(RedError::MalformedContainer("truncated block header"))?;
        total += RED_HEADER_SIZE + header.length;
        if total > data.len() {
            return Err(RedError::MalformedContainer("block length exceeds payload"));
        }
        headers.push(header);
        cursor += RED_HEADER_SIZE;
    }

    if total >= data.len() {
        return Err(RedError::UnrecoverableFrame);
    }

    let mut encodings = Vec::with_capacity(headers.len() + 1);
    let mut offset = cursor + RED_LAST_HEADER_SIZE;
    for header in &headers {
        let timestamp = wrap32(primary_timestamp as i64 - header.timestamp_offset as i64);
        encodings.push(Encoding::redundant(
            timestamp,
            data.slice(offset..offset + header.length),
        ));
        offset += header.length;
    }

    encodings.push(Encoding::primary(
        primary_timestamp,
        primary_sequence_number,
        data.slice(offset..),
    ));

    trace!(
        "Split RED payload ts={} into {} redundant + primary ({} bytes)",
        primary_timestamp,
        headers.len(),
        data.len() - offset
    );

    Ok(encodings)
}

/// Check a primary payload against the hard size limits.
pub fn validate_primary(len: usize, max_audio_payload_size: usize) -> Result<()> {
    if len == 0 {
        return Err(RedError::EmptyPayload);
    }
    let max = max_audio_payload_size.min(MAX_RED_BLOCK_SIZE);
    if len >= max {
        return Err(RedError::OversizePayload { len, max });
    }
    Ok(())
}

/// Wrap a primary payload and the given redundant encodings (oldest first)
/// into one RED payload.
pub fn build(
    opus_payload_type: u8,
    max_audio_payload_size: usize,
    primary_timestamp: u32,
    primary: &[u8],
    redundant: &[Encoding],
) -> Result<Bytes> {
    validate_primary(primary.len(), max_audio_payload_size)?;

    let headers = redundant
        .iter()
        .map(|encoding| {
            let timestamp_offset = primary_timestamp.wrapping_sub(encoding.timestamp);
            if timestamp_offset >= MAX_RED_TIMESTAMP_OFFSET {
                return Err(RedError::MalformedContainer("timestamp offset exceeds 14 bits"));
            }
            if encoding.payload.len() >= MAX_RED_BLOCK_SIZE {
                return Err(RedError::OversizePayload {
                    len: encoding.payload.len(),
                    max: MAX_RED_BLOCK_SIZE,
                });
            }
            Ok(BlockHeader {
                payload_type: opus_payload_type,
                timestamp_offset,
                length: encoding.payload.len(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let total = headers
        .iter()
        .map(|header| RED_HEADER_SIZE + header.length)
        .sum::<usize>()
        + RED_LAST_HEADER_SIZE
        + primary.len();
    if total > max_audio_payload_size {
        return Err(RedError::OversizePayload {
            len: total,
            max: max_audio_payload_size,
        });
    }

    let mut buf = BytesMut::with_capacity(total);
    for header in &headers {
        header.write(&mut buf);
    }
    buf.put_u8(opus_payload_type & 0x7f);
    for encoding in redundant {
        buf.put_slice(&encoding.payload);
    }
    buf.put_slice(primary);

    Ok(buf.freeze())
}
