//! RFC 2198 redundant audio (RED)
//!
//! Container parsing/building, the sender's encoding history and the
//! receiver's loss/recovery accounting.

pub mod container;
pub mod history;
pub mod loss;
pub mod packet_log;
pub mod policy;

use bytes::Bytes;

use crate::opus;

/// The 10-bit block length field limits each block to 1023 bytes.
pub const MAX_RED_BLOCK_SIZE: usize = 1 << 10;

/// The 14-bit timestamp offset field
pub const MAX_RED_TIMESTAMP_OFFSET: u32 = 1 << 14;

pub const RED_HEADER_SIZE: usize = 4;
pub const RED_LAST_HEADER_SIZE: usize = 1;

/// 20 ms at 48 kHz
pub const PACKETIZATION_TIME: u32 = 960;

/// Redundant blocks skip every other interval; in-band FEC covers the gap.
pub const PACKET_DISTANCE: u32 = 2;

pub const MAX_RED_ENCODINGS: usize = 2;

/// Oldest recoverable packet, in packetization intervals
pub const MAX_RECOVERY_DISTANCE: u32 = PACKET_DISTANCE * MAX_RED_ENCODINGS as u32 + 1;

pub const MAX_AUDIO_PAYLOAD_SIZE: usize = 1000;
pub const MAX_ENCODING_HISTORY_SIZE: usize = 10;
pub const MAX_OUT_OF_ORDER_DISTANCE: usize = 16;

/// 5 seconds of 48 kHz media time
pub const LOSS_REPORT_INTERVAL: u32 = 48_000 * 5;

/// Reduce a signed value modulo 2^32 into RTP timestamp space.
pub fn wrap32(value: i64) -> u32 {
    value.rem_euclid(1 << 32) as u32
}

/// Signed distance from `b` to `a` in 16-bit sequence space.
pub fn seq_diff(a: u16, b: u16) -> i16 {
    a.wrapping_sub(b) as i16
}

/// Signed distance from `b` to `a` in 32-bit timestamp space.
pub fn timestamp_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// One compressed audio payload and where it sits in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoding {
    pub timestamp: u32,
    /// Only known for the primary block of a received frame
    pub sequence_number: Option<u16>,
    pub payload: Bytes,
    pub is_redundant: bool,
}

impl Encoding {
    pub fn primary(timestamp: u32, sequence_number: Option<u16>, payload: Bytes) -> Self {
        Self {
            timestamp,
            sequence_number,
            payload,
            is_redundant: false,
        }
    }

    pub fn redundant(timestamp: u32, payload: Bytes) -> Self {
        Self {
            timestamp,
            sequence_number: None,
            payload,
            is_redundant: true,
        }
    }

    /// Whether the payload carries Opus in-band FEC for the previous interval.
    ///
    /// Computed from the bytes on every call.
    pub fn has_fec(&self) -> bool {
        opus::packet_has_fec(&self.payload)
    }

    /// CELT-only or voice-active encodings are worth repeating.
    pub fn is_important(&self) -> bool {
        is_important(&self.payload)
    }
}

/// CELT-only packets are always kept; SILK/Hybrid only when voice is active.
pub fn is_important(payload: &[u8]) -> bool {
    opus::packet_is_celt_only(payload) || opus::packet_voice_activity(payload).is_active()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap32() {
        assert_eq!(wrap32(-1), u32::MAX);
        assert_eq!(wrap32(1 << 32), 0);
        assert_eq!(wrap32(12345), 12345);
        assert_eq!(wrap32(u32::MAX as i64), u32::MAX);
        assert_eq!(wrap32(-(1 << 32) - 5), u32::MAX - 4);
    }

    #[test]
    fn test_seq_diff_wraparound() {
        assert_eq!(seq_diff(0, 65535), 1);
        assert_eq!(seq_diff(65535, 0), -1);
        assert_eq!(seq_diff(100, 90), 10);
        assert_eq!(seq_diff(90, 100), -10);
    }

    #[test]
    fn test_timestamp_diff_wraparound() {
        assert_eq!(timestamp_diff(100, u32::MAX - 859), 960);
        assert_eq!(timestamp_diff(0, 960), -960);
    }

    #[test]
    fn test_max_recovery_distance() {
        assert_eq!(MAX_RECOVERY_DISTANCE, 5);
    }

    #[test]
    fn test_has_fec_recomputed() {
        let mut encoding = Encoding::redundant(0, Bytes::from_static(&[9 << 3, 0x40, 0x00]));
        assert!(encoding.has_fec());
        encoding.payload = Bytes::from_static(&[9 << 3, 0x80, 0x00]);
        assert!(!encoding.has_fec());
    }

    #[test]
    fn test_importance() {
        assert!(is_important(&[31 << 3, 0x00]));
        assert!(is_important(&[9 << 3, 0x80]));
        assert!(!is_important(&[9 << 3, 0x00]));
        assert!(!is_important(&[]));
    }
}


#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn wrap32_in_range_is_identity() {
        let value: u32 = kani::any();
        assert!(wrap32(value as i64) == value);
    }

    #[kani::proof]
    fn wrap32_shift_invariant() {
        let value: i32 = kani::any();
        let wrapped = wrap32(value as i64);
        assert!(wrap32(value as i64 + (1 << 32)) == wrapped);
        assert!(wrapped == value as u32);
    }

    #[kani::proof]
    fn seq_diff_inverts_wrapping_add() {
        let base: u16 = kani::any();
        let step: i16 = kani::any();
        let next = base.wrapping_add(step as u16);
        assert!(seq_diff(next, base) == step);
    }
}
