//! Opus packet introspection
//!
//! Classifies compressed Opus packets without decoding them: coding mode,
//! frame layout, SILK voice activity and in-band FEC (LBRR) presence.

pub mod packet;
pub mod toc;

pub use packet::{OpusPacket, MAX_FRAMES, MAX_FRAME_SIZE_BYTES};
pub use toc::{FrameCode, Mode, Toc};

/// Result of inspecting the SILK VAD flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceActivity {
    Active,
    Inactive,
    /// CELT-only packets carry no VAD flags; unparseable packets land here too.
    Undeterminable,
}

impl VoiceActivity {
    pub fn is_active(&self) -> bool {
        matches!(self, VoiceActivity::Active)
    }
}

/// True if the packet uses CELT-only coding. Empty packets are not.
pub fn packet_is_celt_only(packet: &[u8]) -> bool {
    Toc::from_packet(packet).is_some_and(|toc| toc.is_celt_only())
}

/// Read the SILK VAD flags of every frame in the packet.
///
/// Each SILK frame starts with one VAD bit per 20 ms sub-frame followed by the
/// LBRR flag; for stereo the side channel repeats the pattern right after.
pub fn packet_voice_activity(packet: &[u8]) -> VoiceActivity {
    let Some(toc) = Toc::from_packet(packet) else {
        return VoiceActivity::Inactive;
    };
    if toc.is_celt_only() {
        return VoiceActivity::Undeterminable;
    }

    let parsed = match OpusPacket::parse(packet) {
        Ok(parsed) => parsed,
        Err(_) => return VoiceActivity::Undeterminable,
    };

    let silk_frames = toc.num_silk_frames();
    if silk_frames == 0 {
        return VoiceActivity::Undeterminable;
    }
    let shift = 8 - silk_frames as u32;

    for (offset, size) in parsed.frames() {
        if size < 1 {
            continue;
        }
        let first = packet[offset];
        if first >> shift != 0 {
            return VoiceActivity::Active;
        }
        if toc.is_stereo() {
            // Skip the mid channel's VAD bits and LBRR flag.
            let side = first.wrapping_shl(silk_frames as u32 + 1);
            if side >> shift != 0 {
                return VoiceActivity::Active;
            }
        }
    }

    VoiceActivity::Inactive
}

/// True if the first frame's LBRR flag is set for any channel.
///
/// The flag for channel `c` sits `(c + 1) * (silk_frames + 1) - 1` bits from
/// the most significant bit of the first frame.
pub fn packet_has_fec(packet: &[u8]) -> bool {
    let Some(toc) = Toc::from_packet(packet) else {
        return false;
    };
    if toc.is_celt_only() {
        return false;
    }

    let parsed = match OpusPacket::parse(packet) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    let (Some(offset), Some(size)) = (parsed.frame_offset(0), parsed.frame_size(0)) else {
        return false;
    };
    if size <= 1 {
        return false;
    }

    let silk_frames = toc.num_silk_frames();
    if silk_frames == 0 {
        return false;
    }

    let first = packet[offset];
    (0..toc.channels()).any(|channel| {
        let bit = (channel + 1) * (silk_frames + 1) - 1;
        bit < 8 && first & (0x80u8 >> bit) != 0
    })
}
