/// Opus packet framing (RFC 6716 section 3.2 and appendix B)
///
/// Splits a packet into its Opus frames without decoding any audio.
use super::toc::{FrameCode, Toc};
use crate::error::OpusError;

/// At most 48 frames fit in a code 3 packet (120 ms of 2.5 ms frames).
pub const MAX_FRAMES: usize = 48;

/// No individual Opus frame may exceed this many bytes.
pub const MAX_FRAME_SIZE_BYTES: usize = 1275;

/// 120 ms at 48 kHz
const MAX_PACKET_SAMPLES_48K: u32 = 5760;

/// Byte layout of a parsed Opus packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusPacket {
    toc: Toc,
    frame_count: usize,
    frame_offsets: [usize; MAX_FRAMES],
    frame_sizes: [usize; MAX_FRAMES],
    payload_offset: usize,
    packet_len: usize,
}

impl OpusPacket {
    /// Parse an undelimited packet occupying all of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, OpusError> {
        parse_impl(data, false)
    }

    /// Parse a self-delimited packet at the start of `data`; trailing bytes
    /// beyond the packet are ignored.
    pub fn parse_self_delimited(data: &[u8]) -> Result<Self, OpusError> {
        parse_impl(data, true)
    }

    pub fn toc(&self) -> Toc {
        self.toc
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// (offset, size) of each frame, offsets relative to the start of the packet
    pub fn frames(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.frame_offsets[..self.frame_count]
            .iter()
            .copied()
            .zip(self.frame_sizes[..self.frame_count].iter().copied())
    }

    pub fn frame_size(&self, index: usize) -> Option<usize> {
        (index < self.frame_count).then(|| self.frame_sizes[index])
    }

    pub fn frame_offset(&self, index: usize) -> Option<usize> {
        (index < self.frame_count).then(|| self.frame_offsets[index])
    }

    /// Offset of the first frame's data
    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    /// Total packet length including padding
    pub fn packet_len(&self) -> usize {
        self.packet_len
    }
}

/// Parse a frame length: one byte below 252, otherwise two bytes.
///
/// Returns (size, bytes consumed).
fn parse_size(data: &[u8], offset: usize, remaining: isize) -> Result<(usize, usize), OpusError> {
    if remaining < 1 {
        return Err(OpusError::InvalidPacket);
    }
    let first = *data.get(offset).ok_or(OpusError::InvalidPacket)?;
    if first < 252 {
        return Ok((first as usize, 1));
    }
    if remaining < 2 {
        return Err(OpusError::InvalidPacket);
    }
    let second = *data.get(offset + 1).ok_or(OpusError::InvalidPacket)?;
    Ok((4 * second as usize + first as usize, 2))
}

fn parse_impl(data: &[u8], self_delimited: bool) -> Result<OpusPacket, OpusError> {
    let toc = Toc::from_packet(data).ok_or(OpusError::InvalidPacket)?;

    let mut sizes = [0usize; MAX_FRAMES];
    let mut offset = 1usize;
    // Signed: padding is subtracted before it is validated.
    let mut remaining = data.len() as isize - 1;
    let mut last_size = remaining;
    let mut padding = 0usize;
    let mut cbr = false;
    let frame_count;

    match toc.frame_code() {
        FrameCode::One => frame_count = 1,
        FrameCode::TwoEqual => {
            frame_count = 2;
            cbr = true;
            if !self_delimited {
                if remaining & 0x1 != 0 {
                    return Err(OpusError::InvalidPacket);
                }
                last_size = remaining / 2;
                sizes[0] = last_size as usize;
            }
        }
        FrameCode::TwoDifferent => {
            frame_count = 2;
            let (size, used) = parse_size(data, offset, remaining)?;
            remaining -= used as isize;
            if size as isize > remaining {
                return Err(OpusError::InvalidPacket);
            }
            offset += used;
            sizes[0] = size;
            last_size = remaining - size as isize;
        }
        FrameCode::Arbitrary => {
            if remaining < 1 {
                return Err(OpusError::InvalidPacket);
            }
            // |v|p|     M     |
            let count_byte = data[offset];
            offset += 1;
            remaining -= 1;

            frame_count = (count_byte & 0x3f) as usize;
            if frame_count == 0 || frame_count > MAX_FRAMES {
                return Err(OpusError::InvalidPacket);
            }
            if toc.samples_per_frame(48_000) * frame_count as u32 > MAX_PACKET_SAMPLES_48K {
                return Err(OpusError::InvalidPacket);
            }

            if count_byte & 0x40 != 0 {
                loop {
                    if remaining <= 0 {
                        return Err(OpusError::InvalidPacket);
                    }
                    let padding_byte = data[offset];
                    offset += 1;
                    remaining -= 1;
                    // 255 means 254 bytes of padding plus another count byte
                    let amount = if padding_byte == 255 { 254 } else { padding_byte as usize };
                    remaining -= amount as isize;
                    padding += amount;
                    if padding_byte != 255 {
                        break;
                    }
                }
            }
            if remaining < 0 {
                return Err(OpusError::InvalidPacket);
            }

            cbr = count_byte & 0x80 == 0;
            if !cbr {
                last_size = remaining;
                for size_slot in sizes.iter_mut().take(frame_count - 1) {
                    let (size, used) = parse_size(data, offset, remaining)?;
                    remaining -= used as isize;
                    if size as isize > remaining {
                        return Err(OpusError::InvalidPacket);
                    }
                    offset += used;
                    *size_slot = size;
                    last_size -= (used + size) as isize;
                }
                if last_size < 0 {
                    return Err(OpusError::InvalidPacket);
                }
            } else if !self_delimited {
                last_size = remaining / frame_count as isize;
                if last_size * frame_count as isize != remaining {
                    return Err(OpusError::InvalidPacket);
                }
                for size_slot in sizes.iter_mut().take(frame_count - 1) {
                    *size_slot = last_size as usize;
                }
            }
        }
    }

    if self_delimited {
        // The extra length always describes the last frame, or every frame for CBR.
        let (size, used) = parse_size(data, offset, remaining)?;
        remaining -= used as isize;
        if size as isize > remaining {
            return Err(OpusError::InvalidPacket);
        }
        offset += used;
        sizes[frame_count - 1] = size;

        if cbr {
            if (size * frame_count) as isize > remaining {
                return Err(OpusError::InvalidPacket);
            }
            for size_slot in sizes.iter_mut().take(frame_count - 1) {
                *size_slot = size;
            }
        } else if (used + size) as isize > last_size {
            return Err(OpusError::InvalidPacket);
        }
    } else {
        // Implicit last frame size must still be a legal frame size.
        if last_size > MAX_FRAME_SIZE_BYTES as isize {
            return Err(OpusError::InvalidPacket);
        }
        sizes[frame_count - 1] = last_size as usize;
    }

    let payload_offset = offset;
    let mut frame_offsets = [0usize; MAX_FRAMES];
    for (slot, size) in frame_offsets.iter_mut().zip(sizes.iter()).take(frame_count) {
        *slot = offset;
        offset += size;
    }

    Ok(OpusPacket {
        toc,
        frame_count,
        frame_offsets,
        frame_sizes: sizes,
        payload_offset,
        packet_len: offset + padding,
    })
}
