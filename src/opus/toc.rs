//! Opus TOC byte (RFC 6716 section 3.1)
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! | config  |s| c |
//! +-+-+-+-+-+-+-+-+
//! ```

/// Coding mode selected by the configuration number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Configurations 0..=11
    Silk,
    /// Configurations 12..=15
    Hybrid,
    /// Configurations 16..=31
    CeltOnly,
}

/// Frame count code (the `c` bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCode {
    /// Code 0: one frame
    One,
    /// Code 1: two frames of equal size
    TwoEqual,
    /// Code 2: two frames of different size
    TwoDifferent,
    /// Code 3: an arbitrary number of frames
    Arbitrary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toc(pub u8);

impl Toc {
    /// Read the TOC from the first byte of a packet
    pub fn from_packet(packet: &[u8]) -> Option<Self> {
        packet.first().copied().map(Toc)
    }

    /// Configuration number (0..=31)
    pub fn config(&self) -> u8 {
        self.0 >> 3
    }

    /// CELT-only configurations (16..=31) always have the high config bit set.
    pub fn is_celt_only(&self) -> bool {
        self.0 & 0x80 != 0
    }

    /// Hybrid configurations (12..=15) have both mode bits set.
    pub fn is_hybrid(&self) -> bool {
        !self.is_celt_only() && self.0 & 0x60 == 0x60
    }

    pub fn mode(&self) -> Mode {
        if self.is_celt_only() {
            Mode::CeltOnly
        } else if self.is_hybrid() {
            Mode::Hybrid
        } else {
            Mode::Silk
        }
    }

    pub fn is_stereo(&self) -> bool {
        self.0 & 0x04 != 0
    }

    pub fn channels(&self) -> usize {
        if self.is_stereo() {
            2
        } else {
            1
        }
    }

    pub fn frame_code(&self) -> FrameCode {
        match self.0 & 0x03 {
            0 => FrameCode::One,
            1 => FrameCode::TwoEqual,
            2 => FrameCode::TwoDifferent,
            _ => FrameCode::Arbitrary,
        }
    }

    /// Number of samples per frame at `sample_rate_hz`.
    ///
    /// The sample rate should be a multiple of 400 for an exact result.
    pub fn samples_per_frame(&self, sample_rate_hz: u32) -> u32 {
        let size_option = (self.0 >> 3) & 0x03;
        match self.mode() {
            // 2.5, 5, 10, 20 ms
            Mode::CeltOnly => (sample_rate_hz << size_option) / 400,
            // 10 or 20 ms
            Mode::Hybrid => {
                if self.0 & 0x08 != 0 {
                    sample_rate_hz / 50
                } else {
                    sample_rate_hz / 100
                }
            }
            // 10, 20, 40, 60 ms
            Mode::Silk => {
                if size_option == 3 {
                    sample_rate_hz * 60 / 1000
                } else {
                    (sample_rate_hz << size_option) / 100
                }
            }
        }
    }

    /// Frame duration in milliseconds, rounded down (2.5 ms reports as 2).
    pub fn frame_duration_ms(&self) -> u32 {
        self.samples_per_frame(48_000) / 48
    }

    /// Number of SILK frames per Opus frame (RFC 6716 section 4.2.2).
    ///
    /// Returns 0 only for durations the TOC cannot encode.
    pub fn num_silk_frames(&self) -> usize {
        match self.frame_duration_ms().max(10) {
            10 | 20 => 1,
            40 => 2,
            60 => 3,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Toc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "opus_toc: config={}, mode={:?}, stereo={}, code={:?}",
            self.config(),
            self.mode(),
            self.is_stereo(),
            self.frame_code()
        )
    }
}
