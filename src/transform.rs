//! Frame transforms for redundant audio
//!
//! The sender re-wraps each outgoing RED frame with older encodings from its
//! history; the receiver splits incoming RED frames and accounts for loss and
//! recovery. Both directions fail open: a frame that cannot be handled is
//! forwarded unchanged.

use bytes::Bytes;
use tracing::{debug, info, trace};

use crate::config::RedConfig;
use crate::error::Result;
use crate::red::container::{build, split_encodings, validate_primary};
use crate::red::history::EncodingHistory;
use crate::red::loss::{LossStatistics, LossTracker};
use crate::red::{
    wrap32, Encoding, MAX_RED_ENCODINGS, MAX_RED_TIMESTAMP_OFFSET, RED_HEADER_SIZE,
    RED_LAST_HEADER_SIZE,
};
use crate::stats::{LossReport, StatsSink};
use crate::worker::ControlMessage;

/// Per-frame metadata supplied by the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameMetadata {
    pub payload_type: u8,
    pub sequence_number: Option<u16>,
    pub synchronization_source: Option<u32>,
}

/// One encoded audio frame crossing the transform boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub timestamp: u32,
    pub payload: Bytes,
    pub metadata: FrameMetadata,
}

impl EncodedFrame {
    pub fn new(timestamp: u32, payload: Bytes, metadata: FrameMetadata) -> Self {
        Self {
            timestamp,
            payload,
            metadata,
        }
    }
}

pub struct RedundantAudioTransform {
    red_payload_type: u8,
    opus_payload_type: u8,
    num_redundant_encodings: usize,
    redundancy_enabled: bool,
    max_audio_payload_size: usize,
    packetization_time: u32,
    packet_distance: u32,
    history: EncodingHistory,
    loss: LossTracker,
    sink: Box<dyn StatsSink + Send>,
}

impl RedundantAudioTransform {
    pub fn new(config: &RedConfig, sink: Box<dyn StatsSink + Send>) -> Self {
        Self {
            red_payload_type: config.red_payload_type,
            opus_payload_type: config.opus_payload_type,
            num_redundant_encodings: config.num_redundant_encodings.min(MAX_RED_ENCODINGS),
            redundancy_enabled: config.redundancy_enabled,
            max_audio_payload_size: config.max_audio_payload_size,
            packetization_time: config.packetization_time,
            packet_distance: config.packet_distance,
            history: EncodingHistory::new(
                config.max_encoding_history_size,
                config.max_history_age(),
            ),
            loss: LossTracker::new(config.loss_tracker_config()),
            sink,
        }
    }

    pub fn set_red_payload_type(&mut self, payload_type: u8) {
        self.red_payload_type = payload_type;
    }

    pub fn set_opus_payload_type(&mut self, payload_type: u8) {
        self.opus_payload_type = payload_type;
    }

    /// Clamped to two redundant encodings.
    pub fn set_num_redundant_encodings(&mut self, num: usize) {
        self.num_redundant_encodings = num.min(MAX_RED_ENCODINGS);
    }

    pub fn set_redundancy_enabled(&mut self, enabled: bool) {
        self.redundancy_enabled = enabled;
    }

    pub fn red_payload_type(&self) -> u8 {
        self.red_payload_type
    }

    pub fn opus_payload_type(&self) -> u8 {
        self.opus_payload_type
    }

    pub fn num_redundant_encodings(&self) -> usize {
        self.num_redundant_encodings
    }

    pub fn redundancy_enabled(&self) -> bool {
        self.redundancy_enabled
    }

    pub fn history(&self) -> &EncodingHistory {
        &self.history
    }

    pub fn statistics(&self) -> LossStatistics {
        self.loss.statistics()
    }

    /// Clear receive-side counters and packet logs.
    pub fn reset_statistics(&mut self) {
        self.loss.reset();
    }

    /// Apply a configuration message. Returns false for messages that are not
    /// transform configuration.
    pub fn apply(&mut self, message: &ControlMessage) -> bool {
        match *message {
            ControlMessage::RedPayloadType(payload_type) => {
                info!("RED payload type set to {}", payload_type);
                self.set_red_payload_type(payload_type);
            }
            ControlMessage::OpusPayloadType(payload_type) => {
                info!("Opus payload type set to {}", payload_type);
                self.set_opus_payload_type(payload_type);
            }
            ControlMessage::UpdateNumRedundantEncodings(num) => {
                self.set_num_redundant_encodings(num);
                info!("Redundant encodings set to {}", self.num_redundant_encodings);
            }
            ControlMessage::Enable => {
                info!("Redundancy enabled");
                self.set_redundancy_enabled(true);
            }
            ControlMessage::Disable => {
                info!("Redundancy disabled");
                self.set_redundancy_enabled(false);
            }
            ControlMessage::SetupTransforms { .. } => return false,
        }
        true
    }

    /// Re-wrap an outgoing RED frame with redundancy from the history.
    pub fn sender_transform(&mut self, mut frame: EncodedFrame) -> EncodedFrame {
        if frame.metadata.payload_type != self.red_payload_type {
            return frame;
        }

        let primary = match split_encodings(
            self.opus_payload_type,
            frame.timestamp,
            &frame.payload,
            frame.metadata.sequence_number,
        ) {
            Ok(mut encodings) => match encodings.pop() {
                Some(primary) => primary,
                None => return frame,
            },
            Err(e) => {
                debug!("Forwarding unparsed outgoing frame ts={}: {}", frame.timestamp, e);
                return frame;
            }
        };

        match self.encode(frame.timestamp, primary.payload) {
            Ok(payload) => frame.payload = payload,
            Err(e) => debug!("Forwarding unencoded outgoing frame ts={}: {}", frame.timestamp, e),
        }
        frame
    }

    /// Account for an incoming RED frame. The frame itself is never altered.
    pub fn receiver_transform(&mut self, frame: EncodedFrame) -> EncodedFrame {
        if frame.metadata.payload_type != self.red_payload_type {
            return frame;
        }

        let encodings = match split_encodings(
            self.opus_payload_type,
            frame.timestamp,
            &frame.payload,
            frame.metadata.sequence_number,
        ) {
            Ok(encodings) => encodings,
            Err(e) => {
                debug!("Skipping accounting for incoming frame ts={}: {}", frame.timestamp, e);
                return frame;
            }
        };

        if let Some(statistics) = self.loss.process(&encodings) {
            let report = LossReport::new(frame.metadata.synchronization_source, statistics);
            self.sink.report(&report);
        }
        frame
    }

    /// Build a RED payload for `primary`, choosing redundant encodings from
    /// the history, and record the primary in the history.
    pub fn encode(&mut self, primary_timestamp: u32, primary: Bytes) -> Result<Bytes> {
        validate_primary(primary.len(), self.max_audio_payload_size)?;

        let step = self.packetization_time * self.packet_distance;
        let mut bytes_available =
            self.max_audio_payload_size - primary.len() - RED_LAST_HEADER_SIZE;
        let mut redundant: Vec<Encoding> = Vec::with_capacity(self.num_redundant_encodings);

        if self.redundancy_enabled {
            let mut redundant_timestamp = wrap32(primary_timestamp as i64 - step as i64);
            for _ in 0..self.num_redundant_encodings {
                if primary_timestamp.wrapping_sub(redundant_timestamp) >= MAX_RED_TIMESTAMP_OFFSET {
                    break;
                }

                // The previous packet may carry FEC for this slot; fall back to it.
                let entry = self.history.find(redundant_timestamp).or_else(|| {
                    self.history
                        .find(redundant_timestamp.wrapping_sub(self.packetization_time))
                });

                if let Some(entry) = entry {
                    let needed = RED_HEADER_SIZE + entry.payload.len();
                    if bytes_available < needed {
                        break;
                    }
                    bytes_available -= needed;
                    redundant.insert(0, entry.to_redundant());
                }
                redundant_timestamp = redundant_timestamp.wrapping_sub(step);
            }
        }

        let payload = build(
            self.opus_payload_type,
            self.max_audio_payload_size,
            primary_timestamp,
            &primary,
            &redundant,
        )?;
        trace!(
            "Encoded ts={} with {} redundant block(s), {} bytes",
            primary_timestamp,
            redundant.len(),
            payload.len()
        );

        self.history.update(primary_timestamp, primary);
        Ok(payload)
    }
}
