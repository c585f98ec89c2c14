use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

use crate::red::loss::LossTrackerConfig;
use crate::red::{
    LOSS_REPORT_INTERVAL, MAX_AUDIO_PAYLOAD_SIZE, MAX_ENCODING_HISTORY_SIZE, MAX_OUT_OF_ORDER_DISTANCE,
    MAX_RED_BLOCK_SIZE, MAX_RED_ENCODINGS, PACKETIZATION_TIME, PACKET_DISTANCE,
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedConfig {
    // Negotiated payload types (0 = not yet negotiated)
    pub red_payload_type: u8,
    pub opus_payload_type: u8,

    // Sender redundancy
    pub num_redundant_encodings: usize,
    pub redundancy_enabled: bool,
    pub max_audio_payload_size: usize,
    pub max_encoding_history_size: usize,

    /// RTP timestamp units between primary frames
    pub packetization_time: u32,
    pub packet_distance: u32,

    // Receiver accounting
    pub max_out_of_order_distance: usize,
    pub loss_report_interval: u32,
}

impl Default for RedConfig {
    fn default() -> Self {
        Self {
            red_payload_type: 0,
            opus_payload_type: 0,
            num_redundant_encodings: 0,
            redundancy_enabled: true,
            max_audio_payload_size: MAX_AUDIO_PAYLOAD_SIZE,
            max_encoding_history_size: MAX_ENCODING_HISTORY_SIZE,
            packetization_time: PACKETIZATION_TIME,
            packet_distance: PACKET_DISTANCE,
            max_out_of_order_distance: MAX_OUT_OF_ORDER_DISTANCE,
            loss_report_interval: LOSS_REPORT_INTERVAL,
        }
    }
}

impl RedConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(RedConfig {
            red_payload_type: get("RED_PAYLOAD_TYPE")
                .map(|s| s.trim().parse::<u8>())
                .transpose()
                .context("RED_PAYLOAD_TYPE must be a number between 0 and 127")?
                .unwrap_or(defaults.red_payload_type),
            opus_payload_type: get("OPUS_PAYLOAD_TYPE")
                .map(|s| s.trim().parse::<u8>())
                .transpose()
                .context("OPUS_PAYLOAD_TYPE must be a number between 0 and 127")?
                .unwrap_or(defaults.opus_payload_type),

            num_redundant_encodings: get("RED_NUM_REDUNDANT_ENCODINGS")
                .and_then(|s| s.trim().parse::<usize>().ok())
                .unwrap_or(defaults.num_redundant_encodings)
                .min(MAX_RED_ENCODINGS),
            redundancy_enabled: match get("RED_ENABLED") {
                Some(value) => parse_bool(&value).context("RED_ENABLED must be true or false")?,
                None => defaults.redundancy_enabled,
            },
            max_audio_payload_size: get("RED_MAX_AUDIO_PAYLOAD_SIZE")
                .map(|s| s.trim().parse::<usize>())
                .transpose()
                .context("RED_MAX_AUDIO_PAYLOAD_SIZE must be a byte count")?
                .unwrap_or(defaults.max_audio_payload_size),
            max_encoding_history_size: get("RED_MAX_HISTORY_SIZE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.max_encoding_history_size),

            packetization_time: defaults.packetization_time,
            packet_distance: defaults.packet_distance,

            max_out_of_order_distance: get("RED_MAX_OUT_OF_ORDER_DISTANCE")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.max_out_of_order_distance),
            loss_report_interval: defaults.loss_report_interval,
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// Apply negotiated payload types keyed by codec name ("opus", "red").
    ///
    /// Missing names reset the corresponding payload type to 0.
    pub fn with_payload_types(mut self, payload_types: &HashMap<String, u8>) -> Self {
        self.opus_payload_type = payload_types.get("opus").copied().unwrap_or(0);
        self.red_payload_type = payload_types.get("red").copied().unwrap_or(0);
        self
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // RTP payload types are 7 bits
        if self.red_payload_type > 127 {
            errors.push(format!(
                "RED_PAYLOAD_TYPE={} out of range (0-127).",
                self.red_payload_type
            ));
        }
        if self.opus_payload_type > 127 {
            errors.push(format!(
                "OPUS_PAYLOAD_TYPE={} out of range (0-127).",
                self.opus_payload_type
            ));
        }
        if self.red_payload_type != 0 && self.red_payload_type == self.opus_payload_type {
            errors.push("RED_PAYLOAD_TYPE and OPUS_PAYLOAD_TYPE must differ.".to_string());
        }

        if self.max_audio_payload_size == 0 || self.max_audio_payload_size > MAX_RED_BLOCK_SIZE {
            errors.push(format!(
                "RED_MAX_AUDIO_PAYLOAD_SIZE={} out of range (1-{}).",
                self.max_audio_payload_size, MAX_RED_BLOCK_SIZE
            ));
        }

        if self.max_out_of_order_distance == 0 {
            errors.push("RED_MAX_OUT_OF_ORDER_DISTANCE must be greater than 0.".to_string());
        }

        if self.max_encoding_history_size == 0 {
            errors.push("RED_MAX_HISTORY_SIZE must be greater than 0.".to_string());
        }

        if self.packetization_time == 0 {
            errors.push("Packetization time must be greater than 0.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }

    /// Oldest recoverable packet, in packetization intervals
    pub fn max_recovery_distance(&self) -> u32 {
        self.packet_distance * MAX_RED_ENCODINGS as u32 + 1
    }

    /// Age at which history entries can no longer be sent as redundancy
    pub fn max_history_age(&self) -> u32 {
        self.packetization_time * self.max_recovery_distance()
    }

    pub fn packet_log_size(&self) -> usize {
        self.max_out_of_order_distance + self.max_recovery_distance() as usize
    }

    pub fn loss_tracker_config(&self) -> LossTrackerConfig {
        LossTrackerConfig {
            packetization_time: self.packetization_time,
            max_out_of_order_distance: self.max_out_of_order_distance,
            packet_log_size: self.packet_log_size(),
            report_interval: self.loss_report_interval,
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean '{}'", other),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn valid_env_strategy() -> impl Strategy<Value = HashMap<&'static str, String>> {
        (
            0u8..=127u8,      // red payload type
            0u8..=127u8,      // opus payload type
            0usize..=10usize, // redundant encodings
            any::<bool>(),    // enabled
            1usize..=1024,    // max payload size
            1usize..=64,      // history size
            1usize..=64,      // out-of-order window
        )
            .prop_filter("payload types must differ", |(red, opus, ..)| {
                *red == 0 || red != opus
            })
            .prop_map(|(red, opus, num, enabled, size, history, window)| {
                let mut m = HashMap::new();
                m.insert("RED_PAYLOAD_TYPE", red.to_string());
                m.insert("OPUS_PAYLOAD_TYPE", opus.to_string());
                m.insert("RED_NUM_REDUNDANT_ENCODINGS", num.to_string());
                m.insert("RED_ENABLED", enabled.to_string());
                m.insert("RED_MAX_AUDIO_PAYLOAD_SIZE", size.to_string());
                m.insert("RED_MAX_HISTORY_SIZE", history.to_string());
                m.insert("RED_MAX_OUT_OF_ORDER_DISTANCE", window.to_string());
                m
            })
    }

    proptest! {
        #[test]
        fn valid_configs_parse_and_validate(env in valid_env_strategy()) {
            let config = RedConfig::from_getter(|key| env.get(key).cloned());
            prop_assert!(config.is_ok(), "valid config should parse: {:?}", config.err());
            let config = config.unwrap();
            prop_assert!(config.validate().is_ok());
            prop_assert!(config.num_redundant_encodings <= MAX_RED_ENCODINGS);
        }

        #[test]
        fn payload_type_parsing_never_panics(value in ".*") {
            let mut env: HashMap<&str, String> = HashMap::new();
            env.insert("RED_PAYLOAD_TYPE", value);
            let _ = RedConfig::from_getter(|key| env.get(key).cloned());
        }
    }
}

/// Kani formal verification proofs
#[cfg(kani)]
mod kani_proofs {
    use super::*;

    #[kani::proof]
    fn payload_type_parsing_never_panics() {
        let bytes: [u8; 4] = kani::any();
        if let Ok(s) = std::str::from_utf8(&bytes) {
            let _ = s.parse::<u8>();
        }
    }

    #[kani::proof]
    fn packet_log_covers_recovery_window() {
        let window: u8 = kani::any();
        let config = RedConfig {
            max_out_of_order_distance: window as usize,
            ..RedConfig::default()
        };
        kani::assert(
            config.packet_log_size() > config.max_out_of_order_distance,
            "log must outlast the out-of-order window",
        );
    }
}
