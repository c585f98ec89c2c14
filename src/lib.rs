//! redaudio - RFC 2198 redundant audio for Opus
//!
//! This module exports the transform, its building blocks, and the worker
//! boundary for embedding and integration testing.

pub mod cli;
pub mod config;
pub mod error;
pub mod opus;
pub mod red;
pub mod stats;
pub mod transform;
pub mod worker;

pub use config::RedConfig;
pub use error::{OpusError, RedError};
pub use stats::{LossReport, StatsSink};
pub use transform::{EncodedFrame, FrameMetadata, RedundantAudioTransform};
pub use worker::{ControlMessage, RedWorker, TransformMode};
