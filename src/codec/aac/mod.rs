//! # AAC audio parsing
//!
//! ADTS frame extraction from audio PES packets: sync scanning, header
//! decoding, and per-frame timestamp derivation. The types module also
//! carries the sampling-frequency table and the silent frame payloads used
//! to pad audio segments that start after the video timeline.

/// ADTS sync scanning and frame extraction
pub mod parser;

/// AAC frame types, sampling frequencies, and silence payloads
pub mod types;

pub use parser::AdtsParser;
pub use types::{sampling_frequency, silent_frame, AdtsFrame, ADTS_SAMPLING_FREQUENCIES};
