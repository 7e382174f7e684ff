//! # transmux - Streaming TS/AAC to fragmented MP4
//!
//! `transmux` converts MPEG-2 Transport Stream and raw AAC byte streams into
//! fragmented ISO BMFF (fMP4) segments suitable for Media Source Extensions
//! playback. It accepts opaque byte chunks of arbitrary size, incrementally
//! extracts the elementary streams (H.264 video, AAC audio, ID3 timed
//! metadata, CEA-608 captions), and emits `moof`+`mdat` fragment pairs
//! together with a compatible initialization segment.
//!
//! The library is a pure transformation: bytes in, events out. There is no
//! I/O, no threading, and no async runtime; a single [`Transmuxer`] instance
//! is driven synchronously by its caller.
//!
//! ## Quick Start
//!
//! ```rust
//! use transmux::{Transmuxer, TransmuxConfig, TransmuxOutput};
//!
//! let mut transmuxer = Transmuxer::new(TransmuxConfig::default());
//!
//! // Feed transport stream bytes in whatever chunk sizes arrive.
//! let events = transmuxer.push(&[0u8; 0]);
//! assert!(events.is_empty());
//!
//! // A flush drains everything buffered and ends with a `Done` marker.
//! let events = transmuxer.flush();
//! assert!(matches!(events.last(), Some(TransmuxOutput::Done)));
//! ```
//!
//! ## Module Overview
//!
//! - `av`: pipeline stage contract and the event types shared between stages
//! - `codec`: H.264 NAL/SPS/SEI parsing, ADTS AAC framing, CEA-608 captions
//! - `format`: TS demultiplexing, raw-AAC framing, ID3 tags, fMP4 assembly
//! - `utils`: exp-Golomb bit reader and MPEG-2 CRC32
//! - `error`: error types shared by the internal parsing seams

/// Core stage trait and shared audio/video event types
pub mod av;

/// Codec bitstream parsers (H.264, AAC, CEA-608)
pub mod codec;

/// Transmuxer configuration options
pub mod config;

/// Error types and utilities
pub mod error;

/// Container formats: TS demux, AAC framing, ID3, fragmented MP4 output
pub mod format;

/// Top-level transmuxer facade wiring the pipelines together
pub mod transmux;

/// Bit-level reader and CRC utilities
pub mod utils;

pub use config::TransmuxConfig;
pub use error::{Result, TransmuxError};
pub use transmux::{Transmuxer, TransmuxOutput};
