//! # H.264/AVC bitstream parsing
//!
//! Extracts NAL units from video PES packets and parses the structures the
//! segment builders need:
//!
//! - Annex B start-code scanning with cross-push carryover
//! - Emulation-prevention byte handling (original bytes for output, RBSP
//!   for parsing)
//! - Sequence parameter set decoding via exp-Golomb (profile, level,
//!   cropped resolution)
//! - SEI payload exposure for caption extraction
//!
//! ## Example: Parsing an H.264 Stream
//!
//! ```rust
//! use bytes::Bytes;
//! use transmux::av::{PesPacket, Stage, StreamKind};
//! use transmux::codec::h264::{H264Parser, NalUnitKind};
//!
//! let mut parser = H264Parser::new();
//! let mut nals = Vec::new();
//! parser.push(
//!     PesPacket {
//!         kind: StreamKind::Video,
//!         track_id: 0x100,
//!         stream_type: 0x1B,
//!         pts: Some(0),
//!         dts: Some(0),
//!         data_alignment: false,
//!         payload: Bytes::from_static(&[0x00, 0x00, 0x01, 0x09, 0xF0]),
//!     },
//!     &mut nals,
//! );
//! parser.flush(&mut nals);
//! assert_eq!(nals[0].kind, NalUnitKind::AccessUnitDelimiter);
//! ```

/// NAL unit extraction and SPS/SEI interpretation
pub mod parser;

/// NAL unit and parameter set types
pub mod types;


pub use parser::{discard_emulation_prevention_bytes, parse_sequence_parameter_set, H264Parser};
pub use types::{NalUnit, NalUnitKind, SpsInfo};
