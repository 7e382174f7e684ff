//! Codec bitstream parsers.
//!
//! - `h264`: NAL unit extraction, SPS/SEI parsing
//! - `aac`: ADTS frame extraction
//! - `caption`: CEA-608 caption decoding from SEI user data

/// AAC/ADTS parsing
pub mod aac;

/// CEA-608 caption extraction
pub mod caption;

/// H.264/AVC parsing
pub mod h264;

pub use aac::{AdtsFrame, AdtsParser};
pub use caption::{CaptionExtractor, Cue};
pub use h264::{H264Parser, NalUnit, NalUnitKind, SpsInfo};
