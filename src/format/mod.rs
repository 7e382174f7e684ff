//! Container format support.
//!
//! - `ts`: MPEG-2 Transport Stream demultiplexing
//! - `aac`: raw ID3/ADTS stream framing
//! - `id3`: ID3v2 timed metadata tags
//! - `mp4`: fragmented MP4 segment assembly

/// Raw AAC (ID3 + ADTS) framing
pub mod aac;

/// ID3 tag parsing
pub mod id3;

/// Fragmented MP4 output
pub mod mp4;

/// MPEG-2 TS demultiplexing
pub mod ts;

pub use aac::{is_likely_aac_data, AacFramer};
pub use id3::{Id3Parser, Id3Tag};
pub use mp4::{AudioSegmentBuilder, SegmentData, SegmentEvent, VideoSegmentBuilder};
pub use ts::{ElementaryAssembler, PacketParser, PacketSplitter, TimestampRollover};
