//! # MPEG Transport Stream demultiplexing
//!
//! This module turns opaque byte chunks into timestamped PES packets:
//!
//! - **Packet splitting**: 188-byte framing with byte-level resync
//! - **Packet parsing**: PAT/PMT discovery and per-PID payload routing
//! - **Elementary assembly**: PES reassembly across TS packet boundaries
//! - **Rollover correction**: 33-bit PTS/DTS unwrapping per track
//!
//! ## Example Usage
//!
//! ```rust
//! use bytes::Bytes;
//! use transmux::av::Stage;
//! use transmux::format::ts::{PacketSplitter, TS_PACKET_SIZE};
//!
//! let mut splitter = PacketSplitter::new();
//! let mut packets = Vec::new();
//!
//! // Chunks may split packets anywhere; the splitter re-frames them.
//! let mut chunk = vec![0x47u8; TS_PACKET_SIZE];
//! chunk.extend_from_slice(&[0x47]);
//! splitter.push(Bytes::from(chunk), &mut packets);
//! assert_eq!(packets.len(), 1);
//! ```

/// Reassembly of PES packets from routed TS payloads
pub mod elementary;

/// TS packet header, PAT and PMT parsing
pub mod parser;

/// 33-bit timestamp rollover correction
pub mod rollover;

/// 188-byte packet framing
pub mod splitter;

/// Core TS types and constants
pub mod types;

pub use elementary::{ElementaryAssembler, ElementaryEvent};
pub use parser::PacketParser;
pub use rollover::{handle_rollover, TimestampRollover};
pub use splitter::PacketSplitter;
pub use types::{
    ElementaryPayload, ParsedPacket, ProgramMap, MAX_TS, PID_PAT, PTS_HZ, RO_THRESH,
    STREAM_TYPE_ADTS, STREAM_TYPE_H264, STREAM_TYPE_METADATA, SYNC_BYTE, TS_PACKET_SIZE,
};
