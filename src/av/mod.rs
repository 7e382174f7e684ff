//! Core audio/video types shared across the pipeline.
//!
//! This module defines the events that flow along the pipeline edges: PES
//! packets produced by the transport-stream demux layer, track summaries
//! announced when a program map is discovered, and the timing records emitted
//! alongside finished segments. Stages exchange [`bytes::Bytes`] payloads, so
//! retaining an event beyond the current `push` never aliases a buffer that
//! an upstream stage will reuse.

use bytes::Bytes;

/// Pipeline stage contract and lifecycle signals
pub mod stage;

pub use stage::Stage;

/// Ticks per second of the MPEG-2 system clock used for PTS/DTS values.
pub const ONE_SECOND_IN_TS: i64 = 90_000;

/// The three elementary stream kinds the demuxer routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// H.264 video
    Video,
    /// AAC audio
    Audio,
    /// ID3 timed metadata
    TimedMetadata,
}

/// Codec carried by an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementaryCodec {
    /// H.264 / AVC video
    Avc,
    /// AAC audio in ADTS framing
    Adts,
}

/// One track discovered in a program map table.
#[derive(Debug, Clone)]
pub struct TrackSummary {
    /// Elementary PID carrying the track
    pub id: u16,
    /// Video or audio
    pub kind: StreamKind,
    /// Codec assigned from the PMT stream type
    pub codec: ElementaryCodec,
}

/// A reassembled Packetized Elementary Stream packet.
///
/// Produced by the elementary assembler once a complete PES payload is
/// available; timestamps are the raw 33-bit values widened to 64 bits (the
/// rollover stage later unwraps them past the 2^33 boundary, so downstream
/// values may exceed 33 bits).
#[derive(Debug, Clone)]
pub struct PesPacket {
    /// Stream kind assigned from the program map
    pub kind: StreamKind,
    /// Elementary PID the packet was carried on
    pub track_id: u16,
    /// PMT stream type byte (0x1B video, 0x0F audio, 0x15 metadata)
    pub stream_type: u8,
    /// Presentation timestamp, 90 kHz
    pub pts: Option<i64>,
    /// Decode timestamp, 90 kHz; equals `pts` when the wire carried only PTS
    pub dts: Option<i64>,
    /// Data-alignment indicator from the PES header
    pub data_alignment: bool,
    /// Elementary stream payload
    pub payload: Bytes,
}

/// Start/end of an emitted segment on a track's clock.
///
/// Video timing is in 90 kHz ticks; audio timing is in ticks of the track's
/// sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    /// First decode time covered by the segment
    pub start: i64,
    /// End of the segment: start plus the sum of sample durations
    pub end: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pes_packet_defaults_dts_separately() {
        let packet = PesPacket {
            kind: StreamKind::Video,
            track_id: 0x100,
            stream_type: 0x1B,
            pts: Some(90_000),
            dts: None,
            data_alignment: false,
            payload: Bytes::from_static(&[0x00, 0x00, 0x01, 0x09]),
        };
        assert_eq!(packet.kind, StreamKind::Video);
        assert_eq!(packet.pts, Some(ONE_SECOND_IN_TS));
    }
}
