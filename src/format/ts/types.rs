use std::collections::BTreeMap;

use bytes::Bytes;

use crate::av::StreamKind;

// Constants
/// Size of a Transport Stream packet in bytes
pub const TS_PACKET_SIZE: usize = 188;
/// Size of a Transport Stream header in bytes
pub const TS_HEADER_SIZE: usize = 4;
/// Sync byte opening every TS packet
pub const SYNC_BYTE: u8 = 0x47;

// PIDs
/// PID for the Program Association Table (PAT)
pub const PID_PAT: u16 = 0x0000;

// Table IDs
/// Table ID for the Program Association Table (PAT)
pub const TABLE_ID_PAT: u8 = 0x00;
/// Table ID for the Program Map Table (PMT)
pub const TABLE_ID_PMT: u8 = 0x02;

// Elementary Stream Types
/// Stream type for H.264 video streams
pub const STREAM_TYPE_H264: u8 = 0x1b;
/// Stream type for ADTS-framed AAC audio streams
pub const STREAM_TYPE_ADTS: u8 = 0x0f;
/// Stream type for ID3 timed metadata streams
pub const STREAM_TYPE_METADATA: u8 = 0x15;

// Timestamps
/// Clock frequency for PTS/DTS values in Hz
pub const PTS_HZ: i64 = 90_000;
/// One past the largest encodable 33-bit timestamp
pub const MAX_TS: i64 = 1 << 33;
/// Distance beyond which a timestamp jump is treated as a 33-bit rollover
pub const RO_THRESH: i64 = 1 << 32;

/// The routing table discovered from PAT/PMT sections.
///
/// Built when the first complete PMT is seen and replaced wholesale whenever
/// another PMT section arrives. The first H.264 and first ADTS elementary
/// streams become the video and audio tracks; every timed-metadata stream is
/// kept with its declared stream type.
#[derive(Debug, Clone, Default)]
pub struct ProgramMap {
    /// Elementary PID of the video track, if any
    pub video_pid: Option<u16>,
    /// Elementary PID of the audio track, if any
    pub audio_pid: Option<u16>,
    /// Timed-metadata PIDs mapped to their PMT stream type
    pub metadata_pids: BTreeMap<u16, u8>,
}

impl ProgramMap {
    /// Looks up the stream kind and stream type routed for a PID.
    pub fn lookup(&self, pid: u16) -> Option<(StreamKind, u8)> {
        if self.video_pid == Some(pid) {
            return Some((StreamKind::Video, STREAM_TYPE_H264));
        }
        if self.audio_pid == Some(pid) {
            return Some((StreamKind::Audio, STREAM_TYPE_ADTS));
        }
        self.metadata_pids
            .get(&pid)
            .map(|&stream_type| (StreamKind::TimedMetadata, stream_type))
    }

    /// True once any elementary stream has been discovered.
    pub fn has_tracks(&self) -> bool {
        self.video_pid.is_some() || self.audio_pid.is_some() || !self.metadata_pids.is_empty()
    }
}

/// One TS packet payload routed to an elementary stream.
#[derive(Debug, Clone)]
pub struct ElementaryPayload {
    /// Stream kind assigned from the program map
    pub kind: StreamKind,
    /// Elementary PID
    pub pid: u16,
    /// PMT stream type byte
    pub stream_type: u8,
    /// Set when a new PES packet starts in this payload
    pub payload_unit_start: bool,
    /// TS payload bytes (after the adaptation field, if any)
    pub data: Bytes,
}

/// Output of the packet parser.
#[derive(Debug, Clone)]
pub enum ParsedPacket {
    /// A new program map was parsed from a PMT section
    ProgramMap(ProgramMap),
    /// A payload for a known elementary stream
    Elementary(ElementaryPayload),
}
