//! # Fragmented MP4 assembly
//!
//! Segment builders that turn parsed media (NAL units, AAC frames) into
//! `moof`+`mdat` fragment pairs plus the matching initialization segments,
//! and the ISO BMFF box serializer underneath them.

use bytes::Bytes;

use crate::av::{StreamKind, TimingInfo};

/// AAC segment aggregation
pub mod audio;

/// ISO BMFF box serialization
pub mod boxes;

/// Shared track record and decode-time math
pub mod track;

/// H.264 segment aggregation
pub mod video;

pub use audio::AudioSegmentBuilder;
pub use boxes::{Mp4Sample, Mp4SampleFlags};
pub use track::{Track, TimelineStartInfo};
pub use video::VideoSegmentBuilder;

/// One emitted media segment.
#[derive(Debug, Clone)]
pub struct SegmentData {
    /// Video or audio
    pub kind: StreamKind,
    /// Track ID used inside the boxes
    pub track_id: u32,
    /// Fragment sequence number carried in the `mfhd`
    pub sequence_number: u32,
    /// Initialization segment, present for the first fragment of a stream
    /// and whenever the codec configuration changes
    pub init_segment: Option<Bytes>,
    /// The `moof` box immediately followed by its `mdat`
    pub boxes: Bytes,
}

/// Events emitted by the segment builders.
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    /// A finished `moof`+`mdat` pair
    Segment(SegmentData),
    /// Start/end of the emitted segment on the track's clock
    TimingInfo(TimingInfo),
}
