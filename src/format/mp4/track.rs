use bytes::Bytes;

use crate::av::StreamKind;

/// Where a track's timeline began, used to rebase segment decode times.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimelineStartInfo {
    /// Configured decode-time offset for the first segment, in the track's
    /// input clock (90 kHz)
    pub base_media_decode_time: u64,
    /// PTS of the first sample ever seen on this track
    pub pts: Option<i64>,
    /// DTS of the first sample ever seen on this track
    pub dts: Option<i64>,
}

/// Mutable description of one output track.
///
/// The demux side fills in codec parameters (SPS/PPS, sample rate, channel
/// count) while the segment builders maintain the per-segment timing
/// bookkeeping; both run on the same thread, serialized by call order.
#[derive(Debug, Clone, Default)]
pub struct Track {
    /// Track ID used in the MP4 boxes (the elementary PID)
    pub id: u32,
    /// Video or audio
    pub kind: Option<StreamKind>,
    /// Timeline anchor for decode-time normalization
    pub timeline_start_info: TimelineStartInfo,
    /// Decode time of the segment being built, in the track's timescale
    pub base_media_decode_time: u64,
    /// Smallest PTS seen in the current segment
    pub min_segment_pts: Option<i64>,
    /// Largest PTS seen in the current segment
    pub max_segment_pts: Option<i64>,
    /// Smallest DTS seen in the current segment
    pub min_segment_dts: Option<i64>,
    /// Largest DTS seen in the current segment
    pub max_segment_dts: Option<i64>,

    // Video configuration
    /// Sequence parameter sets, raw bytes
    pub sps: Vec<Bytes>,
    /// Picture parameter sets, raw bytes
    pub pps: Vec<Bytes>,
    /// Coded width in pixels
    pub width: u32,
    /// Coded height in pixels
    pub height: u32,
    /// profile_idc from the active SPS
    pub profile_idc: u8,
    /// Constraint flags byte from the active SPS
    pub profile_compatibility: u8,
    /// level_idc from the active SPS
    pub level_idc: u8,

    // Audio configuration
    /// MPEG-4 audio object type
    pub audio_object_type: u8,
    /// Channel configuration
    pub channel_count: u8,
    /// Sample rate in Hz (also the audio track timescale)
    pub samplerate: u32,
    /// ADTS sampling_frequency_index
    pub sampling_frequency_index: u8,
    /// Bits per sample
    pub sample_size: u8,
}

impl Track {
    /// Creates a track for one stream kind.
    pub fn new(id: u32, kind: StreamKind) -> Self {
        Self {
            id,
            kind: Some(kind),
            sample_size: 16,
            ..Default::default()
        }
    }

    /// Folds one sample's timestamps into the segment and timeline state.
    pub fn collect_timing(&mut self, pts: i64, dts: i64) {
        if self.timeline_start_info.pts.is_none() {
            self.timeline_start_info.pts = Some(pts);
        }
        if self.timeline_start_info.dts.is_none() {
            self.timeline_start_info.dts = Some(dts);
        }
        self.min_segment_pts = Some(self.min_segment_pts.map_or(pts, |v| v.min(pts)));
        self.max_segment_pts = Some(self.max_segment_pts.map_or(pts, |v| v.max(pts)));
        self.min_segment_dts = Some(self.min_segment_dts.map_or(dts, |v| v.min(dts)));
        self.max_segment_dts = Some(self.max_segment_dts.map_or(dts, |v| v.max(dts)));
    }

    /// Clears the per-segment timing fields once a segment is emitted.
    pub fn clear_segment_timing(&mut self) {
        self.min_segment_pts = None;
        self.max_segment_pts = None;
        self.min_segment_dts = None;
        self.max_segment_dts = None;
    }

    /// Forgets the timeline anchor as well; used on reset.
    pub fn clear_timeline(&mut self) {
        self.clear_segment_timing();
        self.timeline_start_info.pts = None;
        self.timeline_start_info.dts = None;
        self.base_media_decode_time = 0;
    }

    /// The track's MP4 timescale: 90 kHz for video, the sample rate for
    /// audio.
    pub fn timescale(&self) -> u32 {
        match self.kind {
            Some(StreamKind::Audio) if self.samplerate > 0 => self.samplerate,
            _ => 90_000,
        }
    }

    /// Computes the decode time of the next segment in the track's
    /// timescale.
    ///
    /// In pass-through mode the earliest segment DTS is used unchanged;
    /// otherwise it is rebased against the timeline start and offset by the
    /// configured starting decode time. Audio values are rescaled from the
    /// 90 kHz input clock to the sample-rate timescale.
    pub fn calculate_base_media_decode_time(&self, keep_original_timestamps: bool) -> u64 {
        let mut min_segment_dts = self.min_segment_dts.unwrap_or(0);
        if !keep_original_timestamps {
            min_segment_dts -= self.timeline_start_info.dts.unwrap_or(0);
        }

        let base = self.timeline_start_info.base_media_decode_time as i64 + min_segment_dts;
        let base = base.max(0) as u64;

        if self.kind == Some(StreamKind::Audio) && self.samplerate > 0 {
            // Scale from the 90 kHz clock to the audio timescale.
            base * self.samplerate as u64 / 90_000
        } else {
            base
        }
    }
}

/// Converts a duration in audio timescale ticks to the 90 kHz clock.
pub fn audio_ts_to_video_ts(ts: u64, samplerate: u32) -> u64 {
    ts * 90_000 / samplerate as u64
}

/// Converts a duration in 90 kHz ticks to an audio timescale.
pub fn video_ts_to_audio_ts(ts: u64, samplerate: u32) -> u64 {
    ts * samplerate as u64 / 90_000
}
