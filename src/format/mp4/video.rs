use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, trace};

use super::boxes::{self, Mp4Sample, Mp4SampleFlags};
use super::track::Track;
use super::{SegmentData, SegmentEvent};
use crate::av::{Stage, StreamKind, TimingInfo};
use crate::codec::h264::{NalUnit, NalUnitKind};

/// NAL units grouped between access unit delimiters.
#[derive(Debug)]
struct Frame {
    pts: i64,
    dts: i64,
    duration: i64,
    key_frame: bool,
    byte_length: usize,
    nals: Vec<NalUnit>,
}

/// A run of frames opened by a keyframe.
#[derive(Debug)]
struct Gop {
    key_frame: bool,
    frames: Vec<Frame>,
}

/// Builds fragmented MP4 video segments from tagged NAL units.
///
/// Units buffer until a flush. A full flush emits one `moof`+`mdat` pair
/// covering every complete frame; a partial flush emits one pair per frame
/// while the trailing, possibly unfinished frame stays cached. The first
/// frame of a full segment is always a keyframe: leading non-IDR frames
/// are dropped, and if no keyframe has arrived yet everything stays
/// buffered until one does.
#[derive(Debug)]
pub struct VideoSegmentBuilder {
    track: Track,
    keep_original_timestamps: bool,
    nal_units: Vec<NalUnit>,
    frame_cache: Vec<NalUnit>,
    ensure_next_frame_is_key_frame: bool,
    sequence_number: u32,
    last_init_config: Option<(Vec<Bytes>, Vec<Bytes>)>,
}

impl VideoSegmentBuilder {
    /// Creates a builder for one video track.
    pub fn new(track_id: u32, keep_original_timestamps: bool) -> Self {
        Self {
            track: Track::new(track_id, StreamKind::Video),
            keep_original_timestamps,
            nal_units: Vec::new(),
            frame_cache: Vec::new(),
            ensure_next_frame_is_key_frame: true,
            sequence_number: 0,
            last_init_config: None,
        }
    }

    /// Sets the decode-time offset applied to the start of the timeline.
    pub fn set_timeline_start_decode_time(&mut self, ticks: u64) {
        self.track.timeline_start_info.base_media_decode_time = ticks;
    }

    /// DTS of the first frame this track ever emitted, if any.
    pub fn timeline_start_dts(&self) -> Option<i64> {
        self.track.timeline_start_info.dts
    }

    /// Decode time (90 kHz) of the most recently emitted segment.
    pub fn base_media_decode_time(&self) -> u64 {
        self.track.base_media_decode_time
    }

    /// True once a PMT/SPS has provided enough configuration to emit.
    pub fn has_config(&self) -> bool {
        !self.track.sps.is_empty() && !self.track.pps.is_empty()
    }

    fn apply_config(&mut self, nal: &NalUnit) {
        match nal.kind {
            NalUnitKind::SeqParameterSet => {
                if let Some(sps) = nal.sps {
                    self.track.width = sps.width;
                    self.track.height = sps.height;
                    self.track.profile_idc = sps.profile_idc;
                    self.track.profile_compatibility = sps.profile_compatibility;
                    self.track.level_idc = sps.level_idc;
                }
                self.track.sps = vec![nal.data.clone()];
            }
            NalUnitKind::PicParameterSet => {
                self.track.pps = vec![nal.data.clone()];
            }
            _ => {}
        }
    }

    /// Groups a NAL sequence into frames delimited by AUDs. Units before
    /// the first AUD are dropped.
    fn group_nals_into_frames(nals: Vec<NalUnit>) -> Vec<Frame> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut current: Option<Frame> = None;

        for nal in nals {
            if nal.kind == NalUnitKind::AccessUnitDelimiter {
                if let Some(frame) = current.take() {
                    frames.push(frame);
                }
                current = Some(Frame {
                    pts: nal.pts,
                    dts: nal.dts,
                    duration: 0,
                    key_frame: false,
                    byte_length: 4 + nal.data.len(),
                    nals: vec![nal],
                });
            } else if let Some(frame) = current.as_mut() {
                // The frame's timing comes from its first coded unit.
                if frame.nals.len() == 1 {
                    frame.pts = nal.pts;
                    frame.dts = nal.dts;
                }
                if nal.kind == NalUnitKind::SliceLayerWithoutPartitioningIdr {
                    frame.key_frame = true;
                }
                frame.byte_length += 4 + nal.data.len();
                frame.nals.push(nal);
            } else {
                trace!("dropping NAL unit before first access unit delimiter");
            }
        }

        if let Some(frame) = current.take() {
            frames.push(frame);
        }
        frames
    }

    /// Fills in per-frame durations from successor decode times.
    fn assign_durations(frames: &mut [Frame]) {
        for i in 0..frames.len().saturating_sub(1) {
            frames[i].duration = (frames[i + 1].dts - frames[i].dts).max(0);
        }
        if frames.len() >= 2 {
            let inherited = frames[frames.len() - 2].duration;
            if let Some(last) = frames.last_mut() {
                last.duration = inherited;
            }
        }
    }

    fn sample_for(frame: &Frame) -> Mp4Sample {
        Mp4Sample {
            duration: frame.duration as u32,
            size: frame.byte_length as u32,
            flags: Some(Mp4SampleFlags {
                depends_on: if frame.key_frame { 2 } else { 1 },
                is_non_sync_sample: u8::from(!frame.key_frame),
                ..Default::default()
            }),
            composition_time_offset: (frame.pts - frame.dts) as i32,
        }
    }

    /// Serializes a frame's NAL units with AVCC 4-byte length prefixes.
    fn frame_payload(buf: &mut BytesMut, frame: &Frame) {
        for nal in &frame.nals {
            buf.put_u32(nal.data.len() as u32);
            buf.put_slice(&nal.data);
        }
    }

    fn init_segment_if_changed(&mut self) -> Option<Bytes> {
        let config = (self.track.sps.clone(), self.track.pps.clone());
        if self.last_init_config.as_ref() == Some(&config) {
            return None;
        }
        self.last_init_config = Some(config);
        Some(boxes::init_segment(&[&self.track]))
    }

    fn emit_segment(&mut self, frames: &[Frame], out: &mut Vec<SegmentEvent>) {
        for frame in frames {
            self.track.collect_timing(frame.pts, frame.dts);
        }
        self.track.base_media_decode_time = self
            .track
            .calculate_base_media_decode_time(self.keep_original_timestamps);

        let samples: Vec<Mp4Sample> = frames.iter().map(Self::sample_for).collect();
        let mut payload = BytesMut::new();
        for frame in frames {
            Self::frame_payload(&mut payload, frame);
        }

        let moof = boxes::moof(self.sequence_number, &self.track, &samples);
        let mdat = boxes::mdat(&payload);
        let mut segment = BytesMut::with_capacity(moof.len() + mdat.len());
        segment.put_slice(&moof);
        segment.put_slice(&mdat);

        out.push(SegmentEvent::Segment(SegmentData {
            kind: StreamKind::Video,
            track_id: self.track.id,
            sequence_number: self.sequence_number,
            init_segment: self.init_segment_if_changed(),
            boxes: segment.freeze(),
        }));
        self.sequence_number += 1;

        let start = self.track.base_media_decode_time as i64;
        let total_duration: i64 = frames.iter().map(|f| f.duration).sum();
        out.push(SegmentEvent::TimingInfo(TimingInfo {
            start,
            end: start + total_duration,
        }));

        self.track.clear_segment_timing();
    }

    /// Groups frames into GOPs: every keyframe opens a new group, and any
    /// frames before the first keyframe form a headless group.
    fn group_frames_into_gops(frames: Vec<Frame>) -> Vec<Gop> {
        let mut gops: Vec<Gop> = Vec::new();
        for frame in frames {
            if frame.key_frame || gops.is_empty() {
                gops.push(Gop {
                    key_frame: frame.key_frame,
                    frames: vec![frame],
                });
            } else if let Some(gop) = gops.last_mut() {
                gop.frames.push(frame);
            }
        }
        gops
    }

    /// Drops frames that precede the first keyframe by discarding the
    /// headless GOP; a run with no keyframe at all is left untouched for
    /// the caller to hold.
    fn align_to_key_frame(frames: &mut Vec<Frame>) -> bool {
        let mut gops = Self::group_frames_into_gops(std::mem::take(frames));
        if !gops.iter().any(|g| g.key_frame) {
            *frames = gops.into_iter().flat_map(|g| g.frames).collect();
            return false;
        }
        if let Some(first) = gops.first() {
            if !first.key_frame {
                debug!(
                    "dropping {} leading frames before keyframe",
                    first.frames.len()
                );
                gops.remove(0);
            }
        }
        *frames = gops.into_iter().flat_map(|g| g.frames).collect();
        true
    }
}

impl Stage for VideoSegmentBuilder {
    type Input = NalUnit;
    type Output = SegmentEvent;

    fn push(&mut self, input: NalUnit, _out: &mut Vec<SegmentEvent>) {
        self.apply_config(&input);
        self.nal_units.push(input);
    }

    fn flush(&mut self, out: &mut Vec<SegmentEvent>) {
        let mut nals = std::mem::take(&mut self.frame_cache);
        nals.append(&mut self.nal_units);
        if nals.is_empty() || !self.has_config() {
            self.frame_cache = nals;
            return;
        }

        let mut frames = Self::group_nals_into_frames(nals);
        if frames.is_empty() {
            return;
        }

        if !Self::align_to_key_frame(&mut frames) {
            // Hold everything until an IDR arrives.
            debug!("no keyframe buffered yet, holding {} frames", frames.len());
            self.frame_cache = frames.into_iter().flat_map(|f| f.nals).collect();
            return;
        }

        Self::assign_durations(&mut frames);
        self.emit_segment(&frames, out);
        self.ensure_next_frame_is_key_frame = false;
    }

    fn partial_flush(&mut self, out: &mut Vec<SegmentEvent>) {
        let mut nals = std::mem::take(&mut self.frame_cache);
        nals.append(&mut self.nal_units);
        if nals.is_empty() || !self.has_config() {
            self.frame_cache = nals;
            return;
        }

        let mut frames = Self::group_nals_into_frames(nals);
        if frames.len() < 2 {
            // A lone frame may still be missing NAL units; keep it cached.
            self.frame_cache = frames.into_iter().flat_map(|f| f.nals).collect();
            return;
        }

        Self::assign_durations(&mut frames);

        // The trailing frame may be split mid-way; it stays cached.
        let trailing = frames.pop().expect("at least two frames");
        self.frame_cache = trailing.nals;

        if self.ensure_next_frame_is_key_frame {
            if !Self::align_to_key_frame(&mut frames) {
                return;
            }
            self.ensure_next_frame_is_key_frame = false;
        }

        for frame in frames {
            self.emit_segment(std::slice::from_ref(&frame), out);
        }
    }

    fn end_timeline(&mut self, out: &mut Vec<SegmentEvent>) {
        self.flush(out);
    }

    fn reset(&mut self) {
        self.nal_units.clear();
        self.frame_cache.clear();
        self.ensure_next_frame_is_key_frame = true;
        self.track.clear_timeline();
        // The fragment sequence keeps counting across resets so appended
        // segments stay distinguishable.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::mp4::boxes::test_utils::{find_box, walk_boxes};
    use pretty_assertions::assert_eq;

    fn nal(kind: NalUnitKind, pts: i64, dts: i64, data: &[u8]) -> NalUnit {
        NalUnit {
            kind,
            track_id: 0x100,
            pts,
            dts,
            data: Bytes::copy_from_slice(data),
            rbsp: None,
            sps: None,
        }
    }

    fn sps_nal(pts: i64, dts: i64) -> NalUnit {
        let mut unit = nal(NalUnitKind::SeqParameterSet, pts, dts, &[0x67, 0x64, 0x00, 0x1F]);
        unit.sps = Some(crate::codec::h264::SpsInfo {
            profile_idc: 100,
            profile_compatibility: 0,
            level_idc: 31,
            width: 1280,
            height: 720,
        });
        unit
    }

    fn push_idr_frame(builder: &mut VideoSegmentBuilder, pts: i64, dts: i64) {
        let mut out = Vec::new();
        builder.push(nal(NalUnitKind::AccessUnitDelimiter, pts, dts, &[0x09, 0xF0]), &mut out);
        builder.push(sps_nal(pts, dts), &mut out);
        builder.push(nal(NalUnitKind::PicParameterSet, pts, dts, &[0x68, 0xEB]), &mut out);
        builder.push(
            nal(NalUnitKind::SliceLayerWithoutPartitioningIdr, pts, dts, &[0x65, 0x88, 0x84]),
            &mut out,
        );
        assert!(out.is_empty());
    }

    fn push_delta_frame(builder: &mut VideoSegmentBuilder, pts: i64, dts: i64) {
        let mut out = Vec::new();
        builder.push(nal(NalUnitKind::AccessUnitDelimiter, pts, dts, &[0x09, 0x30]), &mut out);
        builder.push(
            nal(NalUnitKind::SliceLayerWithoutPartitioning, pts, dts, &[0x41, 0x9A]),
            &mut out,
        );
    }

    fn segments(events: &[SegmentEvent]) -> Vec<&SegmentData> {
        events
            .iter()
            .filter_map(|e| match e {
                SegmentEvent::Segment(data) => Some(data),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_single_idr_segment() {
        let mut builder = VideoSegmentBuilder::new(0x100, false);
        let mut out = Vec::new();

        push_idr_frame(&mut builder, 3_000, 3_000);
        builder.flush(&mut out);

        let segs = segments(&out);
        assert_eq!(segs.len(), 1);
        let segment = segs[0];
        assert_eq!(segment.sequence_number, 0);
        assert!(segment.init_segment.is_some());

        // moof immediately followed by mdat
        let boxes = walk_boxes(&segment.boxes);
        assert_eq!(&boxes[0].0, b"moof");
        assert_eq!(&boxes[1].0, b"mdat");

        // Default config rebases the first segment to decode time zero.
        let tfdt = find_box(&segment.boxes, &[b"moof", b"traf", b"tfdt"]).unwrap();
        assert_eq!(&tfdt[4..12], &0u64.to_be_bytes());

        // First sample must be a sync sample.
        let trun = find_box(&segment.boxes, &[b"moof", b"traf", b"trun"]).unwrap();
        assert_eq!(trun[21] & 0x01, 0);
    }

    #[test]
    fn test_mdat_matches_trun_sizes() {
        let mut builder = VideoSegmentBuilder::new(0x100, false);
        let mut out = Vec::new();

        push_idr_frame(&mut builder, 0, 0);
        push_delta_frame(&mut builder, 3_000, 3_000);
        builder.flush(&mut out);

        let segment = segments(&out)[0];
        let trun = find_box(&segment.boxes, &[b"moof", b"traf", b"trun"]).unwrap();
        let sample_count = u32::from_be_bytes([trun[4], trun[5], trun[6], trun[7]]);
        assert_eq!(sample_count, 2);

        let mut trun_total = 0u32;
        for i in 0..sample_count as usize {
            let base = 12 + i * 16 + 4;
            trun_total +=
                u32::from_be_bytes([trun[base], trun[base + 1], trun[base + 2], trun[base + 3]]);
        }

        let boxes = walk_boxes(&segment.boxes);
        let (_, mdat_payload, mdat_size) = boxes[1];
        assert_eq!(trun_total as usize, mdat_size - 8);

        // AVCC length prefix of the first NAL (the 2-byte AUD)
        let mdat = &segment.boxes[mdat_payload..];
        assert_eq!(&mdat[..4], &2u32.to_be_bytes());
    }

    #[test]
    fn test_waits_for_keyframe() {
        let mut builder = VideoSegmentBuilder::new(0x100, false);
        let mut out = Vec::new();

        // Configuration is known but only delta frames have arrived.
        push_idr_frame(&mut builder, 0, 0);
        builder.nal_units.clear(); // keep config, drop the frame
        push_delta_frame(&mut builder, 3_000, 3_000);
        builder.flush(&mut out);
        assert!(segments(&out).is_empty());

        // A keyframe unblocks emission and the held frame is dropped.
        push_idr_frame(&mut builder, 6_000, 6_000);
        builder.flush(&mut out);
        let segs = segments(&out);
        assert_eq!(segs.len(), 1);
        let trun = find_box(&segs[0].boxes, &[b"moof", b"traf", b"trun"]).unwrap();
        let sample_count = u32::from_be_bytes([trun[4], trun[5], trun[6], trun[7]]);
        assert_eq!(sample_count, 1);
    }

    #[test]
    fn test_durations_from_successor_dts() {
        let mut builder = VideoSegmentBuilder::new(0x100, false);
        let mut out = Vec::new();

        push_idr_frame(&mut builder, 0, 0);
        push_delta_frame(&mut builder, 3_000, 3_000);
        push_delta_frame(&mut builder, 7_000, 7_000);
        builder.flush(&mut out);

        let segment = segments(&out)[0];
        let trun = find_box(&segment.boxes, &[b"moof", b"traf", b"trun"]).unwrap();
        let duration = |i: usize| {
            let base = 12 + i * 16;
            u32::from_be_bytes([trun[base], trun[base + 1], trun[base + 2], trun[base + 3]])
        };
        assert_eq!(duration(0), 3_000);
        assert_eq!(duration(1), 4_000);
        assert_eq!(duration(2), 4_000); // last frame inherits
    }

    #[test]
    fn test_partial_flush_caches_trailing_frame() {
        let mut builder = VideoSegmentBuilder::new(0x100, false);
        let mut out = Vec::new();

        push_idr_frame(&mut builder, 0, 0);
        push_delta_frame(&mut builder, 3_000, 3_000);
        builder.partial_flush(&mut out);

        // One fragment for the IDR frame; the delta frame stays cached.
        let segs = segments(&out);
        assert_eq!(segs.len(), 1);

        // Once its successor shows up, the cached frame is emitted too.
        push_delta_frame(&mut builder, 6_000, 6_000);
        builder.partial_flush(&mut out);
        let segs = segments(&out);
        assert_eq!(segs.len(), 2);
    }

    #[test]
    fn test_sequence_number_increments() {
        let mut builder = VideoSegmentBuilder::new(0x100, false);
        let mut out = Vec::new();

        push_idr_frame(&mut builder, 0, 0);
        builder.flush(&mut out);
        push_idr_frame(&mut builder, 9_000, 9_000);
        builder.flush(&mut out);

        let segs = segments(&out);
        assert_eq!(segs[0].sequence_number, 0);
        assert_eq!(segs[1].sequence_number, 1);
        // The init segment is only sent while the configuration changes.
        assert!(segs[0].init_segment.is_some());
        assert!(segs[1].init_segment.is_none());
    }

    #[test]
    fn test_second_segment_base_decode_time() {
        let mut builder = VideoSegmentBuilder::new(0x100, false);
        let mut out = Vec::new();

        push_idr_frame(&mut builder, 10_000, 10_000);
        builder.flush(&mut out);
        assert_eq!(builder.base_media_decode_time(), 0);

        push_idr_frame(&mut builder, 100_000, 100_000);
        builder.flush(&mut out);
        assert_eq!(builder.base_media_decode_time(), 90_000);
    }

    #[test]
    fn test_reset_keeps_sequence_number() {
        let mut builder = VideoSegmentBuilder::new(0x100, false);
        let mut out = Vec::new();

        push_idr_frame(&mut builder, 0, 0);
        builder.flush(&mut out);
        builder.reset();
        builder.reset();

        push_idr_frame(&mut builder, 0, 0);
        builder.flush(&mut out);
        let segs = segments(&out);
        assert_eq!(segs[1].sequence_number, 1);
    }
}
