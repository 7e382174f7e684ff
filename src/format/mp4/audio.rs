use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, trace};

use super::boxes::{self, Mp4Sample};
use super::track::{audio_ts_to_video_ts, video_ts_to_audio_ts, Track};
use super::{SegmentData, SegmentEvent};
use crate::av::{Stage, StreamKind, TimingInfo};
use crate::codec::aac::{silent_frame, AdtsFrame};

/// Builds fragmented MP4 audio segments from extracted AAC frames.
///
/// Frames buffer until a flush. Frames that predate the allowed start of
/// the timeline are trimmed, and when the video timeline leads the first
/// audio frame by more than one frame duration, silent frames are
/// prepended so both tracks start together.
#[derive(Debug)]
pub struct AudioSegmentBuilder {
    track: Track,
    keep_original_timestamps: bool,
    frames: Vec<AdtsFrame>,
    earliest_allowed_dts: i64,
    audio_append_start: Option<i64>,
    video_base_media_decode_time: Option<i64>,
    sequence_number: u32,
    last_init_config: Option<(u8, u8, u32)>,
}

impl AudioSegmentBuilder {
    /// Creates a builder for one audio track.
    pub fn new(track_id: u32, keep_original_timestamps: bool) -> Self {
        Self {
            track: Track::new(track_id, StreamKind::Audio),
            keep_original_timestamps,
            frames: Vec::new(),
            earliest_allowed_dts: 0,
            audio_append_start: None,
            video_base_media_decode_time: None,
            sequence_number: 0,
            last_init_config: None,
        }
    }

    /// Sets the decode-time offset applied to the start of the timeline.
    pub fn set_timeline_start_decode_time(&mut self, ticks: u64) {
        self.track.timeline_start_info.base_media_decode_time = ticks;
    }

    /// Frames with a DTS below this value are dropped at flush time.
    pub fn set_earliest_allowed_dts(&mut self, dts: i64) {
        self.earliest_allowed_dts = dts;
    }

    /// 90 kHz time where appended audio should resume (end of the previous
    /// audio segment).
    pub fn set_audio_append_start(&mut self, ticks: i64) {
        self.audio_append_start = Some(ticks);
    }

    /// Decode time of the video segment being built alongside, 90 kHz.
    pub fn set_video_base_media_decode_time(&mut self, ticks: i64) {
        self.video_base_media_decode_time = Some(ticks);
    }

    fn apply_config(&mut self, frame: &AdtsFrame) {
        self.track.audio_object_type = frame.audio_object_type;
        self.track.channel_count = frame.channel_count;
        self.track.samplerate = frame.samplerate;
        self.track.sampling_frequency_index = frame.sampling_frequency_index;
        self.track.sample_size = frame.sample_size;
    }

    fn trim_frames_by_earliest_dts(&mut self, frames: Vec<AdtsFrame>) -> Vec<AdtsFrame> {
        // When the whole buffer already starts late enough, keep it as is.
        if frames
            .first()
            .map_or(true, |f| f.dts >= self.earliest_allowed_dts)
        {
            return frames;
        }
        let before = frames.len();
        let frames: Vec<AdtsFrame> = frames
            .into_iter()
            .filter(|f| f.dts >= self.earliest_allowed_dts)
            .collect();
        debug!(
            "trimmed {} audio frames before dts {}",
            before - frames.len(),
            self.earliest_allowed_dts
        );
        frames
    }

    /// Prepends silent frames while the shared timeline starts earlier
    /// than the first buffered audio frame.
    fn prefix_with_silence(&mut self, frames: &mut Vec<AdtsFrame>) {
        let reference = match (self.audio_append_start, self.video_base_media_decode_time) {
            (Some(append), Some(video)) => append.max(video),
            (Some(append), None) => append,
            (None, Some(video)) => video,
            (None, None) => return,
        };
        let first = match frames.first() {
            Some(first) => first.clone(),
            None => return,
        };

        let base_media_decode_time_ts =
            audio_ts_to_video_ts(self.track.base_media_decode_time, self.track.samplerate) as i64;
        let frame_duration = div_ceil(90_000 * 1024, self.track.samplerate as i64);
        let gap = base_media_decode_time_ts - reference;
        let fill_count = if gap > 0 { gap / frame_duration } else { 0 };
        if fill_count < 1 {
            return;
        }

        let silence = match silent_frame(self.track.sampling_frequency_index) {
            Some(payload) => Bytes::from_static(payload),
            None => {
                debug!(
                    "no silent frame for sampling frequency index {}",
                    self.track.sampling_frequency_index
                );
                return;
            }
        };

        trace!("prepending {} silent audio frames", fill_count);
        for i in 1..=fill_count {
            frames.insert(
                0,
                AdtsFrame {
                    pts: first.pts - i * frame_duration,
                    dts: first.dts - i * frame_duration,
                    data: silence.clone(),
                    ..first.clone()
                },
            );
        }
        let fill_duration = (fill_count * frame_duration) as u64;
        self.track.base_media_decode_time = self
            .track
            .base_media_decode_time
            .saturating_sub(video_ts_to_audio_ts(fill_duration, self.track.samplerate));
    }

    fn init_segment_if_changed(&mut self) -> Option<Bytes> {
        let config = (
            self.track.audio_object_type,
            self.track.channel_count,
            self.track.samplerate,
        );
        if self.last_init_config == Some(config) {
            return None;
        }
        self.last_init_config = Some(config);
        Some(boxes::init_segment(&[&self.track]))
    }

    fn emit_segment(&mut self, frames: &[AdtsFrame], out: &mut Vec<SegmentEvent>) {
        // Sample durations are in the audio timescale, where one frame is
        // exactly its sample count.
        let samples: Vec<Mp4Sample> = frames
            .iter()
            .map(|frame| Mp4Sample {
                duration: frame.sample_count,
                size: frame.data.len() as u32,
                flags: None,
                composition_time_offset: 0,
            })
            .collect();

        let mut payload = BytesMut::new();
        for frame in frames {
            payload.put_slice(&frame.data);
        }

        let moof = boxes::moof(self.sequence_number, &self.track, &samples);
        let mdat = boxes::mdat(&payload);
        let mut segment = BytesMut::with_capacity(moof.len() + mdat.len());
        segment.put_slice(&moof);
        segment.put_slice(&mdat);

        out.push(SegmentEvent::Segment(SegmentData {
            kind: StreamKind::Audio,
            track_id: self.track.id,
            sequence_number: self.sequence_number,
            init_segment: self.init_segment_if_changed(),
            boxes: segment.freeze(),
        }));
        self.sequence_number += 1;

        let start = self.track.base_media_decode_time as i64;
        let total_duration: i64 = frames.iter().map(|f| f.sample_count as i64).sum();
        out.push(SegmentEvent::TimingInfo(TimingInfo {
            start,
            end: start + total_duration,
        }));
    }
}

fn div_ceil(num: i64, den: i64) -> i64 {
    (num + den - 1) / den
}

impl Stage for AudioSegmentBuilder {
    type Input = AdtsFrame;
    type Output = SegmentEvent;

    fn push(&mut self, input: AdtsFrame, _out: &mut Vec<SegmentEvent>) {
        self.apply_config(&input);
        self.track.collect_timing(input.pts, input.dts);
        self.frames.push(input);
    }

    fn flush(&mut self, out: &mut Vec<SegmentEvent>) {
        let buffered = std::mem::take(&mut self.frames);
        let mut frames = self.trim_frames_by_earliest_dts(buffered);
        if frames.is_empty() {
            self.track.clear_segment_timing();
            return;
        }

        // Recompute segment timing over the frames that survived trimming.
        self.track.clear_segment_timing();
        for frame in &frames {
            self.track.collect_timing(frame.pts, frame.dts);
        }

        self.track.base_media_decode_time = self
            .track
            .calculate_base_media_decode_time(self.keep_original_timestamps);
        self.prefix_with_silence(&mut frames);

        self.emit_segment(&frames, out);
        self.track.clear_segment_timing();
    }

    fn partial_flush(&mut self, out: &mut Vec<SegmentEvent>) {
        self.flush(out);
    }

    fn end_timeline(&mut self, out: &mut Vec<SegmentEvent>) {
        self.flush(out);
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.track.clear_timeline();
        self.audio_append_start = None;
        self.video_base_media_decode_time = None;
        self.earliest_allowed_dts = 0;
        // The fragment sequence keeps counting across resets.
    }
}
