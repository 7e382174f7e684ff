//! The transmuxer facade.
//!
//! Owns every pipeline stage and drives them in a fixed order: the graph's
//! edges are the method calls below, so event ordering is deterministic.
//! Two input pipelines share the downstream stages: MPEG-2 TS (split →
//! parse → assemble → per-track rollover → codec parsers) and raw AAC
//! (frame → rollover → ADTS). Both feed the segment builders, which emit
//! fragmented MP4.

use bytes::Bytes;
use log::debug;

use crate::av::{PesPacket, Stage, StreamKind, TimingInfo};
use crate::codec::aac::AdtsParser;
use crate::codec::caption::{CaptionExtractor, Cue};
use crate::codec::h264::{H264Parser, NalUnit};
use crate::config::TransmuxConfig;
use crate::format::aac::{is_likely_aac_data, AacFramer};
use crate::format::id3::{Id3Parser, Id3Tag};
use crate::format::mp4::{AudioSegmentBuilder, SegmentData, SegmentEvent, VideoSegmentBuilder};
use crate::format::ts::{
    ElementaryAssembler, ElementaryEvent, PacketParser, PacketSplitter, ParsedPacket,
    TimestampRollover,
};

/// Track ID assigned to the audio track of a raw AAC stream, which has no
/// PIDs to borrow.
const AAC_AUDIO_TRACK_ID: u32 = 1;

/// An ID3 tag surfaced with its display time.
#[derive(Debug, Clone)]
pub struct Id3FrameEvent {
    /// Raw tag bytes
    pub data: Bytes,
    /// Presentation timestamp, 90 kHz
    pub pts: i64,
    /// Display time in seconds on the output timeline
    pub cue_time: f64,
    /// Stream dispatch type (PMT stream type in hex)
    pub dispatch_type: String,
}

/// A caption cue surfaced with display times in seconds.
#[derive(Debug, Clone)]
pub struct CaptionEvent {
    /// Window start in seconds on the output timeline
    pub start_time: f64,
    /// Window end in seconds on the output timeline
    pub end_time: f64,
    /// Caption text
    pub text: String,
    /// Originating channel ("CC1"/"CC2")
    pub stream: &'static str,
}

/// Everything a [`Transmuxer`] can hand back to its caller.
#[derive(Debug, Clone)]
pub enum TransmuxOutput {
    /// A finished media segment (`moof`+`mdat`, with its init segment when
    /// that changed)
    Segment(SegmentData),
    /// The elementary streams discovered in the input
    TrackInfo {
        /// An H.264 track was found
        has_video: bool,
        /// An AAC track was found
        has_audio: bool,
    },
    /// Timing of an emitted video segment, 90 kHz ticks
    VideoTimingInfo(TimingInfo),
    /// Timing of an emitted audio segment, sample-rate ticks
    AudioTimingInfo(TimingInfo),
    /// A timed metadata tag
    Id3Frame(Id3FrameEvent),
    /// A closed caption cue
    Caption(CaptionEvent),
    /// A flush cycle completed
    Done,
    /// A partial flush cycle completed
    PartialDone,
    /// The timeline was ended
    EndedTimeline,
    /// All state was discarded
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineKind {
    Ts,
    Aac,
}

/// Streaming TS/AAC to fragmented MP4 transmuxer.
///
/// Push byte chunks of any size; drain the returned events. All methods
/// are synchronous and the instance must not be shared across threads
/// without external serialization.
#[derive(Debug)]
pub struct Transmuxer {
    config: TransmuxConfig,
    pipeline: Option<PipelineKind>,
    has_flushed: bool,

    splitter: PacketSplitter,
    packet_parser: PacketParser,
    assembler: ElementaryAssembler,
    video_rollover: TimestampRollover,
    audio_rollover: TimestampRollover,
    metadata_rollover: TimestampRollover,
    h264: H264Parser,
    adts: AdtsParser,
    captions: CaptionExtractor,
    id3: Id3Parser,
    aac_framer: AacFramer,

    video_builder: Option<VideoSegmentBuilder>,
    audio_builder: Option<AudioSegmentBuilder>,

    timeline_start_pts: Option<i64>,
    pending_audio_append_start: Option<i64>,
}

impl Transmuxer {
    /// Creates a transmuxer with the given options.
    pub fn new(config: TransmuxConfig) -> Self {
        let adts = AdtsParser::with_partial_segments(config.handle_partial_segments);
        Self {
            config,
            pipeline: None,
            has_flushed: true,
            splitter: PacketSplitter::new(),
            packet_parser: PacketParser::new(),
            assembler: ElementaryAssembler::new(),
            video_rollover: TimestampRollover::new(StreamKind::Video),
            audio_rollover: TimestampRollover::new(StreamKind::Audio),
            metadata_rollover: TimestampRollover::new(StreamKind::TimedMetadata),
            h264: H264Parser::new(),
            adts,
            captions: CaptionExtractor::new(),
            id3: Id3Parser::new(),
            aac_framer: AacFramer::new(),
            video_builder: None,
            audio_builder: None,
            timeline_start_pts: None,
            pending_audio_append_start: None,
        }
    }

    /// Feeds a chunk of input bytes, returning the events it produced.
    ///
    /// The input format is detected on the first push of each flush cycle:
    /// a leading ID3 tag or ADTS sync selects the raw AAC pipeline,
    /// anything else is treated as a transport stream.
    pub fn push(&mut self, data: &[u8]) -> Vec<TransmuxOutput> {
        let mut out = Vec::new();
        if data.is_empty() {
            return out;
        }

        if self.has_flushed {
            self.has_flushed = false;
            let detected = if is_likely_aac_data(data) {
                PipelineKind::Aac
            } else {
                PipelineKind::Ts
            };
            if self.pipeline != Some(detected) {
                debug!("selecting {:?} pipeline", detected);
                self.reset_stages();
                self.pipeline = Some(detected);
                if detected == PipelineKind::Aac {
                    self.ensure_audio_builder(AAC_AUDIO_TRACK_ID);
                    out.push(TransmuxOutput::TrackInfo {
                        has_video: false,
                        has_audio: true,
                    });
                }
            }
        }

        match self.pipeline {
            Some(PipelineKind::Aac) => {
                let mut packets = Vec::new();
                self.aac_framer.push(Bytes::copy_from_slice(data), &mut packets);
                for packet in packets {
                    self.route_pes(packet, &mut out);
                }
            }
            _ => {
                let mut packets = Vec::new();
                self.splitter.push(Bytes::copy_from_slice(data), &mut packets);
                self.route_ts_packets(packets, &mut out);
            }
        }
        out
    }

    /// Emits everything buffered and ends the flush cycle with [`TransmuxOutput::Done`].
    pub fn flush(&mut self) -> Vec<TransmuxOutput> {
        let mut out = Vec::new();

        match self.pipeline {
            Some(PipelineKind::Aac) => {
                self.aac_framer.flush(&mut Vec::new());
            }
            Some(PipelineKind::Ts) => {
                let mut packets = Vec::new();
                self.splitter.flush(&mut packets);
                self.route_ts_packets(packets, &mut out);

                let mut events = Vec::new();
                self.assembler.flush(&mut events);
                for event in events {
                    self.route_elementary(event, &mut out);
                }

                let mut nals = Vec::new();
                self.h264.flush(&mut nals);
                self.route_nals(nals);
            }
            None => {}
        }

        self.adts.flush(&mut Vec::new());
        self.video_rollover.flush(&mut Vec::new());
        self.audio_rollover.flush(&mut Vec::new());
        self.metadata_rollover.flush(&mut Vec::new());

        let mut cues = Vec::new();
        self.captions.flush(&mut cues);

        self.flush_builders(false, &mut out);

        for cue in cues {
            let event = self.caption_event(cue);
            out.push(TransmuxOutput::Caption(event));
        }

        self.has_flushed = true;
        out.push(TransmuxOutput::Done);
        out
    }

    /// Emits what is safely complete while keeping partial state, ending
    /// with [`TransmuxOutput::PartialDone`].
    pub fn partial_flush(&mut self) -> Vec<TransmuxOutput> {
        let mut out = Vec::new();

        if self.pipeline == Some(PipelineKind::Ts) {
            let mut packets = Vec::new();
            self.splitter.partial_flush(&mut packets);
            self.route_ts_packets(packets, &mut out);

            let mut events = Vec::new();
            self.assembler.partial_flush(&mut events);
            for event in events {
                self.route_elementary(event, &mut out);
            }
            // The H.264 byte stream keeps its buffer: a partial flush must
            // not cut a NAL unit in half.
        }

        self.adts.partial_flush(&mut Vec::new());

        let mut cues = Vec::new();
        self.captions.partial_flush(&mut cues);

        self.flush_builders(true, &mut out);

        for cue in cues {
            let event = self.caption_event(cue);
            out.push(TransmuxOutput::Caption(event));
        }

        out.push(TransmuxOutput::PartialDone);
        out
    }

    /// Flushes and marks the end of the timeline.
    pub fn end_timeline(&mut self) -> Vec<TransmuxOutput> {
        let mut out = self.flush();
        out.push(TransmuxOutput::EndedTimeline);
        out
    }

    /// Discards all buffered state. Fragment sequence numbers are kept so
    /// appended output remains distinguishable across the boundary.
    pub fn reset(&mut self) -> Vec<TransmuxOutput> {
        self.reset_stages();
        self.pipeline = None;
        self.has_flushed = true;
        vec![TransmuxOutput::Reset]
    }

    /// Sets the decode-time offset for the start of the timeline, in
    /// 90 kHz ticks.
    pub fn set_base_media_decode_time(&mut self, ticks: u64) {
        self.config.base_media_decode_time = ticks;
        if let Some(builder) = &mut self.video_builder {
            builder.set_timeline_start_decode_time(ticks);
        }
        if let Some(builder) = &mut self.audio_builder {
            builder.set_timeline_start_decode_time(ticks);
        }
    }

    /// Tells the audio builder where appended audio should resume, in
    /// 90 kHz ticks.
    pub fn set_audio_append_start(&mut self, ticks: i64) {
        self.pending_audio_append_start = Some(ticks);
        if let Some(builder) = &mut self.audio_builder {
            builder.set_audio_append_start(ticks);
        }
    }

    /// Records the remux preference. Audio and video are currently always
    /// emitted as separate fragmented streams.
    pub fn set_remux(&mut self, remux: bool) {
        self.config.remux = remux;
    }

    fn reset_stages(&mut self) {
        self.splitter.reset();
        self.packet_parser.reset();
        self.assembler.reset();
        self.video_rollover.reset();
        self.audio_rollover.reset();
        self.metadata_rollover.reset();
        self.h264.reset();
        self.adts.reset();
        self.captions.reset();
        self.id3.reset();
        self.aac_framer.reset();
        if let Some(builder) = &mut self.video_builder {
            builder.reset();
        }
        if let Some(builder) = &mut self.audio_builder {
            builder.reset();
        }
        self.timeline_start_pts = None;
    }

    fn ensure_video_builder(&mut self, track_id: u32) {
        if self.video_builder.is_none() {
            let mut builder =
                VideoSegmentBuilder::new(track_id, self.config.keep_original_timestamps);
            builder.set_timeline_start_decode_time(self.config.base_media_decode_time);
            self.video_builder = Some(builder);
        }
    }

    fn ensure_audio_builder(&mut self, track_id: u32) {
        if self.audio_builder.is_none() {
            let mut builder =
                AudioSegmentBuilder::new(track_id, self.config.keep_original_timestamps);
            builder.set_timeline_start_decode_time(self.config.base_media_decode_time);
            if let Some(ticks) = self.pending_audio_append_start {
                builder.set_audio_append_start(ticks);
            }
            self.audio_builder = Some(builder);
        }
    }

    fn route_ts_packets(&mut self, packets: Vec<Bytes>, out: &mut Vec<TransmuxOutput>) {
        for packet in packets {
            let mut parsed = Vec::new();
            self.packet_parser.push(packet, &mut parsed);
            for event in parsed {
                self.route_parsed(event, out);
            }
        }
    }

    fn route_parsed(&mut self, event: ParsedPacket, out: &mut Vec<TransmuxOutput>) {
        let mut events = Vec::new();
        self.assembler.push(event, &mut events);
        for event in events {
            self.route_elementary(event, out);
        }
    }

    fn route_elementary(&mut self, event: ElementaryEvent, out: &mut Vec<TransmuxOutput>) {
        match event {
            ElementaryEvent::TrackInfo(tracks) => {
                let has_video = tracks.iter().any(|t| t.kind == StreamKind::Video);
                let has_audio = tracks.iter().any(|t| t.kind == StreamKind::Audio);
                for track in &tracks {
                    match track.kind {
                        StreamKind::Video => self.ensure_video_builder(track.id as u32),
                        StreamKind::Audio => self.ensure_audio_builder(track.id as u32),
                        StreamKind::TimedMetadata => {}
                    }
                }
                out.push(TransmuxOutput::TrackInfo {
                    has_video,
                    has_audio,
                });
            }
            ElementaryEvent::Pes(packet) => self.route_pes(packet, out),
        }
    }

    fn route_pes(&mut self, packet: PesPacket, out: &mut Vec<TransmuxOutput>) {
        match packet.kind {
            StreamKind::Video => {
                let mut rolled = Vec::new();
                self.video_rollover.push(packet, &mut rolled);
                for packet in rolled {
                    if self.timeline_start_pts.is_none() {
                        self.timeline_start_pts = packet.pts;
                    }
                    let mut nals = Vec::new();
                    self.h264.push(packet, &mut nals);
                    self.route_nals(nals);
                }
            }
            StreamKind::Audio => {
                let mut rolled = Vec::new();
                self.audio_rollover.push(packet, &mut rolled);
                for packet in rolled {
                    if self.pipeline == Some(PipelineKind::Aac) && self.timeline_start_pts.is_none()
                    {
                        self.timeline_start_pts = packet.pts;
                    }
                    let mut frames = Vec::new();
                    self.adts.push(packet, &mut frames);
                    if let Some(builder) = &mut self.audio_builder {
                        for frame in frames {
                            builder.push(frame, &mut Vec::new());
                        }
                    }
                }
            }
            StreamKind::TimedMetadata => {
                let mut rolled = Vec::new();
                self.metadata_rollover.push(packet, &mut rolled);
                for packet in rolled {
                    let mut tags = Vec::new();
                    self.id3.push(packet, &mut tags);
                    for tag in tags {
                        let event = self.id3_event(tag);
                        out.push(TransmuxOutput::Id3Frame(event));
                    }
                }
            }
        }
    }

    fn route_nals(&mut self, nals: Vec<NalUnit>) {
        for nal in nals {
            self.captions.push(nal.clone(), &mut Vec::new());
            if let Some(builder) = &mut self.video_builder {
                builder.push(nal, &mut Vec::new());
            }
        }
    }

    fn flush_builders(&mut self, partial: bool, out: &mut Vec<TransmuxOutput>) {
        let mut video_events = Vec::new();
        if let Some(builder) = &mut self.video_builder {
            if partial {
                builder.partial_flush(&mut video_events);
            } else {
                builder.flush(&mut video_events);
            }

            // The audio segment aligns itself against the video timeline.
            if let Some(audio) = &mut self.audio_builder {
                if let Some(dts) = builder.timeline_start_dts() {
                    audio.set_earliest_allowed_dts(dts);
                    audio.set_video_base_media_decode_time(
                        builder.base_media_decode_time() as i64
                    );
                }
            }
        }
        for event in video_events {
            out.push(match event {
                SegmentEvent::Segment(data) => TransmuxOutput::Segment(data),
                SegmentEvent::TimingInfo(info) => TransmuxOutput::VideoTimingInfo(info),
            });
        }

        let mut audio_events = Vec::new();
        if let Some(builder) = &mut self.audio_builder {
            if partial {
                builder.partial_flush(&mut audio_events);
            } else {
                builder.flush(&mut audio_events);
            }
        }
        for event in audio_events {
            out.push(match event {
                SegmentEvent::Segment(data) => TransmuxOutput::Segment(data),
                SegmentEvent::TimingInfo(info) => TransmuxOutput::AudioTimingInfo(info),
            });
        }
    }

    fn output_seconds(&self, pts: i64) -> f64 {
        if self.config.keep_original_timestamps {
            pts as f64 / 90_000.0
        } else {
            (pts - self.timeline_start_pts.unwrap_or(pts)) as f64 / 90_000.0
        }
    }

    fn id3_event(&self, tag: Id3Tag) -> Id3FrameEvent {
        let pts = tag.pts.unwrap_or(0);
        Id3FrameEvent {
            data: tag.data,
            pts,
            cue_time: self.output_seconds(pts),
            dispatch_type: tag.dispatch_type,
        }
    }

    fn caption_event(&self, cue: Cue) -> CaptionEvent {
        CaptionEvent {
            start_time: self.output_seconds(cue.start_pts),
            end_time: self.output_seconds(cue.end_pts),
            text: cue.text,
            stream: cue.stream,
        }
    }
}

impl Default for Transmuxer {
    fn default() -> Self {
        Self::new(TransmuxConfig::default())
    }
}
