use bytes::BytesMut;
use log::trace;

use super::types::*;
use crate::av::{ElementaryCodec, PesPacket, Stage, StreamKind, TrackSummary};

/// Events produced by the elementary assembler.
#[derive(Debug, Clone)]
pub enum ElementaryEvent {
    /// One entry per elementary stream discovered in the program map
    TrackInfo(Vec<TrackSummary>),
    /// A fully reassembled PES packet
    Pes(PesPacket),
}

#[derive(Debug, Default)]
struct StreamBuffer {
    fragments: Vec<ElementaryPayload>,
    size: usize,
}

impl StreamBuffer {
    fn clear(&mut self) {
        self.fragments.clear();
        self.size = 0;
    }
}

/// Reassembles TS payload fragments into complete PES packets.
///
/// Each of the three stream kinds owns a fragment buffer. A payload-unit
/// start marker closes the previous packet; video PES packets declare a
/// zero `PES_packet_length` on the wire, so they are only emitted on the
/// next start marker or on an explicit flush. Audio and metadata packets
/// are additionally emitted once the declared length has accumulated when
/// a lifecycle flush asks for them.
#[derive(Debug, Default)]
pub struct ElementaryAssembler {
    video: StreamBuffer,
    audio: StreamBuffer,
    timed_metadata: StreamBuffer,
}

/// Fields parsed from a PES header.
#[derive(Debug, Default)]
struct PesHeaderFields {
    packet_length: usize,
    data_alignment: bool,
    pts: Option<i64>,
    dts: Option<i64>,
    payload_offset: usize,
}

/// Assembles the 33-bit timestamp stored in five marker-stuffed bytes.
///
/// The top 31 bits come from the marker layout; the result is shifted left
/// twice and the low two bits are OR'd back in, all in 64-bit arithmetic so
/// no high bits are lost.
fn parse_timestamp(bytes: &[u8]) -> i64 {
    let mut ts = ((bytes[0] as i64 & 0x0E) << 27)
        | ((bytes[1] as i64) << 20)
        | ((bytes[2] as i64 & 0xFE) << 12)
        | ((bytes[3] as i64) << 5)
        | ((bytes[4] as i64 & 0xFE) >> 3);
    ts <<= 2;
    ts |= (bytes[4] as i64 & 0x06) >> 1;
    ts
}

fn parse_pes_header(payload: &[u8]) -> Option<PesHeaderFields> {
    if payload.len() < 9 || payload[0] != 0x00 || payload[1] != 0x00 || payload[2] != 0x01 {
        return None;
    }

    let mut fields = PesHeaderFields {
        packet_length: ((payload[4] as usize) << 8) | payload[5] as usize,
        data_alignment: payload[6] & 0x04 != 0,
        payload_offset: 9 + payload[8] as usize,
        ..Default::default()
    };

    let pts_dts_flags = payload[7] & 0xC0;
    if pts_dts_flags & 0x80 != 0 {
        if payload.len() < 14 {
            return None;
        }
        let pts = parse_timestamp(&payload[9..14]);
        fields.pts = Some(pts);
        fields.dts = Some(pts);
        if pts_dts_flags & 0x40 != 0 {
            if payload.len() < 19 {
                return None;
            }
            fields.dts = Some(parse_timestamp(&payload[14..19]));
        }
    }

    Some(fields)
}

impl ElementaryAssembler {
    /// Creates an assembler with empty stream buffers.
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer_mut(&mut self, kind: StreamKind) -> &mut StreamBuffer {
        match kind {
            StreamKind::Video => &mut self.video,
            StreamKind::Audio => &mut self.audio,
            StreamKind::TimedMetadata => &mut self.timed_metadata,
        }
    }

    /// Assembles and possibly emits the buffered PES packet for one stream.
    ///
    /// `force` drops the buffer even when the packet is not emittable, which
    /// is what a new payload-unit start requires.
    fn flush_stream(&mut self, kind: StreamKind, force: bool, out: &mut Vec<ElementaryEvent>) {
        let buffer = self.buffer_mut(kind);
        if buffer.fragments.is_empty() || buffer.size < 9 {
            if force {
                buffer.clear();
            }
            return;
        }

        let track_id = buffer.fragments[0].pid;
        let stream_type = buffer.fragments[0].stream_type;

        let mut packet_data = BytesMut::with_capacity(buffer.size);
        for fragment in &buffer.fragments {
            packet_data.extend_from_slice(&fragment.data);
        }
        let packet_data = packet_data.freeze();

        let header = match parse_pes_header(&packet_data) {
            Some(header) => header,
            None => {
                trace!("discarding malformed PES packet on PID {}", track_id);
                buffer.clear();
                return;
            }
        };

        // Video PES packets are sent with PES_packet_length = 0, so only a
        // start marker or lifecycle flush can complete them. Other streams
        // are complete once the declared byte count has arrived.
        let packet_flushable =
            kind == StreamKind::Video || header.packet_length <= buffer.size;

        if force || packet_flushable {
            buffer.clear();
        }
        if packet_flushable {
            let payload_offset = header.payload_offset.min(packet_data.len());
            out.push(ElementaryEvent::Pes(PesPacket {
                kind,
                track_id,
                stream_type,
                pts: header.pts,
                dts: header.dts,
                data_alignment: header.data_alignment,
                payload: packet_data.slice(payload_offset..),
            }));
        }
    }

    fn flush_streams(&mut self, out: &mut Vec<ElementaryEvent>) {
        self.flush_stream(StreamKind::Video, false, out);
        self.flush_stream(StreamKind::Audio, false, out);
        self.flush_stream(StreamKind::TimedMetadata, false, out);
    }
}

impl Stage for ElementaryAssembler {
    type Input = ParsedPacket;
    type Output = ElementaryEvent;

    fn push(&mut self, input: ParsedPacket, out: &mut Vec<ElementaryEvent>) {
        match input {
            ParsedPacket::ProgramMap(map) => {
                let mut tracks = Vec::new();
                if let Some(pid) = map.video_pid {
                    tracks.push(TrackSummary {
                        id: pid,
                        kind: StreamKind::Video,
                        codec: ElementaryCodec::Avc,
                    });
                }
                if let Some(pid) = map.audio_pid {
                    tracks.push(TrackSummary {
                        id: pid,
                        kind: StreamKind::Audio,
                        codec: ElementaryCodec::Adts,
                    });
                }
                out.push(ElementaryEvent::TrackInfo(tracks));
            }
            ParsedPacket::Elementary(payload) => {
                if payload.payload_unit_start {
                    self.flush_stream(payload.kind, true, out);
                }
                let buffer = self.buffer_mut(payload.kind);
                buffer.size += payload.data.len();
                buffer.fragments.push(payload);
            }
        }
    }

    fn flush(&mut self, out: &mut Vec<ElementaryEvent>) {
        self.flush_streams(out);
    }

    fn partial_flush(&mut self, out: &mut Vec<ElementaryEvent>) {
        self.flush_streams(out);
    }

    fn end_timeline(&mut self, out: &mut Vec<ElementaryEvent>) {
        self.flush_streams(out);
    }

    fn reset(&mut self) {
        self.video.clear();
        self.audio.clear();
        self.timed_metadata.clear();
    }
}

/// Serializes a PES packet for tests and the synthetic streams used by the
/// integration suite.
#[cfg(test)]
pub(crate) fn write_pes(
    stream_id: u8,
    packet_length_known: bool,
    pts: Option<i64>,
    dts: Option<i64>,
    payload: &[u8],
) -> Vec<u8> {
    let mut header_data = Vec::new();
    if let Some(pts) = pts {
        let marker: u8 = if dts.is_some() { 0x30 } else { 0x20 };
        header_data.extend_from_slice(&encode_timestamp(marker, pts));
        if let Some(dts) = dts {
            header_data.extend_from_slice(&encode_timestamp(0x10, dts));
        }
    }

    let mut pes = vec![0x00, 0x00, 0x01, stream_id];
    let length = if packet_length_known {
        3 + header_data.len() + payload.len()
    } else {
        0
    };
    pes.push((length >> 8) as u8);
    pes.push(length as u8);
    pes.push(0x80); // marker bits
    pes.push(match (pts.is_some(), dts.is_some()) {
        (true, true) => 0xC0,
        (true, false) => 0x80,
        _ => 0x00,
    });
    pes.push(header_data.len() as u8);
    pes.extend_from_slice(&header_data);
    pes.extend_from_slice(payload);
    pes
}

#[cfg(test)]
pub(crate) fn encode_timestamp(marker: u8, ts: i64) -> [u8; 5] {
    let ts = ts & (MAX_TS - 1);
    [
        marker | (((ts >> 29) & 0x0E) as u8) | 0x01,
        ((ts >> 22) & 0xFF) as u8,
        ((((ts >> 14) & 0xFE) as u8) | 0x01),
        ((ts >> 7) & 0xFF) as u8,
        ((((ts << 1) & 0xFE) as u8) | 0x01),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn payload_fragment(
        kind: StreamKind,
        pid: u16,
        payload_unit_start: bool,
        data: &[u8],
    ) -> ParsedPacket {
        ParsedPacket::Elementary(ElementaryPayload {
            kind,
            pid,
            stream_type: match kind {
                StreamKind::Video => STREAM_TYPE_H264,
                StreamKind::Audio => STREAM_TYPE_ADTS,
                StreamKind::TimedMetadata => STREAM_TYPE_METADATA,
            },
            payload_unit_start,
            data: Bytes::copy_from_slice(data),
        })
    }

    #[test]
    fn test_timestamp_round_trip() {
        for &ts in &[0i64, 1, 2, 3, 90_000, MAX_TS - 1, MAX_TS - 10] {
            let encoded = encode_timestamp(0x20, ts);
            assert_eq!(parse_timestamp(&encoded), ts, "timestamp {}", ts);
        }
    }

    #[test]
    fn test_video_pes_held_until_next_start() {
        let mut assembler = ElementaryAssembler::new();
        let mut out = Vec::new();

        let pes = write_pes(0xE0, false, Some(1_000), Some(900), &[0x09, 0xF0]);
        assembler.push(
            payload_fragment(StreamKind::Video, 0x100, true, &pes),
            &mut out,
        );
        assert!(out.is_empty());

        // The next start marker completes the previous packet.
        let next = write_pes(0xE0, false, Some(4_000), Some(3_900), &[0x09, 0xF0]);
        assembler.push(
            payload_fragment(StreamKind::Video, 0x100, true, &next),
            &mut out,
        );

        assert_eq!(out.len(), 1);
        match &out[0] {
            ElementaryEvent::Pes(packet) => {
                assert_eq!(packet.kind, StreamKind::Video);
                assert_eq!(packet.pts, Some(1_000));
                assert_eq!(packet.dts, Some(900));
                assert_eq!(&packet.payload[..], &[0x09, 0xF0]);
            }
            other => panic!("expected PES packet, got {:?}", other),
        }
    }

    #[test]
    fn test_pts_only_packet_copies_pts_to_dts() {
        let mut assembler = ElementaryAssembler::new();
        let mut out = Vec::new();

        let pes = write_pes(0xC0, true, Some(5_000), None, &[0xFF, 0xF1]);
        assembler.push(
            payload_fragment(StreamKind::Audio, 0x101, true, &pes),
            &mut out,
        );
        assembler.flush(&mut out);

        assert_eq!(out.len(), 1);
        match &out[0] {
            ElementaryEvent::Pes(packet) => {
                assert_eq!(packet.pts, Some(5_000));
                assert_eq!(packet.dts, Some(5_000));
            }
            other => panic!("expected PES packet, got {:?}", other),
        }
    }

    #[test]
    fn test_fragmented_pes_reassembly() {
        let mut assembler = ElementaryAssembler::new();
        let mut out = Vec::new();

        let payload: Vec<u8> = (0u8..64).collect();
        let pes = write_pes(0xC0, true, Some(0), None, &payload);
        let (head, tail) = pes.split_at(20);

        assembler.push(
            payload_fragment(StreamKind::Audio, 0x101, true, head),
            &mut out,
        );
        assembler.push(
            payload_fragment(StreamKind::Audio, 0x101, false, tail),
            &mut out,
        );
        assembler.flush(&mut out);

        assert_eq!(out.len(), 1);
        match &out[0] {
            ElementaryEvent::Pes(packet) => assert_eq!(&packet.payload[..], &payload[..]),
            other => panic!("expected PES packet, got {:?}", other),
        }
    }

    #[test]
    fn test_rollover_boundary_timestamps_survive() {
        // Timestamps near 2^33 must not lose their low bits.
        let mut assembler = ElementaryAssembler::new();
        let mut out = Vec::new();

        let ts = MAX_TS - 10;
        let pes = write_pes(0xC0, true, Some(ts), None, &[0x00]);
        assembler.push(
            payload_fragment(StreamKind::Audio, 0x101, true, &pes),
            &mut out,
        );
        assembler.flush(&mut out);

        match &out[0] {
            ElementaryEvent::Pes(packet) => assert_eq!(packet.pts, Some(ts)),
            other => panic!("expected PES packet, got {:?}", other),
        }
    }

    #[test]
    fn test_track_info_from_program_map() {
        let mut assembler = ElementaryAssembler::new();
        let mut out = Vec::new();

        let mut map = ProgramMap::default();
        map.video_pid = Some(0x100);
        map.audio_pid = Some(0x101);
        assembler.push(ParsedPacket::ProgramMap(map), &mut out);

        assert_eq!(out.len(), 1);
        match &out[0] {
            ElementaryEvent::TrackInfo(tracks) => {
                assert_eq!(tracks.len(), 2);
                assert_eq!(tracks[0].codec, ElementaryCodec::Avc);
                assert_eq!(tracks[1].codec, ElementaryCodec::Adts);
            }
            other => panic!("expected track info, got {:?}", other),
        }
    }

    #[test]
    fn test_reset_discards_buffered_fragments() {
        let mut assembler = ElementaryAssembler::new();
        let mut out = Vec::new();

        let pes = write_pes(0xE0, false, Some(0), None, &[0x09]);
        assembler.push(
            payload_fragment(StreamKind::Video, 0x100, true, &pes),
            &mut out,
        );
        assembler.reset();
        assembler.flush(&mut out);
        assert!(out.is_empty());
    }
}
