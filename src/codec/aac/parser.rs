use bytes::{Buf, BytesMut};
use log::trace;

use super::types::{sampling_frequency, AdtsFrame};
use crate::av::{PesPacket, Stage, StreamKind};

/// Minimum bytes needed before an ADTS header can be evaluated.
const ADTS_HEADER_LENGTH: usize = 7;

/// Extracts AAC frames from ADTS-framed audio PES packets.
///
/// Payload bytes accumulate in a rolling buffer; frames are emitted as soon
/// as a complete ADTS frame is available. A sync mismatch advances one byte
/// and rescans; a frame longer than the buffered bytes waits for more data.
///
/// Frame timestamps start from the carrying PES packet's PTS/DTS and step
/// forward by one frame duration per frame. The frame counter restarts with
/// every PES packet unless partial-segment handling is enabled, in which
/// case it carries across packets (and across partial flushes) until a full
/// flush.
#[derive(Debug)]
pub struct AdtsParser {
    buffer: BytesMut,
    handle_partial_segments: bool,
    frame_num: u32,
    pts: i64,
    dts: i64,
}

impl AdtsParser {
    /// Creates a parser that restarts frame timing with every PES packet.
    pub fn new() -> Self {
        Self::with_partial_segments(false)
    }

    /// Creates a parser, selecting whether the frame counter survives
    /// across PES packets for partial-segment output.
    pub fn with_partial_segments(handle_partial_segments: bool) -> Self {
        Self {
            buffer: BytesMut::new(),
            handle_partial_segments,
            frame_num: 0,
            pts: 0,
            dts: 0,
        }
    }

    fn parse_frames(&mut self, out: &mut Vec<AdtsFrame>) {
        loop {
            if self.buffer.len() < ADTS_HEADER_LENGTH {
                return;
            }
            let buf = &self.buffer;

            // Sync word: 12 set bits, layer 0.
            if buf[0] != 0xFF || buf[1] & 0xF6 != 0xF0 {
                trace!("ADTS sync lost, resyncing");
                self.buffer.advance(1);
                continue;
            }

            let sampling_frequency_index = (buf[2] & 0x3C) >> 2;
            let samplerate = match sampling_frequency(sampling_frequency_index) {
                Some(rate) => rate,
                None => {
                    self.buffer.advance(1);
                    continue;
                }
            };

            // No CRC when the protection_absent bit is set.
            let protection_skip_bytes = ((!buf[1] & 0x01) as usize) * 2;
            let frame_length = ((buf[3] as usize & 0x03) << 11)
                | ((buf[4] as usize) << 3)
                | ((buf[5] as usize & 0xE0) >> 5);
            if frame_length < ADTS_HEADER_LENGTH + protection_skip_bytes {
                self.buffer.advance(1);
                continue;
            }
            if self.buffer.len() < frame_length {
                // Wait for the rest of the frame.
                return;
            }

            let sample_count = ((buf[6] as u32 & 0x03) + 1) * 1024;
            let frame_duration = sample_count as i64 * 90_000 / samplerate as i64;
            let audio_object_type = ((buf[2] >> 6) & 0x03) + 1;
            let channel_count = ((buf[2] & 0x01) << 2) | ((buf[3] & 0xC0) >> 6);

            let data = self
                .buffer
                .split_to(frame_length)
                .freeze()
                .slice(ADTS_HEADER_LENGTH + protection_skip_bytes..);

            out.push(AdtsFrame {
                pts: self.pts + self.frame_num as i64 * frame_duration,
                dts: self.dts + self.frame_num as i64 * frame_duration,
                sample_count,
                audio_object_type,
                channel_count,
                samplerate,
                sampling_frequency_index,
                sample_size: 16,
                data,
            });
            self.frame_num += 1;
        }
    }
}

impl Default for AdtsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for AdtsParser {
    type Input = PesPacket;
    type Output = AdtsFrame;

    fn push(&mut self, input: PesPacket, out: &mut Vec<AdtsFrame>) {
        if input.kind != StreamKind::Audio {
            return;
        }

        if !self.handle_partial_segments {
            self.frame_num = 0;
        }
        if let Some(pts) = input.pts {
            self.pts = pts;
        }
        if let Some(dts) = input.dts {
            self.dts = dts;
        }

        self.buffer.extend_from_slice(&input.payload);
        self.parse_frames(out);
    }

    fn flush(&mut self, _out: &mut Vec<AdtsFrame>) {
        self.frame_num = 0;
    }

    fn partial_flush(&mut self, _out: &mut Vec<AdtsFrame>) {
        // Frame timing continues into the next partial segment; only a
        // full flush restarts it.
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.frame_num = 0;
        self.pts = 0;
        self.dts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    /// Builds an ADTS frame (no CRC) for AAC-LC at the given sampling
    /// frequency index with the given payload.
    pub(crate) fn adts_frame(
        sampling_frequency_index: u8,
        channel_config: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let frame_length = ADTS_HEADER_LENGTH + payload.len();
        let mut frame = vec![
            0xFF,
            0xF1, // MPEG-4, layer 0, no CRC
            0x40 | (sampling_frequency_index << 2) | (channel_config >> 2),
            (channel_config << 6) | ((frame_length >> 11) as u8 & 0x03),
            (frame_length >> 3) as u8,
            ((frame_length << 5) as u8 & 0xE0) | 0x1F,
            0xFC,
        ];
        frame.extend_from_slice(payload);
        frame
    }

    fn audio_pes(pts: i64, payload: &[u8]) -> PesPacket {
        PesPacket {
            kind: StreamKind::Audio,
            track_id: 0x101,
            stream_type: 0x0F,
            pts: Some(pts),
            dts: Some(pts),
            data_alignment: false,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn test_single_frame() {
        let mut parser = AdtsParser::new();
        let mut out = Vec::new();

        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        parser.push(audio_pes(90_000, &adts_frame(4, 2, &payload)), &mut out);

        assert_eq!(out.len(), 1);
        let frame = &out[0];
        assert_eq!(frame.pts, 90_000);
        assert_eq!(frame.samplerate, 44_100);
        assert_eq!(frame.sampling_frequency_index, 4);
        assert_eq!(frame.channel_count, 2);
        assert_eq!(frame.audio_object_type, 2); // AAC-LC
        assert_eq!(frame.sample_count, 1024);
        assert_eq!(&frame.data[..], &payload);
    }

    #[test]
    fn test_frame_timing_within_packet() {
        let mut parser = AdtsParser::new();
        let mut out = Vec::new();

        let mut payload = Vec::new();
        for _ in 0..3 {
            payload.extend_from_slice(&adts_frame(4, 2, &[0u8; 8]));
        }
        parser.push(audio_pes(0, &payload), &mut out);

        assert_eq!(out.len(), 3);
        let frame_duration = 1024 * 90_000 / 44_100;
        for (i, frame) in out.iter().enumerate() {
            assert_eq!(frame.pts, i as i64 * frame_duration);
            assert_eq!(frame.dts, frame.pts);
        }
    }

    #[test]
    fn test_frame_num_resets_per_packet() {
        let mut parser = AdtsParser::new();
        let mut out = Vec::new();

        parser.push(audio_pes(0, &adts_frame(4, 2, &[0u8; 8])), &mut out);
        parser.push(audio_pes(10_000, &adts_frame(4, 2, &[0u8; 8])), &mut out);

        assert_eq!(out.len(), 2);
        assert_eq!(out[1].pts, 10_000);
    }

    #[test]
    fn test_frame_num_carries_in_partial_mode() {
        let mut parser = AdtsParser::with_partial_segments(true);
        let mut out = Vec::new();

        parser.push(audio_pes(0, &adts_frame(4, 2, &[0u8; 8])), &mut out);
        let mut second = audio_pes(0, &adts_frame(4, 2, &[0u8; 8]));
        second.pts = None;
        second.dts = None;
        parser.push(second, &mut out);

        let frame_duration = 1024 * 90_000 / 44_100;
        assert_eq!(out[1].pts, frame_duration);
    }

    #[test]
    fn test_partial_flush_keeps_frame_counter() {
        let mut parser = AdtsParser::with_partial_segments(true);
        let mut out = Vec::new();

        parser.push(audio_pes(0, &adts_frame(4, 2, &[0u8; 8])), &mut out);
        parser.partial_flush(&mut out);

        let mut next = audio_pes(0, &adts_frame(4, 2, &[0u8; 8]));
        next.pts = None;
        next.dts = None;
        parser.push(next, &mut out);

        let frame_duration = 1024 * 90_000 / 44_100;
        assert_eq!(out[1].pts, frame_duration);

        // A full flush restarts the timing for the next segment.
        parser.flush(&mut out);
        let mut after = audio_pes(0, &adts_frame(4, 2, &[0u8; 8]));
        after.pts = None;
        after.dts = None;
        parser.push(after, &mut out);
        assert_eq!(out[2].pts, 0);
    }

    #[test]
    fn test_partial_frame_waits_for_more_data() {
        let mut parser = AdtsParser::new();
        let mut out = Vec::new();

        let frame = adts_frame(4, 2, &[0xAA; 32]);
        let (head, tail) = frame.split_at(10);

        parser.push(audio_pes(0, head), &mut out);
        assert!(out.is_empty());

        parser.push(audio_pes(0, tail), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.len(), 32);
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut parser = AdtsParser::new();
        let mut out = Vec::new();

        let mut payload = vec![0x12, 0x34, 0xFF, 0x00]; // includes a fake sync start
        payload.extend_from_slice(&adts_frame(3, 1, &[0x55; 4]));
        parser.push(audio_pes(0, &payload), &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].samplerate, 48_000);
        assert_eq!(out[0].channel_count, 1);
    }

    #[test]
    fn test_video_packets_ignored() {
        let mut parser = AdtsParser::new();
        let mut out = Vec::new();

        let mut packet = audio_pes(0, &adts_frame(4, 2, &[0u8; 4]));
        packet.kind = StreamKind::Video;
        parser.push(packet, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_reset_drops_buffered_bytes() {
        let mut parser = AdtsParser::new();
        let mut out = Vec::new();

        let frame = adts_frame(4, 2, &[0xAA; 32]);
        parser.push(audio_pes(0, &frame[..10]), &mut out);
        parser.reset();
        parser.push(audio_pes(0, &frame[10..]), &mut out);
        // The tail alone has no sync word at a frame boundary.
        assert!(out.is_empty());
    }
}
