//! # Raw AAC stream framing
//!
//! HLS audio-only renditions ship a bare concatenation of ID3 tags and
//! ADTS frames rather than a transport stream. The framer splits that byte
//! stream into timed-metadata and audio packets compatible with the rest
//! of the pipeline: ID3 tags update the running timestamp (from Apple's
//! transport-stream-timestamp PRIV frame) and ADTS frames are forwarded
//! stamped with it.

use bytes::{Buf, Bytes, BytesMut};
use log::trace;

use crate::av::{PesPacket, Stage, StreamKind};
use crate::format::id3::{get_id3_offset, parse_aac_timestamp, parse_id3_tag_size};
use crate::format::ts::{STREAM_TYPE_ADTS, STREAM_TYPE_METADATA};

/// Returns true when the data looks like a raw AAC stream: optional ID3
/// tags followed by an ADTS sync word.
pub fn is_likely_aac_data(data: &[u8]) -> bool {
    let offset = get_id3_offset(data);
    data.len() >= offset + 2
        && data[offset] == 0xFF
        && (data[offset + 1] & 0xF0) == 0xF0
        && (data[offset + 1] & 0x16) == 0x10
}

/// Byte length of the ADTS frame starting at `data[offset..]`, or `None`
/// when the header is incomplete.
fn parse_adts_size(data: &[u8], offset: usize) -> Option<usize> {
    if data.len() < offset + 6 {
        return None;
    }
    let low_three = (data[offset + 5] >> 5) as usize;
    let middle = (data[offset + 4] as usize) << 3;
    let high_two = (data[offset + 3] as usize & 0x03) << 11;
    Some(high_two | middle | low_three)
}

/// Splits a raw ID3/ADTS byte stream into typed packets.
#[derive(Debug)]
pub struct AacFramer {
    buffer: BytesMut,
    timestamp: i64,
}

impl AacFramer {
    /// Creates a framer with no buffered data.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
            timestamp: 0,
        }
    }

    fn emit(&self, kind: StreamKind, stream_type: u8, data: Bytes) -> PesPacket {
        PesPacket {
            kind,
            track_id: 0,
            stream_type,
            pts: Some(self.timestamp),
            dts: Some(self.timestamp),
            data_alignment: true,
            payload: data,
        }
    }
}

impl Default for AacFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for AacFramer {
    type Input = Bytes;
    type Output = PesPacket;

    fn push(&mut self, input: Bytes, out: &mut Vec<PesPacket>) {
        self.buffer.extend_from_slice(&input);

        while self.buffer.len() >= 3 {
            if &self.buffer[..3] == b"ID3" {
                let size = match parse_id3_tag_size(&self.buffer, 0) {
                    Some(size) if size <= self.buffer.len() => size,
                    _ => break, // wait for the whole tag
                };
                let tag = self.buffer.split_to(size).freeze();
                if let Some(timestamp) = parse_aac_timestamp(&tag) {
                    self.timestamp = timestamp;
                }
                out.push(self.emit(StreamKind::TimedMetadata, STREAM_TYPE_METADATA, tag));
                continue;
            }

            if self.buffer[0] == 0xFF && self.buffer[1] & 0xF6 == 0xF0 {
                let size = match parse_adts_size(&self.buffer, 0) {
                    Some(size) if size >= 7 => size,
                    Some(_) => {
                        self.buffer.advance(1);
                        continue;
                    }
                    None => break,
                };
                if size > self.buffer.len() {
                    break; // wait for the whole frame
                }
                let frame = self.buffer.split_to(size).freeze();
                out.push(self.emit(StreamKind::Audio, STREAM_TYPE_ADTS, frame));
                continue;
            }

            trace!("skipping byte while searching for ID3 or ADTS sync");
            self.buffer.advance(1);
        }
    }

    fn flush(&mut self, _out: &mut Vec<PesPacket>) {}

    fn reset(&mut self) {
        self.buffer.clear();
        self.timestamp = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::id3::test_utils::{build_tag, timestamp_priv};
    use pretty_assertions::assert_eq;

    fn adts_frame(payload: &[u8]) -> Vec<u8> {
        let frame_length = 7 + payload.len();
        let mut frame = vec![
            0xFF,
            0xF1,
            0x50,
            0x80 | ((frame_length >> 11) as u8 & 0x03),
            (frame_length >> 3) as u8,
            ((frame_length << 5) as u8 & 0xE0) | 0x1F,
            0xFC,
        ];
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_detection() {
        // Plain ADTS
        assert!(is_likely_aac_data(&adts_frame(&[0u8; 4])));
        // ID3 tag followed by ADTS
        let mut data = build_tag(&[timestamp_priv(0)]);
        data.extend_from_slice(&adts_frame(&[0u8; 4]));
        assert!(is_likely_aac_data(&data));
        // A transport stream is not AAC
        assert!(!is_likely_aac_data(&[0x47, 0x40, 0x00, 0x10]));
        // An MPEG audio sync with the layer bits set is not ADTS
        assert!(!is_likely_aac_data(&[0xFF, 0xFB, 0x90]));
    }

    #[test]
    fn test_id3_timestamp_applied_to_audio() {
        let mut framer = AacFramer::new();
        let mut out = Vec::new();

        let mut data = build_tag(&[timestamp_priv(900_000)]);
        data.extend_from_slice(&adts_frame(&[0xAB; 8]));
        framer.push(Bytes::from(data), &mut out);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].kind, StreamKind::TimedMetadata);
        assert_eq!(out[1].kind, StreamKind::Audio);
        assert_eq!(out[1].pts, Some(900_000));
        assert_eq!(out[1].payload.len(), 15);
    }

    #[test]
    fn test_partial_frame_buffers() {
        let mut framer = AacFramer::new();
        let mut out = Vec::new();

        let frame = adts_frame(&[0xCD; 32]);
        let (head, tail) = frame.split_at(20);
        framer.push(Bytes::copy_from_slice(head), &mut out);
        assert!(out.is_empty());
        framer.push(Bytes::copy_from_slice(tail), &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_garbage_resync() {
        let mut framer = AacFramer::new();
        let mut out = Vec::new();

        let mut data = vec![0x00, 0x11, 0x22];
        data.extend_from_slice(&adts_frame(&[0xEE; 4]));
        framer.push(Bytes::from(data), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, StreamKind::Audio);
    }

    #[test]
    fn test_reset_clears_timestamp() {
        let mut framer = AacFramer::new();
        let mut out = Vec::new();

        framer.push(Bytes::from(build_tag(&[timestamp_priv(900_000)])), &mut out);
        framer.reset();
        framer.push(Bytes::from(adts_frame(&[0x00; 4])), &mut out);

        let audio = out.iter().find(|p| p.kind == StreamKind::Audio).unwrap();
        assert_eq!(audio.pts, Some(0));
    }
}
