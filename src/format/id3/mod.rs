//! # ID3 timed metadata
//!
//! HLS carries timed metadata as ID3v2 tags inside a dedicated elementary
//! stream (TS) or interleaved with ADTS frames (raw AAC). Tag and frame
//! sizes use the 7-bit-per-byte synchsafe layout of ID3v2.4.

use bytes::{Buf, Bytes, BytesMut};
use log::trace;

use crate::av::{PesPacket, Stage, StreamKind};

/// Apple's PRIV owner carrying the MPEG-2 timestamp of the first sample
/// that follows a tag in a raw AAC stream.
pub const TIMESTAMP_PRIV_OWNER: &[u8] = b"com.apple.streaming.transportStreamTimestamp";

/// One frame inside an ID3 tag.
#[derive(Debug, Clone)]
pub struct Id3Frame {
    /// Four-character frame identifier (e.g. "TXXX", "PRIV")
    pub id: [u8; 4],
    /// Frame payload after the ten-byte frame header
    pub data: Bytes,
}

impl Id3Frame {
    /// For PRIV frames: the owner string and the bytes that follow it.
    pub fn priv_payload(&self) -> Option<(&[u8], &[u8])> {
        if &self.id != b"PRIV" {
            return None;
        }
        let end = self.data.iter().position(|&b| b == 0)?;
        Some((&self.data[..end], &self.data[end + 1..]))
    }
}

/// A complete ID3 tag with the timing of the PES packet that carried it.
#[derive(Debug, Clone)]
pub struct Id3Tag {
    /// Presentation timestamp, 90 kHz
    pub pts: Option<i64>,
    /// Decode timestamp, 90 kHz
    pub dts: Option<i64>,
    /// The raw tag bytes, header included
    pub data: Bytes,
    /// Parsed frames
    pub frames: Vec<Id3Frame>,
    /// Dispatch type identifying the metadata stream, from the PMT stream
    /// type of the carrying track
    pub dispatch_type: String,
}

/// Reads a 28-bit synchsafe integer (four 7-bit bytes).
pub fn parse_synchsafe_integer(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32 & 0x7F) << 21)
        | ((bytes[1] as u32 & 0x7F) << 14)
        | ((bytes[2] as u32 & 0x7F) << 7)
        | (bytes[3] as u32 & 0x7F)
}

/// Total byte length of the ID3 tag starting at `data[offset..]`, header
/// and optional footer included. `None` when the header is incomplete.
pub fn parse_id3_tag_size(data: &[u8], offset: usize) -> Option<usize> {
    if data.len() < offset + 10 {
        return None;
    }
    let mut size = parse_synchsafe_integer(&data[offset + 6..offset + 10]) as usize + 10;
    if data[offset + 5] & 0x10 != 0 {
        size += 10; // footer present
    }
    Some(size)
}

/// Byte offset of the first non-ID3 data, skipping consecutive tags.
pub fn get_id3_offset(data: &[u8]) -> usize {
    let mut offset = 0;
    while data.len() >= offset + 3 && &data[offset..offset + 3] == b"ID3" {
        match parse_id3_tag_size(data, offset) {
            Some(size) => offset += size,
            None => break,
        }
    }
    offset
}

/// Parses the frames of a complete tag.
fn parse_frames(tag: &[u8]) -> Vec<Id3Frame> {
    let mut frames = Vec::new();
    if tag.len() < 10 {
        return frames;
    }

    let mut frame_start = 10usize;
    if tag[5] & 0x40 != 0 {
        // skip the extended header
        if tag.len() >= 14 {
            frame_start += parse_synchsafe_integer(&tag[10..14]) as usize;
        }
    }
    let frame_end = tag.len();

    let mut offset = frame_start;
    while offset + 10 <= frame_end {
        let mut id = [0u8; 4];
        id.copy_from_slice(&tag[offset..offset + 4]);
        if id == [0; 4] {
            break; // padding
        }
        let size = parse_synchsafe_integer(&tag[offset + 4..offset + 8]) as usize;
        if size == 0 || offset + 10 + size > frame_end {
            break;
        }
        frames.push(Id3Frame {
            id,
            data: Bytes::copy_from_slice(&tag[offset + 10..offset + 10 + size]),
        });
        offset += 10 + size;
    }
    frames
}

/// Extracts the Apple transport-stream timestamp carried in a tag's PRIV
/// frame, when present.
pub fn parse_aac_timestamp(tag: &[u8]) -> Option<i64> {
    for frame in parse_frames(tag) {
        if let Some((owner, payload)) = frame.priv_payload() {
            if owner == TIMESTAMP_PRIV_OWNER && payload.len() >= 8 {
                let raw = u64::from_be_bytes([
                    payload[0], payload[1], payload[2], payload[3], payload[4], payload[5],
                    payload[6], payload[7],
                ]);
                return Some((raw & 0x1_FFFF_FFFF) as i64);
            }
        }
    }
    None
}

/// Reassembles and parses ID3 tags from timed-metadata PES packets.
#[derive(Debug, Default)]
pub struct Id3Parser {
    buffer: BytesMut,
    pts: Option<i64>,
    dts: Option<i64>,
    dispatch_type: Option<String>,
}

impl Id3Parser {
    /// Creates a parser with an empty tag buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_tags(&mut self, out: &mut Vec<Id3Tag>) {
        loop {
            if self.buffer.len() < 10 {
                return;
            }
            if &self.buffer[..3] != b"ID3" {
                trace!("skipping byte while searching for ID3 magic");
                self.buffer.advance(1);
                continue;
            }
            let size = match parse_id3_tag_size(&self.buffer, 0) {
                Some(size) => size,
                None => return,
            };
            if self.buffer.len() < size {
                return; // wait for the rest of the tag
            }

            let data = self.buffer.split_to(size).freeze();
            let frames = parse_frames(&data);
            out.push(Id3Tag {
                pts: self.pts,
                dts: self.dts,
                data,
                frames,
                dispatch_type: self
                    .dispatch_type
                    .clone()
                    .unwrap_or_else(|| "15".to_string()),
            });
        }
    }
}

impl Stage for Id3Parser {
    type Input = PesPacket;
    type Output = Id3Tag;

    fn push(&mut self, input: PesPacket, out: &mut Vec<Id3Tag>) {
        if input.kind != StreamKind::TimedMetadata {
            return;
        }
        if input.pts.is_some() {
            self.pts = input.pts;
            self.dts = input.dts;
        }
        // The first tag's stream type labels every later cue as well.
        if self.dispatch_type.is_none() {
            self.dispatch_type = Some(format!("{:02x}", input.stream_type));
        }
        self.buffer.extend_from_slice(&input.payload);
        self.parse_tags(out);
    }

    fn flush(&mut self, _out: &mut Vec<Id3Tag>) {}

    fn reset(&mut self) {
        self.buffer.clear();
        self.pts = None;
        self.dts = None;
    }
}
