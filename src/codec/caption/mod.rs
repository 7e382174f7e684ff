//! # CEA-608 caption extraction
//!
//! Closed captions ride in H.264 SEI messages as ATSC A/53 user data. This
//! module walks SEI payloads for the registered ITU-T T.35 message carrying
//! CEA-708 caption data, collects the embedded CEA-608 byte pairs, and runs
//! them through two channel decoders (CC1/CC2).
//!
//! SEI messages arrive in decode order while caption byte pairs are meant
//! to be applied in presentation order, so parsed packets are buffered and
//! sorted by PTS before decoding when the stream is flushed.

/// CEA-608 channel state machines (pop-on, roll-up, paint-on)
pub mod cea608;

pub use cea608::{Cea608Channel, Cue};

use bytes::Bytes;
use log::trace;

use crate::av::Stage;
use crate::codec::h264::{NalUnit, NalUnitKind};

/// sei_message payload type for user_data_registered_itu_t_t35
const USER_DATA_REGISTERED_ITU_T_T35: u32 = 4;
/// ATSC A/53 country code (United States)
const COUNTRY_CODE: u8 = 0xB5;
/// ATSC A/53 provider code
const PROVIDER_CODE: u16 = 0x0031;
/// ATSC A/53 user identifier, "GA94"
const USER_IDENTIFIER: u32 = 0x4741_3934;
/// user_data_type_code for caption data
const USER_DATA_TYPE_CC: u8 = 0x03;

/// One CEA-608 byte pair with the PTS of the SEI that carried it.
#[derive(Debug, Clone, Copy)]
struct CcPacket {
    pts: i64,
    cc_data: u16,
}

/// Walks an SEI RBSP and returns the caption user-data payloads inside it.
fn parse_sei_caption_payloads(rbsp: &[u8]) -> Vec<Bytes> {
    let mut payloads = Vec::new();
    let mut i = 0;

    while i + 1 < rbsp.len() {
        // 0xFF bytes extend both the type and size fields.
        let mut payload_type: u32 = 0;
        while i < rbsp.len() && rbsp[i] == 0xFF {
            payload_type += 255;
            i += 1;
        }
        if i >= rbsp.len() {
            break;
        }
        payload_type += rbsp[i] as u32;
        i += 1;

        let mut payload_size: usize = 0;
        while i < rbsp.len() && rbsp[i] == 0xFF {
            payload_size += 255;
            i += 1;
        }
        if i >= rbsp.len() {
            break;
        }
        payload_size += rbsp[i] as usize;
        i += 1;

        if i + payload_size > rbsp.len() {
            break;
        }
        if payload_type == USER_DATA_REGISTERED_ITU_T_T35 {
            if let Some(cc_data) = parse_user_data(&rbsp[i..i + payload_size]) {
                payloads.push(Bytes::copy_from_slice(cc_data));
            }
        }
        i += payload_size;
    }

    payloads
}

/// Validates the A/53 framing and returns the cc_data block.
fn parse_user_data(payload: &[u8]) -> Option<&[u8]> {
    if payload.len() < 9 {
        return None;
    }
    if payload[0] != COUNTRY_CODE {
        return None;
    }
    if ((payload[1] as u16) << 8) | payload[2] as u16 != PROVIDER_CODE {
        return None;
    }
    let user_identifier = u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]);
    if user_identifier != USER_IDENTIFIER || payload[7] != USER_DATA_TYPE_CC {
        return None;
    }
    Some(&payload[8..])
}

/// Extracts the CEA-608 field-1 byte pairs from a cc_data block.
fn parse_caption_packets(pts: i64, cc_data: &[u8], packets: &mut Vec<CcPacket>) {
    if cc_data.is_empty() || cc_data[0] & 0x40 == 0 {
        // process_cc_data_flag clear: nothing to render
        return;
    }
    let cc_count = (cc_data[0] & 0x1F) as usize;

    // cc_count byte + em_data byte, then three bytes per packet
    let mut offset = 2;
    for _ in 0..cc_count {
        if offset + 3 > cc_data.len() {
            break;
        }
        let cc_valid = cc_data[offset] & 0x04 != 0;
        let cc_type = cc_data[offset] & 0x03;
        // Only NTSC field-1 608 pairs are decoded here.
        if cc_valid && cc_type == 0 {
            packets.push(CcPacket {
                pts,
                cc_data: ((cc_data[offset + 1] as u16) << 8) | cc_data[offset + 2] as u16,
            });
        }
        offset += 3;
    }
}

/// Caption stage: SEI NAL units in, caption cues out.
///
/// Cues carry 90 kHz PTS values; the transmuxer translates them to seconds
/// relative to the segment timeline start before surfacing them.
#[derive(Debug)]
pub struct CaptionExtractor {
    packets: Vec<CcPacket>,
    channels: [Cea608Channel; 2],
    current_channel: usize,
    latest_pts: i64,
}

impl CaptionExtractor {
    /// Creates an extractor with empty channels.
    pub fn new() -> Self {
        Self {
            packets: Vec::new(),
            channels: [Cea608Channel::new("CC1"), Cea608Channel::new("CC2")],
            current_channel: 0,
            latest_pts: 0,
        }
    }

    fn decode_pending(&mut self, out: &mut Vec<Cue>) {
        // SEI messages arrive in decode order; captions apply in
        // presentation order.
        self.packets.sort_by_key(|packet| packet.pts);

        for packet in std::mem::take(&mut self.packets) {
            let data = packet.cc_data & 0x7F7F; // strip parity bits
            let char0 = (data >> 8) as u8;

            // Control codes select the data channel; printable pairs follow
            // the last selected channel.
            if (0x10..0x20).contains(&char0) {
                self.current_channel = ((char0 & 0x08) >> 3) as usize;
            }
            let normalized = if (0x10..0x20).contains(&char0) {
                data & !0x0800
            } else {
                data
            };
            self.channels[self.current_channel].push_pair(packet.pts, normalized, out);
        }
    }
}

impl Default for CaptionExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for CaptionExtractor {
    type Input = NalUnit;
    type Output = Cue;

    fn push(&mut self, input: NalUnit, _out: &mut Vec<Cue>) {
        if input.kind != NalUnitKind::Sei {
            return;
        }
        let rbsp = match &input.rbsp {
            Some(rbsp) => rbsp,
            None => return,
        };

        self.latest_pts = self.latest_pts.max(input.pts);
        for payload in parse_sei_caption_payloads(rbsp) {
            trace!("caption user data: {} bytes", payload.len());
            parse_caption_packets(input.pts, &payload, &mut self.packets);
        }
    }

    fn flush(&mut self, out: &mut Vec<Cue>) {
        self.decode_pending(out);
        let latest_pts = self.latest_pts;
        for channel in &mut self.channels {
            channel.flush_displayed(latest_pts, out);
        }
    }

    fn partial_flush(&mut self, out: &mut Vec<Cue>) {
        self.decode_pending(out);
    }

    fn reset(&mut self) {
        self.packets.clear();
        self.current_channel = 0;
        self.latest_pts = 0;
        for channel in &mut self.channels {
            channel.reset();
        }
    }
}
