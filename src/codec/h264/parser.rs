use bytes::{Buf, Bytes, BytesMut};
use log::trace;

use super::types::{NalUnit, NalUnitKind, SpsInfo};
use crate::av::{PesPacket, Stage, StreamKind};
use crate::error::Result;
use crate::utils::ExpGolombReader;

/// Profiles for which the SPS carries chroma format and bit depth fields.
const PROFILES_WITH_OPTIONAL_CHROMA_FORMAT: &[u8] =
    &[100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

/// Splits an Annex B byte stream into NAL units.
///
/// Scans for 0x000001 / 0x00000001 start codes and emits the bytes between
/// them. A unit is only emitted once the following start code confirms its
/// end, so a unit split across pushes stays buffered; `flush` emits the
/// trailing unit.
#[derive(Debug, Default)]
struct NalByteStream {
    buffer: BytesMut,
    scan_pos: usize,
    synced: bool,
}

impl NalByteStream {
    fn push(&mut self, data: &[u8], out: &mut Vec<Bytes>) {
        self.buffer.extend_from_slice(data);

        loop {
            let buf = &self.buffer;
            let mut found = None;
            let mut i = self.scan_pos;
            while i + 3 <= buf.len() {
                if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
                    found = Some(i);
                    break;
                }
                i += 1;
            }

            match found {
                Some(pos) => {
                    if self.synced {
                        // A four-byte start code owns the zero before it.
                        let mut end = pos;
                        if end > 0 && buf[end - 1] == 0 {
                            end -= 1;
                        }
                        if end > 0 {
                            out.push(Bytes::copy_from_slice(&buf[..end]));
                        }
                    }
                    self.synced = true;
                    self.buffer.advance(pos + 3);
                    self.scan_pos = 0;
                }
                None => {
                    self.scan_pos = self.buffer.len().saturating_sub(2);
                    break;
                }
            }
        }
    }

    fn flush(&mut self, out: &mut Vec<Bytes>) {
        if self.synced && !self.buffer.is_empty() {
            out.push(self.buffer.split().freeze());
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.scan_pos = 0;
        self.synced = false;
    }
}

/// Removes emulation prevention bytes: every 0x03 that follows 0x0000 is
/// dropped, recovering the raw byte sequence payload (RBSP).
pub fn discard_emulation_prevention_bytes(data: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if i + 2 < data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 3 {
            rbsp.push(0);
            rbsp.push(0);
            i += 3;
        } else {
            rbsp.push(data[i]);
            i += 1;
        }
    }
    rbsp
}

fn skip_scaling_list(reader: &mut ExpGolombReader<'_>, count: u32) -> Result<()> {
    let mut last_scale: i32 = 8;
    let mut next_scale: i32 = 8;
    for _ in 0..count {
        if next_scale != 0 {
            let delta_scale = reader.read_signed_exp_golomb()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// Parses the fields of a sequence parameter set needed to describe the
/// video track: profile, level, and cropped resolution.
pub fn parse_sequence_parameter_set(rbsp: &[u8]) -> Result<SpsInfo> {
    let mut reader = ExpGolombReader::new(rbsp);

    let profile_idc = reader.read_unsigned_byte()?;
    let profile_compatibility = reader.read_unsigned_byte()?;
    let level_idc = reader.read_unsigned_byte()?;
    reader.skip_unsigned_exp_golomb()?; // seq_parameter_set_id

    if PROFILES_WITH_OPTIONAL_CHROMA_FORMAT.contains(&profile_idc) {
        let chroma_format_idc = reader.read_unsigned_exp_golomb()?;
        if chroma_format_idc == 3 {
            reader.skip_bits(1)?; // separate_colour_plane_flag
        }
        reader.skip_unsigned_exp_golomb()?; // bit_depth_luma_minus8
        reader.skip_unsigned_exp_golomb()?; // bit_depth_chroma_minus8
        reader.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if reader.read_boolean()? {
            // seq_scaling_matrix_present_flag
            let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..list_count {
                if reader.read_boolean()? {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    reader.skip_unsigned_exp_golomb()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = reader.read_unsigned_exp_golomb()?;
    match pic_order_cnt_type {
        0 => reader.skip_unsigned_exp_golomb()?, // log2_max_pic_order_cnt_lsb_minus4
        1 => {
            reader.skip_bits(1)?; // delta_pic_order_always_zero_flag
            reader.skip_signed_exp_golomb()?; // offset_for_non_ref_pic
            reader.skip_signed_exp_golomb()?; // offset_for_top_to_bottom_field
            let num_ref_frames_in_pic_order_cnt_cycle = reader.read_unsigned_exp_golomb()?;
            for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
                reader.skip_signed_exp_golomb()?; // offset_for_ref_frame
            }
        }
        _ => {}
    }

    reader.skip_unsigned_exp_golomb()?; // max_num_ref_frames
    reader.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs_minus1 = reader.read_unsigned_exp_golomb()?;
    let pic_height_in_map_units_minus1 = reader.read_unsigned_exp_golomb()?;

    let frame_mbs_only_flag = reader.read_bits(1)?;
    if frame_mbs_only_flag == 0 {
        reader.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    reader.skip_bits(1)?; // direct_8x8_inference_flag

    let mut frame_crop_left_offset = 0;
    let mut frame_crop_right_offset = 0;
    let mut frame_crop_top_offset = 0;
    let mut frame_crop_bottom_offset = 0;
    if reader.read_boolean()? {
        // frame_cropping_flag
        frame_crop_left_offset = reader.read_unsigned_exp_golomb()?;
        frame_crop_right_offset = reader.read_unsigned_exp_golomb()?;
        frame_crop_top_offset = reader.read_unsigned_exp_golomb()?;
        frame_crop_bottom_offset = reader.read_unsigned_exp_golomb()?;
    }

    Ok(SpsInfo {
        profile_idc,
        profile_compatibility,
        level_idc,
        width: (pic_width_in_mbs_minus1 + 1) * 16
            - frame_crop_left_offset * 2
            - frame_crop_right_offset * 2,
        height: (2 - frame_mbs_only_flag) * (pic_height_in_map_units_minus1 + 1) * 16
            - frame_crop_top_offset * 2
            - frame_crop_bottom_offset * 2,
    })
}

/// Extracts NAL units from video PES packets and tags them with their type.
///
/// SPS units additionally get a parsed [`SpsInfo`] and their stripped RBSP;
/// SEI units get their stripped RBSP so the caption extractor can read the
/// user-data payload. A NAL whose SPS fails to parse is discarded.
#[derive(Debug, Default)]
pub struct H264Parser {
    byte_stream: NalByteStream,
    track_id: u16,
    pts: i64,
    dts: i64,
}

impl H264Parser {
    /// Creates a parser with an empty byte-stream buffer.
    pub fn new() -> Self {
        Self::default()
    }

    fn interpret(&self, data: Bytes, out: &mut Vec<NalUnit>) {
        if data.is_empty() {
            return;
        }
        let kind = NalUnitKind::from(data[0]);

        let mut unit = NalUnit {
            kind,
            track_id: self.track_id,
            pts: self.pts,
            dts: self.dts,
            data,
            rbsp: None,
            sps: None,
        };

        match kind {
            NalUnitKind::SeqParameterSet => {
                let rbsp = discard_emulation_prevention_bytes(&unit.data[1..]);
                match parse_sequence_parameter_set(&rbsp) {
                    Ok(sps) => {
                        unit.sps = Some(sps);
                        unit.rbsp = Some(Bytes::from(rbsp));
                    }
                    Err(err) => {
                        trace!("discarding unparseable SPS: {}", err);
                        return;
                    }
                }
            }
            NalUnitKind::Sei => {
                unit.rbsp = Some(Bytes::from(discard_emulation_prevention_bytes(
                    &unit.data[1..],
                )));
            }
            _ => {}
        }

        out.push(unit);
    }
}

impl Stage for H264Parser {
    type Input = PesPacket;
    type Output = NalUnit;

    fn push(&mut self, input: PesPacket, out: &mut Vec<NalUnit>) {
        if input.kind != StreamKind::Video {
            return;
        }
        self.track_id = input.track_id;
        if let Some(pts) = input.pts {
            self.pts = pts;
        }
        if let Some(dts) = input.dts {
            self.dts = dts;
        }

        let mut raw_units = Vec::new();
        self.byte_stream.push(&input.payload, &mut raw_units);
        for raw in raw_units {
            self.interpret(raw, out);
        }
    }

    fn flush(&mut self, out: &mut Vec<NalUnit>) {
        let mut raw_units = Vec::new();
        self.byte_stream.flush(&mut raw_units);
        for raw in raw_units {
            self.interpret(raw, out);
        }
    }

    fn partial_flush(&mut self, out: &mut Vec<NalUnit>) {
        self.flush(out);
    }

    fn end_timeline(&mut self, out: &mut Vec<NalUnit>) {
        self.flush(out);
    }

    fn reset(&mut self) {
        self.byte_stream.reset();
    }
}
