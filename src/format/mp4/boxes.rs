//! ISO BMFF box serialization.
//!
//! Field layouts per ISO/IEC 14496-12. Everything is written big-endian
//! into freshly allocated buffers; boxes nest by concatenating the payloads
//! of their children. Initialization segments carry `ftyp` + `moov`; every
//! media segment is one `moof` followed by the `mdat` holding exactly the
//! payload bytes its `trun` describes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::av::StreamKind;

use super::track::Track;

/// Sample flag fields carried in a `trun` entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4SampleFlags {
    /// is_leading (2 bits)
    pub is_leading: u8,
    /// sample_depends_on (2 bits): 1 = depends on others, 2 = does not
    pub depends_on: u8,
    /// sample_is_depended_on (2 bits)
    pub is_depended_on: u8,
    /// sample_has_redundancy (2 bits)
    pub has_redundancy: u8,
    /// padding_value (3 bits)
    pub padding_value: u8,
    /// sample_is_non_sync_sample (1 bit): 0 only for sync samples
    pub is_non_sync_sample: u8,
    /// degradation_priority (16 bits)
    pub degradation_priority: u16,
}

/// One entry of a `trun` sample table.
#[derive(Debug, Clone, Copy)]
pub struct Mp4Sample {
    /// sample_duration in track timescale ticks
    pub duration: u32,
    /// sample_size in bytes
    pub size: u32,
    /// sample_flags; omitted from audio runs
    pub flags: Option<Mp4SampleFlags>,
    /// sample_composition_time_offset (pts - dts)
    pub composition_time_offset: i32,
}

fn make_box(kind: &[u8; 4], payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + payload.len());
    buf.put_u32((8 + payload.len()) as u32);
    buf.put_slice(kind);
    buf.put_slice(payload);
    buf.freeze()
}

fn full_box(kind: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(12 + payload.len());
    buf.put_u32((12 + payload.len()) as u32);
    buf.put_slice(kind);
    buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
    buf.put_slice(payload);
    buf.freeze()
}

/// File type box for the initialization segment.
pub fn ftyp() -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_slice(b"isom"); // major brand
    payload.put_u32(1); // minor version
    payload.put_slice(b"isom");
    payload.put_slice(b"avc1");
    make_box(b"ftyp", &payload)
}

const MATRIX: [u8; 36] = [
    0x00, 0x01, 0x00, 0x00, // a = 1.0
    0x00, 0x00, 0x00, 0x00, // b
    0x00, 0x00, 0x00, 0x00, // u
    0x00, 0x00, 0x00, 0x00, // c
    0x00, 0x01, 0x00, 0x00, // d = 1.0
    0x00, 0x00, 0x00, 0x00, // v
    0x00, 0x00, 0x00, 0x00, // x
    0x00, 0x00, 0x00, 0x00, // y
    0x40, 0x00, 0x00, 0x00, // w = 1.0
];

fn mvhd(timescale: u32) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u32(0); // creation_time
    payload.put_u32(0); // modification_time
    payload.put_u32(timescale);
    payload.put_u32(0xFFFF_FFFF); // duration unknown for live content
    payload.put_u32(0x0001_0000); // rate 1.0
    payload.put_u16(0x0100); // volume 1.0
    payload.put_u16(0); // reserved
    payload.put_u64(0); // reserved
    payload.put_slice(&MATRIX);
    payload.put_slice(&[0u8; 24]); // pre_defined
    payload.put_u32(0xFFFF_FFFF); // next_track_ID
    full_box(b"mvhd", 0, 0, &payload)
}

fn tkhd(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u32(0); // creation_time
    payload.put_u32(0); // modification_time
    payload.put_u32(track.id);
    payload.put_u32(0); // reserved
    payload.put_u32(0xFFFF_FFFF); // duration unknown
    payload.put_u64(0); // reserved
    payload.put_u16(0); // layer
    payload.put_u16(0); // alternate_group
    if track.kind == Some(StreamKind::Audio) {
        payload.put_u16(0x0100); // volume 1.0
    } else {
        payload.put_u16(0);
    }
    payload.put_u16(0); // reserved
    payload.put_slice(&MATRIX);
    payload.put_u32(track.width << 16); // 16.16 fixed point
    payload.put_u32(track.height << 16);
    // flags: track_enabled | track_in_movie | track_in_preview
    full_box(b"tkhd", 0, 0x000007, &payload)
}

fn mdhd(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u32(0); // creation_time
    payload.put_u32(0); // modification_time
    payload.put_u32(track.timescale());
    payload.put_u32(0); // duration
    payload.put_u16(0x55C4); // language: und
    payload.put_u16(0); // pre_defined
    full_box(b"mdhd", 0, 0, &payload)
}

fn hdlr(track: &Track) -> Bytes {
    let (handler_type, name): (&[u8; 4], &[u8]) = if track.kind == Some(StreamKind::Audio) {
        (b"soun", b"SoundHandler\0")
    } else {
        (b"vide", b"VideoHandler\0")
    };
    let mut payload = BytesMut::new();
    payload.put_u32(0); // pre_defined
    payload.put_slice(handler_type);
    payload.put_slice(&[0u8; 12]); // reserved
    payload.put_slice(name);
    full_box(b"hdlr", 0, 0, &payload)
}

fn dinf() -> Bytes {
    let url = full_box(b"url ", 0, 0x000001, &[]); // self-contained
    let mut dref_payload = BytesMut::new();
    dref_payload.put_u32(1); // entry_count
    dref_payload.put_slice(&url);
    let dref = full_box(b"dref", 0, 0, &dref_payload);
    make_box(b"dinf", &dref)
}

fn vmhd() -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u16(0); // graphicsmode
    payload.put_slice(&[0u8; 6]); // opcolor
    full_box(b"vmhd", 0, 0x000001, &payload)
}

fn smhd() -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u16(0); // balance
    payload.put_u16(0); // reserved
    full_box(b"smhd", 0, 0, &payload)
}

/// AVC decoder configuration record built from the track's parameter sets.
fn avcc(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u8(0x01); // configurationVersion
    payload.put_u8(track.profile_idc);
    payload.put_u8(track.profile_compatibility);
    payload.put_u8(track.level_idc);
    payload.put_u8(0xFF); // lengthSizeMinusOne: 4-byte NAL lengths
    payload.put_u8(0xE0 | (track.sps.len() as u8 & 0x1F));
    for sps in &track.sps {
        payload.put_u16(sps.len() as u16);
        payload.put_slice(sps);
    }
    payload.put_u8(track.pps.len() as u8);
    for pps in &track.pps {
        payload.put_u16(pps.len() as u16);
        payload.put_slice(pps);
    }
    make_box(b"avcC", &payload)
}

fn avc1(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_slice(&[0u8; 6]); // reserved
    payload.put_u16(1); // data_reference_index
    payload.put_u16(0); // pre_defined
    payload.put_u16(0); // reserved
    payload.put_slice(&[0u8; 12]); // pre_defined
    payload.put_u16(track.width as u16);
    payload.put_u16(track.height as u16);
    payload.put_u32(0x0048_0000); // horizresolution 72 dpi
    payload.put_u32(0x0048_0000); // vertresolution 72 dpi
    payload.put_u32(0); // reserved
    payload.put_u16(1); // frame_count
    payload.put_slice(&[0u8; 32]); // compressorname
    payload.put_u16(0x0018); // depth
    payload.put_u16(0xFFFF); // pre_defined
    payload.put_slice(&avcc(track));
    make_box(b"avc1", &payload)
}

fn esds(track: &Track) -> Bytes {
    let freq_index = track.sampling_frequency_index;
    let mut payload = BytesMut::new();

    payload.put_u8(0x03); // ES_DescrTag
    payload.put_u8(25); // length
    payload.put_u16(0); // ES_ID
    payload.put_u8(0); // stream priority

    payload.put_u8(0x04); // DecoderConfigDescrTag
    payload.put_u8(17); // length
    payload.put_u8(0x40); // object type: MPEG-4 AAC
    payload.put_u8(0x15); // stream type: audio
    payload.put_slice(&[0, 0, 0]); // bufferSizeDB
    payload.put_u32(0); // maxBitrate
    payload.put_u32(0); // avgBitrate

    payload.put_u8(0x05); // DecSpecificInfoTag
    payload.put_u8(2); // length
    // AudioSpecificConfig: object type, frequency index, channel config
    payload.put_u8((track.audio_object_type << 3) | ((freq_index & 0x0E) >> 1));
    payload.put_u8(((freq_index & 0x01) << 7) | ((track.channel_count & 0x0F) << 3));

    payload.put_u8(0x06); // SLConfigDescrTag
    payload.put_u8(1); // length
    payload.put_u8(0x02); // predefined: MP4

    full_box(b"esds", 0, 0, &payload)
}

fn mp4a(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_slice(&[0u8; 6]); // reserved
    payload.put_u16(1); // data_reference_index
    payload.put_u64(0); // reserved
    payload.put_u16(track.channel_count as u16);
    payload.put_u16(track.sample_size as u16);
    payload.put_u32(0); // pre_defined + reserved
    payload.put_u16(track.samplerate as u16); // 16.16 fixed point
    payload.put_u16(0);
    payload.put_slice(&esds(track));
    make_box(b"mp4a", &payload)
}

fn stsd(track: &Track) -> Bytes {
    let entry = if track.kind == Some(StreamKind::Audio) {
        mp4a(track)
    } else {
        avc1(track)
    };
    let mut payload = BytesMut::new();
    payload.put_u32(1); // entry_count
    payload.put_slice(&entry);
    full_box(b"stsd", 0, 0, &payload)
}

fn stbl(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_slice(&stsd(track));
    // Sample tables stay empty; every sample lives in a movie fragment.
    payload.put_slice(&full_box(b"stts", 0, 0, &0u32.to_be_bytes()));
    payload.put_slice(&full_box(b"stsc", 0, 0, &0u32.to_be_bytes()));
    payload.put_slice(&full_box(b"stsz", 0, 0, &[0u8; 8]));
    payload.put_slice(&full_box(b"stco", 0, 0, &0u32.to_be_bytes()));
    make_box(b"stbl", &payload)
}

fn minf(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    if track.kind == Some(StreamKind::Audio) {
        payload.put_slice(&smhd());
    } else {
        payload.put_slice(&vmhd());
    }
    payload.put_slice(&dinf());
    payload.put_slice(&stbl(track));
    make_box(b"minf", &payload)
}

fn mdia(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_slice(&mdhd(track));
    payload.put_slice(&hdlr(track));
    payload.put_slice(&minf(track));
    make_box(b"mdia", &payload)
}

fn trak(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_slice(&tkhd(track));
    payload.put_slice(&mdia(track));
    make_box(b"trak", &payload)
}

fn trex(track: &Track) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u32(track.id);
    payload.put_u32(1); // default_sample_description_index
    payload.put_u32(0); // default_sample_duration
    payload.put_u32(0); // default_sample_size
    payload.put_u32(0x0001_0001); // default_sample_flags
    full_box(b"trex", 0, 0, &payload)
}

fn mvex(tracks: &[&Track]) -> Bytes {
    let mut payload = BytesMut::new();
    for track in tracks {
        payload.put_slice(&trex(track));
    }
    make_box(b"mvex", &payload)
}

/// Movie box describing the given tracks.
pub fn moov(tracks: &[&Track]) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_slice(&mvhd(90_000));
    for track in tracks {
        payload.put_slice(&trak(track));
    }
    payload.put_slice(&mvex(tracks));
    make_box(b"moov", &payload)
}

/// Complete initialization segment (`ftyp` + `moov`).
pub fn init_segment(tracks: &[&Track]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_slice(&ftyp());
    buf.put_slice(&moov(tracks));
    buf.freeze()
}

fn mfhd(sequence_number: u32) -> Bytes {
    full_box(b"mfhd", 0, 0, &sequence_number.to_be_bytes())
}

fn tfhd(track: &Track) -> Bytes {
    // default-base-is-moof: run offsets are relative to the moof start.
    full_box(b"tfhd", 0, 0x020000, &track.id.to_be_bytes())
}

fn tfdt(track: &Track) -> Bytes {
    full_box(b"tfdt", 1, 0, &track.base_media_decode_time.to_be_bytes())
}

fn sample_flag_bytes(flags: &Mp4SampleFlags) -> [u8; 4] {
    [
        (flags.is_leading << 2) | flags.depends_on,
        (flags.is_depended_on << 6)
            | (flags.has_redundancy << 4)
            | (flags.padding_value << 1)
            | flags.is_non_sync_sample,
        (flags.degradation_priority >> 8) as u8,
        flags.degradation_priority as u8,
    ]
}

fn trun(track: &Track, samples: &[Mp4Sample], data_offset: i32) -> Bytes {
    // data-offset | sample-duration | sample-size, plus flags and
    // composition offsets for video runs.
    let video = track.kind != Some(StreamKind::Audio);
    let flags: u32 = if video { 0x000F01 } else { 0x000301 };

    let mut payload = BytesMut::new();
    payload.put_u32(samples.len() as u32);
    payload.put_i32(data_offset);
    for sample in samples {
        payload.put_u32(sample.duration);
        payload.put_u32(sample.size);
        if video {
            payload.put_slice(&sample_flag_bytes(&sample.flags.unwrap_or_default()));
            payload.put_i32(sample.composition_time_offset);
        }
    }
    full_box(b"trun", 0, flags, &payload)
}

/// Size of the trun box for a run of `sample_count` samples.
fn trun_size(video: bool, sample_count: usize) -> usize {
    let per_sample = if video { 16 } else { 8 };
    12 + 4 + 4 + sample_count * per_sample
}

/// Movie fragment for one track.
///
/// The trun data offset points at the first payload byte of the `mdat`
/// that must immediately follow this box.
pub fn moof(sequence_number: u32, track: &Track, samples: &[Mp4Sample]) -> Bytes {
    let video = track.kind != Some(StreamKind::Audio);
    let traf_size = 8 + 16 + 20 + trun_size(video, samples.len());
    let moof_size = 8 + 16 + traf_size;
    let data_offset = (moof_size + 8) as i32;

    let mut traf_payload = BytesMut::new();
    traf_payload.put_slice(&tfhd(track));
    traf_payload.put_slice(&tfdt(track));
    traf_payload.put_slice(&trun(track, samples, data_offset));
    let traf = make_box(b"traf", &traf_payload);

    let mut payload = BytesMut::new();
    payload.put_slice(&mfhd(sequence_number));
    payload.put_slice(&traf);
    let moof = make_box(b"moof", &payload);

    debug_assert_eq!(moof.len(), moof_size);
    moof
}

/// Media data box wrapping the given payload bytes.
pub fn mdat(data: &[u8]) -> Bytes {
    make_box(b"mdat", data)
}

/// Segment index box referencing one subsegment.
///
/// Not part of the default segment output, which is exactly `moof`+`mdat`;
/// callers that index their own segments emit this ahead of the fragment.
pub fn sidx(
    track: &Track,
    earliest_presentation_time: u64,
    referenced_size: u32,
    subsegment_duration: u32,
) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u32(track.id); // reference_ID
    payload.put_u32(track.timescale());
    payload.put_u64(earliest_presentation_time);
    payload.put_u64(0); // first_offset
    payload.put_u16(0); // reserved
    payload.put_u16(1); // reference_count
    payload.put_u32(referenced_size & 0x7FFF_FFFF); // reference_type 0 | size
    payload.put_u32(subsegment_duration);
    payload.put_u32(0x9000_0000); // starts_with_SAP, SAP_type 1
    full_box(b"sidx", 1, 0, &payload)
}
