use bytes::Bytes;

/// H.264/AVC NAL unit types the pipeline cares about, per ITU-T H.264
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitKind {
    /// Coded slice of a non-IDR picture
    SliceLayerWithoutPartitioning = 1,
    /// Coded slice of an IDR picture (keyframe)
    SliceLayerWithoutPartitioningIdr = 5,
    /// Supplemental Enhancement Information
    Sei = 6,
    /// Sequence Parameter Set
    SeqParameterSet = 7,
    /// Picture Parameter Set
    PicParameterSet = 8,
    /// Access Unit Delimiter (frame boundary)
    AccessUnitDelimiter = 9,
    /// Anything else
    Unspecified = 0,
}

impl From<u8> for NalUnitKind {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            1 => NalUnitKind::SliceLayerWithoutPartitioning,
            5 => NalUnitKind::SliceLayerWithoutPartitioningIdr,
            6 => NalUnitKind::Sei,
            7 => NalUnitKind::SeqParameterSet,
            8 => NalUnitKind::PicParameterSet,
            9 => NalUnitKind::AccessUnitDelimiter,
            _ => NalUnitKind::Unspecified,
        }
    }
}

/// Configuration parsed from a sequence parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    /// profile_idc
    pub profile_idc: u8,
    /// The constraint-set flags byte following the profile
    pub profile_compatibility: u8,
    /// level_idc
    pub level_idc: u8,
    /// Display width in pixels after cropping
    pub width: u32,
    /// Display height in pixels after cropping
    pub height: u32,
}

/// One NAL unit with the timing of the PES packet that carried it.
///
/// `data` keeps the bytes exactly as they appeared on the wire (emulation
/// prevention intact) so they can be copied into an output `mdat`; `rbsp`
/// carries the emulation-stripped payload for the NAL kinds that get
/// bitstream-parsed (SPS and SEI).
#[derive(Debug, Clone)]
pub struct NalUnit {
    /// Parsed NAL unit type
    pub kind: NalUnitKind,
    /// PID of the PES stream the unit came from
    pub track_id: u16,
    /// Presentation timestamp of the carrying PES packet, 90 kHz
    pub pts: i64,
    /// Decode timestamp of the carrying PES packet, 90 kHz
    pub dts: i64,
    /// Raw NAL bytes including the header byte
    pub data: Bytes,
    /// Emulation-stripped payload (SPS and SEI only)
    pub rbsp: Option<Bytes>,
    /// Parsed configuration (SPS only)
    pub sps: Option<SpsInfo>,
}

impl NalUnit {
    /// True for IDR slices.
    pub fn is_keyframe(&self) -> bool {
        self.kind == NalUnitKind::SliceLayerWithoutPartitioningIdr
    }
}
