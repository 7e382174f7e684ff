use bytes::Bytes;

/// Sampling frequencies addressable by the ADTS sampling_frequency_index.
pub const ADTS_SAMPLING_FREQUENCIES: &[u32] = &[
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

/// Looks up the sample rate for an ADTS sampling_frequency_index.
pub fn sampling_frequency(index: u8) -> Option<u32> {
    ADTS_SAMPLING_FREQUENCIES.get(index as usize).copied()
}

/// One AAC frame extracted from the ADTS layer.
///
/// Timestamps are per-frame: the carrying PES timestamp advanced by the
/// frame's position within the packet.
#[derive(Debug, Clone)]
pub struct AdtsFrame {
    /// Presentation timestamp, 90 kHz
    pub pts: i64,
    /// Decode timestamp, 90 kHz
    pub dts: i64,
    /// Samples per channel in this frame (1024 per raw data block)
    pub sample_count: u32,
    /// MPEG-4 audio object type (profile + 1)
    pub audio_object_type: u8,
    /// Channel configuration
    pub channel_count: u8,
    /// Sample rate in Hz
    pub samplerate: u32,
    /// ADTS sampling_frequency_index
    pub sampling_frequency_index: u8,
    /// Bits per sample as signalled to the MP4 sample entry
    pub sample_size: u8,
    /// Raw AAC payload (after the ADTS header and optional CRC)
    pub data: Bytes,
}

impl AdtsFrame {
    /// Duration of this frame in 90 kHz ticks.
    pub fn duration_ts(&self) -> i64 {
        self.sample_count as i64 * 90_000 / self.samplerate as i64
    }
}

// Pre-encoded silent AAC raw data blocks, stereo, keyed by
// sampling_frequency_index. Used to pad the front of an audio segment when
// video starts earlier than the first real audio frame.
const SILENT_FRAME: &[u8] = &[0x21, 0x10, 0x04, 0x60, 0x8C, 0x1C];

/// Returns a silent AAC frame payload for the given sampling frequency
/// index, when one is available.
pub fn silent_frame(sampling_frequency_index: u8) -> Option<&'static [u8]> {
    // One silent raw data block serves every supported rate; rates outside
    // the ADTS table get no fill.
    sampling_frequency(sampling_frequency_index).map(|_| SILENT_FRAME)
}
