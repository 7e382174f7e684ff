//! Transmuxer configuration options.
//!
//! All options have conservative defaults; a `TransmuxConfig::default()` is
//! what a typical MSE player wants: timestamps normalized so the first
//! segment starts at decode time zero.

/// Options controlling how segments are timed and assembled.
#[derive(Debug, Clone)]
pub struct TransmuxConfig {
    /// Offset, in 90 kHz ticks, added to the base media decode time of every
    /// track when timestamps are normalized.
    pub base_media_decode_time: u64,
    /// When true, emitted decode/presentation times equal the input PTS/DTS
    /// instead of being rebased against the timeline start.
    pub keep_original_timestamps: bool,
    /// Reserved for combined audio+video output. Audio and video are
    /// currently always emitted as separate fragmented streams.
    pub remux: bool,
    /// Accepted for API compatibility; GOP realignment is not performed.
    pub align_gops_at_end: bool,
    /// When true, the pipeline is tuned for `partial_flush` driven output:
    /// AAC frame timing carries across PES packet boundaries until a full
    /// flush instead of restarting with every packet.
    pub handle_partial_segments: bool,
}

impl Default for TransmuxConfig {
    fn default() -> Self {
        Self {
            base_media_decode_time: 0,
            keep_original_timestamps: false,
            remux: true,
            align_gops_at_end: false,
            handle_partial_segments: false,
        }
    }
}

impl TransmuxConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base media decode time offset (90 kHz ticks).
    pub fn with_base_media_decode_time(mut self, ticks: u64) -> Self {
        self.base_media_decode_time = ticks;
        self
    }

    /// Keeps input timestamps untouched instead of normalizing them.
    pub fn with_keep_original_timestamps(mut self, keep: bool) -> Self {
        self.keep_original_timestamps = keep;
        self
    }

    /// Records the remux preference.
    pub fn with_remux(mut self, remux: bool) -> Self {
        self.remux = remux;
        self
    }

    /// Records the GOP-alignment preference.
    pub fn with_align_gops_at_end(mut self, align: bool) -> Self {
        self.align_gops_at_end = align;
        self
    }

    /// Tunes the pipeline for partial-flush driven output.
    pub fn with_handle_partial_segments(mut self, handle: bool) -> Self {
        self.handle_partial_segments = handle;
        self
    }
}
