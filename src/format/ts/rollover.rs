use super::types::{MAX_TS, RO_THRESH};
use crate::av::{PesPacket, Stage, StreamKind};

/// Unwraps a 33-bit timestamp against a reference value.
///
/// PTS/DTS wrap every 2^33 ticks (about 26.5 hours at 90 kHz). Values more
/// than 2^32 away from the reference are shifted by whole rollover periods
/// until they land within half a period of it, which keeps a stream
/// monotonic across the wrap as long as real jumps stay under 2^32 ticks.
pub fn handle_rollover(value: i64, reference: Option<i64>) -> i64 {
    let reference = match reference {
        Some(reference) => reference,
        None => return value,
    };

    let direction = if reference < value { -MAX_TS } else { MAX_TS };

    let mut value = value;
    while (reference - value).abs() > RO_THRESH {
        value += direction;
    }
    value
}

/// Per-track timestamp rollover correction stage.
///
/// One instance sits ahead of each codec parser. A stage built for a
/// specific stream kind drops events of other kinds (each track gets its
/// own); a shared stage corrects everything that passes through it.
#[derive(Debug)]
pub struct TimestampRollover {
    kind: Option<StreamKind>,
    reference_dts: Option<i64>,
    last_dts: Option<i64>,
}

impl TimestampRollover {
    /// Creates a rollover stage for one stream kind.
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind: Some(kind),
            reference_dts: None,
            last_dts: None,
        }
    }

    /// Creates a stage that corrects every event regardless of kind.
    pub fn shared() -> Self {
        Self {
            kind: None,
            reference_dts: None,
            last_dts: None,
        }
    }

    /// Forgets the reference entirely, as a stream discontinuity requires.
    pub fn discontinuity(&mut self) {
        self.reference_dts = None;
        self.last_dts = None;
    }
}

impl Stage for TimestampRollover {
    type Input = PesPacket;
    type Output = PesPacket;

    fn push(&mut self, mut input: PesPacket, out: &mut Vec<PesPacket>) {
        if let Some(kind) = self.kind {
            if input.kind != kind {
                return;
            }
        }

        if self.reference_dts.is_none() {
            self.reference_dts = input.dts;
        }

        input.dts = input.dts.map(|dts| handle_rollover(dts, self.reference_dts));
        input.pts = input.pts.map(|pts| handle_rollover(pts, self.reference_dts));

        if input.dts.is_some() {
            self.last_dts = input.dts;
        }
        out.push(input);
    }

    fn flush(&mut self, _out: &mut Vec<PesPacket>) {
        // The next segment unwraps against the tail of this one.
        self.reference_dts = self.last_dts;
    }

    fn end_timeline(&mut self, out: &mut Vec<PesPacket>) {
        self.flush(out);
    }

    fn reset(&mut self) {
        self.discontinuity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    fn packet(kind: StreamKind, pts: i64, dts: i64) -> PesPacket {
        PesPacket {
            kind,
            track_id: 0x100,
            stream_type: 0x1B,
            pts: Some(pts),
            dts: Some(dts),
            data_alignment: false,
            payload: Bytes::new(),
        }
    }

    #[test]
    fn test_rollover_forward() {
        let mut stage = TimestampRollover::new(StreamKind::Video);
        let mut out = Vec::new();

        stage.push(packet(StreamKind::Video, MAX_TS - 10, MAX_TS - 10), &mut out);
        stage.push(packet(StreamKind::Video, 5, 5), &mut out);

        assert_eq!(out[0].dts, Some(MAX_TS - 10));
        assert_eq!(out[1].dts, Some(MAX_TS + 5));
        assert_eq!(out[1].pts, Some(MAX_TS + 5));
    }

    #[test]
    fn test_rollover_backward() {
        // A stream that starts just past a wrap point can reference
        // timestamps from before it.
        let mut stage = TimestampRollover::new(StreamKind::Video);
        let mut out = Vec::new();

        stage.push(packet(StreamKind::Video, 5, 5), &mut out);
        stage.push(packet(StreamKind::Video, MAX_TS - 10, MAX_TS - 10), &mut out);

        assert_eq!(out[0].dts, Some(5));
        assert_eq!(out[1].dts, Some(-10));
    }

    #[test]
    fn test_other_kinds_dropped() {
        let mut stage = TimestampRollover::new(StreamKind::Audio);
        let mut out = Vec::new();

        stage.push(packet(StreamKind::Video, 0, 0), &mut out);
        assert!(out.is_empty());

        stage.push(packet(StreamKind::Audio, 0, 0), &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_shared_accepts_everything() {
        let mut stage = TimestampRollover::shared();
        let mut out = Vec::new();

        stage.push(packet(StreamKind::Video, 1, 1), &mut out);
        stage.push(packet(StreamKind::Audio, 2, 2), &mut out);
        stage.push(packet(StreamKind::TimedMetadata, 3, 3), &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_flush_reanchors_to_last_dts() {
        let mut stage = TimestampRollover::new(StreamKind::Video);
        let mut out = Vec::new();

        stage.push(packet(StreamKind::Video, MAX_TS - 10, MAX_TS - 10), &mut out);
        stage.flush(&mut out);

        // After the flush, values continue from the tail of the last segment.
        stage.push(packet(StreamKind::Video, 5, 5), &mut out);
        assert_eq!(out[1].dts, Some(MAX_TS + 5));
    }

    #[test]
    fn test_reset_clears_reference() {
        let mut stage = TimestampRollover::new(StreamKind::Video);
        let mut out = Vec::new();

        stage.push(packet(StreamKind::Video, MAX_TS - 10, MAX_TS - 10), &mut out);
        stage.reset();
        stage.reset(); // idempotent

        stage.push(packet(StreamKind::Video, 5, 5), &mut out);
        assert_eq!(out[1].dts, Some(5));
    }

    #[quickcheck]
    fn prop_small_increments_stay_monotonic(start: u32, deltas: Vec<u16>) -> bool {
        // Successive timestamps that move forward by less than 2^32 (mod
        // 2^33) must come out monotonically non-decreasing.
        let mut stage = TimestampRollover::new(StreamKind::Video);
        let mut out = Vec::new();

        let mut raw = start as i64;
        stage.push(packet(StreamKind::Video, raw, raw), &mut out);
        for delta in deltas {
            raw = (raw + delta as i64) % MAX_TS;
            stage.push(packet(StreamKind::Video, raw, raw), &mut out);
        }

        out.windows(2).all(|w| w[0].dts <= w[1].dts)
    }
}
