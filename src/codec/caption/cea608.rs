use log::trace;

/// Number of addressable caption rows.
const ROW_COUNT: usize = 15;
/// The bottom row, where roll-up captions live.
const BOTTOM_ROW: usize = ROW_COUNT - 1;

/// Preamble address codes (masked with 0x1F20) indexed by target row.
const ROWS: [u16; ROW_COUNT] = [
    0x1100, 0x1120, 0x1200, 0x1220, 0x1500, 0x1520, 0x1600, 0x1620, 0x1700, 0x1720, 0x1000,
    0x1300, 0x1320, 0x1400, 0x1420,
];

/// A finished caption cue covering a presentation window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    /// PTS at which the text became visible, 90 kHz
    pub start_pts: i64,
    /// PTS at which the text was replaced or erased, 90 kHz
    pub end_pts: i64,
    /// Caption text; rows are joined with newlines
    pub text: String,
    /// Originating channel, "CC1" or "CC2"
    pub stream: &'static str,
}

/// Captioning modes defined by CEA-608.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptionMode {
    PopOn,
    RollUp,
    PaintOn,
}

/// Decoder for one CEA-608 data channel.
///
/// Maintains the displayed and non-displayed caption memories and emits a
/// [`Cue`] whenever displayed text is replaced or erased: a pop-on flip at
/// end-of-caption, a roll-up carriage return, or an erase-displayed-memory
/// command. Character set mapping is plain ASCII; special and extended
/// character codes are consumed without producing glyphs.
#[derive(Debug)]
pub struct Cea608Channel {
    stream: &'static str,
    mode: CaptionMode,
    displayed: Vec<String>,
    non_displayed: Vec<String>,
    start_pts: i64,
    row: usize,
    roll_up_rows: usize,
    last_control_code: Option<u16>,
}

fn blank_rows() -> Vec<String> {
    vec![String::new(); ROW_COUNT]
}

impl Cea608Channel {
    /// Creates a decoder that labels its cues with `stream`.
    pub fn new(stream: &'static str) -> Self {
        Self {
            stream,
            mode: CaptionMode::PopOn,
            displayed: blank_rows(),
            non_displayed: blank_rows(),
            start_pts: 0,
            row: BOTTOM_ROW,
            roll_up_rows: 2,
            last_control_code: None,
        }
    }

    /// Feeds one parity-stripped, channel-normalized byte pair.
    ///
    /// `data` is `(first_byte << 8) | second_byte` with the data-channel bit
    /// already cleared from control codes.
    pub fn push_pair(&mut self, pts: i64, data: u16, out: &mut Vec<Cue>) {
        if data == 0 {
            return; // padding
        }

        let char0 = (data >> 8) as u8;
        let char1 = data as u8;

        if char0 < 0x10 {
            // XDS and other non-caption services
            return;
        }
        if char0 >= 0x20 {
            self.last_control_code = None;
            self.append_char(char0);
            if char1 >= 0x20 {
                self.append_char(char1);
            }
            return;
        }

        // Doubled control codes are transmitted for redundancy; drop the
        // second copy.
        if self.last_control_code == Some(data) {
            self.last_control_code = None;
            return;
        }
        self.last_control_code = Some(data);

        if (0x40..=0x7F).contains(&char1) {
            self.preamble_address(data);
            return;
        }

        match (char0, char1) {
            (0x14, 0x20) => self.resume_caption_loading(),
            (0x14, 0x21) => self.backspace(),
            (0x14, 0x25) => self.set_roll_up(pts, 2, out),
            (0x14, 0x26) => self.set_roll_up(pts, 3, out),
            (0x14, 0x27) => self.set_roll_up(pts, 4, out),
            (0x14, 0x29) => self.resume_direct_captioning(pts),
            (0x14, 0x2C) => self.erase_displayed_memory(pts, out),
            (0x14, 0x2D) => self.carriage_return(pts, out),
            (0x14, 0x2E) => self.erase_non_displayed_memory(),
            (0x14, 0x2F) => self.end_of_caption(pts, out),
            (0x11, 0x20..=0x2F) => {} // mid-row style change
            (0x11, 0x30..=0x3F) => {} // special character set
            (0x12 | 0x13, 0x20..=0x3F) => {} // extended character sets
            (0x17, 0x21..=0x23) => {} // tab offset
            _ => trace!("unhandled CEA-608 control code {:04x}", data),
        }
    }

    /// Emits the displayed memory as a cue ending at `pts`.
    pub fn flush_displayed(&mut self, pts: i64, out: &mut Vec<Cue>) {
        let text = self
            .displayed
            .iter()
            .filter(|row| !row.trim().is_empty())
            .map(|row| row.trim().to_string())
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            out.push(Cue {
                start_pts: self.start_pts,
                end_pts: pts,
                text,
                stream: self.stream,
            });
        }
    }

    /// Discards all caption state.
    pub fn reset(&mut self) {
        self.mode = CaptionMode::PopOn;
        self.displayed = blank_rows();
        self.non_displayed = blank_rows();
        self.start_pts = 0;
        self.row = BOTTOM_ROW;
        self.roll_up_rows = 2;
        self.last_control_code = None;
    }

    fn current_buffer(&mut self) -> &mut String {
        match self.mode {
            CaptionMode::PopOn => &mut self.non_displayed[self.row],
            CaptionMode::RollUp | CaptionMode::PaintOn => &mut self.displayed[self.row],
        }
    }

    fn append_char(&mut self, byte: u8) {
        // The basic character set is ASCII for our purposes; the handful of
        // codepoints 608 redefines are not mapped here.
        self.current_buffer().push(byte as char);
    }

    fn backspace(&mut self) {
        self.current_buffer().pop();
    }

    fn preamble_address(&mut self, data: u16) {
        if let Some(row) = ROWS.iter().position(|&code| code == data & 0x1F20) {
            match self.mode {
                CaptionMode::RollUp => {
                    // A roll-up PAC moves the whole window.
                    let bottom = row.max(self.roll_up_rows - 1);
                    if bottom != self.row {
                        let rows = std::mem::replace(&mut self.displayed, blank_rows());
                        for (i, text) in rows.into_iter().enumerate() {
                            // Keep the window contents anchored to the new bottom.
                            if let Some(offset) = self.row.checked_sub(i) {
                                if offset < self.roll_up_rows && bottom >= offset {
                                    self.displayed[bottom - offset] = text;
                                }
                            }
                        }
                        self.row = bottom;
                    }
                }
                _ => self.row = row,
            }
        }
    }

    fn resume_caption_loading(&mut self) {
        self.mode = CaptionMode::PopOn;
    }

    fn set_roll_up(&mut self, pts: i64, rows: usize, out: &mut Vec<Cue>) {
        if self.mode != CaptionMode::RollUp {
            self.flush_displayed(pts, out);
            self.displayed = blank_rows();
            self.row = BOTTOM_ROW;
            self.start_pts = pts;
        }
        self.mode = CaptionMode::RollUp;
        self.roll_up_rows = rows;
    }

    fn resume_direct_captioning(&mut self, pts: i64) {
        if self.mode != CaptionMode::PaintOn {
            self.start_pts = pts;
        }
        self.mode = CaptionMode::PaintOn;
    }

    fn erase_displayed_memory(&mut self, pts: i64, out: &mut Vec<Cue>) {
        self.flush_displayed(pts, out);
        self.displayed = blank_rows();
    }

    fn erase_non_displayed_memory(&mut self) {
        self.non_displayed = blank_rows();
    }

    fn carriage_return(&mut self, pts: i64, out: &mut Vec<Cue>) {
        if self.mode != CaptionMode::RollUp {
            return;
        }
        self.flush_displayed(pts, out);

        // Scroll the roll-up window one line.
        let top = (self.row + 1).saturating_sub(self.roll_up_rows);
        for i in top..self.row {
            self.displayed[i] = std::mem::take(&mut self.displayed[i + 1]);
        }
        self.displayed[self.row] = String::new();
        self.start_pts = pts;
    }

    fn end_of_caption(&mut self, pts: i64, out: &mut Vec<Cue>) {
        self.mode = CaptionMode::PopOn;
        self.flush_displayed(pts, out);
        std::mem::swap(&mut self.displayed, &mut self.non_displayed);
        self.non_displayed = blank_rows();
        self.start_pts = pts;
    }
}
