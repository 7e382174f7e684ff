use crate::error::{Result, TransmuxError};

/// A bit-level reader for parsing binary data streams.
///
/// Implements the bit reading operations needed by H.264 parameter set
/// parsing:
/// - Reading individual bits and bit runs
/// - Counting leading zero bits
/// - Reading exponential Golomb codes (ue(v))
/// - Reading signed exponential Golomb codes (se(v))
///
/// The reader keeps a 32-bit working word and a bit-availability counter,
/// refilling up to four bytes at a time. Running out of data is an error;
/// the caller abandons the parse of the current NAL unit when that happens.
///
/// Example:
/// ```
/// use transmux::utils::ExpGolombReader;
///
/// let data = [0b1011_0011];
/// let mut reader = ExpGolombReader::new(&data);
///
/// assert!(reader.read_boolean().unwrap());          // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011);  // 011
/// ```
pub struct ExpGolombReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    word: u32,
    bits_available: u32,
}

impl<'a> ExpGolombReader<'a> {
    /// Creates a new reader over a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        let mut reader = ExpGolombReader {
            data,
            byte_offset: 0,
            word: 0,
            bits_available: 0,
        };
        // An empty buffer is allowed here; the first read reports it.
        let _ = reader.load_word();
        reader
    }

    /// Returns the number of bits still readable.
    pub fn bits_available(&self) -> usize {
        (self.data.len() - self.byte_offset) * 8 + self.bits_available as usize
    }

    fn load_word(&mut self) -> Result<()> {
        let available = (self.data.len() - self.byte_offset).min(4);
        if available == 0 {
            return Err(TransmuxError::Parser("no bits left to load".into()));
        }

        let mut word = 0u32;
        for i in 0..available {
            word |= (self.data[self.byte_offset + i] as u32) << (24 - 8 * i);
        }
        self.word = word;
        self.byte_offset += available;
        self.bits_available = 8 * available as u32;
        Ok(())
    }

    /// Skips `count` bits.
    pub fn skip_bits(&mut self, mut count: u32) -> Result<()> {
        while count > 0 {
            let step = count.min(32);
            self.read_bits(step)?;
            count -= step;
        }
        Ok(())
    }

    /// Reads `size` bits (1..=32) as a big-endian unsigned value.
    pub fn read_bits(&mut self, size: u32) -> Result<u32> {
        if size == 0 {
            return Ok(0);
        }
        if size > 32 {
            return Err(TransmuxError::Parser(format!(
                "cannot read {} bits at once",
                size
            )));
        }
        if self.bits_available == 0 {
            self.load_word()?;
        }

        let bits = size.min(self.bits_available);
        let valid = self.word >> (32 - bits);
        self.bits_available -= bits;
        if self.bits_available > 0 {
            self.word <<= bits;
        }

        let remaining = size - bits;
        if remaining > 0 {
            Ok((valid << remaining) | self.read_bits(remaining)?)
        } else {
            Ok(valid)
        }
    }

    /// Reads one bit as a flag.
    pub fn read_boolean(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Reads one byte.
    pub fn read_unsigned_byte(&mut self) -> Result<u8> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Counts and consumes leading zero bits up to (not including) the next
    /// set bit.
    pub fn skip_leading_zeros(&mut self) -> Result<u32> {
        for leading_zero_count in 0..self.bits_available {
            if self.word & (0x8000_0000 >> leading_zero_count) != 0 {
                self.word <<= leading_zero_count;
                self.bits_available -= leading_zero_count;
                return Ok(leading_zero_count);
            }
        }

        let counted = self.bits_available;
        self.bits_available = 0;
        self.load_word()?;
        Ok(counted + self.skip_leading_zeros()?)
    }

    /// Skips one unsigned exp-Golomb value.
    pub fn skip_unsigned_exp_golomb(&mut self) -> Result<()> {
        let clz = self.skip_leading_zeros()?;
        self.skip_bits(clz + 1)
    }

    /// Skips one signed exp-Golomb value.
    pub fn skip_signed_exp_golomb(&mut self) -> Result<()> {
        self.skip_unsigned_exp_golomb()
    }

    /// Reads an unsigned exponential Golomb code (ue(v)).
    ///
    /// M leading zeros followed by a 1, then M info bits; the decoded value
    /// is `2^M + INFO - 1`, i.e. `read_bits(M + 1) - 1`.
    pub fn read_unsigned_exp_golomb(&mut self) -> Result<u32> {
        let clz = self.skip_leading_zeros()?;
        if clz > 31 {
            return Err(TransmuxError::Parser(
                "exp-Golomb code exceeds 32 bits".into(),
            ));
        }
        Ok(self.read_bits(clz + 1)? - 1)
    }

    /// Reads a signed exponential Golomb code (se(v)).
    ///
    /// Odd unsigned values map to positive numbers, even ones to negative:
    /// `k=1 -> +1, k=2 -> -1, k=3 -> +2, ...`
    pub fn read_signed_exp_golomb(&mut self) -> Result<i32> {
        let value = self.read_unsigned_exp_golomb()?;
        if value & 1 == 1 {
            Ok(((value + 1) >> 1) as i32)
        } else {
            Ok(-((value >> 1) as i32))
        }
    }
}
