//! # Utility Functions and Types
//!
//! Common utilities used throughout the transmux library:
//!
//! - Bit-level reading with exp-Golomb decoding (H.264 parameter sets)
//! - MPEG-2 CRC32 validation for PSI tables
//!
//! ## Bit Operations
//!
//! ```rust
//! use transmux::utils::ExpGolombReader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b1011_0011u8];
//! let mut reader = ExpGolombReader::new(&data);
//!
//! let value = reader.read_bits(3)?; // reads the first 3 bits (101)
//! assert_eq!(value, 0b101);
//! # Ok(())
//! # }
//! ```
//!
//! ## CRC Calculation
//!
//! ```rust
//! use transmux::utils::crc32_mpeg2;
//!
//! let crc = crc32_mpeg2(b"Hello, world!");
//! println!("CRC32: {:08x}", crc);
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

pub use bits::*;
pub use crc::{crc32_mpeg2, psi_crc_valid};
