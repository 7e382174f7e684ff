//! # Error Types
//!
//! This module provides the error types used throughout the transmux library.
//! It defines a central error type `TransmuxError` that encapsulates the
//! failures that can occur while parsing transport streams, elementary
//! streams, and codec bitstreams.
//!
//! Parse errors never cross the public API: every pipeline stage absorbs the
//! errors it detects (resynchronizing or discarding data as appropriate), so
//! these types appear only on internal parsing seams.
//!
//! ## Example Usage
//!
//! ```rust
//! use transmux::error::{Result, TransmuxError};
//!
//! fn require_sync_byte(data: &[u8]) -> Result<()> {
//!     if data.first() != Some(&0x47) {
//!         return Err(TransmuxError::InvalidData("missing TS sync byte".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Primary error type for the transmux library
#[derive(Error, Debug)]
pub enum TransmuxError {
    /// Errors related to video/audio codec bitstream parsing
    #[error("codec error: {0}")]
    Codec(String),

    /// Errors that occur while parsing container structures (TS, PES, ID3)
    #[error("parser error: {0}")]
    Parser(String),

    /// Errors for invalid or malformed input data
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// A specialized Result type for transmux operations.
///
/// Used on every internal parsing seam that can fail; a failed parse is
/// handled by the stage that attempted it.
pub type Result<T> = std::result::Result<T, TransmuxError>;
