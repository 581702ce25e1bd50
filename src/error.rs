use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  /// Storage failure. Fatal while the log is being written.
  #[error("I/O Error: {0}")]
  Io(#[from] io::Error),

  /// A file name in the log directory does not follow the segment naming scheme.
  #[error("Invalid segment filename: {0}")]
  InvalidFilename(String),

  #[error("Data Corruption: {0}")]
  Corruption(String),

  #[error("CRC32 Checksum Mismatch: expected {expected:#x}, got {actual:#x} at offset {offset}")]
  CrcMismatch { expected: u32, actual: u32, offset: u64 },

  #[error("Unsupported segment file version: {0}")]
  UnsupportedVersion(u32),

  /// The segments on disk break an ordering invariant (sequence gap, decreasing bound,
  /// timestamp or origin, mixed indicator schemes).
  #[error("Segment invariant violated: {0}")]
  InvariantViolation(String),

  /// The caller used the API in a way that is never valid, e.g. lowering the
  /// non-ancient boundary. State is left untouched when this is returned.
  #[error("Misuse: {0}")]
  Misuse(String),

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Event codec error: {0}")]
  Codec(String),

  /// The background writer has exited, usually after a fatal error.
  #[error("The log writer worker has stopped")]
  WriterStopped,
}
