//! Canonical file names and directory layout of segment files.
//!
//! ```text
//! <root>/<YYYY>/<MM>/<DD>/<timestamp>_seq<N>_ming<L>_maxg<U>_orgn<O>.pces
//! ```
//!
//! The timestamp is the UTC creation time with nanosecond precision and `:`
//! replaced by `+` so that the name is valid on every file system.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};

use crate::config::AncientMode;
use crate::descriptor::SegmentDescriptor;
use crate::error::{Error, Result};

/// Extension carried by every segment file.
pub const SEGMENT_FILE_EXTENSION: &str = "pces";

const SEPARATOR: char = '_';
const SEQUENCE_PREFIX: &str = "seq";
const ORIGIN_PREFIX: &str = "orgn";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H+%M+%S%.9fZ";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%dT%H+%M+%S%.fZ";

pub fn sanitize_timestamp(timestamp: &DateTime<Utc>) -> String {
  timestamp.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(token: &str) -> Result<DateTime<Utc>> {
  let naive = NaiveDateTime::parse_from_str(token, TIMESTAMP_PARSE_FORMAT)
    .map_err(|e| Error::InvalidFilename(format!("bad timestamp '{}': {}", token, e)))?;
  Ok(Utc.from_utc_datetime(&naive))
}

/// Builds the file name of a segment.
pub fn segment_file_name(
  mode: AncientMode,
  created_at: &DateTime<Utc>,
  sequence_number: u64,
  lower_bound: u64,
  upper_bound: u64,
  origin: u64,
) -> String {
  format!(
    "{ts}{sep}{seq_p}{seq}{sep}{lo_p}{lo}{sep}{up_p}{up}{sep}{or_p}{origin}.{ext}",
    ts = sanitize_timestamp(created_at),
    sep = SEPARATOR,
    seq_p = SEQUENCE_PREFIX,
    seq = sequence_number,
    lo_p = mode.lower_prefix(),
    lo = lower_bound,
    up_p = mode.upper_prefix(),
    up = upper_bound,
    or_p = ORIGIN_PREFIX,
    origin = origin,
    ext = SEGMENT_FILE_EXTENSION,
  )
}

/// Directory holding the segments created on the day of `created_at`.
pub fn segment_directory(root: &Path, created_at: &DateTime<Utc>) -> PathBuf {
  root
    .join(format!("{:04}", created_at.year()))
    .join(format!("{:02}", created_at.month()))
    .join(format!("{:02}", created_at.day()))
}

/// Full path of a descriptor's file.
pub fn encode(descriptor: &SegmentDescriptor) -> PathBuf {
  descriptor.path().to_path_buf()
}

/// Parses a segment path back into its descriptor.
pub fn decode(path: &Path) -> Result<SegmentDescriptor> {
  let file_name = path
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| Error::InvalidFilename(format!("{}", path.display())))?;

  let stem = file_name
    .strip_suffix(SEGMENT_FILE_EXTENSION)
    .and_then(|s| s.strip_suffix('.'))
    .ok_or_else(|| Error::InvalidFilename(format!("{}: wrong extension", file_name)))?;

  let tokens: Vec<&str> = stem.split(SEPARATOR).collect();
  if tokens.len() != 5 {
    return Err(Error::InvalidFilename(format!(
      "{}: expected 5 tokens, found {}",
      file_name,
      tokens.len()
    )));
  }

  let created_at = parse_timestamp(tokens[0])?;
  let sequence_number = parse_field(file_name, tokens[1], SEQUENCE_PREFIX)?;

  let mode = if tokens[2].starts_with(AncientMode::Generation.lower_prefix()) {
    AncientMode::Generation
  } else if tokens[2].starts_with(AncientMode::BirthRound.lower_prefix()) {
    AncientMode::BirthRound
  } else {
    return Err(Error::InvalidFilename(format!("{}: unknown lower bound token", file_name)));
  };

  let lower_bound = parse_field(file_name, tokens[2], mode.lower_prefix())?;
  // The upper token must use the same scheme as the lower one.
  let upper_bound = parse_field(file_name, tokens[3], mode.upper_prefix())?;
  let origin = parse_field(file_name, tokens[4], ORIGIN_PREFIX)?;

  if upper_bound < lower_bound {
    return Err(Error::InvalidFilename(format!(
      "{}: upper bound {} is below lower bound {}",
      file_name, upper_bound, lower_bound
    )));
  }

  Ok(SegmentDescriptor::from_parts(
    mode,
    created_at,
    sequence_number,
    lower_bound,
    upper_bound,
    origin,
    path.to_path_buf(),
  ))
}

fn parse_field(file_name: &str, token: &str, prefix: &str) -> Result<u64> {
  let digits = token
    .strip_prefix(prefix)
    .ok_or_else(|| Error::InvalidFilename(format!("{}: expected '{}' in '{}'", file_name, prefix, token)))?;
  // u64 parsing rejects signs, so negative fields fail here as well.
  if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
    return Err(Error::InvalidFilename(format!(
      "{}: '{}' is not a non-negative number",
      file_name, token
    )));
  }
  digits
    .parse::<u64>()
    .map_err(|e| Error::InvalidFilename(format!("{}: {}: {}", file_name, token, e)))
}
