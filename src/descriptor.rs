use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::AncientMode;
use crate::error::{Error, Result};
use crate::naming;

/// Immutable metadata identifying one segment file.
///
/// The file name encodes every field, so a descriptor can always be rebuilt
/// from a directory listing. Compaction produces a new descriptor (and a new
/// file name) rather than mutating an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentDescriptor {
  ancient_mode: AncientMode,
  created_at: DateTime<Utc>,
  sequence_number: u64,
  lower_bound: u64,
  upper_bound: u64,
  origin: u64,
  path: PathBuf,
}

impl SegmentDescriptor {
  /// Creates a descriptor for a segment stored under `root`.
  pub fn new(
    ancient_mode: AncientMode,
    created_at: DateTime<Utc>,
    sequence_number: u64,
    lower_bound: u64,
    upper_bound: u64,
    origin: u64,
    root: &Path,
  ) -> Result<Self> {
    if upper_bound < lower_bound {
      return Err(Error::InvariantViolation(format!(
        "segment {} upper bound {} is below lower bound {}",
        sequence_number, upper_bound, lower_bound
      )));
    }

    let file_name = naming::segment_file_name(
      ancient_mode,
      &created_at,
      sequence_number,
      lower_bound,
      upper_bound,
      origin,
    );
    let path = naming::segment_directory(root, &created_at).join(file_name);

    Ok(Self::from_parts(
      ancient_mode,
      created_at,
      sequence_number,
      lower_bound,
      upper_bound,
      origin,
      path,
    ))
  }

  pub(crate) fn from_parts(
    ancient_mode: AncientMode,
    created_at: DateTime<Utc>,
    sequence_number: u64,
    lower_bound: u64,
    upper_bound: u64,
    origin: u64,
    path: PathBuf,
  ) -> Self {
    Self {
      ancient_mode,
      created_at,
      sequence_number,
      lower_bound,
      upper_bound,
      origin,
      path,
    }
  }

  /// Parses a descriptor from the path of an existing segment file.
  pub fn from_path(path: &Path) -> Result<Self> {
    naming::decode(path)
  }

  pub fn ancient_mode(&self) -> AncientMode {
    self.ancient_mode
  }

  pub fn created_at(&self) -> DateTime<Utc> {
    self.created_at
  }

  pub fn sequence_number(&self) -> u64 {
    self.sequence_number
  }

  pub fn lower_bound(&self) -> u64 {
    self.lower_bound
  }

  pub fn upper_bound(&self) -> u64 {
    self.upper_bound
  }

  pub fn origin(&self) -> u64 {
    self.origin
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn span(&self) -> u64 {
    self.upper_bound - self.lower_bound
  }

  /// True if an event with this indicator may legally be stored in the segment.
  pub fn can_contain(&self, indicator: u64) -> bool {
    indicator >= self.lower_bound && indicator <= self.upper_bound
  }

  /// Returns the descriptor of the same segment with its upper bound lowered to
  /// `upper_bound`. The new path lives in the same directory.
  pub fn with_compacted_span(&self, upper_bound: u64) -> Result<Self> {
    if upper_bound < self.lower_bound || upper_bound > self.upper_bound {
      return Err(Error::Misuse(format!(
        "cannot compact segment {} to upper bound {} (bounds {}..={})",
        self.sequence_number, upper_bound, self.lower_bound, self.upper_bound
      )));
    }

    let file_name = naming::segment_file_name(
      self.ancient_mode,
      &self.created_at,
      self.sequence_number,
      self.lower_bound,
      upper_bound,
      self.origin,
    );
    let path = match self.path.parent() {
      Some(dir) => dir.join(file_name),
      None => PathBuf::from(file_name),
    };

    Ok(Self {
      upper_bound,
      path,
      ..self.clone()
    })
  }

  /// Checks the ordering invariants between this segment and the one right
  /// before it in the log.
  pub(crate) fn check_follows(&self, previous: &SegmentDescriptor, permit_gaps: bool) -> Result<()> {
    if self.ancient_mode != previous.ancient_mode {
      return Err(Error::InvariantViolation(format!(
        "segment {} uses {:?} bounds but segment {} uses {:?}",
        self.sequence_number, self.ancient_mode, previous.sequence_number, previous.ancient_mode
      )));
    }

    let expected = previous.sequence_number + 1;
    let sequence_ok = if permit_gaps {
      self.sequence_number >= expected
    } else {
      self.sequence_number == expected
    };
    if !sequence_ok {
      return Err(Error::InvariantViolation(format!(
        "segment sequence number {} does not follow {} (gaps permitted: {})",
        self.sequence_number, previous.sequence_number, permit_gaps
      )));
    }

    if self.lower_bound < previous.lower_bound {
      return Err(Error::InvariantViolation(format!(
        "lower bound decreased from {} to {} at segment {}",
        previous.lower_bound, self.lower_bound, self.sequence_number
      )));
    }
    if self.upper_bound < previous.upper_bound {
      return Err(Error::InvariantViolation(format!(
        "upper bound decreased from {} to {} at segment {}",
        previous.upper_bound, self.upper_bound, self.sequence_number
      )));
    }
    if self.created_at < previous.created_at {
      return Err(Error::InvariantViolation(format!(
        "timestamp decreased from {} to {} at segment {}",
        previous.created_at, self.created_at, self.sequence_number
      )));
    }
    if self.origin < previous.origin {
      return Err(Error::InvariantViolation(format!(
        "origin decreased from {} to {} at segment {}",
        previous.origin, self.origin, self.sequence_number
      )));
    }
    Ok(())
  }
}

impl fmt::Display for SegmentDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.path.file_name() {
      Some(name) => write!(f, "{}", name.to_string_lossy()),
      None => write!(f, "{}", self.path.display()),
    }
  }
}
