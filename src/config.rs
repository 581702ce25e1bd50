use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Selects which scalar decides whether an event is ancient.
///
/// A log is written in exactly one mode. The mode is embedded in every segment
/// file name, and segments of the other mode are rejected during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AncientMode {
  /// Events are bounded by generation (`ming`/`maxg` file name tokens).
  Generation,
  /// Events are bounded by birth round (`minr`/`maxr` file name tokens).
  BirthRound,
}

impl AncientMode {
  pub(crate) fn lower_prefix(self) -> &'static str {
    match self {
      AncientMode::Generation => "ming",
      AncientMode::BirthRound => "minr",
    }
  }

  pub(crate) fn upper_prefix(self) -> &'static str {
    match self {
      AncientMode::Generation => "maxg",
      AncientMode::BirthRound => "maxr",
    }
  }
}

/// Defines the strategy used for reading segment files during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
  /// Uses standard buffered `File::read`.
  /// Safe, reliable, and respectful of memory limits.
  StandardIo,

  /// Memory-maps the segment files.
  /// WARNING: carries SIGBUS risks if a file is truncated while mapped.
  Mmap,
}

/// Policy for records whose checksum does not match during replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionPolicy {
  /// Stop reading the segment at the last valid record, flag it as truncated
  /// and log a warning.
  Truncate,

  /// Return a fatal error. The node will not finish replay until a human
  /// fixes the file.
  Error,
}

#[derive(Debug, Clone)]
pub struct LogOptions {
  /// Root directory of the log. Segments live under `<root>/<YYYY>/<MM>/<DD>/`.
  pub root_path: PathBuf,

  /// Which ancient indicator bounds the segments.
  pub ancient_mode: AncientMode,

  // --- Segment Rotation ---
  /// Soft limit for segment file size in bytes. A segment that reached this
  /// size is sealed before the next write.
  /// Default: 10 MB.
  pub preferred_segment_size: u64,

  /// Span used for new segments while no segment has reached the preferred size.
  /// Default: 50.
  pub bootstrap_span: u64,

  /// Multiplier applied to the span basis while bootstrapping.
  /// Default: 10.0.
  pub bootstrap_span_overlap_factor: f64,

  /// Multiplier applied to the running average span once bootstrapping is over.
  /// Default: 1.2.
  pub span_overlap_factor: f64,

  /// A new segment can always hold indicators up to `next + minimum_span`.
  /// Default: 5.
  pub minimum_span: u64,

  /// Number of sealed segments included in the running average span.
  /// Default: 5.
  pub span_utilization_window: usize,

  /// Rename sealed segments so that their upper bound matches the highest
  /// indicator actually written.
  /// Default: true.
  pub compact_sealed_segments: bool,

  /// Compact the last segment found on disk when the log is opened.
  /// Default: true.
  pub compact_last_segment_on_startup: bool,

  // --- Retention ---
  /// Segments younger than this are never pruned, whatever their bounds.
  /// Default: 1 hour.
  pub minimum_retention_period: Duration,

  /// Accept sequence number gaps between segments. Only meant for
  /// administrative recovery of a damaged log.
  /// Default: false.
  pub permit_gaps: bool,

  // --- Resources ---
  /// Size of the in-memory write buffer before handing data to the OS.
  /// Default: 64 KB.
  pub write_buffer_size: usize,

  /// Size of the buffer used for reading segments.
  /// Default: 128 KB.
  pub read_buffer_size: usize,

  pub read_strategy: ReadStrategy,
  pub on_corruption: CorruptionPolicy,

  /// Capacity of the command queue in front of the background writer.
  /// Default: 1024.
  pub writer_queue_capacity: usize,

  // --- Replay ---
  /// Upper limit on events handed downstream per second during replay.
  /// `None` disables the limit.
  /// Default: 5000.
  pub replay_max_events_per_second: Option<u64>,

  /// Interval between two polls of the health predicate while replay is paused.
  /// Default: 100 ms.
  pub replay_health_poll_interval: Duration,
}

impl Default for LogOptions {
  fn default() -> Self {
    Self {
      root_path: PathBuf::from("./preconsensus-events"),
      ancient_mode: AncientMode::Generation,
      preferred_segment_size: 10 * 1024 * 1024, // 10 MB
      bootstrap_span: 50,
      bootstrap_span_overlap_factor: 10.0,
      span_overlap_factor: 1.2,
      minimum_span: 5,
      span_utilization_window: 5,
      compact_sealed_segments: true,
      compact_last_segment_on_startup: true,
      minimum_retention_period: Duration::from_secs(60 * 60),
      permit_gaps: false,
      write_buffer_size: 64 * 1024, // 64 KB
      read_buffer_size: 128 * 1024, // 128 KB
      read_strategy: ReadStrategy::StandardIo,
      on_corruption: CorruptionPolicy::Error,
      writer_queue_capacity: 1024,
      replay_max_events_per_second: Some(5000),
      replay_health_poll_interval: Duration::from_millis(100),
    }
  }
}

impl LogOptions {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      root_path: path.into(),
      ..Default::default()
    }
  }

  pub fn with_ancient_mode(mut self, mode: AncientMode) -> Self {
    self.ancient_mode = mode;
    self
  }

  /// Rejects option combinations the writer cannot work with.
  pub fn validate(&self) -> Result<()> {
    if self.preferred_segment_size == 0 {
      return Err(Error::Config("preferred_segment_size must be greater than zero".into()));
    }
    if self.minimum_span == 0 {
      return Err(Error::Config("minimum_span must be greater than zero".into()));
    }
    if self.span_utilization_window == 0 {
      return Err(Error::Config("span_utilization_window must be greater than zero".into()));
    }
    if !(self.bootstrap_span_overlap_factor >= 1.0) || !(self.span_overlap_factor >= 1.0) {
      return Err(Error::Config(format!(
        "overlap factors must be >= 1.0 (bootstrap: {}, steady: {})",
        self.bootstrap_span_overlap_factor, self.span_overlap_factor
      )));
    }
    if self.writer_queue_capacity == 0 {
      return Err(Error::Config("writer_queue_capacity must be greater than zero".into()));
    }
    if self.replay_max_events_per_second == Some(0) {
      return Err(Error::Config("replay_max_events_per_second must be positive when set".into()));
    }
    Ok(())
  }
}
