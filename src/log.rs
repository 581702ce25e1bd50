use std::fs;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::LogOptions;
use crate::durability::DurabilityTracker;
use crate::error::{Error, Result};
use crate::event::LogEvent;
use crate::index::SegmentIndex;
use crate::iter::ReplayIterator;
use crate::manager::SegmentManager;
use crate::recycle::{DeletingRecycleBin, RecycleBin};
use crate::replay::ReplayDriver;
use crate::segment;
use crate::writer::queue::AsyncLogWriter;
use crate::writer::LogWriter;

/// A log opened at node startup.
///
/// Opening scans the directory, drops segments from streams the node is not
/// resuming and tightens the bound of the last segment. The log can then be
/// replayed and turned into a writer.
pub struct EventLog<E: LogEvent> {
  options: LogOptions,
  starting_round: u64,
  clock: Arc<dyn Clock>,
  recycle_bin: Arc<dyn RecycleBin>,
  index: SegmentIndex,
  durability: Arc<DurabilityTracker>,
  _event: PhantomData<fn() -> E>,
}

impl<E: LogEvent> EventLog<E> {
  pub fn open(options: LogOptions, starting_round: u64) -> Result<Self> {
    Self::open_with(options, starting_round, Arc::new(SystemClock), Arc::new(DeletingRecycleBin))
  }

  pub fn open_with(
    options: LogOptions,
    starting_round: u64,
    clock: Arc<dyn Clock>,
    recycle_bin: Arc<dyn RecycleBin>,
  ) -> Result<Self> {
    options.validate()?;
    fs::create_dir_all(&options.root_path)?;

    let mut index = SegmentIndex::scan(&options)?;
    index.resolve_discontinuities(starting_round, recycle_bin.as_ref())?;
    if options.compact_last_segment_on_startup {
      compact_last_segment::<E>(&mut index, &options)?;
    }

    tracing::info!(
      target: "pces_log",
      "Opened log at {} with {} segment(s), starting round {}",
      options.root_path.display(),
      index.len(),
      starting_round
    );

    Ok(Self {
      options,
      starting_round,
      clock,
      recycle_bin,
      index,
      durability: Arc::new(DurabilityTracker::new(None)),
      _event: PhantomData,
    })
  }

  pub fn options(&self) -> &LogOptions {
    &self.options
  }

  pub fn index(&self) -> &SegmentIndex {
    &self.index
  }

  pub fn durability(&self) -> Arc<DurabilityTracker> {
    self.durability.clone()
  }

  /// Events with an ancient indicator of at least `lower_bound`, oldest first.
  pub fn replay(&self, lower_bound: u64) -> ReplayIterator<E> {
    let segments = self.index.segments_for_replay(lower_bound, self.starting_round);
    ReplayIterator::new(segments, lower_bound, &self.options)
  }

  pub fn replay_driver(&self) -> ReplayDriver {
    ReplayDriver::new(&self.options)
  }

  pub fn into_writer(self) -> LogWriter<E> {
    let origin = self.index.initial_origin(self.starting_round);
    let manager = SegmentManager::new(self.options, self.index, origin, self.clock, self.recycle_bin);
    LogWriter::new(manager, self.durability)
  }

  pub fn into_async_writer(self) -> Result<AsyncLogWriter<E>> {
    let capacity = self.options.writer_queue_capacity;
    AsyncLogWriter::spawn(self.into_writer(), capacity)
  }
}

/// The last segment may have been open when the node stopped, so its name
/// still carries the speculative upper bound. Read it to find the bound it
/// actually needs.
fn compact_last_segment<E: LogEvent>(index: &mut SegmentIndex, options: &LogOptions) -> Result<()> {
  let Some(position) = index.len().checked_sub(1) else {
    return Ok(());
  };
  let Some(last) = index.get(position).cloned() else {
    return Ok(());
  };

  let mode = options.ancient_mode;
  let highest = segment::scan_highest_indicator(&last, options, |payload| {
    E::decode(payload).map(|event| event.ancient_indicator(mode))
  })?;
  if let Some(h) = highest {
    if !last.can_contain(h) {
      return Err(Error::InvariantViolation(format!(
        "segment {} holds an event with indicator {} outside its bounds",
        last, h
      )));
    }
  }

  let previous_upper = position
    .checked_sub(1)
    .and_then(|i| index.get(i))
    .map_or(0, |d| d.upper_bound());
  let upper = segment::compacted_upper(&last, highest, previous_upper);
  let compacted = segment::compact(&last, upper)?;
  index.set(position, compacted)
}
