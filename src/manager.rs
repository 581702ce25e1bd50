use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use crate::clock::Clock;
use crate::config::LogOptions;
use crate::descriptor::SegmentDescriptor;
use crate::error::{Error, Result};
use crate::index::SegmentIndex;
use crate::recycle::{self, RecycleBin};
use crate::segment::{self, ActiveSegment};
use crate::sizing::SpanHeuristic;

/// Owns the segment index and the single segment open for appending.
///
/// Decides when to roll to a new segment, seals segments (recording their
/// utilized span and compacting their names) and prunes old ones.
pub struct SegmentManager {
  options: LogOptions,
  clock: Arc<dyn Clock>,
  recycle_bin: Arc<dyn RecycleBin>,
  index: SegmentIndex,
  heuristic: SpanHeuristic,
  active: Option<ActiveSegment>,
  non_ancient_boundary: u64,
  origin: u64,
  next_sequence_number: u64,
}

impl SegmentManager {
  pub fn new(
    options: LogOptions,
    index: SegmentIndex,
    origin: u64,
    clock: Arc<dyn Clock>,
    recycle_bin: Arc<dyn RecycleBin>,
  ) -> Self {
    let next_sequence_number = index.last().map_or(0, |d| d.sequence_number() + 1);
    let heuristic = SpanHeuristic::new(&options);
    Self {
      options,
      clock,
      recycle_bin,
      index,
      heuristic,
      active: None,
      non_ancient_boundary: 0,
      origin,
      next_sequence_number,
    }
  }

  pub fn index(&self) -> &SegmentIndex {
    &self.index
  }

  pub fn options(&self) -> &LogOptions {
    &self.options
  }

  pub fn origin(&self) -> u64 {
    self.origin
  }

  pub fn non_ancient_boundary(&self) -> u64 {
    self.non_ancient_boundary
  }

  pub fn active_descriptor(&self) -> Option<&SegmentDescriptor> {
    self.active.as_ref().map(|a| a.descriptor())
  }

  /// Makes sure an open segment can take an event with `indicator`. Seals the
  /// open segment when it cannot hold the indicator or has reached the
  /// preferred size. Returns whether a segment was sealed.
  pub fn prepare(&mut self, indicator: u64) -> Result<bool> {
    let must_roll = self.active.as_ref().map_or(false, |active| {
      !active.descriptor().can_contain(indicator) || active.size() >= self.options.preferred_segment_size
    });
    let sealed = must_roll && self.seal()?.is_some();
    if self.active.is_none() {
      self.open_segment(indicator)?;
    }
    Ok(sealed)
  }

  /// Appends one encoded event. Returns whether a segment was sealed first, in
  /// which case everything written before this event is durable.
  pub fn write(&mut self, payload: &[u8], indicator: u64) -> Result<bool> {
    let sealed = self.prepare(indicator)?;
    match self.active.as_mut() {
      Some(active) => active.append(payload, indicator)?,
      None => return Err(Error::InvariantViolation("no open segment after prepare".into())),
    }
    Ok(sealed)
  }

  /// Makes every appended event durable. A no-op without an open segment.
  pub fn flush(&mut self) -> Result<()> {
    if let Some(active) = self.active.as_mut() {
      active.flush()?;
    }
    Ok(())
  }

  /// Closes the open segment, if any, and registers its final descriptor.
  pub fn seal(&mut self) -> Result<Option<SegmentDescriptor>> {
    let Some(active) = self.active.take() else {
      return Ok(None);
    };

    let size = active.size();
    let utilized = active.utilized_span();
    let highest = active.highest_indicator();
    let events = active.event_count();
    let descriptor = active.close()?;
    self.heuristic.record_sealed(utilized, size);

    let position = self.index.len().checked_sub(1).ok_or_else(|| {
      Error::InvariantViolation(format!("sealed segment {} is missing from the index", descriptor))
    })?;

    let final_descriptor = if self.options.compact_sealed_segments {
      let previous_upper = position
        .checked_sub(1)
        .and_then(|i| self.index.get(i))
        .map_or(0, |d| d.upper_bound());
      let upper = segment::compacted_upper(&descriptor, highest, previous_upper);
      let compacted = segment::compact(&descriptor, upper)?;
      self.index.set(position, compacted.clone())?;
      compacted
    } else {
      descriptor
    };

    tracing::debug!(
      target: "pces_log",
      "Sealed segment {} ({} events, {} bytes, utilized span {})",
      final_descriptor,
      events,
      size,
      utilized
    );
    Ok(Some(final_descriptor))
  }

  /// Raises the non-ancient boundary. Lowering it is an error and leaves the
  /// boundary unchanged.
  pub fn update_non_ancient_boundary(&mut self, bound: u64) -> Result<()> {
    if bound < self.non_ancient_boundary {
      return Err(Error::Misuse(format!(
        "non-ancient boundary cannot decrease from {} to {}",
        self.non_ancient_boundary, bound
      )));
    }
    self.non_ancient_boundary = bound;
    Ok(())
  }

  /// Starts a new stream origin. Seals the open segment so that the next event
  /// lands in a segment carrying `new_origin`. Returns whether a segment was
  /// sealed.
  pub fn register_discontinuity(&mut self, new_origin: u64) -> Result<bool> {
    if new_origin <= self.origin {
      return Err(Error::Misuse(format!(
        "discontinuity origin {} must be greater than the current origin {}",
        new_origin, self.origin
      )));
    }
    let sealed = self.seal()?.is_some();
    tracing::info!(
      target: "pces_log",
      "Discontinuity registered. Origin {} -> {}",
      self.origin,
      new_origin
    );
    self.origin = new_origin;
    Ok(sealed)
  }

  /// Recycles leading segments that hold only events below
  /// `lower_bound_to_keep` and are older than the retention period. The open
  /// segment is never removed. Returns the number of recycled segments.
  pub fn prune(&mut self, lower_bound_to_keep: u64) -> Result<usize> {
    let retention = ChronoDuration::from_std(self.options.minimum_retention_period)
      .map_err(|e| Error::Config(format!("minimum_retention_period out of range: {}", e)))?;
    let cutoff = self.clock.now() - retention;

    let mut removed = 0;
    loop {
      let open_segments = usize::from(self.active.is_some());
      if self.index.len() <= open_segments {
        break;
      }
      let Some(first) = self.index.first() else {
        break;
      };
      if first.upper_bound() >= lower_bound_to_keep || first.created_at() >= cutoff {
        break;
      }
      let Some(victim) = self.index.pop_first() else {
        break;
      };
      self.recycle_bin.recycle(victim.path())?;
      if let Some(dir) = victim.path().parent() {
        recycle::remove_empty_parents(dir, &self.options.root_path);
      }
      removed += 1;
    }

    if removed > 0 {
      tracing::debug!(
        target: "pces_log",
        "Pruned {} segment(s) below indicator {}",
        removed,
        lower_bound_to_keep
      );
    }
    Ok(removed)
  }

  /// Seals the open segment. The manager can keep writing afterwards.
  pub fn close(&mut self) -> Result<()> {
    self.seal().map(drop)
  }

  fn open_segment(&mut self, indicator: u64) -> Result<()> {
    let last = self.index.last();
    let lower = last.map_or(self.non_ancient_boundary, |l| self.non_ancient_boundary.max(l.lower_bound()));
    let span = self.heuristic.next_span(lower, indicator);
    let mut upper = lower.saturating_add(span);
    let mut created_at = self.clock.now();
    if let Some(last) = last {
      upper = upper.max(last.upper_bound());
      created_at = created_at.max(last.created_at());
    }

    let descriptor = SegmentDescriptor::new(
      self.options.ancient_mode,
      created_at,
      self.next_sequence_number,
      lower,
      upper,
      self.origin,
      &self.options.root_path,
    )?;
    if !descriptor.can_contain(indicator) {
      return Err(Error::InvariantViolation(format!(
        "event with indicator {} cannot be placed in new segment {}",
        indicator, descriptor
      )));
    }

    self.index.append(descriptor.clone())?;
    match ActiveSegment::create(descriptor, &self.options) {
      Ok(active) => {
        tracing::debug!(target: "pces_log", "Opened segment {}", active.descriptor());
        self.active = Some(active);
        self.next_sequence_number += 1;
        Ok(())
      }
      Err(e) => {
        self.index.pop_last();
        Err(e)
      }
    }
  }
}
