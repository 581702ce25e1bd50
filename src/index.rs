use std::collections::VecDeque;
use std::fs;
use std::path::Path;

use crate::config::LogOptions;
use crate::descriptor::SegmentDescriptor;
use crate::error::{Error, Result};
use crate::naming::{self, SEGMENT_FILE_EXTENSION};
use crate::recycle::RecycleBin;

/// Ordered in-memory view of the segments on disk.
///
/// Every mutation re-checks the ordering invariants against the neighbouring
/// segments, so lookups can rely on sorted bounds and origins. The index owns
/// no file handles.
#[derive(Debug, Clone, Default)]
pub struct SegmentIndex {
  segments: VecDeque<SegmentDescriptor>,
  permit_gaps: bool,
}

impl SegmentIndex {
  pub fn new(permit_gaps: bool) -> Self {
    Self {
      segments: VecDeque::new(),
      permit_gaps,
    }
  }

  /// Walks `options.root_path`, decodes every segment file and returns them
  /// ordered by sequence number.
  ///
  /// Files whose names cannot be decoded are skipped with a warning. Segments
  /// bounded by the other ancient mode and broken ordering are fatal.
  pub fn scan(options: &LogOptions) -> Result<Self> {
    let mut found = Vec::new();
    if options.root_path.exists() {
      collect_segments(&options.root_path, &mut found)?;
    }

    for d in &found {
      if d.ancient_mode() != options.ancient_mode {
        return Err(Error::InvariantViolation(format!(
          "segment {} uses {:?} bounds but the log is configured for {:?}",
          d,
          d.ancient_mode(),
          options.ancient_mode
        )));
      }
    }

    found.sort_by_key(|d| d.sequence_number());

    let mut index = Self::new(options.permit_gaps);
    for d in found {
      index.append(d)?;
    }
    Ok(index)
  }

  /// Adds a segment at the end. It must follow the current last segment.
  pub fn append(&mut self, descriptor: SegmentDescriptor) -> Result<()> {
    if let Some(last) = self.segments.back() {
      descriptor.check_follows(last, self.permit_gaps)?;
    }
    self.segments.push_back(descriptor);
    Ok(())
  }

  /// Replaces the segment at `i`. The replacement must keep the order with
  /// both neighbours.
  pub fn set(&mut self, i: usize, descriptor: SegmentDescriptor) -> Result<()> {
    if i >= self.segments.len() {
      return Err(Error::Misuse(format!(
        "index position {} out of range (len {})",
        i,
        self.segments.len()
      )));
    }
    if i > 0 {
      descriptor.check_follows(&self.segments[i - 1], self.permit_gaps)?;
    }
    if let Some(next) = self.segments.get(i + 1) {
      next.check_follows(&descriptor, self.permit_gaps)?;
    }
    self.segments[i] = descriptor;
    Ok(())
  }

  pub fn get(&self, i: usize) -> Option<&SegmentDescriptor> {
    self.segments.get(i)
  }

  pub fn first(&self) -> Option<&SegmentDescriptor> {
    self.segments.front()
  }

  pub fn last(&self) -> Option<&SegmentDescriptor> {
    self.segments.back()
  }

  pub fn pop_first(&mut self) -> Option<SegmentDescriptor> {
    self.segments.pop_front()
  }

  pub fn pop_last(&mut self) -> Option<SegmentDescriptor> {
    self.segments.pop_back()
  }

  pub fn len(&self) -> usize {
    self.segments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.segments.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &SegmentDescriptor> + '_ {
    self.segments.iter()
  }

  /// Position of the first segment of the stream a node restarting at
  /// `starting_round` resumes: the start of the run with the largest origin not
  /// exceeding `starting_round`. Returns 0 when every origin exceeds it.
  pub fn find_first_relevant(&self, starting_round: u64) -> usize {
    // Origins never decrease, so this is the end of the "<= starting_round" prefix.
    let end = self.segments.partition_point(|d| d.origin() <= starting_round);
    if end == 0 {
      return 0;
    }
    let origin = self.segments[end - 1].origin();
    self.segments.partition_point(|d| d.origin() < origin)
  }

  /// Position of the first segment at or after `from` that may hold events with
  /// indicator `target`.
  pub fn find_first_containing(&self, target: u64, from: usize) -> Option<usize> {
    if from >= self.segments.len() {
      return None;
    }
    // Upper bounds never decrease, so the global partition point is also the
    // first match at or after `from` once clamped.
    let pos = self.segments.partition_point(|d| d.upper_bound() < target).max(from);

    if pos >= self.segments.len() {
      tracing::warn!(
        target: "pces_log",
        "No segment holds indicator {} (highest upper bound {}). Events between may never have been durable.",
        target,
        self.segments.back().map_or(0, |d| d.upper_bound())
      );
      return None;
    }
    Some(pos)
  }

  /// Origin a writer continues with after restarting at `starting_round`.
  pub fn initial_origin(&self, starting_round: u64) -> u64 {
    self
      .segments
      .get(self.find_first_relevant(starting_round))
      .map_or(starting_round, |d| d.origin())
  }

  /// Drops trailing segments written by a stream the node is not resuming
  /// (origin above `starting_round`). Returns how many were recycled.
  pub fn resolve_discontinuities(&mut self, starting_round: u64, recycle_bin: &dyn RecycleBin) -> Result<usize> {
    let mut removed = 0;
    while let Some(last) = self.segments.back() {
      if last.origin() <= starting_round {
        break;
      }
      let Some(d) = self.segments.pop_back() else {
        break;
      };
      recycle_bin.recycle(d.path())?;
      removed += 1;
    }
    if removed > 0 {
      tracing::info!(
        target: "pces_log",
        "Recycled {} segment(s) with an origin above starting round {}",
        removed,
        starting_round
      );
    }
    Ok(removed)
  }

  /// Segments a replay starting at `lower_bound` for `starting_round` must read.
  pub fn segments_for_replay(&self, lower_bound: u64, starting_round: u64) -> Vec<SegmentDescriptor> {
    let first_relevant = self.find_first_relevant(starting_round);
    match self.find_first_containing(lower_bound, first_relevant) {
      Some(start) => self.segments.range(start..).cloned().collect(),
      None => Vec::new(),
    }
  }
}

fn collect_segments(dir: &Path, found: &mut Vec<SegmentDescriptor>) -> Result<()> {
  for entry in fs::read_dir(dir)? {
    let entry = entry?;
    let path = entry.path();
    if entry.file_type()?.is_dir() {
      collect_segments(&path, found)?;
      continue;
    }
    if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_FILE_EXTENSION) {
      continue;
    }
    match naming::decode(&path) {
      Ok(d) => found.push(d),
      Err(e) => {
        tracing::warn!(target: "pces_log", "Skipping unreadable segment file {}: {}", path.display(), e);
      }
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::AncientMode;
  use crate::recycle::DeletingRecycleBin;
  use chrono::{TimeZone, Utc};

  fn seg(root: &Path, seq: u64, lower: u64, upper: u64, origin: u64) -> SegmentDescriptor {
    let ts = Utc.timestamp_opt(1_700_000_000 + seq as i64, 0).unwrap();
    SegmentDescriptor::new(AncientMode::Generation, ts, seq, lower, upper, origin, root).unwrap()
  }

  fn index_of(specs: &[(u64, u64, u64)]) -> SegmentIndex {
    let mut index = SegmentIndex::new(false);
    for (seq, &(lower, upper, origin)) in specs.iter().enumerate() {
      index.append(seg(Path::new("/log"), seq as u64, lower, upper, origin)).unwrap();
    }
    index
  }

  #[test]
  fn test_append_validates_order() {
    let mut index = index_of(&[(0, 10, 0)]);
    assert!(index.append(seg(Path::new("/log"), 1, 0, 9, 0)).is_err());
    assert!(index.append(seg(Path::new("/log"), 2, 0, 10, 0)).is_err());
    assert_eq!(index.len(), 1);

    let mut gappy = SegmentIndex::new(true);
    gappy.append(seg(Path::new("/log"), 0, 0, 10, 0)).unwrap();
    gappy.append(seg(Path::new("/log"), 5, 0, 10, 0)).unwrap();
    assert_eq!(gappy.len(), 2);
  }

  #[test]
  fn test_set_checks_both_neighbours() {
    let mut index = index_of(&[(0, 10, 0), (5, 20, 0), (10, 30, 0)]);
    let middle = index.get(1).unwrap().clone();
    assert!(index.set(1, middle.with_compacted_span(9).unwrap()).is_err());
    assert!(index.set(1, middle.with_compacted_span(12).unwrap()).is_ok());
    assert_eq!(index.get(1).unwrap().upper_bound(), 12);
  }

  #[test]
  fn test_find_first_relevant() {
    let index = index_of(&[(0, 10, 1), (5, 20, 1), (10, 30, 2), (15, 40, 2), (20, 50, 5)]);
    assert_eq!(index.find_first_relevant(0), 0);
    assert_eq!(index.find_first_relevant(1), 0);
    assert_eq!(index.find_first_relevant(2), 2);
    assert_eq!(index.find_first_relevant(4), 2);
    assert_eq!(index.find_first_relevant(5), 4);
    assert_eq!(index.find_first_relevant(100), 4);

    assert_eq!(index.initial_origin(3), 2);
    assert_eq!(SegmentIndex::new(false).initial_origin(3), 3);
  }

  #[test]
  fn test_find_first_containing() {
    let index = index_of(&[(0, 10, 0), (5, 20, 0), (10, 30, 0)]);
    assert_eq!(index.find_first_containing(0, 0), Some(0));
    assert_eq!(index.find_first_containing(10, 0), Some(0));
    assert_eq!(index.find_first_containing(11, 0), Some(1));
    assert_eq!(index.find_first_containing(11, 2), Some(2));
    assert_eq!(index.find_first_containing(31, 0), None);
    assert_eq!(index.find_first_containing(0, 3), None);
  }

  #[test]
  fn test_find_first_containing_after_pop() {
    let mut index = index_of(&[(0, 10, 0), (5, 20, 0), (10, 30, 0)]);
    index.pop_first();
    index.append(seg(Path::new("/log"), 3, 15, 40, 0)).unwrap();
    index.append(seg(Path::new("/log"), 4, 20, 50, 0)).unwrap();
    assert_eq!(index.find_first_containing(35, 0), Some(2));
    assert_eq!(index.find_first_containing(35, 3), Some(3));
    assert_eq!(index.find_first_containing(1, 1), Some(1));
  }

  #[test]
  fn test_resolve_discontinuities_removes_newer_origins() {
    let dir = tempfile::tempdir().unwrap();
    let mut index = SegmentIndex::new(false);
    for (seq, origin) in [(0u64, 1u64), (1, 1), (2, 7), (3, 7)] {
      let d = seg(dir.path(), seq, 0, 10, origin);
      fs::create_dir_all(d.path().parent().unwrap()).unwrap();
      fs::write(d.path(), b"").unwrap();
      index.append(d).unwrap();
    }

    let removed = index.resolve_discontinuities(3, &DeletingRecycleBin).unwrap();
    assert_eq!(removed, 2);
    assert_eq!(index.len(), 2);
    assert_eq!(index.last().unwrap().origin(), 1);
  }

  #[test]
  fn test_scan_skips_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let d = seg(dir.path(), 0, 0, 10, 0);
    fs::create_dir_all(d.path().parent().unwrap()).unwrap();
    fs::write(d.path(), b"").unwrap();
    fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
    fs::write(d.path().parent().unwrap().join("garbage.pces"), b"").unwrap();

    let index = SegmentIndex::scan(&LogOptions::new(dir.path())).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.first().unwrap(), &d);
  }

  #[test]
  fn test_scan_rejects_other_mode() {
    let dir = tempfile::tempdir().unwrap();
    let d = seg(dir.path(), 0, 0, 10, 0);
    fs::create_dir_all(d.path().parent().unwrap()).unwrap();
    fs::write(d.path(), b"").unwrap();

    let opts = LogOptions::new(dir.path()).with_ancient_mode(AncientMode::BirthRound);
    assert!(matches!(SegmentIndex::scan(&opts), Err(Error::InvariantViolation(_))));
  }
}
