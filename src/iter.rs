use std::collections::VecDeque;
use std::marker::PhantomData;

use crate::config::{AncientMode, LogOptions};
use crate::descriptor::SegmentDescriptor;
use crate::error::Result;
use crate::event::LogEvent;
use crate::segment::SegmentReader;

/// An iterator that sequentially yields the events stored in a list of
/// segments, skipping events below a lower bound.
///
/// A segment that ends in the middle of a record (the node crashed while
/// writing it) is not an error: the events before the partial record are
/// returned, the segment is remembered as truncated and reading continues with
/// the next segment.
pub struct ReplayIterator<E: LogEvent> {
  segments: VecDeque<SegmentDescriptor>,
  options: LogOptions,
  ancient_mode: AncientMode,
  lower_bound: u64,

  reader: Option<SegmentReader>,
  current: Option<SegmentDescriptor>,
  truncated: Vec<SegmentDescriptor>,
  failed: bool,
  _event: PhantomData<fn() -> E>,
}

impl<E: LogEvent> ReplayIterator<E> {
  pub fn new(segments: Vec<SegmentDescriptor>, lower_bound: u64, options: &LogOptions) -> Self {
    Self {
      segments: segments.into(),
      options: options.clone(),
      ancient_mode: options.ancient_mode,
      lower_bound,
      reader: None,
      current: None,
      truncated: Vec::new(),
      failed: false,
      _event: PhantomData,
    }
  }

  /// Number of segments found to end in a partial record so far.
  pub fn truncated_segment_count(&self) -> usize {
    self.truncated.len()
  }

  pub fn truncated_segments(&self) -> &[SegmentDescriptor] {
    &self.truncated
  }

  /// Reads the next payload, moving through segments as they are exhausted.
  fn next_payload(&mut self) -> Result<Option<Vec<u8>>> {
    loop {
      if self.reader.is_none() {
        let Some(next) = self.segments.pop_front() else {
          return Ok(None);
        };
        self.reader = Some(SegmentReader::open(next.path(), &self.options)?);
        self.current = Some(next);
      }

      let Some(reader) = self.reader.as_mut() else {
        continue;
      };
      if let Some(payload) = reader.next_record()? {
        return Ok(Some(payload));
      }

      let truncated = reader.is_truncated();
      self.reader = None;
      if let Some(segment) = self.current.take() {
        if truncated {
          tracing::warn!(
            target: "pces_log",
            "Segment {} ends with a partial record. Continuing with the next segment.",
            segment
          );
          self.truncated.push(segment);
        }
      }
    }
  }
}

impl<E: LogEvent> Iterator for ReplayIterator<E> {
  type Item = Result<E>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.failed {
      return None;
    }
    loop {
      let payload = match self.next_payload() {
        Ok(Some(payload)) => payload,
        Ok(None) => return None,
        Err(e) => {
          self.failed = true;
          return Some(Err(e));
        }
      };

      match E::decode(&payload) {
        Ok(event) if event.ancient_indicator(self.ancient_mode) < self.lower_bound => continue,
        Ok(event) => return Some(Ok(event)),
        Err(e) => {
          self.failed = true;
          return Some(Err(e));
        }
      }
    }
  }
}
