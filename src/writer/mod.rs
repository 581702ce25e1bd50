//! The synchronous write path.
//!
//! [`LogWriter`] turns a stream of sequenced events into segment appends and
//! decides when a physical flush is needed. [`queue::AsyncLogWriter`] runs the
//! same writer on a dedicated thread behind a bounded command queue.

pub mod queue;

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::AncientMode;
use crate::durability::DurabilityTracker;
use crate::error::{Error, Result};
use crate::event::{LogEvent, Sequenced};
use crate::index::SegmentIndex;
use crate::manager::SegmentManager;
use crate::replay::LiveStreaming;

/// Writes events to the log and reports durability.
///
/// Until [`begin_live_streaming`](Self::begin_live_streaming) is called the
/// writer is replaying: events handed to it are already in the log, so writes
/// are skipped and immediately count as durable.
pub struct LogWriter<E: LogEvent> {
  manager: SegmentManager,
  durability: Arc<DurabilityTracker>,
  ancient_mode: AncientMode,

  streaming: bool,
  minimum_to_store: Option<u64>,

  last_written: Option<u64>,
  last_flushed: Option<u64>,
  /// Sequence numbers callers asked to make durable, in submission order.
  flush_requests: VecDeque<u64>,

  buffer: Vec<u8>,
  closed: bool,
  _event: PhantomData<fn(E)>,
}

impl<E: LogEvent> LogWriter<E> {
  pub fn new(manager: SegmentManager, durability: Arc<DurabilityTracker>) -> Self {
    let ancient_mode = manager.options().ancient_mode;
    Self {
      manager,
      durability,
      ancient_mode,
      streaming: false,
      minimum_to_store: None,
      last_written: None,
      last_flushed: None,
      flush_requests: VecDeque::new(),
      buffer: Vec::new(),
      closed: false,
      _event: PhantomData,
    }
  }

  pub fn durability(&self) -> Arc<DurabilityTracker> {
    self.durability.clone()
  }

  pub fn index(&self) -> &SegmentIndex {
    self.manager.index()
  }

  pub fn is_streaming(&self) -> bool {
    self.streaming
  }

  /// Sequence number of the last event written or dropped as ancient.
  pub fn last_written(&self) -> Option<u64> {
    self.last_written
  }

  /// Appends an event.
  ///
  /// Returns `Some(n)` when this call made everything up to sequence number
  /// `n` durable, `None` otherwise.
  ///
  /// Ancient events are dropped and marked stale in the durability tracker, so
  /// they are never reported durable. They still count as processed: flush
  /// requests up to their sequence number complete once everything written
  /// before them is flushed.
  pub fn write_event(&mut self, event: &Sequenced<E>) -> Result<Option<u64>> {
    self.ensure_open()?;
    let sequence_number = event.sequence_number;

    if !self.streaming {
      self.durability.advance_to(sequence_number);
      return Ok(Some(sequence_number));
    }

    let indicator = event.event.ancient_indicator(self.ancient_mode);
    if indicator < self.manager.non_ancient_boundary() {
      self.durability.mark_stale(sequence_number);
      self.last_written = Some(self.last_written.map_or(sequence_number, |w| w.max(sequence_number)));
      return self.process_flush_requests();
    }

    self.buffer.clear();
    self.buffer.reserve(event.event.encoded_len());
    event.event.encode(&mut self.buffer)?;

    let previous = self.last_written;
    let sealed = self.manager.write(&self.buffer, indicator)?;
    self.last_written = Some(sequence_number);

    let mut durable = None;
    if sealed {
      if let Some(previous) = previous {
        self.mark_flushed(previous);
        durable = Some(previous);
      }
      self.prune_if_requested()?;
    }
    if let Some(flushed) = self.process_flush_requests()? {
      durable = Some(flushed);
    }
    Ok(durable)
  }

  /// Asks for `sequence_number` to become durable. The flush happens now if the
  /// event was already written, otherwise as soon as it is.
  pub fn submit_flush_request(&mut self, sequence_number: u64) -> Result<Option<u64>> {
    self.ensure_open()?;
    self.flush_requests.push_back(sequence_number);
    self.process_flush_requests()
  }

  /// Starts a new stream origin. The open segment is sealed, so everything
  /// written so far becomes durable and is reported.
  pub fn register_discontinuity(&mut self, new_origin: u64) -> Result<Option<u64>> {
    self.ensure_open()?;
    if !self.streaming {
      return Err(Error::Misuse(
        "a discontinuity cannot be registered before live streaming begins".into(),
      ));
    }
    let sealed = self.manager.register_discontinuity(new_origin)?;
    if !sealed {
      return Ok(None);
    }
    self.prune_if_requested()?;
    let Some(last) = self.last_written else {
      return Ok(None);
    };
    self.mark_flushed(last);
    Ok(Some(last))
  }

  pub fn update_non_ancient_boundary(&mut self, bound: u64) -> Result<()> {
    self.ensure_open()?;
    self.manager.update_non_ancient_boundary(bound)
  }

  /// Lets the log discard segments holding only events below `indicator`.
  /// Applied immediately while streaming, deferred until streaming otherwise.
  pub fn prune_below(&mut self, indicator: u64) -> Result<()> {
    self.ensure_open()?;
    self.minimum_to_store = Some(indicator);
    self.prune_if_requested()
  }

  /// Ends replay. From now on events are appended to the log.
  pub fn begin_live_streaming(&mut self) -> Result<()> {
    self.ensure_open()?;
    if self.streaming {
      return Ok(());
    }
    self.streaming = true;
    tracing::info!(
      target: "pces_log",
      "Live streaming started at origin {} with {} segment(s) on disk",
      self.manager.origin(),
      self.manager.index().len()
    );
    self.prune_if_requested()
  }

  /// Seals the open segment, making every written event durable. Any later
  /// call fails with `WriterStopped`.
  pub fn close(&mut self) -> Result<()> {
    if self.closed {
      return Ok(());
    }
    self.closed = true;
    self.manager.close()?;
    if let Some(last) = self.last_written {
      self.mark_flushed(last);
    }
    Ok(())
  }

  /// Pops every request already covered by the last write. Flushes once if any
  /// of them is not durable yet.
  fn process_flush_requests(&mut self) -> Result<Option<u64>> {
    let Some(last_written) = self.last_written else {
      return Ok(None);
    };

    let mut flush_needed = false;
    while let Some(&head) = self.flush_requests.front() {
      if head > last_written {
        break;
      }
      self.flush_requests.pop_front();
      if self.last_flushed.map_or(true, |flushed| head > flushed) {
        flush_needed = true;
      }
    }

    if !flush_needed {
      return Ok(None);
    }
    self.manager.flush()?;
    self.mark_flushed(last_written);
    Ok(Some(last_written))
  }

  fn mark_flushed(&mut self, sequence_number: u64) {
    self.last_flushed = Some(self.last_flushed.map_or(sequence_number, |f| f.max(sequence_number)));
    self.durability.advance_to(sequence_number);
  }

  fn prune_if_requested(&mut self) -> Result<()> {
    if !self.streaming {
      return Ok(());
    }
    if let Some(minimum) = self.minimum_to_store {
      self.manager.prune(minimum)?;
    }
    Ok(())
  }

  fn ensure_open(&self) -> Result<()> {
    if self.closed {
      return Err(Error::WriterStopped);
    }
    Ok(())
  }
}

impl<E: LogEvent> LiveStreaming for LogWriter<E> {
  fn begin_live_streaming(&mut self) -> Result<()> {
    LogWriter::begin_live_streaming(self)
  }
}

impl<E: LogEvent> Drop for LogWriter<E> {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      tracing::error!(
        target: "pces_log",
        "Failed to seal the open segment on drop. Events after sequence number {:?} may not be durable: {}",
        self.last_flushed,
        e
      );
    }
  }
}
