//! Tracks which stream sequence numbers are known to be on stable storage.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct State {
  latest: Option<u64>,
  /// Events dropped as ancient. They are never written, so the watermark
  /// passing them does not make them durable.
  stale: BTreeSet<u64>,
}

impl State {
  fn is_durable(&self, sequence_number: u64) -> bool {
    self.latest.map_or(false, |latest| latest >= sequence_number) && !self.stale.contains(&sequence_number)
  }

  fn is_settled(&self, sequence_number: u64) -> bool {
    self.stale.contains(&sequence_number) || self.is_durable(sequence_number)
  }
}

/// A monotonically advancing "latest durable sequence number".
///
/// The writer advances it after every confirmed flush. Any number of threads
/// may wait for a particular event to become durable. Sequence numbers of
/// events the writer dropped as ancient are remembered and never reported as
/// durable.
#[derive(Debug, Default)]
pub struct DurabilityTracker {
  state: Mutex<State>,
  changed: Condvar,
}

impl DurabilityTracker {
  /// Creates a tracker that already considers `initial` (and everything before
  /// it) durable. Replay supplies the last sequence number it recovered.
  pub fn new(initial: Option<u64>) -> Self {
    Self {
      state: Mutex::new(State {
        latest: initial,
        stale: BTreeSet::new(),
      }),
      changed: Condvar::new(),
    }
  }

  /// Raises the watermark to `sequence_number`. Lower values are ignored.
  pub fn advance_to(&self, sequence_number: u64) {
    let mut state = self.state.lock();
    if state.latest.map_or(true, |current| sequence_number > current) {
      state.latest = Some(sequence_number);
      self.changed.notify_all();
    }
  }

  /// Records that `sequence_number` was dropped without being written.
  /// Waiters on it are released and told it will never be durable.
  pub fn mark_stale(&self, sequence_number: u64) {
    let mut state = self.state.lock();
    if state.stale.insert(sequence_number) {
      self.changed.notify_all();
    }
  }

  pub fn latest(&self) -> Option<u64> {
    self.state.lock().latest
  }

  pub fn is_durable(&self, sequence_number: u64) -> bool {
    self.state.lock().is_durable(sequence_number)
  }

  pub fn is_stale(&self, sequence_number: u64) -> bool {
    self.state.lock().stale.contains(&sequence_number)
  }

  /// Blocks until `sequence_number` is durable or known to be stale. Returns
  /// whether it is durable.
  pub fn await_durable(&self, sequence_number: u64) -> bool {
    let mut state = self.state.lock();
    while !state.is_settled(sequence_number) {
      self.changed.wait(&mut state);
    }
    state.is_durable(sequence_number)
  }

  /// Like [`await_durable`](Self::await_durable), giving up after `timeout`.
  /// A timeout too large to represent waits without a deadline.
  pub fn await_durable_timeout(&self, sequence_number: u64, timeout: Duration) -> bool {
    let Some(deadline) = Instant::now().checked_add(timeout) else {
      return self.await_durable(sequence_number);
    };
    let mut state = self.state.lock();
    while !state.is_settled(sequence_number) {
      if self.changed.wait_until(&mut state, deadline).timed_out() {
        break;
      }
    }
    state.is_durable(sequence_number)
  }
}
