//! Feeding recovered events back to the node at startup.

use std::thread;
use std::time::{Duration, Instant};

use crate::config::LogOptions;
use crate::error::Result;
use crate::event::LogEvent;
use crate::iter::ReplayIterator;

/// Implemented by writers that can switch from replay to live mode.
pub trait LiveStreaming {
  fn begin_live_streaming(&mut self) -> Result<()>;
}

/// Totals reported once replay finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaySummary {
  pub events: u64,
  pub payload_units: u64,
  pub truncated_segments: usize,
  pub elapsed: Duration,
}

/// Blocking token bucket that spaces out events to at most `rate` per second.
///
/// The bucket holds at most one second worth of tokens, so a pause in
/// consumption allows a short burst afterwards.
#[derive(Debug)]
struct RateLimiter {
  rate: f64,
  capacity: f64,
  tokens: f64,
  last_refill: Instant,
}

impl RateLimiter {
  fn new(events_per_second: u64) -> Self {
    let rate = events_per_second as f64;
    Self {
      rate,
      capacity: rate,
      tokens: rate,
      last_refill: Instant::now(),
    }
  }

  fn acquire(&mut self) {
    loop {
      let now = Instant::now();
      let elapsed = now.duration_since(self.last_refill).as_secs_f64();
      self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
      self.last_refill = now;

      if self.tokens >= 1.0 {
        self.tokens -= 1.0;
        return;
      }
      let missing = 1.0 - self.tokens;
      thread::sleep(Duration::from_secs_f64(missing / self.rate));
    }
  }
}

/// Pulls events out of a [`ReplayIterator`] and hands them to the node while
/// keeping the node from being flooded.
#[derive(Debug, Clone)]
pub struct ReplayDriver {
  max_events_per_second: Option<u64>,
  health_poll_interval: Duration,
}

impl ReplayDriver {
  pub fn new(options: &LogOptions) -> Self {
    Self {
      max_events_per_second: options.replay_max_events_per_second.filter(|&r| r > 0),
      health_poll_interval: options.replay_health_poll_interval,
    }
  }

  pub fn with_rate_limit(mut self, max_events_per_second: Option<u64>) -> Self {
    self.max_events_per_second = max_events_per_second.filter(|&r| r > 0);
    self
  }

  /// Replays every event, then switches `writer` to live streaming.
  ///
  /// Before each event `is_healthy` is polled; while it returns false the
  /// driver sleeps for the configured poll interval. The first error from the
  /// iterator or the consumer aborts replay and is returned; live streaming is
  /// not started in that case.
  pub fn run<E, H, C, W>(
    &self,
    mut events: ReplayIterator<E>,
    mut is_healthy: H,
    mut consumer: C,
    writer: &mut W,
  ) -> Result<ReplaySummary>
  where
    E: LogEvent,
    H: FnMut() -> bool,
    C: FnMut(E) -> Result<()>,
    W: LiveStreaming + ?Sized,
  {
    let start = Instant::now();
    let mut limiter = self.max_events_per_second.map(RateLimiter::new);
    let mut summary = ReplaySummary::default();

    for event in events.by_ref() {
      let event = event?;
      while !is_healthy() {
        thread::sleep(self.health_poll_interval);
      }
      if let Some(limiter) = limiter.as_mut() {
        limiter.acquire();
      }

      summary.events += 1;
      summary.payload_units += event.payload_units() as u64;
      consumer(event)?;
    }

    summary.truncated_segments = events.truncated_segment_count();
    summary.elapsed = start.elapsed();
    tracing::info!(
      target: "pces_log",
      "Replayed {} events ({} transactions) in {:?}. {} segment(s) ended with a partial record.",
      summary.events,
      summary.payload_units,
      summary.elapsed,
      summary.truncated_segments
    );

    writer.begin_live_streaming()?;
    Ok(summary)
  }
}
