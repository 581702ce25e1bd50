use std::collections::VecDeque;

use crate::config::LogOptions;

/// Chooses the span of each new segment from the spans recent segments
/// actually used.
///
/// Until one sealed segment reaches the preferred byte size the heuristic is
/// in bootstrap mode: spans are grown aggressively from the last observed span
/// so that the log quickly finds a size that fills segments. Afterwards it uses
/// a running average over the last few sealed segments.
#[derive(Debug, Clone)]
pub struct SpanHeuristic {
  bootstrap: bool,
  recent_spans: VecDeque<u64>,
  last_span: Option<u64>,

  window: usize,
  preferred_segment_size: u64,
  bootstrap_span: u64,
  bootstrap_factor: f64,
  factor: f64,
  minimum_span: u64,
}

impl SpanHeuristic {
  pub fn new(options: &LogOptions) -> Self {
    Self {
      bootstrap: true,
      recent_spans: VecDeque::with_capacity(options.span_utilization_window),
      last_span: None,
      window: options.span_utilization_window.max(1),
      preferred_segment_size: options.preferred_segment_size,
      bootstrap_span: options.bootstrap_span,
      bootstrap_factor: options.bootstrap_span_overlap_factor,
      factor: options.span_overlap_factor,
      minimum_span: options.minimum_span,
    }
  }

  pub fn is_bootstrapping(&self) -> bool {
    self.bootstrap
  }

  /// Records a sealed segment's utilized span and final size in bytes.
  pub fn record_sealed(&mut self, utilized_span: u64, size_bytes: u64) {
    if self.recent_spans.len() == self.window {
      self.recent_spans.pop_front();
    }
    self.recent_spans.push_back(utilized_span);
    self.last_span = Some(utilized_span);

    if self.bootstrap && size_bytes >= self.preferred_segment_size {
      self.bootstrap = false;
      tracing::debug!(
        target: "pces_log",
        "Segment of {} bytes reached the preferred size. Leaving bootstrap mode.",
        size_bytes
      );
    }
  }

  pub fn running_average(&self) -> Option<u64> {
    if self.recent_spans.is_empty() {
      return None;
    }
    let sum: u128 = self.recent_spans.iter().map(|&s| s as u128).sum();
    Some((sum / self.recent_spans.len() as u128) as u64)
  }

  /// Span for a segment starting at `lower_bound` whose first event has
  /// indicator `next_indicator`.
  pub fn next_span(&self, lower_bound: u64, next_indicator: u64) -> u64 {
    let (basis, factor) = if self.bootstrap {
      (self.last_span.unwrap_or(self.bootstrap_span), self.bootstrap_factor)
    } else {
      (self.running_average().unwrap_or(self.bootstrap_span), self.factor)
    };
    // Saturating float to int conversion.
    let desired = (basis as f64 * factor).ceil() as u64;
    let floor = next_indicator.saturating_add(self.minimum_span).saturating_sub(lower_bound);
    desired.max(floor)
  }
}
