//! # pces-log
//!
//! `pces-log` is the preconsensus event log of a BFT node: a segmented,
//! crash-safe write-ahead log that stores every gossiped event before it may
//! influence consensus, so that a restarted node can replay exactly the events
//! it had accepted.
//!
//! ## Key Features
//!
//! * **Self-describing segments**: Every file name carries the segment's
//!   sequence number, ancient indicator bounds and stream origin.
//! * **Adaptive segment spans**: New segments are sized from the spans recent
//!   segments actually used.
//! * **Flush on demand**: Callers ask for specific events to become durable and
//!   can wait on a [`DurabilityTracker`].
//! * **Crash tolerance**: A partial trailing record ends a segment quietly on
//!   replay. Segments from abandoned streams are recycled at startup.
//! * **Pruning**: Old segments are recycled once both the retention window and
//!   the caller's lowest needed bound allow it.
//!
//! ## Example
//!
//! ```no_run
//! use pces_log::{BasicEvent, EventLog, LogOptions, Sequencer};
//!
//! # fn main() -> pces_log::Result<()> {
//! let log = EventLog::<BasicEvent>::open(LogOptions::new("/var/lib/node/pces"), 0)?;
//!
//! // Replay what is already on disk, then switch to live writes.
//! let replayed: Vec<BasicEvent> = log.replay(0).collect::<pces_log::Result<_>>()?;
//! println!("recovered {} events", replayed.len());
//! let mut writer = log.into_writer();
//! writer.begin_live_streaming()?;
//!
//! let sequencer = Sequencer::new(0);
//! let event = sequencer.assign(BasicEvent::new(12, 3));
//! writer.write_event(&event)?;
//! writer.submit_flush_request(event.sequence_number)?;
//! assert!(writer.durability().is_durable(event.sequence_number));
//! # Ok(())
//! # }
//! ```

mod clock;
mod config;
mod descriptor;
mod durability;
mod error;
mod event;
mod frame;
mod index;
mod iter;
mod log;
mod manager;
pub mod naming;
mod recycle;
mod replay;
mod segment;
mod sizing;
pub mod writer;

// Re-exports for the flat public API
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AncientMode, CorruptionPolicy, LogOptions, ReadStrategy};
pub use descriptor::SegmentDescriptor;
pub use durability::DurabilityTracker;
pub use error::{Error, Result};
pub use event::{BasicEvent, LogEvent, Sequenced, Sequencer};
pub use index::SegmentIndex;
pub use iter::ReplayIterator;
pub use log::EventLog;
pub use manager::SegmentManager;
pub use recycle::{DeletingRecycleBin, DirectoryRecycleBin, RecycleBin};
pub use replay::{LiveStreaming, ReplayDriver, ReplaySummary};
pub use segment::SegmentReader;
pub use sizing::SpanHeuristic;
pub use writer::queue::{AsyncLogWriter, WriterCommand};
pub use writer::LogWriter;
