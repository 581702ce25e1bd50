use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{self as channel, Receiver, Sender};

use crate::durability::DurabilityTracker;
use crate::error::{Error, Result};
use crate::event::{LogEvent, Sequenced};
use crate::replay::LiveStreaming;
use crate::writer::LogWriter;

/// Work handed to the background writer. Commands run strictly in the order
/// they were sent.
#[derive(Debug)]
pub enum WriterCommand<E> {
  WriteEvent(Sequenced<E>),
  SetNonAncientBoundary(u64),
  BeginLiveStreaming,
  FlushRequest(u64),
  Discontinuity(u64),
  PruneBelow(u64),
}

/// Runs a [`LogWriter`] on a dedicated thread fed by a bounded queue.
///
/// Producers block while the queue is full. The first error stops the worker;
/// every later send fails with [`Error::WriterStopped`] and
/// [`shutdown`](Self::shutdown) returns the original error.
pub struct AsyncLogWriter<E: LogEvent> {
  sender: Option<Sender<WriterCommand<E>>>,
  handle: Option<JoinHandle<Result<()>>>,
  durability: Arc<DurabilityTracker>,
}

impl<E: LogEvent> AsyncLogWriter<E> {
  pub fn spawn(writer: LogWriter<E>, capacity: usize) -> Result<Self> {
    let durability = writer.durability();
    let (sender, receiver) = channel::bounded(capacity.max(1));
    let handle = thread::Builder::new()
      .name("pces-log-writer".into())
      .spawn(move || run_worker(writer, receiver))?;

    Ok(Self {
      sender: Some(sender),
      handle: Some(handle),
      durability,
    })
  }

  pub fn durability(&self) -> Arc<DurabilityTracker> {
    self.durability.clone()
  }

  pub fn send(&self, command: WriterCommand<E>) -> Result<()> {
    let sender = self.sender.as_ref().ok_or(Error::WriterStopped)?;
    sender.send(command).map_err(|_| Error::WriterStopped)
  }

  pub fn write_event(&self, event: Sequenced<E>) -> Result<()> {
    self.send(WriterCommand::WriteEvent(event))
  }

  pub fn submit_flush_request(&self, sequence_number: u64) -> Result<()> {
    self.send(WriterCommand::FlushRequest(sequence_number))
  }

  pub fn update_non_ancient_boundary(&self, bound: u64) -> Result<()> {
    self.send(WriterCommand::SetNonAncientBoundary(bound))
  }

  pub fn register_discontinuity(&self, new_origin: u64) -> Result<()> {
    self.send(WriterCommand::Discontinuity(new_origin))
  }

  pub fn prune_below(&self, indicator: u64) -> Result<()> {
    self.send(WriterCommand::PruneBelow(indicator))
  }

  pub fn begin_live_streaming(&self) -> Result<()> {
    self.send(WriterCommand::BeginLiveStreaming)
  }

  /// Processes every queued command, seals the open segment and stops the
  /// worker. Returns the error that stopped the worker early, if any.
  pub fn shutdown(mut self) -> Result<()> {
    self.stop()
  }

  fn stop(&mut self) -> Result<()> {
    // Disconnecting the channel ends the worker loop once the queue is drained.
    drop(self.sender.take());
    match self.handle.take() {
      Some(handle) => handle.join().map_err(|_| Error::WriterStopped)?,
      None => Ok(()),
    }
  }
}

impl<E: LogEvent> LiveStreaming for AsyncLogWriter<E> {
  fn begin_live_streaming(&mut self) -> Result<()> {
    AsyncLogWriter::begin_live_streaming(self)
  }
}

impl<E: LogEvent> Drop for AsyncLogWriter<E> {
  fn drop(&mut self) {
    if let Err(e) = self.stop() {
      tracing::error!(target: "pces_log", "Log writer stopped with an error: {}", e);
    }
  }
}

fn run_worker<E: LogEvent>(mut writer: LogWriter<E>, commands: Receiver<WriterCommand<E>>) -> Result<()> {
  for command in commands.iter() {
    let result = match command {
      WriterCommand::WriteEvent(event) => writer.write_event(&event).map(drop),
      WriterCommand::SetNonAncientBoundary(bound) => writer.update_non_ancient_boundary(bound),
      WriterCommand::BeginLiveStreaming => writer.begin_live_streaming(),
      WriterCommand::FlushRequest(sequence_number) => writer.submit_flush_request(sequence_number).map(drop),
      WriterCommand::Discontinuity(origin) => writer.register_discontinuity(origin).map(drop),
      WriterCommand::PruneBelow(indicator) => writer.prune_below(indicator),
    };
    if let Err(e) = result {
      tracing::error!(target: "pces_log", "Log writer failed and is stopping: {}", e);
      return Err(e);
    }
  }
  writer.close()
}
