#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pces_log::{
  BasicEvent, DeletingRecycleBin, EventLog, LogEvent, LogOptions, LogWriter, ManualClock, RecycleBin, Sequenced,
};
use tempfile::TempDir;

pub struct TestEnv {
  pub options: LogOptions,
  pub clock: Arc<ManualClock>,
  pub root: PathBuf,
  // The TempDir guard must be kept alive to prevent premature deletion of the directory.
  pub _dir: TempDir,
}

impl TestEnv {
  pub fn new(mut options: LogOptions) -> Self {
    let dir = tempfile::tempdir().unwrap();
    options.root_path = dir.path().join("pces");
    let root = options.root_path.clone();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));

    Self {
      options,
      clock,
      root,
      _dir: dir,
    }
  }

  pub fn with_default() -> Self {
    Self::new(LogOptions::default())
  }

  pub fn open(&self, starting_round: u64) -> EventLog<BasicEvent> {
    self.open_with_bin(starting_round, Arc::new(DeletingRecycleBin))
  }

  pub fn open_with_bin(&self, starting_round: u64, bin: Arc<dyn RecycleBin>) -> EventLog<BasicEvent> {
    EventLog::open_with(self.options.clone(), starting_round, self.clock.clone(), bin).unwrap()
  }

  /// A writer past replay, ready to append.
  pub fn live_writer(&self, starting_round: u64) -> LogWriter<BasicEvent> {
    let mut writer = self.open(starting_round).into_writer();
    writer.begin_live_streaming().unwrap();
    writer
  }

  pub fn replay(&self, starting_round: u64, lower_bound: u64) -> Vec<BasicEvent> {
    self
      .open(starting_round)
      .replay(lower_bound)
      .collect::<pces_log::Result<Vec<_>>>()
      .unwrap()
  }

  /// Every segment file under the root, sorted by path.
  pub fn segment_files(&self) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if self.root.exists() {
      collect(&self.root, &mut files);
    }
    files.sort();
    files
  }
}

fn collect(dir: &Path, out: &mut Vec<PathBuf>) {
  for entry in fs::read_dir(dir).unwrap() {
    let path = entry.unwrap().path();
    if path.is_dir() {
      collect(&path, out);
    } else if path.extension().and_then(|e| e.to_str()) == Some("pces") {
      out.push(path);
    }
  }
}

/// An event whose generation and birth round are both `indicator`, tagged
/// with `tag` so tests can recognise it after replay.
pub fn event(indicator: u64, tag: u64) -> BasicEvent {
  BasicEvent::new(indicator, indicator).with_transaction(tag.to_le_bytes().to_vec())
}

pub fn tag_of(event: &BasicEvent) -> u64 {
  let bytes: [u8; 8] = event.transactions[0].as_slice().try_into().unwrap();
  u64::from_le_bytes(bytes)
}

/// A sequenced event tagged with its own sequence number.
pub fn sequenced(sequence_number: u64, indicator: u64) -> Sequenced<BasicEvent> {
  Sequenced {
    sequence_number,
    event: event(indicator, sequence_number),
  }
}

pub fn indicators(events: &[BasicEvent]) -> Vec<u64> {
  events.iter().map(|e| e.ancient_indicator(pces_log::AncientMode::Generation)).collect()
}
