mod common;
use common::{sequenced, tag_of, TestEnv};
use pces_log::{AncientMode, BasicEvent, Error, EventLog, LogOptions, SegmentDescriptor};
use std::fs;

#[test]
fn test_restart_continues_the_log() {
  let env = TestEnv::with_default();

  let mut writer = env.live_writer(0);
  for n in 0..5u64 {
    writer.write_event(&sequenced(n, n)).unwrap();
  }
  drop(writer);

  let log = env.open(0);
  let replayed: Vec<BasicEvent> = log.replay(0).collect::<pces_log::Result<_>>().unwrap();
  assert_eq!(replayed.len(), 5);

  // Replayed events pass through the writer without being written again.
  let mut writer = log.into_writer();
  for (n, event) in replayed.into_iter().enumerate() {
    let event = pces_log::Sequenced {
      sequence_number: n as u64,
      event,
    };
    assert_eq!(writer.write_event(&event).unwrap(), Some(n as u64));
  }
  writer.begin_live_streaming().unwrap();
  for n in 5..8u64 {
    writer.write_event(&sequenced(n, n)).unwrap();
  }
  assert_eq!(writer.index().last().unwrap().sequence_number(), 1);
  drop(writer);

  let tags: Vec<u64> = env.replay(0, 0).iter().map(tag_of).collect();
  assert_eq!(tags, (0..8).collect::<Vec<_>>());
}

#[test]
fn test_startup_compacts_last_segment() {
  let mut options = LogOptions::default();
  options.compact_sealed_segments = false;
  let env = TestEnv::new(options);

  let mut writer = env.live_writer(0);
  writer.write_event(&sequenced(0, 3)).unwrap();
  writer.write_event(&sequenced(1, 8)).unwrap();
  drop(writer);

  // Without compaction on seal the name keeps the speculative bound.
  let before = SegmentDescriptor::from_path(&env.segment_files()[0]).unwrap();
  assert!(before.upper_bound() > 8);

  let log = env.open(0);
  let after = log.index().last().unwrap().clone();
  assert_eq!(after.upper_bound(), 8);
  assert!(after.path().exists());
  assert!(!before.path().exists());
  drop(log);

  // Opening again changes nothing.
  let again = env.open(0);
  assert_eq!(again.index().last().unwrap(), &after);
  assert_eq!(env.replay(0, 0).len(), 2);
}

#[test]
fn test_sequence_gap_is_fatal_unless_permitted() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);
  writer.write_event(&sequenced(0, 1)).unwrap();
  drop(writer);

  let existing = SegmentDescriptor::from_path(&env.segment_files()[0]).unwrap();
  let gap = SegmentDescriptor::new(
    AncientMode::Generation,
    existing.created_at(),
    existing.sequence_number() + 3,
    existing.lower_bound(),
    existing.upper_bound(),
    existing.origin(),
    &env.root,
  )
  .unwrap();
  fs::write(gap.path(), 1u32.to_le_bytes()).unwrap();

  let result = EventLog::<BasicEvent>::open(env.options.clone(), 0);
  assert!(matches!(result, Err(Error::InvariantViolation(_))));

  let mut options = env.options.clone();
  options.permit_gaps = true;
  let log = EventLog::<BasicEvent>::open(options, 0).unwrap();
  assert_eq!(log.index().len(), 2);
  assert_eq!(log.index().last().unwrap().sequence_number(), 3);
}

#[test]
fn test_mixed_ancient_modes_are_fatal() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);
  writer.write_event(&sequenced(0, 1)).unwrap();
  drop(writer);

  let options = env.options.clone().with_ancient_mode(AncientMode::BirthRound);
  let result = EventLog::<BasicEvent>::open(options, 0);
  assert!(matches!(result, Err(Error::InvariantViolation(_))));
}

#[test]
fn test_unknown_file_version_is_rejected() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);
  writer.write_event(&sequenced(0, 1)).unwrap();
  drop(writer);

  let file = &env.segment_files()[0];
  let mut bytes = fs::read(file).unwrap();
  bytes[..4].copy_from_slice(&9u32.to_le_bytes());
  fs::write(file, &bytes).unwrap();

  let result = EventLog::<BasicEvent>::open(env.options.clone(), 0);
  assert!(matches!(result, Err(Error::UnsupportedVersion(9))));
}

#[test]
fn test_stray_files_are_ignored() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);
  writer.write_event(&sequenced(0, 1)).unwrap();
  drop(writer);

  fs::write(env.root.join("README"), b"operator notes").unwrap();
  fs::write(env.root.join("broken_seq1.pces"), b"").unwrap();

  let log = env.open(0);
  assert_eq!(log.index().len(), 1);
}

#[test]
fn test_invalid_options_are_rejected() {
  let env = TestEnv::with_default();
  let mut options = env.options.clone();
  options.minimum_span = 0;
  assert!(matches!(EventLog::<BasicEvent>::open(options, 0), Err(Error::Config(_))));
}
