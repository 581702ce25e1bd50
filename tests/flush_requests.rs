mod common;
use common::{sequenced, tag_of, TestEnv};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_flush_request_queue() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);

  // A request for an event that was not written yet waits for it.
  assert_eq!(writer.submit_flush_request(1).unwrap(), None);
  assert_eq!(writer.write_event(&sequenced(1, 1)).unwrap(), Some(1));

  assert_eq!(writer.write_event(&sequenced(2, 1)).unwrap(), None);
  // Already written, so the request flushes immediately.
  assert_eq!(writer.submit_flush_request(2).unwrap(), Some(2));

  assert_eq!(writer.submit_flush_request(4).unwrap(), None);
  assert_eq!(writer.write_event(&sequenced(3, 1)).unwrap(), None);
  assert_eq!(writer.submit_flush_request(5).unwrap(), None);
  // Covers the pending requests for 4 and 5 with a single flush.
  assert_eq!(writer.write_event(&sequenced(5, 1)).unwrap(), Some(5));

  assert_eq!(writer.submit_flush_request(6).unwrap(), None);
  assert_eq!(writer.submit_flush_request(8).unwrap(), None);
  assert_eq!(writer.write_event(&sequenced(7, 1)).unwrap(), Some(7));
  assert_eq!(writer.write_event(&sequenced(8, 1)).unwrap(), Some(8));

  assert_eq!(writer.durability().latest(), Some(8));
}

#[test]
fn test_request_for_durable_event_does_not_flush() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);

  assert_eq!(writer.write_event(&sequenced(0, 1)).unwrap(), None);
  assert_eq!(writer.submit_flush_request(0).unwrap(), Some(0));
  assert_eq!(writer.submit_flush_request(0).unwrap(), None);
}

#[test]
fn test_replay_writes_count_as_durable() {
  let env = TestEnv::with_default();
  let mut writer = env.open(0).into_writer();

  assert!(!writer.is_streaming());
  assert_eq!(writer.write_event(&sequenced(0, 5)).unwrap(), Some(0));
  assert_eq!(writer.write_event(&sequenced(1, 5)).unwrap(), Some(1));
  assert!(writer.durability().is_durable(1));
  drop(writer);

  assert!(env.segment_files().is_empty(), "replayed events must not be written again");
}

#[test]
fn test_ancient_events_are_dropped() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);
  writer.update_non_ancient_boundary(10).unwrap();

  assert_eq!(writer.write_event(&sequenced(0, 9)).unwrap(), None);
  assert_eq!(writer.write_event(&sequenced(1, 10)).unwrap(), None);
  assert_eq!(writer.submit_flush_request(1).unwrap(), Some(1));

  // The watermark passed the dropped event, but it was never written.
  let durability = writer.durability();
  assert!(durability.is_durable(1));
  assert!(durability.is_stale(0));
  assert!(!durability.is_durable(0));
  assert!(!durability.await_durable_timeout(0, Duration::from_secs(5)));
  drop(writer);

  let replayed = env.replay(0, 0);
  assert_eq!(replayed.len(), 1);
  assert_eq!(tag_of(&replayed[0]), 1);
}

#[test]
fn test_flush_request_for_dropped_newest_event_completes() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);
  writer.update_non_ancient_boundary(10).unwrap();

  assert_eq!(writer.write_event(&sequenced(0, 10)).unwrap(), None);
  assert_eq!(writer.write_event(&sequenced(1, 5)).unwrap(), None);
  assert_eq!(writer.last_written(), Some(1));

  // Nothing newer will be written, yet the request must not hang.
  assert_eq!(writer.submit_flush_request(1).unwrap(), Some(1));
  let durability = writer.durability();
  assert!(durability.is_durable(0));
  assert!(!durability.is_durable(1));
  assert!(!durability.await_durable_timeout(1, Duration::from_millis(200)));
}

#[test]
fn test_pending_request_drains_on_dropped_event() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);
  writer.update_non_ancient_boundary(10).unwrap();

  assert_eq!(writer.write_event(&sequenced(0, 12)).unwrap(), None);
  assert_eq!(writer.submit_flush_request(1).unwrap(), None);
  // The requested event arrives ancient. Everything before it gets flushed.
  assert_eq!(writer.write_event(&sequenced(1, 3)).unwrap(), Some(1));
  assert!(writer.durability().is_durable(0));
  assert!(!writer.durability().is_durable(1));
}

#[test]
fn test_sealing_makes_earlier_events_durable() {
  let mut options = pces_log::LogOptions::default();
  options.preferred_segment_size = 1;
  let env = TestEnv::new(options);
  let mut writer = env.live_writer(0);

  assert_eq!(writer.write_event(&sequenced(0, 1)).unwrap(), None);
  // The first segment is full, so this write seals it.
  assert_eq!(writer.write_event(&sequenced(1, 1)).unwrap(), Some(0));
  assert!(writer.durability().is_durable(0));
  assert!(!writer.durability().is_durable(1));

  assert_eq!(writer.submit_flush_request(1).unwrap(), Some(1));
  assert_eq!(writer.index().len(), 2);
}

#[test]
fn test_waiters_unblock_after_flush() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);
  let durability = writer.durability();

  let waiter = {
    let durability = Arc::clone(&durability);
    thread::spawn(move || durability.await_durable_timeout(3, Duration::from_secs(10)))
  };

  for n in 0..=3 {
    writer.write_event(&sequenced(n, 2)).unwrap();
  }
  assert!(!durability.is_durable(3), "nothing was flushed yet");
  writer.submit_flush_request(3).unwrap();

  assert!(waiter.join().unwrap());
}

#[test]
fn test_closed_writer_rejects_writes() {
  let env = TestEnv::with_default();
  let mut writer = env.live_writer(0);
  writer.write_event(&sequenced(0, 1)).unwrap();
  writer.close().unwrap();

  assert!(writer.durability().is_durable(0));
  assert!(matches!(
    writer.write_event(&sequenced(1, 1)),
    Err(pces_log::Error::WriterStopped)
  ));
}
