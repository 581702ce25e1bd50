mod common;
use common::{sequenced, tag_of, TestEnv};
use pces_log::{Error, LogOptions};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_commands_run_in_order() {
  let env = TestEnv::with_default();
  let writer = env.open(0).into_async_writer().unwrap();
  writer.begin_live_streaming().unwrap();

  for n in 0..50u64 {
    writer.write_event(sequenced(n, n)).unwrap();
  }
  writer.submit_flush_request(49).unwrap();

  let durability = writer.durability();
  assert!(durability.await_durable_timeout(49, Duration::from_secs(5)));
  writer.shutdown().unwrap();

  let tags: Vec<u64> = env.replay(0, 0).iter().map(tag_of).collect();
  assert_eq!(tags, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_waiters_on_other_threads_are_released() {
  let env = TestEnv::with_default();
  let writer = env.open(0).into_async_writer().unwrap();
  writer.begin_live_streaming().unwrap();

  let durability = writer.durability();
  let waiter = thread::spawn(move || durability.await_durable_timeout(9, Duration::from_secs(5)));

  for n in 0..10u64 {
    writer.write_event(sequenced(n, n)).unwrap();
  }
  writer.submit_flush_request(9).unwrap();

  assert!(waiter.join().unwrap());
  writer.shutdown().unwrap();
}

#[test]
fn test_misuse_stops_the_worker() {
  let env = TestEnv::with_default();
  let writer = env.open(0).into_async_writer().unwrap();
  writer.begin_live_streaming().unwrap();
  writer.update_non_ancient_boundary(10).unwrap();
  writer.write_event(sequenced(0, 12)).unwrap();
  // Lowering the boundary is never valid.
  writer.update_non_ancient_boundary(3).unwrap();

  // Once the worker has exited the queue is disconnected.
  let mut stopped = false;
  for n in 1..1000u64 {
    if matches!(writer.write_event(sequenced(n, 12)), Err(Error::WriterStopped)) {
      stopped = true;
      break;
    }
    thread::sleep(Duration::from_millis(5));
  }
  assert!(stopped, "worker kept accepting commands after a fatal error");
  assert!(matches!(writer.shutdown(), Err(Error::Misuse(_))));
}

#[test]
fn test_drop_seals_the_open_segment() {
  let mut options = LogOptions::default();
  options.compact_last_segment_on_startup = false;
  let env = TestEnv::new(options);

  let writer = env.open(0).into_async_writer().unwrap();
  let durability = writer.durability();
  writer.begin_live_streaming().unwrap();
  writer.write_event(sequenced(0, 2)).unwrap();
  writer.write_event(sequenced(1, 4)).unwrap();
  drop(writer);

  assert!(durability.is_durable(1));
  // Sealing compacted the name even though startup compaction is off.
  let log = env.open(0);
  assert_eq!(log.index().last().unwrap().upper_bound(), 4);
  assert_eq!(env.replay(0, 0).len(), 2);
}

#[test]
fn test_many_producers_share_one_writer() {
  let mut options = LogOptions::default();
  options.writer_queue_capacity = 4;
  let env = TestEnv::new(options);

  let writer = Arc::new(env.open(0).into_async_writer().unwrap());
  writer.begin_live_streaming().unwrap();
  let sequencer = Arc::new(pces_log::Sequencer::new(0));

  let producers: Vec<_> = (0..4)
    .map(|_| {
      let writer = writer.clone();
      let sequencer = sequencer.clone();
      thread::spawn(move || {
        for _ in 0..25 {
          // Assignment and submission must not interleave between producers.
          let _guard = SUBMIT_ORDER.lock().unwrap();
          let event = sequencer.assign(common::event(1, sequencer.peek()));
          writer.write_event(event).unwrap();
        }
      })
    })
    .collect();
  for p in producers {
    p.join().unwrap();
  }

  writer.submit_flush_request(99).unwrap();
  assert!(writer.durability().await_durable_timeout(99, Duration::from_secs(5)));
  let writer = Arc::try_unwrap(writer).ok().unwrap();
  writer.shutdown().unwrap();

  let tags: Vec<u64> = env.replay(0, 0).iter().map(tag_of).collect();
  assert_eq!(tags, (0..100).collect::<Vec<_>>());
}

static SUBMIT_ORDER: std::sync::Mutex<()> = std::sync::Mutex::new(());
