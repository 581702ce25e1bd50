//! The events stored in the log and how they are sequenced.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::config::AncientMode;
use crate::error::{Error, Result};

/// An event the log can store and replay.
///
/// The log treats the encoded form as opaque. It only needs the ancient
/// indicator to place the event in a segment.
pub trait LogEvent: Sized + Send + 'static {
  /// Generation or birth round, depending on `mode`.
  fn ancient_indicator(&self, mode: AncientMode) -> u64;

  /// Number of sub-units (transactions) the event carries. Only used for
  /// replay statistics.
  fn payload_units(&self) -> usize {
    0
  }

  fn encoded_len(&self) -> usize;

  fn encode<W: Write>(&self, writer: &mut W) -> Result<()>;

  fn decode(bytes: &[u8]) -> Result<Self>;
}

/// An event paired with its stream sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequenced<E> {
  pub sequence_number: u64,
  pub event: E,
}

/// Hands out stream sequence numbers. Each event is sequenced once, before it
/// is first written.
#[derive(Debug, Default)]
pub struct Sequencer {
  next: AtomicU64,
}

impl Sequencer {
  pub fn new(first: u64) -> Self {
    Self {
      next: AtomicU64::new(first),
    }
  }

  pub fn assign<E>(&self, event: E) -> Sequenced<E> {
    Sequenced {
      sequence_number: self.next.fetch_add(1, Ordering::Relaxed),
      event,
    }
  }

  /// Sequence number the next call to `assign` will use.
  pub fn peek(&self) -> u64 {
    self.next.load(Ordering::Relaxed)
  }
}

/// A minimal event: both ancient indicators plus opaque transactions.
///
/// Layout: `[generation: u64][birth_round: u64][count: u32]` followed by
/// `count` times `[len: u32][bytes]`, all little-endian.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicEvent {
  pub generation: u64,
  pub birth_round: u64,
  pub transactions: Vec<Vec<u8>>,
}

impl BasicEvent {
  pub fn new(generation: u64, birth_round: u64) -> Self {
    Self {
      generation,
      birth_round,
      transactions: Vec::new(),
    }
  }

  pub fn with_transaction(mut self, tx: impl Into<Vec<u8>>) -> Self {
    self.transactions.push(tx.into());
    self
  }
}

impl LogEvent for BasicEvent {
  fn ancient_indicator(&self, mode: AncientMode) -> u64 {
    match mode {
      AncientMode::Generation => self.generation,
      AncientMode::BirthRound => self.birth_round,
    }
  }

  fn payload_units(&self) -> usize {
    self.transactions.len()
  }

  fn encoded_len(&self) -> usize {
    8 + 8 + 4 + self.transactions.iter().map(|t| 4 + t.len()).sum::<usize>()
  }

  fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
    writer.write_u64::<LittleEndian>(self.generation)?;
    writer.write_u64::<LittleEndian>(self.birth_round)?;
    writer.write_u32::<LittleEndian>(len_u32(self.transactions.len())?)?;
    for tx in &self.transactions {
      writer.write_u32::<LittleEndian>(len_u32(tx.len())?)?;
      writer.write_all(tx)?;
    }
    Ok(())
  }

  fn decode(mut bytes: &[u8]) -> Result<Self> {
    let generation = bytes.read_u64::<LittleEndian>().map_err(codec_error)?;
    let birth_round = bytes.read_u64::<LittleEndian>().map_err(codec_error)?;
    let count = bytes.read_u32::<LittleEndian>().map_err(codec_error)? as usize;

    let mut transactions = Vec::with_capacity(count.min(bytes.len() / 4));
    for _ in 0..count {
      let len = bytes.read_u32::<LittleEndian>().map_err(codec_error)? as usize;
      if len > bytes.len() {
        return Err(Error::Codec(format!(
          "transaction of {} bytes exceeds remaining {} bytes",
          len,
          bytes.len()
        )));
      }
      let (tx, rest) = bytes.split_at(len);
      transactions.push(tx.to_vec());
      bytes = rest;
    }
    if !bytes.is_empty() {
      return Err(Error::Codec(format!("{} trailing bytes after event", bytes.len())));
    }

    Ok(Self {
      generation,
      birth_round,
      transactions,
    })
  }
}

fn len_u32(len: usize) -> Result<u32> {
  u32::try_from(len).map_err(|_| Error::Codec(format!("length {} does not fit a u32", len)))
}

fn codec_error(e: std::io::Error) -> Error {
  Error::Codec(format!("event ended early: {}", e))
}
