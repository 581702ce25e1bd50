use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::config::{CorruptionPolicy, LogOptions, ReadStrategy};
use crate::descriptor::SegmentDescriptor;
use crate::error::{Error, Result};
use crate::frame::{self, ReadOutcome};

/// A segment file opened for WRITING. Owned exclusively by the segment manager.
pub(crate) struct ActiveSegment {
  descriptor: SegmentDescriptor,
  file: BufWriter<File>,
  size: u64,
  highest_indicator: Option<u64>,
  event_count: u64,
}

impl ActiveSegment {
  /// Creates the file (and its date directory) and writes the version tag.
  pub fn create(descriptor: SegmentDescriptor, options: &LogOptions) -> Result<Self> {
    if let Some(dir) = descriptor.path().parent() {
      fs::create_dir_all(dir)?;
    }
    let file = OpenOptions::new().write(true).create_new(true).open(descriptor.path())?;
    let mut file = BufWriter::with_capacity(options.write_buffer_size, file);
    frame::write_version(&mut file)?;

    Ok(Self {
      descriptor,
      file,
      size: frame::VERSION_SIZE as u64,
      highest_indicator: None,
      event_count: 0,
    })
  }

  pub fn append(&mut self, payload: &[u8], indicator: u64) -> Result<()> {
    if !self.descriptor.can_contain(indicator) {
      return Err(Error::InvariantViolation(format!(
        "indicator {} is outside the bounds of segment {}",
        indicator, self.descriptor
      )));
    }
    self.size += frame::write_record(&mut self.file, payload)?;
    self.highest_indicator = Some(self.highest_indicator.map_or(indicator, |h| h.max(indicator)));
    self.event_count += 1;
    Ok(())
  }

  /// Pushes buffered bytes to the OS and waits for them to reach the device.
  pub fn flush(&mut self) -> Result<()> {
    self.file.flush()?;
    self.file.get_ref().sync_data()?;
    Ok(())
  }

  pub fn descriptor(&self) -> &SegmentDescriptor {
    &self.descriptor
  }

  /// Bytes written so far, including the version tag and unflushed data.
  pub fn size(&self) -> u64 {
    self.size
  }

  pub fn highest_indicator(&self) -> Option<u64> {
    self.highest_indicator
  }

  pub fn event_count(&self) -> u64 {
    self.event_count
  }

  /// Part of the span actually used. Zero for an empty segment.
  pub fn utilized_span(&self) -> u64 {
    self
      .highest_indicator
      .map_or(0, |h| h.saturating_sub(self.descriptor.lower_bound()))
  }

  /// Flushes and closes the file, returning its descriptor.
  pub fn close(mut self) -> Result<SegmentDescriptor> {
    self.flush()?;
    Ok(self.descriptor)
  }
}

/// Renames a closed segment so that its name carries `upper_bound`.
///
/// Returns the descriptor unchanged when the bound is already tight.
pub(crate) fn compact(descriptor: &SegmentDescriptor, upper_bound: u64) -> Result<SegmentDescriptor> {
  if upper_bound == descriptor.upper_bound() {
    return Ok(descriptor.clone());
  }
  let compacted = descriptor.with_compacted_span(upper_bound)?;
  fs::rename(descriptor.path(), compacted.path())?;
  if let Some(dir) = compacted.path().parent() {
    sync_directory(dir)?;
  }
  tracing::debug!(target: "pces_log", "Compacted segment {} to {}", descriptor, compacted);
  Ok(compacted)
}

/// Tightest upper bound a sealed segment can be renamed to without breaking
/// the ordering against the segment before it.
pub(crate) fn compacted_upper(descriptor: &SegmentDescriptor, highest: Option<u64>, previous_upper: u64) -> u64 {
  let lower = descriptor.lower_bound();
  highest
    .unwrap_or(lower)
    .max(previous_upper)
    .max(lower)
    .min(descriptor.upper_bound())
}

/// fsync on the directory makes a rename durable.
pub(crate) fn sync_directory(dir: &Path) -> Result<()> {
  let handle = File::open(dir)?;
  handle.sync_all()?;
  Ok(())
}

/// Reads every record of a closed segment and returns the highest indicator
/// found, using `indicator_of` to extract it from each payload.
pub(crate) fn scan_highest_indicator<F>(
  descriptor: &SegmentDescriptor,
  options: &LogOptions,
  mut indicator_of: F,
) -> Result<Option<u64>>
where
  F: FnMut(&[u8]) -> Result<u64>,
{
  let mut reader = SegmentReader::open(descriptor.path(), options)?;
  let mut highest: Option<u64> = None;
  while let Some(payload) = reader.next_record()? {
    let indicator = indicator_of(&payload)?;
    highest = Some(highest.map_or(indicator, |h| h.max(indicator)));
  }
  Ok(highest)
}

enum Source {
  Io { reader: BufReader<File>, offset: u64 },
  Mmap { map: Mmap, cursor: usize },
  Exhausted,
}

/// A segment opened for READING.
pub struct SegmentReader {
  path: PathBuf,
  source: Source,
  policy: CorruptionPolicy,
  truncated: bool,
}

impl SegmentReader {
  pub fn open(path: &Path, options: &LogOptions) -> Result<Self> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    let mut this = Self {
      path: path.to_path_buf(),
      source: Source::Exhausted,
      policy: options.on_corruption,
      truncated: false,
    };

    if len < frame::VERSION_SIZE as u64 {
      // A crash between creating the file and writing its tag.
      this.truncated = true;
      return Ok(this);
    }

    if options.read_strategy == ReadStrategy::Mmap {
      // Safety: the writer never touches a segment that is being replayed.
      let map = unsafe { Mmap::map(&file)? };
      let mut slice = &map[..];
      frame::read_version(&mut slice)?;
      this.source = Source::Mmap {
        map,
        cursor: frame::VERSION_SIZE,
      };
    } else {
      let mut reader = BufReader::with_capacity(options.read_buffer_size, file);
      frame::read_version(&mut reader)?;
      this.source = Source::Io {
        reader,
        offset: frame::VERSION_SIZE as u64,
      };
    }
    Ok(this)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// True once the reader hit a partial trailing record.
  pub fn is_truncated(&self) -> bool {
    self.truncated
  }

  /// Reads the next record payload. `Ok(None)` at end of file, including the
  /// end of a truncated file.
  pub fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
    let (outcome, offset) = match &mut self.source {
      Source::Exhausted => return Ok(None),
      Source::Io { reader, offset } => {
        let at = *offset;
        let outcome = frame::read_record(reader)?;
        if let ReadOutcome::Record(payload) = &outcome {
          *offset += ReadOutcome::record_size(payload);
        }
        (outcome, at)
      }
      Source::Mmap { map, cursor } => {
        let at = *cursor as u64;
        let mut slice = &map[*cursor..];
        let before = slice.len();
        let outcome = frame::read_record(&mut slice)?;
        *cursor += before - slice.len();
        (outcome, at)
      }
    };

    match outcome {
      ReadOutcome::Record(payload) => Ok(Some(payload)),
      ReadOutcome::End => {
        self.source = Source::Exhausted;
        Ok(None)
      }
      ReadOutcome::Truncated => {
        self.source = Source::Exhausted;
        self.truncated = true;
        Ok(None)
      }
      ReadOutcome::Corrupt { expected, actual } => {
        let torn = self.is_torn_tail_at(offset)?;
        self.source = Source::Exhausted;
        if torn {
          tracing::warn!(
            target: "pces_log",
            "Zero-filled partial record in {} at offset {}. Treating it as a partial tail.",
            self.path.display(),
            offset
          );
          self.truncated = true;
          return Ok(None);
        }
        match self.policy {
          CorruptionPolicy::Error => Err(Error::CrcMismatch {
            expected,
            actual,
            offset,
          }),
          CorruptionPolicy::Truncate => {
            tracing::warn!(
              target: "pces_log",
              "Checksum mismatch in {} at offset {}. Treating the rest of the file as a partial tail.",
              self.path.display(),
              offset
            );
            self.truncated = true;
            Ok(None)
          }
        }
      }
    }
  }

  fn is_torn_tail_at(&self, offset: u64) -> Result<bool> {
    if let Source::Mmap { map, .. } = &self.source {
      return Ok(frame::is_torn_tail(map.get(offset as usize..).unwrap_or_default()));
    }
    let mut file = File::open(&self.path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut rest = Vec::new();
    file.read_to_end(&mut rest)?;
    Ok(frame::is_torn_tail(&rest))
  }
}
