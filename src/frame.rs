use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use std::io::{self, Read, Write};

/// Version tag written at the start of every segment file.
pub const FILE_VERSION: u32 = 1;
pub const VERSION_SIZE: usize = 4;

/// The binary layout of a record header on disk (8 bytes).
///
/// [Length: 4]
/// [CRC32: 4]   covers the length field followed by the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
  pub len: u32,
  pub crc: u32,
}

impl RecordHeader {
  pub const SIZE: usize = 4 + 4;

  pub fn for_payload(payload: &[u8]) -> Result<Self> {
    let len = u32::try_from(payload.len())
      .map_err(|_| Error::Codec(format!("record of {} bytes does not fit a u32 length", payload.len())))?;
    Ok(Self {
      len,
      crc: calculate_checksum(len, payload),
    })
  }

  pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(self.len)?;
    writer.write_u32::<LittleEndian>(self.crc)?;
    Ok(())
  }

  fn parse(mut bytes: &[u8]) -> io::Result<Self> {
    let len = bytes.read_u32::<LittleEndian>()?;
    let crc = bytes.read_u32::<LittleEndian>()?;
    Ok(Self { len, crc })
  }
}

pub fn calculate_checksum(len: u32, payload: &[u8]) -> u32 {
  let mut hasher = Hasher::new();
  hasher.update(&len.to_le_bytes());
  hasher.update(payload);
  hasher.finalize()
}

pub fn write_version<W: Write>(writer: &mut W) -> io::Result<()> {
  writer.write_u32::<LittleEndian>(FILE_VERSION)
}

/// Reads the version tag. `Ok(None)` means the file ends before a complete tag,
/// which happens when a crash interrupted segment creation.
pub fn read_version<R: Read>(reader: &mut R) -> Result<Option<u32>> {
  let mut buf = [0u8; VERSION_SIZE];
  if read_up_to(reader, &mut buf)? < VERSION_SIZE {
    return Ok(None);
  }
  let version = u32::from_le_bytes(buf);
  if version != FILE_VERSION {
    return Err(Error::UnsupportedVersion(version));
  }
  Ok(Some(version))
}

/// Writes one framed record and returns the number of bytes it occupies on disk.
pub fn write_record<W: Write>(writer: &mut W, payload: &[u8]) -> Result<u64> {
  let header = RecordHeader::for_payload(payload)?;
  header.write(writer)?;
  writer.write_all(payload)?;
  Ok(RecordHeader::SIZE as u64 + payload.len() as u64)
}

/// Result of reading the next record from a segment body.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
  Record(Vec<u8>),
  /// Clean end of file on a record boundary.
  End,
  /// The file ends inside a header or a payload.
  Truncated,
  /// The record is complete but its checksum does not match.
  Corrupt { expected: u32, actual: u32 },
}

impl ReadOutcome {
  /// Bytes consumed by a successfully read record.
  pub fn record_size(payload: &[u8]) -> u64 {
    RecordHeader::SIZE as u64 + payload.len() as u64
  }
}

pub fn read_record<R: Read>(reader: &mut R) -> Result<ReadOutcome> {
  let mut header_buf = [0u8; RecordHeader::SIZE];
  match read_up_to(reader, &mut header_buf)? {
    0 => return Ok(ReadOutcome::End),
    n if n < RecordHeader::SIZE => return Ok(ReadOutcome::Truncated),
    _ => {}
  }
  let header = RecordHeader::parse(&header_buf)?;

  // Grows with the data actually present, so a garbage length cannot force a
  // huge allocation.
  let mut payload = Vec::new();
  reader.by_ref().take(header.len as u64).read_to_end(&mut payload)?;
  if payload.len() < header.len as usize {
    return Ok(ReadOutcome::Truncated);
  }

  let actual = calculate_checksum(header.len, &payload);
  if actual != header.crc {
    return Ok(ReadOutcome::Corrupt {
      expected: header.crc,
      actual,
    });
  }
  Ok(ReadOutcome::Record(payload))
}

/// Decides whether a record that failed its checksum is the remains of an
/// interrupted append rather than damaged data. `rest` runs from the start of
/// the record to the end of the file.
///
/// File systems may extend a file before the appended data lands, leaving
/// zeros behind after a crash. A torn tail is either all zeros, or the final
/// record of the file ending in a zero byte.
pub fn is_torn_tail(rest: &[u8]) -> bool {
  if rest.iter().all(|&b| b == 0) {
    return true;
  }
  let Ok(header) = RecordHeader::parse(rest) else {
    return false;
  };
  let record_end = RecordHeader::SIZE as u64 + header.len as u64;
  record_end == rest.len() as u64 && rest.last() == Some(&0)
}

/// Fills as much of `buf` as the reader can provide. Returns the byte count,
/// which is short only at end of file.
fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    match reader.read(&mut buf[filled..]) {
      Ok(0) => break,
      Ok(n) => filled += n,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => return Err(e),
    }
  }
  Ok(filled)
}
