use thiserror::Error;

use crate::{
  codec::{
    align_to_block_size_u64, EncodedHeader, PaxAttributes, TarHeader, BLOCK_SIZE, ZERO_BLOCK,
  },
  io::{Write, WriteAllError},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TarWriteError<U> {
  #[error("An entry is already open")]
  EntryAlreadyOpen,
  #[error("No entry is open")]
  NoOpenEntry,
  #[error("Entry body overrun: {attempted} bytes offered with only {remaining} remaining")]
  BodyOverrun { attempted: u64, remaining: u64 },
  #[error("Entry body incomplete: {remaining} bytes were never written")]
  ShortBody { remaining: u64 },
  #[error("The archive is already finished")]
  Finished,
  #[error("Underlying write error: {0:?}")]
  Io(#[from] WriteAllError<U>),
}

struct OpenEntry {
  /// Body bytes the caller still owes.
  remaining: u64,
  /// Body plus padding up to the block boundary.
  block_remaining: u64,
}

/// Block-level archive encoder.
///
/// `begin_entry` writes the header (preceded by a pax meta entry whenever
/// the fixed-width fields cannot carry a value), `write_data` streams the
/// body, `end_entry` pads to the block grid, and `finish` terminates the
/// archive with two zero blocks.
pub struct TarWriter<W: Write> {
  target: W,
  open_entry: Option<OpenEntry>,
  finished: bool,
}

impl<W: Write> TarWriter<W> {
  #[must_use]
  pub fn new(target: W) -> Self {
    Self {
      target,
      open_entry: None,
      finished: false,
    }
  }

  pub fn into_inner(self) -> W {
    self.target
  }

  pub fn begin_entry(
    &mut self,
    header: &TarHeader,
  ) -> Result<EncodedHeader, TarWriteError<W::WriteError>> {
    self.begin_entry_with_overrides(header, None)
  }

  /// Like [`TarWriter::begin_entry`], with extra pax fields (dev, ino,
  /// nlink, ...) that ride along when a pax record is emitted anyway.
  pub fn begin_entry_with_overrides(
    &mut self,
    header: &TarHeader,
    extra_pax: Option<&PaxAttributes>,
  ) -> Result<EncodedHeader, TarWriteError<W::WriteError>> {
    if self.finished {
      return Err(TarWriteError::Finished);
    }
    if self.open_entry.is_some() {
      return Err(TarWriteError::EntryAlreadyOpen);
    }

    let mut block = [0_u8; BLOCK_SIZE];
    let encoded = header.encode(&mut block);
    if encoded.need_pax {
      let mut pax = PaxAttributes::full_precision(header);
      if let Some(extra) = extra_pax {
        pax.merge_from(extra.clone());
      }
      self.target.write_all(&pax.encode(&header.path), false)?;
    }
    self.target.write_all(&block, false)?;

    self.open_entry = Some(OpenEntry {
      remaining: header.size,
      block_remaining: align_to_block_size_u64(header.size),
    });
    Ok(encoded)
  }

  pub fn write_data(&mut self, data: &[u8]) -> Result<(), TarWriteError<W::WriteError>> {
    let Some(entry) = &mut self.open_entry else {
      return Err(TarWriteError::NoOpenEntry);
    };
    if data.len() as u64 > entry.remaining {
      return Err(TarWriteError::BodyOverrun {
        attempted: data.len() as u64,
        remaining: entry.remaining,
      });
    }
    self.target.write_all(data, false)?;
    entry.remaining -= data.len() as u64;
    entry.block_remaining -= data.len() as u64;
    Ok(())
  }

  pub fn end_entry(&mut self) -> Result<(), TarWriteError<W::WriteError>> {
    let Some(entry) = self.open_entry.take() else {
      return Err(TarWriteError::NoOpenEntry);
    };
    if entry.remaining != 0 {
      return Err(TarWriteError::ShortBody {
        remaining: entry.remaining,
      });
    }
    let padding = entry.block_remaining as usize;
    self.target.write_all(&ZERO_BLOCK[..padding], false)?;
    Ok(())
  }

  /// Header, body and padding in one call; the header's size field is
  /// taken from the data length.
  pub fn append(
    &mut self,
    header: &TarHeader,
    data: &[u8],
  ) -> Result<(), TarWriteError<W::WriteError>> {
    let mut header = header.clone();
    header.size = data.len() as u64;
    self.begin_entry(&header)?;
    self.write_data(data)?;
    self.end_entry()
  }

  /// Writes the end-of-archive marker: two zero blocks.
  pub fn finish(&mut self) -> Result<(), TarWriteError<W::WriteError>> {
    if self.finished {
      return Err(TarWriteError::Finished);
    }
    if self.open_entry.is_some() {
      return Err(TarWriteError::EntryAlreadyOpen);
    }
    self.target.write_all(&ZERO_BLOCK, true)?;
    self.target.write_all(&ZERO_BLOCK, true)?;
    self.finished = true;
    Ok(())
  }
}
