use alloc::{boxed::Box, vec, vec::Vec};

use miniz_oxide::{
  deflate::{
    core::{create_comp_flags_from_zip_params, CompressorOxide},
    stream::deflate,
  },
  MZError, MZFlush, MZStatus,
};
use thiserror::Error;

use crate::io::{Write, WriteAllError};

const OUTPUT_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GzWriteError<WE, FE> {
  #[error("Compression error: {0:?}")]
  Deflate(MZError),
  #[error("The writer is already finished and cannot accept more data")]
  Finished,
  #[error("Underlying write error: {0:?}")]
  IoWrite(WriteAllError<WE>),
  #[error("Underlying flush error: {0:?}")]
  IoFlush(FE),
}

/// A push-mode gzip encoder: RFC 1952 framing around a raw streaming
/// deflate. Call [`GzWriter::finish`] at the end to emit the final deflate
/// block and the CRC32 + ISIZE trailer.
pub struct GzWriter<W: Write> {
  target: W,
  compressor: Box<CompressorOxide>,
  crc: crc32fast::Hasher,
  raw_length: u64,
  header_written: bool,
  finished: bool,
  output_buffer: Vec<u8>,
}

impl<W: Write> GzWriter<W> {
  #[must_use]
  pub fn new(target: W, level: u8) -> Self {
    // raw deflate (window bits 0): the gzip framing is written by hand
    let flags = create_comp_flags_from_zip_params(i32::from(level), 0, 0);
    Self {
      target,
      compressor: Box::new(CompressorOxide::new(flags)),
      crc: crc32fast::Hasher::new(),
      raw_length: 0,
      header_written: false,
      finished: false,
      output_buffer: vec![0_u8; OUTPUT_BUFFER_SIZE],
    }
  }

  pub fn into_inner(self) -> W {
    self.target
  }

  #[must_use]
  pub fn is_finished(&self) -> bool {
    self.finished
  }

  fn write_gz_header(&mut self) -> Result<(), GzWriteError<W::WriteError, W::FlushError>> {
    self
      .target
      .write_all(
        &[
          0x1f, 0x8b, // ID1, ID2
          0x08, // compression method: deflate
          0x00, // FLG: no optional fields
          0x00, 0x00, 0x00, 0x00, // MTIME
          0x00, // XFL
          0x03, // OS: Unix
        ],
        false,
      )
      .map_err(GzWriteError::IoWrite)?;
    self.header_written = true;
    Ok(())
  }

  fn deflate_internal(
    &mut self,
    mut input: &[u8],
    flush: MZFlush,
  ) -> Result<(), GzWriteError<W::WriteError, W::FlushError>> {
    loop {
      let result = deflate(
        &mut self.compressor,
        input,
        self.output_buffer.as_mut_slice(),
        flush,
      );
      self
        .target
        .write_all(&self.output_buffer[..result.bytes_written], false)
        .map_err(GzWriteError::IoWrite)?;
      input = &input[result.bytes_consumed..];

      match result.status {
        Ok(MZStatus::Ok) | Err(MZError::Buf) => {},
        Ok(MZStatus::StreamEnd) => return Ok(()),
        Ok(MZStatus::NeedDict) => {
          panic!("BUG: deflate requested a preset dictionary");
        },
        Err(error) => return Err(GzWriteError::Deflate(error)),
      }

      // for Finish, keep draining until StreamEnd; otherwise stop once the
      // input is consumed and the output buffer was not filled to the brim
      if flush != MZFlush::Finish
        && input.is_empty()
        && result.bytes_written < self.output_buffer.len()
      {
        return Ok(());
      }
    }
  }

  /// Emits the final deflate block and the gzip trailer.
  pub fn finish(&mut self) -> Result<(), GzWriteError<W::WriteError, W::FlushError>> {
    if self.finished {
      return Err(GzWriteError::Finished);
    }
    if !self.header_written {
      self.write_gz_header()?;
    }
    self.deflate_internal(&[], MZFlush::Finish)?;

    let crc = core::mem::replace(&mut self.crc, crc32fast::Hasher::new()).finalize();
    let mut trailer = [0_u8; 8];
    trailer[..4].copy_from_slice(&crc.to_le_bytes());
    trailer[4..].copy_from_slice(&((self.raw_length & 0xffff_ffff) as u32).to_le_bytes());
    self
      .target
      .write_all(&trailer, true)
      .map_err(GzWriteError::IoWrite)?;
    self.finished = true;
    Ok(())
  }
}

impl<W: Write> Write for GzWriter<W> {
  type WriteError = GzWriteError<W::WriteError, W::FlushError>;
  type FlushError = GzWriteError<W::WriteError, W::FlushError>;

  fn write(&mut self, input_buffer: &[u8], sync_hint: bool) -> Result<usize, Self::WriteError> {
    if self.finished {
      return Err(GzWriteError::Finished);
    }
    if !self.header_written {
      self.write_gz_header()?;
    }
    self.crc.update(input_buffer);
    self.raw_length += input_buffer.len() as u64;
    let flush = if sync_hint {
      MZFlush::Sync
    } else {
      MZFlush::None
    };
    self.deflate_internal(input_buffer, flush)?;
    Ok(input_buffer.len())
  }

  fn flush(&mut self) -> Result<(), Self::FlushError> {
    if self.finished {
      return Err(GzWriteError::Finished);
    }
    self.deflate_internal(&[], MZFlush::Sync)?;
    self.target.flush().map_err(GzWriteError::IoFlush)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::io::BytewiseWriter;

  #[test]
  fn test_gz_writer_round_trips_through_inflate() {
    let payload = b"Hello, world! This archive writer test repeats itself. ".repeat(64);

    let mut writer = GzWriter::new(Vec::new(), 6);
    writer.write_all(&payload, false).unwrap();
    writer.finish().unwrap();
    let gz = writer.into_inner();

    // RFC 1952: fixed 10-byte header, deflate body, 8-byte trailer
    assert_eq!(&gz[..3], &[0x1f, 0x8b, 0x08]);
    let body = &gz[10..gz.len() - 8];
    let inflated = miniz_oxide::inflate::decompress_to_vec(body).unwrap();
    assert_eq!(inflated, payload);

    let trailer = &gz[gz.len() - 8..];
    let stored_crc = u32::from_le_bytes(trailer[..4].try_into().unwrap());
    let stored_len = u32::from_le_bytes(trailer[4..].try_into().unwrap());
    assert_eq!(stored_crc, crc32fast::hash(&payload));
    assert_eq!(stored_len, payload.len() as u32);
  }

  #[test]
  fn test_gz_writer_survives_bytewise_writes_and_sync_flush() {
    let payload = b"tiny chunks".repeat(100);

    let mut writer = GzWriter::new(Vec::new(), 6);
    {
      let mut bytewise = BytewiseWriter::new(&mut writer);
      bytewise.write_all(&payload, false).unwrap();
    }
    writer.flush().unwrap();
    writer.finish().unwrap();
    let gz = writer.into_inner();
    let inflated = miniz_oxide::inflate::decompress_to_vec(&gz[10..gz.len() - 8]).unwrap();
    assert_eq!(inflated, payload);
  }

  #[test]
  fn test_gz_writer_empty_stream() {
    let mut writer = GzWriter::new(Vec::new(), 6);
    writer.finish().unwrap();
    let gz = writer.into_inner();
    assert_eq!(&gz[..2], &[0x1f, 0x8b]);
    let inflated = miniz_oxide::inflate::decompress_to_vec(&gz[10..gz.len() - 8]).unwrap();
    assert!(inflated.is_empty());
    assert_eq!(&gz[gz.len() - 4..], &0_u32.to_le_bytes());
  }

  #[test]
  fn test_gz_writer_rejects_use_after_finish() {
    let mut writer = GzWriter::new(Vec::new(), 6);
    writer.finish().unwrap();
    assert!(matches!(
      writer.write(b"late", false),
      Err(GzWriteError::Finished)
    ));
  }
}
