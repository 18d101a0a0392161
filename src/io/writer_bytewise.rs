use crate::io::Write;

/// Forwards every write one byte at a time.
///
/// Wrapping the parser in this is the worst case for its chunk handling:
/// every header block, pax record and body arrives split at every
/// possible boundary. Only the final byte of a buffer carries the
/// caller's `sync_hint`.
pub struct BytewiseWriter<W: Write> {
  target_writer: W,
}

impl<W: Write> BytewiseWriter<W> {
  #[must_use]
  pub fn new(target_writer: W) -> Self {
    Self { target_writer }
  }

  pub fn into_inner(self) -> W {
    self.target_writer
  }
}

impl<W: Write> Write for BytewiseWriter<W> {
  type WriteError = W::WriteError;
  type FlushError = W::FlushError;

  fn write(&mut self, input_buffer: &[u8], sync_hint: bool) -> Result<usize, Self::WriteError> {
    let mut bytes_written = 0;
    for (index, byte) in input_buffer.iter().enumerate() {
      let is_last_byte = index + 1 == input_buffer.len();
      bytes_written += self
        .target_writer
        .write(core::slice::from_ref(byte), sync_hint && is_last_byte)?;
    }
    Ok(bytes_written)
  }

  fn flush(&mut self) -> Result<(), Self::FlushError> {
    self.target_writer.flush()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use alloc::vec::Vec;

  /// Remembers the size of every chunk it is handed.
  struct ChunkRecorder {
    chunks: Vec<usize>,
  }

  impl Write for ChunkRecorder {
    type WriteError = core::convert::Infallible;
    type FlushError = core::convert::Infallible;

    fn write(&mut self, input_buffer: &[u8], _sync_hint: bool) -> Result<usize, Self::WriteError> {
      self.chunks.push(input_buffer.len());
      Ok(input_buffer.len())
    }

    fn flush(&mut self) -> Result<(), Self::FlushError> {
      Ok(())
    }
  }

  #[test]
  fn test_every_downstream_chunk_is_one_byte() {
    let mut recorder = ChunkRecorder { chunks: Vec::new() };
    let mut writer = BytewiseWriter::new(&mut recorder);
    assert_eq!(writer.write(b"ustar", false).unwrap(), 5);
    assert_eq!(writer.write(b"", true).unwrap(), 0);
    assert_eq!(recorder.chunks, [1, 1, 1, 1, 1]);
  }

  #[test]
  fn test_bytes_arrive_in_order() {
    let mut sink = Vec::new();
    {
      let mut writer = BytewiseWriter::new(&mut sink);
      writer.write_all(b"header then body", true).unwrap();
      writer.flush().unwrap();
    }
    assert_eq!(sink, b"header then body");
  }
}
