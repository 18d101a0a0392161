use alloc::vec::Vec;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WriteAllError<U> {
  #[error("Sink stalled with {remaining_bytes} bytes left to write")]
  Stalled { remaining_bytes: usize },
  #[error("Underlying write error: {0:?}")]
  Io(#[from] U),
}

/// Byte sink for archive output and for feeding the parser.
///
/// `write` may accept only a prefix of the buffer; `write_all` is the
/// retrying form every block-oriented caller in this crate uses. The
/// `sync_hint` rides along so that a compressing sink knows when to cut a
/// deflate block.
pub trait Write {
  type WriteError;
  type FlushError;

  /// Writes a prefix of `input_buffer`, returning how many bytes were
  /// accepted. An empty buffer is valid and accepts zero bytes.
  fn write(&mut self, input_buffer: &[u8], sync_hint: bool) -> Result<usize, Self::WriteError>;

  /// Flushes buffered data down to the device. Call once at the end.
  fn flush(&mut self) -> Result<(), Self::FlushError>;

  /// Writes the whole buffer, retrying partial writes. A sink that stops
  /// accepting bytes mid-buffer surfaces as [`WriteAllError::Stalled`].
  fn write_all(
    &mut self,
    input_buffer: &[u8],
    sync_hint: bool,
  ) -> Result<(), WriteAllError<Self::WriteError>> {
    let mut remaining = input_buffer;
    while !remaining.is_empty() {
      let accepted = self.write(remaining, sync_hint).map_err(WriteAllError::Io)?;
      if accepted == 0 {
        return Err(WriteAllError::Stalled {
          remaining_bytes: remaining.len(),
        });
      }
      remaining = &remaining[accepted..];
    }
    Ok(())
  }
}

impl<W: Write + ?Sized> Write for &mut W {
  type WriteError = W::WriteError;
  type FlushError = W::FlushError;

  fn write(&mut self, input_buffer: &[u8], sync_hint: bool) -> Result<usize, Self::WriteError> {
    (**self).write(input_buffer, sync_hint)
  }

  fn flush(&mut self) -> Result<(), Self::FlushError> {
    (**self).flush()
  }
}

/// Archive bytes are commonly assembled in memory first.
impl Write for Vec<u8> {
  type WriteError = core::convert::Infallible;
  type FlushError = core::convert::Infallible;

  fn write(&mut self, input_buffer: &[u8], _sync_hint: bool) -> Result<usize, Self::WriteError> {
    self.extend_from_slice(input_buffer);
    Ok(input_buffer.len())
  }

  fn flush(&mut self) -> Result<(), Self::FlushError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Accepts a fixed number of bytes, then nothing.
  struct CloggedSink {
    capacity: usize,
  }

  impl Write for CloggedSink {
    type WriteError = core::convert::Infallible;
    type FlushError = core::convert::Infallible;

    fn write(&mut self, input_buffer: &[u8], _sync_hint: bool) -> Result<usize, Self::WriteError> {
      let accepted = input_buffer.len().min(self.capacity);
      self.capacity -= accepted;
      Ok(accepted)
    }

    fn flush(&mut self) -> Result<(), Self::FlushError> {
      Ok(())
    }
  }

  #[test]
  fn test_write_all_collects_into_vec() {
    let mut sink = Vec::new();
    sink.write_all(b"ustar\x0000", false).unwrap();
    sink.write_all(b" trailer", true).unwrap();
    assert_eq!(sink, b"ustar\x0000 trailer");
  }

  #[test]
  fn test_write_all_retries_partial_writes_then_stalls() {
    let mut sink = CloggedSink { capacity: 9 };
    assert_eq!(
      sink.write_all(&[0_u8; 12], false),
      Err(WriteAllError::Stalled { remaining_bytes: 3 })
    );
  }
}
