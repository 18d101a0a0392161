/// Byte source feeding the archive builder.
///
/// This is the read half of the filesystem seam: `Vfs::open_read` hands
/// out implementations of this trait and entry bodies are pulled through
/// it in bounded chunks.
pub trait Read {
  type ReadError;

  /// Reads up to `output_buffer.len()` bytes into `output_buffer` and
  /// returns how many were read. Zero means end of input, and stays zero
  /// on every later call.
  fn read(&mut self, output_buffer: &mut [u8]) -> Result<usize, Self::ReadError>;

  /// Fills `output_buffer` as far as the source allows, retrying short
  /// reads. Anything less than the buffer length means the source hit
  /// end of input.
  ///
  /// The builder pulls entry bodies with this: a short fill before the
  /// declared size is how a file that shrank mid-archive is detected.
  fn read_full(&mut self, output_buffer: &mut [u8]) -> Result<usize, Self::ReadError> {
    let mut filled = 0;
    while filled < output_buffer.len() {
      match self.read(&mut output_buffer[filled..])? {
        0 => break,
        bytes_read => filled += bytes_read,
      }
    }
    Ok(filled)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Hands out at most two bytes per call, like a slow pipe.
  struct TrickleSource {
    data: &'static [u8],
    position: usize,
  }

  impl Read for TrickleSource {
    type ReadError = core::convert::Infallible;

    fn read(&mut self, output_buffer: &mut [u8]) -> Result<usize, Self::ReadError> {
      let remaining = &self.data[self.position..];
      let n = remaining.len().min(output_buffer.len()).min(2);
      output_buffer[..n].copy_from_slice(&remaining[..n]);
      self.position += n;
      Ok(n)
    }
  }

  #[test]
  fn test_read_full_retries_short_reads() {
    let mut source = TrickleSource {
      data: b"ustar, block by block",
      position: 0,
    };
    let mut buffer = [0_u8; 12];
    assert_eq!(source.read_full(&mut buffer).unwrap(), 12);
    assert_eq!(&buffer, b"ustar, block");
  }

  #[test]
  fn test_read_full_stops_at_end_of_input() {
    let mut source = TrickleSource {
      data: b"short",
      position: 0,
    };
    let mut buffer = [0_u8; 16];
    assert_eq!(source.read_full(&mut buffer).unwrap(), 5);
    assert_eq!(&buffer[..5], b"short");
    assert_eq!(source.read_full(&mut buffer).unwrap(), 0);
  }
}
