use thiserror::Error;

use crate::io::{Read, Write};

/// An owning cursor over a byte buffer.
///
/// The position splits the buffer into a consumed part ([`Cursor::before`])
/// and a pending part ([`Cursor::after`]). Reads consume from the pending
/// part; writes into fixed-size backings fill it.
pub struct Cursor<B> {
  backing_buffer: B,
  position: usize,
}

impl<B> Cursor<B> {
  #[must_use]
  pub fn new(backing_buffer: B) -> Self {
    Self {
      backing_buffer,
      position: 0,
    }
  }

  #[must_use]
  pub fn position(&self) -> usize {
    self.position
  }

  pub fn set_position(&mut self, position: usize) {
    self.position = position;
  }

  pub fn into_inner(self) -> B {
    self.backing_buffer
  }
}

impl<B: AsRef<[u8]>> Cursor<B> {
  #[must_use]
  pub fn len(&self) -> usize {
    self.backing_buffer.as_ref().len()
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// The number of pending bytes after the position.
  #[must_use]
  pub fn remaining(&self) -> usize {
    self.len().saturating_sub(self.position)
  }

  #[must_use]
  pub fn full_buffer(&self) -> &[u8] {
    self.backing_buffer.as_ref()
  }

  /// The consumed part of the buffer.
  #[must_use]
  pub fn before(&self) -> &[u8] {
    &self.backing_buffer.as_ref()[..self.position.min(self.len())]
  }

  /// The pending part of the buffer.
  #[must_use]
  pub fn after(&self) -> &[u8] {
    &self.backing_buffer.as_ref()[self.position.min(self.len())..]
  }

  /// Consumes and returns up to `maximum_byte_count` pending bytes.
  pub fn read_buffered(&mut self, maximum_byte_count: usize) -> &[u8] {
    let start = self.position.min(self.len());
    let end = (start + maximum_byte_count).min(self.len());
    self.position = end;
    &self.backing_buffer.as_ref()[start..end]
  }

  /// Returns up to `maximum_byte_count` pending bytes without consuming them.
  #[must_use]
  pub fn peek_buffered(&self, maximum_byte_count: usize) -> &[u8] {
    let start = self.position.min(self.len());
    let end = (start + maximum_byte_count).min(self.len());
    &self.backing_buffer.as_ref()[start..end]
  }

  /// Consumes up to `maximum_byte_count` pending bytes.
  pub fn skip_buffered(&mut self, maximum_byte_count: usize) -> usize {
    let start = self.position.min(self.len());
    let end = (start + maximum_byte_count).min(self.len());
    self.position = end;
    end - start
  }
}

impl<B: AsRef<[u8]>> Read for Cursor<B> {
  type ReadError = core::convert::Infallible;

  fn read(&mut self, output_buffer: &mut [u8]) -> Result<usize, Self::ReadError> {
    let pending = self.read_buffered(output_buffer.len());
    let n = pending.len();
    output_buffer[..n].copy_from_slice(pending);
    Ok(n)
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FixedBufferWriteError {
  #[error("Fixed buffer is full, cannot write {requested_size} more bytes")]
  BufferFull { requested_size: usize },
}

/// Writing into a fixed-size backing fills the pending part.
impl<B: AsRef<[u8]> + AsMut<[u8]>> Write for Cursor<B> {
  type WriteError = FixedBufferWriteError;
  type FlushError = core::convert::Infallible;

  fn write(&mut self, input_buffer: &[u8], _sync_hint: bool) -> Result<usize, Self::WriteError> {
    if input_buffer.is_empty() {
      return Ok(0);
    }
    let backing = self.backing_buffer.as_mut();
    let start = self.position.min(backing.len());
    let writable = backing.len() - start;
    if writable == 0 {
      return Err(FixedBufferWriteError::BufferFull {
        requested_size: input_buffer.len(),
      });
    }
    let n = input_buffer.len().min(writable);
    backing[start..start + n].copy_from_slice(&input_buffer[..n]);
    self.position = start + n;
    Ok(n)
  }

  fn flush(&mut self) -> Result<(), Self::FlushError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cursor_reads_and_peeks() {
    let mut cursor = Cursor::new(*b"abcdef");
    assert_eq!(cursor.peek_buffered(2), b"ab");
    assert_eq!(cursor.read_buffered(4), b"abcd");
    assert_eq!(cursor.remaining(), 2);
    assert_eq!(cursor.before(), b"abcd");
    assert_eq!(cursor.after(), b"ef");
    assert_eq!(cursor.read_buffered(10), b"ef");
    assert_eq!(cursor.read_buffered(10), b"");
  }

  #[test]
  fn test_cursor_fixed_write_fills_and_overflows() {
    let mut cursor = Cursor::new([0_u8; 4]);
    cursor.write_all(b"abcd", false).unwrap();
    assert_eq!(cursor.remaining(), 0);
    assert_eq!(
      cursor.write(b"e", false),
      Err(FixedBufferWriteError::BufferFull { requested_size: 1 })
    );
    cursor.set_position(0);
    assert_eq!(cursor.full_buffer(), b"abcd");
  }

  #[test]
  fn test_cursor_skip() {
    let mut cursor = Cursor::new(*b"abcdef");
    assert_eq!(cursor.skip_buffered(2), 2);
    assert_eq!(cursor.read_buffered(2), b"cd");
    assert_eq!(cursor.skip_buffered(10), 2);
  }
}
