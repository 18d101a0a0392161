//! Transparent gzip detection in front of the tar parser.
//!
//! https://www.ietf.org/rfc/rfc1952.txt

use alloc::{boxed::Box, vec, vec::Vec};

use miniz_oxide::{
  inflate::stream::{inflate, InflateState},
  DataFormat, MZError, MZFlush, MZStatus,
};

use crate::{
  errors::{GzError, TarError, TarErrorKind},
  io::{Cursor, Write, WriteAllError},
  parser::{EntrySink, TarParser},
  violations::{IgnoreViolationHandler, ViolationHandler},
};

const GZ_MAGIC: [u8; 2] = [0x1f, 0x8b];
const GZ_METHOD_DEFLATE: u8 = 0x08;
const FLG_FHCRC: u8 = 1 << 1;
const FLG_FEXTRA: u8 = 1 << 2;
const FLG_FNAME: u8 = 1 << 3;
const FLG_FCOMMENT: u8 = 1 << 4;

const INFLATE_BUFFER_SIZE: usize = 32 * 1024;

/// Scans a gzip member header. `Ok(Some(len))` is the header length,
/// `Ok(None)` means more bytes are needed before a decision is possible.
fn scan_gz_header(buffer: &[u8]) -> Result<Option<usize>, GzError> {
  if buffer.len() < 2 {
    return Ok(None);
  }
  if buffer[..2] != GZ_MAGIC {
    return Err(GzError::InvalidMagic(buffer[0], buffer[1]));
  }
  if buffer.len() < 10 {
    return Ok(None);
  }
  if buffer[2] != GZ_METHOD_DEFLATE {
    return Err(GzError::InvalidCompressionMethod(buffer[2]));
  }

  let flags = buffer[3];
  // MTIME, XFL and OS are fixed-width and skipped
  let mut offset = 10;

  if flags & FLG_FEXTRA != 0 {
    if buffer.len() < offset + 2 {
      return Ok(None);
    }
    let extra_len = u16::from_le_bytes([buffer[offset], buffer[offset + 1]]) as usize;
    offset += 2 + extra_len;
  }
  for flag in [FLG_FNAME, FLG_FCOMMENT] {
    if flags & flag != 0 {
      match buffer[offset.min(buffer.len())..].iter().position(|&b| b == 0) {
        Some(nul) => offset = offset + nul + 1,
        None => return Ok(None),
      }
    }
  }
  if flags & FLG_FHCRC != 0 {
    offset += 2;
  }

  if offset > buffer.len() {
    return Ok(None);
  }
  Ok(Some(offset))
}

struct StateGzipBody {
  inflate: Box<InflateState>,
  crc: crc32fast::Hasher,
  inflated_length: u64,
  output_buffer: Vec<u8>,
}

impl StateGzipBody {
  fn new() -> Self {
    Self {
      inflate: InflateState::new_boxed(DataFormat::Raw),
      crc: crc32fast::Hasher::new(),
      inflated_length: 0,
      output_buffer: vec![0_u8; INFLATE_BUFFER_SIZE],
    }
  }
}

struct StateGzipTrailer {
  collected: Cursor<[u8; 8]>,
  computed_crc: u32,
  inflated_length: u64,
}

enum StreamState {
  /// Fewer than two bytes seen; the compression decision is pending.
  Detecting { pending: Vec<u8> },
  /// Uncompressed input goes straight to the tar parser.
  Plain,
  /// Collecting the variable-length gzip member header.
  GzipHeader { pending: Vec<u8> },
  /// Streaming raw deflate through the inflater into the tar parser.
  GzipBody(Box<StateGzipBody>),
  /// Collecting the 8-byte CRC32 + ISIZE trailer.
  GzipTrailer(StateGzipTrailer),
  /// The gzip member ended; further input is dropped.
  GzipDone,
  NoNextStateSet,
}

/// A byte-stream front-end that feeds a [`TarParser`], sniffing the first
/// two bytes for the gzip magic and transparently inflating when present.
/// Once made, the decision is final.
pub struct ArchiveStream<S: EntrySink, VH: ViolationHandler = IgnoreViolationHandler> {
  parser: TarParser<S, VH>,
  state: StreamState,
}

fn forward<S: EntrySink, VH: ViolationHandler>(
  parser: &mut TarParser<S, VH>,
  bytes: &[u8],
) -> Result<(), TarError> {
  match parser.write_all(bytes, false) {
    Ok(()) => Ok(()),
    Err(WriteAllError::Io(error)) => Err(error),
    // the parser consumes every byte it is offered, so it never stalls
    Err(WriteAllError::Stalled { .. }) => Err(TarError::fatal(TarErrorKind::InvalidState)),
  }
}

impl<S: EntrySink, VH: ViolationHandler> ArchiveStream<S, VH> {
  #[must_use]
  pub fn new(parser: TarParser<S, VH>) -> Self {
    Self {
      parser,
      state: StreamState::Detecting {
        pending: Vec::new(),
      },
    }
  }

  #[must_use]
  pub fn parser(&self) -> &TarParser<S, VH> {
    &self.parser
  }

  pub fn parser_mut(&mut self) -> &mut TarParser<S, VH> {
    &mut self.parser
  }

  pub fn into_parser(self) -> TarParser<S, VH> {
    self.parser
  }

  /// Signals the end of input, flushing any undecided bytes and checking
  /// that a gzip member (when present) ended completely.
  pub fn finish(&mut self) -> Result<(), TarError> {
    let state = core::mem::replace(&mut self.state, StreamState::NoNextStateSet);
    match state {
      StreamState::Detecting { pending } => {
        if !pending.is_empty() {
          forward(&mut self.parser, &pending)?;
        }
        self.state = StreamState::Plain;
        self.parser.finish()
      },
      StreamState::Plain | StreamState::GzipDone => {
        self.state = state;
        self.parser.finish()
      },
      StreamState::GzipHeader { .. } | StreamState::GzipBody(_) => {
        Err(TarError::fatal(TarErrorKind::Gzip(GzError::Truncated)))
      },
      StreamState::GzipTrailer(_) => {
        // every entry was already delivered, a missing trailer is
        // reportable but not fatal
        self.parser.report(TarErrorKind::Gzip(GzError::Truncated))?;
        self.state = StreamState::GzipDone;
        self.parser.finish()
      },
      StreamState::NoNextStateSet => Err(TarError::fatal(TarErrorKind::InvalidState)),
    }
  }

  fn advance(&mut self, state: StreamState, input: &[u8]) -> Result<StreamState, TarError> {
    match state {
      StreamState::Detecting { mut pending } => {
        let buffered: &[u8] = if pending.is_empty() {
          input
        } else {
          pending.extend_from_slice(input);
          &pending
        };
        if buffered.len() < 2 {
          return Ok(StreamState::Detecting {
            pending: buffered.to_vec(),
          });
        }
        if buffered[..2] == GZ_MAGIC {
          self.gzip_header(Vec::new(), buffered)
        } else {
          forward(&mut self.parser, buffered)?;
          Ok(StreamState::Plain)
        }
      },
      StreamState::Plain => {
        forward(&mut self.parser, input)?;
        Ok(StreamState::Plain)
      },
      StreamState::GzipHeader { pending } => self.gzip_header(pending, input),
      StreamState::GzipBody(body) => self.gzip_body(body, input),
      StreamState::GzipTrailer(trailer) => self.gzip_trailer(trailer, input),
      StreamState::GzipDone => Ok(StreamState::GzipDone),
      StreamState::NoNextStateSet => Err(TarError::fatal(TarErrorKind::InvalidState)),
    }
  }

  fn gzip_header(&mut self, mut pending: Vec<u8>, input: &[u8]) -> Result<StreamState, TarError> {
    pending.extend_from_slice(input);
    match scan_gz_header(&pending).map_err(|e| TarError::fatal(TarErrorKind::Gzip(e)))? {
      None => Ok(StreamState::GzipHeader { pending }),
      Some(header_len) => {
        let rest: Vec<u8> = pending[header_len..].to_vec();
        self.gzip_body(Box::new(StateGzipBody::new()), &rest)
      },
    }
  }

  fn gzip_body(
    &mut self,
    mut body: Box<StateGzipBody>,
    input: &[u8],
  ) -> Result<StreamState, TarError> {
    let mut input = input;
    loop {
      let result = inflate(
        &mut body.inflate,
        input,
        &mut body.output_buffer,
        MZFlush::None,
      );
      let produced = result.bytes_written;
      if produced != 0 {
        body.crc.update(&body.output_buffer[..produced]);
        body.inflated_length += produced as u64;
        // split the borrow: the produced window lives in the body state
        let output = core::mem::take(&mut body.output_buffer);
        let forwarded = forward(&mut self.parser, &output[..produced]);
        body.output_buffer = output;
        forwarded?;
      }
      input = &input[result.bytes_consumed..];

      match result.status {
        Ok(MZStatus::Ok) => {
          if result.bytes_consumed == 0 && produced == 0 {
            // no progress possible without more input
            return Ok(StreamState::GzipBody(body));
          }
        },
        Ok(MZStatus::StreamEnd) => {
          let body = *body;
          let trailer = StateGzipTrailer {
            collected: Cursor::new([0; 8]),
            computed_crc: body.crc.finalize(),
            inflated_length: body.inflated_length,
          };
          return self.gzip_trailer(trailer, input);
        },
        Ok(MZStatus::NeedDict) => {
          panic!("BUG: inflate requested a preset dictionary");
        },
        Err(MZError::Buf) => {
          if result.bytes_consumed == 0 && produced == 0 {
            return Ok(StreamState::GzipBody(body));
          }
        },
        Err(error) => {
          return Err(TarError::fatal(TarErrorKind::Gzip(GzError::Inflate(error))));
        },
      }
      // loop again: with empty input the inflater may still drain pending
      // output; a no-progress round returned above
    }
  }

  fn gzip_trailer(
    &mut self,
    mut trailer: StateGzipTrailer,
    input: &[u8],
  ) -> Result<StreamState, TarError> {
    let take = trailer.collected.remaining().min(input.len());
    trailer
      .collected
      .write_all(&input[..take], false)
      .expect("BUG: trailer write stays within 8 bytes");
    let rest = &input[take..];

    if trailer.collected.remaining() != 0 {
      return Ok(StreamState::GzipTrailer(trailer));
    }

    let bytes = trailer.collected.full_buffer();
    let stored_crc = u32::from_le_bytes(bytes[0..4].try_into().expect("BUG: 4 trailer bytes"));
    let stored_length = u32::from_le_bytes(bytes[4..8].try_into().expect("BUG: 4 trailer bytes"));
    if stored_crc != trailer.computed_crc {
      self.parser.report(TarErrorKind::Gzip(GzError::CrcMismatch {
        stored: stored_crc,
        computed: trailer.computed_crc,
      }))?;
    }
    if u64::from(stored_length) != trailer.inflated_length & 0xffff_ffff {
      self.parser.report(TarErrorKind::Gzip(GzError::LengthMismatch {
        stored: stored_length,
        inflated: trailer.inflated_length,
      }))?;
    }
    if !rest.is_empty() {
      self.parser
        .report(TarErrorKind::Gzip(GzError::TrailingData))?;
    }
    Ok(StreamState::GzipDone)
  }
}

impl<S: EntrySink, VH: ViolationHandler> Write for ArchiveStream<S, VH> {
  type WriteError = TarError;
  type FlushError = core::convert::Infallible;

  fn write(&mut self, input_buffer: &[u8], _sync_hint: bool) -> Result<usize, Self::WriteError> {
    let state = core::mem::replace(&mut self.state, StreamState::NoNextStateSet);
    self.state = self.advance(state, input_buffer)?;
    Ok(input_buffer.len())
  }

  fn flush(&mut self) -> Result<(), Self::FlushError> {
    Ok(())
  }
}
