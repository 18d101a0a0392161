use alloc::{
  string::{String, ToString as _},
  vec::Vec,
};

use hashbrown::HashMap;
use relative_path::RelativePathBuf;
use zerocopy::FromBytes as _;

use crate::{
  codec::{
    align_to_block_size_u64, BlockHeader, EntryKind, PaxAttributes, TarHeader, BLOCK_SIZE,
    ZERO_BLOCK,
  },
  errors::{FieldContext, GeneralParseError, TarError, TarErrorKind},
  io::{Cursor, Write},
  parser::{Disposition, EntryAttributes, EntrySink, ParserLimits, ParserOptions},
  violations::{IgnoreViolationHandler, Reported, ViolationHandler},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum MetaKind {
  PaxLocal,
  PaxGlobal,
  LongPath,
  LongLink,
}

struct StateReadingFileData {
  /// Body bytes that still belong to the entry.
  remaining: u64,
  /// Padding up to the block boundary after the body.
  padding: u64,
}

struct StateReadingMeta {
  /// Meta body bytes still to be collected.
  remaining: usize,
  /// Padding up to the block boundary after the meta body.
  padding: u64,
  kind: MetaKind,
  collected: Vec<u8>,
}

struct StateSkippingData {
  /// The amount of data that must be skipped.
  remaining: u64,
  /// Names what is being skipped, for error messages and debugging.
  context: &'static str,
}

#[derive(Default)]
enum ParserState {
  #[default]
  ReadingHeader,
  ReadingFileData(StateReadingFileData),
  ReadingMeta(StateReadingMeta),
  SkippingData(StateSkippingData),
  NoNextStateSet,
}

/// Copies input into the pending header buffer until a whole block is
/// available. Fast-path: with nothing pending and a full block in the
/// input, the block is taken directly.
fn take_block(
  reader: &mut Cursor<&[u8]>,
  pending: &mut Cursor<[u8; BLOCK_SIZE]>,
) -> Option<[u8; BLOCK_SIZE]> {
  let mut block = [0_u8; BLOCK_SIZE];
  if pending.position() == 0 && reader.remaining() >= BLOCK_SIZE {
    block.copy_from_slice(reader.read_buffered(BLOCK_SIZE));
    return Some(block);
  }

  let chunk_len = pending.remaining().min(reader.remaining());
  let chunk = reader.read_buffered(chunk_len);
  pending
    .write_all(chunk, false)
    .expect("BUG: pending header write stays within the block");
  if pending.remaining() != 0 {
    return None;
  }
  pending.set_position(0);
  block.copy_from_slice(pending.full_buffer());
  Some(block)
}

/// A push-mode streaming tar parser.
///
/// Feed arbitrary chunks through [`Write::write`]; entries are delivered
/// to the [`EntrySink`] strictly in archive order. The parser never treats
/// null blocks as end-of-archive by itself; it counts them and keeps
/// consuming, and [`TarParser::finish`] is the explicit end of input.
pub struct TarParser<S: EntrySink, VH: ViolationHandler = IgnoreViolationHandler> {
  sink: S,
  violation_handler: VH,
  state: ParserState,
  /// Reconciles arbitrary input chunking to the 512-byte grid.
  header_buffer: Cursor<[u8; BLOCK_SIZE]>,

  /// Attributes from `g` records, in effect for all following entries.
  global_attributes: PaxAttributes,
  /// Attributes from `x` records, consumed by the next entry.
  local_attributes: Option<PaxAttributes>,
  /// Path override from a GNU `L`/`N` meta entry.
  long_path_override: Option<String>,
  /// Link-target override from a GNU `K` meta entry.
  long_link_override: Option<String>,

  /// The number of entries seen with each type code.
  found_kinds: HashMap<EntryKind, usize>,
  /// Null blocks seen so far; two in a row is the conventional terminator.
  null_blocks: usize,

  limits: ParserLimits,
}

impl<S: EntrySink> TarParser<S, IgnoreViolationHandler> {
  #[must_use]
  pub fn new(sink: S) -> Self {
    Self::with_options(sink, ParserOptions::default(), IgnoreViolationHandler)
  }
}

impl<S: EntrySink, VH: ViolationHandler> TarParser<S, VH> {
  #[must_use]
  pub fn with_options(sink: S, options: ParserOptions, violation_handler: VH) -> Self {
    Self {
      sink,
      violation_handler,
      state: ParserState::default(),
      header_buffer: Cursor::new([0; BLOCK_SIZE]),
      global_attributes: options.initial_global_attributes,
      local_attributes: None,
      long_path_override: None,
      long_link_override: None,
      found_kinds: HashMap::new(),
      null_blocks: 0,
      limits: options.limits,
    }
  }

  #[must_use]
  pub fn sink(&self) -> &S {
    &self.sink
  }

  pub fn sink_mut(&mut self) -> &mut S {
    &mut self.sink
  }

  pub fn into_sink(self) -> S {
    self.sink
  }

  #[must_use]
  pub fn violation_handler(&self) -> &VH {
    &self.violation_handler
  }

  /// The currently active global extended attributes.
  #[must_use]
  pub fn global_attributes(&self) -> &PaxAttributes {
    &self.global_attributes
  }

  /// The number of entries seen with each type code.
  #[must_use]
  pub fn found_kinds(&self) -> &HashMap<EntryKind, usize> {
    &self.found_kinds
  }

  /// Null blocks seen so far. Callers treat two of them as the
  /// conventional end-of-archive marker; the parser keeps consuming.
  #[must_use]
  pub fn null_blocks(&self) -> usize {
    self.null_blocks
  }

  /// Signals the end of input. Data still pending mid-block is a fatal
  /// truncation error; otherwise the sink receives `archive_end`.
  pub fn finish(&mut self) -> Result<(), TarError> {
    let pending_header = self.header_buffer.position();
    match &self.state {
      ParserState::ReadingHeader if pending_header == 0 => {
        self.sink.archive_end();
        Ok(())
      },
      ParserState::ReadingHeader => Err(TarError::fatal(TarErrorKind::TruncatedArchive {
        pending_bytes: pending_header,
        context: "header block",
      })),
      ParserState::ReadingFileData(state) => {
        Err(TarError::fatal(TarErrorKind::TruncatedArchive {
          pending_bytes: state.remaining as usize,
          context: "entry body",
        }))
      },
      ParserState::ReadingMeta(state) => Err(TarError::fatal(TarErrorKind::TruncatedArchive {
        pending_bytes: state.remaining,
        context: "meta entry body",
      })),
      ParserState::SkippingData(state) => Err(TarError::fatal(TarErrorKind::TruncatedArchive {
        pending_bytes: state.remaining as usize,
        context: state.context,
      })),
      ParserState::NoNextStateSet => Err(TarError::fatal(TarErrorKind::InvalidState)),
    }
  }

  pub(crate) fn report<EK: Into<TarErrorKind>>(&mut self, kind: EK) -> Result<(), TarError> {
    Reported(&mut self.violation_handler).report(kind)
  }

  fn opt_skip(remaining: u64, context: &'static str) -> ParserState {
    if remaining > 0 {
      ParserState::SkippingData(StateSkippingData { remaining, context })
    } else {
      ParserState::ReadingHeader
    }
  }

  /// Flattens the header and the pending overrides into the attribute
  /// view a sink receives, consuming the per-entry overrides.
  fn build_attributes(&mut self, header: TarHeader) -> EntryAttributes {
    let local = self.local_attributes.take().unwrap_or_default();
    let long_path = self.long_path_override.take();
    let long_link = self.long_link_override.take();
    let global = &self.global_attributes;

    let path = local
      .path
      .or(long_path)
      .or_else(|| global.path.clone())
      .unwrap_or(header.path);
    let link_target = local
      .link_target
      .or(long_link)
      .or_else(|| global.link_target.clone())
      .unwrap_or(header.link_target);

    let mut extended = global.unrecognized.clone();
    for (key, value) in local.unrecognized {
      extended.insert(key, value);
    }

    EntryAttributes {
      path: RelativePathBuf::from(path),
      kind: header.kind,
      size: local.size.or(global.size).unwrap_or(header.size),
      mode: header.mode,
      uid: local.uid.or(global.uid).unwrap_or(header.uid),
      gid: local.gid.or(global.gid).unwrap_or(header.gid),
      mtime: local.mtime.or(global.mtime).or(header.mtime),
      atime: local.atime.or(global.atime).or(header.atime),
      ctime: local.ctime.or(global.ctime).or(header.ctime),
      uname: local
        .uname
        .or_else(|| global.uname.clone())
        .unwrap_or(header.uname),
      gname: local
        .gname
        .or_else(|| global.gname.clone())
        .unwrap_or(header.gname),
      link_target,
      dev_major: header.dev_major,
      dev_minor: header.dev_minor,
      source_dev: local.dev.or(global.dev),
      source_ino: local.ino.or(global.ino),
      source_nlink: local.nlink.or(global.nlink),
      extended,
    }
  }

  fn state_reading_header(
    &mut self,
    reader: &mut Cursor<&[u8]>,
  ) -> Result<ParserState, TarError> {
    let Some(block) = take_block(reader, &mut self.header_buffer) else {
      return Ok(ParserState::ReadingHeader);
    };

    if block == ZERO_BLOCK {
      // Conventionally two of these end the archive, but that judgement
      // belongs to the caller; the parser stays ready for more headers.
      self.null_blocks += 1;
      return Ok(ParserState::ReadingHeader);
    }

    let raw = BlockHeader::ref_from_bytes(&block[..]).expect("BUG: BlockHeader is one block");
    if let Err(checksum_error) = raw.verify_checksum() {
      // Report and advance exactly one block; a later valid header can
      // resynchronize the stream.
      self.report(TarErrorKind::InvalidHeader(checksum_error))?;
      return Ok(ParserState::ReadingHeader);
    }

    let decoded = TarHeader::decode(&block);
    for (field, error) in decoded.field_errors {
      self.report(TarErrorKind::CorruptField { field, error })?;
    }
    let header = decoded.header;
    *self.found_kinds.entry(header.kind).or_insert(0) += 1;

    if header.kind.is_meta() {
      return self.begin_meta(header);
    }

    if let EntryKind::Unknown(code) = header.kind {
      // The entry surfaces with no body; its data is dropped.
      self.report(TarErrorKind::UnknownEntryKind { code })?;
      let attributes = self.build_attributes(header);
      self.sink.entry_begin(&attributes);
      self.sink.entry_end();
      return Ok(Self::opt_skip(
        align_to_block_size_u64(attributes.size),
        "unknown entry type",
      ));
    }

    let attributes = self.build_attributes(header);
    let body_size = attributes.size;
    match self.sink.entry_begin(&attributes) {
      Disposition::Abort => Err(TarError::fatal(TarErrorKind::Aborted)),
      Disposition::Skip => Ok(Self::opt_skip(
        align_to_block_size_u64(body_size),
        "filtered entry",
      )),
      Disposition::Accept => {
        if body_size == 0 {
          self.sink.entry_end();
          return Ok(ParserState::ReadingHeader);
        }
        Ok(ParserState::ReadingFileData(StateReadingFileData {
          remaining: body_size,
          padding: align_to_block_size_u64(body_size) - body_size,
        }))
      },
    }
  }

  fn begin_meta(&mut self, header: TarHeader) -> Result<ParserState, TarError> {
    let kind = match header.kind {
      EntryKind::ExtendedHeader => MetaKind::PaxLocal,
      EntryKind::GlobalExtendedHeader => MetaKind::PaxGlobal,
      EntryKind::NextFileHasLongPath | EntryKind::OldGnuLongPath => MetaKind::LongPath,
      EntryKind::NextFileHasLongLinkpath => MetaKind::LongLink,
      _ => unreachable!("BUG: begin_meta called for a non-meta kind"),
    };

    if header.size > self.limits.max_meta_entry_size {
      self.report(TarErrorKind::OversizeMetaEntry {
        size: header.size,
        limit: self.limits.max_meta_entry_size,
      })?;
      return Ok(Self::opt_skip(
        align_to_block_size_u64(header.size),
        "oversize meta entry",
      ));
    }

    let remaining = header.size as usize;
    if remaining == 0 {
      self.meta_complete(kind, Vec::new())?;
      return Ok(ParserState::ReadingHeader);
    }
    Ok(ParserState::ReadingMeta(StateReadingMeta {
      remaining,
      padding: align_to_block_size_u64(header.size) - header.size,
      kind,
      // no with_capacity: the size is attacker-controlled
      collected: Vec::new(),
    }))
  }

  fn meta_complete(&mut self, kind: MetaKind, collected: Vec<u8>) -> Result<(), TarError> {
    match kind {
      MetaKind::PaxLocal | MetaKind::PaxGlobal => {
        let global = kind == MetaKind::PaxGlobal;
        match PaxAttributes::parse(&collected, global) {
          Ok((attributes, soft_errors)) => {
            for (field, error) in soft_errors {
              self.report(TarErrorKind::CorruptField { field, error })?;
            }
            if global {
              self.global_attributes.merge_from(attributes);
            } else {
              match &mut self.local_attributes {
                Some(existing) => existing.merge_from(attributes),
                None => self.local_attributes = Some(attributes),
              }
            }
          },
          Err(syntax_error) => self.report(TarErrorKind::MalformedPax(syntax_error))?,
        }
      },
      MetaKind::LongPath | MetaKind::LongLink => {
        let end = collected
          .iter()
          .position(|&b| b == 0)
          .unwrap_or(collected.len());
        match core::str::from_utf8(&collected[..end]) {
          Ok(name) => {
            if kind == MetaKind::LongPath {
              self.long_path_override = Some(name.to_string());
            } else {
              self.long_link_override = Some(name.to_string());
            }
          },
          Err(_) => {
            let field = if kind == MetaKind::LongPath {
              FieldContext::GnuLongName
            } else {
              FieldContext::GnuLongLinkName
            };
            self.report(TarErrorKind::CorruptField {
              field,
              error: GeneralParseError::InvalidUtf8,
            })?;
          },
        }
      },
    }
    Ok(())
  }

  fn state_reading_file_data(
    &mut self,
    reader: &mut Cursor<&[u8]>,
    mut state: StateReadingFileData,
  ) -> Result<ParserState, TarError> {
    let take = state.remaining.min(reader.remaining() as u64) as usize;
    let data = reader.read_buffered(take);
    if !data.is_empty() {
      self.sink.entry_data(data);
      state.remaining -= data.len() as u64;
    }

    if state.remaining != 0 {
      return Ok(ParserState::ReadingFileData(state));
    }
    self.sink.entry_end();
    Ok(Self::opt_skip(state.padding, "padding after entry body"))
  }

  fn state_reading_meta(
    &mut self,
    reader: &mut Cursor<&[u8]>,
    mut state: StateReadingMeta,
  ) -> Result<ParserState, TarError> {
    let take = state.remaining.min(reader.remaining());
    let data = reader.read_buffered(take);
    state.collected.extend_from_slice(data);
    state.remaining -= data.len();

    if state.remaining != 0 {
      return Ok(ParserState::ReadingMeta(state));
    }
    self.meta_complete(state.kind, state.collected)?;
    Ok(Self::opt_skip(state.padding, "padding after meta entry"))
  }

  fn state_skipping_data(
    &mut self,
    reader: &mut Cursor<&[u8]>,
    mut state: StateSkippingData,
  ) -> Result<ParserState, TarError> {
    let take = state.remaining.min(reader.remaining() as u64) as usize;
    state.remaining -= reader.skip_buffered(take) as u64;
    if state.remaining == 0 {
      Ok(ParserState::ReadingHeader)
    } else {
      Ok(ParserState::SkippingData(state))
    }
  }
}

impl<S: EntrySink, VH: ViolationHandler> Write for TarParser<S, VH> {
  type WriteError = TarError;
  type FlushError = core::convert::Infallible;

  fn write(&mut self, input_buffer: &[u8], _sync_hint: bool) -> Result<usize, Self::WriteError> {
    let mut cursor = Cursor::new(input_buffer);
    loop {
      let parser_state = core::mem::replace(&mut self.state, ParserState::NoNextStateSet);
      let initial_cursor_position = cursor.position();

      let next_state = match parser_state {
        ParserState::ReadingHeader => self.state_reading_header(&mut cursor),
        ParserState::ReadingFileData(state) => self.state_reading_file_data(&mut cursor, state),
        ParserState::ReadingMeta(state) => self.state_reading_meta(&mut cursor, state),
        ParserState::SkippingData(state) => self.state_skipping_data(&mut cursor, state),
        ParserState::NoNextStateSet => Err(TarError::fatal(TarErrorKind::InvalidState)),
      };
      let bytes_read_this_parse = cursor.position() - initial_cursor_position;

      self.state = next_state?;

      if bytes_read_this_parse == 0 {
        return Ok(cursor.position());
      }
    }
  }

  fn flush(&mut self) -> Result<(), Self::FlushError> {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::{
    codec::{FileMode, TimeStamp},
    io::BytewiseWriter,
    parser::CollectSink,
    violations::AuditViolationHandler,
  };

  fn file_header(path: &str, size: u64) -> TarHeader {
    TarHeader {
      path: path.to_string(),
      mode: FileMode::new(0o644),
      size,
      mtime: Some(TimeStamp::from_seconds(1_459_548_000)),
      ..TarHeader::default()
    }
  }

  fn push_entry(archive: &mut Vec<u8>, header: &TarHeader, body: &[u8]) {
    let mut block = [0_u8; BLOCK_SIZE];
    header.encode(&mut block);
    archive.extend_from_slice(&block);
    archive.extend_from_slice(body);
    archive.resize(archive.len() + align_to_block_size_u64(body.len() as u64) as usize - body.len(), 0);
  }

  fn end_of_archive(archive: &mut Vec<u8>) {
    archive.extend_from_slice(&ZERO_BLOCK);
    archive.extend_from_slice(&ZERO_BLOCK);
  }

  #[test]
  fn test_parses_simple_archive() {
    let mut archive = Vec::new();
    push_entry(&mut archive, &file_header("a.txt", 5), b"hello");
    push_entry(&mut archive, &file_header("b.txt", 0), b"");
    end_of_archive(&mut archive);

    let mut parser = TarParser::new(CollectSink::new());
    parser.write_all(&archive, false).unwrap();
    parser.finish().unwrap();

    let entries = parser.sink().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].attributes.path.as_str(), "a.txt");
    assert_eq!(entries[0].data, b"hello");
    assert_eq!(entries[1].attributes.path.as_str(), "b.txt");
    assert!(entries[1].data.is_empty());
    assert_eq!(parser.null_blocks(), 2);
  }

  #[test]
  fn test_chunking_invariance_bytewise() {
    let mut archive = Vec::new();
    push_entry(&mut archive, &file_header("a.txt", 600), &[7_u8; 600]);
    push_entry(&mut archive, &file_header("b.txt", 3), b"end");
    end_of_archive(&mut archive);

    let mut whole = TarParser::new(CollectSink::new());
    whole.write_all(&archive, false).unwrap();
    whole.finish().unwrap();

    let mut chunked = TarParser::new(CollectSink::new());
    {
      let mut bytewise = BytewiseWriter::new(&mut chunked);
      bytewise.write_all(&archive, false).unwrap();
    }
    chunked.finish().unwrap();

    let lhs = whole.sink().entries();
    let rhs = chunked.sink().entries();
    assert_eq!(lhs.len(), rhs.len());
    for (a, b) in lhs.iter().zip(rhs.iter()) {
      assert_eq!(a.attributes, b.attributes);
      assert_eq!(a.data, b.data);
    }
  }

  #[test]
  fn test_long_linkpath_meta_chunked() {
    // scenario: a `K` meta entry applied to the following symlink, fed in
    // awkward chunk sizes (1 byte, 24 bytes, the rest)
    let target = "not that long, actually";
    let mut archive = Vec::new();
    let mut meta = file_header("././@LongLink", target.len() as u64);
    meta.kind = EntryKind::NextFileHasLongLinkpath;
    push_entry(&mut archive, &meta, target.as_bytes());
    let mut link = file_header("link", 0);
    link.kind = EntryKind::SymbolicLink;
    link.link_target = "short".to_string();
    push_entry(&mut archive, &link, b"");
    end_of_archive(&mut archive);

    let mut parser = TarParser::new(CollectSink::new());
    parser.write_all(&archive[..1], false).unwrap();
    parser.write_all(&archive[1..25], false).unwrap();
    parser.write_all(&archive[25..], false).unwrap();
    parser.finish().unwrap();

    let entries = parser.sink().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attributes.kind, EntryKind::SymbolicLink);
    assert_eq!(entries[0].attributes.link_target, target);
  }

  #[test]
  fn test_unknown_type_surfaces_without_data() {
    let mut archive = Vec::new();
    let mut header = file_header("strange", 4);
    header.kind = EntryKind::Unknown(b'9');
    push_entry(&mut archive, &header, b"body");
    push_entry(&mut archive, &file_header("after", 2), b"ok");
    end_of_archive(&mut archive);

    let mut parser = TarParser::with_options(
      CollectSink::new(),
      ParserOptions::default(),
      AuditViolationHandler::new(),
    );
    parser.write_all(&archive, false).unwrap();
    parser.finish().unwrap();

    let entries = parser.sink().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].attributes.kind, EntryKind::Unknown(b'9'));
    // no data events were delivered for the unknown entry
    assert!(entries[0].data.is_empty());
    assert_eq!(entries[1].data, b"ok");
    assert!(parser
      .violation_handler()
      .violations
      .iter()
      .any(|v| matches!(v.kind, TarErrorKind::UnknownEntryKind { code: b'9' })));
  }

  #[test]
  fn test_invalid_header_reports_and_advances() {
    let mut archive = Vec::new();
    // a garbage block with a bad checksum
    let mut garbage = [0_u8; BLOCK_SIZE];
    garbage[..8].copy_from_slice(b"garbage!");
    garbage[148..156].copy_from_slice(b"000001 \0");
    archive.extend_from_slice(&garbage);
    push_entry(&mut archive, &file_header("good", 4), b"data");
    end_of_archive(&mut archive);

    let mut parser = TarParser::with_options(
      CollectSink::new(),
      ParserOptions::default(),
      AuditViolationHandler::new(),
    );
    parser.write_all(&archive, false).unwrap();
    parser.finish().unwrap();

    let entries = parser.sink().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attributes.path.as_str(), "good");
    assert!(parser
      .violation_handler()
      .violations
      .iter()
      .any(|v| matches!(v.kind, TarErrorKind::InvalidHeader(_))));
  }

  #[test]
  fn test_strict_handler_stops_on_invalid_header() {
    let mut garbage = [0_u8; BLOCK_SIZE];
    garbage[0] = b'x';
    garbage[148..156].copy_from_slice(b"000001 \0");

    let mut parser = TarParser::with_options(
      CollectSink::new(),
      ParserOptions::default(),
      crate::violations::StrictViolationHandler,
    );
    let error = parser.write_all(&garbage, false).unwrap_err();
    match error {
      crate::io::WriteAllError::Io(error) => assert!(error.is_fatal()),
      other => panic!("unexpected error {other:?}"),
    }
  }

  #[test]
  fn test_pax_local_overrides_next_entry_only() {
    let attrs = PaxAttributes {
      path: Some("overridden/name".to_string()),
      uid: Some(9999),
      ..PaxAttributes::default()
    };
    let mut archive = attrs.encode("orig");
    push_entry(&mut archive, &file_header("orig", 2), b"xy");
    push_entry(&mut archive, &file_header("second", 0), b"");
    end_of_archive(&mut archive);

    let mut parser = TarParser::new(CollectSink::new());
    parser.write_all(&archive, false).unwrap();
    parser.finish().unwrap();

    let entries = parser.sink().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].attributes.path.as_str(), "overridden/name");
    assert_eq!(entries[0].attributes.uid, 9999);
    assert_eq!(entries[0].data, b"xy");
    // the override was consumed by the first entry
    assert_eq!(entries[1].attributes.path.as_str(), "second");
    assert_eq!(entries[1].attributes.uid, 0);
  }

  #[test]
  fn test_pax_global_applies_to_all_following_entries() {
    let globals = PaxAttributes {
      global: true,
      uname: Some("build".to_string()),
      ..PaxAttributes::default()
    };
    let mut archive = globals.encode("");
    push_entry(&mut archive, &file_header("a", 0), b"");
    push_entry(&mut archive, &file_header("b", 0), b"");
    end_of_archive(&mut archive);

    let mut parser = TarParser::new(CollectSink::new());
    parser.write_all(&archive, false).unwrap();
    parser.finish().unwrap();

    let entries = parser.sink().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].attributes.uname, "build");
    assert_eq!(entries[1].attributes.uname, "build");
    assert_eq!(parser.global_attributes().uname.as_deref(), Some("build"));
  }

  #[test]
  fn test_pax_size_override_governs_body_length() {
    // header says 0 bytes, pax says 6: the body is read per the override
    let attrs = PaxAttributes {
      size: Some(6),
      ..PaxAttributes::default()
    };
    let mut archive = attrs.encode("f");
    let mut header_block = [0_u8; BLOCK_SIZE];
    file_header("f", 0).encode(&mut header_block);
    archive.extend_from_slice(&header_block);
    archive.extend_from_slice(b"sixsix");
    archive.resize(archive.len() + BLOCK_SIZE - 6, 0);
    end_of_archive(&mut archive);

    let mut parser = TarParser::new(CollectSink::new());
    parser.write_all(&archive, false).unwrap();
    parser.finish().unwrap();

    let entries = parser.sink().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].attributes.size, 6);
    assert_eq!(entries[0].data, b"sixsix");
  }

  #[test]
  fn test_oversize_meta_entry_is_skipped() {
    let mut options = ParserOptions::default();
    options.limits.max_meta_entry_size = 8;
    let attrs = PaxAttributes {
      path: Some("pretty/long/override/path".to_string()),
      ..PaxAttributes::default()
    };
    let mut archive = attrs.encode("f");
    push_entry(&mut archive, &file_header("f", 0), b"");
    end_of_archive(&mut archive);

    let mut parser =
      TarParser::with_options(CollectSink::new(), options, AuditViolationHandler::new());
    parser.write_all(&archive, false).unwrap();
    parser.finish().unwrap();

    let entries = parser.sink().entries();
    assert_eq!(entries.len(), 1);
    // the oversize override was dropped, the header path survives
    assert_eq!(entries[0].attributes.path.as_str(), "f");
    assert!(parser
      .violation_handler()
      .violations
      .iter()
      .any(|v| matches!(v.kind, TarErrorKind::OversizeMetaEntry { .. })));
  }

  #[test]
  fn test_finish_mid_body_is_fatal() {
    let mut archive = Vec::new();
    push_entry(&mut archive, &file_header("a.txt", 100), &[1_u8; 100]);
    // drop the last 200 bytes of the padded body
    archive.truncate(archive.len() - 200);

    let mut parser = TarParser::new(CollectSink::new());
    parser.write_all(&archive, false).unwrap();
    let error = parser.finish().unwrap_err();
    assert!(error.is_fatal());
    assert!(matches!(
      error.kind,
      TarErrorKind::TruncatedArchive { .. }
    ));
  }

  #[test]
  fn test_finish_mid_header_is_fatal() {
    let mut parser = TarParser::new(CollectSink::new());
    parser.write_all(&[0_u8; 100], false).unwrap();
    assert!(parser.finish().is_err());
  }
}
