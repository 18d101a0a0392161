use core::fmt::{self, Display};

use miniz_oxide::MZError;
use relative_path::RelativePathBuf;
use thiserror::Error;

use crate::codec::{ChecksumError, EntryKind, FieldError, PaxSyntaxError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeneralParseError {
  #[error("Invalid field encoding: {0}")]
  Field(#[from] FieldError),
  #[error("Invalid integer: {0}")]
  InvalidInteger(#[from] core::num::ParseIntError),
  #[error("Invalid UTF-8 string")]
  InvalidUtf8,
}

/// Names the header or pax field a parse failure belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldContext {
  HeaderName,
  HeaderMode,
  HeaderUid,
  HeaderGid,
  HeaderSize,
  HeaderMtime,
  HeaderLinkname,
  HeaderUname,
  HeaderGname,
  HeaderDevMajor,
  HeaderDevMinor,
  HeaderPrefix,
  HeaderAtime,
  HeaderCtime,
  PaxAtime,
  PaxCtime,
  PaxMtime,
  PaxUid,
  PaxGid,
  PaxSize,
  PaxDev,
  PaxIno,
  PaxNlink,
  GnuLongName,
  GnuLongLinkName,
}

impl Display for FieldContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      FieldContext::HeaderName => "header.name",
      FieldContext::HeaderMode => "header.mode",
      FieldContext::HeaderUid => "header.uid",
      FieldContext::HeaderGid => "header.gid",
      FieldContext::HeaderSize => "header.size",
      FieldContext::HeaderMtime => "header.mtime",
      FieldContext::HeaderLinkname => "header.linkname",
      FieldContext::HeaderUname => "header.uname",
      FieldContext::HeaderGname => "header.gname",
      FieldContext::HeaderDevMajor => "header.dev_major",
      FieldContext::HeaderDevMinor => "header.dev_minor",
      FieldContext::HeaderPrefix => "header.prefix",
      FieldContext::HeaderAtime => "header.atime",
      FieldContext::HeaderCtime => "header.ctime",
      FieldContext::PaxAtime => "pax.atime",
      FieldContext::PaxCtime => "pax.ctime",
      FieldContext::PaxMtime => "pax.mtime",
      FieldContext::PaxUid => "pax.uid",
      FieldContext::PaxGid => "pax.gid",
      FieldContext::PaxSize => "pax.size",
      FieldContext::PaxDev => "pax.dev",
      FieldContext::PaxIno => "pax.ino",
      FieldContext::PaxNlink => "pax.nlink",
      FieldContext::GnuLongName => "gnu.long_name",
      FieldContext::GnuLongLinkName => "gnu.long_link_name",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GzError {
  #[error("Invalid gzip magic: expected 0x1f 0x8b, got {0:#04x} {1:#04x}")]
  InvalidMagic(u8, u8),
  #[error("Unsupported gzip compression method {0}, only deflate (8) is supported")]
  InvalidCompressionMethod(u8),
  #[error("Decompression error: {0:?}")]
  Inflate(MZError),
  #[error("Gzip checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
  CrcMismatch { stored: u32, computed: u32 },
  #[error("Gzip length mismatch: trailer says {stored} bytes, inflated {inflated}")]
  LengthMismatch { stored: u32, inflated: u64 },
  #[error("Trailing data after the gzip stream")]
  TrailingData,
  #[error("Gzip stream ended mid-member")]
  Truncated,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TarErrorKind {
  #[error("Invalid header: {0}")]
  InvalidHeader(#[from] ChecksumError),
  #[error("Parsing field {field} failed: {error}")]
  CorruptField {
    field: FieldContext,
    error: GeneralParseError,
  },
  #[error("Malformed pax data: {0}")]
  MalformedPax(#[from] PaxSyntaxError),
  #[error("Meta entry of {size} bytes exceeds the configured limit of {limit} bytes")]
  OversizeMetaEntry { size: u64, limit: u64 },
  #[error("Unknown entry type code {code:#04x}")]
  UnknownEntryKind { code: u8 },
  #[error("Archive truncated: {pending_bytes} bytes pending in {context}")]
  TruncatedArchive {
    pending_bytes: usize,
    context: &'static str,
  },
  #[error("Gzip error: {0}")]
  Gzip(#[from] GzError),
  #[error("Unsupported entry type {kind}")]
  UnsupportedEntryKind { kind: EntryKind },
  #[error("Entry path {path} would escape the extraction root")]
  PathEscape { path: RelativePathBuf },
  #[error("Entry path {path} traverses a symlink")]
  SymlinkShadow { path: RelativePathBuf },
  #[error("Skipped {path}: {reason}")]
  PolicySkip {
    path: RelativePathBuf,
    reason: &'static str,
  },
  #[error("Sink requested abort")]
  Aborted,
  #[error("Invalid parser state transition")]
  InvalidState,
}

/// Equivalent to a bool but allows searching for errors more easily.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Severity {
  Fatal,
  Recoverable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct TarError {
  pub kind: TarErrorKind,
  pub severity: Severity,
}

impl TarError {
  #[must_use]
  pub fn recoverable<EK: Into<TarErrorKind>>(kind: EK) -> Self {
    Self {
      kind: kind.into(),
      severity: Severity::Recoverable,
    }
  }

  #[must_use]
  pub fn fatal<EK: Into<TarErrorKind>>(kind: EK) -> Self {
    Self {
      kind: kind.into(),
      severity: Severity::Fatal,
    }
  }

  #[must_use]
  pub fn escalate(mut self) -> Self {
    self.severity = Severity::Fatal;
    self
  }

  #[must_use]
  pub fn is_fatal(&self) -> bool {
    self.severity == Severity::Fatal
  }
}

impl Display for TarError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.severity {
      Severity::Fatal => write!(f, "Fatal tar error: {}", self.kind),
      Severity::Recoverable => write!(f, "Recoverable tar error: {}", self.kind),
    }
  }
}
