use core::fmt::{self, Display};

/// https://www.gnu.org/software/tar/manual/html_node/Standard.html
/// # Type codes:
///
/// ## STANDARD:
///
/// - `0` or `\0` for regular file
/// - `1` for hard link
/// - `2` for symbolic link
/// - `3` for character device
/// - `4` for block device
/// - `5` for directory
/// - `6` for FIFO
/// - `7` for contiguous file (reserved, rarely used)
///
/// ## PAX:
///
/// - `x` for extended header (precedes the file it is associated with)
/// - `g` for global extended header (applies to all following entries)
///
/// ## VENDOR (`A`..`Z`):
///
/// - `D` for GNU dump dir (contains a list of file names in the directory)
/// - `K` for GNU long link name (body overrides the next entry's link target)
/// - `L` for GNU long file name (body overrides the next entry's path)
/// - `M` for a continued file from a multi-volume archive
/// - `N` for the obsolete GNU long path encoding
#[derive(Debug, Eq, Hash, PartialEq, Clone, Copy)]
pub enum EntryKind {
  /// Regular file
  File,
  /// Hard link
  Link,
  /// Symbolic link
  SymbolicLink,
  /// Character device
  CharacterDevice,
  /// Block device
  BlockDevice,
  /// Directory
  Directory,
  /// FIFO (named pipe)
  Fifo,
  /// Contiguous file, treated like a regular file
  ContiguousFile,
  /// Per-entry extended header `x`
  ExtendedHeader,
  /// Global extended header `g`
  GlobalExtendedHeader,
  /// GNU extension - dump directory
  GnuDumpDir,
  /// GNU extension - the next file has a long link target
  NextFileHasLongLinkpath,
  /// GNU extension - the next file has a long path
  NextFileHasLongPath,
  /// Continuation of a file from a previous volume
  OldFile,
  /// Obsolete GNU long path
  OldGnuLongPath,
  Unknown(u8),
}

impl From<u8> for EntryKind {
  fn from(value: u8) -> Self {
    match value {
      b'\0' | b'0' => EntryKind::File,
      b'1' => EntryKind::Link,
      b'2' => EntryKind::SymbolicLink,
      b'3' => EntryKind::CharacterDevice,
      b'4' => EntryKind::BlockDevice,
      b'5' => EntryKind::Directory,
      b'6' => EntryKind::Fifo,
      b'7' => EntryKind::ContiguousFile,
      b'x' => EntryKind::ExtendedHeader,
      b'g' => EntryKind::GlobalExtendedHeader,
      b'D' => EntryKind::GnuDumpDir,
      b'K' => EntryKind::NextFileHasLongLinkpath,
      b'L' => EntryKind::NextFileHasLongPath,
      b'M' => EntryKind::OldFile,
      b'N' => EntryKind::OldGnuLongPath,
      _ => EntryKind::Unknown(value),
    }
  }
}

impl From<EntryKind> for u8 {
  fn from(value: EntryKind) -> Self {
    match value {
      EntryKind::File => b'0',
      EntryKind::Link => b'1',
      EntryKind::SymbolicLink => b'2',
      EntryKind::CharacterDevice => b'3',
      EntryKind::BlockDevice => b'4',
      EntryKind::Directory => b'5',
      EntryKind::Fifo => b'6',
      EntryKind::ContiguousFile => b'7',
      EntryKind::ExtendedHeader => b'x',
      EntryKind::GlobalExtendedHeader => b'g',
      EntryKind::GnuDumpDir => b'D',
      EntryKind::NextFileHasLongLinkpath => b'K',
      EntryKind::NextFileHasLongPath => b'L',
      EntryKind::OldFile => b'M',
      EntryKind::OldGnuLongPath => b'N',
      EntryKind::Unknown(value) => value,
    }
  }
}

impl EntryKind {
  /// Human-readable name of the type code.
  #[must_use]
  pub fn name(&self) -> &'static str {
    match self {
      EntryKind::File => "File",
      EntryKind::Link => "Link",
      EntryKind::SymbolicLink => "SymbolicLink",
      EntryKind::CharacterDevice => "CharacterDevice",
      EntryKind::BlockDevice => "BlockDevice",
      EntryKind::Directory => "Directory",
      EntryKind::Fifo => "FIFO",
      EntryKind::ContiguousFile => "ContiguousFile",
      EntryKind::ExtendedHeader => "ExtendedHeader",
      EntryKind::GlobalExtendedHeader => "GlobalExtendedHeader",
      EntryKind::GnuDumpDir => "GNUDumpDir",
      EntryKind::NextFileHasLongLinkpath => "NextFileHasLongLinkpath",
      EntryKind::NextFileHasLongPath => "NextFileHasLongPath",
      EntryKind::OldFile => "OldFile",
      EntryKind::OldGnuLongPath => "OldGnuLongPath",
      EntryKind::Unknown(_) => "Unknown",
    }
  }

  /// Meta entries describe the next entry instead of a filesystem object.
  #[must_use]
  pub fn is_meta(&self) -> bool {
    matches!(
      self,
      EntryKind::ExtendedHeader
        | EntryKind::GlobalExtendedHeader
        | EntryKind::NextFileHasLongLinkpath
        | EntryKind::NextFileHasLongPath
        | EntryKind::OldGnuLongPath
    )
  }

  /// Entry kinds whose body is regular file content.
  #[must_use]
  pub fn is_file_like(&self) -> bool {
    matches!(
      self,
      EntryKind::File | EntryKind::ContiguousFile | EntryKind::OldFile
    )
  }

  #[must_use]
  pub fn is_link_like(&self) -> bool {
    matches!(self, EntryKind::Link | EntryKind::SymbolicLink)
  }

  #[must_use]
  pub fn is_directory_like(&self) -> bool {
    matches!(self, EntryKind::Directory | EntryKind::GnuDumpDir)
  }
}

impl Display for EntryKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntryKind::Unknown(code) => write!(f, "Unknown({:#04x})", code),
      other => f.write_str(other.name()),
    }
  }
}

/// A point in time as seconds since the Unix epoch.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeStamp {
  pub seconds_since_epoch: u64,
  pub nanoseconds: u32,
}

impl TimeStamp {
  #[must_use]
  pub fn from_seconds(seconds_since_epoch: u64) -> Self {
    Self {
      seconds_since_epoch,
      nanoseconds: 0,
    }
  }
}

/// A 12-bit Unix permission mode (the `mode` field of a header).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileMode(u16);

impl FileMode {
  pub const MASK: u16 = 0o7777;

  #[must_use]
  pub const fn new(bits: u16) -> Self {
    Self(bits & Self::MASK)
  }

  #[must_use]
  pub const fn bits(self) -> u16 {
    self.0
  }

  #[must_use]
  pub const fn is_zero(self) -> bool {
    self.0 == 0
  }

  /// Clears the bits set in `umask`.
  #[must_use]
  pub const fn apply_umask(self, umask: u16) -> Self {
    Self(self.0 & !umask & Self::MASK)
  }
}

impl Default for FileMode {
  fn default() -> Self {
    Self(0o644)
  }
}

impl Display for FileMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:04o}", self.0)
  }
}
