mod memory;
#[cfg(all(feature = "std", unix))]
mod std_fs;

pub use memory::*;
#[cfg(all(feature = "std", unix))]
pub use std_fs::*;

use alloc::{string::String, vec::Vec};

use relative_path::{RelativePath, RelativePathBuf};
use thiserror::Error;

use crate::{
  codec::{FileMode, TimeStamp},
  io::Read,
};

/// The kind of a filesystem object as reported by `lstat`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FileKind {
  File,
  Directory,
  SymbolicLink,
  CharacterDevice,
  BlockDevice,
  Fifo,
  Socket,
  Unknown,
}

/// A stat result, reduced to the fields the codec consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsMetadata {
  pub kind: FileKind,
  pub mode: FileMode,
  pub uid: u64,
  pub gid: u64,
  pub size: u64,
  pub mtime: Option<TimeStamp>,
  pub atime: Option<TimeStamp>,
  pub ctime: Option<TimeStamp>,
  pub dev: u64,
  pub ino: u64,
  pub nlink: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VfsErrorKind {
  #[error("not found")]
  NotFound,
  #[error("already exists")]
  AlreadyExists,
  #[error("not a directory")]
  NotADirectory,
  #[error("is a directory")]
  IsADirectory,
  #[error("permission denied")]
  PermissionDenied,
  #[error("unsupported operation")]
  Unsupported,
  #[error("{0}")]
  Other(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{path}: {kind}")]
pub struct VfsError {
  pub kind: VfsErrorKind,
  pub path: RelativePathBuf,
}

impl VfsError {
  #[must_use]
  pub fn new(kind: VfsErrorKind, path: &RelativePath) -> Self {
    Self {
      kind,
      path: path.to_relative_path_buf(),
    }
  }

  #[must_use]
  pub fn not_found(path: &RelativePath) -> Self {
    Self::new(VfsErrorKind::NotFound, path)
  }

  #[must_use]
  pub fn already_exists(path: &RelativePath) -> Self {
    Self::new(VfsErrorKind::AlreadyExists, path)
  }

  #[must_use]
  pub fn is_not_found(&self) -> bool {
    self.kind == VfsErrorKind::NotFound
  }

  #[must_use]
  pub fn is_already_exists(&self) -> bool {
    self.kind == VfsErrorKind::AlreadyExists
  }
}

/// The filesystem capability surface the archive builder and the extractor
/// operate against. Paths are relative to the filesystem's own root, so an
/// implementation rooted at a directory is a structural jail.
pub trait Vfs {
  type ReadFile: Read<ReadError = VfsError>;

  fn lstat(&self, path: &RelativePath) -> Result<VfsMetadata, VfsError>;
  fn read_link(&self, path: &RelativePath) -> Result<String, VfsError>;
  /// Child names of a directory, sorted.
  fn read_dir(&self, path: &RelativePath) -> Result<Vec<String>, VfsError>;
  fn open_read(&self, path: &RelativePath) -> Result<Self::ReadFile, VfsError>;

  /// Creates or truncates a regular file with the given mode and content.
  fn write_file(
    &mut self,
    path: &RelativePath,
    mode: FileMode,
    data: &[u8],
  ) -> Result<(), VfsError>;
  /// Creates a single directory; the parent must already exist.
  fn create_dir(&mut self, path: &RelativePath, mode: FileMode) -> Result<(), VfsError>;
  fn symlink(&mut self, target: &str, link_path: &RelativePath) -> Result<(), VfsError>;
  fn hard_link(
    &mut self,
    original: &RelativePath,
    link_path: &RelativePath,
  ) -> Result<(), VfsError>;
  fn unlink(&mut self, path: &RelativePath) -> Result<(), VfsError>;
  fn set_mode(&mut self, path: &RelativePath, mode: FileMode) -> Result<(), VfsError>;
  fn set_times(
    &mut self,
    path: &RelativePath,
    mtime: Option<TimeStamp>,
    atime: Option<TimeStamp>,
  ) -> Result<(), VfsError>;
}
