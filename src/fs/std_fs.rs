use alloc::{
  string::{String, ToString as _},
  vec::Vec,
};

use std::{
  fs,
  io::Read as _,
  path::PathBuf,
  time::{Duration, SystemTime},
};

use relative_path::{Component, RelativePath, RelativePathBuf};

use crate::{
  codec::{FileMode, TimeStamp},
  fs::{FileKind, Vfs, VfsError, VfsErrorKind, VfsMetadata},
  io::Read,
};

/// A [`Vfs`] over `std::fs`, rooted at a directory.
///
/// Every operation joins the root with a relative path, so nothing outside
/// the root is ever named directly; lexical escapes (`..`) are the
/// extractor's responsibility to reject.
pub struct StdFs {
  root: PathBuf,
}

impl StdFs {
  #[must_use]
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  #[must_use]
  pub fn root(&self) -> &std::path::Path {
    &self.root
  }

  fn resolve(&self, path: &RelativePath) -> PathBuf {
    let mut full = self.root.clone();
    for component in path.components() {
      match component {
        Component::CurDir => {},
        Component::ParentDir => {
          full.push("..");
        },
        Component::Normal(name) => full.push(name),
      }
    }
    full
  }
}

fn map_io_error(error: &std::io::Error, path: &RelativePath) -> VfsError {
  use std::io::ErrorKind;
  let kind = match error.kind() {
    ErrorKind::NotFound => VfsErrorKind::NotFound,
    ErrorKind::AlreadyExists => VfsErrorKind::AlreadyExists,
    ErrorKind::PermissionDenied => VfsErrorKind::PermissionDenied,
    ErrorKind::NotADirectory => VfsErrorKind::NotADirectory,
    ErrorKind::IsADirectory => VfsErrorKind::IsADirectory,
    ErrorKind::Unsupported => VfsErrorKind::Unsupported,
    _ => VfsErrorKind::Other(error.to_string()),
  };
  VfsError::new(kind, path)
}

fn timestamp(seconds: i64, nanoseconds: i64) -> Option<TimeStamp> {
  let seconds_since_epoch = u64::try_from(seconds).ok()?;
  Some(TimeStamp {
    seconds_since_epoch,
    nanoseconds: nanoseconds as u32,
  })
}

fn system_time(value: TimeStamp) -> SystemTime {
  SystemTime::UNIX_EPOCH
    + Duration::new(value.seconds_since_epoch, value.nanoseconds)
}

/// An open file handle adapting `std::io::Read` to the crate's seam.
pub struct StdFile {
  file: fs::File,
  path: RelativePathBuf,
}

impl Read for StdFile {
  type ReadError = VfsError;

  fn read(&mut self, output_buffer: &mut [u8]) -> Result<usize, Self::ReadError> {
    self
      .file
      .read(output_buffer)
      .map_err(|e| map_io_error(&e, &self.path))
  }
}

impl Vfs for StdFs {
  type ReadFile = StdFile;

  fn lstat(&self, path: &RelativePath) -> Result<VfsMetadata, VfsError> {
    use std::os::unix::fs::{FileTypeExt as _, MetadataExt as _};

    let meta = fs::symlink_metadata(self.resolve(path)).map_err(|e| map_io_error(&e, path))?;
    let file_type = meta.file_type();
    let kind = if file_type.is_file() {
      FileKind::File
    } else if file_type.is_dir() {
      FileKind::Directory
    } else if file_type.is_symlink() {
      FileKind::SymbolicLink
    } else if file_type.is_char_device() {
      FileKind::CharacterDevice
    } else if file_type.is_block_device() {
      FileKind::BlockDevice
    } else if file_type.is_fifo() {
      FileKind::Fifo
    } else if file_type.is_socket() {
      FileKind::Socket
    } else {
      FileKind::Unknown
    };

    Ok(VfsMetadata {
      kind,
      mode: FileMode::new((meta.mode() & 0o7777) as u16),
      uid: u64::from(meta.uid()),
      gid: u64::from(meta.gid()),
      size: meta.size(),
      mtime: timestamp(meta.mtime(), meta.mtime_nsec()),
      atime: timestamp(meta.atime(), meta.atime_nsec()),
      ctime: timestamp(meta.ctime(), meta.ctime_nsec()),
      dev: meta.dev(),
      ino: meta.ino(),
      nlink: meta.nlink(),
    })
  }

  fn read_link(&self, path: &RelativePath) -> Result<String, VfsError> {
    let target = fs::read_link(self.resolve(path)).map_err(|e| map_io_error(&e, path))?;
    Ok(target.to_string_lossy().into_owned())
  }

  fn read_dir(&self, path: &RelativePath) -> Result<Vec<String>, VfsError> {
    let entries = fs::read_dir(self.resolve(path)).map_err(|e| map_io_error(&e, path))?;
    let mut names = Vec::new();
    for entry in entries {
      let entry = entry.map_err(|e| map_io_error(&e, path))?;
      names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
  }

  fn open_read(&self, path: &RelativePath) -> Result<Self::ReadFile, VfsError> {
    let file = fs::File::open(self.resolve(path)).map_err(|e| map_io_error(&e, path))?;
    Ok(StdFile {
      file,
      path: path.to_relative_path_buf(),
    })
  }

  fn write_file(
    &mut self,
    path: &RelativePath,
    mode: FileMode,
    data: &[u8],
  ) -> Result<(), VfsError> {
    use std::os::unix::fs::PermissionsExt as _;

    let full = self.resolve(path);
    fs::write(&full, data).map_err(|e| map_io_error(&e, path))?;
    fs::set_permissions(&full, fs::Permissions::from_mode(u32::from(mode.bits())))
      .map_err(|e| map_io_error(&e, path))
  }

  fn create_dir(&mut self, path: &RelativePath, mode: FileMode) -> Result<(), VfsError> {
    use std::os::unix::fs::PermissionsExt as _;

    let full = self.resolve(path);
    fs::create_dir(&full).map_err(|e| map_io_error(&e, path))?;
    // create_dir applies the process umask; set the mode explicitly
    fs::set_permissions(&full, fs::Permissions::from_mode(u32::from(mode.bits())))
      .map_err(|e| map_io_error(&e, path))
  }

  fn symlink(&mut self, target: &str, link_path: &RelativePath) -> Result<(), VfsError> {
    std::os::unix::fs::symlink(target, self.resolve(link_path))
      .map_err(|e| map_io_error(&e, link_path))
  }

  fn hard_link(
    &mut self,
    original: &RelativePath,
    link_path: &RelativePath,
  ) -> Result<(), VfsError> {
    fs::hard_link(self.resolve(original), self.resolve(link_path))
      .map_err(|e| map_io_error(&e, link_path))
  }

  fn unlink(&mut self, path: &RelativePath) -> Result<(), VfsError> {
    fs::remove_file(self.resolve(path)).map_err(|e| map_io_error(&e, path))
  }

  fn set_mode(&mut self, path: &RelativePath, mode: FileMode) -> Result<(), VfsError> {
    use std::os::unix::fs::PermissionsExt as _;

    fs::set_permissions(
      self.resolve(path),
      fs::Permissions::from_mode(u32::from(mode.bits())),
    )
    .map_err(|e| map_io_error(&e, path))
  }

  fn set_times(
    &mut self,
    path: &RelativePath,
    mtime: Option<TimeStamp>,
    atime: Option<TimeStamp>,
  ) -> Result<(), VfsError> {
    let file = fs::File::open(self.resolve(path)).map_err(|e| map_io_error(&e, path))?;
    let mut times = fs::FileTimes::new();
    if let Some(mtime) = mtime {
      times = times.set_modified(system_time(mtime));
    }
    if let Some(atime) = atime {
      times = times.set_accessed(system_time(atime));
    }
    file.set_times(times).map_err(|e| map_io_error(&e, path))
  }
}
