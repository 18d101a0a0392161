use alloc::{
  format,
  string::String,
  vec,
  vec::Vec,
};

use hashbrown::HashMap;
use relative_path::{RelativePath, RelativePathBuf};
use thiserror::Error;

use crate::{
  codec::{align_to_block_size_u64, EntryKind, PaxAttributes, TarHeader},
  errors::{TarError, TarErrorKind},
  fs::{FileKind, Vfs, VfsError, VfsMetadata},
  io::{Read as _, Write},
  violations::{IgnoreViolationHandler, Reported, ViolationHandler},
  writer::{TarWriteError, TarWriter},
};

pub struct BuilderOptions {
  /// Omit uid, gid, uname, gname, atime, ctime and the dev/ino/nlink pax
  /// fields, producing archives that are identical across machines.
  pub portable: bool,
  /// Upper bound on a single read from the source filesystem.
  pub max_read_size: usize,
  /// Owner names recorded in headers (`lstat` carries only numeric ids).
  pub uname: String,
  pub gname: String,
}

impl Default for BuilderOptions {
  fn default() -> Self {
    Self {
      portable: false,
      max_read_size: 1024 * 1024,
      uname: String::new(),
      gname: String::new(),
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BuildError<U> {
  #[error("Filesystem error: {0}")]
  Vfs(#[from] VfsError),
  #[error("Archive write error: {0}")]
  Write(#[from] TarWriteError<U>),
  #[error("Source file shrank while being archived: {path} ended {remaining} bytes early")]
  SourceTruncated {
    path: RelativePathBuf,
    remaining: u64,
  },
  #[error("{0}")]
  Violation(#[from] TarError),
}

fn source_entry_kind(kind: FileKind) -> EntryKind {
  match kind {
    FileKind::File => EntryKind::File,
    FileKind::Directory => EntryKind::Directory,
    FileKind::SymbolicLink => EntryKind::SymbolicLink,
    FileKind::CharacterDevice => EntryKind::CharacterDevice,
    FileKind::BlockDevice => EntryKind::BlockDevice,
    FileKind::Fifo => EntryKind::Fifo,
    FileKind::Socket | FileKind::Unknown => EntryKind::Unknown(b'?'),
  }
}

/// Produces archive entries from filesystem paths.
///
/// Regular files with more than one link are deduplicated through the
/// link cache: the first path is encoded with its body, every later path
/// sharing the same `(dev, ino)` becomes a hard-link entry pointing at
/// it. Stat and readdir results are memoized, and bodies are streamed in
/// bounded reads.
pub struct ArchiveBuilder<V: Vfs, W: Write, VH: ViolationHandler = IgnoreViolationHandler> {
  vfs: V,
  writer: TarWriter<W>,
  violation_handler: VH,
  options: BuilderOptions,
  link_cache: HashMap<(u64, u64), RelativePathBuf>,
  stat_cache: HashMap<RelativePathBuf, VfsMetadata>,
  readdir_cache: HashMap<RelativePathBuf, Vec<String>>,
}

impl<V: Vfs, W: Write> ArchiveBuilder<V, W, IgnoreViolationHandler> {
  #[must_use]
  pub fn new(vfs: V, target: W) -> Self {
    Self::with_options(vfs, target, BuilderOptions::default(), IgnoreViolationHandler)
  }
}

impl<V: Vfs, W: Write, VH: ViolationHandler> ArchiveBuilder<V, W, VH> {
  #[must_use]
  pub fn with_options(vfs: V, target: W, options: BuilderOptions, violation_handler: VH) -> Self {
    Self {
      vfs,
      writer: TarWriter::new(target),
      violation_handler,
      options,
      link_cache: HashMap::new(),
      stat_cache: HashMap::new(),
      readdir_cache: HashMap::new(),
    }
  }

  #[must_use]
  pub fn vfs(&self) -> &V {
    &self.vfs
  }

  /// First-seen archive paths by `(dev, ino)`.
  #[must_use]
  pub fn link_cache(&self) -> &HashMap<(u64, u64), RelativePathBuf> {
    &self.link_cache
  }

  fn report<EK: Into<TarErrorKind>>(&mut self, kind: EK) -> Result<(), TarError> {
    Reported(&mut self.violation_handler).report(kind)
  }

  fn lstat_cached(&mut self, path: &RelativePath) -> Result<VfsMetadata, VfsError> {
    let cache_key = path.to_relative_path_buf();
    if let Some(metadata) = self.stat_cache.get(&cache_key) {
      return Ok(metadata.clone());
    }
    let metadata = self.vfs.lstat(path)?;
    self.stat_cache.insert(cache_key, metadata.clone());
    Ok(metadata)
  }

  fn readdir_cached(&mut self, path: &RelativePath) -> Result<Vec<String>, VfsError> {
    let cache_key = path.to_relative_path_buf();
    if let Some(names) = self.readdir_cache.get(&cache_key) {
      return Ok(names.clone());
    }
    let names = self.vfs.read_dir(path)?;
    self.readdir_cache.insert(cache_key, names.clone());
    Ok(names)
  }

  fn header_for(
    &self,
    path: &RelativePath,
    metadata: &VfsMetadata,
    kind: EntryKind,
    link_target: String,
    size: u64,
  ) -> TarHeader {
    let portable = self.options.portable;
    let path = if kind == EntryKind::Directory {
      format!("{}/", path)
    } else {
      path.as_str().into()
    };
    TarHeader {
      path,
      mode: metadata.mode,
      uid: if portable { 0 } else { metadata.uid },
      gid: if portable { 0 } else { metadata.gid },
      size,
      mtime: metadata.mtime,
      atime: if portable { None } else { metadata.atime },
      ctime: if portable { None } else { metadata.ctime },
      kind,
      link_target,
      uname: if portable {
        String::new()
      } else {
        self.options.uname.clone()
      },
      gname: if portable {
        String::new()
      } else {
        self.options.gname.clone()
      },
      dev_major: 0,
      dev_minor: 0,
    }
  }

  fn append_file(
    &mut self,
    path: &RelativePath,
    metadata: &VfsMetadata,
  ) -> Result<(), BuildError<W::WriteError>> {
    if metadata.nlink > 1 {
      let link_key = (metadata.dev, metadata.ino);
      match self.link_cache.get(&link_key) {
        Some(first_seen) if first_seen.as_relative_path() != path => {
          // a body for this inode is already in the archive
          let link_target = first_seen.as_str().into();
          let header = self.header_for(path, metadata, EntryKind::Link, link_target, 0);
          self.writer.append(&header, b"")?;
          return Ok(());
        },
        Some(_) => {},
        None => {
          self
            .link_cache
            .insert(link_key, path.to_relative_path_buf());
        },
      }
    }

    let header = self.header_for(path, metadata, EntryKind::File, String::new(), metadata.size);
    let extra_pax = (!self.options.portable).then(|| PaxAttributes {
      dev: Some(metadata.dev),
      ino: Some(metadata.ino),
      nlink: Some(metadata.nlink),
      ..PaxAttributes::default()
    });
    self
      .writer
      .begin_entry_with_overrides(&header, extra_pax.as_ref())?;

    if metadata.size > 0 {
      let buffer_len = align_to_block_size_u64(metadata.size)
        .min(self.options.max_read_size as u64) as usize;
      let mut buffer = vec![0_u8; buffer_len];
      let mut reader = self.vfs.open_read(path)?;
      let mut remaining = metadata.size;
      while remaining > 0 {
        let want = buffer_len.min(remaining as usize);
        let bytes_read = reader
          .read_full(&mut buffer[..want])
          .map_err(BuildError::Vfs)?;
        self.writer.write_data(&buffer[..bytes_read])?;
        remaining -= bytes_read as u64;
        if bytes_read < want {
          // the file shrank under us; the archive can not be completed
          return Err(BuildError::SourceTruncated {
            path: path.to_relative_path_buf(),
            remaining,
          });
        }
      }
    }
    self.writer.end_entry()?;
    Ok(())
  }

  /// Encodes the entry for one path. Unsupported source kinds are
  /// reported and produce nothing.
  pub fn append_path(&mut self, path: &RelativePath) -> Result<(), BuildError<W::WriteError>> {
    let metadata = self.lstat_cached(path)?;
    match metadata.kind {
      FileKind::File => self.append_file(path, &metadata),
      FileKind::Directory => {
        let header = self.header_for(path, &metadata, EntryKind::Directory, String::new(), 0);
        self.writer.append(&header, b"")?;
        Ok(())
      },
      FileKind::SymbolicLink => {
        let link_target = self.vfs.read_link(path)?;
        let header =
          self.header_for(path, &metadata, EntryKind::SymbolicLink, link_target, 0);
        self.writer.append(&header, b"")?;
        Ok(())
      },
      other => {
        self.report(TarErrorKind::UnsupportedEntryKind {
          kind: source_entry_kind(other),
        })?;
        Ok(())
      },
    }
  }

  /// Appends a path and, for directories, everything beneath it in
  /// sorted readdir order.
  pub fn append_tree(&mut self, path: &RelativePath) -> Result<(), BuildError<W::WriteError>> {
    let metadata = self.lstat_cached(path)?;
    if !path.as_str().is_empty() {
      self.append_path(path)?;
    }
    if metadata.kind == FileKind::Directory {
      for name in self.readdir_cached(path)? {
        let child = path.join(&name);
        self.append_tree(&child)?;
      }
    }
    Ok(())
  }

  /// Terminates the archive and returns the underlying target.
  pub fn finish(mut self) -> Result<W, BuildError<W::WriteError>> {
    self.writer.finish()?;
    Ok(self.writer.into_inner())
  }
}
