use alloc::{
  string::{String, ToString as _},
  vec::Vec,
};

use hashbrown::HashMap;
use relative_path::{RelativePath, RelativePathBuf};

use crate::{
  codec::{FileMode, TimeStamp},
  fs::{FileKind, Vfs, VfsError, VfsErrorKind, VfsMetadata},
  io::Read,
};

#[derive(Debug, Clone)]
enum MemoryNode {
  File { inode: u64 },
  Directory {
    mode: FileMode,
    mtime: Option<TimeStamp>,
    atime: Option<TimeStamp>,
  },
  Symlink { target: String },
  /// A node with no content: fifo, socket, device.
  Special { kind: FileKind },
}

#[derive(Debug, Clone)]
struct FileInode {
  data: Vec<u8>,
  mode: FileMode,
  uid: u64,
  gid: u64,
  mtime: Option<TimeStamp>,
  atime: Option<TimeStamp>,
  ctime: Option<TimeStamp>,
  nlink: u64,
}

/// An in-memory filesystem tree.
///
/// Regular files live behind inode numbers so hard links and `nlink`
/// counts behave like a real filesystem; the device number is a fixed
/// per-instance value. Used by the tests and by no_std callers.
#[derive(Debug, Clone)]
pub struct MemoryFs {
  nodes: HashMap<RelativePathBuf, MemoryNode>,
  inodes: HashMap<u64, FileInode>,
  next_inode: u64,
  device: u64,
}

impl Default for MemoryFs {
  fn default() -> Self {
    Self::new()
  }
}

fn key(path: &RelativePath) -> RelativePathBuf {
  path.normalize()
}

impl MemoryFs {
  #[must_use]
  pub fn new() -> Self {
    Self {
      nodes: HashMap::new(),
      inodes: HashMap::new(),
      next_inode: 1,
      device: 1,
    }
  }

  #[must_use]
  pub fn device(&self) -> u64 {
    self.device
  }

  fn ensure_parents(&mut self, path: &RelativePath) {
    let Some(parent) = path.parent() else {
      return;
    };
    if parent.as_str().is_empty() {
      return;
    }
    self.ensure_parents(parent);
    let parent_key = key(parent);
    self.nodes.entry(parent_key).or_insert(MemoryNode::Directory {
      mode: FileMode::new(0o755),
      mtime: None,
      atime: None,
    });
  }

  /// Test/setup helper: creates a regular file, with intermediate
  /// directories, and returns its inode number.
  pub fn add_file(&mut self, path: &str, data: &[u8]) -> u64 {
    self.add_file_with_mode(path, data, FileMode::default())
  }

  pub fn add_file_with_mode(&mut self, path: &str, data: &[u8], mode: FileMode) -> u64 {
    let path = RelativePathBuf::from(path.to_string());
    self.ensure_parents(&path);
    let inode = self.next_inode;
    self.next_inode += 1;
    self.inodes.insert(
      inode,
      FileInode {
        data: data.to_vec(),
        mode,
        uid: 0,
        gid: 0,
        mtime: None,
        atime: None,
        ctime: None,
        nlink: 1,
      },
    );
    self.nodes.insert(key(&path), MemoryNode::File { inode });
    inode
  }

  /// Test/setup helper: creates a directory and its parents.
  pub fn add_dir(&mut self, path: &str) {
    let path = RelativePathBuf::from(path.to_string());
    self.ensure_parents(&path);
    self.nodes.insert(
      key(&path),
      MemoryNode::Directory {
        mode: FileMode::new(0o755),
        mtime: None,
        atime: None,
      },
    );
  }

  /// Test/setup helper: creates a symlink node (the target may dangle).
  pub fn add_symlink(&mut self, path: &str, target: &str) {
    let path = RelativePathBuf::from(path.to_string());
    self.ensure_parents(&path);
    self.nodes.insert(
      key(&path),
      MemoryNode::Symlink {
        target: target.to_string(),
      },
    );
  }

  /// Test/setup helper: creates a contentless special node (fifo,
  /// socket, device).
  pub fn add_special(&mut self, path: &str, kind: FileKind) {
    let path = RelativePathBuf::from(path.to_string());
    self.ensure_parents(&path);
    self.nodes.insert(key(&path), MemoryNode::Special { kind });
  }

  /// Test/setup helper: sets the owner of an existing file.
  pub fn set_owner(&mut self, path: &str, uid: u64, gid: u64) {
    if let Some(MemoryNode::File { inode }) = self.nodes.get(RelativePath::new(path)) {
      if let Some(file) = self.inodes.get_mut(inode) {
        file.uid = uid;
        file.gid = gid;
      }
    }
  }

  #[must_use]
  pub fn contains(&self, path: &str) -> bool {
    let path = key(RelativePath::new(path));
    path.as_str().is_empty() || self.nodes.contains_key(&path)
  }

  #[must_use]
  pub fn kind(&self, path: &str) -> Option<FileKind> {
    match self.nodes.get(&key(RelativePath::new(path)))? {
      MemoryNode::File { .. } => Some(FileKind::File),
      MemoryNode::Directory { .. } => Some(FileKind::Directory),
      MemoryNode::Symlink { .. } => Some(FileKind::SymbolicLink),
      MemoryNode::Special { kind } => Some(*kind),
    }
  }

  #[must_use]
  pub fn file_data(&self, path: &str) -> Option<&[u8]> {
    match self.nodes.get(&key(RelativePath::new(path)))? {
      MemoryNode::File { inode } => self.inodes.get(inode).map(|f| f.data.as_slice()),
      _ => None,
    }
  }

  #[must_use]
  pub fn symlink_target(&self, path: &str) -> Option<&str> {
    match self.nodes.get(&key(RelativePath::new(path)))? {
      MemoryNode::Symlink { target } => Some(target),
      _ => None,
    }
  }

  /// Every stored path, sorted; handy for whole-tree assertions.
  #[must_use]
  pub fn paths(&self) -> Vec<RelativePathBuf> {
    let mut paths: Vec<_> = self.nodes.keys().cloned().collect();
    paths.sort();
    paths
  }

  fn node(&self, path: &RelativePath) -> Result<&MemoryNode, VfsError> {
    self
      .nodes
      .get(&key(path))
      .ok_or_else(|| VfsError::not_found(path))
  }

  fn file_inode(&self, path: &RelativePath) -> Result<(u64, &FileInode), VfsError> {
    match self.node(path)? {
      MemoryNode::File { inode } => self
        .inodes
        .get(inode)
        .map(|file| (*inode, file))
        .ok_or_else(|| VfsError::not_found(path)),
      MemoryNode::Directory { .. } => Err(VfsError::new(VfsErrorKind::IsADirectory, path)),
      MemoryNode::Symlink { .. } | MemoryNode::Special { .. } => {
        Err(VfsError::new(VfsErrorKind::Unsupported, path))
      },
    }
  }

  fn parent_is_dir(&self, path: &RelativePath) -> Result<(), VfsError> {
    let normalized = key(path);
    let Some(parent) = normalized.parent() else {
      return Ok(());
    };
    if parent.as_str().is_empty() {
      return Ok(());
    }
    match self.nodes.get(&key(parent)) {
      Some(MemoryNode::Directory { .. }) => Ok(()),
      Some(_) => Err(VfsError::new(VfsErrorKind::NotADirectory, parent)),
      None => Err(VfsError::not_found(parent)),
    }
  }
}

/// A reader over a snapshot of one file's content.
pub struct MemoryFile {
  data: Vec<u8>,
  position: usize,
}

impl Read for MemoryFile {
  type ReadError = VfsError;

  fn read(&mut self, output_buffer: &mut [u8]) -> Result<usize, Self::ReadError> {
    let remaining = &self.data[self.position..];
    let n = remaining.len().min(output_buffer.len());
    output_buffer[..n].copy_from_slice(&remaining[..n]);
    self.position += n;
    Ok(n)
  }
}

impl Vfs for MemoryFs {
  type ReadFile = MemoryFile;

  fn lstat(&self, path: &RelativePath) -> Result<VfsMetadata, VfsError> {
    let normalized = key(path);
    if normalized.as_str().is_empty() {
      // the root is always a directory
      return Ok(VfsMetadata {
        kind: FileKind::Directory,
        mode: FileMode::new(0o755),
        uid: 0,
        gid: 0,
        size: 0,
        mtime: None,
        atime: None,
        ctime: None,
        dev: self.device,
        ino: 0,
        nlink: 1,
      });
    }
    match self.node(path)? {
      MemoryNode::File { inode } => {
        let file = self
          .inodes
          .get(inode)
          .ok_or_else(|| VfsError::not_found(path))?;
        Ok(VfsMetadata {
          kind: FileKind::File,
          mode: file.mode,
          uid: file.uid,
          gid: file.gid,
          size: file.data.len() as u64,
          mtime: file.mtime,
          atime: file.atime,
          ctime: file.ctime,
          dev: self.device,
          ino: *inode,
          nlink: file.nlink,
        })
      },
      MemoryNode::Directory { mode, mtime, atime } => Ok(VfsMetadata {
        kind: FileKind::Directory,
        mode: *mode,
        uid: 0,
        gid: 0,
        size: 0,
        mtime: *mtime,
        atime: *atime,
        ctime: None,
        dev: self.device,
        ino: 0,
        nlink: 1,
      }),
      MemoryNode::Symlink { target } => Ok(VfsMetadata {
        kind: FileKind::SymbolicLink,
        mode: FileMode::new(0o777),
        uid: 0,
        gid: 0,
        size: target.len() as u64,
        mtime: None,
        atime: None,
        ctime: None,
        dev: self.device,
        ino: 0,
        nlink: 1,
      }),
      MemoryNode::Special { kind } => Ok(VfsMetadata {
        kind: *kind,
        mode: FileMode::new(0o644),
        uid: 0,
        gid: 0,
        size: 0,
        mtime: None,
        atime: None,
        ctime: None,
        dev: self.device,
        ino: 0,
        nlink: 1,
      }),
    }
  }

  fn read_link(&self, path: &RelativePath) -> Result<String, VfsError> {
    match self.node(path)? {
      MemoryNode::Symlink { target } => Ok(target.clone()),
      _ => Err(VfsError::new(VfsErrorKind::Unsupported, path)),
    }
  }

  fn read_dir(&self, path: &RelativePath) -> Result<Vec<String>, VfsError> {
    let normalized = key(path);
    if !normalized.as_str().is_empty() {
      match self.node(path)? {
        MemoryNode::Directory { .. } => {},
        _ => return Err(VfsError::new(VfsErrorKind::NotADirectory, path)),
      }
    }
    let mut names: Vec<String> = self
      .nodes
      .keys()
      .filter(|candidate| candidate.parent() == Some(normalized.as_relative_path()))
      .filter_map(|candidate| candidate.file_name().map(str::to_string))
      .collect();
    names.sort();
    Ok(names)
  }

  fn open_read(&self, path: &RelativePath) -> Result<Self::ReadFile, VfsError> {
    let (_, file) = self.file_inode(path)?;
    Ok(MemoryFile {
      data: file.data.clone(),
      position: 0,
    })
  }

  fn write_file(
    &mut self,
    path: &RelativePath,
    mode: FileMode,
    data: &[u8],
  ) -> Result<(), VfsError> {
    self.parent_is_dir(path)?;
    match self.nodes.get(&key(path)) {
      Some(MemoryNode::Directory { .. }) => {
        return Err(VfsError::new(VfsErrorKind::IsADirectory, path));
      },
      Some(MemoryNode::File { inode }) => {
        // truncate in place, preserving the inode and its link count
        let inode = *inode;
        if let Some(file) = self.inodes.get_mut(&inode) {
          file.data = data.to_vec();
          file.mode = mode;
        }
        return Ok(());
      },
      Some(MemoryNode::Symlink { .. } | MemoryNode::Special { .. }) | None => {},
    }
    let inode = self.next_inode;
    self.next_inode += 1;
    self.inodes.insert(
      inode,
      FileInode {
        data: data.to_vec(),
        mode,
        uid: 0,
        gid: 0,
        mtime: None,
        atime: None,
        ctime: None,
        nlink: 1,
      },
    );
    self.nodes.insert(key(path), MemoryNode::File { inode });
    Ok(())
  }

  fn create_dir(&mut self, path: &RelativePath, mode: FileMode) -> Result<(), VfsError> {
    let normalized = key(path);
    if normalized.as_str().is_empty() {
      // the root always exists
      return Ok(());
    }
    self.parent_is_dir(path)?;
    if self.nodes.contains_key(&normalized) {
      return Err(VfsError::already_exists(path));
    }
    self.nodes.insert(
      normalized,
      MemoryNode::Directory {
        mode,
        mtime: None,
        atime: None,
      },
    );
    Ok(())
  }

  fn symlink(&mut self, target: &str, link_path: &RelativePath) -> Result<(), VfsError> {
    self.parent_is_dir(link_path)?;
    let normalized = key(link_path);
    if self.nodes.contains_key(&normalized) {
      return Err(VfsError::already_exists(link_path));
    }
    self.nodes.insert(
      normalized,
      MemoryNode::Symlink {
        target: target.to_string(),
      },
    );
    Ok(())
  }

  fn hard_link(
    &mut self,
    original: &RelativePath,
    link_path: &RelativePath,
  ) -> Result<(), VfsError> {
    self.parent_is_dir(link_path)?;
    let (inode, _) = self.file_inode(original)?;
    let normalized = key(link_path);
    if self.nodes.contains_key(&normalized) {
      return Err(VfsError::already_exists(link_path));
    }
    if let Some(file) = self.inodes.get_mut(&inode) {
      file.nlink += 1;
    }
    self.nodes.insert(normalized, MemoryNode::File { inode });
    Ok(())
  }

  fn unlink(&mut self, path: &RelativePath) -> Result<(), VfsError> {
    let normalized = key(path);
    match self.nodes.get(&normalized) {
      None => Err(VfsError::not_found(path)),
      Some(MemoryNode::Directory { .. }) => {
        Err(VfsError::new(VfsErrorKind::IsADirectory, path))
      },
      Some(MemoryNode::Symlink { .. } | MemoryNode::Special { .. }) => {
        self.nodes.remove(&normalized);
        Ok(())
      },
      Some(MemoryNode::File { inode }) => {
        let inode = *inode;
        self.nodes.remove(&normalized);
        if let Some(file) = self.inodes.get_mut(&inode) {
          file.nlink -= 1;
          if file.nlink == 0 {
            self.inodes.remove(&inode);
          }
        }
        Ok(())
      },
    }
  }

  fn set_mode(&mut self, path: &RelativePath, mode: FileMode) -> Result<(), VfsError> {
    let normalized = key(path);
    match self.nodes.get_mut(&normalized) {
      None => Err(VfsError::not_found(path)),
      Some(MemoryNode::File { inode }) => {
        let inode = *inode;
        if let Some(file) = self.inodes.get_mut(&inode) {
          file.mode = mode;
        }
        Ok(())
      },
      Some(MemoryNode::Directory { mode: dir_mode, .. }) => {
        *dir_mode = mode;
        Ok(())
      },
      Some(MemoryNode::Symlink { .. } | MemoryNode::Special { .. }) => Ok(()),
    }
  }

  fn set_times(
    &mut self,
    path: &RelativePath,
    mtime: Option<TimeStamp>,
    atime: Option<TimeStamp>,
  ) -> Result<(), VfsError> {
    let normalized = key(path);
    match self.nodes.get_mut(&normalized) {
      None => Err(VfsError::not_found(path)),
      Some(MemoryNode::File { inode }) => {
        let inode = *inode;
        if let Some(file) = self.inodes.get_mut(&inode) {
          if mtime.is_some() {
            file.mtime = mtime;
          }
          if atime.is_some() {
            file.atime = atime;
          }
        }
        Ok(())
      },
      Some(MemoryNode::Directory {
        mtime: dir_mtime,
        atime: dir_atime,
        ..
      }) => {
        if mtime.is_some() {
          *dir_mtime = mtime;
        }
        if atime.is_some() {
          *dir_atime = atime;
        }
        Ok(())
      },
      Some(MemoryNode::Symlink { .. } | MemoryNode::Special { .. }) => Ok(()),
    }
  }
}
