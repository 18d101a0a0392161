use alloc::{boxed::Box, vec::Vec};

use hashbrown::HashSet;
use relative_path::{RelativePath, RelativePathBuf};
use thiserror::Error;

use crate::{
  codec::{EntryKind, FileMode, TimeStamp},
  errors::{TarError, TarErrorKind},
  fs::{FileKind, Vfs, VfsError},
  parser::{Disposition, EntryAttributes, EntrySink},
  violations::{IgnoreViolationHandler, Reported, ViolationHandler},
};

pub struct ExtractOptions {
  /// Extraction root, relative to the filesystem's own root.
  pub cwd: RelativePathBuf,
  /// Number of leading path components dropped from each entry.
  pub strip: usize,
  /// Allow `..` components and symlink-traversing targets.
  pub preserve_paths: bool,
  /// Remove the target before creating it, breaking existing hard links
  /// and never writing through a preexisting symlink.
  pub unlink: bool,
  /// Skip entries whose on-disk counterpart has a newer mtime.
  pub newer: bool,
  pub umask: u16,
  /// Mode for implicitly created directories and directory entries
  /// without mode bits.
  pub dmode: FileMode,
  /// Mode for file entries without mode bits.
  pub fmode: FileMode,
}

impl Default for ExtractOptions {
  fn default() -> Self {
    Self {
      cwd: RelativePathBuf::new(),
      strip: 0,
      preserve_paths: false,
      unlink: false,
      newer: false,
      umask: 0o22,
      dmode: FileMode::new(0o777),
      fmode: FileMode::new(0o666),
    }
  }
}

/// Entry filter: sees the path as stored in the archive (before strip) and
/// the full attribute view; `false` drops the entry.
pub type EntryFilter = Box<dyn FnMut(&RelativePath, &EntryAttributes) -> bool>;

/// An extraction failure on one entry; later entries still proceed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("extracting {path}: {error}")]
pub struct ExtractError {
  pub path: RelativePathBuf,
  pub error: VfsError,
}

struct CurrentFile {
  target: RelativePathBuf,
  mode: FileMode,
  mtime: Option<TimeStamp>,
  atime: Option<TimeStamp>,
  data: Vec<u8>,
}

/// Materializes parsed entries onto a [`Vfs`].
///
/// Implements [`EntrySink`], so it plugs directly into the parser.
/// Per-entry filesystem failures are aggregated in [`Extractor::errors`]
/// and extraction continues; violations (path escapes, unsupported kinds,
/// policy skips) go through the [`ViolationHandler`], which in strict form
/// turns the first one into an abort.
pub struct Extractor<V: Vfs, VH: ViolationHandler = IgnoreViolationHandler> {
  vfs: V,
  violation_handler: VH,
  options: ExtractOptions,
  filter: Option<EntryFilter>,
  /// Directories already created, so each mkdir happens once.
  dirs_made: HashSet<RelativePathBuf>,
  /// Symlinks created by this extraction; targets beneath them are
  /// rejected to keep writes inside the root.
  symlinks_made: HashSet<RelativePathBuf>,
  errors: Vec<ExtractError>,
  current: Option<CurrentFile>,
  fatal: Option<TarError>,
}

impl<V: Vfs> Extractor<V, IgnoreViolationHandler> {
  #[must_use]
  pub fn new(vfs: V) -> Self {
    Self::with_options(vfs, ExtractOptions::default(), IgnoreViolationHandler)
  }
}

impl<V: Vfs, VH: ViolationHandler> Extractor<V, VH> {
  #[must_use]
  pub fn with_options(vfs: V, options: ExtractOptions, violation_handler: VH) -> Self {
    Self {
      vfs,
      violation_handler,
      options,
      filter: None,
      dirs_made: HashSet::new(),
      symlinks_made: HashSet::new(),
      errors: Vec::new(),
      current: None,
      fatal: None,
    }
  }

  pub fn set_filter(&mut self, filter: EntryFilter) {
    self.filter = Some(filter);
  }

  #[must_use]
  pub fn vfs(&self) -> &V {
    &self.vfs
  }

  pub fn vfs_mut(&mut self) -> &mut V {
    &mut self.vfs
  }

  pub fn into_vfs(self) -> V {
    self.vfs
  }

  #[must_use]
  pub fn violation_handler(&self) -> &VH {
    &self.violation_handler
  }

  /// Per-entry filesystem failures collected so far.
  #[must_use]
  pub fn errors(&self) -> &[ExtractError] {
    &self.errors
  }

  /// The violation that aborted extraction, if any (strict mode).
  #[must_use]
  pub fn fatal_error(&self) -> Option<&TarError> {
    self.fatal.as_ref()
  }

  /// Seeds the directory-made memo, opting into cross-instance reuse.
  pub fn seed_dir_cache<I: IntoIterator<Item = RelativePathBuf>>(&mut self, dirs: I) {
    self.dirs_made.extend(dirs);
  }

  /// The directory-made memo, for handing to another extractor.
  pub fn into_dir_cache(self) -> HashSet<RelativePathBuf> {
    self.dirs_made
  }

  fn report<EK: Into<TarErrorKind>>(&mut self, kind: EK) -> Result<(), TarError> {
    Reported(&mut self.violation_handler).report(kind)
  }

  fn record_error(&mut self, path: RelativePathBuf, error: VfsError) {
    log::warn!("extracting {path}: {error}");
    self.errors.push(ExtractError { path, error });
  }

  /// Strip, sanitize and root an archive path. `Ok(None)` means the entry
  /// is dropped (consumed by strip, or rejected).
  fn fix_path(&mut self, raw: &RelativePath) -> Result<Option<RelativePathBuf>, TarError> {
    let parts: Vec<&str> = raw.as_str().split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() <= self.options.strip && self.options.strip > 0 {
      return Ok(None);
    }
    let parts = &parts[self.options.strip.min(parts.len())..];

    let mut normalized = RelativePathBuf::new();
    for part in parts {
      match *part {
        "." => {},
        ".." => {
          if self.options.preserve_paths {
            normalized.push("..");
          } else {
            self.report(TarErrorKind::PathEscape {
              path: raw.to_relative_path_buf(),
            })?;
            return Ok(None);
          }
        },
        name => normalized.push(name),
      }
    }
    if normalized.as_str().is_empty() {
      return Ok(None);
    }

    let target = if self.options.cwd.as_str().is_empty() {
      normalized
    } else {
      self.options.cwd.join(normalized)
    };
    Ok(Some(target))
  }

  /// Rejects targets whose prefix is a symlink, either one this
  /// extraction created or one already on disk.
  fn prefix_traverses_symlink(&self, target: &RelativePath) -> bool {
    let mut prefix = target.parent();
    while let Some(dir) = prefix {
      if dir.as_str().is_empty() {
        break;
      }
      if self.symlinks_made.contains(dir) {
        return true;
      }
      if let Ok(meta) = self.vfs.lstat(dir) {
        if meta.kind == FileKind::SymbolicLink {
          return true;
        }
      }
      prefix = dir.parent();
    }
    false
  }

  fn ensure_dir_all(&mut self, dir: &RelativePath) -> Result<(), VfsError> {
    if dir.as_str().is_empty() {
      return Ok(());
    }
    let dir_buf = dir.to_relative_path_buf();
    if self.dirs_made.contains(&dir_buf) {
      return Ok(());
    }
    if let Some(parent) = dir.parent() {
      self.ensure_dir_all(parent)?;
    }
    let mode = self.options.dmode.apply_umask(self.options.umask);
    match self.vfs.create_dir(dir, mode) {
      Ok(()) => {
        self.dirs_made.insert(dir_buf);
        Ok(())
      },
      Err(error) if error.is_already_exists() => {
        self.dirs_made.insert(dir_buf);
        Ok(())
      },
      Err(error) => Err(error),
    }
  }

  fn ensure_parent(&mut self, target: &RelativePath) -> Result<(), VfsError> {
    match target.parent() {
      Some(parent) => self.ensure_dir_all(parent),
      None => Ok(()),
    }
  }

  fn file_mode(&self, attributes: &EntryAttributes) -> FileMode {
    let mode = if attributes.mode.is_zero() {
      self.options.fmode
    } else {
      attributes.mode
    };
    mode.apply_umask(self.options.umask)
  }

  fn dir_mode(&self, attributes: &EntryAttributes) -> FileMode {
    let mode = if attributes.mode.is_zero() {
      self.options.dmode
    } else {
      attributes.mode
    };
    mode.apply_umask(self.options.umask)
  }

  fn replay_hard_link(
    &mut self,
    attributes: &EntryAttributes,
    target: &RelativePath,
  ) -> Result<(), TarError> {
    // the link target is an archive path too: same strip, same sanitation
    let link_path = RelativePathBuf::from(attributes.link_target.clone());
    let Some(original) = self.fix_path(&link_path)? else {
      self.report(TarErrorKind::PolicySkip {
        path: attributes.path.clone(),
        reason: "hard link target was rejected",
      })?;
      return Ok(());
    };
    match self.vfs.hard_link(&original, target) {
      Ok(()) => {},
      Err(error) if error.is_already_exists() => {
        let _ = self.vfs.unlink(target);
        if let Err(error) = self.vfs.hard_link(&original, target) {
          self.record_error(attributes.path.clone(), error);
        }
      },
      Err(error) => self.record_error(attributes.path.clone(), error),
    }
    Ok(())
  }

  fn replay_symlink(&mut self, attributes: &EntryAttributes, target: &RelativePath) {
    // the raw link target is archive-defined; it is not path-fixed
    match self.vfs.symlink(&attributes.link_target, target) {
      Ok(()) => {
        self.symlinks_made.insert(target.to_relative_path_buf());
      },
      Err(error) if error.is_already_exists() => {
        let _ = self.vfs.unlink(target);
        match self.vfs.symlink(&attributes.link_target, target) {
          Ok(()) => {
            self.symlinks_made.insert(target.to_relative_path_buf());
          },
          Err(error) => self.record_error(attributes.path.clone(), error),
        }
      },
      Err(error) => self.record_error(attributes.path.clone(), error),
    }
  }

  fn make_directory(&mut self, attributes: &EntryAttributes, target: &RelativePath) {
    let mode = self.dir_mode(attributes);
    let created = match self.vfs.create_dir(target, mode) {
      Ok(()) => true,
      Err(error) if error.is_already_exists() => {
        // an existing directory is fine, anything else is a collision
        match self.vfs.lstat(target) {
          Ok(meta) if meta.kind == FileKind::Directory => true,
          _ => {
            self.record_error(attributes.path.clone(), error);
            false
          },
        }
      },
      Err(error) => {
        self.record_error(attributes.path.clone(), error);
        false
      },
    };
    if created {
      self.dirs_made.insert(target.to_relative_path_buf());
      let _ = self.vfs.set_mode(target, mode);
      if let Err(error) = self.vfs.set_times(target, attributes.mtime, attributes.atime) {
        log::debug!("times on {target}: {error}");
      }
    }
  }

  fn begin_internal(&mut self, attributes: &EntryAttributes) -> Result<Disposition, TarError> {
    if let Some(filter) = &mut self.filter {
      if !filter(attributes.path.as_relative_path(), attributes) {
        return Ok(Disposition::Skip);
      }
    }

    let Some(target) = self.fix_path(attributes.path.as_relative_path())? else {
      return Ok(Disposition::Skip);
    };

    if !self.options.preserve_paths && self.prefix_traverses_symlink(&target) {
      self.report(TarErrorKind::SymlinkShadow {
        path: attributes.path.clone(),
      })?;
      return Ok(Disposition::Skip);
    }

    if self.options.newer {
      if let (Ok(meta), Some(entry_mtime)) = (self.vfs.lstat(&target), attributes.mtime) {
        if meta.mtime.is_some_and(|on_disk| on_disk >= entry_mtime) {
          self.report(TarErrorKind::PolicySkip {
            path: attributes.path.clone(),
            reason: "existing file is newer",
          })?;
          return Ok(Disposition::Skip);
        }
      }
    }

    if let Err(error) = self.ensure_parent(&target) {
      self.record_error(attributes.path.clone(), error);
      return Ok(Disposition::Skip);
    }

    if self.options.unlink && !attributes.kind.is_directory_like() {
      // best-effort: a missing target is the common case
      let _ = self.vfs.unlink(&target);
    }

    match attributes.kind {
      EntryKind::File | EntryKind::OldFile | EntryKind::ContiguousFile => {
        self.current = Some(CurrentFile {
          target,
          mode: self.file_mode(attributes),
          mtime: attributes.mtime,
          atime: attributes.atime,
          data: Vec::new(),
        });
        Ok(Disposition::Accept)
      },
      EntryKind::Directory | EntryKind::GnuDumpDir => {
        self.make_directory(attributes, &target);
        // stray body bytes are accepted and dropped
        Ok(Disposition::Accept)
      },
      EntryKind::Link => {
        self.replay_hard_link(attributes, &target)?;
        Ok(Disposition::Accept)
      },
      EntryKind::SymbolicLink => {
        self.replay_symlink(attributes, &target);
        Ok(Disposition::Accept)
      },
      EntryKind::CharacterDevice | EntryKind::BlockDevice | EntryKind::Fifo => {
        self.report(TarErrorKind::UnsupportedEntryKind {
          kind: attributes.kind,
        })?;
        Ok(Disposition::Skip)
      },
      _ => {
        // unknown codes were already reported by the parser; meta kinds
        // never reach a sink
        Ok(Disposition::Skip)
      },
    }
  }
}

impl<V: Vfs, VH: ViolationHandler> EntrySink for Extractor<V, VH> {
  fn entry_begin(&mut self, attributes: &EntryAttributes) -> Disposition {
    if self.fatal.is_some() {
      return Disposition::Abort;
    }
    match self.begin_internal(attributes) {
      Ok(disposition) => disposition,
      Err(fatal) => {
        self.fatal = Some(fatal);
        Disposition::Abort
      },
    }
  }

  fn entry_data(&mut self, data: &[u8]) {
    if let Some(current) = &mut self.current {
      current.data.extend_from_slice(data);
    }
  }

  fn entry_end(&mut self) {
    let Some(current) = self.current.take() else {
      return;
    };
    match self
      .vfs
      .write_file(&current.target, current.mode, &current.data)
    {
      Ok(()) => {
        // best-effort, matching historical extractors
        if let Err(error) = self
          .vfs
          .set_times(&current.target, current.mtime, current.atime)
        {
          log::debug!("times on {}: {error}", current.target);
        }
      },
      Err(error) => self.record_error(current.target.clone(), error),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use alloc::string::ToString as _;

  use crate::{
    fs::MemoryFs,
    parser::Disposition,
    violations::AuditViolationHandler,
  };

  fn file_entry(path: &str, size: u64) -> EntryAttributes {
    EntryAttributes {
      path: RelativePathBuf::from(path.to_string()),
      size,
      mode: FileMode::new(0o644),
      mtime: Some(TimeStamp::from_seconds(1_600_000_000)),
      ..EntryAttributes::default()
    }
  }

  fn deliver(extractor: &mut Extractor<MemoryFs, impl ViolationHandler>, attributes: &EntryAttributes, data: &[u8]) {
    match extractor.entry_begin(attributes) {
      Disposition::Accept => {
        extractor.entry_data(data);
        extractor.entry_end();
      },
      Disposition::Skip => {},
      Disposition::Abort => panic!("unexpected abort"),
    }
  }

  #[test]
  fn test_extracts_file_with_parents() {
    let mut extractor = Extractor::new(MemoryFs::new());
    deliver(&mut extractor, &file_entry("a/b/file.txt", 5), b"hello");

    let fs = extractor.into_vfs();
    assert_eq!(fs.file_data("a/b/file.txt"), Some(b"hello".as_slice()));
    assert_eq!(fs.kind("a"), Some(FileKind::Directory));
    let meta = fs.lstat(RelativePath::new("a/b/file.txt")).unwrap();
    assert_eq!(meta.mode, FileMode::new(0o644));
    assert_eq!(meta.mtime, Some(TimeStamp::from_seconds(1_600_000_000)));
  }

  #[test]
  fn test_rejects_parent_dir_escape() {
    let mut options = ExtractOptions::default();
    options.cwd = RelativePathBuf::from("jail".to_string());
    let mut extractor =
      Extractor::with_options(MemoryFs::new(), options, AuditViolationHandler::new());
    deliver(&mut extractor, &file_entry("../evil", 4), b"evil");

    assert!(extractor
      .violation_handler
      .violations
      .iter()
      .any(|v| matches!(v.kind, TarErrorKind::PathEscape { .. })));
    let fs = extractor.into_vfs();
    assert!(!fs.contains("evil"));
    assert!(!fs.contains("jail/evil"));
    assert!(fs.paths().is_empty());
  }

  #[test]
  fn test_preserve_paths_allows_dot_dot() {
    let mut options = ExtractOptions::default();
    options.cwd = RelativePathBuf::from("jail".to_string());
    options.preserve_paths = true;
    let mut extractor =
      Extractor::with_options(MemoryFs::new(), options, AuditViolationHandler::new());
    extractor.vfs_mut().add_dir("jail");
    deliver(&mut extractor, &file_entry("../escaped", 2), b"ok");
    let fs = extractor.into_vfs();
    // "jail/../escaped" normalizes to "escaped" inside the memory tree
    assert_eq!(fs.file_data("escaped"), Some(b"ok".as_slice()));
  }

  #[test]
  fn test_strip_components() {
    let mut options = ExtractOptions::default();
    options.strip = 1;
    let mut extractor =
      Extractor::with_options(MemoryFs::new(), options, AuditViolationHandler::new());
    deliver(&mut extractor, &file_entry("package/src/lib.rs", 2), b"ok");
    // wholly consumed by strip: dropped
    deliver(&mut extractor, &file_entry("package", 0), b"");

    let fs = extractor.into_vfs();
    assert_eq!(fs.file_data("src/lib.rs"), Some(b"ok".as_slice()));
    assert!(!fs.contains("package"));
  }

  #[test]
  fn test_filter_sees_pre_strip_path() {
    let mut options = ExtractOptions::default();
    options.strip = 1;
    let mut extractor =
      Extractor::with_options(MemoryFs::new(), options, IgnoreViolationHandler);
    extractor.set_filter(Box::new(|path, _| path.as_str().starts_with("keep/")));

    deliver(&mut extractor, &file_entry("keep/a.txt", 1), b"a");
    deliver(&mut extractor, &file_entry("drop/b.txt", 1), b"b");

    let fs = extractor.into_vfs();
    assert_eq!(fs.file_data("a.txt"), Some(b"a".as_slice()));
    assert!(!fs.contains("b.txt"));
  }

  #[test]
  fn test_directory_entry_applies_mode_and_times() {
    let mut extractor = Extractor::new(MemoryFs::new());
    let mut dir = file_entry("tree/sub", 0);
    dir.kind = EntryKind::Directory;
    dir.mode = FileMode::new(0o775);
    deliver(&mut extractor, &dir, b"");

    let fs = extractor.into_vfs();
    let meta = fs.lstat(RelativePath::new("tree/sub")).unwrap();
    assert_eq!(meta.kind, FileKind::Directory);
    assert_eq!(meta.mode, FileMode::new(0o755)); // 0o775 filtered by umask 0o22
    assert_eq!(meta.mtime, Some(TimeStamp::from_seconds(1_600_000_000)));
  }

  #[test]
  fn test_symlink_replay_and_shadow_rejection() {
    let mut extractor =
      Extractor::with_options(MemoryFs::new(), ExtractOptions::default(), AuditViolationHandler::new());
    let mut link = file_entry("dir/link", 0);
    link.kind = EntryKind::SymbolicLink;
    link.link_target = "../outside".to_string();
    deliver(&mut extractor, &link, b"");

    // a later entry that writes through the symlink is rejected
    deliver(&mut extractor, &file_entry("dir/link/inner.txt", 3), b"bad");

    assert!(extractor
      .violation_handler
      .violations
      .iter()
      .any(|v| matches!(v.kind, TarErrorKind::SymlinkShadow { .. })));
    let fs = extractor.into_vfs();
    assert_eq!(fs.symlink_target("dir/link"), Some("../outside"));
    assert!(!fs.contains("dir/link/inner.txt"));
  }

  #[test]
  fn test_hard_link_replay_with_strip() {
    let mut options = ExtractOptions::default();
    options.strip = 1;
    let mut extractor =
      Extractor::with_options(MemoryFs::new(), options, AuditViolationHandler::new());
    deliver(&mut extractor, &file_entry("pkg/data", 6), b"shared");
    let mut link = file_entry("pkg/alias", 0);
    link.kind = EntryKind::Link;
    link.link_target = "pkg/data".to_string();
    deliver(&mut extractor, &link, b"");

    let fs = extractor.into_vfs();
    assert_eq!(fs.file_data("alias"), Some(b"shared".as_slice()));
    let original = fs.lstat(RelativePath::new("data")).unwrap();
    let alias = fs.lstat(RelativePath::new("alias")).unwrap();
    assert_eq!(original.ino, alias.ino);
    assert_eq!(original.nlink, 2);
  }

  #[test]
  fn test_link_collision_unlinks_and_retries() {
    let mut extractor = Extractor::new(MemoryFs::new());
    extractor.vfs_mut().add_file("old", b"old content");
    extractor.vfs_mut().add_file("data", b"new content");

    let mut link = file_entry("old", 0);
    link.kind = EntryKind::Link;
    link.link_target = "data".to_string();
    deliver(&mut extractor, &link, b"");

    let fs = extractor.into_vfs();
    assert_eq!(fs.file_data("old"), Some(b"new content".as_slice()));
    let meta = fs.lstat(RelativePath::new("old")).unwrap();
    assert_eq!(meta.nlink, 2);
  }

  #[test]
  fn test_newer_policy_skips_fresher_files() {
    let mut options = ExtractOptions::default();
    options.newer = true;
    let mut extractor =
      Extractor::with_options(MemoryFs::new(), options, AuditViolationHandler::new());
    extractor.vfs_mut().add_file("f", b"disk");
    extractor
      .vfs_mut()
      .set_times(
        RelativePath::new("f"),
        Some(TimeStamp::from_seconds(2_000_000_000)),
        None,
      )
      .unwrap();

    deliver(&mut extractor, &file_entry("f", 3), b"tar");

    assert!(extractor
      .violation_handler
      .violations
      .iter()
      .any(|v| matches!(v.kind, TarErrorKind::PolicySkip { .. })));
    let fs = extractor.into_vfs();
    assert_eq!(fs.file_data("f"), Some(b"disk".as_slice()));
  }

  #[test]
  fn test_unsupported_kinds_are_reported_and_drained() {
    let mut extractor =
      Extractor::with_options(MemoryFs::new(), ExtractOptions::default(), AuditViolationHandler::new());
    let mut fifo = file_entry("pipe", 0);
    fifo.kind = EntryKind::Fifo;
    assert_eq!(extractor.entry_begin(&fifo), Disposition::Skip);
    assert!(extractor
      .violation_handler
      .violations
      .iter()
      .any(|v| matches!(
        v.kind,
        TarErrorKind::UnsupportedEntryKind {
          kind: EntryKind::Fifo
        }
      )));
  }

  #[test]
  fn test_strict_mode_aborts_on_escape() {
    let mut extractor = Extractor::with_options(
      MemoryFs::new(),
      ExtractOptions::default(),
      crate::violations::StrictViolationHandler,
    );
    let entry = file_entry("../evil", 1);
    assert_eq!(extractor.entry_begin(&entry), Disposition::Abort);
    assert!(extractor.fatal_error().is_some());
  }

  #[test]
  fn test_fmode_applies_when_entry_has_no_mode() {
    let mut extractor = Extractor::new(MemoryFs::new());
    let mut entry = file_entry("plain", 1);
    entry.mode = FileMode::new(0);
    deliver(&mut extractor, &entry, b"x");
    let fs = extractor.into_vfs();
    let meta = fs.lstat(RelativePath::new("plain")).unwrap();
    assert_eq!(meta.mode, FileMode::new(0o644)); // fmode 0o666 & !0o22
  }
}
