use alloc::{string::String, vec::Vec};

use hashbrown::HashMap;
use relative_path::RelativePathBuf;

use crate::codec::{EntryKind, FileMode, TimeStamp};

/// The flattened per-entry view a sink receives: header fields with the
/// global and per-entry pax overrides already applied (base ← global ←
/// extended).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryAttributes {
  pub path: RelativePathBuf,
  pub kind: EntryKind,
  /// Body size in bytes, after size overrides.
  pub size: u64,
  pub mode: FileMode,
  pub uid: u64,
  pub gid: u64,
  pub mtime: Option<TimeStamp>,
  pub atime: Option<TimeStamp>,
  pub ctime: Option<TimeStamp>,
  pub uname: String,
  pub gname: String,
  pub link_target: String,
  pub dev_major: u32,
  pub dev_minor: u32,
  /// Source filesystem identity carried in pax (`SCHILY.dev`/`ino`/`nlink`).
  pub source_dev: Option<u64>,
  pub source_ino: Option<u64>,
  pub source_nlink: Option<u64>,
  /// Pax keys the codec does not interpret, preserved verbatim.
  pub extended: HashMap<String, String>,
}

impl Default for EntryAttributes {
  fn default() -> Self {
    Self {
      path: RelativePathBuf::new(),
      kind: EntryKind::File,
      size: 0,
      mode: FileMode::default(),
      uid: 0,
      gid: 0,
      mtime: None,
      atime: None,
      ctime: None,
      uname: String::new(),
      gname: String::new(),
      link_target: String::new(),
      dev_major: 0,
      dev_minor: 0,
      source_dev: None,
      source_ino: None,
      source_nlink: None,
      extended: HashMap::new(),
    }
  }
}

/// What a sink wants done with an entry it was just offered.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
  /// Deliver the body through [`EntrySink::entry_data`].
  Accept,
  /// Drop the body; `entry_data`/`entry_end` are not called.
  Skip,
  /// Stop the whole parse with a fatal error.
  Abort,
}

/// The capability contract between the parser and its consumer.
///
/// Entries arrive strictly in archive order: all body bytes of entry N are
/// delivered before entry N+1 begins. Body bytes are never delivered past
/// the declared size, and `entry_end` fires exactly once per accepted
/// entry.
pub trait EntrySink {
  fn entry_begin(&mut self, attributes: &EntryAttributes) -> Disposition;
  fn entry_data(&mut self, data: &[u8]);
  fn entry_end(&mut self);
  /// The stream was finished cleanly and every entry has been delivered.
  fn archive_end(&mut self) {}
}

impl<S: EntrySink + ?Sized> EntrySink for &mut S {
  fn entry_begin(&mut self, attributes: &EntryAttributes) -> Disposition {
    (**self).entry_begin(attributes)
  }

  fn entry_data(&mut self, data: &[u8]) {
    (**self).entry_data(data);
  }

  fn entry_end(&mut self) {
    (**self).entry_end();
  }

  fn archive_end(&mut self) {
    (**self).archive_end();
  }
}

#[derive(Debug, Clone)]
pub struct CollectedEntry {
  pub attributes: EntryAttributes,
  pub data: Vec<u8>,
}

/// The reference sink: accumulates every accepted entry in memory.
///
/// Archives can contain several versions of the same path; with
/// `keep_only_last` only the final version survives, mirroring what
/// extraction would leave on disk.
#[derive(Debug, Default)]
pub struct CollectSink {
  entries: Vec<CollectedEntry>,
  keep_only_last: bool,
  seen_paths: HashMap<RelativePathBuf, usize>,
  ended: bool,
}

impl CollectSink {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn keeping_only_last() -> Self {
    Self {
      keep_only_last: true,
      ..Self::default()
    }
  }

  #[must_use]
  pub fn entries(&self) -> &[CollectedEntry] {
    &self.entries
  }

  #[must_use]
  pub fn into_entries(self) -> Vec<CollectedEntry> {
    self.entries
  }

  /// True once the parser has delivered `archive_end`.
  #[must_use]
  pub fn ended(&self) -> bool {
    self.ended
  }
}

impl EntrySink for CollectSink {
  fn entry_begin(&mut self, attributes: &EntryAttributes) -> Disposition {
    self.entries.push(CollectedEntry {
      attributes: attributes.clone(),
      data: Vec::new(),
    });
    Disposition::Accept
  }

  fn entry_data(&mut self, data: &[u8]) {
    if let Some(entry) = self.entries.last_mut() {
      entry.data.extend_from_slice(data);
    }
  }

  fn entry_end(&mut self) {
    if !self.keep_only_last {
      return;
    }
    let Some(entry) = self.entries.pop() else {
      return;
    };
    let path = entry.attributes.path.clone();
    if let Some(&index) = self.seen_paths.get(&path) {
      self.entries[index] = entry;
    } else {
      self.seen_paths.insert(path, self.entries.len());
      self.entries.push(entry);
    }
  }

  fn archive_end(&mut self) {
    self.ended = true;
  }
}
