use alloc::{
  format,
  string::{String, ToString as _},
  vec::Vec,
};

use zerocopy::FromBytes as _;

use crate::{
  codec::{
    field_is_blank, parse_date, parse_octal, parse_string, write_date, write_octal, write_string,
    BlockHeader, EntryKind, FileMode, TimeStamp, UstarCommonTail, UstarTail, XstarTail, BLOCK_SIZE,
    ZERO_BLOCK,
  },
  errors::{FieldContext, GeneralParseError},
};

/// The choice of which header fields are in use beyond offset 156.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeaderFieldset {
  /// The historical v7 fields only.
  Basic,
  /// Adds the `ustar` magic, uname/gname, device numbers and a 155-byte
  /// path prefix.
  Ustar,
  /// The Sun variant: a 130-byte prefix and atime/ctime in the tail.
  Xstar,
}

/// The decoded field object behind one 512-byte header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarHeader {
  pub path: String,
  pub mode: FileMode,
  pub uid: u64,
  pub gid: u64,
  pub size: u64,
  pub mtime: Option<TimeStamp>,
  pub atime: Option<TimeStamp>,
  pub ctime: Option<TimeStamp>,
  pub kind: EntryKind,
  pub link_target: String,
  pub uname: String,
  pub gname: String,
  pub dev_major: u32,
  pub dev_minor: u32,
}

impl Default for TarHeader {
  fn default() -> Self {
    Self {
      path: String::new(),
      mode: FileMode::default(),
      uid: 0,
      gid: 0,
      size: 0,
      mtime: None,
      atime: None,
      ctime: None,
      kind: EntryKind::File,
      link_target: String::new(),
      uname: String::new(),
      gname: String::new(),
      dev_major: 0,
      dev_minor: 0,
    }
  }
}

/// The outcome of decoding one block.
#[derive(Debug, Clone)]
pub struct DecodedHeader {
  pub header: TarHeader,
  pub fieldset: HeaderFieldset,
  /// The checksum stored in the block (0 when unparsable).
  pub cksum: u64,
  /// True when the stored checksum matches the signed or unsigned sum.
  pub cksum_valid: bool,
  /// True when every byte of the block is zero.
  pub null_block: bool,
  /// Field-level decode failures; the block is still usable, the affected
  /// fields keep their defaults.
  pub field_errors: Vec<(FieldContext, GeneralParseError)>,
}

/// The outcome of encoding a header into a block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EncodedHeader {
  pub fieldset: HeaderFieldset,
  /// At least one field overflowed or was truncated; the entry needs a
  /// pax override record to be represented faithfully.
  pub need_pax: bool,
  pub cksum: u32,
}

fn note<T>(
  errors: &mut Vec<(FieldContext, GeneralParseError)>,
  context: FieldContext,
  result: Result<T, impl Into<GeneralParseError>>,
) -> Option<T> {
  match result {
    Ok(value) => Some(value),
    Err(error) => {
      errors.push((context, error.into()));
      None
    },
  }
}

impl TarHeader {
  /// Decodes a 512-byte block.
  ///
  /// Decoding is total: unparsable fields are reported in
  /// [`DecodedHeader::field_errors`] and left at their defaults, and
  /// checksum validity is a flag rather than a failure, so that callers
  /// can scan past damaged blocks.
  #[must_use]
  pub fn decode(block: &[u8; BLOCK_SIZE]) -> DecodedHeader {
    let raw = BlockHeader::ref_from_bytes(&block[..]).expect("BUG: BlockHeader is one block");
    let mut errors = Vec::new();

    let null_block = block == &ZERO_BLOCK;
    let cksum = raw.stored_checksum().unwrap_or(0);
    let cksum_valid = raw.verify_checksum().is_ok();

    let mut header = TarHeader {
      path: note(&mut errors, FieldContext::HeaderName, parse_string(&raw.name))
        .unwrap_or_default()
        .to_string(),
      mode: note(&mut errors, FieldContext::HeaderMode, parse_octal(&raw.mode))
        .map_or_else(FileMode::default, |mode| FileMode::new(mode as u16)),
      uid: note(&mut errors, FieldContext::HeaderUid, parse_octal(&raw.uid)).unwrap_or(0),
      gid: note(&mut errors, FieldContext::HeaderGid, parse_octal(&raw.gid)).unwrap_or(0),
      size: note(&mut errors, FieldContext::HeaderSize, parse_octal(&raw.size)).unwrap_or(0),
      mtime: if field_is_blank(&raw.mtime) {
        None
      } else {
        note(&mut errors, FieldContext::HeaderMtime, parse_date(&raw.mtime))
      },
      atime: None,
      ctime: None,
      kind: EntryKind::from(raw.typeflag),
      link_target: note(
        &mut errors,
        FieldContext::HeaderLinkname,
        parse_string(&raw.linkname),
      )
      .unwrap_or_default()
      .to_string(),
      uname: String::new(),
      gname: String::new(),
      dev_major: 0,
      dev_minor: 0,
    };

    let fieldset = if &raw.magic_version == BlockHeader::MAGIC_VERSION_USTAR {
      let common =
        UstarCommonTail::ref_from_bytes(&raw.tail[..]).expect("BUG: UstarCommonTail fits the tail");

      header.uname = note(
        &mut errors,
        FieldContext::HeaderUname,
        parse_string(&common.uname),
      )
      .unwrap_or_default()
      .to_string();
      header.gname = note(
        &mut errors,
        FieldContext::HeaderGname,
        parse_string(&common.gname),
      )
      .unwrap_or_default()
      .to_string();
      header.dev_major = note(
        &mut errors,
        FieldContext::HeaderDevMajor,
        parse_octal(&common.dev_major),
      )
      .unwrap_or(0) as u32;
      header.dev_minor = note(
        &mut errors,
        FieldContext::HeaderDevMinor,
        parse_octal(&common.dev_minor),
      )
      .unwrap_or(0) as u32;

      let xstar = XstarTail::ref_from_bytes(&common.rest[..]).expect("BUG: XstarTail fits");
      let is_xstar = xstar.prefix_terminator[0] == 0
        && (!field_is_blank(&xstar.atime) || !field_is_blank(&xstar.ctime));

      let prefix = if is_xstar {
        if !field_is_blank(&xstar.atime) {
          header.atime = note(
            &mut errors,
            FieldContext::HeaderAtime,
            parse_date(&xstar.atime),
          );
        }
        if !field_is_blank(&xstar.ctime) {
          header.ctime = note(
            &mut errors,
            FieldContext::HeaderCtime,
            parse_date(&xstar.ctime),
          );
        }
        note(
          &mut errors,
          FieldContext::HeaderPrefix,
          parse_string(&xstar.prefix),
        )
      } else {
        let ustar = UstarTail::ref_from_bytes(&common.rest[..]).expect("BUG: UstarTail fits");
        note(
          &mut errors,
          FieldContext::HeaderPrefix,
          parse_string(&ustar.prefix),
        )
      };

      if let Some(prefix) = prefix {
        if !prefix.is_empty() {
          header.path = format!("{}/{}", prefix, header.path);
        }
      }

      if is_xstar {
        HeaderFieldset::Xstar
      } else {
        HeaderFieldset::Ustar
      }
    } else {
      HeaderFieldset::Basic
    };

    DecodedHeader {
      header,
      fieldset,
      cksum,
      cksum_valid,
      null_block,
      field_errors: errors,
    }
  }

  /// True when any field beyond the basic set is in use.
  fn uses_ustar_fields(&self) -> bool {
    !self.uname.is_empty()
      || !self.gname.is_empty()
      || self.dev_major != 0
      || self.dev_minor != 0
      || self.path.len() > 100
  }

  /// The narrowest fieldset that can carry every set field.
  #[must_use]
  pub fn fieldset(&self) -> HeaderFieldset {
    if self.atime.is_some() || self.ctime.is_some() {
      HeaderFieldset::Xstar
    } else if self.uses_ustar_fields() {
      HeaderFieldset::Ustar
    } else {
      HeaderFieldset::Basic
    }
  }

  /// Encodes the header into `block`, selecting the narrowest fieldset.
  pub fn encode(&self, block: &mut [u8; BLOCK_SIZE]) -> EncodedHeader {
    block.fill(0);
    let fieldset = self.fieldset();
    let mut need_pax = false;

    let prefix_capacity = match fieldset {
      HeaderFieldset::Basic => 0,
      HeaderFieldset::Ustar => 155,
      HeaderFieldset::Xstar => 130,
    };
    let (name, prefix, split_failed) = split_path(&self.path, prefix_capacity);
    need_pax |= split_failed;

    let raw = BlockHeader::mut_from_bytes(&mut block[..]).expect("BUG: BlockHeader is one block");
    need_pax |= write_string(&mut raw.name, name);
    write_octal(&mut raw.mode, u64::from(self.mode.bits()));
    need_pax |= write_octal(&mut raw.uid, self.uid);
    need_pax |= write_octal(&mut raw.gid, self.gid);
    need_pax |= write_octal(&mut raw.size, self.size);
    if let Some(mtime) = self.mtime {
      need_pax |= write_date(&mut raw.mtime, mtime);
    }
    raw.typeflag = self.kind.into();
    need_pax |= write_string(&mut raw.linkname, &self.link_target);

    if fieldset != HeaderFieldset::Basic {
      raw.magic_version = *BlockHeader::MAGIC_VERSION_USTAR;
      let common =
        UstarCommonTail::mut_from_bytes(&mut raw.tail[..]).expect("BUG: UstarCommonTail fits");
      need_pax |= write_string(&mut common.uname, &self.uname);
      need_pax |= write_string(&mut common.gname, &self.gname);
      need_pax |= write_octal(&mut common.dev_major, u64::from(self.dev_major));
      need_pax |= write_octal(&mut common.dev_minor, u64::from(self.dev_minor));

      match fieldset {
        HeaderFieldset::Ustar => {
          let tail = UstarTail::mut_from_bytes(&mut common.rest[..]).expect("BUG: UstarTail fits");
          write_string(&mut tail.prefix, prefix);
        },
        HeaderFieldset::Xstar => {
          let tail = XstarTail::mut_from_bytes(&mut common.rest[..]).expect("BUG: XstarTail fits");
          write_string(&mut tail.prefix, prefix);
          if let Some(atime) = self.atime {
            need_pax |= write_date(&mut tail.atime, atime);
          }
          if let Some(ctime) = self.ctime {
            need_pax |= write_date(&mut tail.ctime, ctime);
          }
        },
        HeaderFieldset::Basic => unreachable!(),
      }
    }

    let cksum = raw.checksum_unsigned();
    write_octal(&mut raw.cksum, u64::from(cksum));

    EncodedHeader {
      fieldset,
      need_pax,
      cksum,
    }
  }
}

/// Splits an oversize path into a prefix part and a name part at a `/`
/// boundary. Returns true in the last position when no split fits and the
/// name will be truncated.
fn split_path(path: &str, prefix_capacity: usize) -> (&str, &str, bool) {
  if path.len() <= 100 {
    return (path, "", false);
  }
  let bytes = path.as_bytes();
  for (i, &byte) in bytes.iter().enumerate().rev() {
    if byte != b'/' {
      continue;
    }
    let name_len = path.len() - i - 1;
    if name_len > 100 {
      // splitting further left only makes the name longer
      break;
    }
    if name_len == 0 || i == 0 {
      continue;
    }
    if i <= prefix_capacity {
      return (&path[i + 1..], &path[..i], false);
    }
  }
  (path, "", true)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn encode_decode(header: &TarHeader) -> (DecodedHeader, EncodedHeader) {
    let mut block = [0_u8; BLOCK_SIZE];
    let encoded = header.encode(&mut block);
    (TarHeader::decode(&block), encoded)
  }

  #[test]
  fn test_basic_round_trip() {
    let header = TarHeader {
      path: "hello.txt".to_string(),
      mode: FileMode::new(0o644),
      uid: 1000,
      gid: 1000,
      size: 42,
      mtime: Some(TimeStamp::from_seconds(1_700_000_000)),
      ..TarHeader::default()
    };
    let (decoded, encoded) = encode_decode(&header);
    assert_eq!(encoded.fieldset, HeaderFieldset::Basic);
    assert!(!encoded.need_pax);
    assert!(decoded.cksum_valid);
    assert!(decoded.field_errors.is_empty());
    assert_eq!(decoded.fieldset, HeaderFieldset::Basic);
    assert_eq!(decoded.header, header);
  }

  #[test]
  fn test_ustar_round_trip_with_names() {
    let header = TarHeader {
      path: "dir/file".to_string(),
      uname: "root".to_string(),
      gname: "wheel".to_string(),
      mtime: Some(TimeStamp::from_seconds(0)),
      ..TarHeader::default()
    };
    let (decoded, encoded) = encode_decode(&header);
    assert_eq!(encoded.fieldset, HeaderFieldset::Ustar);
    assert!(!encoded.need_pax);
    assert_eq!(decoded.fieldset, HeaderFieldset::Ustar);
    assert_eq!(decoded.header, header);
  }

  #[test]
  fn test_xstar_round_trip_scenario() {
    // xstar reference vector: known checksum 6745
    let stamp = TimeStamp::from_seconds(1_459_548_000); // 2016-04-01T22:00:00Z
    let header = TarHeader {
      path: "foo.txt".to_string(),
      mode: FileMode::new(0o755),
      uid: 24561,
      gid: 20,
      size: 100,
      mtime: Some(stamp),
      atime: Some(stamp),
      ctime: Some(stamp),
      kind: EntryKind::File,
      uname: "isaacs".to_string(),
      gname: "staff".to_string(),
      ..TarHeader::default()
    };
    let (decoded, encoded) = encode_decode(&header);
    assert_eq!(encoded.fieldset, HeaderFieldset::Xstar);
    assert_eq!(encoded.cksum, 6745);
    assert!(!encoded.need_pax);
    assert!(decoded.cksum_valid);
    assert_eq!(decoded.cksum, 6745);
    assert_eq!(decoded.fieldset, HeaderFieldset::Xstar);
    assert_eq!(decoded.header, header);
  }

  #[test]
  fn test_long_path_splits_into_prefix() {
    let dir = "d".repeat(60);
    let name = "n".repeat(80);
    let header = TarHeader {
      path: format!("{dir}/{name}"),
      mtime: Some(TimeStamp::from_seconds(1)),
      ..TarHeader::default()
    };
    let (decoded, encoded) = encode_decode(&header);
    assert_eq!(encoded.fieldset, HeaderFieldset::Ustar);
    assert!(!encoded.need_pax);
    assert_eq!(decoded.header.path, header.path);
  }

  #[test]
  fn test_unsplittable_path_needs_pax() {
    let header = TarHeader {
      path: "x".repeat(180),
      ..TarHeader::default()
    };
    let mut block = [0_u8; BLOCK_SIZE];
    let encoded = header.encode(&mut block);
    assert!(encoded.need_pax);
  }

  #[test]
  fn test_size_overflow_switches_to_base256_and_needs_pax() {
    let header = TarHeader {
      size: 1 << 40, // > 8^11 - 1
      ..TarHeader::default()
    };
    let (decoded, encoded) = encode_decode(&header);
    assert!(encoded.need_pax);
    assert_eq!(decoded.header.size, 1 << 40);
    assert!(decoded.cksum_valid);
  }

  #[test]
  fn test_subsecond_mtime_needs_pax() {
    let header = TarHeader {
      mtime: Some(TimeStamp {
        seconds_since_epoch: 5,
        nanoseconds: 123,
      }),
      ..TarHeader::default()
    };
    let mut block = [0_u8; BLOCK_SIZE];
    assert!(header.encode(&mut block).need_pax);
  }

  #[test]
  fn test_null_block_detection() {
    let decoded = TarHeader::decode(&ZERO_BLOCK);
    assert!(decoded.null_block);
    assert!(!decoded.cksum_valid);
  }

  #[test]
  fn test_decode_tolerates_garbage_fields() {
    let mut block = [0_u8; BLOCK_SIZE];
    let header = TarHeader {
      path: "ok".to_string(),
      ..TarHeader::default()
    };
    header.encode(&mut block);
    block[100..108].copy_from_slice(b"notoctal");
    let decoded = TarHeader::decode(&block);
    // the mode is damaged but the block still decodes
    assert!(!decoded.cksum_valid);
    assert_eq!(decoded.header.path, "ok");
  }

  #[test]
  fn test_split_path_boundaries() {
    let path = format!("{}/{}", "p".repeat(50), "q".repeat(60));
    let (name, prefix, failed) = split_path(&path, 155);
    assert!(!failed);
    assert_eq!(prefix, "p".repeat(50));
    assert_eq!(name, "q".repeat(60));

    let (_, _, failed) = split_path(&"z".repeat(300), 155);
    assert!(failed);
  }
}
