use alloc::{
  format,
  string::{String, ToString as _},
  vec::Vec,
};

use hashbrown::HashMap;
use thiserror::Error;

use crate::{
  codec::{align_to_block_size, EntryKind, FileMode, TarHeader, TimeStamp, BLOCK_SIZE},
  errors::{FieldContext, GeneralParseError},
};

/// https://www.open-std.org/jtc1/sc22/open/n4217.pdf
///
/// # PaxTime:
/// A dot separates fractional seconds, e.g. `123456789.123456789`,
/// represented as decimal.
pub mod pax_keys {
  pub const ATIME: &str = "atime";
  /// The character set used to encode the file. Stored, never interpreted.
  pub const CHARSET: &str = "charset";
  pub const COMMENT: &str = "comment";
  /// Non-standard GNU extension.
  pub const CTIME: &str = "ctime";
  /// Overrides the gid for ids greater than `2 097 151 (octal 7 777 777)`.
  ///
  /// Stored in decimal format.
  pub const GID: &str = "gid";
  /// Overrides the `gname` field of the header.
  pub const GNAME: &str = "gname";
  /// Overrides the link target of the header.
  pub const LINKPATH: &str = "linkpath";
  pub const MTIME: &str = "mtime";
  /// Overrides the `name` and `prefix` fields of the header.
  pub const PATH: &str = "path";
  /// Overrides the size of the header.
  /// Size of the body in bytes, decimal format.
  /// Used when the size exceeds `8 589 934 591 (octal 77 777 777 777)`.
  pub const SIZE: &str = "size";
  /// Overrides the uid for ids greater than `2 097 151 (octal 7 777 777)`.
  ///
  /// Stored in decimal format.
  pub const UID: &str = "uid";
  /// Overrides the `uname` field of the header.
  pub const UNAME: &str = "uname";
  /// Device number of the source file, star extension.
  pub const DEV: &str = "SCHILY.dev";
  /// Inode number of the source file, star extension.
  pub const INO: &str = "SCHILY.ino";
  /// Hard link count of the source file, star extension.
  pub const NLINK: &str = "SCHILY.nlink";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaxSyntaxError {
  #[error("Record length field is not a decimal number")]
  BadLength,
  #[error("Record length {length} does not match the record")]
  LengthOutOfBounds { length: usize },
  #[error("Record is missing the key/value separator")]
  MissingEquals,
  #[error("Record does not end with a newline")]
  MissingNewline,
  #[error("Record is not valid UTF-8")]
  InvalidUtf8,
}

/// A set of pax key/value overrides, either per-entry (`x`) or global (`g`).
///
/// Recognized keys are parsed into typed fields; everything else is
/// preserved verbatim in `unrecognized`. Later duplicate keys win.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct PaxAttributes {
  pub global: bool,
  pub atime: Option<TimeStamp>,
  pub charset: Option<String>,
  pub comment: Option<String>,
  pub ctime: Option<TimeStamp>,
  pub gid: Option<u64>,
  pub gname: Option<String>,
  pub link_target: Option<String>,
  pub mtime: Option<TimeStamp>,
  pub path: Option<String>,
  pub size: Option<u64>,
  pub uid: Option<u64>,
  pub uname: Option<String>,
  pub dev: Option<u64>,
  pub ino: Option<u64>,
  pub nlink: Option<u64>,
  pub unrecognized: HashMap<String, String>,
}

impl PaxAttributes {
  #[must_use]
  pub fn global() -> Self {
    Self {
      global: true,
      ..Self::default()
    }
  }

  #[must_use]
  pub fn is_empty(&self) -> bool {
    self.atime.is_none()
      && self.charset.is_none()
      && self.comment.is_none()
      && self.ctime.is_none()
      && self.gid.is_none()
      && self.gname.is_none()
      && self.link_target.is_none()
      && self.mtime.is_none()
      && self.path.is_none()
      && self.size.is_none()
      && self.uid.is_none()
      && self.uname.is_none()
      && self.dev.is_none()
      && self.ino.is_none()
      && self.nlink.is_none()
      && self.unrecognized.is_empty()
  }

  /// Full-precision overrides for a header that could not represent every
  /// field in fixed widths.
  #[must_use]
  pub fn full_precision(header: &TarHeader) -> Self {
    Self {
      path: Some(header.path.clone()),
      size: Some(header.size),
      uid: Some(header.uid),
      gid: Some(header.gid),
      mtime: header.mtime,
      atime: header.atime,
      ctime: header.ctime,
      link_target: (!header.link_target.is_empty()).then(|| header.link_target.clone()),
      uname: (!header.uname.is_empty()).then(|| header.uname.clone()),
      gname: (!header.gname.is_empty()).then(|| header.gname.clone()),
      ..Self::default()
    }
  }

  /// Applies every field set in `other` over this set.
  pub fn merge_from(&mut self, other: PaxAttributes) {
    macro_rules! take {
      ($field:ident) => {
        if other.$field.is_some() {
          self.$field = other.$field;
        }
      };
    }
    take!(atime);
    take!(charset);
    take!(comment);
    take!(ctime);
    take!(gid);
    take!(gname);
    take!(link_target);
    take!(mtime);
    take!(path);
    take!(size);
    take!(uid);
    take!(uname);
    take!(dev);
    take!(ino);
    take!(nlink);
    for (key, value) in other.unrecognized {
      self.unrecognized.insert(key, value);
    }
  }

  /// Encodes the body: one `"<len> <key>=<value>\n"` record per set field.
  #[must_use]
  pub fn encode_body(&self) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(value) = self.atime {
      encode_record(&mut body, pax_keys::ATIME, &format_time(value));
    }
    if let Some(value) = &self.charset {
      encode_record(&mut body, pax_keys::CHARSET, value);
    }
    if let Some(value) = &self.comment {
      encode_record(&mut body, pax_keys::COMMENT, value);
    }
    if let Some(value) = self.ctime {
      encode_record(&mut body, pax_keys::CTIME, &format_time(value));
    }
    if let Some(value) = self.gid {
      encode_record(&mut body, pax_keys::GID, &value.to_string());
    }
    if let Some(value) = &self.gname {
      encode_record(&mut body, pax_keys::GNAME, value);
    }
    if let Some(value) = &self.link_target {
      encode_record(&mut body, pax_keys::LINKPATH, value);
    }
    if let Some(value) = self.mtime {
      encode_record(&mut body, pax_keys::MTIME, &format_time(value));
    }
    if let Some(value) = &self.path {
      encode_record(&mut body, pax_keys::PATH, value);
    }
    if let Some(value) = self.size {
      encode_record(&mut body, pax_keys::SIZE, &value.to_string());
    }
    if let Some(value) = self.uid {
      encode_record(&mut body, pax_keys::UID, &value.to_string());
    }
    if let Some(value) = &self.uname {
      encode_record(&mut body, pax_keys::UNAME, value);
    }
    if let Some(value) = self.dev {
      encode_record(&mut body, pax_keys::DEV, &value.to_string());
    }
    if let Some(value) = self.ino {
      encode_record(&mut body, pax_keys::INO, &value.to_string());
    }
    if let Some(value) = self.nlink {
      encode_record(&mut body, pax_keys::NLINK, &value.to_string());
    }
    let mut extra: Vec<(&String, &String)> = self.unrecognized.iter().collect();
    extra.sort();
    for (key, value) in extra {
      encode_record(&mut body, key, value);
    }
    body
  }

  /// Encodes the whole meta entry: the wrapping `x`/`g` header block plus
  /// the body padded to the block grid. The wrapping header's path is
  /// `"<dirname>/PaxHeader/<basename>"` of the target entry, clamped to
  /// 100 bytes.
  #[must_use]
  pub fn encode(&self, entry_path: &str) -> Vec<u8> {
    let body = self.encode_body();
    let header = TarHeader {
      path: meta_path(entry_path),
      mode: FileMode::new(0o644),
      size: body.len() as u64,
      mtime: self.mtime,
      kind: if self.global {
        EntryKind::GlobalExtendedHeader
      } else {
        EntryKind::ExtendedHeader
      },
      ..TarHeader::default()
    };

    let mut out = Vec::with_capacity(BLOCK_SIZE + align_to_block_size(body.len()));
    let mut block = [0_u8; BLOCK_SIZE];
    header.encode(&mut block);
    out.extend_from_slice(&block);
    out.extend_from_slice(&body);
    out.resize(BLOCK_SIZE + align_to_block_size(body.len()), 0);
    out
  }

  /// Parses a pax body. Structural damage (a record whose stored length
  /// fails the fixed-point check) is a hard error; value-level damage is
  /// reported per field and the record is kept in `unrecognized` form.
  pub fn parse(
    body: &[u8],
    global: bool,
  ) -> Result<(Self, Vec<(FieldContext, GeneralParseError)>), PaxSyntaxError> {
    let mut attrs = Self {
      global,
      ..Self::default()
    };
    let mut soft_errors = Vec::new();

    let mut rest = body;
    while !rest.is_empty() {
      let space = rest
        .iter()
        .take_while(|&&b| b != b'\n')
        .position(|&b| b == b' ')
        .ok_or(PaxSyntaxError::BadLength)?;
      let length_str =
        core::str::from_utf8(&rest[..space]).map_err(|_| PaxSyntaxError::BadLength)?;
      let length: usize = length_str
        .parse()
        .map_err(|_| PaxSyntaxError::BadLength)?;
      if length <= space + 1 || length > rest.len() {
        return Err(PaxSyntaxError::LengthOutOfBounds { length });
      }
      let record = &rest[..length];
      if record[length - 1] != b'\n' {
        return Err(PaxSyntaxError::MissingNewline);
      }
      let key_value = &record[space + 1..length - 1];
      let equals = key_value
        .iter()
        .position(|&b| b == b'=')
        .ok_or(PaxSyntaxError::MissingEquals)?;
      let key =
        core::str::from_utf8(&key_value[..equals]).map_err(|_| PaxSyntaxError::InvalidUtf8)?;
      let value =
        core::str::from_utf8(&key_value[equals + 1..]).map_err(|_| PaxSyntaxError::InvalidUtf8)?;

      attrs.ingest(key, value, &mut soft_errors);
      rest = &rest[length..];
    }

    Ok((attrs, soft_errors))
  }

  fn ingest(
    &mut self,
    key: &str,
    value: &str,
    soft_errors: &mut Vec<(FieldContext, GeneralParseError)>,
  ) {
    fn number(
      value: &str,
      context: FieldContext,
      target: &mut Option<u64>,
      soft_errors: &mut Vec<(FieldContext, GeneralParseError)>,
    ) {
      match value.parse::<u64>() {
        Ok(parsed) => *target = Some(parsed),
        Err(error) => soft_errors.push((context, error.into())),
      }
    }

    match key {
      pax_keys::ATIME => match parse_time(value) {
        Ok(parsed) => self.atime = Some(parsed),
        Err(error) => soft_errors.push((FieldContext::PaxAtime, error.into())),
      },
      pax_keys::CHARSET => self.charset = Some(value.to_string()),
      pax_keys::COMMENT => self.comment = Some(value.to_string()),
      pax_keys::CTIME => match parse_time(value) {
        Ok(parsed) => self.ctime = Some(parsed),
        Err(error) => soft_errors.push((FieldContext::PaxCtime, error.into())),
      },
      pax_keys::GID => number(value, FieldContext::PaxGid, &mut self.gid, soft_errors),
      pax_keys::GNAME => self.gname = Some(value.to_string()),
      pax_keys::LINKPATH => self.link_target = Some(value.to_string()),
      pax_keys::MTIME => match parse_time(value) {
        Ok(parsed) => self.mtime = Some(parsed),
        Err(error) => soft_errors.push((FieldContext::PaxMtime, error.into())),
      },
      pax_keys::PATH => self.path = Some(value.to_string()),
      pax_keys::SIZE => number(value, FieldContext::PaxSize, &mut self.size, soft_errors),
      pax_keys::UID => number(value, FieldContext::PaxUid, &mut self.uid, soft_errors),
      pax_keys::UNAME => self.uname = Some(value.to_string()),
      pax_keys::DEV => number(value, FieldContext::PaxDev, &mut self.dev, soft_errors),
      pax_keys::INO => number(value, FieldContext::PaxIno, &mut self.ino, soft_errors),
      pax_keys::NLINK => number(value, FieldContext::PaxNlink, &mut self.nlink, soft_errors),
      _ => {
        self
          .unrecognized
          .insert(key.to_string(), value.to_string());
      },
    }
  }
}

/// `"<dirname>/PaxHeader/<basename>"`, clamped to 100 bytes.
fn meta_path(entry_path: &str) -> String {
  let (dirname, basename) = match entry_path.rfind('/') {
    Some(i) => (&entry_path[..i], &entry_path[i + 1..]),
    None => ("", entry_path),
  };
  let joined = if dirname.is_empty() {
    format!("PaxHeader/{basename}")
  } else {
    format!("{dirname}/PaxHeader/{basename}")
  };
  if joined.len() <= 100 {
    return joined;
  }
  let mut end = 100;
  while !joined.is_char_boundary(end) {
    end -= 1;
  }
  joined[..end].to_string()
}

/// Emits one record. The stored length counts its own decimal digits, so
/// it is computed by fixed-point iteration from a 1-digit assumption.
fn encode_record(out: &mut Vec<u8>, key: &str, value: &str) {
  let tail_len = 1 + key.len() + 1 + value.len() + 1; // " key=value\n"
  let mut length = tail_len + 1;
  loop {
    let next = tail_len + decimal_width(length);
    if next == length {
      break;
    }
    length = next;
  }
  out.extend_from_slice(format!("{length} {key}={value}\n").as_bytes());
}

fn decimal_width(mut value: usize) -> usize {
  let mut width = 1;
  while value >= 10 {
    value /= 10;
    width += 1;
  }
  width
}

fn format_time(value: TimeStamp) -> String {
  if value.nanoseconds == 0 {
    return value.seconds_since_epoch.to_string();
  }
  let mut fraction = format!("{:09}", value.nanoseconds);
  while fraction.ends_with('0') {
    fraction.pop();
  }
  format!("{}.{}", value.seconds_since_epoch, fraction)
}

/// Parses `"seconds"` or `"seconds.fraction"` into a timestamp.
fn parse_time(value: &str) -> Result<TimeStamp, core::num::ParseIntError> {
  let (seconds_str, fraction_str) = match value.split_once('.') {
    Some((seconds, fraction)) => (seconds, Some(fraction)),
    None => (value, None),
  };
  let seconds_since_epoch = seconds_str.parse::<u64>()?;
  let nanoseconds = match fraction_str {
    None => 0,
    Some(fraction) => {
      let mut digits: String = fraction.chars().take(9).collect();
      while digits.len() < 9 {
        digits.push('0');
      }
      digits.parse::<u32>()?
    },
  };
  Ok(TimeStamp {
    seconds_since_epoch,
    nanoseconds,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_record_length_fixpoint() {
    let mut body = Vec::new();
    encode_record(&mut body, "path", "some/file");
    assert_eq!(body, b"18 path=some/file\n");
  }

  #[test]
  fn test_record_length_fixpoint_at_digit_boundary() {
    // " k=" + 93 bytes + "\n" is 97 bytes; 2 count digits make 99
    let value = "v".repeat(93);
    let mut body = Vec::new();
    encode_record(&mut body, "k", &value);
    assert!(body.starts_with(b"99 k="));
    assert_eq!(body.len(), 99);

    // one byte more forces the count into 3 digits: 98 + 3 = 101
    let value = "v".repeat(94);
    let mut body = Vec::new();
    encode_record(&mut body, "k", &value);
    assert!(body.starts_with(b"101 k="));
    assert_eq!(body.len(), 101);
  }

  #[test]
  fn test_body_round_trip_over_recognized_keys() {
    let mut attrs = PaxAttributes {
      atime: Some(TimeStamp {
        seconds_since_epoch: 1_459_548_000,
        nanoseconds: 500_000_000,
      }),
      gid: Some(20),
      gname: Some("staff".to_string()),
      link_target: Some("target".to_string()),
      mtime: Some(TimeStamp::from_seconds(1_459_548_000)),
      path: Some("a/really/long/path".to_string()),
      size: Some(9_007_199_254_740_993),
      uid: Some(24561),
      uname: Some("isaacs".to_string()),
      dev: Some(64769),
      ino: Some(1_048_577),
      nlink: Some(2),
      ..PaxAttributes::default()
    };
    attrs
      .unrecognized
      .insert("SCHILY.fflags".to_string(), "nodump".to_string());

    let body = attrs.encode_body();
    let (parsed, soft) = PaxAttributes::parse(&body, false).unwrap();
    assert!(soft.is_empty());
    assert_eq!(parsed, attrs);
  }

  #[test]
  fn test_parse_fractional_seconds() {
    let body = b"30 mtime=1749954382.774290089\n20 atime=1749803808\n";
    let (parsed, soft) = PaxAttributes::parse(body, false).unwrap();
    assert!(soft.is_empty());
    assert_eq!(
      parsed.mtime,
      Some(TimeStamp {
        seconds_since_epoch: 1_749_954_382,
        nanoseconds: 774_290_089,
      })
    );
    assert_eq!(parsed.atime, Some(TimeStamp::from_seconds(1_749_803_808)));
  }

  #[test]
  fn test_parse_short_fraction_scales_to_nanoseconds() {
    let mut body = Vec::new();
    encode_record(&mut body, "mtime", "5.5");
    let (parsed, _) = PaxAttributes::parse(&body, false).unwrap();
    assert_eq!(
      parsed.mtime,
      Some(TimeStamp {
        seconds_since_epoch: 5,
        nanoseconds: 500_000_000,
      })
    );
  }

  #[test]
  fn test_duplicate_keys_later_wins() {
    let mut body = Vec::new();
    encode_record(&mut body, "path", "first");
    encode_record(&mut body, "path", "second");
    let (parsed, _) = PaxAttributes::parse(&body, false).unwrap();
    assert_eq!(parsed.path.as_deref(), Some("second"));
  }

  #[test]
  fn test_parse_rejects_bad_length() {
    let body = b"abc path=foo\n";
    assert_eq!(
      PaxAttributes::parse(body, false),
      Err(PaxSyntaxError::BadLength)
    );
  }

  #[test]
  fn test_parse_rejects_missing_newline() {
    // length 12 covers "12 path=foo " but the last byte is a space
    let body = b"12 path=foo ";
    assert_eq!(
      PaxAttributes::parse(body, false),
      Err(PaxSyntaxError::MissingNewline)
    );
  }

  #[test]
  fn test_parse_rejects_out_of_bounds_length() {
    let body = b"99 path=foo\n";
    assert!(matches!(
      PaxAttributes::parse(body, false),
      Err(PaxSyntaxError::LengthOutOfBounds { length: 99 })
    ));
  }

  #[test]
  fn test_numeric_damage_is_soft() {
    let mut body = Vec::new();
    encode_record(&mut body, "uid", "not-a-number");
    encode_record(&mut body, "gid", "20");
    let (parsed, soft) = PaxAttributes::parse(&body, false).unwrap();
    assert_eq!(parsed.uid, None);
    assert_eq!(parsed.gid, Some(20));
    assert_eq!(soft.len(), 1);
    assert_eq!(soft[0].0, crate::errors::FieldContext::PaxUid);
  }

  #[test]
  fn test_meta_path_synthesis() {
    assert_eq!(meta_path("foo.txt"), "PaxHeader/foo.txt");
    assert_eq!(meta_path("a/b/c.txt"), "a/b/PaxHeader/c.txt");
    let long = format!("{}/{}", "d".repeat(120), "file");
    assert_eq!(meta_path(&long).len(), 100);
  }

  #[test]
  fn test_encode_wraps_meta_entry() {
    let attrs = PaxAttributes {
      path: Some("dir/some-very-long-name".to_string()),
      size: Some(1),
      ..PaxAttributes::default()
    };
    let bytes = attrs.encode("dir/some-very-long-name");
    assert_eq!(bytes.len() % BLOCK_SIZE, 0);
    let block: &[u8; BLOCK_SIZE] = bytes[..BLOCK_SIZE].try_into().unwrap();
    let decoded = TarHeader::decode(block);
    assert!(decoded.cksum_valid);
    assert_eq!(decoded.header.kind, EntryKind::ExtendedHeader);
    assert_eq!(decoded.header.path, "dir/PaxHeader/some-very-long-name");
    let body_len = decoded.header.size as usize;
    let (parsed, _) =
      PaxAttributes::parse(&bytes[BLOCK_SIZE..BLOCK_SIZE + body_len], false).unwrap();
    assert_eq!(parsed.path.as_deref(), Some("dir/some-very-long-name"));
  }
}
