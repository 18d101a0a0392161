use thiserror::Error;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::codec::{parse_octal, FieldError};

/// The fields shared by every fieldset, also known as the `v7` layout.
///
/// Offsets 0..257, followed by the magic window at 257 and the
/// fieldset-specific tail.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BlockHeader {
  /// File name, null-terminated
  pub name: [u8; 100],
  /// File mode (octal), stored as ASCII bytes
  pub mode: [u8; 8],
  /// User ID of file owner (octal), stored as ASCII bytes
  pub uid: [u8; 8],
  /// Group ID of file owner (octal), stored as ASCII bytes
  pub gid: [u8; 8],
  /// Body size in bytes (octal), stored as ASCII bytes
  ///
  /// Counts only the body after the header block.
  pub size: [u8; 12],
  /// Modification time (epoch seconds, octal), stored as ASCII bytes
  pub mtime: [u8; 12],
  /// Header checksum (space-padded), stored as ASCII bytes
  pub cksum: [u8; 8],
  /// Entry type code (e.g. 0 = file, 5 = directory)
  pub typeflag: u8,
  /// Target of a link entry, null-terminated
  pub linkname: [u8; 100],
  /// Magic and version. The basic fieldset leaves this all zeros; the
  /// ustar family stores `b"ustar\0"` + `b"00"`. The two subfields are
  /// never used independently, so they share one window.
  pub magic_version: [u8; 8],
  /// [`UstarCommonTail`] when `magic_version` matches, zeros otherwise.
  pub tail: [u8; 247],
}

/// Fields shared by the ustar and xstar fieldsets, at offset 265.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct UstarCommonTail {
  /// User name, null-terminated
  pub uname: [u8; 32],
  /// Group name, null-terminated
  pub gname: [u8; 32],
  /// Major device number (octal), stored as ASCII bytes
  pub dev_major: [u8; 8],
  /// Minor device number (octal), stored as ASCII bytes
  pub dev_minor: [u8; 8],
  /// [`UstarTail`] or [`XstarTail`].
  pub rest: [u8; 167],
}

/// The ustar prefix window at offset 345.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct UstarTail {
  /// Path prefix used when the name exceeds 100 bytes, null-terminated
  pub prefix: [u8; 155],
  pub pad: [u8; 12],
}

/// The xstar (Sun) tail at offset 345: a narrower prefix plus access and
/// change times. The NUL prefix terminator at offset 475 distinguishes it
/// from the 155-byte ustar prefix.
#[derive(FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct XstarTail {
  /// Path prefix, null-terminated
  pub prefix: [u8; 130],
  /// Always NUL in an xstar header
  pub prefix_terminator: [u8; 1],
  /// Access time (epoch seconds, octal), stored as ASCII bytes
  pub atime: [u8; 12],
  /// Change time (epoch seconds, octal), stored as ASCII bytes
  pub ctime: [u8; 12],
  pub pad: [u8; 12],
}

impl BlockHeader {
  /// All zeros marks the basic (v7) fieldset.
  pub const MAGIC_VERSION_BASIC: &'static [u8; 8] = b"\0\0\0\0\0\0\0\0";
  /// Shared by the ustar, xstar and pax formats.
  pub const MAGIC_VERSION_USTAR: &'static [u8; 8] = b"ustar\x0000";

  const CHECKSUM_START: usize = 148;
  const CHECKSUM_END: usize = 156;

  /// The unsigned byte sum with the checksum field treated as ASCII spaces.
  #[must_use]
  pub fn checksum_unsigned(&self) -> u32 {
    self
      .as_bytes()
      .iter()
      .enumerate()
      .map(|(i, &byte)| {
        if (Self::CHECKSUM_START..Self::CHECKSUM_END).contains(&i) {
          0x20_u32 // ASCII space
        } else {
          u32::from(byte)
        }
      })
      .sum()
  }

  /// The signed byte sum. Some historical encoders summed the header
  /// bytes as signed chars; validation accepts either convention.
  #[must_use]
  pub fn checksum_signed(&self) -> i64 {
    self
      .as_bytes()
      .iter()
      .enumerate()
      .map(|(i, &byte)| {
        if (Self::CHECKSUM_START..Self::CHECKSUM_END).contains(&i) {
          0x20_i64
        } else {
          i64::from(byte as i8)
        }
      })
      .sum()
  }

  pub fn stored_checksum(&self) -> Result<u64, FieldError> {
    parse_octal(&self.cksum)
  }

  /// Validates the stored checksum against both summation conventions.
  pub fn verify_checksum(&self) -> Result<u32, ChecksumError> {
    let unsigned = self.checksum_unsigned();
    let signed = self.checksum_signed();
    let stored = self.stored_checksum()?;

    if stored == u64::from(unsigned) || i64::try_from(stored) == Ok(signed) {
      Ok(unsigned)
    } else {
      Err(ChecksumError::Mismatch {
        stored,
        unsigned,
        signed,
      })
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChecksumError {
  #[error("Stored checksum {stored} matches neither the unsigned sum {unsigned} nor the signed sum {signed}")]
  Mismatch {
    stored: u64,
    unsigned: u32,
    signed: i64,
  },
  #[error("Checksum field is not a number: {0}")]
  BadField(#[from] FieldError),
}
