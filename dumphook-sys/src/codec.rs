//! Conversion between host paths and the code units the native crash handler
//! works with. Windows deals in UTF-16 code units, everything else in bytes.

use crate::fixed_path::{CapacityError, FixedPath};
use std::path::{Path, PathBuf};

/// Separator placed between the dump directory and the generated id. Windows
/// accepts `/` as well, so this is the same on every platform
const SEPARATOR: u8 = b'/';
const EXTENSION: &[u8; 4] = b".dmp";

/// A single code unit of an encoded path
pub trait CodeUnit: Copy + Default + Eq + std::fmt::Debug + 'static {
    /// Widens an ASCII byte to this unit
    fn from_ascii(b: u8) -> Self;
}

impl CodeUnit for u8 {
    #[inline]
    fn from_ascii(b: u8) -> Self {
        b
    }
}

impl CodeUnit for u16 {
    #[inline]
    fn from_ascii(b: u8) -> Self {
        b as u16
    }
}

pub trait DumpPathCodec {
    type Unit: CodeUnit;

    /// Encodes a path into the units handed to the native handler
    fn encode(path: &Path) -> Vec<Self::Unit>;

    /// Decodes units delivered by the native handler back into a path
    fn decode(units: &[Self::Unit]) -> PathBuf;
}

/// 8-bit units, used everywhere except Windows
pub struct Utf8Codec;

/// 16-bit units, used on Windows
pub struct Utf16Codec;

impl DumpPathCodec for Utf8Codec {
    type Unit = u8;

    fn encode(path: &Path) -> Vec<u8> {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::ffi::OsStrExt;
                path.as_os_str().as_bytes().to_vec()
            } else {
                path.to_string_lossy().as_bytes().to_vec()
            }
        }
    }

    fn decode(units: &[u8]) -> PathBuf {
        cfg_if::cfg_if! {
            if #[cfg(unix)] {
                use std::os::unix::ffi::OsStrExt;
                PathBuf::from(std::ffi::OsStr::from_bytes(units))
            } else {
                PathBuf::from(String::from_utf8_lossy(units).into_owned())
            }
        }
    }
}

impl DumpPathCodec for Utf16Codec {
    type Unit = u16;

    fn encode(path: &Path) -> Vec<u16> {
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                use std::os::windows::ffi::OsStrExt;
                path.as_os_str().encode_wide().collect()
            } else {
                path.to_string_lossy().encode_utf16().collect()
            }
        }
    }

    fn decode(units: &[u16]) -> PathBuf {
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                use std::os::windows::ffi::OsStringExt;
                PathBuf::from(std::ffi::OsString::from_wide(units))
            } else {
                PathBuf::from(String::from_utf16_lossy(units))
            }
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        pub type ActiveCodec = Utf16Codec;
        /// Capacity of every path built at crash time. Kept small as the
        /// buffer lives on the faulting thread's stack
        pub const MAX_PATH_UNITS: usize = 1024;
    } else {
        pub type ActiveCodec = Utf8Codec;
        /// Capacity of every path built at crash time, `PATH_MAX` on Linux
        pub const MAX_PATH_UNITS: usize = 4096;
    }
}

/// The unit type of paths exchanged with the native handler on this platform
pub type PathChar = <ActiveCodec as DumpPathCodec>::Unit;

/// Length of a generated minidump id, a hyphenated UUID
pub const MINIDUMP_ID_LEN: usize = uuid::fmt::Hyphenated::LENGTH;

/// Number of units a directory of `dir_len` units needs to hold a full dump
/// path, including a trailing nul
#[inline]
pub const fn required_units(dir_len: usize) -> usize {
    dir_len + 1 + MINIDUMP_ID_LEN + EXTENSION.len() + 1
}

/// Writes `directory/minidump_id.dmp` into `out`, replacing its contents
pub fn compose<U: CodeUnit, const N: usize>(
    out: &mut FixedPath<U, N>,
    directory: &[U],
    minidump_id: &[U],
) -> Result<(), CapacityError> {
    out.clear();
    out.extend_from_slice(directory)?;
    out.push(U::from_ascii(SEPARATOR))?;
    out.extend_from_slice(minidump_id)?;
    out.extend_ascii(EXTENSION)
}

/// Generates a fresh minidump id in `U` units without allocating
pub fn generate_id<U: CodeUnit>() -> [U; MINIDUMP_ID_LEN] {
    let mut ascii = [0u8; MINIDUMP_ID_LEN];
    uuid::Uuid::new_v4().hyphenated().encode_lower(&mut ascii);

    let mut id = [U::default(); MINIDUMP_ID_LEN];
    for (unit, b) in id.iter_mut().zip(ascii.iter()) {
        *unit = U::from_ascii(*b);
    }
    id
}
