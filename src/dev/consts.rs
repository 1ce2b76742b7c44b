// OSS v4 sample formats and capability bits, from <sys/soundcard.h>.
// The full set is kept even where only the native-endian aliases are
// referenced on a given target.
#![allow(dead_code)]

pub const AFMT_S8: u32 = 0x0000_0040;
pub const AFMT_S16_LE: u32 = 0x0000_0010;
pub const AFMT_S16_BE: u32 = 0x0000_0020;
pub const AFMT_S32_LE: u32 = 0x0000_1000;
pub const AFMT_S32_BE: u32 = 0x0000_2000;
pub const AFMT_S24_LE: u32 = 0x0001_0000;
pub const AFMT_S24_BE: u32 = 0x0002_0000;

#[cfg(target_endian = "little")]
pub const AFMT_S16_NE: u32 = AFMT_S16_LE;
#[cfg(target_endian = "big")]
pub const AFMT_S16_NE: u32 = AFMT_S16_BE;
#[cfg(target_endian = "little")]
pub const AFMT_S24_NE: u32 = AFMT_S24_LE;
#[cfg(target_endian = "big")]
pub const AFMT_S24_NE: u32 = AFMT_S24_BE;
#[cfg(target_endian = "little")]
pub const AFMT_S32_NE: u32 = AFMT_S32_LE;
#[cfg(target_endian = "big")]
pub const AFMT_S32_NE: u32 = AFMT_S32_BE;

pub const PCM_ENABLE_INPUT: i32 = 0x0000_0001;
pub const PCM_ENABLE_OUTPUT: i32 = 0x0000_0002;

pub const PCM_CAP_DUPLEX: i32 = 0x0000_0100;
pub const PCM_CAP_TRIGGER: i32 = 0x0000_1000;
pub const PCM_CAP_MMAP: i32 = 0x0000_2000;

/// Bytes per sample for the formats the loop accepts; S24 rides in a
/// 32-bit container on OSS.
pub fn bytes_per_sample(format: u32) -> Option<usize> {
    match format {
        AFMT_S8 => Some(1),
        AFMT_S16_LE | AFMT_S16_BE => Some(2),
        AFMT_S24_LE | AFMT_S24_BE => Some(4),
        AFMT_S32_LE | AFMT_S32_BE => Some(4),
        _ => None,
    }
}
