//! Byte-order normalization for decoded records.
//!
//! Records are first decoded in host byte order straight from the image.
//! When the file was written in the opposite order, every multi-byte integer
//! field is then byte-reversed, in declaration order, by the record's
//! [`Normalize`] implementation. Byte arrays (names) are never touched.

use crate::types::Endianness;

/// A record with multi-byte integer fields that may need swapping.
///
/// Implementations list every integer field of the record; leaving one out
/// silently corrupts that field on foreign-endian input.
pub trait Normalize {
    /// Byte-reverse every multi-byte integer field in place.
    fn swap_fields(&mut self);
}

/// Normalize `record` to host order.
///
/// Passes the record through unchanged when `swap` is false.
pub fn normalize<T: Normalize>(mut record: T, swap: bool) -> T {
    if swap {
        record.swap_fields();
    }
    record
}

/// Byte order of the machine running the parser.
pub const fn host_endianness() -> Endianness {
    if cfg!(target_endian = "big") {
        Endianness::Big
    } else {
        Endianness::Little
    }
}

/// Byte order of a file, given whether its records need swapping on this host.
pub fn file_endianness(needs_swap: bool) -> Endianness {
    match (host_endianness(), needs_swap) {
        (host, false) => host,
        (Endianness::Little, true) => Endianness::Big,
        (Endianness::Big, true) => Endianness::Little,
    }
}
