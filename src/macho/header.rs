//! Mach-O file header decoding.

use super::{cpu_type, magic, Layout};
use crate::endian::{self, Normalize};
use crate::error::{InspectError, Result};
use crate::image::BinaryImage;
use crate::types::Endianness;
use byteorder::{ByteOrder, NativeEndian};
use serde::{Deserialize, Serialize};

/// Classify a magic read in host byte order.
///
/// Returns `(is_64, needs_swap)`. Anything other than the four Mach-O
/// magics is [`InspectError::UnrecognizedFormat`].
pub fn classify_magic(magic: u32) -> Result<(bool, bool)> {
    match magic {
        magic::MH_MAGIC => Ok((false, false)),
        magic::MH_CIGAM => Ok((false, true)),
        magic::MH_MAGIC_64 => Ok((true, false)),
        magic::MH_CIGAM_64 => Ok((true, true)),
        _ => Err(InspectError::UnrecognizedFormat { magic }),
    }
}

/// Decoded `mach_header` / `mach_header_64`, normalized to host order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachHeader {
    /// Magic as read in host order (selects layout and byte order).
    pub magic: u32,
    /// 64-bit layout.
    pub is_64: bool,
    /// Multi-byte fields were stored in the opposite byte order.
    pub needs_swap: bool,
    /// Raw `cputype`.
    pub cpu_type: u32,
    /// Raw `cpusubtype`.
    pub cpu_subtype: u32,
    /// Raw `filetype`.
    pub file_type: u32,
    /// Number of load commands following the header.
    pub ncmds: u32,
    /// Declared total size of the load commands.
    pub sizeofcmds: u32,
    /// Header flags.
    pub flags: u32,
    /// Only present in the 64-bit header; zero otherwise.
    pub reserved: u32,
    /// Size of the header record on disk.
    pub header_size: u32,
}

impl Normalize for MachHeader {
    // The magic is the tag that chose the byte order; it is kept as read.
    fn swap_fields(&mut self) {
        self.cpu_type = self.cpu_type.swap_bytes();
        self.cpu_subtype = self.cpu_subtype.swap_bytes();
        self.file_type = self.file_type.swap_bytes();
        self.ncmds = self.ncmds.swap_bytes();
        self.sizeofcmds = self.sizeofcmds.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self.reserved = self.reserved.swap_bytes();
    }
}

impl MachHeader {
    /// Record layout used by this image.
    pub fn layout(&self) -> Layout {
        Layout::from_is64(self.is_64)
    }

    /// Byte order the file was written in.
    pub fn endianness(&self) -> Endianness {
        endian::file_endianness(self.needs_swap)
    }

    /// Human-readable cpu type label.
    pub fn cpu_name(&self) -> &'static str {
        cpu_type_name(self.cpu_type)
    }

    /// Offset of the first load command.
    pub fn commands_offset(&self) -> u64 {
        u64::from(self.header_size)
    }
}

/// Decode the file header at offset 0.
pub fn decode_header(image: &BinaryImage<'_>) -> Result<MachHeader> {
    let magic = NativeEndian::read_u32(&image.read_array::<4>(0)?);
    let (is_64, needs_swap) = classify_magic(magic)?;
    let layout = Layout::from_is64(is_64);
    tracing::debug!(magic = format_args!("0x{magic:08X}"), is_64, needs_swap, "classified magic");

    if !is_64 && needs_swap {
        tracing::debug!("32-bit foreign-endian header, decoding best-effort");
    }

    let raw = image.read_at(0, layout.header_size())?;
    let field = |at: usize| NativeEndian::read_u32(&raw[at..at + 4]);

    let header = MachHeader {
        magic,
        is_64,
        needs_swap,
        cpu_type: field(4),
        cpu_subtype: field(8),
        file_type: field(12),
        ncmds: field(16),
        sizeofcmds: field(20),
        flags: field(24),
        reserved: if is_64 { field(28) } else { 0 },
        // header sizes are 28 or 32
        header_size: layout.header_size() as u32,
    };
    let header = endian::normalize(header, needs_swap);

    tracing::debug!(
        cpu = header.cpu_name(),
        ncmds = header.ncmds,
        sizeofcmds = header.sizeofcmds,
        "decoded header"
    );
    Ok(header)
}

/// Short label for a cpu type; unknown types are labelled `"unknown"`.
pub fn cpu_type_name(cpu: u32) -> &'static str {
    match cpu {
        cpu_type::X86 => "i386",
        cpu_type::X86_64 => "x86_64",
        cpu_type::ARM => "arm",
        cpu_type::ARM64 => "arm64",
        cpu_type::ARM64_32 => "arm64_32",
        cpu_type::POWERPC => "ppc",
        cpu_type::POWERPC64 => "ppc64",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MachOBuilder;

    #[test]
    fn test_classify_all_magics() {
        assert_eq!(classify_magic(magic::MH_MAGIC).unwrap(), (false, false));
        assert_eq!(classify_magic(magic::MH_CIGAM).unwrap(), (false, true));
        assert_eq!(classify_magic(magic::MH_MAGIC_64).unwrap(), (true, false));
        assert_eq!(classify_magic(magic::MH_CIGAM_64).unwrap(), (true, true));
    }

    #[test]
    fn test_classify_unknown_magic() {
        for bad in [0u32, 0x7F45_4C46, 0xCAFE_BABE, 0xFEED_FACD] {
            assert!(matches!(
                classify_magic(bad),
                Err(InspectError::UnrecognizedFormat { magic }) if magic == bad
            ));
        }
    }

    #[test]
    fn test_decode_native_64() {
        let data = MachOBuilder::new(true, false)
            .cpu(cpu_type::ARM64)
            .command(0x2, 24)
            .build();
        let header = decode_header(&BinaryImage::from_bytes(&data)).unwrap();
        assert!(header.is_64);
        assert!(!header.needs_swap);
        assert_eq!(header.cpu_type, cpu_type::ARM64);
        assert_eq!(header.cpu_name(), "arm64");
        assert_eq!(header.ncmds, 1);
        assert_eq!(header.sizeofcmds, 24);
        assert_eq!(header.header_size, 32);
        assert_eq!(header.endianness(), endian::host_endianness());
    }

    #[test]
    fn test_decode_swapped_64() {
        let data = MachOBuilder::new(true, true)
            .cpu(cpu_type::X86_64)
            .command(0x2, 24)
            .command(0x1B, 24)
            .build();
        let header = decode_header(&BinaryImage::from_bytes(&data)).unwrap();
        assert!(header.is_64);
        assert!(header.needs_swap);
        assert_eq!(header.magic, magic::MH_CIGAM_64);
        assert_eq!(header.cpu_type, cpu_type::X86_64);
        assert_eq!(header.ncmds, 2);
        assert_eq!(header.sizeofcmds, 48);
        assert_ne!(header.endianness(), endian::host_endianness());
    }

    #[test]
    fn test_decode_32_bit_variants() {
        for swap in [false, true] {
            let data = MachOBuilder::new(false, swap).cpu(cpu_type::ARM).build();
            let header = decode_header(&BinaryImage::from_bytes(&data)).unwrap();
            assert!(!header.is_64);
            assert_eq!(header.needs_swap, swap);
            assert_eq!(header.cpu_name(), "arm");
            assert_eq!(header.header_size, 28);
            assert_eq!(header.reserved, 0);
            assert_eq!(header.ncmds, 0);
        }
    }

    #[test]
    fn test_truncated_64_bit_header() {
        let mut data = MachOBuilder::new(true, false).build();
        data.truncate(20);
        let err = decode_header(&BinaryImage::from_bytes(&data)).unwrap_err();
        assert!(matches!(
            err,
            InspectError::TruncatedRead {
                offset: 0,
                expected: 32,
                actual: 20
            }
        ));
    }

    #[test]
    fn test_too_short_for_magic() {
        let err = decode_header(&BinaryImage::from_bytes(&[0xCF, 0xFA])).unwrap_err();
        assert!(matches!(err, InspectError::TruncatedRead { expected: 4, .. }));
    }

    #[test]
    fn test_unknown_magic_fails() {
        let data = [0x7F, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0];
        let err = decode_header(&BinaryImage::from_bytes(&data)).unwrap_err();
        assert!(matches!(err, InspectError::UnrecognizedFormat { .. }));
    }

    #[test]
    fn test_unknown_cpu_is_labelled() {
        assert_eq!(cpu_type_name(cpu_type::X86), "i386");
        assert_eq!(cpu_type_name(cpu_type::SPARC), "unknown");
        assert_eq!(cpu_type_name(0xFFFF_FFFF), "unknown");
    }
}
