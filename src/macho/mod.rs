//! Mach-O (Mach Object) structure walker.
//!
//! The layout is a magic-tagged header followed by `ncmds` load commands,
//! each prefixed by a `(cmd, cmdsize)` pair. Segment commands carry a
//! contiguous array of section records directly after the segment record.
//!
//! - [`header`] classifies the magic and decodes the file header
//! - [`commands`] walks the load-command stream
//! - [`segment`] decodes segment and section records

pub mod commands;
pub mod header;
pub mod segment;

pub use commands::{LoadCommand, LoadCommandHeader, LoadCommands};
pub use header::{classify_magic, cpu_type_name, decode_header, MachHeader};
pub use segment::{decode_segment, fixed_name, is_code_section, Section, SegmentCommand, Sections, VmProt};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the section holding executable code.
pub const CODE_SECTION_NAME: &str = "__text";

/// Width of segment and section name fields.
pub const NAME_LEN: usize = 16;

/// Mach-O magic numbers, as read in host byte order.
pub mod magic {
    /// 32-bit, same byte order as the host.
    pub const MH_MAGIC: u32 = 0xFEED_FACE;
    /// 32-bit, opposite byte order.
    pub const MH_CIGAM: u32 = 0xCEFA_EDFE;
    /// 64-bit, same byte order as the host.
    pub const MH_MAGIC_64: u32 = 0xFEED_FACF;
    /// 64-bit, opposite byte order.
    pub const MH_CIGAM_64: u32 = 0xCFFA_EDFE;
}

/// On-disk record sizes.
pub mod size {
    pub const MACH_HEADER: usize = 28;
    pub const MACH_HEADER_64: usize = 32;
    pub const LOAD_COMMAND: usize = 8;
    pub const SEGMENT_COMMAND: usize = 56;
    pub const SEGMENT_COMMAND_64: usize = 72;
    pub const SECTION: usize = 68;
    pub const SECTION_64: usize = 80;
}

/// Load command tags.
pub mod load_command {
    /// Commands the dynamic linker must understand carry this bit.
    pub const LC_REQ_DYLD: u32 = 0x8000_0000;

    pub const LC_SEGMENT: u32 = 0x1;
    pub const LC_SYMTAB: u32 = 0x2;
    pub const LC_SYMSEG: u32 = 0x3;
    pub const LC_THREAD: u32 = 0x4;
    pub const LC_UNIXTHREAD: u32 = 0x5;
    pub const LC_DYSYMTAB: u32 = 0xB;
    pub const LC_LOAD_DYLIB: u32 = 0xC;
    pub const LC_ID_DYLIB: u32 = 0xD;
    pub const LC_LOAD_DYLINKER: u32 = 0xE;
    pub const LC_ID_DYLINKER: u32 = 0xF;
    pub const LC_PREBOUND_DYLIB: u32 = 0x10;
    pub const LC_ROUTINES: u32 = 0x11;
    pub const LC_SUB_FRAMEWORK: u32 = 0x12;
    pub const LC_TWOLEVEL_HINTS: u32 = 0x16;
    pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
    pub const LC_SEGMENT_64: u32 = 0x19;
    pub const LC_ROUTINES_64: u32 = 0x1A;
    pub const LC_UUID: u32 = 0x1B;
    pub const LC_RPATH: u32 = 0x1C | LC_REQ_DYLD;
    pub const LC_CODE_SIGNATURE: u32 = 0x1D;
    pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1E;
    pub const LC_REEXPORT_DYLIB: u32 = 0x1F | LC_REQ_DYLD;
    pub const LC_ENCRYPTION_INFO: u32 = 0x21;
    pub const LC_DYLD_INFO: u32 = 0x22;
    pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
    pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
    pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
    pub const LC_FUNCTION_STARTS: u32 = 0x26;
    pub const LC_DYLD_ENVIRONMENT: u32 = 0x27;
    pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
    pub const LC_DATA_IN_CODE: u32 = 0x29;
    pub const LC_SOURCE_VERSION: u32 = 0x2A;
    pub const LC_ENCRYPTION_INFO_64: u32 = 0x2C;
    pub const LC_LINKER_OPTION: u32 = 0x2D;
    pub const LC_VERSION_MIN_TVOS: u32 = 0x2F;
    pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
    pub const LC_BUILD_VERSION: u32 = 0x32;
    pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
    pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;
}

/// Symbolic name of a load command tag, if it is a well-known one.
pub fn command_name(tag: u32) -> Option<&'static str> {
    use load_command::*;

    let name = match tag {
        LC_SEGMENT => "LC_SEGMENT",
        LC_SYMTAB => "LC_SYMTAB",
        LC_SYMSEG => "LC_SYMSEG",
        LC_THREAD => "LC_THREAD",
        LC_UNIXTHREAD => "LC_UNIXTHREAD",
        LC_DYSYMTAB => "LC_DYSYMTAB",
        LC_LOAD_DYLIB => "LC_LOAD_DYLIB",
        LC_ID_DYLIB => "LC_ID_DYLIB",
        LC_LOAD_DYLINKER => "LC_LOAD_DYLINKER",
        LC_ID_DYLINKER => "LC_ID_DYLINKER",
        LC_PREBOUND_DYLIB => "LC_PREBOUND_DYLIB",
        LC_ROUTINES => "LC_ROUTINES",
        LC_SUB_FRAMEWORK => "LC_SUB_FRAMEWORK",
        LC_TWOLEVEL_HINTS => "LC_TWOLEVEL_HINTS",
        LC_LOAD_WEAK_DYLIB => "LC_LOAD_WEAK_DYLIB",
        LC_SEGMENT_64 => "LC_SEGMENT_64",
        LC_ROUTINES_64 => "LC_ROUTINES_64",
        LC_UUID => "LC_UUID",
        LC_RPATH => "LC_RPATH",
        LC_CODE_SIGNATURE => "LC_CODE_SIGNATURE",
        LC_SEGMENT_SPLIT_INFO => "LC_SEGMENT_SPLIT_INFO",
        LC_REEXPORT_DYLIB => "LC_REEXPORT_DYLIB",
        LC_ENCRYPTION_INFO => "LC_ENCRYPTION_INFO",
        LC_DYLD_INFO => "LC_DYLD_INFO",
        LC_DYLD_INFO_ONLY => "LC_DYLD_INFO_ONLY",
        LC_VERSION_MIN_MACOSX => "LC_VERSION_MIN_MACOSX",
        LC_VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
        LC_FUNCTION_STARTS => "LC_FUNCTION_STARTS",
        LC_DYLD_ENVIRONMENT => "LC_DYLD_ENVIRONMENT",
        LC_MAIN => "LC_MAIN",
        LC_DATA_IN_CODE => "LC_DATA_IN_CODE",
        LC_SOURCE_VERSION => "LC_SOURCE_VERSION",
        LC_ENCRYPTION_INFO_64 => "LC_ENCRYPTION_INFO_64",
        LC_LINKER_OPTION => "LC_LINKER_OPTION",
        LC_VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
        LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
        LC_BUILD_VERSION => "LC_BUILD_VERSION",
        LC_DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
        LC_DYLD_CHAINED_FIXUPS => "LC_DYLD_CHAINED_FIXUPS",
        _ => return None,
    };
    Some(name)
}

/// Mach-O CPU type constants.
pub mod cpu_type {
    pub const VAX: u32 = 1;
    pub const MC680X0: u32 = 6;
    pub const X86: u32 = 7;
    pub const X86_64: u32 = X86 | ABI64;
    pub const ARM: u32 = 12;
    pub const ARM64: u32 = ARM | ABI64;
    pub const ARM64_32: u32 = ARM | ARM64_32_FLAG;
    pub const SPARC: u32 = 14;
    pub const POWERPC: u32 = 18;
    pub const POWERPC64: u32 = POWERPC | ABI64;

    /// CPU_ARCH_ABI64 flag
    pub const ABI64: u32 = 0x0100_0000;
    /// CPU_ARCH_ABI64_32 (ILP32) flag
    pub const ARM64_32_FLAG: u32 = 0x0200_0000;
}

/// Record layout selected by a magic or a segment command tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// `mach_header`, `segment_command`, `section`
    Bits32,
    /// `mach_header_64`, `segment_command_64`, `section_64`
    Bits64,
}

impl Layout {
    /// Layout for a 64-bit flag.
    pub fn from_is64(is_64: bool) -> Self {
        if is_64 {
            Layout::Bits64
        } else {
            Layout::Bits32
        }
    }

    /// Pointer width in bits.
    pub fn bits(self) -> u8 {
        match self {
            Layout::Bits32 => 32,
            Layout::Bits64 => 64,
        }
    }

    /// Size of the file header record.
    pub fn header_size(self) -> usize {
        match self {
            Layout::Bits32 => size::MACH_HEADER,
            Layout::Bits64 => size::MACH_HEADER_64,
        }
    }

    /// Size of the segment command record, excluding its sections.
    pub fn segment_size(self) -> usize {
        match self {
            Layout::Bits32 => size::SEGMENT_COMMAND,
            Layout::Bits64 => size::SEGMENT_COMMAND_64,
        }
    }

    /// Size of one section record.
    pub fn section_size(self) -> usize {
        match self {
            Layout::Bits32 => size::SECTION,
            Layout::Bits64 => size::SECTION_64,
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}
