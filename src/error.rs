//! Error types for the Mach-O inspector.
//!
//! Every fatal condition in a parse session surfaces as one of these
//! variants. Non-fatal oddities (unknown load commands, unknown cpu types,
//! soft size mismatches) are reported as findings instead.

use thiserror::Error;

/// Primary error type for the inspector.
#[derive(Debug, Error)]
pub enum InspectError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The first four bytes are not one of the four Mach-O magics.
    #[error("Unrecognized format: magic 0x{magic:08X} is not a Mach-O header")]
    UnrecognizedFormat {
        /// First four bytes, read in host order.
        magic: u32,
    },

    /// A fixed-size read would run past the end of the image.
    #[error("Truncated read at offset {offset}: expected {expected} bytes, got {actual}")]
    TruncatedRead {
        /// Offset of the read.
        offset: u64,
        /// Bytes requested.
        expected: usize,
        /// Bytes left in the image from `offset`.
        actual: usize,
    },

    /// A load command declares a size the walker cannot honour.
    #[error("Corrupt load command #{index} at offset 0x{offset:X}: cmdsize {size} ({reason})")]
    CorruptLoadCommand {
        /// Position of the command in the stream.
        index: u32,
        /// File offset of the command.
        offset: u64,
        /// Declared `cmdsize`.
        size: u32,
        /// Why the size was rejected.
        reason: &'static str,
    },

    /// The section array does not fit in the segment's declared size (strict mode only).
    #[error(
        "Section array of segment {segment} at offset 0x{offset:X} needs {needed} bytes, cmdsize is {cmd_size}"
    )]
    SectionOverflow {
        /// Segment name.
        segment: String,
        /// File offset of the segment command.
        offset: u64,
        /// Bytes the segment record and its sections need.
        needed: u64,
        /// Declared `cmdsize`.
        cmd_size: u32,
    },

    /// Disassembly was requested but no code section was found.
    #[error("No code region found in image")]
    NoCodeRegion,

    /// The disassembly engine failed.
    #[error("Disassembly error: {message}")]
    Disassembly {
        /// Engine error text.
        message: String,
    },
}

/// Result type alias for inspector operations.
pub type Result<T> = std::result::Result<T, InspectError>;

impl InspectError {
    /// Whether this error was raised by the structural parse, as opposed to
    /// file access or the disassembly collaborator.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            InspectError::UnrecognizedFormat { .. }
                | InspectError::TruncatedRead { .. }
                | InspectError::CorruptLoadCommand { .. }
                | InspectError::SectionOverflow { .. }
        )
    }
}
