//! Core types for the inspector.
//!
//! Value types shared between the decoders, the session driver and the
//! report sinks, plus the options that steer a parse.

use crate::macho::{MachHeader, CODE_SECTION_NAME};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Little-endian byte order.
    #[default]
    Little,
    /// Big-endian byte order.
    Big,
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => write!(f, "little"),
            Endianness::Big => write!(f, "big"),
        }
    }
}

/// File range of the code section, handed to the disassembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRegion {
    /// File offset of the section contents.
    pub file_offset: u64,
    /// Size of the section contents in bytes.
    pub size: u64,
    /// Virtual address the section is mapped at.
    pub address: u64,
}

impl CodeRegion {
    /// File offset one past the region.
    pub fn end(&self) -> u64 {
        self.file_offset.saturating_add(self.size)
    }
}

/// Options for a parse session.
#[derive(Debug, Clone)]
pub struct InspectOptions {
    /// Section name that marks the code region.
    pub code_section: String,
    /// Treat a section array that overruns its command as fatal.
    pub strict: bool,
    /// Descend into the sections of 32-bit segments.
    pub sections_32bit: bool,
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl InspectOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            code_section: CODE_SECTION_NAME.to_string(),
            strict: false,
            sections_32bit: false,
        }
    }

    /// Create options that reject inconsistent segment sizes.
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::new()
        }
    }

    /// Create options that inspect sections of both layouts.
    pub fn full() -> Self {
        Self {
            sections_32bit: true,
            ..Self::new()
        }
    }
}

/// Outcome of a successful parse session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspection {
    /// The decoded file header.
    pub header: MachHeader,
    /// Range of the last section named like the code section, if any.
    pub code_region: Option<CodeRegion>,
    /// Number of load commands walked.
    pub commands: u32,
    /// Offset just past the last load command.
    pub end_offset: u64,
}
