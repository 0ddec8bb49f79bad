//! Mach-O Inspect - Structural Walker for Mach-O Images
//!
//! This library walks the structure of a Mach-O image: it decodes the file
//! header, iterates the load commands, descends into segment commands and
//! their sections, and locates the code region (the `__text` section) so
//! it can be handed to a disassembly engine.
//!
//! # Features
//!
//! - **Both layouts**: 32-bit and 64-bit headers, segments and sections
//! - **Both byte orders**: foreign-endian images are normalized on decode
//! - **Bounded reads**: every read is checked against the image size
//! - **Streaming findings**: results flow to a [`ReportSink`] as they are
//!   decoded, so a partial report survives a mid-walk error
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use macho_inspect::inspect_file;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (inspection, report) = inspect_file("path/to/binary")?;
//!     println!("cpu: {}", inspection.header.cpu_name());
//!     println!("segments: {}", report.segments().count());
//!     if let Some(code) = inspection.code_region {
//!         println!("code at 0x{:x}, {} bytes", code.file_offset, code.size);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Disassembly
//!
//! Instruction decoding is delegated to a [`disasm::Disassembler`]. With the
//! `disasm` feature enabled, a capstone-backed engine is available as
//! `disasm::CapstoneDisassembler`.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod disasm;
pub mod endian;
pub mod error;
pub mod formatter;
pub mod image;
pub mod inspect;
pub mod macho;
pub mod report;
pub mod types;

#[cfg(test)]
mod testutil;

pub use error::{InspectError, Result};
pub use image::BinaryImage;
pub use inspect::inspect;
pub use report::{Finding, NullSink, Report, ReportSink};
pub use types::{CodeRegion, Endianness, InspectOptions, Inspection};

use std::path::Path;

/// Inspect a Mach-O file by path.
///
/// Reads the whole file and walks it with default options, collecting
/// every finding into a [`Report`].
///
/// # Example
///
/// ```rust,no_run
/// use macho_inspect::inspect_file;
///
/// let (inspection, _report) = inspect_file("/bin/ls")?;
/// println!("{} load commands", inspection.commands);
/// # Ok::<(), macho_inspect::InspectError>(())
/// ```
pub fn inspect_file<P: AsRef<Path>>(path: P) -> Result<(Inspection, Report)> {
    let image = BinaryImage::open(path)?;
    let mut report = Report::new();
    let inspection = inspect(&image, &InspectOptions::new(), &mut report)?;
    Ok((inspection, report))
}

/// Inspect an in-memory Mach-O image with default options.
pub fn inspect_bytes(data: &[u8]) -> Result<(Inspection, Report)> {
    inspect_bytes_with_options(data, &InspectOptions::new())
}

/// Inspect an in-memory Mach-O image with custom options.
///
/// # Example
///
/// ```rust
/// use macho_inspect::{inspect_bytes_with_options, InspectError, InspectOptions};
///
/// // An ELF header is not a Mach-O image.
/// let data = [0x7F, b'E', b'L', b'F', 2, 1, 1, 0];
/// let err = inspect_bytes_with_options(&data, &InspectOptions::strict()).unwrap_err();
/// assert!(matches!(err, InspectError::UnrecognizedFormat { .. }));
/// ```
pub fn inspect_bytes_with_options(
    data: &[u8],
    options: &InspectOptions,
) -> Result<(Inspection, Report)> {
    let image = BinaryImage::from_bytes(data);
    let mut report = Report::new();
    let inspection = inspect(&image, options, &mut report)?;
    Ok((inspection, report))
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
