//! Segment and section record decoding.
//!
//! Both layouts are decoded field by field at fixed offsets into the
//! width-exact on-disk shape, normalized there, and then widened into the
//! layout-independent [`SegmentCommand`] and [`Section`].

use super::{Layout, NAME_LEN};
use crate::endian::{self, Normalize};
use crate::error::{InspectError, Result};
use crate::image::BinaryImage;
use bitflags::bitflags;
use byteorder::{ByteOrder, NativeEndian};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::iter::FusedIterator;

bitflags! {
    /// Virtual memory protection of a segment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct VmProt: u32 {
        /// Readable.
        const READ = 0x1;
        /// Writable.
        const WRITE = 0x2;
        /// Executable.
        const EXECUTE = 0x4;
    }
}

impl VmProt {
    /// `rwx`-style rendering.
    pub fn rwx(self) -> String {
        [
            (Self::READ, 'r'),
            (Self::WRITE, 'w'),
            (Self::EXECUTE, 'x'),
        ]
        .iter()
        .map(|&(flag, c)| if self.contains(flag) { c } else { '-' })
        .collect()
    }
}

/// Bytes of a fixed-width name field up to the first NUL.
///
/// A field that uses all sixteen bytes has no terminator and is returned
/// whole.
pub fn fixed_name(field: &[u8; NAME_LEN]) -> &[u8] {
    match memchr::memchr(0, field) {
        Some(end) => &field[..end],
        None => &field[..],
    }
}

/// Exact comparison of a name field against `expected`, ignoring the zero
/// padding after the name.
pub fn is_code_section(field: &[u8; NAME_LEN], expected: &str) -> bool {
    fixed_name(field) == expected.as_bytes()
}

fn read_name(raw: &[u8], at: usize) -> [u8; NAME_LEN] {
    let mut name = [0u8; NAME_LEN];
    name.copy_from_slice(&raw[at..at + NAME_LEN]);
    name
}

// ---------------------------------------------------------------------------
// On-disk shapes
// ---------------------------------------------------------------------------

struct SegmentCommand32 {
    cmd: u32,
    cmdsize: u32,
    segname: [u8; NAME_LEN],
    vmaddr: u32,
    vmsize: u32,
    fileoff: u32,
    filesize: u32,
    maxprot: u32,
    initprot: u32,
    nsects: u32,
    flags: u32,
}

impl SegmentCommand32 {
    fn parse(raw: &[u8]) -> Self {
        let field = |at: usize| NativeEndian::read_u32(&raw[at..at + 4]);
        Self {
            cmd: field(0),
            cmdsize: field(4),
            segname: read_name(raw, 8),
            vmaddr: field(24),
            vmsize: field(28),
            fileoff: field(32),
            filesize: field(36),
            maxprot: field(40),
            initprot: field(44),
            nsects: field(48),
            flags: field(52),
        }
    }
}

impl Normalize for SegmentCommand32 {
    fn swap_fields(&mut self) {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.vmaddr = self.vmaddr.swap_bytes();
        self.vmsize = self.vmsize.swap_bytes();
        self.fileoff = self.fileoff.swap_bytes();
        self.filesize = self.filesize.swap_bytes();
        self.maxprot = self.maxprot.swap_bytes();
        self.initprot = self.initprot.swap_bytes();
        self.nsects = self.nsects.swap_bytes();
        self.flags = self.flags.swap_bytes();
    }
}

struct SegmentCommand64 {
    cmd: u32,
    cmdsize: u32,
    segname: [u8; NAME_LEN],
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    maxprot: u32,
    initprot: u32,
    nsects: u32,
    flags: u32,
}

impl SegmentCommand64 {
    fn parse(raw: &[u8]) -> Self {
        let field = |at: usize| NativeEndian::read_u32(&raw[at..at + 4]);
        let wide = |at: usize| NativeEndian::read_u64(&raw[at..at + 8]);
        Self {
            cmd: field(0),
            cmdsize: field(4),
            segname: read_name(raw, 8),
            vmaddr: wide(24),
            vmsize: wide(32),
            fileoff: wide(40),
            filesize: wide(48),
            maxprot: field(56),
            initprot: field(60),
            nsects: field(64),
            flags: field(68),
        }
    }
}

impl Normalize for SegmentCommand64 {
    fn swap_fields(&mut self) {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
        self.vmaddr = self.vmaddr.swap_bytes();
        self.vmsize = self.vmsize.swap_bytes();
        self.fileoff = self.fileoff.swap_bytes();
        self.filesize = self.filesize.swap_bytes();
        self.maxprot = self.maxprot.swap_bytes();
        self.initprot = self.initprot.swap_bytes();
        self.nsects = self.nsects.swap_bytes();
        self.flags = self.flags.swap_bytes();
    }
}

struct Section32 {
    sectname: [u8; NAME_LEN],
    segname: [u8; NAME_LEN],
    addr: u32,
    size: u32,
    offset: u32,
    align: u32,
    reloff: u32,
    nreloc: u32,
    flags: u32,
    reserved1: u32,
    reserved2: u32,
}

impl Section32 {
    fn parse(raw: &[u8]) -> Self {
        let field = |at: usize| NativeEndian::read_u32(&raw[at..at + 4]);
        Self {
            sectname: read_name(raw, 0),
            segname: read_name(raw, 16),
            addr: field(32),
            size: field(36),
            offset: field(40),
            align: field(44),
            reloff: field(48),
            nreloc: field(52),
            flags: field(56),
            reserved1: field(60),
            reserved2: field(64),
        }
    }
}

impl Normalize for Section32 {
    fn swap_fields(&mut self) {
        self.addr = self.addr.swap_bytes();
        self.size = self.size.swap_bytes();
        self.offset = self.offset.swap_bytes();
        self.align = self.align.swap_bytes();
        self.reloff = self.reloff.swap_bytes();
        self.nreloc = self.nreloc.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self.reserved1 = self.reserved1.swap_bytes();
        self.reserved2 = self.reserved2.swap_bytes();
    }
}

struct Section64 {
    sectname: [u8; NAME_LEN],
    segname: [u8; NAME_LEN],
    addr: u64,
    size: u64,
    offset: u32,
    align: u32,
    reloff: u32,
    nreloc: u32,
    flags: u32,
    reserved1: u32,
    reserved2: u32,
    reserved3: u32,
}

impl Section64 {
    fn parse(raw: &[u8]) -> Self {
        let field = |at: usize| NativeEndian::read_u32(&raw[at..at + 4]);
        let wide = |at: usize| NativeEndian::read_u64(&raw[at..at + 8]);
        Self {
            sectname: read_name(raw, 0),
            segname: read_name(raw, 16),
            addr: wide(32),
            size: wide(40),
            offset: field(48),
            align: field(52),
            reloff: field(56),
            nreloc: field(60),
            flags: field(64),
            reserved1: field(68),
            reserved2: field(72),
            reserved3: field(76),
        }
    }
}

impl Normalize for Section64 {
    fn swap_fields(&mut self) {
        self.addr = self.addr.swap_bytes();
        self.size = self.size.swap_bytes();
        self.offset = self.offset.swap_bytes();
        self.align = self.align.swap_bytes();
        self.reloff = self.reloff.swap_bytes();
        self.nreloc = self.nreloc.swap_bytes();
        self.flags = self.flags.swap_bytes();
        self.reserved1 = self.reserved1.swap_bytes();
        self.reserved2 = self.reserved2.swap_bytes();
        self.reserved3 = self.reserved3.swap_bytes();
    }
}

// ---------------------------------------------------------------------------
// Decoded records
// ---------------------------------------------------------------------------

/// A decoded `LC_SEGMENT` / `LC_SEGMENT_64` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentCommand {
    /// Record layout the command was decoded from.
    pub layout: Layout,
    /// File offset of the command itself.
    pub command_offset: u64,
    /// `LC_SEGMENT` or `LC_SEGMENT_64`.
    pub cmd: u32,
    /// Declared size including the section array.
    pub cmdsize: u32,
    /// Raw name field.
    pub segname: [u8; NAME_LEN],
    /// Virtual address.
    pub vmaddr: u64,
    /// Virtual size.
    pub vmsize: u64,
    /// File offset of the contents.
    pub fileoff: u64,
    /// Size of the contents in the file.
    pub filesize: u64,
    /// Maximum protection.
    pub maxprot: VmProt,
    /// Initial protection.
    pub initprot: VmProt,
    /// Number of section records following the segment record.
    pub nsects: u32,
    /// Segment flags.
    pub flags: u32,
}

impl SegmentCommand {
    fn from_32(raw: SegmentCommand32, command_offset: u64) -> Self {
        Self {
            layout: Layout::Bits32,
            command_offset,
            cmd: raw.cmd,
            cmdsize: raw.cmdsize,
            segname: raw.segname,
            vmaddr: u64::from(raw.vmaddr),
            vmsize: u64::from(raw.vmsize),
            fileoff: u64::from(raw.fileoff),
            filesize: u64::from(raw.filesize),
            maxprot: VmProt::from_bits_retain(raw.maxprot),
            initprot: VmProt::from_bits_retain(raw.initprot),
            nsects: raw.nsects,
            flags: raw.flags,
        }
    }

    fn from_64(raw: SegmentCommand64, command_offset: u64) -> Self {
        Self {
            layout: Layout::Bits64,
            command_offset,
            cmd: raw.cmd,
            cmdsize: raw.cmdsize,
            segname: raw.segname,
            vmaddr: raw.vmaddr,
            vmsize: raw.vmsize,
            fileoff: raw.fileoff,
            filesize: raw.filesize,
            maxprot: VmProt::from_bits_retain(raw.maxprot),
            initprot: VmProt::from_bits_retain(raw.initprot),
            nsects: raw.nsects,
            flags: raw.flags,
        }
    }

    /// Segment name, lossily decoded.
    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(fixed_name(&self.segname))
    }

    /// Offset of the first section record.
    pub fn sections_offset(&self) -> u64 {
        self.command_offset + self.layout.segment_size() as u64
    }

    /// Bytes the segment record plus its section array occupy.
    pub fn required_size(&self) -> u64 {
        self.layout.segment_size() as u64
            + u64::from(self.nsects) * self.layout.section_size() as u64
    }

    /// Whether the section array fits inside the declared `cmdsize`.
    pub fn section_array_fits(&self) -> bool {
        self.required_size() <= u64::from(self.cmdsize)
    }

    /// Lazily decode the section records that follow this segment.
    pub fn sections<'i, 'a>(
        &self,
        image: &'i BinaryImage<'a>,
        needs_swap: bool,
    ) -> Sections<'i, 'a> {
        Sections {
            image,
            layout: self.layout,
            cursor: self.sections_offset(),
            index: 0,
            count: self.nsects,
            needs_swap,
            failed: false,
        }
    }
}

/// A decoded `section` / `section_64` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Record layout the section was decoded from.
    pub layout: Layout,
    /// Position within the owning segment.
    pub index: u32,
    /// File offset of the section record itself.
    pub record_offset: u64,
    /// Raw section name field.
    pub sectname: [u8; NAME_LEN],
    /// Raw segment name field.
    pub segname: [u8; NAME_LEN],
    /// Virtual address.
    pub addr: u64,
    /// Size of the contents.
    pub size: u64,
    /// File offset of the section contents.
    pub offset: u32,
    /// Alignment as a power of two.
    pub align: u32,
    /// File offset of relocation entries.
    pub reloff: u32,
    /// Number of relocation entries.
    pub nreloc: u32,
    /// Section type and attributes.
    pub flags: u32,
    /// Type-specific value.
    pub reserved1: u32,
    /// Type-specific value.
    pub reserved2: u32,
    /// Only present in `section_64`; zero otherwise.
    pub reserved3: u32,
}

impl Section {
    fn from_32(raw: Section32, index: u32, record_offset: u64) -> Self {
        Self {
            layout: Layout::Bits32,
            index,
            record_offset,
            sectname: raw.sectname,
            segname: raw.segname,
            addr: u64::from(raw.addr),
            size: u64::from(raw.size),
            offset: raw.offset,
            align: raw.align,
            reloff: raw.reloff,
            nreloc: raw.nreloc,
            flags: raw.flags,
            reserved1: raw.reserved1,
            reserved2: raw.reserved2,
            reserved3: 0,
        }
    }

    fn from_64(raw: Section64, index: u32, record_offset: u64) -> Self {
        Self {
            layout: Layout::Bits64,
            index,
            record_offset,
            sectname: raw.sectname,
            segname: raw.segname,
            addr: raw.addr,
            size: raw.size,
            offset: raw.offset,
            align: raw.align,
            reloff: raw.reloff,
            nreloc: raw.nreloc,
            flags: raw.flags,
            reserved1: raw.reserved1,
            reserved2: raw.reserved2,
            reserved3: raw.reserved3,
        }
    }

    /// Section name, lossily decoded.
    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(fixed_name(&self.sectname))
    }

    /// Name of the segment this section claims to belong to.
    pub fn segment_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(fixed_name(&self.segname))
    }

    /// File offset one past the section contents.
    pub fn end(&self) -> u64 {
        u64::from(self.offset).saturating_add(self.size)
    }

    /// Whether the section name is exactly `expected`.
    pub fn is_named(&self, expected: &str) -> bool {
        is_code_section(&self.sectname, expected)
    }
}

/// Decode the segment command at `offset`.
///
/// Returns the segment and a lazy iterator over its `nsects` section
/// records, which start immediately after the segment record.
pub fn decode_segment<'i, 'a>(
    image: &'i BinaryImage<'a>,
    offset: u64,
    layout: Layout,
    needs_swap: bool,
) -> Result<(SegmentCommand, Sections<'i, 'a>)> {
    let raw = image.read_at(offset, layout.segment_size())?;
    let segment = match layout {
        Layout::Bits32 => SegmentCommand::from_32(
            endian::normalize(SegmentCommand32::parse(raw), needs_swap),
            offset,
        ),
        Layout::Bits64 => SegmentCommand::from_64(
            endian::normalize(SegmentCommand64::parse(raw), needs_swap),
            offset,
        ),
    };
    tracing::debug!(
        name = %segment.name(),
        layout = %layout,
        fileoff = segment.fileoff,
        filesize = segment.filesize,
        nsects = segment.nsects,
        "decoded segment"
    );

    let sections = segment.sections(image, needs_swap);
    Ok((segment, sections))
}

/// Lazy iterator over the section records of one segment.
#[derive(Debug)]
pub struct Sections<'i, 'a> {
    image: &'i BinaryImage<'a>,
    layout: Layout,
    cursor: u64,
    index: u32,
    count: u32,
    needs_swap: bool,
    failed: bool,
}

impl Sections<'_, '_> {
    fn read(&mut self) -> Result<Section> {
        let offset = self.cursor;
        let raw = self.image.read_at(offset, self.layout.section_size())?;
        let section = match self.layout {
            Layout::Bits32 => Section::from_32(
                endian::normalize(Section32::parse(raw), self.needs_swap),
                self.index,
                offset,
            ),
            Layout::Bits64 => Section::from_64(
                endian::normalize(Section64::parse(raw), self.needs_swap),
                self.index,
                offset,
            ),
        };
        tracing::trace!(
            name = %section.name(),
            offset = section.offset,
            size = section.size,
            "decoded section"
        );

        self.cursor += self.layout.section_size() as u64;
        self.index += 1;
        Ok(section)
    }

    /// Offset of the next section record.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }
}

impl Iterator for Sections<'_, '_> {
    type Item = Result<Section>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.count {
            return None;
        }
        let section = self.read();
        if section.is_err() {
            self.failed = true;
        }
        Some(section)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        (0, Some((self.count - self.index) as usize))
    }
}

impl FusedIterator for Sections<'_, '_> {}

/// Error for a section array that overruns its command, used in strict mode.
pub(crate) fn overflow_error(segment: &SegmentCommand) -> InspectError {
    InspectError::SectionOverflow {
        segment: segment.name().into_owned(),
        offset: segment.command_offset,
        needed: segment.required_size(),
        cmd_size: segment.cmdsize,
    }
}
