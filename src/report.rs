//! Structural findings and the sinks that consume them.
//!
//! The session hands each finding to a [`ReportSink`] as soon as it is
//! decoded. Sinks only observe: nothing they do feeds back into parsing.

use crate::macho::{Layout, LoadCommand, MachHeader, Section, SegmentCommand, VmProt};
use crate::types::{CodeRegion, Endianness};
use serde::Serialize;

/// Summary of the file header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderSummary {
    /// Magic as read in host order.
    pub magic: u32,
    /// Pointer width, 32 or 64.
    pub bits: u8,
    /// Fields were stored in the opposite byte order.
    pub needs_swap: bool,
    /// Byte order of the file.
    pub endianness: Endianness,
    /// Raw `cputype`.
    pub cpu_type: u32,
    /// Raw `cpusubtype`.
    pub cpu_subtype: u32,
    /// Label for the cpu type.
    pub cpu_name: &'static str,
    /// Raw `filetype`.
    pub file_type: u32,
    /// Declared number of load commands.
    pub ncmds: u32,
    /// Declared total size of the load commands.
    pub sizeofcmds: u32,
    /// Size of the header record.
    pub header_size: u32,
}

impl From<&MachHeader> for HeaderSummary {
    fn from(header: &MachHeader) -> Self {
        Self {
            magic: header.magic,
            bits: header.layout().bits(),
            needs_swap: header.needs_swap,
            endianness: header.endianness(),
            cpu_type: header.cpu_type,
            cpu_subtype: header.cpu_subtype,
            cpu_name: header.cpu_name(),
            file_type: header.file_type,
            ncmds: header.ncmds,
            sizeofcmds: header.sizeofcmds,
            header_size: header.header_size,
        }
    }
}

impl HeaderSummary {
    /// Whether the image uses the 64-bit layout.
    pub fn is_64(&self) -> bool {
        self.bits == 64
    }
}

/// Summary of one segment command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentSummary {
    /// Position of the command in the stream.
    pub command_index: u32,
    /// Segment name.
    pub name: String,
    /// Record layout of the command.
    pub layout: Layout,
    /// File offset of the command.
    pub command_offset: u64,
    /// Declared `cmdsize`.
    pub command_size: u32,
    /// Virtual address of the segment.
    pub vm_address: u64,
    /// Virtual size of the segment.
    pub vm_size: u64,
    /// File offset of the segment contents.
    pub file_offset: u64,
    /// Size of the segment contents in the file.
    pub file_size: u64,
    /// Maximum protection.
    pub max_prot: VmProt,
    /// Initial protection.
    pub init_prot: VmProt,
    /// Declared number of sections.
    pub section_count: u32,
}

impl SegmentSummary {
    pub(crate) fn new(command: &LoadCommand, segment: &SegmentCommand) -> Self {
        Self {
            command_index: command.index,
            name: segment.name().into_owned(),
            layout: segment.layout,
            command_offset: command.offset,
            command_size: command.size,
            vm_address: segment.vmaddr,
            vm_size: segment.vmsize,
            file_offset: segment.fileoff,
            file_size: segment.filesize,
            max_prot: segment.maxprot,
            init_prot: segment.initprot,
            section_count: segment.nsects,
        }
    }

    /// Offset one past the command.
    pub fn command_end(&self) -> u64 {
        self.command_offset + u64::from(self.command_size)
    }
}

/// Summary of one section record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSummary {
    /// Name of the owning segment command.
    pub segment: String,
    /// Section name.
    pub name: String,
    /// Position within the segment.
    pub index: u32,
    /// File offset of the section contents.
    pub file_offset: u64,
    /// Size of the section contents.
    pub size: u64,
    /// Virtual address of the section.
    pub address: u64,
    /// The section carries the code-section name.
    pub is_code: bool,
}

impl SectionSummary {
    pub(crate) fn new(segment: &SegmentCommand, section: &Section, is_code: bool) -> Self {
        Self {
            segment: segment.name().into_owned(),
            name: section.name().into_owned(),
            index: section.index,
            file_offset: u64::from(section.offset),
            size: section.size,
            address: section.addr,
            is_code,
        }
    }

    /// File offset one past the section contents.
    pub fn end(&self) -> u64 {
        self.file_offset.saturating_add(self.size)
    }
}

/// A load command that is recorded but not decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSummary {
    /// Position of the command in the stream.
    pub index: u32,
    /// The `cmd` tag.
    pub tag: u32,
    /// Symbolic tag name, if well known.
    pub name: Option<&'static str>,
    /// File offset of the command.
    pub offset: u64,
    /// Declared `cmdsize`.
    pub size: u32,
}

impl From<&LoadCommand> for CommandSummary {
    fn from(command: &LoadCommand) -> Self {
        Self {
            index: command.index,
            tag: command.tag,
            name: command.name(),
            offset: command.offset,
            size: command.size,
        }
    }
}

impl CommandSummary {
    /// Offset one past the command.
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.size)
    }
}

/// A soft inconsistency that did not stop the walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    /// File offset the warning refers to.
    pub offset: u64,
    /// Description of the inconsistency.
    pub message: String,
}

/// One structural finding, in walk order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// The decoded file header.
    Header(HeaderSummary),
    /// A segment command.
    Segment(SegmentSummary),
    /// A section of a segment.
    Section(SectionSummary),
    /// Any other load command.
    Command(CommandSummary),
    /// The code region was found or replaced.
    CodeRegion(CodeRegion),
    /// A soft inconsistency.
    Warning(Warning),
}

/// Consumer of findings.
///
/// Called synchronously from the walk; implementations must not fail or
/// stall it.
pub trait ReportSink {
    /// Take ownership of the next finding.
    fn emit(&mut self, finding: Finding);
}

impl<S: ReportSink + ?Sized> ReportSink for &mut S {
    fn emit(&mut self, finding: Finding) {
        (**self).emit(finding);
    }
}

/// Forward every finding to two sinks.
impl<A: ReportSink, B: ReportSink> ReportSink for (A, B) {
    fn emit(&mut self, finding: Finding) {
        self.0.emit(finding.clone());
        self.1.emit(finding);
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn emit(&mut self, _finding: Finding) {}
}

/// Sink that keeps every finding in order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    findings: Vec<Finding>,
}

impl ReportSink for Report {
    fn emit(&mut self, finding: Finding) {
        self.findings.push(finding);
    }
}

impl Report {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    /// All findings in walk order.
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Number of findings.
    pub fn len(&self) -> usize {
        self.findings.len()
    }

    /// Whether nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    /// The header summary, if the header was decoded.
    pub fn header(&self) -> Option<&HeaderSummary> {
        self.findings.iter().find_map(|f| match f {
            Finding::Header(h) => Some(h),
            _ => None,
        })
    }

    /// Segment summaries in walk order.
    pub fn segments(&self) -> impl Iterator<Item = &SegmentSummary> {
        self.findings.iter().filter_map(|f| match f {
            Finding::Segment(s) => Some(s),
            _ => None,
        })
    }

    /// Section summaries in walk order.
    pub fn sections(&self) -> impl Iterator<Item = &SectionSummary> {
        self.findings.iter().filter_map(|f| match f {
            Finding::Section(s) => Some(s),
            _ => None,
        })
    }

    /// Opaque command summaries in walk order.
    pub fn commands(&self) -> impl Iterator<Item = &CommandSummary> {
        self.findings.iter().filter_map(|f| match f {
            Finding::Command(c) => Some(c),
            _ => None,
        })
    }

    /// Warnings in walk order.
    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.findings.iter().filter_map(|f| match f {
            Finding::Warning(w) => Some(w),
            _ => None,
        })
    }

    /// The most recently reported code region.
    pub fn code_region(&self) -> Option<&CodeRegion> {
        self.findings.iter().rev().find_map(|f| match f {
            Finding::CodeRegion(r) => Some(r),
            _ => None,
        })
    }
}
