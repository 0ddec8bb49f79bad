//! Output formatters for findings.
//!
//! Formatters render findings either one at a time (for streaming through
//! a [`TextSink`]) or as a whole [`Report`] once the walk has finished.

use crate::disasm::Instruction;
use crate::macho::Layout;
use crate::report::{Finding, Report, ReportSink};
use crate::types::Inspection;
use std::io::{self, Write};
use std::path::Path;

/// Trait for rendering findings.
pub trait ReportFormatter {
    /// Render one finding, or nothing if this formatter skips it.
    fn format_finding(&self, finding: &Finding) -> Option<String>;

    /// Text written after the last finding.
    fn format_end(&self) -> Option<String> {
        None
    }

    /// Render a complete report.
    ///
    /// Default implementation concatenates the per-finding output.
    fn format_report(&self, report: &Report, _path: &Path) -> String {
        let mut parts: Vec<String> = report
            .findings()
            .iter()
            .filter_map(|f| self.format_finding(f))
            .collect();
        if let Some(end) = self.format_end() {
            parts.push(end);
        }
        parts.join("")
    }
}

/// Human-readable, line-oriented dump.
#[derive(Debug, Clone, Default)]
pub struct HumanFormatter {
    /// Show addresses, protections and header fields
    pub verbose: bool,
    /// Only show the code region and warnings
    pub quiet: bool,
}

impl HumanFormatter {
    /// Create a new human formatter with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a verbose formatter.
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            quiet: false,
        }
    }

    /// Create a quiet formatter.
    pub fn quiet() -> Self {
        Self {
            verbose: false,
            quiet: true,
        }
    }
}

impl ReportFormatter for HumanFormatter {
    fn format_finding(&self, finding: &Finding) -> Option<String> {
        match finding {
            Finding::CodeRegion(region) => Some(format!(
                ">> code region: 0x{:x}~0x{:x} ({} bytes, vmaddr 0x{:x})\n",
                region.file_offset,
                region.end(),
                region.size,
                region.address
            )),
            Finding::Warning(warning) => Some(format!(
                ">> [warn] 0x{:x}: {}\n",
                warning.offset, warning.message
            )),
            _ if self.quiet => None,
            Finding::Header(h) => {
                let mut s = String::from("===== begin of dump mach-o file =====\n");
                s.push_str(if h.is_64() { ">> 64bit\n" } else { ">> not 64bit\n" });
                s.push_str(if h.needs_swap {
                    ">> needs to swap bytes\n"
                } else {
                    ">> no needs to swap bytes\n"
                });
                s.push_str(&format!(
                    ">> header size is {}({}~{})\n",
                    h.header_size, 0, h.header_size
                ));
                s.push_str(&format!(">> cpu type: {}\n", h.cpu_name));
                if self.verbose {
                    s.push_str(&format!(
                        ">> magic 0x{:08x}, {} endian, cputype 0x{:x}, subtype 0x{:x}, filetype {}\n",
                        h.magic, h.endianness, h.cpu_type, h.cpu_subtype, h.file_type
                    ));
                    s.push_str(&format!(
                        ">> {} load commands, {} bytes\n",
                        h.ncmds, h.sizeofcmds
                    ));
                }
                Some(s)
            }
            Finding::Segment(seg) => {
                let mut s = match seg.layout {
                    Layout::Bits64 => format!(
                        ">> [Segment Load Command] {}(0x{:x}~0x{:x}) {}\n",
                        seg.command_size,
                        seg.command_offset,
                        seg.command_end(),
                        seg.name
                    ),
                    Layout::Bits32 => format!("segment: {}\n", seg.name),
                };
                if self.verbose {
                    s.push_str(&format!(
                        ">>    vm 0x{:x}+0x{:x} file 0x{:x}+0x{:x} {}/{} {} sections\n",
                        seg.vm_address,
                        seg.vm_size,
                        seg.file_offset,
                        seg.file_size,
                        seg.init_prot.rwx(),
                        seg.max_prot.rwx(),
                        seg.section_count
                    ));
                }
                Some(s)
            }
            Finding::Section(sect) => Some(format!(
                ">>    [Section {}] {}(0x{:x}~0x{:x})\n",
                sect.name,
                sect.size,
                sect.file_offset,
                sect.end()
            )),
            Finding::Command(cmd) => {
                let name = match cmd.name {
                    Some(name) => format!(" {name}"),
                    None if self.verbose => format!(" 0x{:x}", cmd.tag),
                    None => String::new(),
                };
                Some(format!(
                    ">> [Other Load Command] {}(0x{:x}~0x{:x}){}\n",
                    cmd.size,
                    cmd.offset,
                    cmd.end(),
                    name
                ))
            }
        }
    }

    fn format_end(&self) -> Option<String> {
        if self.quiet {
            None
        } else {
            Some(String::from("===== end of dump mach-o file =====\n"))
        }
    }
}

/// JSON output formatter.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    /// Pretty-print JSON
    pub pretty: bool,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl JsonFormatter {
    /// Create a new JSON formatter with pretty printing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact JSON formatter.
    pub fn compact() -> Self {
        Self { pretty: false }
    }

    fn encode<T: serde::Serialize>(&self, value: &T) -> String {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        encoded.unwrap_or_else(|_| "{}".to_string())
    }
}

impl ReportFormatter for JsonFormatter {
    /// One JSON object per line.
    fn format_finding(&self, finding: &Finding) -> Option<String> {
        let line = serde_json::to_string(finding).unwrap_or_else(|_| "{}".to_string());
        Some(line + "\n")
    }

    fn format_report(&self, report: &Report, path: &Path) -> String {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            file: String,
            header: Option<&'a crate::report::HeaderSummary>,
            segments: Vec<&'a crate::report::SegmentSummary>,
            sections: Vec<&'a crate::report::SectionSummary>,
            commands: Vec<&'a crate::report::CommandSummary>,
            warnings: Vec<&'a crate::report::Warning>,
            code_region: Option<&'a crate::types::CodeRegion>,
        }

        let output = JsonOutput {
            file: path.display().to_string(),
            header: report.header(),
            segments: report.segments().collect(),
            sections: report.sections().collect(),
            commands: report.commands().collect(),
            warnings: report.warnings().collect(),
            code_region: report.code_region(),
        };
        self.encode(&output) + "\n"
    }
}

/// Compact single-line output formatter.
#[derive(Debug, Clone, Default)]
pub struct ShortFormatter;

impl ShortFormatter {
    /// Create a new short formatter.
    pub fn new() -> Self {
        Self
    }
}

impl ReportFormatter for ShortFormatter {
    fn format_finding(&self, _finding: &Finding) -> Option<String> {
        None
    }

    fn format_report(&self, report: &Report, path: &Path) -> String {
        let (cpu, bits, endian) = match report.header() {
            Some(h) => (h.cpu_name, h.bits, h.endianness.to_string()),
            None => ("unknown", 0, String::from("-")),
        };
        let code = match report.code_region() {
            Some(r) => format!("0x{:x}+0x{:x}", r.file_offset, r.size),
            None => String::from("-"),
        };

        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            path.display(),
            cpu,
            bits,
            endian,
            report.segments().count(),
            report.sections().count(),
            code
        )
    }
}

/// Render decoded instructions, one per line.
pub fn format_instructions(instructions: &[Instruction]) -> String {
    let mut s = String::from("dasm results:\n");
    for insn in instructions {
        s.push_str(&insn.to_string());
        s.push('\n');
    }
    s
}

/// Render the session outcome as a one-line summary.
pub fn format_summary(inspection: &Inspection) -> String {
    format!(
        "{} commands, load commands end at 0x{:x}{}\n",
        inspection.commands,
        inspection.end_offset,
        if inspection.code_region.is_some() {
            ""
        } else {
            ", no code region"
        }
    )
}

/// Sink that writes each finding as soon as it arrives.
///
/// Write errors do not interrupt the walk: the first one is kept and
/// returned by [`TextSink::finish`], and later findings are dropped.
#[derive(Debug)]
pub struct TextSink<W: Write, F: ReportFormatter> {
    writer: W,
    formatter: F,
    error: Option<io::Error>,
}

impl<W: Write, F: ReportFormatter> TextSink<W, F> {
    /// Stream findings rendered by `formatter` into `writer`.
    pub fn new(writer: W, formatter: F) -> Self {
        Self {
            writer,
            formatter,
            error: None,
        }
    }

    /// Write the trailer and flush, returning the writer.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        if let Some(end) = self.formatter.format_end() {
            self.writer.write_all(end.as_bytes())?;
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write, F: ReportFormatter> ReportSink for TextSink<W, F> {
    fn emit(&mut self, finding: Finding) {
        if self.error.is_some() {
            return;
        }
        if let Some(text) = self.formatter.format_finding(&finding) {
            if let Err(err) = self.writer.write_all(text.as_bytes()) {
                tracing::warn!(error = %err, "report output failed");
                self.error = Some(err);
            }
        }
    }
}
