//! Parse session driver.
//!
//! Runs one linear pass over an image: header, then every load command,
//! descending into segments and their sections. Findings stream to the
//! sink as they are decoded; the code region is threaded through the
//! session and returned in the [`Inspection`].

use crate::error::Result;
use crate::image::BinaryImage;
use crate::macho::segment::overflow_error;
use crate::macho::{
    decode_header, decode_segment, load_command, Layout, LoadCommand, LoadCommands, MachHeader,
};
use crate::report::{
    CommandSummary, Finding, HeaderSummary, ReportSink, SectionSummary, SegmentSummary, Warning,
};
use crate::types::{CodeRegion, InspectOptions, Inspection};

/// Inspect an image, streaming findings to `sink`.
///
/// On error, findings already emitted stay with the sink; no
/// [`Inspection`] is produced.
pub fn inspect<S: ReportSink + ?Sized>(
    image: &BinaryImage<'_>,
    options: &InspectOptions,
    sink: &mut S,
) -> Result<Inspection> {
    let header = decode_header(image)?;
    sink.emit(Finding::Header(HeaderSummary::from(&header)));

    let mut session = Session {
        image,
        options,
        header: &header,
        sink,
        code_region: None,
    };

    let mut commands = LoadCommands::for_header(image, &header);
    for command in commands.by_ref() {
        session.dispatch(&command?)?;
    }

    let code_region = session.code_region;
    if code_region.is_none() {
        tracing::debug!(section = %options.code_section, "no code section found");
    }

    Ok(Inspection {
        code_region,
        commands: commands.visited(),
        end_offset: commands.cursor(),
        header,
    })
}

struct Session<'s, 'i, 'a, S: ?Sized> {
    image: &'i BinaryImage<'a>,
    options: &'s InspectOptions,
    header: &'s MachHeader,
    sink: &'s mut S,
    code_region: Option<CodeRegion>,
}

impl<S: ReportSink + ?Sized> Session<'_, '_, '_, S> {
    fn dispatch(&mut self, command: &LoadCommand) -> Result<()> {
        match command.tag {
            load_command::LC_SEGMENT_64 => self.segment(command, Layout::Bits64, true),
            load_command::LC_SEGMENT => {
                self.segment(command, Layout::Bits32, self.options.sections_32bit)
            }
            _ => {
                self.sink.emit(Finding::Command(CommandSummary::from(command)));
                Ok(())
            }
        }
    }

    fn segment(&mut self, command: &LoadCommand, layout: Layout, descend: bool) -> Result<()> {
        let needs_swap = self.header.needs_swap;
        let (segment, sections) = decode_segment(self.image, command.offset, layout, needs_swap)?;
        self.sink
            .emit(Finding::Segment(SegmentSummary::new(command, &segment)));

        if !descend {
            return Ok(());
        }

        if !segment.section_array_fits() {
            if self.options.strict {
                return Err(overflow_error(&segment));
            }
            tracing::warn!(
                segment = %segment.name(),
                needed = segment.required_size(),
                cmdsize = segment.cmdsize,
                "section array overruns segment command"
            );
            self.sink.emit(Finding::Warning(Warning {
                offset: command.offset,
                message: format!(
                    "segment {} declares {} sections ({} bytes) but cmdsize is {}",
                    segment.name(),
                    segment.nsects,
                    segment.required_size(),
                    segment.cmdsize
                ),
            }));
        }

        for section in sections {
            let section = section?;
            let is_code = section.is_named(&self.options.code_section);
            self.sink
                .emit(Finding::Section(SectionSummary::new(&segment, &section, is_code)));

            if is_code {
                let region = CodeRegion {
                    file_offset: u64::from(section.offset),
                    size: section.size,
                    address: section.addr,
                };
                self.record_code_region(region, section.record_offset);
            }
        }
        Ok(())
    }

    // Last match wins. A second match most likely means a malformed or
    // unusual image, so it is flagged rather than silently replaced.
    fn record_code_region(&mut self, region: CodeRegion, record_offset: u64) {
        if let Some(previous) = self.code_region.replace(region) {
            tracing::warn!(
                previous = previous.file_offset,
                current = region.file_offset,
                "multiple code sections, keeping the last"
            );
            self.sink.emit(Finding::Warning(Warning {
                offset: record_offset,
                message: format!(
                    "code section at 0x{:x} replaces earlier one at 0x{:x}",
                    region.file_offset, previous.file_offset
                ),
            }));
        }
        tracing::debug!(
            offset = region.file_offset,
            size = region.size,
            "code region"
        );
        self.sink.emit(Finding::CodeRegion(region));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InspectError;
    use crate::macho::cpu_type;
    use crate::report::Report;
    use crate::testutil::{name_field, MachOBuilder, TestSection};
    use pretty_assertions::assert_eq;

    fn run(data: &[u8], options: &InspectOptions) -> (Result<Inspection>, Report) {
        let image = BinaryImage::from_bytes(data);
        let mut report = Report::new();
        let result = inspect(&image, options, &mut report);
        (result, report)
    }

    #[test]
    fn test_minimal_64_bit_image() {
        let data = MachOBuilder::new(true, false)
            .segment64("__TEXT", &[TestSection::new("__text", 0x1000, 0x40)])
            .build();
        let (result, report) = run(&data, &InspectOptions::new());
        let inspection = result.unwrap();

        let region = inspection.code_region.unwrap();
        assert_eq!(region.file_offset, 0x1000);
        assert_eq!(region.size, 0x40);
        assert_eq!(report.segments().count(), 1);
        assert_eq!(report.sections().count(), 1);
        assert_eq!(report.commands().count(), 0);
        assert_eq!(report.code_region(), Some(&region));
        assert_eq!(inspection.commands, 1);
        assert_eq!(inspection.end_offset, data.len() as u64);
    }

    #[test]
    fn test_swapped_image_matches_native() {
        let build = |swap| {
            MachOBuilder::new(true, swap)
                .cpu(cpu_type::X86_64)
                .command(load_command::LC_UUID, 24)
                .segment64(
                    "__TEXT",
                    &[
                        TestSection::new("__text", 0x4F0, 0x1234),
                        TestSection::new("__cstring", 0x1800, 0x20),
                    ],
                )
                .segment64("__LINKEDIT", &[])
                .build()
        };
        let (native, native_report) = run(&build(false), &InspectOptions::new());
        let (swapped, swapped_report) = run(&build(true), &InspectOptions::new());
        let native = native.unwrap();
        let swapped = swapped.unwrap();

        assert_eq!(native.code_region, swapped.code_region);
        assert_eq!(native.end_offset, swapped.end_offset);
        assert_eq!(
            native_report.sections().collect::<Vec<_>>(),
            swapped_report.sections().collect::<Vec<_>>()
        );
        assert_eq!(
            native_report.segments().collect::<Vec<_>>(),
            swapped_report.segments().collect::<Vec<_>>()
        );
        assert!(swapped_report.header().unwrap().needs_swap);
        assert_eq!(swapped_report.header().unwrap().cpu_name, "x86_64");
    }

    #[test]
    fn test_findings_stream_in_walk_order() {
        let data = MachOBuilder::new(true, false)
            .command(load_command::LC_UUID, 24)
            .segment64("__TEXT", &[TestSection::new("__text", 0x1000, 0x40)])
            .command(0x4242, 16)
            .build();
        let (result, report) = run(&data, &InspectOptions::new());
        result.unwrap();

        let kinds: Vec<_> = report
            .findings()
            .iter()
            .map(|f| match f {
                Finding::Header(_) => "header",
                Finding::Segment(_) => "segment",
                Finding::Section(_) => "section",
                Finding::Command(_) => "command",
                Finding::CodeRegion(_) => "code",
                Finding::Warning(_) => "warning",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["header", "command", "segment", "section", "code", "command"]
        );
        let opaque: Vec<_> = report.commands().map(|c| (c.tag, c.name)).collect();
        assert_eq!(
            opaque,
            vec![(load_command::LC_UUID, Some("LC_UUID")), (0x4242, None)]
        );
    }

    #[test]
    fn test_last_code_section_wins() {
        let data = MachOBuilder::new(true, false)
            .segment64("__TEXT", &[TestSection::new("__text", 0x1000, 0x40)])
            .segment64("__TEXT_EXEC", &[TestSection::new("__text", 0x8000, 0x80)])
            .build();
        let (result, report) = run(&data, &InspectOptions::new());
        let region = result.unwrap().code_region.unwrap();

        assert_eq!(region.file_offset, 0x8000);
        assert_eq!(region.size, 0x80);
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.sections().filter(|s| s.is_code).count(), 2);
    }

    #[test]
    fn test_name_padding_rules() {
        let mut trailing = name_field(b"__text");
        trailing[7] = b'!';
        let data = MachOBuilder::new(true, false)
            .segment64(
                "__TEXT",
                &[
                    TestSection::with_field(name_field(b"__textX"), 0x100, 4),
                    TestSection::with_field(trailing, 0x200, 8),
                ],
            )
            .build();
        let (result, report) = run(&data, &InspectOptions::new());
        let region = result.unwrap().code_region.unwrap();

        // "__text\0!..." ends at the NUL, "__textX" does not match
        assert_eq!(region.file_offset, 0x200);
        let flags: Vec<_> = report.sections().map(|s| s.is_code).collect();
        assert_eq!(flags, vec![false, true]);
    }

    #[test]
    fn test_no_code_section() {
        let data = MachOBuilder::new(true, false)
            .segment64("__DATA", &[TestSection::new("__data", 0x2000, 0x10)])
            .build();
        let (result, _) = run(&data, &InspectOptions::new());
        assert_eq!(result.unwrap().code_region, None);
    }

    #[test]
    fn test_custom_code_section_name() {
        let data = MachOBuilder::new(true, false)
            .segment64(
                "__TEXT",
                &[
                    TestSection::new("__text", 0x1000, 0x40),
                    TestSection::new("__stubs", 0x1040, 0x0C),
                ],
            )
            .build();
        let options = InspectOptions {
            code_section: "__stubs".to_string(),
            ..InspectOptions::new()
        };
        let (result, _) = run(&data, &options);
        assert_eq!(result.unwrap().code_region.unwrap().file_offset, 0x1040);
    }

    #[test]
    fn test_32_bit_segments_skip_sections_by_default() {
        let data = MachOBuilder::new(false, false)
            .segment32("__TEXT", &[TestSection::new("__text", 0x400, 0x20)])
            .build();

        let (result, report) = run(&data, &InspectOptions::new());
        assert_eq!(result.unwrap().code_region, None);
        assert_eq!(report.segments().count(), 1);
        assert_eq!(report.sections().count(), 0);

        let (result, report) = run(&data, &InspectOptions::full());
        let region = result.unwrap().code_region.unwrap();
        assert_eq!((region.file_offset, region.size), (0x400, 0x20));
        assert_eq!(report.sections().count(), 1);
    }

    #[test]
    fn test_swapped_32_bit_segment() {
        let data = MachOBuilder::new(false, true)
            .segment32("__TEXT", &[TestSection::new("__text", 0x400, 0x20)])
            .command(load_command::LC_SYMTAB, 24)
            .build();
        let (result, report) = run(&data, &InspectOptions::full());
        let inspection = result.unwrap();
        assert_eq!(inspection.code_region.unwrap().size, 0x20);
        assert_eq!(report.segments().next().unwrap().name, "__TEXT");
        assert_eq!(report.commands().count(), 1);
    }

    #[test]
    fn test_corrupt_command_keeps_partial_report() {
        let data = MachOBuilder::new(true, false)
            .segment64("__TEXT", &[TestSection::new("__text", 0x1000, 0x40)])
            .raw_command(&[load_command::LC_UUID, 0], 16)
            .build();
        let (result, report) = run(&data, &InspectOptions::new());

        assert!(matches!(
            result,
            Err(InspectError::CorruptLoadCommand { index: 1, .. })
        ));
        assert_eq!(report.segments().count(), 1);
        assert_eq!(report.sections().count(), 1);
        assert!(report.code_region().is_some());
    }

    #[test]
    fn test_unrecognized_format_emits_nothing() {
        let (result, report) = run(&[0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 2], &InspectOptions::new());
        assert!(matches!(result, Err(InspectError::UnrecognizedFormat { .. })));
        assert!(report.is_empty());
    }

    #[test]
    fn test_section_overflow_soft_and_strict() {
        let data = MachOBuilder::new(true, false)
            .segment64_with(
                "__TEXT",
                &[TestSection::new("__text", 0x1000, 0x40)],
                |seg| seg.nsects = Some(2),
            )
            .command(load_command::LC_DYSYMTAB, 80)
            .build();

        let (result, report) = run(&data, &InspectOptions::new());
        assert!(result.is_ok());
        assert_eq!(report.warnings().count(), 1);
        // the second section record is read from the bytes that follow
        assert_eq!(report.sections().count(), 2);

        let (result, _) = run(&data, &InspectOptions::strict());
        assert!(matches!(result, Err(InspectError::SectionOverflow { .. })));
    }

    #[test]
    fn test_cmdsize_smaller_than_segment_record() {
        let data = MachOBuilder::new(true, false)
            .segment64_with(
                "__TEXT",
                &[TestSection::new("__text", 0x1000, 0x40)],
                |seg| seg.cmdsize = Some(8),
            )
            .build();

        let (result, report) = run(&data, &InspectOptions::new());
        let inspection = result.unwrap();
        assert_eq!(inspection.end_offset, 32 + 8);
        assert_eq!(report.segments().next().unwrap().command_size, 8);
        let warnings: Vec<_> = report.warnings().collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].offset, 32);
        assert!(warnings[0].message.contains("cmdsize is 8"));

        let (result, report) = run(&data, &InspectOptions::strict());
        assert!(matches!(
            result,
            Err(InspectError::SectionOverflow {
                offset: 32,
                needed: 152,
                cmd_size: 8,
                ..
            })
        ));
        assert_eq!(report.segments().count(), 1);
        assert_eq!(report.sections().count(), 0);
    }

    #[test]
    fn test_huge_section_count_is_bounded() {
        let data = MachOBuilder::new(true, false)
            .segment64_with("__TEXT", &[], |seg| seg.nsects = Some(u32::MAX))
            .build();
        let (result, _) = run(&data, &InspectOptions::new());
        assert!(matches!(result, Err(InspectError::TruncatedRead { .. })));
    }
}
