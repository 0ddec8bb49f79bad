//! Mach-O Inspect CLI
//!
//! Command-line tool for dumping the structure of Mach-O files.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use macho_inspect::disasm::Instruction;
use macho_inspect::formatter::{
    format_instructions, format_summary, HumanFormatter, JsonFormatter, ReportFormatter,
    ShortFormatter, TextSink,
};
use macho_inspect::{inspect, BinaryImage, InspectError, InspectOptions, Inspection, Report};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Mach-O structure walker.
///
/// Decodes the header, load commands, segments and sections of Mach-O
/// files and locates the `__text` code region.
#[derive(Parser, Debug)]
#[command(name = "macho-inspect")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input file(s) to inspect
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// Fail when a segment's sections overrun its command size
    #[arg(long)]
    strict: bool,

    /// Also list the sections of 32-bit segments
    #[arg(long = "sections-32")]
    sections_32: bool,

    /// Section name that marks the code region
    #[arg(long, default_value = macho_inspect::macho::CODE_SECTION_NAME)]
    code_section: String,

    /// Disassemble the code region
    #[arg(short, long)]
    disasm: bool,

    /// Maximum number of instructions to print (0 for all)
    #[arg(long, default_value = "0")]
    max_instructions: usize,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (only output essential info)
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Line-oriented structural dump
    Human,
    /// JSON output
    Json,
    /// Compact single-line output
    Short,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("macho_inspect=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let options = InspectOptions {
        code_section: args.code_section.clone(),
        strict: args.strict,
        sections_32bit: args.sections_32,
    };

    let mut success = true;

    for path in &args.files {
        if let Err(e) = inspect_path(path, &options, &args) {
            if !args.quiet {
                eprintln!("Error inspecting {}: {:#}", path.display(), e);
            }
            success = false;
        }
    }

    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn inspect_path(path: &Path, options: &InspectOptions, args: &Args) -> anyhow::Result<()> {
    let image =
        BinaryImage::open(path).with_context(|| format!("cannot read {}", path.display()))?;

    let inspection = match args.format {
        OutputFormat::Human => inspect_streaming(&image, options, args)?,
        OutputFormat::Json => inspect_collected(&image, options, path, &JsonFormatter::new())?,
        OutputFormat::Short => inspect_collected(&image, options, path, &ShortFormatter::new())?,
    };

    if args.disasm {
        let instructions = disassemble(&image, &inspection).context("disassembly failed")?;
        print_instructions(&instructions, args.max_instructions);
    }

    Ok(())
}

/// Print findings while the walk runs, so a partial dump survives an error.
fn inspect_streaming(
    image: &BinaryImage<'_>,
    options: &InspectOptions,
    args: &Args,
) -> anyhow::Result<Inspection> {
    let formatter = HumanFormatter {
        verbose: args.verbose,
        quiet: args.quiet,
    };
    let mut sink = TextSink::new(io::stdout().lock(), formatter);
    let result = inspect(image, options, &mut sink);
    let mut stdout = sink.finish().context("cannot write report")?;

    let inspection = result.context("parse failed")?;
    if args.verbose {
        stdout.write_all(format_summary(&inspection).as_bytes())?;
    }
    Ok(inspection)
}

fn inspect_collected<F: ReportFormatter>(
    image: &BinaryImage<'_>,
    options: &InspectOptions,
    path: &Path,
    formatter: &F,
) -> anyhow::Result<Inspection> {
    let mut report = Report::new();
    let result = inspect(image, options, &mut report);
    print!("{}", formatter.format_report(&report, path));
    result.context("parse failed")
}

#[cfg(feature = "disasm")]
fn disassemble(
    image: &BinaryImage<'_>,
    inspection: &Inspection,
) -> Result<Vec<Instruction>, InspectError> {
    use macho_inspect::disasm::{disassemble_code_region, CapstoneDisassembler, CodeArch};

    let engine = CapstoneDisassembler::for_cpu_type(inspection.header.cpu_type)
        .unwrap_or_else(|| CapstoneDisassembler::new(CodeArch::Arm64));
    disassemble_code_region(image, inspection.code_region.as_ref(), &engine)
}

#[cfg(not(feature = "disasm"))]
fn disassemble(
    _image: &BinaryImage<'_>,
    inspection: &Inspection,
) -> anyhow::Result<Vec<Instruction>> {
    if inspection.code_region.is_none() {
        return Err(InspectError::NoCodeRegion.into());
    }
    anyhow::bail!("built without the `disasm` feature")
}

fn print_instructions(instructions: &[Instruction], max: usize) {
    let shown = if max == 0 {
        instructions
    } else {
        &instructions[..max.min(instructions.len())]
    };
    print!("{}", format_instructions(shown));
    if shown.len() < instructions.len() {
        println!("... {} more", instructions.len() - shown.len());
    }
}
