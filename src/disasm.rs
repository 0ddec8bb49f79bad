//! Hand-off of the code region to a disassembly engine.
//!
//! The inspector does not decode instructions itself. It resolves the
//! [`CodeRegion`] through the image and passes the bytes to a
//! [`Disassembler`], whose output is forwarded untouched. Engine failures
//! are reported as [`InspectError::Disassembly`] and never affect a
//! completed [`Inspection`](crate::Inspection).

use crate::error::{InspectError, Result};
use crate::image::BinaryImage;
use crate::macho::cpu_type;
use crate::types::CodeRegion;
use serde::Serialize;
use std::fmt;

/// One decoded instruction, as returned by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    /// Address of the instruction.
    pub address: u64,
    /// Instruction mnemonic.
    pub mnemonic: String,
    /// Operand text.
    pub operands: String,
    /// Raw encoding, when the engine provides it.
    pub bytes: Vec<u8>,
}

impl Instruction {
    /// Hex rendering of the raw encoding.
    pub fn hex_bytes(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}:\t{}\t\t{}", self.address, self.mnemonic, self.operands)
    }
}

/// Instruction sets the code region can be decoded as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeArch {
    /// AArch64.
    Arm64,
    /// 32-bit ARM.
    Arm,
    /// 32-bit x86.
    X86,
    /// x86-64.
    X86_64,
}

impl CodeArch {
    /// Instruction set for a Mach-O cpu type, if one is supported.
    pub fn from_cpu_type(cpu: u32) -> Option<Self> {
        match cpu {
            cpu_type::ARM64 | cpu_type::ARM64_32 => Some(CodeArch::Arm64),
            cpu_type::ARM => Some(CodeArch::Arm),
            cpu_type::X86 => Some(CodeArch::X86),
            cpu_type::X86_64 => Some(CodeArch::X86_64),
            _ => None,
        }
    }
}

impl fmt::Display for CodeArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodeArch::Arm64 => "arm64",
            CodeArch::Arm => "arm",
            CodeArch::X86 => "x86",
            CodeArch::X86_64 => "x86_64",
        };
        f.write_str(name)
    }
}

/// An external disassembly engine.
pub trait Disassembler {
    /// Decode `code`, numbering instructions from `address`.
    fn disassemble(&self, code: &[u8], address: u64) -> Result<Vec<Instruction>>;
}

/// Resolve the bytes of `region` through the image.
pub fn code_bytes<'i>(image: &'i BinaryImage<'_>, region: &CodeRegion) -> Result<&'i [u8]> {
    let size = usize::try_from(region.size).map_err(|_| InspectError::TruncatedRead {
        offset: region.file_offset,
        expected: usize::MAX,
        actual: image.remaining(region.file_offset),
    })?;
    image.read_at(region.file_offset, size)
}

/// Disassemble the code region with `engine`.
///
/// Fails with [`InspectError::NoCodeRegion`] when the parse found no code
/// section and with [`InspectError::Disassembly`] when the engine decodes
/// nothing.
pub fn disassemble_code_region<D: Disassembler + ?Sized>(
    image: &BinaryImage<'_>,
    region: Option<&CodeRegion>,
    engine: &D,
) -> Result<Vec<Instruction>> {
    let region = region.ok_or(InspectError::NoCodeRegion)?;
    let code = code_bytes(image, region)?;
    tracing::debug!(
        offset = region.file_offset,
        size = code.len(),
        "disassembling code region"
    );

    let instructions = engine.disassemble(code, region.address)?;
    if instructions.is_empty() {
        return Err(InspectError::Disassembly {
            message: "failed to disassemble given code".to_string(),
        });
    }
    Ok(instructions)
}

/// Capstone-backed engine.
#[cfg(feature = "disasm")]
#[derive(Debug, Clone, Copy)]
pub struct CapstoneDisassembler {
    arch: CodeArch,
}

#[cfg(feature = "disasm")]
impl CapstoneDisassembler {
    /// Engine for a fixed instruction set.
    pub fn new(arch: CodeArch) -> Self {
        Self { arch }
    }

    /// Engine matching a Mach-O cpu type.
    pub fn for_cpu_type(cpu: u32) -> Option<Self> {
        CodeArch::from_cpu_type(cpu).map(Self::new)
    }

    fn open(&self) -> Result<capstone::Capstone> {
        use capstone::prelude::*;

        let engine = match self.arch {
            CodeArch::Arm64 => Capstone::new()
                .arm64()
                .mode(arch::arm64::ArchMode::Arm)
                .build(),
            CodeArch::Arm => Capstone::new()
                .arm()
                .mode(arch::arm::ArchMode::Arm)
                .build(),
            CodeArch::X86 => Capstone::new()
                .x86()
                .mode(arch::x86::ArchMode::Mode32)
                .syntax(arch::x86::ArchSyntax::Intel)
                .build(),
            CodeArch::X86_64 => Capstone::new()
                .x86()
                .mode(arch::x86::ArchMode::Mode64)
                .syntax(arch::x86::ArchSyntax::Intel)
                .build(),
        };
        engine.map_err(|e| InspectError::Disassembly {
            message: format!("cannot open {} engine: {}", self.arch, e),
        })
    }
}

#[cfg(feature = "disasm")]
impl Disassembler for CapstoneDisassembler {
    fn disassemble(&self, code: &[u8], address: u64) -> Result<Vec<Instruction>> {
        let engine = self.open()?;
        let decoded = engine
            .disasm_all(code, address)
            .map_err(|e| InspectError::Disassembly {
                message: e.to_string(),
            })?;

        Ok(decoded
            .iter()
            .map(|insn| Instruction {
                address: insn.address(),
                mnemonic: insn.mnemonic().unwrap_or("").to_string(),
                operands: insn.op_str().unwrap_or("").to_string(),
                bytes: insn.bytes().to_vec(),
            })
            .collect())
    }
}
