//! Crafted Mach-O images for unit tests.
//!
//! Fields are written in host order, or byte-swapped for foreign-endian
//! images, so every test behaves the same on any host.

use crate::macho::{cpu_type, load_command, magic, size, NAME_LEN};

/// Pad `name` with zeros to a full name field.
pub(crate) fn name_field(name: &[u8]) -> [u8; NAME_LEN] {
    let mut field = [0u8; NAME_LEN];
    field[..name.len()].copy_from_slice(name);
    field
}

/// Byte writer honouring the image's byte order.
#[derive(Debug, Default)]
pub(crate) struct Writer {
    swap: bool,
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new(swap: bool) -> Self {
        Self {
            swap,
            buf: Vec::new(),
        }
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        let value = if self.swap { value.swap_bytes() } else { value };
        self.buf.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub(crate) fn u64(&mut self, value: u64) -> &mut Self {
        let value = if self.swap { value.swap_bytes() } else { value };
        self.buf.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub(crate) fn name(&mut self, field: &[u8; NAME_LEN]) -> &mut Self {
        self.buf.extend_from_slice(field);
        self
    }

    pub(crate) fn zeros(&mut self, count: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + count, 0);
        self
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// A section to place in a crafted segment.
#[derive(Debug, Clone)]
pub(crate) struct TestSection {
    name: [u8; NAME_LEN],
    offset: u32,
    size: u64,
    addr: u64,
}

impl TestSection {
    pub(crate) fn new(name: &str, offset: u32, size: u64) -> Self {
        Self {
            name: name_field(name.as_bytes()),
            offset,
            size,
            addr: u64::from(offset),
        }
    }

    /// Use a raw name field, including any bytes after a NUL.
    pub(crate) fn with_field(name: [u8; NAME_LEN], offset: u32, size: u64) -> Self {
        Self {
            name,
            offset,
            size,
            addr: u64::from(offset),
        }
    }

    pub(crate) fn addr(mut self, addr: u64) -> Self {
        self.addr = addr;
        self
    }
}

/// Overrides for deliberately malformed segment commands.
#[derive(Debug, Default)]
pub(crate) struct SegmentOverrides {
    pub(crate) nsects: Option<u32>,
    pub(crate) cmdsize: Option<u32>,
}

/// Builds a thin Mach-O image: header plus load commands.
#[derive(Debug)]
pub(crate) struct MachOBuilder {
    is_64: bool,
    swap: bool,
    cpu: u32,
    ncmds: u32,
    body: Writer,
    placed: Vec<(usize, Vec<u8>)>,
}

impl MachOBuilder {
    pub(crate) fn new(is_64: bool, swap: bool) -> Self {
        Self {
            is_64,
            swap,
            cpu: if is_64 { cpu_type::ARM64 } else { cpu_type::ARM },
            ncmds: 0,
            body: Writer::new(swap),
            placed: Vec::new(),
        }
    }

    pub(crate) fn cpu(mut self, cpu: u32) -> Self {
        self.cpu = cpu;
        self
    }

    /// An opaque command of `size` bytes (zero-filled after the header).
    pub(crate) fn command(mut self, tag: u32, size: u32) -> Self {
        self.body.u32(tag).u32(size).zeros(size as usize - size::LOAD_COMMAND);
        self.ncmds += 1;
        self
    }

    /// Raw command words followed by `padding` zero bytes.
    pub(crate) fn raw_command(mut self, words: &[u32], padding: usize) -> Self {
        for &word in words {
            self.body.u32(word);
        }
        self.body.zeros(padding);
        self.ncmds += 1;
        self
    }

    pub(crate) fn segment64(self, name: &str, sections: &[TestSection]) -> Self {
        self.segment64_with(name, sections, |_| {})
    }

    pub(crate) fn segment64_with(
        mut self,
        name: &str,
        sections: &[TestSection],
        tweak: impl FnOnce(&mut SegmentOverrides),
    ) -> Self {
        let mut overrides = SegmentOverrides::default();
        tweak(&mut overrides);

        let nsects = sections.len() as u32;
        let cmdsize = (size::SEGMENT_COMMAND_64 + sections.len() * size::SECTION_64) as u32;
        let filesize = sections.iter().map(|s| u64::from(s.offset) + s.size).max().unwrap_or(0);
        let prot = segment_prot(name);
        let segname = name_field(name.as_bytes());

        self.body
            .u32(load_command::LC_SEGMENT_64)
            .u32(overrides.cmdsize.unwrap_or(cmdsize))
            .name(&segname)
            .u64(0x1_0000_0000)
            .u64(filesize)
            .u64(0)
            .u64(filesize)
            .u32(prot)
            .u32(prot)
            .u32(overrides.nsects.unwrap_or(nsects))
            .u32(0);
        for section in sections {
            self.body
                .name(&section.name)
                .name(&segname)
                .u64(section.addr)
                .u64(section.size)
                .u32(section.offset)
                .u32(2)
                .u32(0)
                .u32(0)
                .u32(0x8000_0400)
                .u32(0)
                .u32(0)
                .u32(0);
        }
        self.ncmds += 1;
        self
    }

    pub(crate) fn segment32(mut self, name: &str, sections: &[TestSection]) -> Self {
        let nsects = sections.len() as u32;
        let cmdsize = (size::SEGMENT_COMMAND + sections.len() * size::SECTION) as u32;
        let filesize = sections.iter().map(|s| u64::from(s.offset) + s.size).max().unwrap_or(0) as u32;
        let prot = segment_prot(name);
        let segname = name_field(name.as_bytes());

        self.body
            .u32(load_command::LC_SEGMENT)
            .u32(cmdsize)
            .name(&segname)
            .u32(0x1000)
            .u32(filesize)
            .u32(0)
            .u32(filesize)
            .u32(prot)
            .u32(prot)
            .u32(nsects)
            .u32(0);
        for section in sections {
            self.body
                .name(&section.name)
                .name(&segname)
                .u32(section.addr as u32)
                .u32(section.size as u32)
                .u32(section.offset)
                .u32(2)
                .u32(0)
                .u32(0)
                .u32(0x8000_0400)
                .u32(0)
                .u32(0);
        }
        self.ncmds += 1;
        self
    }

    /// Place `bytes` at absolute file `offset` in the built image.
    pub(crate) fn place(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.placed.push((offset, bytes.to_vec()));
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut out = Writer::new(self.swap);
        let sizeofcmds = self.body.len() as u32;
        out.u32(if self.is_64 {
            magic::MH_MAGIC_64
        } else {
            magic::MH_MAGIC
        })
        .u32(self.cpu)
        .u32(0)
        .u32(2) // MH_EXECUTE
        .u32(self.ncmds)
        .u32(sizeofcmds)
        .u32(0);
        if self.is_64 {
            out.u32(0);
        }

        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(&self.body.into_bytes());
        for (offset, placed) in self.placed {
            let end = offset + placed.len();
            if bytes.len() < end {
                bytes.resize(end, 0);
            }
            bytes[offset..end].copy_from_slice(&placed);
        }
        bytes
    }
}

fn segment_prot(name: &str) -> u32 {
    if name == "__TEXT" {
        0x5
    } else {
        0x3
    }
}
