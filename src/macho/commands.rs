//! Load command stream walking.
//!
//! [`LoadCommands`] is a single forward pass over the `ncmds` records that
//! follow the header. It yields one `(tag, offset, size)` triple per
//! command and advances by each command's declared `cmdsize`. A size that
//! is too small or runs past the image ends the walk with
//! [`InspectError::CorruptLoadCommand`], so corrupt input can neither loop
//! nor read out of bounds.

use super::{command_name, load_command, size, MachHeader};
use crate::endian::{self, Normalize};
use crate::error::{InspectError, Result};
use crate::image::BinaryImage;
use byteorder::{ByteOrder, NativeEndian};
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;

/// The `(cmd, cmdsize)` pair every load command starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadCommandHeader {
    /// Command tag.
    pub cmd: u32,
    /// Size of the whole command in bytes.
    pub cmdsize: u32,
}

impl Normalize for LoadCommandHeader {
    fn swap_fields(&mut self) {
        self.cmd = self.cmd.swap_bytes();
        self.cmdsize = self.cmdsize.swap_bytes();
    }
}

impl LoadCommandHeader {
    /// Read and normalize the command header at `offset`.
    pub fn read(image: &BinaryImage<'_>, offset: u64, needs_swap: bool) -> Result<Self> {
        let raw = image.read_array::<{ size::LOAD_COMMAND }>(offset)?;
        let header = Self {
            cmd: NativeEndian::read_u32(&raw[0..4]),
            cmdsize: NativeEndian::read_u32(&raw[4..8]),
        };
        Ok(endian::normalize(header, needs_swap))
    }
}

/// One step of the walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCommand {
    /// Position in the command stream, starting at 0.
    pub index: u32,
    /// The `cmd` tag.
    pub tag: u32,
    /// File offset of the command.
    pub offset: u64,
    /// Declared `cmdsize`.
    pub size: u32,
}

impl LoadCommand {
    /// Offset one past the end of the command.
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.size)
    }

    /// Symbolic name of the tag, if well known.
    pub fn name(&self) -> Option<&'static str> {
        command_name(self.tag)
    }

    /// Whether this is an `LC_SEGMENT` or `LC_SEGMENT_64`.
    pub fn is_segment(&self) -> bool {
        matches!(
            self.tag,
            load_command::LC_SEGMENT | load_command::LC_SEGMENT_64
        )
    }
}

/// Lazy iterator over the load commands of an image.
///
/// Yields exactly `count` commands on well-formed input. After the first
/// error it yields nothing more.
#[derive(Debug)]
pub struct LoadCommands<'i, 'a> {
    image: &'i BinaryImage<'a>,
    cursor: u64,
    index: u32,
    count: u32,
    needs_swap: bool,
    failed: bool,
}

impl<'i, 'a> LoadCommands<'i, 'a> {
    /// Walk `count` commands starting at `start`.
    pub fn new(image: &'i BinaryImage<'a>, start: u64, count: u32, needs_swap: bool) -> Self {
        Self {
            image,
            cursor: start,
            index: 0,
            count,
            needs_swap,
            failed: false,
        }
    }

    /// Walk the commands declared by `header`.
    pub fn for_header(image: &'i BinaryImage<'a>, header: &MachHeader) -> Self {
        Self::new(image, header.commands_offset(), header.ncmds, header.needs_swap)
    }

    /// Offset of the next command to read.
    ///
    /// Once the walk is exhausted this equals the start offset plus the sum
    /// of every command's declared size.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of commands read so far.
    pub fn visited(&self) -> u32 {
        self.index
    }

    fn step(&mut self) -> Result<LoadCommand> {
        let offset = self.cursor;
        let header = LoadCommandHeader::read(self.image, offset, self.needs_swap)?;

        let corrupt = |reason| InspectError::CorruptLoadCommand {
            index: self.index,
            offset,
            size: header.cmdsize,
            reason,
        };

        if header.cmdsize == 0 {
            return Err(corrupt("zero size"));
        }
        if (header.cmdsize as usize) < size::LOAD_COMMAND {
            return Err(corrupt("smaller than a load command header"));
        }
        let end = offset + u64::from(header.cmdsize);
        if end > self.image.len() {
            return Err(corrupt("extends past end of image"));
        }

        let command = LoadCommand {
            index: self.index,
            tag: header.cmd,
            offset,
            size: header.cmdsize,
        };
        tracing::trace!(
            index = command.index,
            tag = format_args!("0x{:X}", command.tag),
            offset = command.offset,
            size = command.size,
            "load command"
        );

        self.cursor = end;
        self.index += 1;
        Ok(command)
    }
}

impl Iterator for LoadCommands<'_, '_> {
    type Item = Result<LoadCommand>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.count {
            return None;
        }
        let step = self.step();
        if step.is_err() {
            self.failed = true;
        }
        Some(step)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let left = (self.count - self.index) as usize;
        (0, Some(left))
    }
}

impl FusedIterator for LoadCommands<'_, '_> {}
