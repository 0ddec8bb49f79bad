//! Offset-addressed access to a binary blob.
//!
//! `BinaryImage` owns (or borrows) the bytes of one Mach-O file for the
//! duration of a parse session. There is no cursor: every read names its
//! offset, so decoders never share seek state.

use crate::error::{InspectError, Result};
use std::borrow::Cow;
use std::path::Path;

/// Immutable byte source for a single parse session.
#[derive(Debug, Clone)]
pub struct BinaryImage<'a> {
    data: Cow<'a, [u8]>,
}

impl BinaryImage<'static> {
    /// Read a whole file into memory.
    ///
    /// The file handle is closed before this returns; the image holds only
    /// the bytes, so every exit path of the session releases the file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        tracing::debug!(path = %path.display(), len = data.len(), "opened image");
        Ok(Self {
            data: Cow::Owned(data),
        })
    }

    /// Take ownership of an in-memory buffer.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Cow::Owned(data),
        }
    }
}

impl<'a> BinaryImage<'a> {
    /// Borrow an in-memory buffer.
    pub fn from_bytes(data: &'a [u8]) -> Self {
        Self {
            data: Cow::Borrowed(data),
        }
    }

    /// Total length of the image in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    /// Whether the image holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The whole image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Read exactly `size` bytes starting at `offset`.
    ///
    /// Fails with [`InspectError::TruncatedRead`] when fewer than `size`
    /// bytes remain; short reads are never padded.
    pub fn read_at(&self, offset: u64, size: usize) -> Result<&[u8]> {
        let truncated = || InspectError::TruncatedRead {
            offset,
            expected: size,
            actual: self.remaining(offset),
        };
        let start = usize::try_from(offset).map_err(|_| truncated())?;
        let end = start.checked_add(size).ok_or_else(truncated)?;
        self.data.get(start..end).ok_or_else(truncated)
    }

    /// Read a fixed-size record into an array.
    pub fn read_array<const N: usize>(&self, offset: u64) -> Result<[u8; N]> {
        let bytes = self.read_at(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Bytes available from `offset` to the end of the image.
    pub fn remaining(&self, offset: u64) -> usize {
        match usize::try_from(offset) {
            Ok(start) => self.data.len().saturating_sub(start),
            Err(_) => 0,
        }
    }
}
