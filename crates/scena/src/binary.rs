//! The compiled program container and its on-disk byte layout.
//!
//! # Layout
//!
//! All integers are little-endian `u64` unless noted.
//!
//! ```text
//! header_size | version | min_version | flags
//! data.start  | data.size
//! jumps.start | jumps.size
//! code.start  | code.size
//! signature (16 bytes)
//! data section:  NUL-terminated strings
//! jump section:  (label hash, word offset) pairs
//! code section:  u16 instruction words
//! ```
//!
//! Section starts are absolute byte offsets into the buffer. The declared header
//! size must match the header this loader knows exactly.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LoadError;

/// Format version written by this crate.
pub const VERSION: u64 = 0;
/// Oldest loader version able to read binaries written by this crate.
pub const MIN_VERSION: u64 = 0;
/// Fixed signature identifying a scena binary.
pub const SIGNATURE: [u8; 16] = *b"scena::bytecode\0";
/// Size of the header this crate writes and understands.
pub const HEADER_SIZE: usize = 10 * 8 + SIGNATURE.len();
/// Bytes per jump-table entry.
pub const JUMP_ENTRY_SIZE: usize = 16;
/// Bytes per instruction word.
pub const WORD_SIZE: usize = 2;

/// Pool index of the reserved `"false"` literal.
pub const POOL_FALSE: usize = 0;
/// Pool index of the reserved `"true"` literal.
pub const POOL_TRUE: usize = 1;

/// A compiled program: string pool, jump table and instruction stream.
///
/// Immutable once handed to an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binary {
    /// String pool. Indices 0 and 1 hold `"false"` and `"true"`.
    pub data: Vec<String>,
    /// Label hash to word offset into `code`.
    pub jumps: IndexMap<u64, u64>,
    /// Instruction words.
    pub code: Vec<u16>,
}

impl Default for Binary {
    fn default() -> Self {
        Self {
            data: vec!["false".to_owned(), "true".to_owned()],
            jumps: IndexMap::new(),
            code: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Section {
    start: u64,
    size: u64,
}

impl Section {
    fn end(self) -> Option<u64> {
        self.start.checked_add(self.size)
    }

    fn slice(self, bytes: &[u8]) -> &[u8] {
        // bounds are validated before any section is sliced
        let start = usize::try_from(self.start).unwrap_or(usize::MAX);
        let size = usize::try_from(self.size).unwrap_or(usize::MAX);
        bytes.get(start..start.saturating_add(size)).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    header_size: u64,
    version: u64,
    min_version: u64,
    flags: u64,
    data: Section,
    jumps: Section,
    code: Section,
    signature: [u8; 16],
}

/// Bounds-checked cursor over a byte buffer.
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], LoadError> {
        let end = self.offset.checked_add(len).ok_or(LoadError::TooSmall {
            size: self.bytes.len(),
            needed: u64::MAX,
        })?;
        let slice = self.bytes.get(self.offset..end).ok_or(LoadError::TooSmall {
            size: self.bytes.len(),
            needed: end as u64,
        })?;
        self.offset = end;
        Ok(slice)
    }

    fn read_u64_le(&mut self) -> Result<u64, LoadError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn read_section(&mut self) -> Result<Section, LoadError> {
        Ok(Section {
            start: self.read_u64_le()?,
            size: self.read_u64_le()?,
        })
    }
}

impl Header {
    fn read(bytes: &[u8]) -> Result<Self, LoadError> {
        let mut r = Reader::new(bytes);
        let header_size = r.read_u64_le()?;
        let version = r.read_u64_le()?;
        let min_version = r.read_u64_le()?;
        let flags = r.read_u64_le()?;
        let data = r.read_section()?;
        let jumps = r.read_section()?;
        let code = r.read_section()?;
        let mut signature = [0; 16];
        signature.copy_from_slice(r.take(SIGNATURE.len())?);
        Ok(Self {
            header_size,
            version,
            min_version,
            flags,
            data,
            jumps,
            code,
            signature,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        for v in [
            self.header_size,
            self.version,
            self.min_version,
            self.flags,
            self.data.start,
            self.data.size,
            self.jumps.start,
            self.jumps.size,
            self.code.start,
            self.code.size,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.signature);
    }
}

impl Binary {
    /// Decodes and validates a binary from `bytes`.
    ///
    /// # Errors
    /// Returns a [`LoadError`] naming the first check that failed. No partial
    /// binary is produced.
    pub fn load(bytes: &[u8]) -> Result<Self, LoadError> {
        let file_size = bytes.len();
        let declared = Reader::new(bytes).read_u64_le()?;
        if (file_size as u64) < declared {
            return Err(LoadError::TooSmall {
                size: file_size,
                needed: declared,
            });
        }
        if declared < HEADER_SIZE as u64 {
            return Err(LoadError::HeaderTruncated {
                declared,
                expected: HEADER_SIZE,
            });
        }
        if declared > HEADER_SIZE as u64 {
            return Err(LoadError::HeaderTooLarge {
                declared,
                expected: HEADER_SIZE,
            });
        }
        let header = Header::read(&bytes[..HEADER_SIZE])?;
        if header.min_version > VERSION {
            return Err(LoadError::UnsupportedVersion {
                min_version: header.min_version,
                supported: VERSION,
            });
        }

        let needed = [header.data.size, header.jumps.size, header.code.size]
            .into_iter()
            .try_fold(header.header_size, u64::checked_add)
            .unwrap_or(u64::MAX);
        if (file_size as u64) < needed {
            return Err(LoadError::TooSmall { size: file_size, needed });
        }
        for (name, section) in [("data", header.data), ("jump", header.jumps), ("code", header.code)] {
            if section.end().is_none_or(|end| end > file_size as u64) {
                return Err(LoadError::SectionOutOfBounds {
                    section: name,
                    start: section.start,
                    size: section.size,
                    file_size,
                });
            }
        }
        if header.signature != SIGNATURE {
            return Err(LoadError::SignatureMismatch);
        }

        let data = decode_strings(header.data.slice(bytes));

        if header.jumps.size % JUMP_ENTRY_SIZE as u64 != 0 {
            return Err(LoadError::MalformedJumpTable {
                size: header.jumps.size,
                width: JUMP_ENTRY_SIZE,
            });
        }
        if header.code.size == 0 || header.code.size % WORD_SIZE as u64 != 0 {
            return Err(LoadError::MalformedCode {
                size: header.code.size,
                width: WORD_SIZE,
            });
        }
        let code: Vec<u16> = header
            .code
            .slice(bytes)
            .chunks_exact(WORD_SIZE)
            .map(|w| u16::from_le_bytes([w[0], w[1]]))
            .collect();

        let mut jumps = IndexMap::new();
        for entry in header.jumps.slice(bytes).chunks_exact(JUMP_ENTRY_SIZE) {
            let mut r = Reader::new(entry);
            let hash = r.read_u64_le()?;
            let offset = r.read_u64_le()?;
            if offset >= code.len() as u64 {
                return Err(LoadError::JumpOutOfBounds {
                    hash,
                    offset,
                    code_len: code.len(),
                });
            }
            jumps.insert(hash, offset);
        }

        debug!(
            version = header.version,
            flags = header.flags,
            strings = data.len(),
            labels = jumps.len(),
            words = code.len(),
            "binary loaded"
        );
        Ok(Self { data, jumps, code })
    }

    /// Encodes the binary into its on-disk byte layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let data_size: usize = self.data.iter().map(|s| s.len() + 1).sum();
        let data = Section {
            start: HEADER_SIZE as u64,
            size: data_size as u64,
        };
        let jumps = Section {
            start: data.start + data.size,
            size: (self.jumps.len() * JUMP_ENTRY_SIZE) as u64,
        };
        let code = Section {
            start: jumps.start + jumps.size,
            size: (self.code.len() * WORD_SIZE) as u64,
        };
        let header = Header {
            header_size: HEADER_SIZE as u64,
            version: VERSION,
            min_version: MIN_VERSION,
            flags: 0,
            data,
            jumps,
            code,
            signature: SIGNATURE,
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + data_size + jumps.size as usize + code.size as usize);
        header.write(&mut out);
        for s in &self.data {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        for (hash, offset) in &self.jumps {
            out.extend_from_slice(&hash.to_le_bytes());
            out.extend_from_slice(&offset.to_le_bytes());
        }
        for word in &self.code {
            out.extend_from_slice(&word.to_le_bytes());
        }
        debug!(bytes = out.len(), "binary saved");
        out
    }

    /// Resolves a pool reference (pool index + 1, with 0 meaning empty).
    #[must_use]
    pub fn string(&self, reference: u64) -> Option<&str> {
        match reference {
            0 => Some(""),
            r => self.data.get(usize::try_from(r - 1).ok()?).map(String::as_str),
        }
    }

    /// Resolves a `(start, count)` pool range.
    #[must_use]
    pub fn pack(&self, start: u64, count: u64) -> Option<&[String]> {
        let start = usize::try_from(start).ok()?;
        let end = start.checked_add(usize::try_from(count).ok()?)?;
        self.data.get(start..end)
    }

    /// Word offset recorded for a label hash.
    #[must_use]
    pub fn label(&self, hash: u64) -> Option<usize> {
        self.jumps.get(&hash).and_then(|&o| usize::try_from(o).ok())
    }
}

/// Splits the data section on NUL bytes. A trailing unterminated fragment is kept.
fn decode_strings(bytes: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = bytes;
    while let Some(nul) = rest.iter().position(|&b| b == 0) {
        out.push(String::from_utf8_lossy(&rest[..nul]).into_owned());
        rest = &rest[nul + 1..];
    }
    if !rest.is_empty() {
        out.push(String::from_utf8_lossy(rest).into_owned());
    }
    out
}
