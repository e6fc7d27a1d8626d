//! Error types for loading, compiling and running scripts.
//!
//! Load and compile failures are returned as values and leave nothing behind.
//! Engine failures are recorded on the engine as an [`EngineError`] code and stop
//! further stepping; they are never thrown out of a host update.

use std::fmt;

use thiserror::Error;

/// A binary buffer was rejected by [`Binary::load`](crate::Binary::load).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("failed to load binary: file size is too small ({size} bytes, need at least {needed})")]
    TooSmall { size: usize, needed: u64 },
    #[error("failed to load binary: declared header size {declared} is smaller than the {expected} byte header")]
    HeaderTruncated { declared: u64, expected: usize },
    #[error("failed to load binary: declared header size {declared} is larger than the {expected} byte header")]
    HeaderTooLarge { declared: u64, expected: usize },
    #[error("failed to load binary: requires format version {min_version}, this loader supports {supported}")]
    UnsupportedVersion { min_version: u64, supported: u64 },
    #[error("failed to load binary: {section} section at {start}+{size} exceeds file size {file_size}")]
    SectionOutOfBounds {
        section: &'static str,
        start: u64,
        size: u64,
        file_size: usize,
    },
    #[error("failed to load binary: file format mismatch")]
    SignatureMismatch,
    #[error("failed to load binary: jump table size {size} is not a multiple of {width}")]
    MalformedJumpTable { size: u64, width: usize },
    #[error("failed to load binary: code size {size} is empty or not a multiple of {width}")]
    MalformedCode { size: u64, width: usize },
    #[error("failed to load binary: label {hash:#018x} points at word {offset}, past the {code_len} word code section")]
    JumpOutOfBounds { hash: u64, offset: u64, code_len: usize },
}

/// Broad class of a compile failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// A token, name, argument or literal is not acceptable where it appears.
    InvalidValue,
    /// A construct could not be completed: unterminated blocks, lexing failures, label clashes.
    FailedAction,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue => f.write_str("invalid value"),
            Self::FailedAction => f.write_str("failed action"),
        }
    }
}

/// A script failed to compile. Compilation stops at the first error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message} (line {line}, column {column}, near `{fragment}`)")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    /// Source text of the offending token.
    pub fragment: String,
    /// Byte offset of the fragment in the source.
    pub offset: usize,
    /// 1-based line, filled in by [`CompileError::locate`].
    pub line: usize,
    /// 1-based column in characters.
    pub column: usize,
}

impl CompileError {
    pub(crate) fn new(kind: CompileErrorKind, message: impl Into<String>, fragment: &str, offset: usize) -> Self {
        Self {
            kind,
            message: message.into(),
            fragment: fragment.to_owned(),
            offset,
            line: 0,
            column: 0,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>, fragment: &str, offset: usize) -> Self {
        Self::new(CompileErrorKind::InvalidValue, message, fragment, offset)
    }

    pub(crate) fn failed(message: impl Into<String>, fragment: &str, offset: usize) -> Self {
        Self::new(CompileErrorKind::FailedAction, message, fragment, offset)
    }

    /// Resolves `offset` into a line and column within `source`.
    #[must_use]
    pub fn locate(mut self, source: &str) -> Self {
        let offset = self.offset.min(source.len());
        let before = source.get(..offset).unwrap_or(source);
        self.line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        self.column = before[line_start..].chars().count() + 1;
        self
    }
}

/// Run-time failure code reported by [`Engine::error`](crate::Engine::error).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid operation")]
    InvalidOperation,
    #[error("operand read past end of code")]
    InvalidOperand,
    #[error("unresolved or out-of-bounds jump")]
    InvalidJump,
    #[error("malformed function argument reference")]
    MalformedArgument,
    #[error("missing function argument")]
    MissingArgument,
    #[error("invalid value")]
    InvalidValue,
    #[error("implementation error")]
    ImplementationError,
}
