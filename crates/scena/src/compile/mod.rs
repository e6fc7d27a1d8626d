//! Source-to-binary compilation.
//!
//! Compilation runs in three passes: [`lexer::tokenize`] splits the source,
//! [`tree::build`] turns statements into operation tokens and checks names,
//! scopes and calls, and [`assembler::assemble`] lays out the binary and
//! verifies that every jump lands on a label.

pub mod assembler;
pub mod lexer;
pub mod pack;
pub mod scope;
pub mod tree;

use tracing::debug;

use crate::{binary::Binary, error::CompileError};

/// Label recorded at word offset 0, the target of a top-level `:repeat`.
pub const ROOT_LABEL: &str = "[root]";

/// Compiles script `source` into a [`Binary`].
///
/// # Errors
/// Returns the first [`CompileError`], with its line and column resolved.
pub fn compile(source: &str) -> Result<Binary, CompileError> {
    let run = || {
        let tokens = lexer::tokenize(source)?;
        let ops = tree::build(&tokens)?;
        assembler::assemble(&ops)
    };
    let binary = run().map_err(|e| e.locate(source))?;
    debug!(
        strings = binary.data.len(),
        labels = binary.jumps.len(),
        words = binary.code.len(),
        "compiled script"
    );
    Ok(binary)
}
