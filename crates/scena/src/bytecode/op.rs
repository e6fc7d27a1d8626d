//! Opcode definitions and instruction-word layout.
//!
//! Bytecode is stored as raw `Vec<u16>`. Every instruction starts with one word:
//! the low 12 bits select the [`Opcode`], the high 4 bits carry the SP mode that
//! reshapes the opcode's operands and behavior for that single dispatch.
//!
//! # Operand Encoding
//!
//! Every operand is a `u64` stored as four little-endian words, so an instruction
//! occupies `1 + 4 * n` words. The operand count depends on opcode and SP mode:
//!
//! - 0 operands: `NoOp`, `Next`, `Halt`, `Sync`, `UserInput`, `Actor` (sp 2)
//! - 1 operand: `Line`, `Emotion`, `Color`, `Wait`, `Actor` (sp 0/1), `Jump` (sp 0/1/4, label
//!   hash; other sp, branch range), `GetValue` (sp 0/2), `Action` (sp 0), `Invoke` (sp 0)
//! - 2 operands: `NamedCall` (sp 0)
//! - 3 operands: `Action` (sp 1), `NamedCall` (sp 1), `GetValue` (sp 1/3), `Invoke` (sp 1)

use strum::{FromRepr, IntoStaticStr};

/// Mask selecting the opcode bits of an instruction word.
pub const OPERATION_MASK: u16 = 0x0FFF;
/// Mask selecting the SP-mode bits of an instruction word.
pub const SP_FLAG_MASK: u16 = 0xF000;
/// Words per 64-bit operand.
pub const OPERAND_WORDS: usize = 4;
/// Words per branch-table entry: one jump word and its label operand.
pub const JUMP_ENTRY_WORDS: usize = 1 + OPERAND_WORDS;

/// Operation selector stored in the low 12 bits of an instruction word.
#[repr(u16)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Opcode {
    /// Stores its SP mode as the override for the next dispatch.
    #[default]
    NoOp = 0,
    /// Pass-through word; skipped without consuming a step.
    Next = 1,
    /// Ends the program, or returns to the caller frame when sp is set.
    Halt = 2,
    /// Changes the active actor cast. Operand: actor hash (absent for sp 2).
    Actor = 3,
    /// Says or appends a line. Operand: pool reference.
    Line = 4,
    /// Operand: emotion hash.
    Emotion = 5,
    /// Operands: action hash, then `(start, count)` when sp is 1.
    Action = 6,
    /// Operand: RGBA literal, or color-name hash when sp is 1.
    Color = 7,
    /// Operand: tick count.
    Wait = 8,
    /// Waits for actions; asynchronous when sp is 1.
    Sync = 9,
    /// Waits for the user.
    UserInput = 10,
    /// Operands: name hash plus a pool reference, or `(start, count)` when sp is 1.
    NamedCall = 11,
    /// Label jump (sp 0/1), skip (sp 4) or branch table (other sp).
    Jump = 12,
    /// Requests an integer, string or choice from the host.
    GetValue = 13,
    /// Calls a function block. Operands: label hash, then `(start, count)` when sp is 1.
    Invoke = 14,
}

impl Opcode {
    /// Mnemonic used by the disassembler.
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }
}

/// Jump SP mode for skipping over code inside the current block: moves the
/// instruction pointer without changing where the block starts.
pub const JUMP_SKIP: u8 = 4;
/// Bit set in a branch-table SP mode when the selected block should return.
pub const BRANCH_RETURN_BIT: u8 = 0b1000;
/// Low SP bits selecting an explicit (scratch integer) branch selector.
pub const BRANCH_EXPLICIT: u8 = 2;
/// Low SP bits selecting a random branch selector.
pub const BRANCH_RANDOM: u8 = 3;

/// A single instruction word: opcode plus SP mode.
///
/// Should be completely transparent and removed at compile time.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InstrWord(u16);

impl InstrWord {
    /// Packs an opcode with an SP mode. Only the low nibble of `sp` is kept.
    #[must_use]
    pub const fn new(op: Opcode, sp: u8) -> Self {
        Self((op as u16 & OPERATION_MASK) | (((sp & 0xF) as u16) << 12))
    }

    /// Raw opcode bits, which may not name a known [`Opcode`].
    #[must_use]
    pub const fn op_bits(self) -> u16 {
        self.0 & OPERATION_MASK
    }

    #[must_use]
    pub fn opcode(self) -> Option<Opcode> {
        Opcode::from_repr(self.op_bits())
    }

    /// SP mode carried by the word itself.
    #[must_use]
    pub const fn sp(self) -> u8 {
        ((self.0 & SP_FLAG_MASK) >> 12) as u8
    }
}

impl From<u16> for InstrWord {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<InstrWord> for u16 {
    fn from(value: InstrWord) -> Self {
        value.0
    }
}

/// Splits a 64-bit operand into its four little-endian words.
#[must_use]
pub const fn operand_words(value: u64) -> [u16; OPERAND_WORDS] {
    [
        value as u16,
        (value >> 16) as u16,
        (value >> 32) as u16,
        (value >> 48) as u16,
    ]
}

/// Reassembles a 64-bit operand from four little-endian words.
#[must_use]
pub fn operand_from_words(words: &[u16]) -> u64 {
    words
        .iter()
        .take(OPERAND_WORDS)
        .enumerate()
        .fold(0, |acc, (i, &w)| acc | (u64::from(w) << (16 * i)))
}
