//! Instruction encoding shared by the assembler, the engine and the disassembler.

pub mod instr;
pub mod op;

pub use instr::{
    BranchSelector, CastChange, ColorValue, Decoded, Instruction, NamedValue, PoolRange, ValueRequest, decode,
    disassemble, resolve_sp,
};
pub use op::{InstrWord, JUMP_ENTRY_WORDS, OPERAND_WORDS, Opcode};
