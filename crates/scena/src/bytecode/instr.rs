//! Strongly-typed instructions decoded from the word stream.
//!
//! The SP mode of a word decides both the operand shape and the behavior of an
//! opcode. Decoding resolves that once into an [`Instruction`] variant so the
//! engine can dispatch exhaustively instead of re-testing mode bits.

use std::fmt::{self, Write};

use crate::{
    binary::Binary,
    bytecode::op::{
        BRANCH_EXPLICIT, BRANCH_RETURN_BIT, InstrWord, JUMP_SKIP, OPERAND_WORDS, Opcode, operand_from_words,
    },
    error::EngineError,
};

/// A `(start, count)` range of strings in the data pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolRange {
    pub start: u64,
    pub count: u64,
}

/// How an actor instruction changes the active cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastChange {
    /// Replace the cast with a single actor.
    Replace(u64),
    /// Add an actor to the cast.
    Append(u64),
    /// Empty the cast, returning to global dispatch.
    Clear,
    /// Empty the cast and switch to "everyone except" mode.
    ExcludeAll,
    /// Leave the cast as it is: an append of actor 0, or an unknown mode.
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorValue {
    /// `0xRRGGBBAA`.
    Literal(u64),
    /// Hash of a color name.
    Named(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedValue {
    /// Pool reference of a single value.
    Single(u64),
    Multiple(PoolRange),
}

/// Source of a branch-table selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSelector {
    /// The frame's scratch integer, clamped to the table.
    Scratch,
    /// A uniformly random entry.
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRequest {
    Int { name: u64 },
    IntClamped { name: u64, min: i64, max: i64 },
    Str { name: u64 },
    Choice { name: u64, options: PoolRange },
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    SetMode { sp: u8 },
    Next,
    Halt { ret: bool },
    Cast(CastChange),
    Line { text: u64, append: bool },
    Emotion { emotion: u64 },
    Action { action: u64, params: Option<PoolRange> },
    Color(ColorValue),
    Wait { ticks: u64 },
    Sync { asynchronous: bool },
    UserInput,
    NamedCall { name: u64, value: NamedValue },
    Jump { label: u64, returnable: bool },
    /// Moves within the current block; the block start stays where it was.
    Skip { label: u64 },
    Branch {
        range: u64,
        returnable: bool,
        selector: BranchSelector,
    },
    GetValue(ValueRequest),
    Invoke { label: u64, args: Option<PoolRange> },
}

/// An instruction together with the number of words it occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub instruction: Instruction,
    pub words: usize,
}

/// Resolves the SP mode for a dispatch of `word` given the pending override.
///
/// Actor words carry their own mode (replace/append/exclude), which wins over an
/// override; every other opcode takes the override when one is pending.
#[must_use]
pub fn resolve_sp(word: InstrWord, sp_override: u8) -> u8 {
    match word.opcode() {
        Some(Opcode::Actor) if word.sp() != 0 => word.sp(),
        Some(Opcode::NoOp) => word.sp(),
        _ if sp_override != 0 => sp_override,
        _ => word.sp(),
    }
}

struct Operands<'a> {
    code: &'a [u16],
    at: usize,
}

impl Operands<'_> {
    fn next(&mut self) -> Result<u64, EngineError> {
        let end = self.at + OPERAND_WORDS;
        let words = self.code.get(self.at..end).ok_or(EngineError::InvalidOperand)?;
        self.at = end;
        Ok(operand_from_words(words))
    }

    fn range(&mut self) -> Result<PoolRange, EngineError> {
        Ok(PoolRange {
            start: self.next()?,
            count: self.next()?,
        })
    }
}

/// Decodes the instruction at `ip` using SP mode `sp`.
///
/// # Errors
/// `InvalidOperation` for unknown opcode bits or an out-of-range `ip`,
/// `InvalidOperand` when operands run past the end of `code`.
pub fn decode(code: &[u16], ip: usize, sp: u8) -> Result<Decoded, EngineError> {
    let word = InstrWord::from(*code.get(ip).ok_or(EngineError::InvalidOperation)?);
    let op = word.opcode().ok_or(EngineError::InvalidOperation)?;
    let mut ops = Operands { code, at: ip + 1 };
    let instruction = match op {
        Opcode::NoOp => Instruction::SetMode { sp },
        Opcode::Next => Instruction::Next,
        Opcode::Halt => Instruction::Halt { ret: sp != 0 },
        Opcode::Actor if sp == 2 => Instruction::Cast(CastChange::ExcludeAll),
        Opcode::Actor => Instruction::Cast(match (sp, ops.next()?) {
            (0, 0) => CastChange::Clear,
            (0, id) => CastChange::Replace(id),
            (1, id) if id != 0 => CastChange::Append(id),
            _ => CastChange::Keep,
        }),
        Opcode::Line => Instruction::Line {
            text: ops.next()?,
            append: sp != 0,
        },
        Opcode::Emotion => Instruction::Emotion { emotion: ops.next()? },
        Opcode::Action => Instruction::Action {
            action: ops.next()?,
            params: if sp != 0 { Some(ops.range()?) } else { None },
        },
        Opcode::Color => {
            let value = ops.next()?;
            Instruction::Color(if sp != 0 {
                ColorValue::Named(value)
            } else {
                ColorValue::Literal(value)
            })
        }
        Opcode::Wait => Instruction::Wait { ticks: ops.next()? },
        Opcode::Sync => Instruction::Sync { asynchronous: sp != 0 },
        Opcode::UserInput => Instruction::UserInput,
        Opcode::NamedCall => {
            let name = ops.next()?;
            let value = if sp != 0 {
                NamedValue::Multiple(ops.range()?)
            } else {
                NamedValue::Single(ops.next()?)
            };
            Instruction::NamedCall { name, value }
        }
        Opcode::Jump if sp < 2 => Instruction::Jump {
            label: ops.next()?,
            returnable: sp == 1,
        },
        Opcode::Jump if sp == JUMP_SKIP => Instruction::Skip { label: ops.next()? },
        Opcode::Jump => Instruction::Branch {
            range: ops.next()?,
            returnable: sp & BRANCH_RETURN_BIT != 0,
            selector: if sp & !BRANCH_RETURN_BIT == BRANCH_EXPLICIT {
                BranchSelector::Scratch
            } else {
                BranchSelector::Random
            },
        },
        Opcode::GetValue => {
            let name = ops.next()?;
            Instruction::GetValue(match sp & 0b11 {
                0 => ValueRequest::Int { name },
                1 => ValueRequest::IntClamped {
                    name,
                    min: ops.next()?.cast_signed(),
                    max: ops.next()?.cast_signed(),
                },
                2 => ValueRequest::Str { name },
                _ => ValueRequest::Choice {
                    name,
                    options: ops.range()?,
                },
            })
        }
        Opcode::Invoke => Instruction::Invoke {
            label: ops.next()?,
            args: if sp != 0 { Some(ops.range()?) } else { None },
        },
    };
    Ok(Decoded {
        instruction,
        words: ops.at - ip,
    })
}

impl fmt::Display for PoolRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}; {}]", self.start, self.count)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetMode { sp } => write!(f, "no-op sp={sp}"),
            Self::Next => f.write_str("next"),
            Self::Halt { ret: true } => f.write_str("halt return"),
            Self::Halt { ret: false } => f.write_str("halt"),
            Self::Cast(CastChange::Replace(id)) => write!(f, "actor {id:#x}"),
            Self::Cast(CastChange::Append(id)) => write!(f, "actor + {id:#x}"),
            Self::Cast(CastChange::Clear) => f.write_str("actor clear"),
            Self::Cast(CastChange::ExcludeAll) => f.write_str("actor ..."),
            Self::Cast(CastChange::Keep) => f.write_str("actor (unchanged)"),
            Self::Line { text, append: false } => write!(f, "line @{text}"),
            Self::Line { text, append: true } => write!(f, "line + @{text}"),
            Self::Emotion { emotion } => write!(f, "emotion {emotion:#x}"),
            Self::Action { action, params: None } => write!(f, "action {action:#x}"),
            Self::Action {
                action,
                params: Some(p),
            } => write!(f, "action {action:#x} {p}"),
            Self::Color(ColorValue::Literal(rgba)) => write!(f, "color #{rgba:08X}"),
            Self::Color(ColorValue::Named(name)) => write!(f, "color ##{name:#x}"),
            Self::Wait { ticks } => write!(f, "wait {ticks}"),
            Self::Sync { asynchronous: false } => f.write_str("sync"),
            Self::Sync { asynchronous: true } => f.write_str("sync async"),
            Self::UserInput => f.write_str("user-input"),
            Self::NamedCall {
                name,
                value: NamedValue::Single(v),
            } => write!(f, "named-call {name:#x} @{v}"),
            Self::NamedCall {
                name,
                value: NamedValue::Multiple(p),
            } => write!(f, "named-call {name:#x} {p}"),
            Self::Jump { label, returnable } => {
                let kind = if *returnable { "perform" } else { "next" };
                write!(f, "jump {kind} {label:#x}")
            }
            Self::Skip { label } => write!(f, "jump skip {label:#x}"),
            Self::Branch {
                range,
                returnable,
                selector,
            } => {
                let kind = if *returnable { "perform" } else { "next" };
                let sel = match selector {
                    BranchSelector::Scratch => "choice",
                    BranchSelector::Random => "random",
                };
                write!(f, "branch {kind} {sel} x{range}")
            }
            Self::GetValue(ValueRequest::Int { name }) => write!(f, "get-value int {name:#x}"),
            Self::GetValue(ValueRequest::IntClamped { name, min, max }) => {
                write!(f, "get-value int {name:#x} {min}..={max}")
            }
            Self::GetValue(ValueRequest::Str { name }) => write!(f, "get-value string {name:#x}"),
            Self::GetValue(ValueRequest::Choice { name, options }) => {
                write!(f, "get-value choice {name:#x} {options}")
            }
            Self::Invoke { label, args: None } => write!(f, "invoke {label:#x}"),
            Self::Invoke { label, args: Some(a) } => write!(f, "invoke {label:#x} {a}"),
        }
    }
}

/// Renders a linear listing of `binary`, one instruction per line.
///
/// Label entry points are marked with their hash and pool references are shown
/// as trailing comments. Decoding stops at the first malformed instruction.
#[must_use]
pub fn disassemble(binary: &Binary) -> String {
    let mut out = String::new();
    let mut ip = 0;
    let mut pending = 0;
    while ip < binary.code.len() {
        for (hash, _) in binary.jumps.iter().filter(|(_, o)| **o == ip as u64) {
            let _ = writeln!(out, "{hash:#018x}:");
        }
        let word = InstrWord::from(binary.code[ip]);
        let sp = resolve_sp(word, pending);
        let decoded = match decode(&binary.code, ip, sp) {
            Ok(d) => d,
            Err(e) => {
                let _ = writeln!(out, "{ip:05}  <{e}: {:#06x}>", binary.code[ip]);
                break;
            }
        };
        let _ = write!(out, "{ip:05}  {}", decoded.instruction);
        annotate(&mut out, binary, &decoded.instruction);
        out.push('\n');
        match decoded.instruction {
            Instruction::Next => {}
            Instruction::SetMode { sp } => pending = sp,
            _ => pending = 0,
        }
        ip += decoded.words;
    }
    out
}

fn annotate(out: &mut String, binary: &Binary, instruction: &Instruction) {
    let pack = |range: &PoolRange| {
        binary.pack(range.start, range.count).map(|p| {
            let items: Vec<String> = p.iter().map(|s| format!("{s:?}")).collect();
            items.join(", ")
        })
    };
    let note = match instruction {
        Instruction::Line { text, .. }
        | Instruction::NamedCall {
            value: NamedValue::Single(text),
            ..
        } => binary.string(*text).map(|s| format!("{s:?}")),
        Instruction::Action { params: Some(p), .. }
        | Instruction::NamedCall {
            value: NamedValue::Multiple(p),
            ..
        }
        | Instruction::Invoke { args: Some(p), .. }
        | Instruction::GetValue(ValueRequest::Choice { options: p, .. }) => pack(p).map(|s| format!("({s})")),
        _ => None,
    };
    if let Some(note) = note {
        let _ = write!(out, "  ; {note}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::operand_words;

    fn with_operands(word: InstrWord, operands: &[u64]) -> Vec<u16> {
        let mut code = vec![u16::from(word)];
        for &o in operands {
            code.extend(operand_words(o));
        }
        code
    }

    #[test]
    fn actor_word_mode_wins_over_override() {
        assert_eq!(resolve_sp(InstrWord::new(Opcode::Actor, 2), 1), 2);
        assert_eq!(resolve_sp(InstrWord::new(Opcode::Actor, 0), 1), 1);
        assert_eq!(resolve_sp(InstrWord::new(Opcode::Line, 0), 1), 1);
        assert_eq!(resolve_sp(InstrWord::new(Opcode::NoOp, 0), 1), 0);
    }

    #[test]
    fn named_call_shapes() {
        let code = with_operands(InstrWord::new(Opcode::NamedCall, 0), &[7, 2]);
        let d = decode(&code, 0, 0).unwrap();
        assert_eq!(
            d.instruction,
            Instruction::NamedCall {
                name: 7,
                value: NamedValue::Single(2)
            }
        );
        assert_eq!(d.words, 9);

        let code = with_operands(InstrWord::new(Opcode::NamedCall, 1), &[7, 3, 2]);
        let d = decode(&code, 0, 1).unwrap();
        assert_eq!(
            d.instruction,
            Instruction::NamedCall {
                name: 7,
                value: NamedValue::Multiple(PoolRange { start: 3, count: 2 })
            }
        );
    }

    #[test]
    fn branch_modes() {
        let code = with_operands(InstrWord::new(Opcode::Jump, 0b1010), &[3]);
        let d = decode(&code, 0, 0b1010).unwrap();
        assert_eq!(
            d.instruction,
            Instruction::Branch {
                range: 3,
                returnable: true,
                selector: BranchSelector::Scratch
            }
        );
        let d = decode(&code, 0, 3).unwrap();
        assert!(matches!(
            d.instruction,
            Instruction::Branch {
                returnable: false,
                selector: BranchSelector::Random,
                ..
            }
        ));
    }

    #[test]
    fn skip_mode_is_not_a_branch() {
        let code = with_operands(InstrWord::new(Opcode::Jump, JUMP_SKIP), &[9]);
        assert_eq!(
            decode(&code, 0, JUMP_SKIP).unwrap().instruction,
            Instruction::Skip { label: 9 }
        );
    }

    #[test]
    fn malformed_actor_words_keep_the_cast() {
        let code = with_operands(InstrWord::new(Opcode::Actor, 1), &[0]);
        let d = decode(&code, 0, 1).unwrap();
        assert_eq!(d.instruction, Instruction::Cast(CastChange::Keep));
        assert_eq!(d.words, 5);

        let code = with_operands(InstrWord::new(Opcode::Actor, 5), &[7]);
        assert_eq!(
            decode(&code, 0, 5).unwrap().instruction,
            Instruction::Cast(CastChange::Keep)
        );
        let code = with_operands(InstrWord::new(Opcode::Actor, 1), &[7]);
        assert_eq!(
            decode(&code, 0, 1).unwrap().instruction,
            Instruction::Cast(CastChange::Append(7))
        );
    }

    #[test]
    fn truncated_operand() {
        let code = vec![u16::from(InstrWord::new(Opcode::Wait, 0)), 1, 0];
        assert_eq!(decode(&code, 0, 0), Err(EngineError::InvalidOperand));
    }

    #[test]
    fn unknown_opcode() {
        assert_eq!(decode(&[0x0123], 0, 0), Err(EngineError::InvalidOperation));
    }
}
