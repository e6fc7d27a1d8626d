//! Lays out operation tokens as instruction words, a string pool and a jump table.

use ahash::AHashMap;

use crate::{
    binary::Binary,
    bytecode::{
        InstrWord, Opcode,
        op::{JUMP_SKIP, operand_words},
    },
    compile::{ROOT_LABEL, tree::OpToken},
    error::CompileError,
    hash::name_hash,
};

struct Assembler {
    binary: Binary,
    /// Interned string to pool reference.
    strings: AHashMap<String, u64>,
    /// Label hash to the path that defined it.
    labels: AHashMap<u64, String>,
    /// Jump targets to verify once every label is known.
    targets: Vec<(u64, String, usize)>,
}

/// Assembles `ops` into a binary, appending a final `halt`.
///
/// # Errors
/// Fails on duplicate labels and on jumps to labels that were never defined.
pub fn assemble(ops: &[OpToken]) -> Result<Binary, CompileError> {
    let mut asm = Assembler {
        binary: Binary::default(),
        strings: AHashMap::new(),
        labels: AHashMap::new(),
        targets: Vec::new(),
    };
    for (reference, text) in asm.binary.data.iter().enumerate() {
        asm.strings.insert(text.clone(), reference as u64 + 1);
    }
    asm.define(ROOT_LABEL, 0)?;
    for op in ops {
        asm.emit(op)?;
    }
    asm.word(Opcode::Halt, 0);
    asm.verify()?;
    Ok(asm.binary)
}

impl Assembler {
    fn define(&mut self, label: &str, offset: usize) -> Result<(), CompileError> {
        let hash = name_hash(label);
        if let Some(existing) = self.labels.get(&hash) {
            let message = if existing == label {
                format!("Block '{label}' is defined more than once")
            } else {
                format!("Label '{label}' collides with '{existing}'")
            };
            return Err(CompileError::failed(message, label, offset));
        }
        self.labels.insert(hash, label.to_owned());
        self.binary.jumps.insert(hash, self.binary.code.len() as u64);
        Ok(())
    }

    fn word(&mut self, op: Opcode, mode: u8) {
        self.binary.code.push(InstrWord::new(op, mode).into());
    }

    fn operand(&mut self, value: u64) {
        self.binary.code.extend(operand_words(value));
    }

    fn intern(&mut self, text: &str) -> u64 {
        if let Some(&reference) = self.strings.get(text) {
            return reference;
        }
        self.binary.data.push(text.to_owned());
        let reference = self.binary.data.len() as u64;
        self.strings.insert(text.to_owned(), reference);
        reference
    }

    /// Appends `pack` contiguously to the pool and emits its `(start, count)`.
    fn pack(&mut self, pack: &[String]) {
        let start = self.binary.data.len() as u64;
        self.binary.data.extend(pack.iter().cloned());
        self.operand(start);
        self.operand(pack.len() as u64);
    }

    fn target(&mut self, path: &str, offset: usize) {
        let hash = name_hash(path);
        self.operand(hash);
        self.targets.push((hash, path.to_owned(), offset));
    }

    fn emit(&mut self, op: &OpToken) -> Result<(), CompileError> {
        if let Some(label) = &op.entry {
            self.define(label, op.offset)?;
        }
        match op.op {
            Opcode::NoOp | Opcode::Next | Opcode::Halt | Opcode::Sync | Opcode::UserInput => {
                self.word(op.op, op.mode);
            }
            Opcode::Actor => {
                self.word(op.op, op.mode);
                match op.mode {
                    2 => {}
                    _ if op.name.is_empty() => self.operand(0),
                    _ => self.operand(name_hash(&op.name)),
                }
            }
            Opcode::Line => {
                self.word(op.op, op.mode);
                let reference = self.intern(&op.name);
                self.operand(reference);
            }
            Opcode::Emotion => {
                self.word(op.op, op.mode);
                self.operand(name_hash(&op.name));
            }
            Opcode::Action => {
                let has_params = !op.pack.is_empty();
                self.word(op.op, u8::from(has_params));
                self.operand(name_hash(&op.name));
                if has_params {
                    self.pack(&op.pack);
                }
            }
            Opcode::Color => {
                self.word(op.op, op.mode);
                let value = if op.mode == 0 { op.value } else { name_hash(&op.name) };
                self.operand(value);
            }
            Opcode::Wait => {
                self.word(op.op, op.mode);
                self.operand(op.value);
            }
            Opcode::NamedCall => self.named_call(op),
            Opcode::Jump if op.mode < 2 || op.mode == JUMP_SKIP => {
                self.word(op.op, op.mode);
                self.target(&op.name, op.offset);
            }
            Opcode::Jump => {
                self.word(op.op, op.mode);
                self.operand(op.range);
            }
            Opcode::GetValue => {
                self.word(op.op, op.mode);
                self.operand(name_hash(&op.name));
                match op.mode & 0b11 {
                    1 => {
                        self.operand(op.value);
                        self.operand(op.range);
                    }
                    3 => self.pack(&op.pack),
                    _ => {}
                }
            }
            Opcode::Invoke => {
                let has_args = !op.pack.is_empty();
                self.word(op.op, u8::from(has_args));
                self.target(&op.name, op.offset);
                if has_args {
                    self.pack(&op.pack);
                }
            }
        }
        Ok(())
    }

    fn named_call(&mut self, op: &OpToken) {
        match op.pack.as_slice() {
            [] => {
                self.word(op.op, 0);
                self.operand(name_hash(&op.name));
                self.operand(op.value);
            }
            [single] => {
                self.word(op.op, 0);
                self.operand(name_hash(&op.name));
                let reference = self.intern(single);
                self.operand(reference);
            }
            many => {
                self.word(op.op, 1);
                self.operand(name_hash(&op.name));
                self.pack(many);
            }
        }
    }

    fn verify(&self) -> Result<(), CompileError> {
        match self.targets.iter().find(|(hash, ..)| !self.binary.jumps.contains_key(hash)) {
            Some((_, path, offset)) => Err(CompileError::invalid(
                format!("Jump target '{path}' does not exist"),
                path,
                *offset,
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{Instruction, NamedValue, decode},
        compile::{lexer::tokenize, tree::build},
    };

    fn asm(source: &str) -> Result<Binary, CompileError> {
        assemble(&build(&tokenize(source).unwrap()).unwrap())
    }

    #[test]
    fn interns_repeated_lines() {
        let b = asm(r#""a" "a" "b""#).unwrap();
        assert_eq!(b.data, ["false", "true", "a", "b"]);
        assert_eq!(b.label(name_hash(ROOT_LABEL)), Some(0));
        assert_eq!(b.code.len(), 3 * 5 + 1);
    }

    #[test]
    fn boolean_named_calls_use_reserved_literals() {
        let b = asm("+flag -flag").unwrap();
        let first = decode(&b.code, 0, 0).unwrap().instruction;
        assert_eq!(
            first,
            Instruction::NamedCall {
                name: name_hash("flag"),
                value: NamedValue::Single(2)
            }
        );
        assert_eq!(b.string(2), Some("true"));
        assert_eq!(b.string(1), Some("false"));
    }

    #[test]
    fn undefined_target_fails() {
        let err = asm(":next nowhere").unwrap_err();
        assert!(err.message.contains("nowhere"), "got: {}", err.message);
    }

    #[test]
    fn duplicate_blocks_fail() {
        let err = asm(":act a { } :act a { }").unwrap_err();
        assert!(err.message.contains("more than once"), "got: {}", err.message);
    }
}
