//! The stepping stack machine.
//!
//! An [`Engine`] runs one [`Binary`] at a time. The host calls
//! [`Engine::process`] once per step; each call executes exactly one effective
//! instruction (runs of `next` words are skipped for free) and reports effects
//! through a [`Hooks`] implementation. Execution never blocks: waiting is the
//! host's business, signalled through the hooks.

use std::{mem, sync::Arc};

use tracing::{debug, trace, warn};

use crate::{
    binary::Binary,
    bytecode::{
        BranchSelector, CastChange, ColorValue, InstrWord, Instruction, JUMP_ENTRY_WORDS, NamedValue, Opcode,
        PoolRange, ValueRequest, decode, resolve_sp,
    },
    error::EngineError,
    rng::RngStream,
};

/// Starts a single function-argument reference: `\u{1A}<hex id>@<index>`.
pub const SUBSTITUTE_MARKER: char = '\u{1A}';
/// Starts an interpolated string whose references are delimited by [`SUBSTITUTE_MARKER`].
pub const INTERPOLATE_MARKER: char = '\u{02}';

/// Builds the reference text for argument `index` of function `id`.
#[must_use]
pub fn argument_reference(id: u64, index: usize) -> String {
    format!("{SUBSTITUTE_MARKER}{id:x}@{index}")
}

/// Lifecycle of an [`Engine`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineState {
    /// A program may be loaded but has not been started.
    #[default]
    Ready,
    Running,
    /// Stepping stopped on an [`EngineError`].
    Error,
    Finished,
}

/// The actors the next instructions apply to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveCast {
    pub actors: Vec<u64>,
    /// When set, instructions apply to everyone except `actors`.
    pub exclude: bool,
}

impl ActiveCast {
    /// True when no cast is selected and effects go to global handlers.
    #[must_use]
    pub fn is_global(&self) -> bool {
        !self.exclude && self.actors.is_empty()
    }
}

/// A saved execution context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub cast: ActiveCast,
    pub sp_override: u8,
    /// Word offset this frame was entered at.
    pub block_start: usize,
    pub ip: usize,
    /// Returning from this frame also pops a [`FunctionFrame`].
    pub in_function: bool,
    pub scratch_int: i64,
    pub scratch_string: String,
}

impl Frame {
    fn at(ip: usize) -> Self {
        Self {
            block_start: ip,
            ip,
            ..Self::default()
        }
    }
}

/// Arguments captured by an `invoke`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionFrame {
    /// Label hash of the invoked function.
    pub id: u64,
    pub args: Vec<String>,
}

/// Host-side effects of a running program.
///
/// Every hook defaults to doing nothing; value requests default to `0`, an
/// empty string and a deferred choice respectively.
pub trait Hooks {
    fn say(&mut self, _cast: &ActiveCast, _line: &str) {}
    fn add(&mut self, _cast: &ActiveCast, _line: &str) {}
    fn emote(&mut self, _cast: &ActiveCast, _emotion: u64) {}
    fn perform(&mut self, _cast: &ActiveCast, _action: u64, _params: &[String]) {}
    /// `rgba` is `0xRRGGBBAA`.
    fn color(&mut self, _cast: &ActiveCast, _rgba: u64) {}
    fn color_ref(&mut self, _cast: &ActiveCast, _name: u64) {}
    fn delay(&mut self, _ticks: u64) {}
    fn wait_for_actions(&mut self, _asynchronous: bool) {}
    fn wait_for_user(&mut self) {}
    fn named_call_single(&mut self, _name: u64, _value: &str) {}
    fn named_call_multiple(&mut self, _name: u64, _values: &[String]) {}
    fn get_int(&mut self, _name: u64) -> i64 {
        0
    }
    fn get_string(&mut self, _name: u64) -> String {
        String::new()
    }
    /// Returns the selected option, or `None` when the answer arrives later
    /// through [`Engine::set_scratch_int`].
    fn get_choice(&mut self, _name: u64, _options: &[String]) -> Option<i64> {
        None
    }
}

/// Hooks that ignore every effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}

/// Stack machine executing one [`Binary`].
#[derive(Debug, Clone, Default)]
pub struct Engine {
    program: Option<Arc<Binary>>,
    state: EngineState,
    error: Option<EngineError>,
    current: Frame,
    stack: Vec<Frame>,
    functions: Vec<FunctionFrame>,
    rng: RngStream,
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine whose random branches replay identically for `seed`.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: RngStream::new(seed),
            ..Self::default()
        }
    }

    /// Replaces the program, force-finishing any run in progress.
    pub fn load(&mut self, binary: impl Into<Arc<Binary>>) {
        self.stop();
        self.program = Some(binary.into());
        self.state = EngineState::Ready;
        self.error = None;
    }

    /// Starts the loaded program from its first word.
    ///
    /// Does nothing when no program is loaded.
    pub fn start(&mut self) {
        let Some(program) = &self.program else {
            return;
        };
        debug!(words = program.code.len(), "engine started");
        self.reset_frames();
        self.error = None;
        self.state = EngineState::Running;
    }

    /// Finishes the current run and discards all frames.
    pub fn stop(&mut self) {
        if self.state == EngineState::Running {
            debug!(ip = self.current.ip, "engine stopped");
            self.state = EngineState::Finished;
        }
        self.reset_frames();
    }

    fn reset_frames(&mut self) {
        self.current = Frame::default();
        self.stack.clear();
        self.functions.clear();
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    #[must_use]
    pub fn error(&self) -> Option<EngineError> {
        self.error
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state == EngineState::Finished
    }

    #[must_use]
    pub fn binary(&self) -> Option<&Binary> {
        self.program.as_deref()
    }

    /// The frame currently executing.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.current
    }

    /// Number of frames waiting to be returned to.
    #[must_use]
    pub fn call_depth(&self) -> usize {
        self.stack.len()
    }

    #[must_use]
    pub fn functions(&self) -> &[FunctionFrame] {
        &self.functions
    }

    #[must_use]
    pub fn scratch_int(&self) -> i64 {
        self.current.scratch_int
    }

    /// Supplies an integer answer, typically a deferred choice.
    pub fn set_scratch_int(&mut self, value: i64) {
        self.current.scratch_int = value;
    }

    #[must_use]
    pub fn scratch_string(&self) -> &str {
        &self.current.scratch_string
    }

    /// Stops stepping with `error`.
    pub fn raise(&mut self, error: EngineError) {
        warn!(%error, ip = self.current.ip, "engine error");
        self.error = Some(error);
        self.state = EngineState::Error;
    }

    /// Leaves the current block: returns to the caller frame, or finishes the
    /// program when there is none.
    pub fn force_block_exit(&mut self) {
        if !self.is_running() {
            return;
        }
        if self.stack.is_empty() {
            self.finish();
        } else {
            self.return_to_caller();
        }
    }

    /// Restarts the current block from the offset it was entered at.
    pub fn jump_to_block_start(&mut self) {
        self.current.ip = self.current.block_start;
        self.current.sp_override = 0;
    }

    /// Executes one effective instruction.
    pub fn process(&mut self, hooks: &mut impl Hooks) {
        if self.state != EngineState::Running {
            return;
        }
        let Some(program) = self.program.clone() else {
            return self.raise(EngineError::ImplementationError);
        };
        let code = &program.code;
        while code
            .get(self.current.ip)
            .is_some_and(|&w| InstrWord::from(w).opcode() == Some(Opcode::Next))
        {
            self.current.ip += 1;
        }
        let Some(&word) = code.get(self.current.ip) else {
            return self.finish();
        };
        let sp = resolve_sp(InstrWord::from(word), mem::take(&mut self.current.sp_override));
        let decoded = match decode(code, self.current.ip, sp) {
            Ok(decoded) => decoded,
            Err(error) => return self.raise(error),
        };
        trace!(ip = self.current.ip, instruction = %decoded.instruction, "dispatch");
        self.current.ip += decoded.words;
        if let Err(error) = self.execute(&program, decoded.instruction, hooks) {
            self.raise(error);
        }
    }

    fn execute(&mut self, program: &Binary, instruction: Instruction, hooks: &mut impl Hooks) -> Result<(), EngineError> {
        match instruction {
            Instruction::SetMode { sp } => self.current.sp_override = sp,
            Instruction::Next => {}
            Instruction::Halt { ret } => {
                if ret && !self.stack.is_empty() {
                    self.return_to_caller();
                } else {
                    self.finish();
                }
            }
            Instruction::Cast(change) => {
                let cast = &mut self.current.cast;
                match change {
                    CastChange::Replace(id) => {
                        cast.actors.clear();
                        cast.actors.push(id);
                        cast.exclude = false;
                    }
                    CastChange::Append(id) => cast.actors.push(id),
                    CastChange::Clear => *cast = ActiveCast::default(),
                    CastChange::ExcludeAll => {
                        cast.actors.clear();
                        cast.exclude = true;
                    }
                    CastChange::Keep => {}
                }
            }
            Instruction::Line { text, append } => {
                let line = self.text(program, text)?;
                if append {
                    hooks.add(&self.current.cast, &line);
                } else {
                    hooks.say(&self.current.cast, &line);
                }
            }
            Instruction::Emotion { emotion } => hooks.emote(&self.current.cast, emotion),
            Instruction::Action { action, params } => {
                let params = match params {
                    Some(range) => self.pack(program, range)?,
                    None => Vec::new(),
                };
                hooks.perform(&self.current.cast, action, &params);
            }
            Instruction::Color(ColorValue::Literal(rgba)) => hooks.color(&self.current.cast, rgba),
            Instruction::Color(ColorValue::Named(name)) => hooks.color_ref(&self.current.cast, name),
            Instruction::Wait { ticks } => hooks.delay(ticks),
            Instruction::Sync { asynchronous } => hooks.wait_for_actions(asynchronous),
            Instruction::UserInput => hooks.wait_for_user(),
            Instruction::NamedCall {
                name,
                value: NamedValue::Single(reference),
            } => {
                let value = self.text(program, reference)?;
                hooks.named_call_single(name, &value);
            }
            Instruction::NamedCall {
                name,
                value: NamedValue::Multiple(range),
            } => {
                let values = self.pack(program, range)?;
                hooks.named_call_multiple(name, &values);
            }
            Instruction::Jump { label, returnable } => self.jump_to(program, label, returnable)?,
            Instruction::Skip { label } => self.current.ip = Self::target(program, label)?,
            Instruction::Branch {
                range,
                returnable,
                selector,
            } => self.branch(program, range, returnable, selector)?,
            Instruction::GetValue(request) => self.get_value(program, request, hooks)?,
            Instruction::Invoke { label, args } => {
                let args = match args {
                    Some(range) => self.pack(program, range)?,
                    None => Vec::new(),
                };
                self.functions.push(FunctionFrame { id: label, args });
                self.jump_to(program, label, true)?;
                self.current.in_function = true;
            }
        }
        Ok(())
    }

    fn get_value(&mut self, program: &Binary, request: ValueRequest, hooks: &mut impl Hooks) -> Result<(), EngineError> {
        match request {
            ValueRequest::Int { name } => self.current.scratch_int = hooks.get_int(name),
            ValueRequest::IntClamped { name, min, max } => {
                if min > max {
                    return Err(EngineError::InvalidValue);
                }
                self.current.scratch_int = hooks.get_int(name).clamp(min, max);
            }
            ValueRequest::Str { name } => self.current.scratch_string = hooks.get_string(name),
            ValueRequest::Choice { name, options } => {
                let options = self.pack(program, options)?;
                if let Some(choice) = hooks.get_choice(name, &options) {
                    self.current.scratch_int = choice;
                }
            }
        }
        Ok(())
    }

    /// Selects one of the `range` jump entries that follow, optionally returning
    /// past the whole table afterwards.
    fn branch(
        &mut self,
        program: &Binary,
        range: u64,
        returnable: bool,
        selector: BranchSelector,
    ) -> Result<(), EngineError> {
        if range == 0 {
            return Err(EngineError::InvalidValue);
        }
        let selected = match selector {
            BranchSelector::Scratch => {
                let last = i64::try_from(range - 1).unwrap_or(i64::MAX);
                self.current.scratch_int.clamp(0, last).cast_unsigned()
            }
            BranchSelector::Random => self.rng.below(range),
        };
        let table = self.current.ip;
        let entry = |n: u64| {
            usize::try_from(n)
                .ok()
                .and_then(|n| n.checked_mul(JUMP_ENTRY_WORDS))
                .and_then(|offset| table.checked_add(offset))
        };
        let (Some(target), Some(after)) = (entry(selected), entry(range)) else {
            return Err(EngineError::InvalidJump);
        };
        if after > program.code.len() {
            return Err(EngineError::InvalidJump);
        }
        trace!(range, selected, returnable, "branch");
        if returnable {
            self.push_frame(after, target);
        } else {
            self.current.ip = target;
        }
        Ok(())
    }

    fn target(program: &Binary, label: u64) -> Result<usize, EngineError> {
        program
            .label(label)
            .filter(|&offset| offset < program.code.len())
            .ok_or(EngineError::InvalidJump)
    }

    /// Enters the block at `label`, in a new frame when `returnable`.
    fn jump_to(&mut self, program: &Binary, label: u64, returnable: bool) -> Result<(), EngineError> {
        let target = Self::target(program, label)?;
        if returnable {
            self.push_frame(self.current.ip, target);
        } else {
            self.current.ip = target;
            self.current.block_start = target;
        }
        Ok(())
    }

    /// Saves the current frame to resume at `return_ip` and enters a fresh frame at `target`.
    fn push_frame(&mut self, return_ip: usize, target: usize) {
        let mut caller = mem::replace(&mut self.current, Frame::at(target));
        caller.ip = return_ip;
        self.stack.push(caller);
    }

    fn return_to_caller(&mut self) {
        let Some(caller) = self.stack.pop() else {
            return self.finish();
        };
        let callee = mem::replace(&mut self.current, caller);
        if callee.in_function {
            self.functions.pop();
        }
    }

    fn finish(&mut self) {
        debug!(ip = self.current.ip, "engine finished");
        self.state = EngineState::Finished;
    }

    fn text(&self, program: &Binary, reference: u64) -> Result<String, EngineError> {
        let raw = program.string(reference).ok_or(EngineError::InvalidValue)?;
        self.substitute(raw)
    }

    fn pack(&self, program: &Binary, range: PoolRange) -> Result<Vec<String>, EngineError> {
        program
            .pack(range.start, range.count)
            .ok_or(EngineError::InvalidValue)?
            .iter()
            .map(|s| self.substitute(s))
            .collect()
    }

    /// Replaces function-argument references in `text` with captured values.
    fn substitute(&self, text: &str) -> Result<String, EngineError> {
        if let Some(rest) = text.strip_prefix(INTERPOLATE_MARKER) {
            let mut out = String::with_capacity(rest.len());
            for (i, part) in rest.split(SUBSTITUTE_MARKER).enumerate() {
                if i % 2 == 1 {
                    out.push_str(self.argument(part)?);
                } else {
                    out.push_str(part);
                }
            }
            Ok(out)
        } else if let Some(reference) = text.strip_prefix(SUBSTITUTE_MARKER) {
            self.argument(reference).map(str::to_owned)
        } else {
            Ok(text.to_owned())
        }
    }

    /// Looks up `<hex id>@<index>` in the innermost function frame with that id.
    fn argument(&self, reference: &str) -> Result<&str, EngineError> {
        let (id, index) = reference.split_once('@').ok_or(EngineError::MalformedArgument)?;
        let id = u64::from_str_radix(id, 16).map_err(|_| EngineError::MalformedArgument)?;
        let index: usize = index.parse().map_err(|_| EngineError::MalformedArgument)?;
        self.functions
            .iter()
            .rev()
            .find(|f| f.id == id)
            .and_then(|f| f.args.get(index))
            .map(String::as_str)
            .ok_or(EngineError::MissingArgument)
    }
}
