mod binary;
pub mod bytecode;
pub mod compile;
mod engine;
mod error;
mod hash;
mod player;
mod rng;

pub use crate::binary::{Binary, HEADER_SIZE, MIN_VERSION, SIGNATURE, VERSION};
pub use crate::compile::{ROOT_LABEL, compile};
pub use crate::engine::{
    ActiveCast, Engine, EngineState, Frame, FunctionFrame, Hooks, INTERPOLATE_MARKER, NoHooks, SUBSTITUTE_MARKER,
    argument_reference,
};
pub use crate::error::{CompileError, CompileErrorKind, EngineError, LoadError};
pub use crate::hash::{fnv1a64_mix, name_hash};
pub use crate::player::{AdvanceKind, BACK_CHOICE, OnBack, Player, PlayerConfig, Rgba, Stage};
pub use crate::rng::RngStream;
