//! Command-line front end: compile scripts, inspect binaries, play them headlessly.
//!
//! Usage:
//! - `scena compile <src> [-o out]`
//! - `scena disasm <bin|src>`
//! - `scena run <bin|src> [--config cfg.json] [--choice N ...] [--seed S]`

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use scena::{
    ActiveCast, AdvanceKind, Binary, CompileError, Engine, EngineError, HEADER_SIZE, LoadError, Player,
    PlayerConfig, Rgba, SIGNATURE, Stage, bytecode::disassemble, compile,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(name = "scena")]
#[command(about = "Compile and play scena dialogue scripts")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a script into a binary
    Compile {
        source: PathBuf,
        /// Output path; defaults to the source path with a `.scnb` extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the decoded instruction listing of a binary or script
    Disasm { input: PathBuf },
    /// Play a binary or script, printing a transcript
    Run {
        input: PathBuf,
        /// Player settings as JSON
        #[arg(long)]
        config: Option<PathBuf>,
        /// Answers for choices, in order; later choices take the first option
        #[arg(long = "choice", allow_negative_numbers = true)]
        choices: Vec<i64>,
        /// Seed for random branches
        #[arg(long)]
        seed: Option<u64>,
        /// Give up after this many ticks
        #[arg(long, default_value_t = 1_000_000)]
        max_ticks: u64,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("{}: {source}", path.display())]
    Compile { path: PathBuf, source: CompileError },
    #[error("{}: {source}", path.display())]
    Load { path: PathBuf, source: LoadError },
    #[error("{}: invalid config: {source}", path.display())]
    Config { path: PathBuf, source: serde_json::Error },
    #[error("playback stopped: {0}")]
    Engine(EngineError),
    #[error("playback did not finish within {0} ticks")]
    Timeout(u64),
}

/// Initializes logging from `RUST_LOG`, defaulting to `info`.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();
    let result = match args.command {
        Command::Compile { source, output } => compile_file(&source, output),
        Command::Disasm { input } => read_program(&input).map(|binary| print!("{}", disassemble(&binary))),
        Command::Run {
            input,
            config,
            choices,
            seed,
            max_ticks,
        } => run(&input, config.as_deref(), choices, seed, max_ticks),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>, CliError> {
    fs::read(path).map_err(|source| CliError::Io {
        path: path.to_owned(),
        source,
    })
}

fn compile_source(path: &Path, bytes: &[u8]) -> Result<Binary, CliError> {
    let source = String::from_utf8_lossy(bytes);
    compile(&source).map_err(|source| CliError::Compile {
        path: path.to_owned(),
        source,
    })
}

/// Loads a compiled binary, or compiles the file when it lacks the binary signature.
fn read_program(path: &Path) -> Result<Binary, CliError> {
    let bytes = read(path)?;
    let signed = bytes
        .get(HEADER_SIZE - SIGNATURE.len()..HEADER_SIZE)
        .is_some_and(|sig| sig == SIGNATURE);
    if signed {
        Binary::load(&bytes).map_err(|source| CliError::Load {
            path: path.to_owned(),
            source,
        })
    } else {
        compile_source(path, &bytes)
    }
}

fn compile_file(source: &Path, output: Option<PathBuf>) -> Result<(), CliError> {
    let binary = compile_source(source, &read(source)?)?;
    let output = output.unwrap_or_else(|| source.with_extension("scnb"));
    let bytes = binary.to_bytes();
    fs::write(&output, &bytes).map_err(|source| CliError::Io {
        path: output.clone(),
        source,
    })?;
    info!(
        output = %output.display(),
        bytes = bytes.len(),
        words = binary.code.len(),
        "wrote binary"
    );
    Ok(())
}

/// Prints every effect as one transcript line.
#[derive(Debug, Default)]
struct Transcript {
    /// Choices still to answer, in order.
    answers: std::vec::IntoIter<i64>,
}

fn cast_label(cast: &ActiveCast) -> String {
    let actors: Vec<String> = cast.actors.iter().map(|a| format!("{a:016x}")).collect();
    let prefix = if cast.exclude { "all except " } else { "" };
    format!("{prefix}[{}]", actors.join(", "))
}

impl Stage for Transcript {
    fn say(&mut self, line: &str) -> u64 {
        println!("{line}");
        0
    }

    fn say_cast(&mut self, cast: &ActiveCast, line: &str) -> u64 {
        println!("{}: {line}", cast_label(cast));
        0
    }

    fn add(&mut self, line: &str) -> u64 {
        println!("+ {line}");
        0
    }

    fn add_cast(&mut self, cast: &ActiveCast, line: &str) -> u64 {
        println!("{} + {line}", cast_label(cast));
        0
    }

    fn emote(&mut self, emotion: u64) -> u64 {
        println!("(emote {emotion:016x})");
        0
    }

    fn emote_cast(&mut self, cast: &ActiveCast, emotion: u64) -> u64 {
        println!("{} (emote {emotion:016x})", cast_label(cast));
        0
    }

    fn perform(&mut self, action: u64, params: &[String]) -> u64 {
        println!("(perform {action:016x} {params:?})");
        0
    }

    fn perform_cast(&mut self, cast: &ActiveCast, action: u64, params: &[String]) -> u64 {
        println!("{} (perform {action:016x} {params:?})", cast_label(cast));
        0
    }

    fn text_color(&mut self, color: Rgba) {
        debug!(?color, "text color");
    }

    fn text_color_cast(&mut self, cast: &ActiveCast, color: Rgba) {
        debug!(cast = %cast_label(cast), ?color, "text color");
    }

    fn execute(&mut self, name: u64, values: &[String]) -> bool {
        println!("(call {name:016x} {values:?})");
        true
    }

    fn on_choice(&mut self, _name: u64, options: &[String]) {
        for (i, option) in options.iter().enumerate() {
            println!("  {i}) {option}");
        }
    }

    fn on_advance(&mut self, kind: AdvanceKind) {
        debug!(?kind, "advance");
    }
}

fn run(
    input: &Path,
    config: Option<&Path>,
    choices: Vec<i64>,
    seed: Option<u64>,
    max_ticks: u64,
) -> Result<(), CliError> {
    let binary = read_program(input)?;
    let config = match config {
        Some(path) => serde_json::from_slice(&read(path)?).map_err(|source| CliError::Config {
            path: path.to_owned(),
            source,
        })?,
        None => PlayerConfig::default(),
    };
    let engine = seed.map_or_else(Engine::new, Engine::with_seed);
    let stage = Transcript {
        answers: choices.into_iter(),
    };
    let mut player = Player::with_engine(engine, stage, config);
    player.load(binary);
    player.start();

    let mut ticks = 0;
    while !player.is_finished() {
        if ticks == max_ticks {
            return Err(CliError::Timeout(max_ticks));
        }
        if player.needs_choice() {
            let answer = player.stage_mut().answers.next().unwrap_or_else(|| {
                warn!("no answer left, taking the first option");
                0
            });
            println!("> {answer}");
            player.set_choice(answer);
        }
        player.update();
        ticks += 1;
    }
    if let Some(error) = player.engine().error() {
        return Err(CliError::Engine(error));
    }
    info!(ticks, "playback finished");
    Ok(())
}
