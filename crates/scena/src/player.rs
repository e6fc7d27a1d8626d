//! Tick-driven playback on top of the [`Engine`].
//!
//! A [`Player`] owns an engine and a host [`Stage`]. The host calls
//! [`Player::update`] once per tick; when the pacing rules allow it, the player
//! steps the engine through every non-blocking instruction until it reaches
//! something the host has to wait for: a user-input prompt, a sync point, a
//! choice, or the end of the program.
//!
//! Pacing uses two counters advanced by every update:
//!
//! - the auto counter, compared against [`PlayerConfig::delay`], lets a
//!   user-input prompt time out on its own;
//! - the action counter, compared against the action delay, holds a sync point
//!   until the slowest action started since the last advance has had time to
//!   play. Every stage hook returns a duration and the longest one wins.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, warn};

use crate::{
    binary::Binary,
    engine::{ActiveCast, Engine, EngineState, Hooks},
    error::EngineError,
    hash::name_hash,
};

/// Choice value reserved for "go back".
pub const BACK_CHOICE: i64 = -1;

/// What a [`BACK_CHOICE`] answer does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumIter, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OnBack {
    /// The answer falls through to the first option.
    #[default]
    DoNothing,
    Terminate,
    /// Leave the block that asked.
    ExitBlock,
    /// Stop with an invalid-value error.
    Error,
    /// Restart the block that asked.
    RepeatBlock,
}

impl OnBack {
    /// Looks up a policy by its kebab-case name, comparing name hashes.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let hash = name_hash(name);
        Self::iter().find(|&policy| name_hash(<&str>::from(policy)) == hash)
    }
}

/// Playback settings. Scripts may change them at run time through the
/// `on-back`, `autoplay` and `delay` named calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Ticks before a user-input prompt advances on its own.
    pub delay: u64,
    /// Advance user-input prompts only when the delay runs out.
    pub autoplay: bool,
    pub on_back: OnBack,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            delay: 600,
            autoplay: false,
            on_back: OnBack::DoNothing,
        }
    }
}

/// An 8-bit-per-channel color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Self = Self::opaque(255, 255, 255);
    pub const GRAY: Self = Self::opaque(128, 128, 128);
    pub const BLACK: Self = Self::opaque(0, 0, 0);
    pub const RED: Self = Self::opaque(255, 0, 0);
    pub const YELLOW: Self = Self::opaque(255, 255, 0);
    pub const GREEN: Self = Self::opaque(0, 255, 0);
    pub const CYAN: Self = Self::opaque(0, 255, 255);
    pub const BLUE: Self = Self::opaque(0, 0, 255);
    pub const MAGENTA: Self = Self::opaque(255, 0, 255);

    #[must_use]
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Unpacks `0xRRGGBBAA`. Bits above the low 32 are ignored.
    #[must_use]
    pub const fn from_rgba(value: u64) -> Self {
        Self {
            r: (value >> 24) as u8,
            g: (value >> 16) as u8,
            b: (value >> 8) as u8,
            a: value as u8,
        }
    }

    /// Built-in color for a name hash.
    #[must_use]
    pub fn named(hash: u64) -> Option<Self> {
        const TABLE: [(&str, Rgba); 9] = [
            ("white", Rgba::WHITE),
            ("gray", Rgba::GRAY),
            ("black", Rgba::BLACK),
            ("red", Rgba::RED),
            ("yellow", Rgba::YELLOW),
            ("green", Rgba::GREEN),
            ("cyan", Rgba::CYAN),
            ("blue", Rgba::BLUE),
            ("magenta", Rgba::MAGENTA),
        ];
        TABLE
            .iter()
            .find(|(name, _)| name_hash(name) == hash)
            .map(|&(_, color)| color)
    }
}

/// Why an advance happened, reported through [`Stage::on_advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum AdvanceKind {
    /// A sync point's actions finished.
    Sync,
    /// The user advanced a prompt.
    UserInput,
    /// The auto-advance delay ran out.
    Auto,
}

/// Host side of a [`Player`].
///
/// Effects addressed to nobody go to the plain handlers; effects with an
/// active cast (or an "everyone except" cast) go to the `_cast` variants.
/// Handlers that return a `u64` report how many ticks the effect takes to play.
/// Every method has a do-nothing default.
pub trait Stage {
    fn say(&mut self, _line: &str) -> u64 {
        0
    }
    fn say_cast(&mut self, _cast: &ActiveCast, _line: &str) -> u64 {
        0
    }
    fn add(&mut self, _line: &str) -> u64 {
        0
    }
    fn add_cast(&mut self, _cast: &ActiveCast, _line: &str) -> u64 {
        0
    }
    fn emote(&mut self, _emotion: u64) -> u64 {
        0
    }
    fn emote_cast(&mut self, _cast: &ActiveCast, _emotion: u64) -> u64 {
        0
    }
    fn perform(&mut self, _action: u64, _params: &[String]) -> u64 {
        0
    }
    fn perform_cast(&mut self, _cast: &ActiveCast, _action: u64, _params: &[String]) -> u64 {
        0
    }
    fn text_color(&mut self, _color: Rgba) {}
    fn text_color_cast(&mut self, _cast: &ActiveCast, _color: Rgba) {}

    /// Resolves a `##name` color. Unknown names are white.
    fn color_by_name(&mut self, name: u64) -> Rgba {
        Rgba::named(name).unwrap_or(Rgba::WHITE)
    }

    /// Handles a named call the player does not handle itself.
    ///
    /// Returns whether the call was recognized.
    fn execute(&mut self, _name: u64, _values: &[String]) -> bool {
        false
    }

    fn global_int(&mut self, _name: u64) -> i64 {
        0
    }
    fn global_string(&mut self, _name: u64) -> String {
        String::new()
    }

    /// A choice is pending. Answer it with [`Player::set_choice`].
    fn on_choice(&mut self, _name: u64, _options: &[String]) {}

    fn on_advance(&mut self, _kind: AdvanceKind) {}

    /// Polled while a user-input prompt is pending.
    fn user_has_advanced(&mut self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default)]
struct Pacing {
    config: PlayerConfig,
    paused: bool,
    finished: bool,
    wait_for_user: bool,
    in_sync: bool,
    has_choice: bool,
    needs_choice: bool,
    auto_counter: u64,
    action_counter: u64,
    action_delay: u64,
}

impl Pacing {
    fn reset_counters(&mut self) {
        self.auto_counter = 0;
        self.action_counter = 0;
    }

    fn advance_counters(&mut self) {
        self.auto_counter = self.auto_counter.saturating_add(1);
        self.action_counter = self.action_counter.saturating_add(1);
    }

    fn waiting(&self) -> bool {
        self.auto_counter < self.config.delay
    }

    fn syncing(&self) -> bool {
        self.in_sync && self.action_counter < self.action_delay
    }

    fn merge_delay(&mut self, ticks: u64) {
        self.action_delay = self.action_delay.max(ticks);
    }

    fn blocked(&self) -> bool {
        self.finished || self.wait_for_user || self.in_sync || self.needs_choice
    }
}

/// Routes engine hooks to a [`Stage`] while recording pacing effects.
struct Director<'a, S> {
    pacing: &'a mut Pacing,
    stage: &'a mut S,
}

impl<S: Stage> Director<'_, S> {
    /// Handles the player's own named calls. Returns whether `name` was one.
    fn builtin(&mut self, name: u64, values: &[String]) -> bool {
        const ON_BACK: u64 = name_hash("on-back");
        const AUTOPLAY: u64 = name_hash("autoplay");
        const DELAY: u64 = name_hash("delay");

        let Some(value) = values.first() else {
            return false;
        };
        let config = &mut self.pacing.config;
        match name {
            ON_BACK => match OnBack::from_name(value) {
                Some(policy) => config.on_back = policy,
                None => warn!(value = %value, "unknown on-back policy"),
            },
            AUTOPLAY => config.autoplay = matches!(value.as_str(), "true" | "1"),
            DELAY => match value.parse() {
                Ok(delay) => config.delay = delay,
                Err(_) => warn!(value = %value, "invalid delay"),
            },
            _ => return false,
        }
        true
    }

    fn call(&mut self, name: u64, values: &[String]) {
        if !self.builtin(name, values) && !self.stage.execute(name, values) {
            debug!(name, "unhandled named call");
        }
    }
}

impl<S: Stage> Hooks for Director<'_, S> {
    fn say(&mut self, cast: &ActiveCast, line: &str) {
        let ticks = if cast.is_global() {
            self.stage.say(line)
        } else {
            self.stage.say_cast(cast, line)
        };
        self.pacing.merge_delay(ticks);
    }

    fn add(&mut self, cast: &ActiveCast, line: &str) {
        let ticks = if cast.is_global() {
            self.stage.add(line)
        } else {
            self.stage.add_cast(cast, line)
        };
        self.pacing.merge_delay(ticks);
    }

    fn emote(&mut self, cast: &ActiveCast, emotion: u64) {
        let ticks = if cast.is_global() {
            self.stage.emote(emotion)
        } else {
            self.stage.emote_cast(cast, emotion)
        };
        self.pacing.merge_delay(ticks);
    }

    fn perform(&mut self, cast: &ActiveCast, action: u64, params: &[String]) {
        let ticks = if cast.is_global() {
            self.stage.perform(action, params)
        } else {
            self.stage.perform_cast(cast, action, params)
        };
        self.pacing.merge_delay(ticks);
    }

    fn color(&mut self, cast: &ActiveCast, rgba: u64) {
        let color = Rgba::from_rgba(rgba);
        if cast.is_global() {
            self.stage.text_color(color);
        } else {
            self.stage.text_color_cast(cast, color);
        }
    }

    fn color_ref(&mut self, cast: &ActiveCast, name: u64) {
        let color = self.stage.color_by_name(name);
        if cast.is_global() {
            self.stage.text_color(color);
        } else {
            self.stage.text_color_cast(cast, color);
        }
    }

    fn delay(&mut self, ticks: u64) {
        self.pacing.action_delay = ticks;
    }

    fn wait_for_actions(&mut self, _asynchronous: bool) {
        self.pacing.in_sync = true;
    }

    fn wait_for_user(&mut self) {
        self.pacing.wait_for_user = true;
    }

    fn named_call_single(&mut self, name: u64, value: &str) {
        self.call(name, &[value.to_owned()]);
    }

    fn named_call_multiple(&mut self, name: u64, values: &[String]) {
        self.call(name, values);
    }

    fn get_int(&mut self, name: u64) -> i64 {
        self.stage.global_int(name)
    }

    fn get_string(&mut self, name: u64) -> String {
        self.stage.global_string(name)
    }

    fn get_choice(&mut self, name: u64, options: &[String]) -> Option<i64> {
        debug!(options = options.len(), "choice requested");
        self.pacing.has_choice = false;
        self.pacing.needs_choice = true;
        self.stage.on_choice(name, options);
        None
    }
}

/// Paces an [`Engine`] against host ticks and forwards its effects to a [`Stage`].
#[derive(Debug)]
pub struct Player<S> {
    engine: Engine,
    stage: S,
    /// Settings restored by [`Player::start`].
    config: PlayerConfig,
    pacing: Pacing,
}

impl<S: Stage> Player<S> {
    #[must_use]
    pub fn new(stage: S, config: PlayerConfig) -> Self {
        Self::with_engine(Engine::new(), stage, config)
    }

    /// Uses `engine`, e.g. one built with [`Engine::with_seed`].
    #[must_use]
    pub fn with_engine(engine: Engine, stage: S, config: PlayerConfig) -> Self {
        Self {
            engine,
            stage,
            config,
            pacing: Pacing {
                config,
                ..Pacing::default()
            },
        }
    }

    /// Replaces the program, stopping any playback in progress.
    pub fn load(&mut self, binary: impl Into<Arc<Binary>>) {
        self.stop();
        self.engine.load(binary);
    }

    /// Starts the loaded program from the top and unpauses.
    ///
    /// Settings changed by a previous run are reset to the configured ones.
    pub fn start(&mut self) {
        self.pacing = Pacing {
            config: self.config,
            ..Pacing::default()
        };
        self.engine.start();
        debug!("playback started");
        self.play();
    }

    pub fn stop(&mut self) {
        self.pacing.finished = true;
        self.engine.stop();
    }

    pub fn play(&mut self) {
        self.pacing.paused = false;
    }

    pub fn pause(&mut self) {
        self.pacing.paused = true;
    }

    /// Answers a pending choice. [`BACK_CHOICE`] triggers the on-back policy.
    pub fn set_choice(&mut self, choice: i64) {
        debug!(choice, "choice answered");
        self.engine.set_scratch_int(choice);
        self.pacing.has_choice = true;
    }

    /// Runs one host tick.
    pub fn update(&mut self) {
        match self.engine.state() {
            EngineState::Ready | EngineState::Finished => return,
            EngineState::Error => return self.stop(),
            EngineState::Running => {}
        }
        if self.pacing.needs_choice && !self.pacing.has_choice {
            return;
        }
        self.pacing.needs_choice = false;
        if self.pacing.finished || self.pacing.paused {
            return;
        }
        if self.pacing.has_choice && self.engine.scratch_int() == BACK_CHOICE {
            self.back();
        }
        self.pacing.has_choice = false;
        self.pacing.advance_counters();
        if self.should_process() {
            self.next();
        }
    }

    fn back(&mut self) {
        let policy = self.pacing.config.on_back;
        debug!(policy = <&str>::from(policy), "back choice");
        match policy {
            OnBack::DoNothing => {}
            OnBack::Terminate => self.stop(),
            OnBack::ExitBlock => self.engine.force_block_exit(),
            OnBack::Error => {
                self.engine.raise(EngineError::InvalidValue);
                self.stop();
            }
            OnBack::RepeatBlock => self.engine.jump_to_block_start(),
        }
    }

    fn should_process(&mut self) -> bool {
        let pacing = &self.pacing;
        if pacing.syncing() {
            return false;
        }
        if !pacing.config.autoplay
            && pacing.wait_for_user
            && (!pacing.waiting() || self.stage.user_has_advanced())
        {
            return true;
        }
        !self.pacing.waiting() || !self.pacing.wait_for_user
    }

    fn next(&mut self) {
        if self.pacing.finished {
            return;
        }
        let pacing = &mut self.pacing;
        let kind = if pacing.in_sync {
            Some(AdvanceKind::Sync)
        } else if pacing.wait_for_user {
            Some(AdvanceKind::UserInput)
        } else if !pacing.waiting() {
            Some(AdvanceKind::Auto)
        } else {
            None
        };
        if let Some(kind) = kind {
            debug!(kind = <&str>::from(kind), "advance");
            self.stage.on_advance(kind);
        }
        if pacing.in_sync {
            pacing.action_delay = 0;
        }
        pacing.in_sync = false;
        pacing.wait_for_user = false;
        pacing.reset_counters();

        let mut director = Director {
            pacing: &mut self.pacing,
            stage: &mut self.stage,
        };
        loop {
            self.engine.process(&mut director);
            if self.engine.state() != EngineState::Running {
                director.pacing.finished = true;
            }
            if director.pacing.blocked() {
                break;
            }
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.pacing.finished
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pacing.paused
    }

    /// True while a choice is pending and unanswered.
    #[must_use]
    pub fn needs_choice(&self) -> bool {
        self.pacing.needs_choice && !self.pacing.has_choice
    }

    #[must_use]
    pub fn waiting_for_user(&self) -> bool {
        self.pacing.wait_for_user
    }

    #[must_use]
    pub fn in_sync(&self) -> bool {
        self.pacing.in_sync
    }

    /// Current settings, including changes made by the script.
    #[must_use]
    pub fn config(&self) -> &PlayerConfig {
        &self.pacing.config
    }

    #[must_use]
    pub fn action_delay(&self) -> u64 {
        self.pacing.action_delay
    }

    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    #[must_use]
    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut S {
        &mut self.stage
    }

    /// Returns the stage, dropping the engine.
    pub fn into_stage(self) -> S {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_back_names() {
        assert_eq!(OnBack::from_name("exit-block"), Some(OnBack::ExitBlock));
        assert_eq!(OnBack::from_name("repeat-block"), Some(OnBack::RepeatBlock));
        assert_eq!(OnBack::from_name("sideways"), None);
    }

    #[test]
    fn unpacks_rgba() {
        assert_eq!(Rgba::from_rgba(0xFF00_0080), Rgba { r: 255, g: 0, b: 0, a: 128 });
        assert_eq!(Rgba::named(name_hash("cyan")), Some(Rgba::CYAN));
        assert_eq!(Rgba::named(name_hash("teal")), None);
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: PlayerConfig = serde_json::from_str(r#"{"on_back": "repeat-block"}"#).unwrap();
        assert_eq!(config.delay, 600);
        assert!(!config.autoplay);
        assert_eq!(config.on_back, OnBack::RepeatBlock);
    }
}
