use pretty_assertions::assert_eq;
use scena::{
    ActiveCast, AdvanceKind, EngineError, OnBack, Player, PlayerConfig, Rgba, Stage, compile, name_hash,
};

#[derive(Debug, Default)]
struct Script {
    lines: Vec<String>,
    colors: Vec<(bool, Rgba)>,
    executed: Vec<(u64, Vec<String>)>,
    choices: Vec<Vec<String>>,
    advances: Vec<AdvanceKind>,
    say_ticks: u64,
    cast_ticks: u64,
    user_ready: bool,
}

impl Script {
    fn ready() -> Self {
        Self {
            user_ready: true,
            ..Self::default()
        }
    }
}

impl Stage for Script {
    fn say(&mut self, line: &str) -> u64 {
        self.lines.push(line.to_owned());
        self.say_ticks
    }
    fn say_cast(&mut self, _cast: &ActiveCast, line: &str) -> u64 {
        self.lines.push(format!("cast: {line}"));
        self.cast_ticks
    }
    fn text_color(&mut self, color: Rgba) {
        self.colors.push((false, color));
    }
    fn text_color_cast(&mut self, _cast: &ActiveCast, color: Rgba) {
        self.colors.push((true, color));
    }
    fn execute(&mut self, name: u64, values: &[String]) -> bool {
        self.executed.push((name, values.to_vec()));
        true
    }
    fn on_choice(&mut self, _name: u64, options: &[String]) {
        self.choices.push(options.to_vec());
    }
    fn on_advance(&mut self, kind: AdvanceKind) {
        self.advances.push(kind);
    }
    fn user_has_advanced(&mut self) -> bool {
        self.user_ready
    }
}

fn player(source: &str, stage: Script, config: PlayerConfig) -> Player<Script> {
    let mut player = Player::new(stage, config);
    player.load(compile(source).unwrap());
    player.start();
    player
}

/// Updates until finished, answering choices from `answers`. Returns the tick count.
fn play_out(player: &mut Player<Script>, answers: &[i64]) -> usize {
    let mut answers = answers.iter();
    for tick in 1..=10_000 {
        if player.needs_choice() {
            player.set_choice(*answers.next().expect("an answer for every choice"));
        }
        player.update();
        if player.is_finished() {
            return tick;
        }
    }
    panic!("playback did not finish");
}

mod pacing {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn user_input_blocks_until_the_user_advances() {
        let mut p = player(r#""a" ; "b""#, Script::default(), PlayerConfig::default());
        p.update();
        assert_eq!(p.stage().lines, ["a"]);
        assert!(p.waiting_for_user());
        for _ in 0..10 {
            p.update();
        }
        assert_eq!(p.stage().lines, ["a"]);
        p.stage_mut().user_ready = true;
        p.update();
        assert_eq!(p.stage().lines, ["a", "b"]);
        assert!(p.is_finished());
        assert_eq!(p.stage().advances, [AdvanceKind::UserInput]);
    }

    #[test]
    fn user_input_times_out_after_the_delay() {
        let config = PlayerConfig {
            delay: 3,
            ..PlayerConfig::default()
        };
        let mut p = player(r#""a" ; "b""#, Script::default(), config);
        assert_eq!(play_out(&mut p, &[]), 4);
        assert_eq!(p.stage().lines, ["a", "b"]);
    }

    #[test]
    fn sync_waits_for_the_slowest_action() {
        let stage = Script {
            say_ticks: 2,
            cast_ticks: 5,
            ..Script::ready()
        };
        let mut p = player(r#""a" [x] "b" . [] "c""#, stage, PlayerConfig::default());
        p.update();
        assert!(p.in_sync());
        assert_eq!(p.action_delay(), 5);
        assert_eq!(play_out(&mut p, &[]), 5);
        assert_eq!(p.stage().lines, ["a", "cast: b", "c"]);
        assert_eq!(p.stage().advances, [AdvanceKind::Sync]);
        assert_eq!(p.action_delay(), 2);
    }

    #[test]
    fn wait_sets_the_action_delay() {
        let stage = Script {
            say_ticks: 50,
            ..Script::ready()
        };
        let mut p = player(r#""a" '3 ."#, stage, PlayerConfig::default());
        p.update();
        assert_eq!(p.action_delay(), 3);
    }

    #[test]
    fn non_blocking_instructions_run_in_one_tick() {
        let mut p = player(r#""a" "b" "c""#, Script::ready(), PlayerConfig::default());
        p.update();
        assert!(p.is_finished());
        assert_eq!(p.stage().lines, ["a", "b", "c"]);
    }

    #[test]
    fn paused_players_do_nothing() {
        let mut p = player(r#""a""#, Script::ready(), PlayerConfig::default());
        p.pause();
        p.update();
        assert!(p.stage().lines.is_empty());
        p.play();
        p.update();
        assert_eq!(p.stage().lines, ["a"]);
    }

    #[test]
    fn unstarted_players_do_nothing() {
        let mut p = Player::new(Script::ready(), PlayerConfig::default());
        p.load(compile(r#""a""#).unwrap());
        p.update();
        assert!(p.stage().lines.is_empty());
    }
}

mod named_calls {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builtins_change_the_config() {
        let mut p = player(
            "$autoplay true $delay 42 $on-back exit-block $other (x, y)",
            Script::ready(),
            PlayerConfig::default(),
        );
        p.update();
        let config = *p.config();
        assert!(config.autoplay);
        assert_eq!(config.delay, 42);
        assert_eq!(config.on_back, OnBack::ExitBlock);
        assert_eq!(p.stage().executed, [(name_hash("other"), vec!["x".to_owned(), "y".to_owned()])]);

        p.start();
        assert_eq!(*p.config(), PlayerConfig::default());
    }

    #[test]
    fn named_colors_resolve_through_the_stage() {
        let mut p = player("##red [x] ##blue #00FF0080", Script::ready(), PlayerConfig::default());
        p.update();
        assert_eq!(
            p.stage().colors,
            [
                (false, Rgba::RED),
                (true, Rgba::BLUE),
                (true, Rgba { r: 0, g: 255, b: 0, a: 128 })
            ]
        );
    }
}

mod choices {
    use super::*;
    use pretty_assertions::assert_eq;

    const MENU: &str = r#"
        :choice pick ("A", "B")
        :act a { "A" }
        :act b { "B" }
        :act ask {
            "asking"
            :act aside { "aside" }
            :perform choice ~pick (~a, ~b)
            "answered"
        }
        :perform ask
        "after"
    "#;

    fn with_policy(on_back: OnBack) -> Player<Script> {
        let config = PlayerConfig {
            on_back,
            ..PlayerConfig::default()
        };
        player(MENU, Script::ready(), config)
    }

    #[test]
    fn waits_for_an_answer() {
        let mut p = with_policy(OnBack::DoNothing);
        p.update();
        assert!(p.needs_choice());
        assert_eq!(p.stage().choices, [["A", "B"]]);
        for _ in 0..5 {
            p.update();
        }
        assert_eq!(p.stage().lines, ["asking"]);
        p.set_choice(1);
        p.update();
        assert_eq!(p.stage().lines, ["asking", "B", "answered", "after"]);
    }

    #[test]
    fn back_does_nothing_by_default() {
        let mut p = with_policy(OnBack::DoNothing);
        play_out(&mut p, &[-1]);
        assert_eq!(p.stage().lines, ["asking", "A", "answered", "after"]);
    }

    #[test]
    fn back_exits_the_block() {
        let mut p = with_policy(OnBack::ExitBlock);
        play_out(&mut p, &[-1]);
        assert_eq!(p.stage().lines, ["asking", "after"]);
    }

    #[test]
    fn back_repeats_the_block() {
        let mut p = with_policy(OnBack::RepeatBlock);
        play_out(&mut p, &[-1, 0]);
        assert_eq!(p.stage().lines, ["asking", "asking", "A", "answered", "after"]);
        assert_eq!(p.stage().choices.len(), 2);
    }

    #[test]
    fn back_terminates() {
        let mut p = with_policy(OnBack::Terminate);
        play_out(&mut p, &[-1]);
        assert_eq!(p.stage().lines, ["asking"]);
        assert_eq!(p.engine().error(), None);
    }

    #[test]
    fn back_raises() {
        let mut p = with_policy(OnBack::Error);
        play_out(&mut p, &[-1]);
        assert_eq!(p.stage().lines, ["asking"]);
        assert_eq!(p.engine().error(), Some(EngineError::InvalidValue));
    }
}
