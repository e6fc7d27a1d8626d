use pretty_assertions::assert_eq;
use scena::{
    ActiveCast, CompileErrorKind, Engine, Hooks, ROOT_LABEL, compile,
    bytecode::{CastChange, ColorValue, Instruction, InstrWord, NamedValue, Opcode, decode},
    name_hash,
};

/// Decodes a binary's code linearly, ignoring `next` padding.
fn listing(source: &str) -> Vec<Instruction> {
    let binary = compile(source).unwrap();
    let mut out = Vec::new();
    let mut ip = 0;
    let mut pending = 0;
    while ip < binary.code.len() {
        let word = InstrWord::from(binary.code[ip]);
        let sp = scena::bytecode::resolve_sp(word, pending);
        let decoded = decode(&binary.code, ip, sp).unwrap();
        pending = match decoded.instruction {
            Instruction::SetMode { sp } => sp,
            _ => 0,
        };
        if decoded.instruction != Instruction::Next {
            out.push(decoded.instruction);
        }
        ip += decoded.words;
    }
    out
}

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
}

impl Hooks for Recorder {
    fn say(&mut self, cast: &ActiveCast, line: &str) {
        let who = if cast.is_global() { "global" } else { "cast" };
        self.events.push(format!("{who} say {line}"));
    }
    fn emote(&mut self, cast: &ActiveCast, _emotion: u64) {
        let who = if cast.is_global() { "global" } else { "cast" };
        self.events.push(format!("{who} emote"));
    }
    fn named_call_single(&mut self, _name: u64, value: &str) {
        self.events.push(format!("call {value}"));
    }
}

fn run(source: &str) -> Vec<String> {
    let mut engine = Engine::new();
    engine.load(compile(source).unwrap());
    engine.start();
    let mut recorder = Recorder::default();
    for _ in 0..1000 {
        if !engine.is_running() {
            break;
        }
        engine.process(&mut recorder);
    }
    assert!(engine.is_finished(), "engine error: {:?}", engine.error());
    recorder.events
}

mod scenarios {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_line() {
        let binary = compile(r#""Hello""#).unwrap();
        assert_eq!(binary.code.len(), 6);
        let Instruction::Line { text, append: false } = decode(&binary.code, 0, 0).unwrap().instruction else {
            panic!("expected a line");
        };
        assert_eq!(binary.string(text), Some("Hello"));
        assert_eq!(InstrWord::from(binary.code[5]).opcode(), Some(Opcode::Halt));
        assert_eq!(run(r#""Hello""#), ["global say Hello"]);
    }

    #[test]
    fn actor_then_emotion() {
        assert_eq!(
            listing("[npc1]!happy"),
            [
                Instruction::Cast(CastChange::Replace(name_hash("npc1"))),
                Instruction::Emotion {
                    emotion: name_hash("happy")
                },
                Instruction::Halt { ret: false },
            ]
        );
        assert_eq!(run("[npc1]!happy"), ["cast emote"]);
    }

    #[test]
    fn perform_returns_to_call_site() {
        let source = r#":act intro { "Hi" } :perform intro "after""#;
        let instructions = listing(source);
        assert!(instructions.contains(&Instruction::Halt { ret: true }));
        assert!(instructions.contains(&Instruction::Jump {
            label: name_hash("intro"),
            returnable: true
        }));
        assert_eq!(run(source), ["global say Hi", "global say after"]);
    }

    #[test]
    fn literal_and_named_colors() {
        assert_eq!(
            listing("#FF0000 ##red"),
            [
                Instruction::Color(ColorValue::Literal(0xFF00_00FF)),
                Instruction::Color(ColorValue::Named(name_hash("red"))),
                Instruction::Halt { ret: false },
            ]
        );
    }

    #[test]
    fn bare_plus_is_boolean_true() {
        assert_eq!(
            listing("+")[0],
            Instruction::NamedCall {
                name: name_hash(""),
                value: NamedValue::Single(2)
            }
        );
        assert_eq!(run("+ -"), ["call true", "call false"]);
    }
}

mod control_flow {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn labels_point_at_their_definitions() {
        let binary = compile(":act a { :act b { } }").unwrap();
        let at = |label: &str| binary.label(name_hash(label));
        assert_eq!(at(ROOT_LABEL), Some(0));
        assert_eq!(at("a"), Some(5));
        assert_eq!(at("a:b"), Some(11));
        assert_eq!(at("a:b[end]"), Some(13));
        assert_eq!(at("a[end]"), Some(15));
        for (&hash, &offset) in &binary.jumps {
            if hash != name_hash(ROOT_LABEL) {
                let word = InstrWord::from(binary.code[offset as usize]);
                assert_eq!(word.opcode(), Some(Opcode::Next), "label {hash:#x}");
            }
        }
    }

    #[test]
    fn blocks_are_skipped_by_straight_line_flow() {
        assert_eq!(run(r#":act a { "inside" } "outside""#), ["global say outside"]);
    }

    #[test]
    fn tail_jump_does_not_return() {
        let source = r#":act a { "in a" } :next a "never""#;
        assert_eq!(run(source), ["global say in a"]);
    }

    #[test]
    fn finish_returns_and_terminate_ends() {
        let source = r#":act a { "one" :finish "skipped" } :act b { "two" :terminate } :perform a :perform b "never""#;
        assert_eq!(run(source), ["global say one", "global say two"]);
    }

    #[test]
    fn nested_paths_resolve() {
        let source = r#"
            :act outer {
                :act inner { "inner" :next ~sibling }
                :act sibling { "sibling" }
                :perform inner
            }
            :perform :outer
            "done"
        "#;
        assert_eq!(run(source), ["global say inner", "global say sibling", "global say done"]);
    }

    #[test]
    fn explicit_select_uses_host_value() {
        struct Picks(Vec<String>);
        impl Hooks for Picks {
            fn say(&mut self, _cast: &ActiveCast, line: &str) {
                self.0.push(line.to_owned());
            }
            fn get_int(&mut self, _name: u64) -> i64 {
                7
            }
        }
        let source = r#":act a { "a" } :act b { "b" } :perform select $mood (a, b) "end""#;
        let mut engine = Engine::new();
        engine.load(compile(source).unwrap());
        engine.start();
        let mut picks = Picks(Vec::new());
        while engine.is_running() {
            engine.process(&mut picks);
        }
        // 7 is clamped to the last option
        assert_eq!(picks.0, ["b", "end"]);
    }

    #[test]
    fn select_none_skips_the_table() {
        let source = r#":act a { "a" } :select random (none) "end""#;
        assert_eq!(run(source), ["global say end"]);
    }
}

mod errors {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reports_line_and_column() {
        let err = compile("\"ok\"\n  #12345").unwrap_err();
        assert_eq!((err.line, err.column), (2, 3));
        assert_eq!(err.kind, CompileErrorKind::InvalidValue);
        assert_eq!(err.fragment, "#12345");
    }

    #[test]
    fn unknown_jump_target() {
        let err = compile(":act a { :next b }").unwrap_err();
        assert!(err.message.contains("a:b"), "got: {}", err.message);
    }

    #[test]
    fn unterminated_string() {
        let err = compile("\"never closed").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::FailedAction);
        assert_eq!((err.line, err.column), (1, 1));
    }

    #[test]
    fn invalid_sigil() {
        let err = compile("hello").unwrap_err();
        assert!(err.message.contains("Invalid token"), "got: {}", err.message);
    }

    #[test]
    fn floating_substitution() {
        let err = compile("%who").unwrap_err();
        assert!(err.message.contains("Floating"), "got: {}", err.message);
    }

    #[test]
    fn stray_closing_brace() {
        let err = compile(r#""a" }"#).unwrap_err();
        assert!(err.message.contains("'}'"), "got: {}", err.message);
    }

    #[test]
    fn nul_in_a_line() {
        let err = compile("\"fine\"\n\"cut\0short\"").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::InvalidValue);
        assert_eq!((err.line, err.column), (2, 1));
        assert!(err.message.contains("NUL"), "got: {}", err.message);
    }

    #[test]
    fn unknown_choice() {
        let err = compile(":next choice menu (a)").unwrap_err();
        assert!(err.message.contains("Unknown choice"), "got: {}", err.message);
    }
}
