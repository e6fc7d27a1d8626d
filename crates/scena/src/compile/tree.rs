//! Turns the token stream into a linear list of [`OpToken`]s.
//!
//! Each statement is selected by its first character (see the table below).
//! Named blocks are compiled in place: the builder emits a skip over the body,
//! the body itself under an entry label, a return, and an end label the jump
//! lands on, so straight-line execution never falls into a block.
//!
//! | Token | Produces |
//! |---|---|
//! | `"text"` | line |
//! | `[a, b]`, `[..., a]` | actor cast |
//! | `@name`, `@name(args)` | action |
//! | `$name(args)`, `$name "v"`, `$name value` | named call |
//! | `+name`, `-name` | named call with `true` / `false` |
//! | `!name` | emotion |
//! | `'N` | wait |
//! | `#RRGGBB[AA]`, `##name` | color |
//! | `*` | SP mode 1 for the next instruction |
//! | `.` / `;` | sync / user input |
//! | `:keyword ...` | blocks, jumps, selects, choices, calls |

use ahash::AHashMap;

use crate::{
    bytecode::{
        OPERAND_WORDS, Opcode,
        op::{BRANCH_EXPLICIT, BRANCH_RANDOM, BRANCH_RETURN_BIT, JUMP_SKIP},
    },
    compile::{
        ROOT_LABEL,
        lexer::{Token, TokenKind, unescape},
        pack::{self, EXPANSION, PackRules, is_name, is_path},
        scope::Scope,
    },
    error::CompileError,
};

/// Names that cannot label a block.
const RESERVED: [&str; 4] = ["none", "finish", "terminate", "repeat"];

/// One instruction before assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpToken {
    pub op: Opcode,
    /// Literal text for lines, otherwise a name or label path to hash.
    pub name: String,
    /// Literal operand: wait ticks, RGBA color, boolean sentinel, clamp minimum.
    pub value: u64,
    /// Branch-table size, or clamp maximum for integer requests.
    pub range: u64,
    pub pack: Vec<String>,
    /// SP mode emitted in the instruction word.
    pub mode: u8,
    /// Label recorded at this instruction's offset.
    pub entry: Option<String>,
    /// Source byte offset, for error reporting.
    pub offset: usize,
}

impl OpToken {
    fn new(op: Opcode, offset: usize) -> Self {
        Self {
            op,
            offset,
            ..Self::default()
        }
    }

    fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn mode(mut self, mode: u8) -> Self {
        self.mode = mode;
        self
    }

    fn entry(mut self, label: impl Into<String>) -> Self {
        self.entry = Some(label.into());
        self
    }
}

/// Builds operation tokens from lexed `tokens`.
///
/// # Errors
/// Stops at the first syntax error.
pub fn build(tokens: &[Token<'_>]) -> Result<Vec<OpToken>, CompileError> {
    let mut builder = Builder {
        tokens,
        pos: 0,
        out: Vec::new(),
        scope: Scope::default(),
        choices: AHashMap::new(),
        functions: AHashMap::new(),
        calls: Vec::new(),
    };
    builder.statements(None)?;
    builder.check_calls()?;
    Ok(builder.out)
}

struct PendingCall {
    path: String,
    args: usize,
    fragment: String,
    offset: usize,
}

struct Builder<'a, 'src> {
    tokens: &'a [Token<'src>],
    pos: usize,
    out: Vec<OpToken>,
    scope: Scope,
    /// Choice path to its option texts.
    choices: AHashMap<String, Vec<String>>,
    /// Function path to its parameter count.
    functions: AHashMap<String, usize>,
    calls: Vec<PendingCall>,
}

impl<'src> Builder<'_, 'src> {
    fn next_token(&mut self) -> Option<Token<'src>> {
        while let Some(token) = self.tokens.get(self.pos).copied() {
            self.pos += 1;
            if !token.is_comment() {
                return Some(token);
            }
        }
        None
    }

    fn peek(&self) -> Option<Token<'src>> {
        self.tokens[self.pos..].iter().find(|t| !t.is_comment()).copied()
    }

    fn push(&mut self, token: OpToken) {
        self.out.push(token);
    }

    /// Consumes the next token, which must be of `kind`.
    fn expect(&mut self, kind: TokenKind, after: &Token<'_>, message: &str) -> Result<Token<'src>, CompileError> {
        match self.peek() {
            Some(token) if token.kind == kind => {
                self.next_token();
                Ok(token)
            }
            Some(token) => Err(CompileError::invalid(message, token.text, token.offset)),
            None => Err(CompileError::invalid(message, after.text, after.offset)),
        }
    }

    fn statements(&mut self, block: Option<&Token<'_>>) -> Result<(), CompileError> {
        while let Some(token) = self.next_token() {
            match token.kind {
                TokenKind::CloseBrace if block.is_some() => return Ok(()),
                TokenKind::CloseBrace => {
                    return Err(CompileError::invalid("Unexpected '}' outside a block", token.text, token.offset));
                }
                TokenKind::OpenBrace => {
                    return Err(CompileError::invalid("Unexpected '{'", token.text, token.offset));
                }
                TokenKind::Comma => {
                    return Err(CompileError::invalid("Unexpected ','", token.text, token.offset));
                }
                TokenKind::Str => {
                    let text = self.interpolate(unescape(token.inner()), &token)?;
                    self.push(OpToken::new(Opcode::Line, token.offset).name(text));
                }
                TokenKind::Brackets => self.cast(&token)?,
                TokenKind::Star => self.push(OpToken::new(Opcode::NoOp, token.offset).mode(1)),
                TokenKind::Dot => self.push(OpToken::new(Opcode::Sync, token.offset)),
                TokenKind::Semicolon => self.push(OpToken::new(Opcode::UserInput, token.offset)),
                TokenKind::Word => self.word(&token)?,
                // stray packs and comments carry no instruction
                TokenKind::Parens | TokenKind::LineComment | TokenKind::BlockComment => {}
            }
        }
        match block {
            Some(open) => Err(CompileError::failed("Missing '}' to close block", open.text, open.offset)),
            None => Ok(()),
        }
    }

    fn interpolate(&self, text: String, token: &Token<'_>) -> Result<String, CompileError> {
        self.scope.interpolate(&text).map_err(|name| {
            CompileError::invalid(
                format!("Function argument '{name}' does not exist"),
                token.text,
                token.offset,
            )
        })
    }

    fn cast(&mut self, token: &Token<'_>) -> Result<(), CompileError> {
        let rules = PackRules {
            expansion: true,
            ..PackRules::default()
        };
        let actors = pack::parse(token, rules, &self.scope)?;
        if actors.is_empty() {
            self.push(OpToken::new(Opcode::Actor, token.offset));
        }
        for (i, actor) in actors.into_iter().enumerate() {
            let op = OpToken::new(Opcode::Actor, token.offset);
            if actor == EXPANSION {
                self.push(op.mode(2));
            } else {
                self.push(op.mode(u8::from(i > 0)).name(actor));
            }
        }
        Ok(())
    }

    fn word(&mut self, token: &Token<'_>) -> Result<(), CompileError> {
        let text = token.text;
        let Some(sigil) = text.chars().next() else {
            return Ok(());
        };
        let rest = &text[sigil.len_utf8()..];
        let invalid = |message: String| CompileError::invalid(message, text, token.offset);
        match sigil {
            '@' => {
                let name = self.checked_name(rest, token, "action")?;
                let mut op = OpToken::new(Opcode::Action, token.offset).name(name);
                if self.peek().is_some_and(|t| t.kind == TokenKind::Parens) {
                    let params = self.expect(TokenKind::Parens, token, "Missing action parameters")?;
                    op.pack = pack::parse(&params, substituting(), &self.scope)?;
                }
                self.push(op);
            }
            '$' => {
                let name = self.checked_name(rest, token, "named call")?;
                let pack = self.named_call_value(token)?;
                let mut op = OpToken::new(Opcode::NamedCall, token.offset).name(name);
                op.pack = pack;
                self.push(op);
            }
            '+' | '-' => {
                if !rest.is_empty() && !is_name(rest) {
                    return Err(invalid(format!("Invalid named call '{rest}'")));
                }
                let mut op = OpToken::new(Opcode::NamedCall, token.offset).name(rest);
                op.value = if sigil == '+' { 2 } else { 1 };
                self.push(op);
            }
            '!' => {
                let name = self.checked_name(rest, token, "emotion")?;
                self.push(OpToken::new(Opcode::Emotion, token.offset).name(name));
            }
            '\'' => {
                let ticks: u64 = rest.parse().map_err(|_| invalid(format!("Invalid wait time '{rest}'")))?;
                let mut op = OpToken::new(Opcode::Wait, token.offset);
                op.value = ticks;
                self.push(op);
            }
            '#' => {
                if let Some(name) = rest.strip_prefix('#') {
                    let name = self.checked_name(name, token, "color")?;
                    self.push(OpToken::new(Opcode::Color, token.offset).name(name).mode(1));
                } else {
                    let rgba = hex_color(rest).ok_or_else(|| invalid(format!("Invalid hex color '{text}'")))?;
                    let mut op = OpToken::new(Opcode::Color, token.offset);
                    op.value = rgba;
                    self.push(op);
                }
            }
            ':' => self.keyword(rest, token)?,
            '%' => return Err(invalid("Floating argument substitutions are not allowed".to_owned())),
            _ => return Err(invalid(format!("Invalid token '{text}'"))),
        }
        Ok(())
    }

    fn checked_name<'t>(&self, name: &'t str, token: &Token<'_>, what: &str) -> Result<&'t str, CompileError> {
        if is_name(name) {
            Ok(name)
        } else {
            Err(CompileError::invalid(
                format!("Invalid {what} name '{name}'"),
                token.text,
                token.offset,
            ))
        }
    }

    /// Reads the argument of `$name`: a pack, a quoted string or a bare value.
    fn named_call_value(&mut self, token: &Token<'_>) -> Result<Vec<String>, CompileError> {
        let missing = || CompileError::invalid("Missing value for named call", token.text, token.offset);
        let value = self.peek().ok_or_else(missing)?;
        let pack = match value.kind {
            TokenKind::Parens => pack::parse(&value, substituting(), &self.scope)?,
            TokenKind::Str => vec![self.interpolate(unescape(value.inner()), &value)?],
            TokenKind::Word if is_name(value.text) => vec![value.text.to_owned()],
            TokenKind::Word if value.text.starts_with('%') => {
                let name = &value.text[1..];
                let reference = self.scope.reference(name).ok_or_else(|| {
                    CompileError::invalid(
                        format!("Function argument '{name}' does not exist"),
                        value.text,
                        value.offset,
                    )
                })?;
                vec![reference]
            }
            _ => {
                return Err(CompileError::invalid(
                    format!("Invalid value '{}' for named call", value.text),
                    value.text,
                    value.offset,
                ));
            }
        };
        self.next_token();
        Ok(pack)
    }

    fn keyword(&mut self, keyword: &str, token: &Token<'_>) -> Result<(), CompileError> {
        if self.out.last().is_some_and(|t| t.op == Opcode::NoOp && t.mode != 0) {
            return Err(CompileError::invalid(
                "Cannot apply '*' modifier on keywords",
                token.text,
                token.offset,
            ));
        }
        match keyword {
            "act" | "chapter" => self.block(token, false),
            "function" => self.block(token, true),
            "perform" => self.jump(token, true),
            "next" => self.jump(token, false),
            "select" => self.select(token, false),
            "choice" => self.declare_choice(token),
            "call" => self.call(token),
            "repeat" => {
                let target = self.repeat_target();
                self.push(OpToken::new(Opcode::Jump, token.offset).name(target));
                Ok(())
            }
            "finish" | "terminate" => {
                let mode = u8::from(keyword == "finish");
                self.push(OpToken::new(Opcode::Halt, token.offset).mode(mode));
                Ok(())
            }
            _ => Err(CompileError::invalid(
                format!("Invalid keyword '{keyword}'"),
                token.text,
                token.offset,
            )),
        }
    }

    fn repeat_target(&self) -> String {
        self.scope.current().unwrap_or_else(|| ROOT_LABEL.to_owned())
    }

    fn resolve(&self, target: &Token<'_>, text: &str) -> Result<String, CompileError> {
        if !is_path(text) {
            return Err(CompileError::invalid(
                format!("Invalid jump target '{text}'"),
                target.text,
                target.offset,
            ));
        }
        self.scope.resolve(text).ok_or_else(|| {
            CompileError::invalid(
                format!("Jump target '{text}' climbs above the top level"),
                target.text,
                target.offset,
            )
        })
    }

    fn block(&mut self, token: &Token<'_>, function: bool) -> Result<(), CompileError> {
        let name_token = self.expect(TokenKind::Word, token, "Missing block name")?;
        let name = name_token.text;
        if RESERVED.contains(&name) {
            return Err(CompileError::invalid(
                format!("Cannot use keyword '{name}' as a block name"),
                name,
                name_token.offset,
            ));
        }
        let name = self.checked_name(name, &name_token, "block")?;
        let path = self.scope.child(name);
        let params = if function {
            let params = self.expect(TokenKind::Parens, &name_token, "Missing function parameters")?;
            let params = pack::parse(&params, PackRules::default(), &self.scope)?;
            if self.functions.insert(path.clone(), params.len()).is_some() {
                return Err(CompileError::failed(
                    format!("Function '{path}' already exists"),
                    name,
                    name_token.offset,
                ));
            }
            Some(params)
        } else {
            None
        };
        let open = self.expect(TokenKind::OpenBrace, &name_token, "Missing '{' after block name")?;

        let end = format!("{path}[end]");
        self.push(OpToken::new(Opcode::Jump, token.offset).name(end.clone()).mode(JUMP_SKIP));
        self.push(OpToken::new(Opcode::Next, token.offset).entry(path.clone()));
        match params {
            Some(params) => self.scope.enter_function(name, &path, params),
            None => self.scope.enter(name),
        }
        self.statements(Some(&open))?;
        self.scope.leave();
        self.push(OpToken::new(Opcode::Halt, token.offset).mode(1));
        self.push(OpToken::new(Opcode::Next, token.offset).entry(end));
        Ok(())
    }

    fn jump(&mut self, token: &Token<'_>, performing: bool) -> Result<(), CompileError> {
        let target = self.expect(TokenKind::Word, token, "Missing jump target")?;
        match target.text {
            "select" => self.select(token, performing),
            "choice" => self.choice(token, performing),
            "none" => Ok(()),
            "repeat" => {
                let label = self.repeat_target();
                self.push(OpToken::new(Opcode::Jump, token.offset).name(label));
                Ok(())
            }
            "finish" | "terminate" => Err(CompileError::invalid(
                "Cannot use this keyword as a jump target",
                target.text,
                target.offset,
            )),
            text => {
                let path = self.resolve(&target, text)?;
                self.push(
                    OpToken::new(Opcode::Jump, token.offset)
                        .name(path)
                        .mode(u8::from(performing)),
                );
                Ok(())
            }
        }
    }

    fn targets(&mut self, after: &Token<'_>) -> Result<Vec<String>, CompileError> {
        let list = self.expect(TokenKind::Parens, after, "Missing jump target list")?;
        let rules = PackRules {
            paths: true,
            ..PackRules::default()
        };
        let targets = pack::parse(&list, rules, &self.scope)?;
        if targets.is_empty() {
            return Err(CompileError::invalid("Jump target list is empty", list.text, list.offset));
        }
        Ok(targets)
    }

    fn select(&mut self, token: &Token<'_>, performing: bool) -> Result<(), CompileError> {
        let mode = self.expect(TokenKind::Word, token, "Missing select mode")?;
        let targets = self.targets(&mode)?;
        let count = targets.len() as u64;
        let ret = if performing { BRANCH_RETURN_BIT } else { 0 };
        if mode.text == "random" {
            let mut branch = OpToken::new(Opcode::Jump, token.offset).mode(BRANCH_RANDOM | ret);
            branch.range = count;
            self.push(branch);
        } else if let Some(var) = mode.text.strip_prefix('$') {
            let var = self.checked_name(var, &mode, "variable")?;
            let mut request = OpToken::new(Opcode::GetValue, token.offset).name(var).mode(1);
            request.range = count - 1;
            self.push(request);
            let mut branch = OpToken::new(Opcode::Jump, token.offset).mode(BRANCH_EXPLICIT | ret);
            branch.range = count;
            self.push(branch);
        } else {
            return Err(CompileError::invalid(
                format!("Invalid select mode '{}'", mode.text),
                mode.text,
                mode.offset,
            ));
        }
        let exit = format!("{}[select@{}]", self.scope.current().unwrap_or_default(), token.offset);
        self.branch_entries(&targets, &exit, performing, token)
    }

    fn declare_choice(&mut self, token: &Token<'_>) -> Result<(), CompileError> {
        let name_token = self.expect(TokenKind::Word, token, "Missing choice name")?;
        let name = self.checked_name(name_token.text, &name_token, "choice")?;
        let options = self.expect(TokenKind::Parens, &name_token, "Missing choice options")?;
        let options = pack::parse(&options, substituting(), &self.scope)?;
        let path = format!("{}[choice]", self.scope.child(name));
        self.choices.insert(path, options);
        Ok(())
    }

    fn choice(&mut self, token: &Token<'_>, performing: bool) -> Result<(), CompileError> {
        let name_token = self.expect(TokenKind::Word, token, "Missing choice name")?;
        let path = format!("{}[choice]", self.resolve(&name_token, name_token.text)?);
        let Some(options) = self.choices.get(&path).cloned() else {
            return Err(CompileError::invalid(
                format!("Unknown choice '{}'", name_token.text),
                name_token.text,
                name_token.offset,
            ));
        };
        let targets = self.targets(&name_token)?;
        let ret = if performing { BRANCH_RETURN_BIT } else { 0 };

        let mut request = OpToken::new(Opcode::GetValue, token.offset).name(path.clone()).mode(3);
        request.pack = options;
        self.push(request);
        let mut branch = OpToken::new(Opcode::Jump, token.offset).mode(BRANCH_EXPLICIT | ret);
        branch.range = targets.len() as u64;
        self.push(branch);
        let exit = format!("{path}@{}", token.offset);
        self.branch_entries(&targets, &exit, performing, token)
    }

    /// Emits one fixed-width entry per target, then the exit label.
    fn branch_entries(
        &mut self,
        targets: &[String],
        exit: &str,
        performing: bool,
        token: &Token<'_>,
    ) -> Result<(), CompileError> {
        for target in targets {
            match target.as_str() {
                "none" if performing => self.halt_entry(1, token),
                "none" => self.push(OpToken::new(Opcode::Jump, token.offset).name(exit).mode(JUMP_SKIP)),
                "finish" => self.halt_entry(1, token),
                "terminate" => self.halt_entry(0, token),
                "repeat" => {
                    let label = self.repeat_target();
                    self.push(OpToken::new(Opcode::Jump, token.offset).name(label));
                }
                path => {
                    let path = self.resolve(token, path)?;
                    self.push(OpToken::new(Opcode::Jump, token.offset).name(path));
                }
            }
        }
        self.push(OpToken::new(Opcode::Next, token.offset).entry(exit));
        Ok(())
    }

    /// A halt padded to the width of a jump entry.
    fn halt_entry(&mut self, mode: u8, token: &Token<'_>) {
        self.push(OpToken::new(Opcode::Halt, token.offset).mode(mode));
        for _ in 0..OPERAND_WORDS {
            self.push(OpToken::new(Opcode::Next, token.offset));
        }
    }

    fn call(&mut self, token: &Token<'_>) -> Result<(), CompileError> {
        let name_token = self.expect(TokenKind::Word, token, "Missing function name")?;
        let path = self.resolve(&name_token, name_token.text)?;
        let args = self.expect(TokenKind::Parens, &name_token, "Missing function arguments")?;
        let args = pack::parse(&args, substituting(), &self.scope)?;
        self.calls.push(PendingCall {
            path: path.clone(),
            args: args.len(),
            fragment: name_token.text.to_owned(),
            offset: name_token.offset,
        });
        let mut op = OpToken::new(Opcode::Invoke, token.offset).name(path);
        op.pack = args;
        self.push(op);
        Ok(())
    }

    fn check_calls(&self) -> Result<(), CompileError> {
        for call in &self.calls {
            match self.functions.get(&call.path) {
                None => {
                    return Err(CompileError::invalid(
                        format!("Unknown function '{}'", call.path),
                        &call.fragment,
                        call.offset,
                    ));
                }
                Some(&needed) if call.args < needed => {
                    return Err(CompileError::invalid(
                        format!(
                            "Too few arguments for '{}': needs {needed}, got {}",
                            call.path, call.args
                        ),
                        &call.fragment,
                        call.offset,
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

fn substituting() -> PackRules {
    PackRules {
        substitutions: true,
        ..PackRules::default()
    }
}

/// Parses `RGB`, `RGBA`, `RRGGBB` or `RRGGBBAA` (optionally `0x`-prefixed) into
/// `0xRRGGBBAA`. Missing alpha is opaque.
#[must_use]
pub fn hex_color(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let expanded: String = match digits.len() {
        3 | 4 => digits.chars().flat_map(|c| [c, c]).collect(),
        6 | 8 => digits.to_owned(),
        _ => return None,
    };
    let value = u64::from_str_radix(&expanded, 16).ok()?;
    Some(if expanded.len() == 6 { (value << 8) | 0xFF } else { value })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::compile::lexer::tokenize;

    fn ops(source: &str) -> Vec<OpToken> {
        build(&tokenize(source).unwrap()).unwrap()
    }

    fn err(source: &str) -> CompileError {
        build(&tokenize(source).unwrap()).unwrap_err()
    }

    #[test]
    fn hex_colors() {
        assert_eq!(hex_color("FF0000"), Some(0xFF00_00FF));
        assert_eq!(hex_color("f00"), Some(0xFF00_00FF));
        assert_eq!(hex_color("f008"), Some(0xFF00_0088));
        assert_eq!(hex_color("0x11223344"), Some(0x1122_3344));
        assert_eq!(hex_color("12345"), None);
        assert_eq!(hex_color("GG0000"), None);
    }

    #[test]
    fn block_layout() {
        let out = ops(r#":act intro { "Hi" }"#);
        let shape: Vec<(Opcode, &str, Option<&str>)> = out
            .iter()
            .map(|t| (t.op, t.name.as_str(), t.entry.as_deref()))
            .collect();
        assert_eq!(
            shape,
            [
                (Opcode::Jump, "intro[end]", None),
                (Opcode::Next, "", Some("intro")),
                (Opcode::Line, "Hi", None),
                (Opcode::Halt, "", None),
                (Opcode::Next, "", Some("intro[end]")),
            ]
        );
        assert_eq!(out[0].mode, JUMP_SKIP);
        assert_eq!(out[3].mode, 1);
    }

    #[test]
    fn nested_blocks_prefix_labels() {
        let out = ops(":act a { :act b { :next c :next ~d :next :e } }");
        let jumps: Vec<&str> = out
            .iter()
            .filter(|t| t.op == Opcode::Jump)
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(jumps, ["a[end]", "a:b[end]", "a:b:c", "a:d", "e"]);
    }

    #[test]
    fn cast_modes() {
        let out = ops("[..., bob, amy] [] [sue]");
        let modes: Vec<(u8, &str)> = out.iter().map(|t| (t.mode, t.name.as_str())).collect();
        assert_eq!(modes, [(2, ""), (1, "bob"), (1, "amy"), (0, ""), (0, "sue")]);
    }

    #[test]
    fn named_call_forms() {
        let out = ops(r#"$music(a, b) $mood "calm" $speed fast +flag -"#);
        assert_eq!(out[0].pack, ["a", "b"]);
        assert_eq!(out[1].pack, ["calm"]);
        assert_eq!(out[2].pack, ["fast"]);
        assert_eq!((out[3].name.as_str(), out[3].value), ("flag", 2));
        assert_eq!((out[4].name.as_str(), out[4].value), ("", 1));
    }

    #[test]
    fn select_emits_fixed_width_entries() {
        let out = ops(":perform select random (a, finish, none)");
        let kinds: Vec<Opcode> = out.iter().map(|t| t.op).collect();
        assert_eq!(kinds[0], Opcode::Jump);
        assert_eq!(out[0].mode, BRANCH_RANDOM | BRANCH_RETURN_BIT);
        assert_eq!(out[0].range, 3);
        assert_eq!(&kinds[1..3], [Opcode::Jump, Opcode::Halt]);
        assert!(out.last().unwrap().entry.as_deref().unwrap().starts_with("[select@"));
    }

    #[test]
    fn function_arguments_become_references() {
        let out = ops(r#":function greet (who) { "Hello, %who%!" @wave(%who) }"#);
        let line = out.iter().find(|t| t.op == Opcode::Line).unwrap();
        assert!(line.name.starts_with(crate::engine::INTERPOLATE_MARKER));
        let action = out.iter().find(|t| t.op == Opcode::Action).unwrap();
        assert!(action.pack[0].starts_with(crate::engine::SUBSTITUTE_MARKER));
    }

    #[test]
    fn errors_name_the_fragment() {
        let e = err("#12345");
        assert_eq!(e.fragment, "#12345");
        assert!(e.message.contains("hex color"));

        let e = err(":act { }");
        assert!(e.message.contains("Missing block name"), "got: {}", e.message);

        let e = err(":act intro \"x\"");
        assert!(e.message.contains("Missing '{'"), "got: {}", e.message);

        let e = err(":act intro { \"x\"");
        assert_eq!(e.kind, crate::error::CompileErrorKind::FailedAction);

        let e = err("* :next a");
        assert!(e.message.contains("'*'"), "got: {}", e.message);

        let e = err("$name");
        assert!(e.message.contains("Missing value"), "got: {}", e.message);

        let e = err(":call nowhere ()");
        assert!(e.message.contains("Unknown function"), "got: {}", e.message);

        let e = err(":function f (a, b) { } :call f (x)");
        assert!(e.message.contains("Too few arguments"), "got: {}", e.message);

        let e = err(":act none { }");
        assert!(e.message.contains("keyword"), "got: {}", e.message);
    }
}
