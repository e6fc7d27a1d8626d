//! Parameter packs: the comma-separated argument lists inside `(...)` and `[...]`.
//!
//! The inner text of a pack token is re-lexed on its own. Nested packs are
//! flattened into the parent, quoted arguments are unescaped, and bare arguments
//! are checked against the name alphabet.

use logos::Logos;

use crate::{
    compile::{
        lexer::{Token, unescape},
        scope::Scope,
    },
    error::CompileError,
};

/// Marker for "every actor except the following".
pub const EXPANSION: &str = "...";

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum PackToken {
    #[regex(r#""(?:[^"\\]|\\(?:.|\n))*""#)]
    Str,
    #[regex(r"\([^)]*\)")]
    Parens,
    #[regex(r"\[[^\]]*\]")]
    Brackets,
    #[token(",")]
    Comma,
    #[regex(r#"[^,"()\[\]\s]+"#)]
    Bare,
}

/// What a pack may contain.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackRules {
    /// `%param` arguments and `%param%` in strings become argument references.
    pub substitutions: bool,
    /// A leading `...` is accepted.
    pub expansion: bool,
    /// Bare arguments may be block paths (`:`, `~`).
    pub paths: bool,
}

/// True for characters allowed in block, actor, action and parameter names.
#[must_use]
pub fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

#[must_use]
pub fn is_name(text: &str) -> bool {
    !text.is_empty() && text.chars().all(is_name_char)
}

/// True for a jump target: a name with optional `:`/`~` path syntax.
#[must_use]
pub fn is_path(text: &str) -> bool {
    let body = text.strip_prefix(':').unwrap_or(text).trim_start_matches('~');
    !body.is_empty() && body.split(':').all(is_name)
}

/// Parses the pack in `token` into its flattened argument list.
///
/// # Errors
/// Reports the first invalid argument with the pack's source position.
pub fn parse(token: &Token<'_>, rules: PackRules, scope: &Scope) -> Result<Vec<String>, CompileError> {
    let mut out = Vec::new();
    parse_into(token.inner(), token, rules, scope, &mut out)?;
    Ok(out)
}

fn parse_into(
    inner: &str,
    token: &Token<'_>,
    rules: PackRules,
    scope: &Scope,
    out: &mut Vec<String>,
) -> Result<(), CompileError> {
    let error = |message: String| CompileError::invalid(message, token.text, token.offset);
    let mut lexer = PackToken::lexer(inner);
    let mut expecting = true;
    let mut seen_any = false;
    while let Some(kind) = lexer.next() {
        let text = lexer.slice();
        let Ok(kind) = kind else {
            return Err(error(format!("Invalid character '{text}' in parameter pack")));
        };
        if kind == PackToken::Comma {
            if expecting {
                return Err(error("Missing parameter before ','".to_owned()));
            }
            expecting = true;
            continue;
        }
        if !expecting {
            return Err(error(format!("Missing ',' before '{text}'")));
        }
        expecting = false;
        seen_any = true;
        match kind {
            PackToken::Str => {
                let value = unescape(&text[1..text.len() - 1]);
                let value = if rules.substitutions {
                    scope
                        .interpolate(&value)
                        .map_err(|name| error(format!("Function argument '{name}' does not exist")))?
                } else {
                    value
                };
                out.push(value);
            }
            PackToken::Parens | PackToken::Brackets => {
                parse_into(&text[1..text.len() - 1], token, rules, scope, out)?;
            }
            PackToken::Bare if text == EXPANSION => {
                if !rules.expansion || !out.is_empty() {
                    return Err(error("'...' is only allowed as the first argument".to_owned()));
                }
                out.push(EXPANSION.to_owned());
            }
            PackToken::Bare if rules.substitutions && text.starts_with('%') => {
                let name = &text[1..];
                let reference = scope
                    .reference(name)
                    .ok_or_else(|| error(format!("Function argument '{name}' does not exist")))?;
                out.push(reference);
            }
            PackToken::Bare if is_name(text) || (rules.paths && is_path(text)) => out.push(text.to_owned()),
            _ => return Err(error(format!("Invalid parameter '{text}'"))),
        }
    }
    if expecting && seen_any {
        return Err(error("Missing parameter after ','".to_owned()));
    }
    Ok(())
}
