//! Lexical analysis for scena scripts.
//!
//! Tokens keep their source slice and byte offset; classification beyond the
//! token class (sigils, keywords) is left to the tree builder.
//!
//! # Token classes
//!
//! In priority order: quoted strings with backslash escapes, `(...)` and `[...]`
//! packs closed by the first matching bracket, `//` and `/* */` comments, runs of
//! identifier characters (word characters plus `&!@#$%+-':~`), and the single
//! punctuation characters `*.,;{}`. Whitespace separates tokens.

use logos::Logos;

use crate::error::CompileError;

/// Lexical class of a [`Token`].
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum TokenKind {
    #[regex(r#""(?:[^"\\]|\\(?:.|\n))*""#)]
    Str,
    #[regex(r"\([^)]*\)")]
    Parens,
    #[regex(r"\[[^\]]*\]")]
    Brackets,
    #[regex(r"//[^\n]*")]
    LineComment,
    #[regex(r"/\*(?:[^*]|\*+[^*/])*\*+/")]
    BlockComment,
    #[regex(r"[\w&!@#$%+\-':~]+")]
    Word,
    #[token("*")]
    Star,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
}

/// A token and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
    /// Byte offset of `text` in the source.
    pub offset: usize,
}

impl Token<'_> {
    #[must_use]
    pub fn is_comment(&self) -> bool {
        matches!(self.kind, TokenKind::LineComment | TokenKind::BlockComment)
    }

    /// Text between the enclosing quotes or brackets of a string or pack token.
    #[must_use]
    pub fn inner(&self) -> &str {
        match self.kind {
            TokenKind::Str | TokenKind::Parens | TokenKind::Brackets => {
                self.text.get(1..self.text.len().saturating_sub(1)).unwrap_or_default()
            }
            _ => self.text,
        }
    }
}

/// Splits `source` into tokens, comments included.
///
/// # Errors
/// Fails on the first character no token class accepts, such as an unterminated
/// string or a lone `/`. Strings and packs may not contain NUL, which separates
/// pool entries in a compiled binary.
pub fn tokenize(source: &str) -> Result<Vec<Token<'_>>, CompileError> {
    let mut lexer = TokenKind::lexer(source);
    let mut tokens = Vec::new();
    while let Some(kind) = lexer.next() {
        let span = lexer.span();
        match kind {
            Ok(TokenKind::Str | TokenKind::Parens | TokenKind::Brackets) if lexer.slice().contains('\0') => {
                return Err(CompileError::invalid(
                    "String literals cannot contain NUL",
                    lexer.slice(),
                    span.start,
                ));
            }
            Ok(kind) => tokens.push(Token {
                kind,
                text: lexer.slice(),
                offset: span.start,
            }),
            Err(()) => {
                return Err(CompileError::failed(
                    "Unrecognized character sequence",
                    lexer.slice(),
                    span.start,
                ));
            }
        }
    }
    Ok(tokens)
}

/// Resolves backslash escapes in the body of a quoted string.
#[must_use]
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('v') => out.push('\x0B'),
            Some('a') => out.push('\x07'),
            Some('b') => out.push('\x08'),
            Some('f') => out.push('\x0C'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn sigils_are_words() {
        let tokens = tokenize("@wave !happy '30 #FF0000 ##red +flag -flag :next intro").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text).collect();
        assert_eq!(
            texts,
            ["@wave", "!happy", "'30", "#FF0000", "##red", "+flag", "-flag", ":next", "intro"]
        );
        assert!(tokens.iter().all(|t| t.kind == TokenKind::Word));
    }

    #[test]
    fn packs_close_at_first_bracket() {
        let tokens = tokenize("@act(a, [b, c]) [x, (y)]").unwrap();
        assert_eq!(tokens[1].text, "(a, [b, c])");
        assert_eq!(tokens[2].text, "[x, (y)]");
    }

    #[test]
    fn strings_keep_escaped_quotes() {
        let tokens = tokenize(r#""say \"hi\"" $x"v""#).unwrap();
        assert_eq!(tokens[0].text, r#""say \"hi\"""#);
        assert_eq!(tokens[0].inner(), r#"say \"hi\""#);
        assert_eq!(tokens[2].kind, TokenKind::Str);
    }

    #[test]
    fn comments_and_punctuation() {
        assert_eq!(
            kinds("// line\n/* block\n * more */ * . , ; { }"),
            [
                TokenKind::LineComment,
                TokenKind::BlockComment,
                TokenKind::Star,
                TokenKind::Dot,
                TokenKind::Comma,
                TokenKind::Semicolon,
                TokenKind::OpenBrace,
                TokenKind::CloseBrace,
            ]
        );
    }

    #[test]
    fn unterminated_string_fails() {
        let err = tokenize("\"open").unwrap_err();
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn nul_in_strings_fails() {
        let err = tokenize("\"a\" \"b\0c\"").unwrap_err();
        assert_eq!(err.kind, crate::error::CompileErrorKind::InvalidValue);
        assert_eq!(err.offset, 4);
        assert!(tokenize("@act(\"x\0\")").is_err());
    }

    #[test]
    fn unescape_sequences() {
        assert_eq!(unescape(r"a\nb\tc\\d\q"), "a\nb\tc\\dq");
    }
}
