// Lexer for actor machine `.am` source files.
//
// Uses the `logos` crate for DFA-based lexing. Whitespace (including
// newlines) and `#` line comments are skipped; `;` terminates items.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Actor machine source tokens.
///
/// Identifiers carry no value; use the span to retrieve the text.
#[derive(Logos, Debug, Clone, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+|#[^\n]*")]
pub enum Token {
    // ── Declarations ──
    #[token("actor")]
    Actor,
    #[token("input")]
    Input,
    #[token("output")]
    Output,
    #[token("scope")]
    Scope,
    #[token("transient")]
    Transient,
    #[token("persistent")]
    Persistent,
    #[token("condition")]
    Condition,
    #[token("transition")]
    Transition,
    #[token("initial")]
    Initial,
    #[token("state")]
    State,

    // ── Clauses ──
    #[token("tokens")]
    Tokens,
    #[token("space")]
    Space,
    #[token("guard")]
    Guard,
    #[token("consume")]
    Consume,
    #[token("produce")]
    Produce,
    #[token("reads")]
    Reads,
    #[token("kills")]
    Kills,
    #[token("latency")]
    Latency,

    // ── Instructions ──
    #[token("test")]
    Test,
    #[token("wait")]
    Wait,
    #[token("exec")]
    Exec,
    #[token("else")]
    Else,

    // ── Symbols ──
    #[token("->")]
    Arrow,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token("=")]
    Equals,

    // ── Literals ──
    /// Unsigned integer literal.
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<u64>().ok())]
    Int(u64),

    /// String literal with `\"` and `\\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    /// Identifier: `[a-zA-Z_][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Actor => "actor",
            Token::Input => "input",
            Token::Output => "output",
            Token::Scope => "scope",
            Token::Transient => "transient",
            Token::Persistent => "persistent",
            Token::Condition => "condition",
            Token::Transition => "transition",
            Token::Initial => "initial",
            Token::State => "state",
            Token::Tokens => "tokens",
            Token::Space => "space",
            Token::Guard => "guard",
            Token::Consume => "consume",
            Token::Produce => "produce",
            Token::Reads => "reads",
            Token::Kills => "kills",
            Token::Latency => "latency",
            Token::Test => "test",
            Token::Wait => "wait",
            Token::Exec => "exec",
            Token::Else => "else",
            Token::Arrow => "->",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Semi => ";",
            Token::Equals => "=",
            Token::Int(v) => return write!(f, "{v}"),
            Token::StringLit(s) => return write!(f, "\"{s}\""),
            Token::Ident => "<ident>",
        };
        f.write_str(text)
    }
}

// ── Callbacks ──

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex an actor machine source string into tokens.
///
/// Lexing is non-fatal: errors are collected and the lexer continues past
/// bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──
