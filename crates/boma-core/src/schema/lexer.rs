use std::fmt;

use logos::Logos;

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// A lexical error: an unrecognized stretch of input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized character {lexeme:?} at {line}:{column}")]
pub struct LexError {
    pub lexeme: String,
    pub line: u32,
    pub column: u32,
}

/// Result of tokenizing: all recognized tokens plus any lexical errors.
/// Lexing recovers past bad characters; callers decide whether errors abort.
#[derive(Debug)]
pub struct TokenizeResult {
    pub tokens: Vec<Token>,
    pub errors: Vec<LexError>,
    /// Position just past the last character, used to report errors at
    /// end of input.
    pub end: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

/// Schema token types.
///
/// Keywords are fixed-string matches; a longer word starting with a keyword
/// lexes as an identifier (logos prefers the longest match). Doc comments
/// are kept as tokens so the parser can attach them to the declaration that
/// follows; line and block comments are discarded.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum TokenKind {
    #[token("definition")]
    Definition,
    #[token("caveat")]
    Caveat,
    #[token("relation")]
    Relation,
    #[token("permission")]
    Permission,
    #[token("any")]
    Any,
    #[token("all")]
    All,

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(":")]
    Colon,
    #[token("|")]
    Pipe,
    #[token("#")]
    Hash,
    #[token("*")]
    Star,
    #[token("+")]
    Plus,
    #[token("&")]
    Ampersand,
    #[token("-")]
    Minus,
    #[token("->")]
    Arrow,
    #[token("=")]
    Equals,
    #[token("==")]
    EqEq,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,

    #[regex(r"[0-9]+", parse_int)]
    IntLit(i64),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_owned())]
    Ident(String),

    // Doc comments start with `/**`; the extra star would otherwise make
    // the block-comment pattern match the same slice, so priorities keep
    // the two apart.
    #[regex(r"/\*\*[^*]*\*+([^/*][^*]*\*+)*/", doc_text, priority = 7)]
    DocComment(String),

    #[regex(r"/\*[^*]*\*+([^/*][^*]*\*+)*/", logos::skip, priority = 6)]
    BlockComment,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Definition => write!(f, "'definition'"),
            TokenKind::Caveat => write!(f, "'caveat'"),
            TokenKind::Relation => write!(f, "'relation'"),
            TokenKind::Permission => write!(f, "'permission'"),
            TokenKind::Any => write!(f, "'any'"),
            TokenKind::All => write!(f, "'all'"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Pipe => write!(f, "'|'"),
            TokenKind::Hash => write!(f, "'#'"),
            TokenKind::Star => write!(f, "'*'"),
            TokenKind::Plus => write!(f, "'+'"),
            TokenKind::Ampersand => write!(f, "'&'"),
            TokenKind::Minus => write!(f, "'-'"),
            TokenKind::Arrow => write!(f, "'->'"),
            TokenKind::Equals => write!(f, "'='"),
            TokenKind::EqEq => write!(f, "'=='"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::IntLit(value) => write!(f, "'{value}'"),
            TokenKind::Ident(name) => write!(f, "'{name}'"),
            TokenKind::DocComment(_) => write!(f, "doc comment"),
            TokenKind::BlockComment => write!(f, "comment"),
        }
    }
}

fn parse_int(lex: &mut logos::Lexer<'_, TokenKind>) -> Option<i64> {
    lex.slice().parse().ok()
}

/// Strip the `/** */` delimiters and per-line `*` decoration.
fn doc_text(lex: &mut logos::Lexer<'_, TokenKind>) -> String {
    let raw = lex.slice();
    let body = &raw[3..raw.len() - 2];
    let cleaned: Vec<&str> = body
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .collect();
    cleaned.join("\n").trim().to_owned()
}

/// Byte offsets of line starts, for span-to-position conversion.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                starts.push(offset + 1);
            }
        }
        Self { starts }
    }

    fn position(&self, source: &str, offset: usize) -> Position {
        let line = self.starts.partition_point(|&start| start <= offset);
        let line_start = self.starts[line - 1];
        let column = source[line_start..offset].chars().count() + 1;
        Position {
            line: line as u32,
            column: column as u32,
        }
    }
}

/// Tokenize schema source text.
///
/// Returns every recognized token together with an error per unrecognized
/// character; lexing continues past bad input so all lexical errors in a
/// file surface in one pass.
pub fn tokenize(source: &str) -> TokenizeResult {
    let index = LineIndex::new(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in TokenKind::lexer(source).spanned() {
        let position = index.position(source, range.start);
        match result {
            Ok(kind) => tokens.push(Token { kind, position }),
            Err(()) => errors.push(LexError {
                lexeme: source[range].to_owned(),
                line: position.line,
                column: position.column,
            }),
        }
    }

    let end = index.position(source, source.len());
    TokenizeResult {
        tokens,
        errors,
        end,
    }
}
