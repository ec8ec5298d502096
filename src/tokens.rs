//! Terminal and nonterminal catalogue shared by the scanner, the grammar and the parser tables.

use std::fmt::{Debug, Display};

use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::source::{Position, SourceSpan};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumCount, EnumIter, strum::Display,
)]
pub enum TokenKind {
    #[strum(to_string = "end of input")]
    Eof,
    #[strum(to_string = "unmatched character")]
    Unmatched,
    #[strum(to_string = "whitespace")]
    Whitespace,
    #[strum(to_string = "identifier")]
    Identifier,
    #[strum(to_string = "integer")]
    Integer,
    #[strum(to_string = "float")]
    Float,
    #[strum(to_string = "string")]
    String,

    #[strum(to_string = "'if'")]
    If,
    #[strum(to_string = "'else'")]
    Else,
    #[strum(to_string = "'while'")]
    While,
    #[strum(to_string = "'do'")]
    Do,
    #[strum(to_string = "'for'")]
    For,
    #[strum(to_string = "'function'")]
    Function,
    #[strum(to_string = "'map'")]
    Map,
    #[strum(to_string = "'use'")]
    Use,
    #[strum(to_string = "'delete'")]
    Delete,
    #[strum(to_string = "'return'")]
    Return,
    #[strum(to_string = "'true'")]
    True,
    #[strum(to_string = "'false'")]
    False,
    #[strum(to_string = "'X'")]
    CoordX,
    #[strum(to_string = "'Y'")]
    CoordY,

    #[strum(to_string = "'('")]
    LeftParen,
    #[strum(to_string = "')'")]
    RightParen,
    #[strum(to_string = "'{'")]
    LeftBrace,
    #[strum(to_string = "'}'")]
    RightBrace,
    #[strum(to_string = "'['")]
    LeftBracket,
    #[strum(to_string = "']'")]
    RightBracket,
    #[strum(to_string = "','")]
    Comma,
    #[strum(to_string = "';'")]
    Semicolon,
    #[strum(to_string = "'.'")]
    Dot,
    #[strum(to_string = "':'")]
    Colon,
    #[strum(to_string = "'?'")]
    Question,
    #[strum(to_string = "'='")]
    Assign,
    #[strum(to_string = "'=='")]
    Equal,
    #[strum(to_string = "'!='")]
    NotEqual,
    #[strum(to_string = "'~='")]
    Approx,
    #[strum(to_string = "'<'")]
    Less,
    #[strum(to_string = "'>'")]
    Greater,
    #[strum(to_string = "'<='")]
    LessEqual,
    #[strum(to_string = "'>='")]
    GreaterEqual,
    #[strum(to_string = "'<<'")]
    ObjectOpen,
    #[strum(to_string = "'>>'")]
    ObjectClose,
    #[strum(to_string = "'->'")]
    Arrow,
    #[strum(to_string = "'+'")]
    Plus,
    #[strum(to_string = "'-'")]
    Minus,
    #[strum(to_string = "'*'")]
    Star,
    #[strum(to_string = "'/'")]
    Slash,
    #[strum(to_string = "'%'")]
    Percent,
    #[strum(to_string = "'^'")]
    Caret,
    #[strum(to_string = "'!'")]
    Bang,
    #[strum(to_string = "'&&'")]
    And,
    #[strum(to_string = "'||'")]
    Or,
}

pub const KEYWORDS: &[(&str, TokenKind)] = &[
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("while", TokenKind::While),
    ("do", TokenKind::Do),
    ("for", TokenKind::For),
    ("function", TokenKind::Function),
    ("map", TokenKind::Map),
    ("use", TokenKind::Use),
    ("delete", TokenKind::Delete),
    ("return", TokenKind::Return),
    ("true", TokenKind::True),
    ("false", TokenKind::False),
    ("X", TokenKind::CoordX),
    ("Y", TokenKind::CoordY),
];

impl TokenKind {
    pub fn index(self) -> usize {
        self as usize
    }

    /// Kinds the parser can be asked about. The scanner never hands whitespace to the parser.
    pub fn grammar_terminals() -> impl Iterator<Item = TokenKind> {
        TokenKind::iter().filter(|kind| *kind != TokenKind::Whitespace)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: SourceSpan,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumCount, strum::Display)]
pub enum NonTerminal {
    Accept,
    Program,
    StmtList,
    Stmt,
    Assignment,
    Lhs,
    Expr,
    LogicalOr,
    LogicalAnd,
    Compare,
    AddSub,
    MulDiv,
    Unary,
    Power,
    ExtValue,
    Value,
    ObjectLit,
    Props,
    Args,
    ArgList,
    Params,
    ParamList,
    PropName,
}

impl NonTerminal {
    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    T(TokenKind),
    N(NonTerminal),
}

impl Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Symbol::T(kind) => Display::fmt(kind, f),
            Symbol::N(non_terminal) => Display::fmt(non_terminal, f),
        }
    }
}

const _: () = assert!(TokenKind::COUNT <= 128);

/// Bit set over [`TokenKind`], used for lookahead sets.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TerminalSet(u128);

impl TerminalSet {
    pub fn empty() -> Self {
        Self(0)
    }
    pub fn single(kind: TokenKind) -> Self {
        Self(1 << kind.index())
    }
    pub fn insert(&mut self, kind: TokenKind) -> bool {
        let before = self.0;
        self.0 |= 1 << kind.index();
        before != self.0
    }
    /// Adds every member of `other`; returns whether anything was new.
    pub fn union_with(&mut self, other: TerminalSet) -> bool {
        let before = self.0;
        self.0 |= other.0;
        before != self.0
    }
    pub fn contains(&self, kind: TokenKind) -> bool {
        self.0 & (1 << kind.index()) != 0
    }
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
    pub fn iter(self) -> impl Iterator<Item = TokenKind> {
        TokenKind::iter().filter(move |kind| self.contains(*kind))
    }
}

impl Debug for TerminalSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn terminal_set_membership() {
        let mut set = TerminalSet::empty();
        assert!(set.is_empty());
        assert!(set.insert(TokenKind::Semicolon));
        assert!(!set.insert(TokenKind::Semicolon));
        assert!(set.union_with(TerminalSet::single(TokenKind::Or)));
        assert!(set.contains(TokenKind::Or));
        assert!(!set.contains(TokenKind::And));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![TokenKind::Semicolon, TokenKind::Or]
        );
    }

    #[test]
    fn kinds_render_as_source_text() {
        assert_eq!(TokenKind::ObjectOpen.to_string(), "'<<'");
        assert_eq!(TokenKind::Identifier.to_string(), "identifier");
        assert_eq!(TokenKind::Eof.to_string(), "end of input");
    }
}
