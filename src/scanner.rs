use lazy_static::lazy_static;

use crate::{
    source::{LineIndex, SourceSpan},
    tokens::{Token, TokenKind, KEYWORDS},
};

/// Keyword automaton. Node 0 is the root; every other node is reached by one letter.
struct KeywordTrie {
    nodes: Vec<TrieNode>,
}

#[derive(Default)]
struct TrieNode {
    edges: Vec<(u8, usize)>,
    keyword: Option<TokenKind>,
}

impl KeywordTrie {
    const ROOT: usize = 0;

    fn new(keywords: &[(&str, TokenKind)]) -> Self {
        let mut trie = KeywordTrie {
            nodes: vec![TrieNode::default()],
        };
        for (word, kind) in keywords {
            let mut node = Self::ROOT;
            for byte in word.bytes() {
                node = match trie.child(node, byte) {
                    Some(next) => next,
                    None => {
                        trie.nodes.push(TrieNode::default());
                        let next = trie.nodes.len() - 1;
                        trie.nodes[node].edges.push((byte, next));
                        next
                    }
                };
            }
            trie.nodes[node].keyword = Some(*kind);
        }
        trie
    }

    fn child(&self, node: usize, byte: u8) -> Option<usize> {
        self.nodes[node]
            .edges
            .iter()
            .find(|(edge, _)| *edge == byte)
            .map(|(_, next)| *next)
    }

    fn keyword(&self, node: usize) -> Option<TokenKind> {
        self.nodes[node].keyword
    }
}

lazy_static! {
    static ref KEYWORD_TRIE: KeywordTrie = KeywordTrie::new(KEYWORDS);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LexState {
    Start,
    Whitespace,
    /// Inside an identifier; `Some(node)` while the text so far is still a keyword prefix.
    Word(Option<usize>),
    Integer,
    IntegerDot,
    LeadingDot,
    Fraction,
    ExponentMarker,
    ExponentSign,
    Exponent,
    StringBody,
    StringEscape,
    StringClosed,
    /// First character of an operator that may continue into a two character operator.
    Prefix(u8),
    Operator(TokenKind),
}

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn is_identifier_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte == b'$'
}

fn is_identifier_continue(byte: u8) -> bool {
    is_identifier_start(byte) || byte.is_ascii_digit()
}

fn single_char_operator(byte: u8) -> Option<TokenKind> {
    Some(match byte {
        b'(' => TokenKind::LeftParen,
        b')' => TokenKind::RightParen,
        b'{' => TokenKind::LeftBrace,
        b'}' => TokenKind::RightBrace,
        b'[' => TokenKind::LeftBracket,
        b']' => TokenKind::RightBracket,
        b',' => TokenKind::Comma,
        b';' => TokenKind::Semicolon,
        b':' => TokenKind::Colon,
        b'?' => TokenKind::Question,
        b'+' => TokenKind::Plus,
        b'*' => TokenKind::Star,
        b'/' => TokenKind::Slash,
        b'%' => TokenKind::Percent,
        b'^' => TokenKind::Caret,
        b'=' => TokenKind::Assign,
        b'!' => TokenKind::Bang,
        b'<' => TokenKind::Less,
        b'>' => TokenKind::Greater,
        b'-' => TokenKind::Minus,
        _ => return None,
    })
}

fn two_char_operator(first: u8, second: u8) -> Option<TokenKind> {
    Some(match (first, second) {
        (b'=', b'=') => TokenKind::Equal,
        (b'!', b'=') => TokenKind::NotEqual,
        (b'~', b'=') => TokenKind::Approx,
        (b'<', b'=') => TokenKind::LessEqual,
        (b'>', b'=') => TokenKind::GreaterEqual,
        (b'<', b'<') => TokenKind::ObjectOpen,
        (b'>', b'>') => TokenKind::ObjectClose,
        (b'-', b'>') => TokenKind::Arrow,
        (b'&', b'&') => TokenKind::And,
        (b'|', b'|') => TokenKind::Or,
        _ => return None,
    })
}

fn is_operator_prefix(byte: u8) -> bool {
    matches!(
        byte,
        b'=' | b'!' | b'~' | b'<' | b'>' | b'-' | b'&' | b'|'
    )
}

fn step(state: LexState, byte: u8) -> Option<LexState> {
    use LexState::*;
    match state {
        Start => match byte {
            b if is_whitespace(b) => Some(Whitespace),
            b if is_identifier_start(b) => Some(Word(KEYWORD_TRIE.child(KeywordTrie::ROOT, b))),
            b if b.is_ascii_digit() => Some(Integer),
            b'.' => Some(LeadingDot),
            b'\'' => Some(StringBody),
            b if is_operator_prefix(b) => Some(Prefix(b)),
            b => single_char_operator(b).map(Operator),
        },
        Whitespace => is_whitespace(byte).then(|| Whitespace),
        Word(node) => is_identifier_continue(byte)
            .then(|| Word(node.and_then(|node| KEYWORD_TRIE.child(node, byte)))),
        Integer => match byte {
            b if b.is_ascii_digit() => Some(Integer),
            b'.' => Some(IntegerDot),
            _ => None,
        },
        IntegerDot | LeadingDot => byte.is_ascii_digit().then(|| Fraction),
        Fraction => match byte {
            b if b.is_ascii_digit() => Some(Fraction),
            b'e' | b'E' => Some(ExponentMarker),
            _ => None,
        },
        ExponentMarker => match byte {
            b'+' | b'-' => Some(ExponentSign),
            b if b.is_ascii_digit() => Some(Exponent),
            _ => None,
        },
        ExponentSign | Exponent => byte.is_ascii_digit().then(|| Exponent),
        StringBody => match byte {
            b'\'' => Some(StringClosed),
            b'\\' => Some(StringEscape),
            _ => Some(StringBody),
        },
        StringEscape => Some(StringBody),
        // a doubled quote continues the literal
        StringClosed => (byte == b'\'').then(|| StringBody),
        Prefix(first) => two_char_operator(first, byte).map(Operator),
        Operator(_) => None,
    }
}

fn accepting(state: LexState) -> Option<TokenKind> {
    use LexState::*;
    match state {
        Whitespace => Some(TokenKind::Whitespace),
        Word(Some(node)) => Some(KEYWORD_TRIE.keyword(node).unwrap_or(TokenKind::Identifier)),
        Word(None) => Some(TokenKind::Identifier),
        Integer => Some(TokenKind::Integer),
        Fraction | Exponent => Some(TokenKind::Float),
        LeadingDot => Some(TokenKind::Dot),
        StringClosed => Some(TokenKind::String),
        Prefix(first) => single_char_operator(first),
        Operator(kind) => Some(kind),
        Start | IntegerDot | ExponentMarker | ExponentSign | StringBody | StringEscape => None,
    }
}

/// Longest match starting at `offset`. Returns the kind, the matched text and the offset just
/// past it. Input that matches nothing yields a one character [`TokenKind::Unmatched`].
pub fn next_token(source: &str, offset: usize) -> (TokenKind, &str, usize) {
    if offset >= source.len() {
        return (TokenKind::Eof, "", source.len());
    }

    let bytes = source.as_bytes();
    let mut state = LexState::Start;
    let mut last_accept = None;
    let mut cursor = offset;
    while cursor < bytes.len() {
        match step(state, bytes[cursor]) {
            Some(next) => {
                state = next;
                cursor += 1;
                if let Some(kind) = accepting(state) {
                    last_accept = Some((kind, cursor));
                }
            }
            None => break,
        }
    }

    match last_accept {
        Some((kind, end)) => (kind, &source[offset..end], end),
        None => {
            let width = source[offset..]
                .chars()
                .next()
                .map(char::len_utf8)
                .unwrap_or(1);
            (
                TokenKind::Unmatched,
                &source[offset..offset + width],
                offset + width,
            )
        }
    }
}

/// Blanks out whole-line `//` comments. Byte offsets and line numbers are preserved so
/// diagnostics still point into the text the user wrote.
pub fn strip_comment_lines(source: &str) -> String {
    source
        .split_inclusive('\n')
        .map(|line| {
            if line.trim_start().starts_with("//") {
                line.char_indices()
                    .flat_map(|(_, ch)| {
                        let replacement = if ch == '\n' || ch == '\r' { ch } else { ' ' };
                        std::iter::repeat(replacement).take(if replacement == ' ' {
                            ch.len_utf8()
                        } else {
                            1
                        })
                    })
                    .collect::<String>()
            } else {
                line.to_string()
            }
        })
        .collect()
}

/// Strips the quotes of a string literal, collapses doubled quotes and removes backslash
/// escapes in a single pass.
pub fn unescape_string_literal(lexeme: &str) -> String {
    let inner = lexeme
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .unwrap_or(lexeme);
    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    value.push(escaped);
                }
            }
            '\'' if chars.peek() == Some(&'\'') => {
                chars.next();
                value.push('\'');
            }
            ch => value.push(ch),
        }
    }
    value
}

pub struct Scanner {
    source: String,
    lines: LineIndex,
    offset: usize,
    at_end: bool,
}

impl Scanner {
    pub fn new(source: &str) -> Self {
        let source = strip_comment_lines(source);
        Self {
            lines: LineIndex::new(&source),
            source,
            offset: 0,
            at_end: false,
        }
    }
}

impl Iterator for Scanner {
    type Item = Token;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at_end {
            return None;
        }

        loop {
            let start = self.offset;
            let (kind, lexeme, end) = next_token(&self.source, start);
            self.offset = end;
            match kind {
                TokenKind::Whitespace => continue,
                TokenKind::Eof => self.at_end = true,
                _ => {}
            }
            let span = if kind == TokenKind::Eof {
                SourceSpan::new(start.into(), 0.into())
            } else {
                SourceSpan::from(start..end)
            };
            return Some(Token {
                kind,
                lexeme: lexeme.to_string(),
                span,
                position: self.lines.position(&self.source, start.into()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<(TokenKind, String)> {
        Scanner::new(source)
            .map(|token| (token.kind, token.lexeme))
            .collect()
    }

    fn kind_list(source: &str) -> Vec<TokenKind> {
        Scanner::new(source).map(|token| token.kind).collect()
    }

    #[test]
    fn keywords_only_commit_at_identifier_end() {
        use TokenKind::*;
        assert_eq!(
            kind_list("do done delete deleted for format function functions X Xs"),
            vec![
                Do, Identifier, Delete, Identifier, For, Identifier, Function, Identifier,
                CoordX, Identifier, Eof
            ]
        );
        assert_eq!(kind_list("If"), vec![Identifier, Eof]);
    }

    #[test]
    fn numbers_and_member_access() {
        use TokenKind::*;
        assert_eq!(
            kinds("1 2.5 3.5e-2 .5 a.b 1.x 4e"),
            vec![
                (Integer, "1".to_string()),
                (Float, "2.5".to_string()),
                (Float, "3.5e-2".to_string()),
                (Float, ".5".to_string()),
                (Identifier, "a".to_string()),
                (Dot, ".".to_string()),
                (Identifier, "b".to_string()),
                (Integer, "1".to_string()),
                (Dot, ".".to_string()),
                (Identifier, "x".to_string()),
                (Integer, "4".to_string()),
                (Identifier, "e".to_string()),
                (Eof, "".to_string()),
            ]
        );
    }

    #[test]
    fn multi_character_operators_use_longest_match() {
        use TokenKind::*;
        assert_eq!(
            kind_list("== = != ! <= << < >= >> > -> - ~= && ||"),
            vec![
                Equal, Assign, NotEqual, Bang, LessEqual, ObjectOpen, Less, GreaterEqual,
                ObjectClose, Greater, Arrow, Minus, Approx, And, Or, Eof
            ]
        );
    }

    #[test]
    fn strings_unescape_at_finalization() {
        let tokens = kinds(r"'it''s' 'a\'b' 'c\\d'");
        assert_eq!(tokens[0], (TokenKind::String, "'it''s'".to_string()));
        assert_eq!(unescape_string_literal(&tokens[0].1), "it's");
        assert_eq!(unescape_string_literal(&tokens[1].1), "a'b");
        assert_eq!(unescape_string_literal(&tokens[2].1), r"c\d");
    }

    #[test]
    fn unmatched_input_becomes_a_token() {
        use TokenKind::*;
        assert_eq!(kind_list("a # b"), vec![Identifier, Unmatched, Identifier, Eof]);
        assert_eq!(kind_list("'open"), vec![Unmatched, Identifier, Eof]);
        assert_eq!(kind_list("a ~ b"), vec![Identifier, Unmatched, Identifier, Eof]);
    }

    #[test]
    fn comment_lines_are_blanked_before_lexing() {
        let source = "a = 1;\n  // b = 2;\nc = 3; // trailing";
        let stripped = strip_comment_lines(source);
        assert_eq!(stripped.len(), source.len());
        assert_eq!(stripped, "a = 1;\n           \nc = 3; // trailing");

        let tokens: Vec<_> = Scanner::new(source).collect();
        let c = tokens
            .iter()
            .find(|token| token.lexeme == "c")
            .expect("c is scanned");
        assert_eq!(c.position.line, 3);
        assert_eq!(c.position.column, 1);
    }
}
