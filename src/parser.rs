use itertools::Itertools;
use miette::Diagnostic;
use thiserror::Error;

use crate::{
    ast::{Node, Program},
    grammar::{Reduction, StackValue, GRAMMAR},
    lalr::{Action, StateId, TABLES},
    source::{Position, SourceSpan},
    tokens::{Token, TokenKind},
    SourceReference,
};

#[derive(Error, Diagnostic, Debug, Clone)]
pub enum ParserError {
    #[error("Syntax error at line {line}, column {column}: unexpected {found}")]
    SyntaxError {
        offset: usize,
        line: usize,
        column: usize,
        expected: Vec<TokenKind>,
        found: TokenKind,
        expected_list: String,
        #[label("expected {expected_list}")]
        found_at: SourceSpan,
        #[source_code]
        source_code: SourceReference,
    },
}

impl ParserError {
    pub fn offset(&self) -> usize {
        match self {
            ParserError::SyntaxError { offset, .. } => *offset,
        }
    }
    pub fn position(&self) -> Position {
        match self {
            ParserError::SyntaxError { line, column, .. } => Position {
                line: *line,
                column: *column,
            },
        }
    }
    pub fn expected(&self) -> &[TokenKind] {
        match self {
            ParserError::SyntaxError { expected, .. } => expected,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ParserOpts {
    is_repl: bool,
}
impl ParserOpts {
    pub fn for_repl(self) -> Self {
        Self { is_repl: true }
    }
}

struct StackEntry {
    state: StateId,
    value: StackValue,
    span: Option<SourceSpan>,
}

pub struct Parser<Stream: Iterator<Item = Token>> {
    opts: ParserOpts,
    token_stream: Stream,
    lookahead: Token,
    deferred: Option<Token>,
    inserted_semicolon: bool,
    source_reference: SourceReference,
    states: Vec<StateId>,
    values: Vec<(StackValue, Option<SourceSpan>)>,
    last_error_at: Option<usize>,
    shifted_since_error: bool,
    recovered_errors: Vec<ParserError>,
}

impl<Stream: Iterator<Item = Token>> Parser<Stream> {
    /// Parses a whole token stream. The program is `None` only when recovery ran out of input;
    /// a program returned together with errors must not be executed.
    pub fn parse(
        token_stream: Stream,
        source_reference: SourceReference,
        opts: ParserOpts,
    ) -> (Option<Program>, Vec<ParserError>) {
        let mut parser = Self::new(token_stream, source_reference, opts);
        let root = parser.run();
        let program = root.map(|root| Program {
            root,
            source_reference: parser.source_reference.clone(),
        });
        (program, parser.recovered_errors)
    }

    fn new(mut token_stream: Stream, source_reference: SourceReference, opts: ParserOpts) -> Self {
        let lookahead = token_stream
            .next()
            .unwrap_or_else(|| end_of_input(source_reference.text().len()));
        Parser {
            opts,
            token_stream,
            lookahead,
            deferred: None,
            inserted_semicolon: false,
            source_reference,
            states: vec![0],
            values: Vec::new(),
            last_error_at: None,
            shifted_since_error: true,
            recovered_errors: Vec::new(),
        }
    }
}

fn end_of_input(offset: usize) -> Token {
    Token {
        kind: TokenKind::Eof,
        lexeme: String::new(),
        span: SourceSpan::new(offset.into(), 0.into()),
        position: Position { line: 1, column: 1 },
    }
}

impl<Stream: Iterator<Item = Token>> Parser<Stream> {
    fn run(&mut self) -> Option<Node> {
        loop {
            let state = self.top_state();
            match TABLES.action(state, self.lookahead.kind) {
                Some(Action::Shift(next)) => self.shift(next),
                Some(Action::Reduce(rule)) => self.reduce(rule),
                Some(Action::Accept) => {
                    return match self.values.pop() {
                        Some((StackValue::Node(root), _)) => Some(root),
                        other => unreachable!("accepted with {:?} on the stack", other),
                    }
                }
                None if self.can_insert_semicolon(state) => self.insert_semicolon(),
                None => {
                    if !self.recover() {
                        return None;
                    }
                }
            }
        }
    }

    fn top_state(&self) -> StateId {
        self.states.last().copied().unwrap_or(0)
    }

    fn advance(&mut self) {
        if let Some(token) = self.deferred.take().or_else(|| self.token_stream.next()) {
            self.lookahead = token;
        }
    }

    fn shift(&mut self, next: StateId) {
        #[cfg(feature = "debug")]
        eprintln!("shift {} -> {}", self.lookahead.kind, next);

        let span = self.lookahead.span;
        let token = self.lookahead.clone();
        self.states.push(next);
        self.values.push((StackValue::Token(token), Some(span)));
        self.shifted_since_error = true;
        self.advance();
    }

    fn reduce(&mut self, rule_index: usize) {
        let rule = GRAMMAR.rule(rule_index);

        #[cfg(feature = "debug")]
        eprintln!("reduce {:?}", rule);

        let split = self.values.len() - rule.rhs.len();
        let popped: Vec<_> = self.values.drain(split..).collect();
        self.states.truncate(self.states.len() - rule.rhs.len());

        let covered = popped
            .iter()
            .filter_map(|(_, span)| *span)
            .reduce(|a, b| a.cover(b));
        let span = covered.unwrap_or_else(|| SourceSpan::new(self.lookahead.span.start(), 0.into()));
        let values = popped.into_iter().map(|(value, _)| value).collect();
        let value = (rule.action)(&mut Reduction::new(values, span));

        let next = match TABLES.goto(self.top_state(), rule.lhs) {
            Some(next) => next,
            None => unreachable!("no goto on {} from state {}", rule.lhs, self.top_state()),
        };
        self.states.push(next);
        self.values.push((value, covered));
    }

    fn can_insert_semicolon(&self, state: StateId) -> bool {
        self.opts.is_repl
            && !self.inserted_semicolon
            && self.lookahead.kind == TokenKind::Eof
            && TABLES.action(state, TokenKind::Semicolon).is_some()
    }

    /// Interactive input may omit the final semicolon.
    fn insert_semicolon(&mut self) {
        self.inserted_semicolon = true;
        let at = self.lookahead.span.start();
        let virtual_semicolon = Token {
            kind: TokenKind::Semicolon,
            lexeme: String::new(),
            span: SourceSpan::new(at, 0.into()),
            position: self.lookahead.position,
        };
        let eof = std::mem::replace(&mut self.lookahead, virtual_semicolon);
        self.deferred = Some(eof);
    }

    fn record_error(&mut self) {
        let expected = TABLES.expected(self.top_state());
        let token = &self.lookahead;
        let position = self.source_reference.position(token.span.start());
        self.recovered_errors.push(ParserError::SyntaxError {
            offset: token.span.start().byte_offset(),
            line: position.line,
            column: position.column,
            expected_list: expected.iter().join(", "),
            expected,
            found: token.kind,
            found_at: token.span,
            source_code: self.source_reference.clone(),
        });
    }

    /// Panic-mode recovery. Returns false when the input ran out before the parser could resume.
    fn recover(&mut self) -> bool {
        let at = self.lookahead.span.start().byte_offset();
        let repeated = !self.shifted_since_error && self.last_error_at == Some(at);
        self.last_error_at = Some(at);
        self.shifted_since_error = false;

        if repeated {
            // the parser resumed here once already and failed again without consuming anything
            if self.lookahead.kind == TokenKind::Eof {
                return false;
            }
            self.advance();
        } else {
            self.record_error();
        }

        loop {
            if self.lookahead.kind == TokenKind::Eof {
                return false;
            }
            if let Some(depth) = self.resumable_depth() {
                let keep = self.states.len() - depth;
                self.states.truncate(keep);
                self.values.truncate(keep - 1);
                return true;
            }
            self.advance();
        }
    }

    /// How many states must be popped before one accepts the lookahead, if any does.
    fn resumable_depth(&self) -> Option<usize> {
        self.states
            .iter()
            .rev()
            .position(|state| TABLES.action(*state, self.lookahead.kind).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> (Option<Program>, Vec<ParserError>) {
        parse_with(source, ParserOpts::default())
    }

    fn parse_with(source: &str, opts: ParserOpts) -> (Option<Program>, Vec<ParserError>) {
        let source_reference = SourceReference::new("test".to_string(), source.to_string());
        Parser::parse(Scanner::new(source), source_reference, opts)
    }

    fn sexpr(source: &str) -> String {
        let (program, errors) = parse(source);
        assert_eq!(errors.len(), 0, "{:?}", errors);
        match program {
            Some(program) => program.to_string(),
            None => panic!("no program"),
        }
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(sexpr("3*4+5;"), "(do (expr (+ (* 3 4) 5)))");
        assert_eq!(sexpr("2^3*4;"), "(do (expr (* (^ 2 3) 4)))");
        assert_eq!(sexpr("4^3^2;"), "(do (expr (^ 4 (^ 3 2))))");
        assert_eq!(sexpr("3*(4+5);"), "(do (expr (* 3 (+ 4 5))))");
        assert_eq!(sexpr("-2^2;"), "(do (expr (- (^ 2 2))))");
        assert_eq!(sexpr("2^-1;"), "(do (expr (^ 2 (- 1))))");
        assert_eq!(sexpr("a < b + 1 == c;"), "(do (expr (== (< a (+ b 1)) c)))");
        assert_eq!(sexpr("a || b && !c;"), "(do (expr (|| a (&& b (! c)))))");
        assert_eq!(sexpr("x = a ? 1 : 2;"), "(do (= x (? a 1 2)))");
    }

    #[test]
    fn statements_and_literals() {
        assert_eq!(
            sexpr("if (a) b = 1; else { b = 2; }"),
            "(do (if a (= b 1) (do (= b 2))))"
        );
        assert_eq!(
            sexpr("for (i = 0; i < 3; i = i + 1) $log(i);"),
            "(do (for (= i 0) (< i 3) (= i (+ i 1)) (expr (call $log i))))"
        );
        assert_eq!(
            sexpr("f = function (a, b) { return a + b; };"),
            "(do (= f (function (a b) (do (return (+ a b))))))"
        );
        assert_eq!(sexpr("g = map (x) -> x^2;"), "(do (= g (map (x) (^ x 2))))");
        assert_eq!(
            sexpr("p = point(1, 2) << size: 3 >>;"),
            "(do (= p (call point 1 2 (attributes (size 3)))))"
        );
        assert_eq!(
            sexpr("a[0] = o.x + X(p) + [1, 'two'].length;"),
            "(do (= (index a 0) (+ (+ (. o x) (X p)) (. (array 1 \"two\") length))))"
        );
        assert_eq!(sexpr("o = << >>; o.X = 1;"), "(do (= o (object)) (= (. o X) 1))");
    }

    #[test]
    fn unary_plus_is_transparent() {
        assert_eq!(sexpr("+3;"), "(do (expr 3))");
    }

    #[test]
    fn dangling_else_binds_to_nearest_if() {
        assert_eq!(
            sexpr("if (a) if (b) x = 1; else x = 2;"),
            "(do (if a (if b (= x 1) (= x 2))))"
        );
    }

    #[test]
    fn one_malformed_statement_yields_one_error() {
        let (program, errors) = parse("a = 1;\nb = 2 + ;\nc = 3;");
        assert_eq!(errors.len(), 1, "{:?}", errors);
        assert_eq!(errors[0].position(), Position { line: 2, column: 9 });
        assert_eq!(errors[0].offset(), 15);
        assert!(program.is_some());
    }

    #[test]
    fn error_count_scales_with_malformed_statements() {
        let source = "x = ;\nok = 1;\ny = ;\nalso = 2;\nz = ;\n";
        let (_, errors) = parse(source);
        assert_eq!(errors.len(), 3, "{:?}", errors);
        let lines: Vec<usize> = errors.iter().map(|error| error.position().line).collect();
        assert_eq!(lines, vec![1, 3, 5]);
    }

    #[test]
    fn expected_set_lists_acceptable_tokens() {
        let (_, errors) = parse("x = ;");
        assert_eq!(errors.len(), 1);
        let expected = errors[0].expected();
        for kind in [
            TokenKind::Identifier,
            TokenKind::Integer,
            TokenKind::String,
            TokenKind::LeftParen,
            TokenKind::Minus,
            TokenKind::Map,
            TokenKind::Function,
        ] {
            assert!(expected.contains(&kind), "missing {}", kind);
        }
        assert!(!expected.contains(&TokenKind::Semicolon));
    }

    #[test]
    fn unmatched_characters_are_syntax_errors() {
        let (_, errors) = parse("a = 1 # 2;");
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ParserError::SyntaxError { found, column, .. } => {
                assert_eq!(*found, TokenKind::Unmatched);
                assert_eq!(*column, 7);
            }
        }
    }

    #[test]
    fn running_out_of_input_stops_the_parse() {
        let (program, errors) = parse("a = (1 + ");
        assert!(program.is_none());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn repl_input_may_omit_final_semicolon() {
        let (program, errors) = parse_with("1 + 2", ParserOpts::default().for_repl());
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(
            program.map(|program| program.to_string()),
            Some("(do (expr (+ 1 2)))".to_string())
        );
        let (_, errors) = parse("1 + 2");
        assert_eq!(errors.len(), 1);
    }
}
