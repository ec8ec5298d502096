//! LALR(1) table construction.
//!
//! The canonical LR(0) collection is built first, then kernel lookaheads are propagated
//! until they stop changing. Conflicts resolve to shift over reduce and to the earlier
//! rule between two reductions; every resolution is recorded in [`ParseTables::conflicts`].

use std::collections::{BTreeMap, HashMap, VecDeque};

use lazy_static::lazy_static;
use strum::EnumCount;

use crate::{
    grammar::{Grammar, GRAMMAR},
    tokens::{NonTerminal, Symbol, TerminalSet, TokenKind},
};

pub type StateId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Shift(StateId),
    Reduce(usize),
    Accept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub state: StateId,
    pub lookahead: TokenKind,
    pub chosen: Action,
    pub discarded: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Item {
    rule: usize,
    dot: usize,
}

struct TableBuilder<'g> {
    grammar: &'g Grammar,
    nullable: Vec<bool>,
    first: Vec<TerminalSet>,
}

fn first_of_sequence(
    symbols: &[Symbol],
    nullable: &[bool],
    first: &[TerminalSet],
) -> (TerminalSet, bool) {
    let mut result = TerminalSet::empty();
    for symbol in symbols {
        match symbol {
            Symbol::T(kind) => {
                result.insert(*kind);
                return (result, false);
            }
            Symbol::N(non_terminal) => {
                result.union_with(first[non_terminal.index()]);
                if !nullable[non_terminal.index()] {
                    return (result, false);
                }
            }
        }
    }
    (result, true)
}

impl<'g> TableBuilder<'g> {
    fn new(grammar: &'g Grammar) -> Self {
        let mut nullable = vec![false; NonTerminal::COUNT];
        let mut first = vec![TerminalSet::empty(); NonTerminal::COUNT];
        let mut changed = true;
        while changed {
            changed = false;
            for rule in &grammar.rules {
                let (rule_first, rule_nullable) = first_of_sequence(&rule.rhs, &nullable, &first);
                changed |= first[rule.lhs.index()].union_with(rule_first);
                if rule_nullable && !nullable[rule.lhs.index()] {
                    nullable[rule.lhs.index()] = true;
                    changed = true;
                }
            }
        }
        Self {
            grammar,
            nullable,
            first,
        }
    }

    fn symbol_after_dot(&self, item: Item) -> Option<Symbol> {
        self.grammar.rule(item.rule).rhs.get(item.dot).copied()
    }

    /// LR(1) closure of a kernel. With empty lookaheads this is the plain LR(0) closure.
    fn closure(&self, kernel: impl Iterator<Item = (Item, TerminalSet)>) -> BTreeMap<Item, TerminalSet> {
        let mut items: BTreeMap<Item, TerminalSet> = kernel.collect();
        let mut changed = true;
        while changed {
            changed = false;
            let snapshot: Vec<(Item, TerminalSet)> =
                items.iter().map(|(item, lookahead)| (*item, *lookahead)).collect();
            for (item, lookahead) in snapshot {
                let non_terminal = match self.symbol_after_dot(item) {
                    Some(Symbol::N(non_terminal)) => non_terminal,
                    _ => continue,
                };
                let rest = &self.grammar.rule(item.rule).rhs[item.dot + 1..];
                let (mut inherited, rest_nullable) =
                    first_of_sequence(rest, &self.nullable, &self.first);
                if rest_nullable {
                    inherited.union_with(lookahead);
                }
                for (rule, _) in self.grammar.rules_for(non_terminal) {
                    let predicted = Item { rule, dot: 0 };
                    match items.get_mut(&predicted) {
                        Some(existing) => changed |= existing.union_with(inherited),
                        None => {
                            items.insert(predicted, inherited);
                            changed = true;
                        }
                    }
                }
            }
        }
        items
    }

    fn build(&self) -> ParseTables {
        // LR(0) collection
        let mut kernels: Vec<Vec<Item>> = vec![vec![Item { rule: 0, dot: 0 }]];
        let mut state_of_kernel: HashMap<Vec<Item>, StateId> = HashMap::new();
        state_of_kernel.insert(kernels[0].clone(), 0);
        let mut transitions: Vec<BTreeMap<Symbol, StateId>> = vec![BTreeMap::new()];
        let mut pending: VecDeque<StateId> = VecDeque::from(vec![0]);

        while let Some(state) = pending.pop_front() {
            let closure = self.closure(
                kernels[state]
                    .iter()
                    .map(|item| (*item, TerminalSet::empty())),
            );
            let mut successors: BTreeMap<Symbol, Vec<Item>> = BTreeMap::new();
            for item in closure.keys() {
                if let Some(symbol) = self.symbol_after_dot(*item) {
                    successors.entry(symbol).or_default().push(Item {
                        rule: item.rule,
                        dot: item.dot + 1,
                    });
                }
            }
            for (symbol, mut kernel) in successors {
                kernel.sort();
                kernel.dedup();
                let target = match state_of_kernel.get(&kernel) {
                    Some(target) => *target,
                    None => {
                        let target = kernels.len();
                        state_of_kernel.insert(kernel.clone(), target);
                        kernels.push(kernel);
                        transitions.push(BTreeMap::new());
                        pending.push_back(target);
                        target
                    }
                };
                transitions[state].insert(symbol, target);
            }
        }

        // lookahead propagation
        let mut lookaheads: Vec<Vec<TerminalSet>> = kernels
            .iter()
            .map(|kernel| vec![TerminalSet::empty(); kernel.len()])
            .collect();
        lookaheads[0][0].insert(TokenKind::Eof);
        let mut changed = true;
        while changed {
            changed = false;
            for state in 0..kernels.len() {
                let closure = self.closure(
                    kernels[state]
                        .iter()
                        .copied()
                        .zip(lookaheads[state].iter().copied()),
                );
                for (item, lookahead) in closure {
                    let symbol = match self.symbol_after_dot(item) {
                        Some(symbol) => symbol,
                        None => continue,
                    };
                    let target = transitions[state][&symbol];
                    let advanced = Item {
                        rule: item.rule,
                        dot: item.dot + 1,
                    };
                    if let Ok(position) = kernels[target].binary_search(&advanced) {
                        changed |= lookaheads[target][position].union_with(lookahead);
                    }
                }
            }
        }

        let mut tables = ParseTables {
            action: vec![[None; TokenKind::COUNT]; kernels.len()],
            goto: vec![[None; NonTerminal::COUNT]; kernels.len()],
            conflicts: vec![],
        };
        for state in 0..kernels.len() {
            for (symbol, target) in &transitions[state] {
                match symbol {
                    Symbol::T(kind) => tables.set_action(state, *kind, Action::Shift(*target)),
                    Symbol::N(non_terminal) => {
                        tables.goto[state][non_terminal.index()] = Some(*target)
                    }
                }
            }
            let closure = self.closure(
                kernels[state]
                    .iter()
                    .copied()
                    .zip(lookaheads[state].iter().copied()),
            );
            for (item, lookahead) in closure {
                if self.symbol_after_dot(item).is_some() {
                    continue;
                }
                for kind in lookahead.iter() {
                    let action = if item.rule == 0 {
                        Action::Accept
                    } else {
                        Action::Reduce(item.rule)
                    };
                    tables.set_action(state, kind, action);
                }
            }
        }
        tables
    }
}

pub struct ParseTables {
    action: Vec<[Option<Action>; TokenKind::COUNT]>,
    goto: Vec<[Option<StateId>; NonTerminal::COUNT]>,
    pub conflicts: Vec<Conflict>,
}

impl ParseTables {
    pub fn build(grammar: &Grammar) -> Self {
        TableBuilder::new(grammar).build()
    }

    fn set_action(&mut self, state: StateId, lookahead: TokenKind, action: Action) {
        let slot = &mut self.action[state][lookahead.index()];
        let existing = match *slot {
            Some(existing) => existing,
            None => {
                *slot = Some(action);
                return;
            }
        };
        if existing == action {
            return;
        }
        let (chosen, discarded) = match (existing, action) {
            (Action::Shift(_), _) | (Action::Accept, _) => (existing, action),
            (_, Action::Shift(_)) | (_, Action::Accept) => (action, existing),
            (Action::Reduce(a), Action::Reduce(b)) if a <= b => (existing, action),
            _ => (action, existing),
        };
        *slot = Some(chosen);
        self.conflicts.push(Conflict {
            state,
            lookahead,
            chosen,
            discarded,
        });
    }

    pub fn action(&self, state: StateId, lookahead: TokenKind) -> Option<Action> {
        self.action[state][lookahead.index()]
    }

    pub fn goto(&self, state: StateId, non_terminal: NonTerminal) -> Option<StateId> {
        self.goto[state][non_terminal.index()]
    }

    /// Terminals that have an action in `state`, in declaration order.
    pub fn expected(&self, state: StateId) -> Vec<TokenKind> {
        TokenKind::grammar_terminals()
            .filter(|kind| *kind != TokenKind::Unmatched)
            .filter(|kind| self.action(state, *kind).is_some())
            .collect()
    }

    pub fn state_count(&self) -> usize {
        self.action.len()
    }
}

lazy_static! {
    pub static ref TABLES: ParseTables = ParseTables::build(&GRAMMAR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn only_dangling_else_is_ambiguous() {
        assert!(!TABLES.conflicts.is_empty());
        for conflict in &TABLES.conflicts {
            assert_eq!(conflict.lookahead, TokenKind::Else, "{:?}", conflict);
            assert!(matches!(conflict.chosen, Action::Shift(_)), "{:?}", conflict);
        }
    }

    #[test]
    fn start_state_expects_statements() {
        let expected = TABLES.expected(0);
        for kind in [
            TokenKind::Eof,
            TokenKind::Identifier,
            TokenKind::If,
            TokenKind::LeftBrace,
            TokenKind::Minus,
            TokenKind::ObjectOpen,
        ] {
            assert!(expected.contains(&kind), "missing {}", kind);
        }
        assert!(!expected.contains(&TokenKind::RightParen));
        assert!(!expected.contains(&TokenKind::Unmatched));
    }

    #[test]
    fn empty_program_is_accepted() {
        // StmtList -> ε, Program -> StmtList, then accept
        let reduce = TABLES.action(0, TokenKind::Eof);
        assert!(matches!(reduce, Some(Action::Reduce(_))));
        let after_program = TABLES.goto(0, NonTerminal::Program);
        assert!(after_program.is_some());
        assert_eq!(
            after_program.and_then(|state| TABLES.action(state, TokenKind::Eof)),
            Some(Action::Accept)
        );
    }
}
