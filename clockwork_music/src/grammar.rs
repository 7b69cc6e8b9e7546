// Weighted context-free grammars over renderable terminals.
//
// Vocabulary:
// - `Terminal`: a named render entry (`TerminalEntry`) with a known duration
//   range. Never rewritten.
// - `NonTerminal::Wrapped(terminal)`: a terminal that rules may still rewrite
//   but that renders as-is when left alone.
// - `NonTerminal::Symbolic(SymT)`: an abstract role ("intro", "cadence") that
//   must be rewritten before anything can be rendered.
//
// `ContextFreeGrammar::resolve` grows a `DerivationTree` breadth-first: each
// round expands every current leaf by every applicable rule at every
// non-terminal position. `render_sequence` then picks and renders one
// derivation per requested symbol, using the duration range carried by the
// `SymT` to steer the pick (see `derivation.rs`).
//
// Symbols compare by name. Two terminals with the same name are treated as
// the same symbol even if their entries differ; the grammar config relies on
// this to refer to terminals by name.

use crate::derivation::DerivationTree;
use crate::duration::DurationRange;
use crate::error::GrammarError;
use crate::event::{SequentialEvent, SimpleEvent, SimultaneousEvent};
use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use tracing::{debug, trace};

/// Default expansion depth used by `render_sequence` callers.
pub const DEFAULT_RENDER_LIMIT: usize = 4;

/// Something a terminal can render.
pub trait TerminalEntry {
    /// Shortest and longest duration `render` can produce.
    fn duration_range(&self) -> DurationRange;

    fn render(&self) -> SimultaneousEvent;
}

/// Renders a fixed list of leaves as one tagged track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteEntry {
    pub track: String,
    pub leaves: Vec<SimpleEvent>,
}

impl NoteEntry {
    pub fn new(track: impl Into<String>, leaves: Vec<SimpleEvent>) -> Self {
        Self {
            track: track.into(),
            leaves,
        }
    }
}

impl TerminalEntry for NoteEntry {
    fn duration_range(&self) -> DurationRange {
        DurationRange::point(self.leaves.iter().map(|l| &l.duration).sum())
    }

    fn render(&self) -> SimultaneousEvent {
        let track = SequentialEvent::tagged(self.track.as_str(), self.leaves.iter().cloned().map(Into::into).collect());
        SimultaneousEvent::new(vec![track.into()])
    }
}

/// Renders through a closure. The declared range is trusted.
pub struct FnEntry {
    range: DurationRange,
    render: Box<dyn Fn() -> SimultaneousEvent>,
}

impl FnEntry {
    pub fn new(range: DurationRange, render: impl Fn() -> SimultaneousEvent + 'static) -> Self {
        Self {
            range,
            render: Box::new(render),
        }
    }
}

impl TerminalEntry for FnEntry {
    fn duration_range(&self) -> DurationRange {
        self.range.clone()
    }

    fn render(&self) -> SimultaneousEvent {
        (self.render)()
    }
}

/// A named, renderable grammar symbol.
#[derive(Clone)]
pub struct Terminal {
    name: String,
    entry: Rc<dyn TerminalEntry>,
}

impl Terminal {
    pub fn new(name: impl Into<String>, entry: impl TerminalEntry + 'static) -> Self {
        Self {
            name: name.into(),
            entry: Rc::new(entry),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn duration_range(&self) -> DurationRange {
        self.entry.duration_range()
    }

    pub fn render(&self) -> SimultaneousEvent {
        self.entry.render()
    }
}

impl PartialEq for Terminal {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Terminal {}

impl Hash for Terminal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("name", &self.name)
            .field("duration_range", &self.duration_range())
            .finish()
    }
}

/// Symbolic non-terminal. The optional duration range is a request used when
/// picking a derivation; it does not take part in equality.
#[derive(Clone, Debug)]
pub struct SymT {
    pub name: String,
    pub duration_range: Option<DurationRange>,
}

impl SymT {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration_range: None,
        }
    }

    pub fn with_range(name: impl Into<String>, range: DurationRange) -> Self {
        Self {
            name: name.into(),
            duration_range: Some(range),
        }
    }
}

impl PartialEq for SymT {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for SymT {}

impl Hash for SymT {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NonTerminal {
    Symbolic(SymT),
    Wrapped(Terminal),
}

impl NonTerminal {
    pub fn is_symbolic(&self) -> bool {
        matches!(self, NonTerminal::Symbolic(_))
    }

    pub fn name(&self) -> &str {
        match self {
            NonTerminal::Symbolic(s) => &s.name,
            NonTerminal::Wrapped(t) => t.name(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Symbol {
    Terminal(Terminal),
    NonTerminal(NonTerminal),
}

impl Symbol {
    /// Plain terminal.
    pub fn t(terminal: &Terminal) -> Self {
        Symbol::Terminal(terminal.clone())
    }

    /// Rewritable terminal.
    pub fn nt(terminal: &Terminal) -> Self {
        Symbol::NonTerminal(NonTerminal::Wrapped(terminal.clone()))
    }

    pub fn symt(name: impl Into<String>) -> Self {
        Symbol::NonTerminal(NonTerminal::Symbolic(SymT::new(name)))
    }

    pub fn as_non_terminal(&self) -> Option<&NonTerminal> {
        match self {
            Symbol::NonTerminal(nt) => Some(nt),
            Symbol::Terminal(_) => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        self.as_non_terminal().is_some_and(NonTerminal::is_symbolic)
    }

    /// `None` for symbolic non-terminals, which have nothing to render.
    pub fn duration_range(&self) -> Option<DurationRange> {
        match self {
            Symbol::Terminal(t) | Symbol::NonTerminal(NonTerminal::Wrapped(t)) => Some(t.duration_range()),
            Symbol::NonTerminal(NonTerminal::Symbolic(_)) => None,
        }
    }

    pub fn render(&self) -> Result<SimultaneousEvent, GrammarError> {
        match self {
            Symbol::Terminal(t) | Symbol::NonTerminal(NonTerminal::Wrapped(t)) => Ok(t.render()),
            Symbol::NonTerminal(NonTerminal::Symbolic(s)) => Err(GrammarError::SymbolicRender(s.name.clone())),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Terminal(t) => write!(f, "{}", t.name()),
            Symbol::NonTerminal(NonTerminal::Wrapped(t)) => write!(f, "NT({})", t.name()),
            Symbol::NonTerminal(NonTerminal::Symbolic(s)) => write!(f, "SymT({})", s.name),
        }
    }
}

/// Weighted rewrite rule `left -> right`.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub left: NonTerminal,
    pub right: Vec<Symbol>,
    pub weight: f64,
}

impl Rule {
    pub fn new(left: NonTerminal, right: Vec<Symbol>, weight: f64) -> Self {
        Self { left, right, weight }
    }
}

/// Rule set with per-left-side lookup.
#[derive(Debug, Clone)]
pub struct ContextFreeGrammar {
    rules: Vec<Rule>,
    non_terminals: Vec<NonTerminal>,
    terminals: Vec<Terminal>,
    /// Rule indices per left side, in declaration order.
    by_left: FxHashMap<NonTerminal, Vec<usize>>,
}

fn push_unique<T: PartialEq + Clone>(list: &mut Vec<T>, item: &T) {
    if !list.contains(item) {
        list.push(item.clone());
    }
}

impl ContextFreeGrammar {
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut non_terminals = Vec::new();
        let mut terminals = Vec::new();
        let mut by_left: FxHashMap<NonTerminal, Vec<usize>> = FxHashMap::default();

        for (i, rule) in rules.iter().enumerate() {
            push_unique(&mut non_terminals, &rule.left);
            for symbol in &rule.right {
                match symbol {
                    Symbol::NonTerminal(nt) => push_unique(&mut non_terminals, nt),
                    Symbol::Terminal(t) => push_unique(&mut terminals, t),
                }
            }
            by_left.entry(rule.left.clone()).or_default().push(i);
        }

        debug!(
            rules = rules.len(),
            non_terminals = non_terminals.len(),
            terminals = terminals.len(),
            "built grammar"
        );
        Self {
            rules,
            non_terminals,
            terminals,
            by_left,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Distinct non-terminals from left and right sides, in first-seen order.
    pub fn non_terminals(&self) -> &[NonTerminal] {
        &self.non_terminals
    }

    /// Distinct plain terminals from right sides, in first-seen order.
    pub fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    pub fn rules_for(&self, left: &NonTerminal) -> impl Iterator<Item = &Rule> {
        self.by_left
            .get(left)
            .into_iter()
            .flatten()
            .map(move |&i| &self.rules[i])
    }

    /// Every one-step rewrite of `symbols`, paired with the rule weight.
    pub fn expand(&self, symbols: &[Symbol]) -> Vec<(f64, Vec<Symbol>)> {
        let mut out = Vec::new();
        for (i, symbol) in symbols.iter().enumerate() {
            let Some(nt) = symbol.as_non_terminal() else {
                continue;
            };
            for rule in self.rules_for(nt) {
                let mut rewritten = Vec::with_capacity(symbols.len() + rule.right.len() - 1);
                rewritten.extend_from_slice(&symbols[..i]);
                rewritten.extend(rule.right.iter().cloned());
                rewritten.extend_from_slice(&symbols[i + 1..]);
                out.push((rule.weight, rewritten));
            }
        }
        out
    }

    /// Expand every leaf of `tree` once. Returns whether any node was added.
    pub fn resolve_one_layer(&self, tree: &mut DerivationTree) -> bool {
        let mut grew = false;
        for leaf in tree.leaves() {
            let Some(node) = tree.node(leaf) else { continue };
            let expansions = self.expand(&node.symbols);
            for (weight, symbols) in expansions {
                tree.add_child(leaf, weight, symbols);
                grew = true;
            }
        }
        grew
    }

    /// Build a derivation tree from `start`.
    ///
    /// Expands layer by layer until nothing changes or `limit` layers have
    /// been added. With `limit = None` the rules themselves must terminate.
    pub fn resolve(&self, start: &NonTerminal, limit: Option<usize>, seed: u64) -> DerivationTree {
        let mut tree = DerivationTree::new(vec![Symbol::NonTerminal(start.clone())], seed);
        let mut layers = 0;
        while limit.is_none_or(|limit| layers < limit) {
            if !self.resolve_one_layer(&mut tree) {
                break;
            }
            layers += 1;
            trace!(start = start.name(), layers, nodes = tree.len(), "grammar layer");
        }
        debug!(start = start.name(), layers, nodes = tree.len(), "resolved grammar");
        tree
    }

    /// Render one event per symbol of `sequence`.
    ///
    /// Each distinct symbol is resolved once (all with `seed`); every
    /// occurrence then draws its own derivation from that tree, steered by
    /// the occurrence's duration range.
    pub fn render_sequence(
        &self,
        sequence: &[SymT],
        limit: Option<usize>,
        seed: u64,
    ) -> Result<Vec<SimultaneousEvent>, GrammarError> {
        let mut trees: FxHashMap<&str, DerivationTree> = FxHashMap::default();
        for symt in sequence {
            if !trees.contains_key(symt.name.as_str()) {
                let start = NonTerminal::Symbolic(symt.clone());
                trees.insert(symt.name.as_str(), self.resolve(&start, limit, seed));
            }
        }

        let mut rendered = Vec::with_capacity(sequence.len());
        for symt in sequence {
            let tree = trees
                .get_mut(symt.name.as_str())
                .ok_or_else(|| GrammarError::NoRenderableNode(symt.name.clone()))?;
            let node = tree
                .symt_to_n(symt)
                .ok_or_else(|| GrammarError::NoRenderableNode(symt.name.clone()))?;
            rendered.push(node.render()?);
        }
        Ok(rendered)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::duration::Duration;
    use pretty_assertions::assert_eq;

    fn d(n: i64) -> Duration {
        Duration::from_integer(n)
    }

    #[test]
    fn grammar_collects_vocabulary() {
        let (grammar, v) = grammar();
        let names: Vec<&str> = grammar.non_terminals().iter().map(NonTerminal::name).collect();
        assert_eq!(names, vec!["A", "t0", "B", "t1", "t2"]);
        assert!(grammar.terminals().is_empty());
        assert_eq!(grammar.rules_for(&NonTerminal::Wrapped(v.t1.clone())).count(), 2);
        assert_eq!(grammar.rules_for(&sym("missing")).count(), 0);
    }

    #[test]
    fn plain_terminals_are_collected_separately() {
        let v = vocabulary();
        let grammar = ContextFreeGrammar::new(vec![Rule::new(sym("S"), vec![Symbol::t(&v.t0), Symbol::t(&v.t0)], 1.0)]);
        assert_eq!(grammar.terminals(), &[v.t0.clone()]);
        assert_eq!(grammar.non_terminals().len(), 1);
    }

    #[test]
    fn symt_identity_ignores_range() {
        let plain = SymT::new("A");
        let ranged = SymT::with_range("A", DurationRange::new(d(4), d(8)));
        assert_eq!(plain, ranged);
        let (grammar, _) = grammar();
        assert_eq!(grammar.rules_for(&NonTerminal::Symbolic(ranged)).count(), 1);
    }

    #[test]
    fn expand_rewrites_every_position() {
        let (grammar, v) = grammar();
        let expansions = grammar.expand(&[Symbol::nt(&v.t0), Symbol::nt(&v.t1)]);
        let shapes: Vec<String> = expansions
            .iter()
            .map(|(w, s)| format!("{w} {}", s.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")))
            .collect();
        assert_eq!(
            shapes,
            vec![
                "1 NT(t0) NT(t1) NT(t1)",
                "0.5 NT(t0) NT(t2) NT(t1)",
                "0.6 NT(t0) NT(t1) NT(t1)",
                "0.6 NT(t0) NT(t1) NT(t2)",
            ]
        );
        assert!(grammar.expand(&[Symbol::t(&v.t0)]).is_empty());
    }

    #[test]
    fn resolve_with_zero_limit_keeps_only_root() {
        let (grammar, _) = grammar();
        let tree = grammar.resolve(&sym("A"), Some(0), 100);
        assert_eq!(tree.len(), 1);
        assert!(tree.root().is_symbolic);
    }

    #[test]
    fn resolve_stops_at_limit() {
        let (grammar, _) = grammar();
        let tree = grammar.resolve(&sym("A"), Some(3), 100);
        assert_eq!(tree.depth(), 3);
        // 1 root, 1 after A, 2 after t0, 7 rewrites of the two pairs.
        assert_eq!(tree.len(), 11);
        assert!(!tree.leaves().is_empty());
    }

    #[test]
    fn resolve_stops_when_nothing_expands() {
        let v = vocabulary();
        let grammar = ContextFreeGrammar::new(vec![
            Rule::new(sym("S"), vec![Symbol::symt("M"), Symbol::t(&v.t2)], 1.0),
            Rule::new(sym("M"), vec![Symbol::t(&v.t0)], 1.0),
            Rule::new(sym("M"), vec![Symbol::t(&v.t1)], 1.0),
        ]);
        let tree = grammar.resolve(&sym("S"), None, 100);
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.real_nodes().len(), 2);
    }

    #[test]
    fn terminal_render_duration_is_stable() {
        let v = vocabulary();
        assert_eq!(v.t2.render().duration(), v.t2.render().duration());
        assert_eq!(v.t2.render().duration(), d(3));
        assert_eq!(v.t2.duration_range(), DurationRange::point(d(3)));
    }

    #[test]
    fn fn_entry_renders_through_closure() {
        let t = Terminal::new(
            "pulse",
            FnEntry::new(DurationRange::point(d(2)), || {
                SimultaneousEvent::new(vec![SequentialEvent::tagged("drum", vec![SimpleEvent::rest(Duration::from_integer(2)).into()]).into()])
            }),
        );
        assert_eq!(t.render().duration(), d(2));
        assert_eq!(Symbol::nt(&t).duration_range(), Some(DurationRange::point(d(2))));
        assert_eq!(Symbol::symt("x").duration_range(), None);
    }

    #[test]
    fn render_sequence_returns_one_event_per_symbol() {
        let (grammar, _) = grammar();
        let sequence = vec![
            SymT::with_range("A", DurationRange::new(d(4), d(8))),
            SymT::with_range("A", DurationRange::new(d(6), d(10))),
            SymT::new("B"),
        ];
        let events = grammar.render_sequence(&sequence, Some(DEFAULT_RENDER_LIMIT), 100).unwrap();
        assert_eq!(events.len(), 3);
        assert!(DurationRange::new(d(4), d(8)).contains(&events[0].duration()));
        assert!(DurationRange::new(d(6), d(10)).contains(&events[1].duration()));
        for event in &events {
            assert!(event.get_tagged("0").is_some());
        }
    }

    #[test]
    fn render_sequence_fails_without_real_derivation() {
        let (grammar, _) = grammar();
        let err = grammar.render_sequence(&[SymT::new("A")], Some(0), 100).unwrap_err();
        assert_eq!(err, GrammarError::NoRenderableNode("A".into()));
    }

    #[test]
    fn render_sequence_is_reproducible() {
        let (grammar, _) = grammar();
        let sequence = vec![SymT::new("A"), SymT::new("B"), SymT::new("A")];
        let a = grammar.render_sequence(&sequence, Some(3), 7).unwrap();
        let b = grammar.render_sequence(&sequence, Some(3), 7).unwrap();
        assert_eq!(a, b);
    }
}
