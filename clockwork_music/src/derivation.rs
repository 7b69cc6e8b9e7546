// Derivation trees produced by grammar resolution.
//
// Every node is one symbol sequence reached from the start symbol. Nodes are
// immutable once added, so the summed duration range and the symbolic flag
// are computed at insertion and stored as plain fields.
//
// Node weight is a running average of the rule weights along the path from
// the root: a child of a node with weight `w` and generation `c` gets
//     w * c / (c + 1) + rule_weight / (c + 1)
// and generation `c + 1`. The root has weight 1 and generation 0.
//
// Selection (`select`, `symt_to_n`) scores each non-symbolic node against the
// requested duration range. For each bound, a node bound inside the closed
// target range costs nothing; otherwise it costs its distance to the target's
// matching bound. The nodes with the lowest total cost are sampled by weight
// with the tree's own seeded generator.

use crate::duration::{Duration, DurationRange};
use crate::error::GrammarError;
use crate::event::SimultaneousEvent;
use crate::grammar::{SymT, Symbol};
use clockwork_prng::ClockRng;
use std::fmt;
use tracing::trace;

/// Index of a node inside its `DerivationTree`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug)]
pub struct DerivationNode {
    pub symbols: Vec<Symbol>,
    pub weight: f64,
    /// Expansion generation; 0 for the root.
    pub count: usize,
    /// Summed range of all symbols; `None` while any symbol is symbolic.
    pub duration_range: Option<DurationRange>,
    pub is_symbolic: bool,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl DerivationNode {
    fn new(symbols: Vec<Symbol>, weight: f64, count: usize, parent: Option<NodeId>) -> Self {
        let is_symbolic = symbols.iter().any(Symbol::is_symbolic);
        let duration_range = symbols
            .iter()
            .map(Symbol::duration_range)
            .sum::<Option<DurationRange>>();
        Self {
            symbols,
            weight,
            count,
            duration_range,
            is_symbolic,
            parent,
            children: Vec::new(),
        }
    }

    /// Weight a child reached through a rule of weight `rule_weight` gets.
    pub fn child_weight(&self, rule_weight: f64) -> f64 {
        let count = (self.count + 1) as f64;
        self.weight * self.count as f64 / count + rule_weight / count
    }

    /// Render every symbol in order and merge the results track-wise.
    pub fn render(&self) -> Result<SimultaneousEvent, GrammarError> {
        if self.is_symbolic {
            return Err(GrammarError::SymbolicRender(self.to_string()));
        }
        let mut rendered = SimultaneousEvent::default();
        for symbol in &self.symbols {
            rendered.concatenate(symbol.render()?);
        }
        Ok(rendered)
    }
}

impl fmt::Display for DerivationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, symbol) in self.symbols.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{symbol}")?;
        }
        write!(f, ")")
    }
}

/// Rooted tree of derivations with its own seeded generator.
#[derive(Clone, Debug)]
pub struct DerivationTree {
    nodes: Vec<DerivationNode>,
    rng: ClockRng,
}

impl DerivationTree {
    pub fn new(root: Vec<Symbol>, seed: u64) -> Self {
        Self {
            nodes: vec![DerivationNode::new(root, 1.0, 0, None)],
            rng: ClockRng::new(seed),
        }
    }

    pub fn root(&self) -> &DerivationNode {
        &self.nodes[0]
    }

    /// `None` for ids minted by another tree.
    pub fn node(&self, id: NodeId) -> Option<&DerivationNode> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &DerivationNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes without children, in insertion order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, n)| n.children.is_empty())
            .map(|(id, _)| id)
            .collect()
    }

    /// Highest generation present.
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.count).max().unwrap_or(0)
    }

    pub(crate) fn add_child(&mut self, parent: NodeId, rule_weight: f64, symbols: Vec<Symbol>) -> NodeId {
        let parent_node = &self.nodes[parent.0];
        let node = DerivationNode::new(
            symbols,
            parent_node.child_weight(rule_weight),
            parent_node.count + 1,
            Some(parent),
        );
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Renderable nodes, stably ordered by the start of their range.
    pub fn real_nodes(&self) -> Vec<NodeId> {
        let mut real: Vec<(Duration, NodeId)> = self
            .nodes()
            .filter_map(|(id, n)| match (n.is_symbolic, &n.duration_range) {
                (false, Some(range)) => Some((range.start.clone(), id)),
                _ => None,
            })
            .collect();
        real.sort_by(|a, b| a.0.cmp(&b.0));
        real.into_iter().map(|(_, id)| id).collect()
    }

    /// Pick a renderable node for `target` (any node when `None`).
    pub fn select(&mut self, target: Option<&DurationRange>) -> Option<NodeId> {
        let real = self.real_nodes();
        let candidates: Vec<NodeId> = match target {
            None => real,
            Some(target) => {
                let scored: Vec<(Duration, NodeId)> = real
                    .into_iter()
                    .filter_map(|id| {
                        let range = self.nodes[id.0].duration_range.as_ref()?;
                        Some((range_penalty(target, range), id))
                    })
                    .collect();
                let best = scored.iter().map(|(p, _)| p).min()?.clone();
                scored.into_iter().filter(|(p, _)| *p == best).map(|(_, id)| id).collect()
            }
        };
        let weights: Vec<f64> = candidates.iter().map(|id| self.nodes[id.0].weight).collect();
        let chosen = candidates[self.rng.choose_weighted(&weights)?];
        trace!(node = %self.nodes[chosen.0], candidates = candidates.len(), "selected derivation");
        Some(chosen)
    }

    /// Node to render for one occurrence of `symt`, steered by its range.
    pub fn symt_to_n(&mut self, symt: &SymT) -> Option<&DerivationNode> {
        let id = self.select(symt.duration_range.as_ref())?;
        Some(&self.nodes[id.0])
    }
}

/// Cost of rendering `candidate` where `target` was asked for.
pub fn range_penalty(target: &DurationRange, candidate: &DurationRange) -> Duration {
    let bound = |wanted: &Duration, got: &Duration| {
        if target.contains(got) { Duration::zero() } else { (wanted - got).abs() }
    };
    bound(&target.start, &candidate.start) + bound(&target.end, &candidate.end)
}
