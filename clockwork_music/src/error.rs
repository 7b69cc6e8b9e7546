// Error types for clock trees, grammars, and composition configs.
//
// Sampler exhaustion is deliberately absent: an empty candidate set is a
// normal "stop here" signal (`None`), never an error. Track-length mismatches
// during event merges are absent for the same reason; the merge pads.

use crate::duration::Duration;
use thiserror::Error;

/// Errors raised while building or querying a `ClockTree`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// A layer named a parent that has not been created yet.
    #[error("cannot create layer '{layer}': parent '{parent}' does not exist")]
    UnknownParent { layer: String, parent: String },

    /// A layer identifier was used twice.
    #[error("layer '{0}' already exists")]
    DuplicateLayer(String),

    /// A second parentless layer was added.
    #[error("cannot create root layer '{layer}': tree already has root '{root}'")]
    SecondRoot { layer: String, root: String },

    /// Lookup of a layer that is not in the tree.
    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    /// The tree has no root layer to pop from.
    #[error("clock tree is empty")]
    EmptyTree,

    /// A placement ends before it starts.
    #[error("placement '{tag}' ends at {end}, before its start {start}")]
    InvertedPlacement { tag: String, start: Duration, end: Duration },
}

/// Errors raised while resolving or rendering a grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrammarError {
    /// A derivation node still holds a symbolic non-terminal.
    #[error("cannot render symbolic node: {0}")]
    SymbolicRender(String),

    /// Node selection found no renderable derivation.
    #[error("no renderable derivation for '{0}'")]
    NoRenderableNode(String),
}

/// Errors raised while loading or interpreting a composition config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Grammar(#[from] GrammarError),

    #[error("layer '{layer}': invalid event count range [{start}, {end})")]
    EmptyCountRange { layer: String, start: usize, end: usize },

    #[error("grammar symbol '{0}' is neither a terminal nor a symbolic name")]
    UnknownSymbol(String),

    #[error("rule for '{0}' has a non-positive weight")]
    BadWeight(String),

    #[error("config has no grammar section")]
    MissingGrammar,
}
