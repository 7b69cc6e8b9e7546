// Data-driven composition configuration.
//
// A `CompositionConfig` describes one piece as JSON: the clock tree topology
// (layers with their event material and picking policies) and an optional
// grammar section. Nothing in the generators reads magic numbers; the binary
// loads a config (or uses `CompositionConfig::default()`), builds the tree and
// grammar from it, and pops/renders.
//
// Every randomized picker gets its own seed drawn, in layer order, from a
// `ClockRng` seeded with `seed`, so one number reproduces the whole piece.
//
// Grammar symbols are referred to by name:
// - names listed in `symbolic` are symbolic non-terminals,
// - terminal names that appear as a rule's left side are rewritable
//   (wrapped) non-terminals wherever they occur,
// - other terminal names are plain terminals.
//
// Durations are strings ("1/2", "3") so they stay exact.

use crate::clock_tree::{ClockTree, LayerKey, LayerSpec};
use crate::duration::{Duration, DurationRange};
use crate::error::ConfigError;
use crate::event::{DEFAULT_VELOCITY, Event, SimpleEvent, SimpleKind};
use crate::grammar::{ContextFreeGrammar, DEFAULT_RENDER_LIMIT, NoteEntry, NonTerminal, Rule, SymT, Symbol, Terminal};
use crate::sampler::{PickFirst, PickSample, PickSampleByChoice, PickSampleByCycle};
use clockwork_prng::{ClockRng, DEFAULT_SEED};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::path::Path;
use tracing::info;

// ---------------------------------------------------------------------------
// Pickers and notes
// ---------------------------------------------------------------------------

/// Which sampler a layer uses for a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickerKind {
    /// Candidates in order, repeating.
    #[default]
    Cycle,
    /// Uniformly random candidate per pick.
    Choice,
    /// Always the first candidate.
    First,
}

impl PickerKind {
    fn build<T>(self, items: Vec<T>, seeds: &mut ClockRng) -> Box<dyn PickSample<T>>
    where
        T: Clone + Hash + fmt::Debug + 'static,
    {
        match self {
            PickerKind::Cycle => Box::new(PickSampleByCycle::new(items)),
            PickerKind::Choice => Box::new(PickSampleByChoice::new(items, seeds.next_u64())),
            PickerKind::First => Box::new(PickFirst::new(items)),
        }
    }
}

/// One leaf of layer or terminal material. No pitch means a rest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<u8>,
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<u8>,
}

impl NoteConfig {
    pub fn note(pitch: u8, duration: Duration) -> Self {
        Self {
            pitch: Some(pitch),
            duration,
            velocity: None,
        }
    }

    pub fn rest(duration: Duration) -> Self {
        Self {
            pitch: None,
            duration,
            velocity: None,
        }
    }

    pub fn to_simple(&self) -> SimpleEvent {
        match self.pitch {
            Some(pitch) => SimpleEvent {
                duration: self.duration.clone(),
                kind: SimpleKind::Note {
                    pitch,
                    velocity: self.velocity.unwrap_or(DEFAULT_VELOCITY),
                },
            },
            None => SimpleEvent::rest(self.duration.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Clock tree section
// ---------------------------------------------------------------------------

fn default_event_count() -> [usize; 2] {
    [1, 2]
}

fn default_count_picker() -> PickerKind {
    PickerKind::First
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
    /// Event candidates; an empty list makes a layer that only delegates.
    #[serde(default)]
    pub events: Vec<NoteConfig>,
    #[serde(default)]
    pub event_picker: PickerKind,
    #[serde(default)]
    pub child_picker: PickerKind,
    /// Half-open `[start, end)` range of iterations per pop.
    #[serde(default = "default_event_count")]
    pub event_count: [usize; 2],
    #[serde(default = "default_count_picker")]
    pub count_picker: PickerKind,
}

impl LayerConfig {
    pub fn new(id: &str, parent: Option<&str>, events: Vec<NoteConfig>) -> Self {
        Self {
            id: id.to_string(),
            parent: parent.map(str::to_string),
            events,
            event_picker: PickerKind::Cycle,
            child_picker: PickerKind::Cycle,
            event_count: default_event_count(),
            count_picker: default_count_picker(),
        }
    }
}

// ---------------------------------------------------------------------------
// Grammar section
// ---------------------------------------------------------------------------

fn default_track() -> String {
    "grammar".to_string()
}

fn default_weight() -> f64 {
    1.0
}

fn default_limit() -> Option<usize> {
    Some(DEFAULT_RENDER_LIMIT)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalConfig {
    pub name: String,
    /// Track tag the notes render into.
    #[serde(default = "default_track")]
    pub track: String,
    pub notes: Vec<NoteConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub left: String,
    pub right: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

/// One symbol to render, optionally with the duration range it should fill.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<[Duration; 2]>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrammarConfig {
    pub terminals: Vec<TerminalConfig>,
    #[serde(default)]
    pub symbolic: Vec<String>,
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub sequence: Vec<TargetConfig>,
    /// Expansion depth; `null` expands until only terminals remain.
    #[serde(default = "default_limit")]
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Whole composition
// ---------------------------------------------------------------------------

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_cycles() -> usize {
    4
}

fn default_tempo() -> u16 {
    96
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositionConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Root pops per run.
    #[serde(default = "default_cycles")]
    pub cycles: usize,
    #[serde(default = "default_tempo")]
    pub tempo_bpm: u16,
    pub layers: Vec<LayerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grammar: Option<GrammarConfig>,
}

impl CompositionConfig {
    /// Load a config from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config = Self::from_json(&data)?;
        info!(path = %path.display(), layers = config.layers.len(), "loaded composition config");
        Ok(config)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Create the clock tree described by `layers`.
    ///
    /// Layers must be listed parents first.
    pub fn build_clock_tree(&self) -> Result<ClockTree, ConfigError> {
        let mut seeds = ClockRng::new(self.seed);
        let mut tree = ClockTree::new();
        for layer in &self.layers {
            let [start, end] = layer.event_count;
            if start >= end {
                return Err(ConfigError::EmptyCountRange {
                    layer: layer.id.clone(),
                    start,
                    end,
                });
            }
            let events: Vec<Event> = layer.events.iter().map(|n| n.to_simple().into()).collect();
            let spec = LayerSpec {
                id: layer.id.clone(),
                parent: layer.parent.clone(),
                fetch_event: layer.event_picker.build(events, &mut seeds),
                fetch_child: layer.child_picker.build(Vec::<LayerKey>::new(), &mut seeds),
                event_count_range: start..end,
                pick_event_count: layer.count_picker.build((start..end).collect(), &mut seeds),
            };
            tree.create_layer(spec)?;
        }
        Ok(tree)
    }

    fn grammar_config(&self) -> Result<&GrammarConfig, ConfigError> {
        self.grammar.as_ref().ok_or(ConfigError::MissingGrammar)
    }

    /// Create the grammar described by the `grammar` section.
    pub fn build_grammar(&self) -> Result<ContextFreeGrammar, ConfigError> {
        let config = self.grammar_config()?;
        let terminals: FxHashMap<&str, Terminal> = config
            .terminals
            .iter()
            .map(|t| {
                let leaves = t.notes.iter().map(NoteConfig::to_simple).collect();
                (t.name.as_str(), Terminal::new(t.name.as_str(), NoteEntry::new(t.track.as_str(), leaves)))
            })
            .collect();
        let symbolic: FxHashSet<&str> = config.symbolic.iter().map(String::as_str).collect();
        let rewritable: FxHashSet<&str> = config.rules.iter().map(|r| r.left.as_str()).collect();

        let non_terminal = |name: &str| -> Result<NonTerminal, ConfigError> {
            if symbolic.contains(name) {
                Ok(NonTerminal::Symbolic(SymT::new(name)))
            } else if let Some(t) = terminals.get(name) {
                Ok(NonTerminal::Wrapped(t.clone()))
            } else {
                Err(ConfigError::UnknownSymbol(name.to_string()))
            }
        };
        let symbol = |name: &str| -> Result<Symbol, ConfigError> {
            match terminals.get(name) {
                Some(t) if !symbolic.contains(name) && !rewritable.contains(name) => Ok(Symbol::t(t)),
                _ => non_terminal(name).map(Symbol::NonTerminal),
            }
        };

        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            if !(rule.weight.is_finite() && rule.weight > 0.0) {
                return Err(ConfigError::BadWeight(rule.left.clone()));
            }
            let right = rule.right.iter().map(|name| symbol(name)).collect::<Result<Vec<_>, _>>()?;
            rules.push(Rule::new(non_terminal(&rule.left)?, right, rule.weight));
        }
        Ok(ContextFreeGrammar::new(rules))
    }

    /// The symbols to render, with their target ranges.
    pub fn grammar_sequence(&self) -> Result<Vec<SymT>, ConfigError> {
        let config = self.grammar_config()?;
        config
            .sequence
            .iter()
            .map(|target| {
                if !config.symbolic.contains(&target.symbol) {
                    return Err(ConfigError::UnknownSymbol(target.symbol.clone()));
                }
                Ok(match &target.range {
                    Some([start, end]) => {
                        SymT::with_range(target.symbol.as_str(), DurationRange::new(start.clone(), end.clone()))
                    }
                    None => SymT::new(target.symbol.as_str()),
                })
            })
            .collect()
    }

    pub fn grammar_limit(&self) -> Option<usize> {
        self.grammar.as_ref().map_or(default_limit(), |g| g.limit)
    }
}

impl Default for CompositionConfig {
    /// A small built-in piece: a bass pulse that hands over to a melodic
    /// figure, which occasionally ornaments itself, plus a grammar-driven
    /// counter line.
    fn default() -> Self {
        let d = Duration::new;
        let mut figure = LayerConfig::new(
            "figure",
            Some("pulse"),
            vec![
                NoteConfig::note(60, d(1, 2)),
                NoteConfig::note(62, d(1, 2)),
                NoteConfig::note(64, d(1, 2)),
                NoteConfig::note(67, d(1, 1)),
            ],
        );
        figure.event_picker = PickerKind::Choice;
        figure.event_count = [1, 4];
        figure.count_picker = PickerKind::Choice;

        let mut ornament = LayerConfig::new(
            "ornament",
            Some("figure"),
            vec![NoteConfig::note(72, d(1, 4)), NoteConfig::rest(d(1, 4)), NoteConfig::note(74, d(1, 4))],
        );
        ornament.event_count = [2, 3];

        let pulse = LayerConfig::new(
            "pulse",
            None,
            vec![NoteConfig::note(36, d(2, 1)), NoteConfig::note(43, d(2, 1))],
        );

        let terminal = |name: &str, notes: Vec<NoteConfig>| TerminalConfig {
            name: name.to_string(),
            track: default_track(),
            notes,
        };
        let rule = |left: &str, right: &[&str], weight: f64| RuleConfig {
            left: left.to_string(),
            right: right.iter().map(|s| s.to_string()).collect(),
            weight,
        };
        let grammar = GrammarConfig {
            terminals: vec![
                terminal("short", vec![NoteConfig::note(67, d(1, 2))]),
                terminal("long", vec![NoteConfig::note(69, d(1, 1))]),
                terminal("turn", vec![NoteConfig::note(71, d(1, 4)), NoteConfig::note(69, d(1, 4))]),
            ],
            symbolic: vec!["phrase".to_string()],
            rules: vec![
                rule("phrase", &["short"], 1.0),
                rule("short", &["short", "long"], 1.0),
                rule("short", &["short", "turn"], 0.5),
                rule("long", &["long", "short"], 0.7),
            ],
            sequence: vec![
                TargetConfig {
                    symbol: "phrase".to_string(),
                    range: Some([d(2, 1), d(3, 1)]),
                },
                TargetConfig {
                    symbol: "phrase".to_string(),
                    range: None,
                },
            ],
            limit: default_limit(),
        };

        Self {
            seed: DEFAULT_SEED,
            cycles: default_cycles(),
            tempo_bpm: default_tempo(),
            layers: vec![pulse, figure, ornament],
            grammar: Some(grammar),
        }
    }
}
