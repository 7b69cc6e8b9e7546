// Clockwork: layered clock trees and weighted rhythm grammars for
// algorithmic composition.
//
// Two generators feed the same plain event model. A clock tree is a tree of
// layers; popping a layer interleaves its own events with material popped
// from one of its children, and returns a control stream recording which
// layers were active when. A weighted context-free grammar expands symbolic
// placeholders into derivation trees and renders the derivation whose
// duration best fits a requested range.
//
// Architecture:
// - duration.rs: Exact rational durations and closed duration ranges
// - event.rs: Simple/sequential/simultaneous events, tags, tag- or
//   index-based merging
// - sampler.rs: Refreshable candidate samplers (cycle, seeded choice, first)
// - clock_tree.rs: Arena of clock layers, pop algorithm, control timelines
// - grammar.rs: Terminals, non-terminals, weighted rules, resolution
// - derivation.rs: Derivation trees, node weights, range-steered selection
// - clock.rs: Clock events, clock lines with placements, start/main/end clocks
// - modal.rs: Modal sequences that host one clock tree pop per modal event
// - config.rs: JSON composition configs that build trees and grammars
// - composition.rs: One full run of a config
// - midi.rs: MIDI file output from event trees
// - error.rs: Error types
//
// Randomness comes only from `clockwork_prng::ClockRng` instances owned by
// samplers and derivation trees, so output is deterministic given the seeds.

pub mod clock;
pub mod clock_tree;
pub mod composition;
pub mod config;
pub mod derivation;
pub mod duration;
pub mod error;
pub mod event;
pub mod grammar;
pub mod midi;
pub mod modal;
pub mod sampler;
