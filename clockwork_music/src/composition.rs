// One full run of a composition config.
//
// `compose` builds the clock tree and (if configured) the grammar, pops the
// root `cycles` times and renders the grammar's target sequence. The result
// keeps the control stream next to the content so dumps can show which layer
// was sounding when; `to_simultaneous` drops the control and returns the
// playable piece: the clock content plus the grammar line.

use crate::clock::clock_event;
use crate::clock_tree::PoppedClock;
use crate::config::CompositionConfig;
use crate::duration::Duration;
use crate::error::ConfigError;
use crate::event::SimultaneousEvent;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Tag of the group holding rendered grammar output.
pub const GRAMMAR_TAG: &str = "grammar";

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Composition {
    pub clock: PoppedClock,
    pub grammar: Vec<SimultaneousEvent>,
}

impl Composition {
    pub fn grammar_duration(&self) -> Duration {
        self.grammar.iter().map(SimultaneousEvent::duration).sum()
    }

    pub fn duration(&self) -> Duration {
        self.clock.duration().max(self.grammar_duration())
    }

    /// Clock content and grammar line as one piece, all tracks aligned.
    pub fn to_simultaneous(&self) -> SimultaneousEvent {
        let mut piece = SimultaneousEvent::new(vec![clock_event(vec![self.clock.content.clone().into()]).into()]);
        if !self.grammar.is_empty() {
            let mut line = SimultaneousEvent::tagged(GRAMMAR_TAG, Vec::new());
            for event in &self.grammar {
                line.concatenate(event.clone());
            }
            piece.push(line);
        }
        piece.align();
        piece
    }
}

pub fn compose(config: &CompositionConfig) -> Result<Composition, ConfigError> {
    let mut tree = config.build_clock_tree()?;
    let clock = tree.pop_cycles(config.cycles)?;
    info!(cycles = config.cycles, duration = %clock.duration(), "popped clock tree");

    let grammar = if config.grammar.is_some() {
        let grammar = config.build_grammar()?;
        let sequence = config.grammar_sequence()?;
        let rendered = grammar.render_sequence(&sequence, config.grammar_limit(), config.seed)?;
        info!(symbols = sequence.len(), "rendered grammar sequence");
        rendered
    } else {
        Vec::new()
    };

    Ok(Composition { clock, grammar })
}
