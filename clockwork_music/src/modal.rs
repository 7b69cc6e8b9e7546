// Modal sequences: harmonic frames that host clock material.
//
// A modal sequence is a list of `ModalItem`s: either a `ModalEvent` (a span
// moving from a start pitch to an end pitch, with an energy level) or a plain
// rest. A modal event has no duration of its own; it lasts as long as the
// clock event generated for it.
//
// Pipeline:
// 1. `apply_clock_trees` asks a `ModalClockTreeFactory` for one tree per
//    modal event and stores one root pop as the event's clock and control.
// 2. `modal_sequence_to_clock_event` joins the per-event clock events.
// 3. `modal_sequence_to_clock_line` adds the placements produced by each
//    `PlacementMaker` and returns a `ClockLine`.

use crate::clock::{ClockLine, EventPlacement, clock_event};
use crate::clock_tree::ClockTree;
use crate::duration::Duration;
use crate::error::ClockError;
use crate::event::{Event, SequentialEvent, SimpleEvent, SimultaneousEvent};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModalEvent {
    pub start_pitch: u8,
    pub end_pitch: u8,
    pub energy: i32,
    #[serde(default)]
    pub clock_event: Option<SimultaneousEvent>,
    #[serde(default)]
    pub control_event: Option<SimultaneousEvent>,
}

impl ModalEvent {
    pub fn new(start_pitch: u8, end_pitch: u8, energy: i32) -> Self {
        Self {
            start_pitch,
            end_pitch,
            energy,
            clock_event: None,
            control_event: None,
        }
    }

    /// Length of the attached clock event, zero before one is applied.
    pub fn duration(&self) -> Duration {
        self.clock_event.as_ref().map(SimultaneousEvent::duration).unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModalItem {
    Modal(ModalEvent),
    Rest { duration: Duration },
}

impl ModalItem {
    pub fn rest(duration: Duration) -> Self {
        ModalItem::Rest { duration }
    }

    pub fn duration(&self) -> Duration {
        match self {
            ModalItem::Modal(m) => m.duration(),
            ModalItem::Rest { duration } => duration.clone(),
        }
    }

    pub fn as_modal(&self) -> Option<&ModalEvent> {
        match self {
            ModalItem::Modal(m) => Some(m),
            ModalItem::Rest { .. } => None,
        }
    }
}

/// Builds the clock tree that generates material for one modal event.
pub trait ModalClockTreeFactory {
    fn clock_tree(&mut self, event: &ModalEvent) -> Result<ClockTree, ClockError>;
}

impl<F> ModalClockTreeFactory for F
where
    F: FnMut(&ModalEvent) -> Result<ClockTree, ClockError>,
{
    fn clock_tree(&mut self, event: &ModalEvent) -> Result<ClockTree, ClockError> {
        self(event)
    }
}

/// Fill every modal event's clock and control from one root pop of its own
/// tree. Rests are left alone.
pub fn apply_clock_trees(sequence: &mut [ModalItem], factory: &mut impl ModalClockTreeFactory) -> Result<(), ClockError> {
    for item in sequence.iter_mut() {
        let ModalItem::Modal(event) = item else { continue };
        let mut tree = factory.clock_tree(event)?;
        let popped = tree.pop_root()?;
        debug!(
            start_pitch = event.start_pitch,
            end_pitch = event.end_pitch,
            duration = %popped.duration(),
            "applied clock tree"
        );
        event.clock_event = Some(clock_event(vec![popped.content.into()]));
        event.control_event = Some(popped.control);
    }
    Ok(())
}

/// Join the clock events of a modal sequence into one.
///
/// Rests contribute a rest track of their duration; modal events that never
/// received a clock event contribute nothing.
pub fn modal_sequence_to_clock_event(sequence: &[ModalItem]) -> SimultaneousEvent {
    let mut joined = clock_event(Vec::new());
    for item in sequence {
        let next = match item {
            ModalItem::Modal(event) => event.clock_event.clone().unwrap_or_else(|| clock_event(Vec::new())),
            ModalItem::Rest { duration } if duration.is_positive() => {
                clock_event(vec![SequentialEvent::new(vec![SimpleEvent::rest(duration.clone()).into()]).into()])
            }
            ModalItem::Rest { .. } => continue,
        };
        joined.concatenate(next);
    }
    joined
}

/// Produces instrument placements for a modal sequence.
pub trait PlacementMaker {
    fn placements(&mut self, sequence: &[ModalItem]) -> Result<Vec<EventPlacement>, ClockError>;
}

/// Build a clock line: joined clock event plus every maker's placements.
pub fn modal_sequence_to_clock_line(
    sequence: &[ModalItem],
    makers: &mut [Box<dyn PlacementMaker>],
) -> Result<ClockLine, ClockError> {
    let mut placements = Vec::new();
    for maker in makers.iter_mut() {
        placements.extend(maker.placements(sequence)?);
    }
    Ok(ClockLine::new(modal_sequence_to_clock_event(sequence), placements))
}

/// Holds each modal event's start pitch for its whole span, then its end
/// pitch for the last `tail` fraction of it.
#[derive(Clone, Debug)]
pub struct PitchDrone {
    pub tag: String,
    pub tail: Duration,
}

impl PitchDrone {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            tail: Duration::new(1, 4),
        }
    }
}

impl PlacementMaker for PitchDrone {
    fn placements(&mut self, sequence: &[ModalItem]) -> Result<Vec<EventPlacement>, ClockError> {
        let mut placements = Vec::new();
        let mut start = Duration::zero();
        for item in sequence {
            let duration = item.duration();
            if let (Some(event), true) = (item.as_modal(), duration.is_positive()) {
                let tail = duration.scaled(self.tail.ratio());
                let notes: Vec<Event> = if tail.is_positive() && tail < duration && event.end_pitch != event.start_pitch {
                    vec![
                        SimpleEvent::note(event.start_pitch, &duration - &tail).into(),
                        SimpleEvent::note(event.end_pitch, tail).into(),
                    ]
                } else {
                    vec![SimpleEvent::note(event.start_pitch, duration.clone()).into()]
                };
                placements.push(EventPlacement::new(
                    self.tag.as_str(),
                    vec![SequentialEvent::new(notes).into()],
                    start.clone(),
                    &start + &duration,
                )?);
            }
            start += duration;
        }
        Ok(placements)
    }
}
