// Clocks: the top-level composition unit.
//
// A clock event is a simultaneous event tagged "clock" whose tracks hold the
// generated rhythmic material. A `ClockLine` pairs one clock event with
// `EventPlacement`s, tagged instrument fragments pinned to absolute
// [start, end) intervals. A `Clock` is up to three clock lines played in
// order: an optional start, a main line that may repeat, and an optional end.
//
// Flattening (`to_simultaneous`) yields one simultaneous event whose children
// are the clock event followed by one tagged group per placement tag, all
// padded to a common duration.

use crate::duration::Duration;
use crate::error::ClockError;
use crate::event::{Event, SimultaneousEvent};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tag carried by clock events.
pub const DEFAULT_CLOCK_TAG: &str = "clock";

/// Wrap tracks into a clock event.
pub fn clock_event(tracks: Vec<Event>) -> SimultaneousEvent {
    SimultaneousEvent::tagged(DEFAULT_CLOCK_TAG, tracks)
}

/// A tagged fragment anchored to `[start, end)` within a clock line.
///
/// `new` rejects intervals that end before they start. Placements built
/// field by field or deserialized are checked again when a line is flattened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPlacement {
    pub event: SimultaneousEvent,
    pub start: Duration,
    pub end: Duration,
}

impl EventPlacement {
    pub fn new(tag: impl Into<String>, tracks: Vec<Event>, start: Duration, end: Duration) -> Result<Self, ClockError> {
        let tag = tag.into();
        if end < start {
            return Err(ClockError::InvertedPlacement { tag, start, end });
        }
        Ok(Self {
            event: SimultaneousEvent::tagged(tag, tracks),
            start,
            end,
        })
    }

    pub fn tag(&self) -> &str {
        self.event.tag.as_deref().unwrap_or_default()
    }

    pub fn duration(&self) -> Duration {
        &self.end - &self.start
    }

    pub fn is_inverted(&self) -> bool {
        self.end < self.start
    }

    /// The fragment stretched to exactly fill its interval.
    fn fitted(&self) -> SimultaneousEvent {
        let mut event = Event::Simultaneous(self.event.clone());
        event.scale_to(&self.duration());
        match event {
            Event::Simultaneous(sim) => sim,
            _ => SimultaneousEvent::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClockLine {
    pub clock_event: SimultaneousEvent,
    pub placements: Vec<EventPlacement>,
}

impl ClockLine {
    pub fn new(clock_event: SimultaneousEvent, placements: Vec<EventPlacement>) -> Self {
        Self { clock_event, placements }
    }

    /// Duration of the clock event; placements do not lengthen a line.
    pub fn duration(&self) -> Duration {
        self.clock_event.duration()
    }

    /// Flatten into `[clock event, group per placement tag...]`.
    ///
    /// Placements are laid out in start order. Each group is padded with
    /// rests up to a placement's start before the placement is appended.
    /// Inverted placements are skipped.
    pub fn to_simultaneous(&self) -> SimultaneousEvent {
        let mut placements: Vec<&EventPlacement> = Vec::with_capacity(self.placements.len());
        for placement in &self.placements {
            if placement.is_inverted() {
                warn!(tag = placement.tag(), start = %placement.start, end = %placement.end, "inverted placement skipped");
                continue;
            }
            placements.push(placement);
        }
        placements.sort_by(|a, b| a.start.cmp(&b.start));

        let mut groups: Vec<SimultaneousEvent> = Vec::new();
        for placement in placements {
            let position = groups.iter().position(|g| g.tag.as_deref() == Some(placement.tag()));
            let group = match position {
                Some(i) => &mut groups[i],
                None => {
                    groups.push(SimultaneousEvent::tagged(placement.tag(), Vec::new()));
                    let last = groups.len() - 1;
                    &mut groups[last]
                }
            };

            group.extend_until(&placement.start);
            if group.duration() > placement.start {
                warn!(tag = placement.tag(), start = %placement.start, "overlapping placement delayed");
            }
            let mut incoming = Event::Simultaneous(placement.fitted());
            incoming.pad_front(&(&placement.start - &group.duration()));
            if let Event::Simultaneous(incoming) = incoming {
                group.concatenate_by_index(incoming);
            }
        }

        let mut flat = SimultaneousEvent::new(Vec::with_capacity(groups.len() + 1));
        flat.push(self.clock_event.clone());
        for group in groups {
            flat.push(group);
        }
        flat.align();
        flat
    }
}

/// Start, main and end lines of one composition unit.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Clock {
    pub start: Option<ClockLine>,
    pub main: ClockLine,
    pub end: Option<ClockLine>,
}

impl Clock {
    pub fn new(main: ClockLine) -> Self {
        Self {
            start: None,
            main,
            end: None,
        }
    }

    pub fn lines(&self) -> impl Iterator<Item = &ClockLine> {
        self.start.iter().chain(std::iter::once(&self.main)).chain(self.end.iter())
    }

    /// Sum of the line durations, counting the main line once.
    pub fn duration(&self) -> Duration {
        self.lines().map(ClockLine::duration).sum()
    }

    /// Flatten start once, main `repetitions` times and end once, joining
    /// groups by tag.
    pub fn to_simultaneous(&self, repetitions: usize) -> SimultaneousEvent {
        let mut flat = SimultaneousEvent::default();
        let schedule = [(self.start.as_ref(), 1), (Some(&self.main), repetitions), (self.end.as_ref(), 1)];
        for (line, count) in schedule {
            let Some(line) = line else { continue };
            for _ in 0..count {
                flat.concatenate_by_tag(line.to_simultaneous());
            }
        }
        flat
    }
}
