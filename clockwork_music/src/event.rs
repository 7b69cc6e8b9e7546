// Event model: timed leaves and their sequential/simultaneous composites.
//
// Everything a clock tree or a grammar produces is an `Event`:
// - `SimpleEvent`: a leaf with an exact duration and a `SimpleKind` payload
//   (rest, note, or a control span marking a layer active/inactive).
// - `SequentialEvent`: children laid end to end; duration is the sum.
// - `SimultaneousEvent`: children overlaid from the same start; duration is
//   the longest child.
// Composites may carry a tag. Tags identify layers in control structures and
// instrument tracks in clock events, and they drive merging.
//
// Merging two simultaneous events is done with an explicit `MergeStrategy`:
// by tag when every incoming child is tagged, otherwise by position. A merge
// never fails on unequal track lengths; shorter tracks are padded with rests
// so every track ends at the same time.
//
// Consumers (the MIDI exporter, tests, JSON dumps) only see these plain
// structures; nothing here knows about notation.

use crate::duration::Duration;
use num_rational::BigRational;
use serde::{Deserialize, Serialize};

/// Payload of a leaf event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimpleKind {
    /// Silence, or padding added to keep tracks aligned.
    Rest,
    /// A sounding pitch (MIDI note number and velocity).
    Note { pitch: u8, velocity: u8 },
    /// A control-timeline span: whether a layer was contributing.
    Span { active: bool },
}

/// Default velocity for notes built without one.
pub const DEFAULT_VELOCITY: u8 = 80;

/// A leaf event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimpleEvent {
    pub duration: Duration,
    pub kind: SimpleKind,
}

impl SimpleEvent {
    pub fn rest(duration: Duration) -> Self {
        Self { duration, kind: SimpleKind::Rest }
    }

    pub fn note(pitch: u8, duration: Duration) -> Self {
        Self {
            duration,
            kind: SimpleKind::Note { pitch, velocity: DEFAULT_VELOCITY },
        }
    }

    pub fn span(active: bool, duration: Duration) -> Self {
        Self { duration, kind: SimpleKind::Span { active } }
    }

    pub fn pitch(&self) -> Option<u8> {
        match self.kind {
            SimpleKind::Note { pitch, .. } => Some(pitch),
            _ => None,
        }
    }

    /// `Some(active)` for control spans, `None` for musical leaves.
    pub fn is_active(&self) -> Option<bool> {
        match self.kind {
            SimpleKind::Span { active } => Some(active),
            _ => None,
        }
    }
}

/// Children played one after another.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SequentialEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub events: Vec<Event>,
}

/// Children played together, all starting at the same time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SimultaneousEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub events: Vec<Event>,
}

/// Any event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Simple(SimpleEvent),
    Sequential(SequentialEvent),
    Simultaneous(SimultaneousEvent),
}

/// How the children of an incoming simultaneous event are matched against
/// the tracks already present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Match tracks with equal tags.
    ByTag,
    /// Match tracks at equal positions.
    ByIndex,
}

impl MergeStrategy {
    /// Tag matching is possible only when every incoming child has a tag.
    pub fn select(incoming: &SimultaneousEvent) -> Self {
        if !incoming.events.is_empty() && incoming.events.iter().all(|e| e.tag().is_some()) {
            MergeStrategy::ByTag
        } else {
            MergeStrategy::ByIndex
        }
    }
}

impl From<SimpleEvent> for Event {
    fn from(e: SimpleEvent) -> Self {
        Event::Simple(e)
    }
}

impl From<SequentialEvent> for Event {
    fn from(e: SequentialEvent) -> Self {
        Event::Sequential(e)
    }
}

impl From<SimultaneousEvent> for Event {
    fn from(e: SimultaneousEvent) -> Self {
        Event::Simultaneous(e)
    }
}

impl Event {
    pub fn duration(&self) -> Duration {
        match self {
            Event::Simple(e) => e.duration.clone(),
            Event::Sequential(e) => e.duration(),
            Event::Simultaneous(e) => e.duration(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Event::Simple(_) => None,
            Event::Sequential(e) => e.tag.as_deref(),
            Event::Simultaneous(e) => e.tag.as_deref(),
        }
    }

    /// Lengthen this event to at least `duration`.
    ///
    /// Leaves are stretched, sequences get a trailing rest, and every child of
    /// a simultaneous event is extended. Never shortens.
    pub fn extend_until(&mut self, duration: &Duration) {
        match self {
            Event::Simple(e) => {
                if e.duration < *duration {
                    e.duration = duration.clone();
                }
            }
            Event::Sequential(e) => e.extend_until(duration),
            Event::Simultaneous(e) => e.extend_until(duration),
        }
    }

    /// Delay this event by inserting a leading rest of `delay`.
    pub fn pad_front(&mut self, delay: &Duration) {
        if !delay.is_positive() {
            return;
        }
        match self {
            Event::Simple(_) => {
                let leaf = std::mem::replace(self, Event::Sequential(SequentialEvent::default()));
                *self = Event::Sequential(SequentialEvent::new(vec![
                    SimpleEvent::rest(delay.clone()).into(),
                    leaf,
                ]));
            }
            Event::Sequential(e) => e.pad_front_with(SimpleEvent::rest(delay.clone())),
            Event::Simultaneous(e) => {
                for child in &mut e.events {
                    child.pad_front(delay);
                }
            }
        }
    }

    /// Multiply every leaf duration by `factor`.
    pub fn scale(&mut self, factor: &BigRational) {
        match self {
            Event::Simple(e) => e.duration = e.duration.scaled(factor),
            Event::Sequential(SequentialEvent { events, .. })
            | Event::Simultaneous(SimultaneousEvent { events, .. }) => {
                for child in events {
                    child.scale(factor);
                }
            }
        }
    }

    /// Stretch or compress this event so its duration becomes exactly
    /// `target`. A zero-length event is left alone.
    pub fn scale_to(&mut self, target: &Duration) {
        let current = self.duration();
        if current.is_positive() {
            self.scale(&(target / &current));
        }
    }

    /// Merge adjacent leaves of every nested sequence when `should_tie`
    /// holds for the pair. The merged leaf keeps the first leaf's payload and
    /// the summed duration, so timing is unchanged.
    pub fn tie_by(&mut self, should_tie: &impl Fn(&SimpleEvent, &SimpleEvent) -> bool) {
        match self {
            Event::Simple(_) => {}
            Event::Sequential(e) => e.tie_by(should_tie),
            Event::Simultaneous(e) => {
                for child in &mut e.events {
                    child.tie_by(should_tie);
                }
            }
        }
    }

    /// Append `next` after this event in time.
    ///
    /// Sequences absorb the incoming children; simultaneous events merge
    /// track-wise (choosing the strategy from `next`); a lone leaf is turned
    /// into a sequence first.
    pub fn append_in_time(&mut self, next: Event) {
        match self {
            Event::Sequential(seq) => match next {
                Event::Sequential(other) => seq.events.extend(other.events),
                other => seq.events.push(other),
            },
            Event::Simultaneous(sim) => match next {
                Event::Simultaneous(other) => {
                    sim.concatenate(other);
                }
                other => {
                    sim.concatenate_by_index(SimultaneousEvent::new(vec![other]));
                }
            },
            Event::Simple(_) => {
                let leaf = std::mem::replace(self, Event::Sequential(SequentialEvent::default()));
                let mut seq = Event::Sequential(SequentialEvent::new(vec![leaf]));
                seq.append_in_time(next);
                *self = seq;
            }
        }
    }

    /// Visit every leaf with its absolute start offset.
    pub fn for_each_leaf(&self, start: Duration, visit: &mut impl FnMut(Duration, &SimpleEvent)) {
        match self {
            Event::Simple(e) => visit(start, e),
            Event::Sequential(e) => {
                let mut offset = start;
                for child in &e.events {
                    child.for_each_leaf(offset.clone(), visit);
                    offset += child.duration();
                }
            }
            Event::Simultaneous(e) => {
                for child in &e.events {
                    child.for_each_leaf(start.clone(), visit);
                }
            }
        }
    }
}

impl SequentialEvent {
    pub fn new(events: Vec<Event>) -> Self {
        Self { tag: None, events }
    }

    pub fn tagged(tag: impl Into<String>, events: Vec<Event>) -> Self {
        Self { tag: Some(tag.into()), events }
    }

    pub fn duration(&self) -> Duration {
        self.events.iter().map(Event::duration).sum()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn push(&mut self, event: impl Into<Event>) {
        self.events.push(event.into());
    }

    /// Append a rest covering whatever is missing up to `duration`.
    pub fn extend_until(&mut self, duration: &Duration) {
        self.extend_until_with(duration, SimpleEvent::rest);
    }

    /// Like `extend_until`, with a caller-chosen filler leaf.
    pub fn extend_until_with(&mut self, duration: &Duration, filler: impl FnOnce(Duration) -> SimpleEvent) {
        let missing = duration - &self.duration();
        if missing.is_positive() {
            self.events.push(filler(missing).into());
        }
    }

    /// Insert `leaf` before all other children.
    pub fn pad_front_with(&mut self, leaf: SimpleEvent) {
        if leaf.duration.is_positive() {
            self.events.insert(0, leaf.into());
        }
    }

    pub fn tie_by(&mut self, should_tie: &impl Fn(&SimpleEvent, &SimpleEvent) -> bool) {
        let mut tied: Vec<Event> = Vec::with_capacity(self.events.len());
        for mut event in std::mem::take(&mut self.events) {
            event.tie_by(should_tie);
            if let (Some(Event::Simple(prev)), Event::Simple(cur)) = (tied.last_mut(), &event) {
                if should_tie(prev, cur) {
                    prev.duration += &cur.duration;
                    continue;
                }
            }
            tied.push(event);
        }
        self.events = tied;
    }

    /// Iterate over the leaves that are direct children.
    pub fn simple_events(&self) -> impl Iterator<Item = &SimpleEvent> {
        self.events.iter().filter_map(|e| match e {
            Event::Simple(s) => Some(s),
            _ => None,
        })
    }
}

impl SimultaneousEvent {
    pub fn new(events: Vec<Event>) -> Self {
        Self { tag: None, events }
    }

    pub fn tagged(tag: impl Into<String>, events: Vec<Event>) -> Self {
        Self { tag: Some(tag.into()), events }
    }

    pub fn duration(&self) -> Duration {
        self.events.iter().map(Event::duration).max().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn push(&mut self, event: impl Into<Event>) {
        self.events.push(event.into());
    }

    pub fn position_of_tag(&self, tag: &str) -> Option<usize> {
        self.events.iter().position(|e| e.tag() == Some(tag))
    }

    pub fn get_tagged(&self, tag: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.tag() == Some(tag))
    }

    pub fn get_tagged_mut(&mut self, tag: &str) -> Option<&mut Event> {
        self.events.iter_mut().find(|e| e.tag() == Some(tag))
    }

    pub fn extend_until(&mut self, duration: &Duration) {
        for child in &mut self.events {
            child.extend_until(duration);
        }
    }

    /// Bring every track up to the duration of the longest one.
    pub fn align(&mut self) {
        let total = self.duration();
        self.extend_until(&total);
    }

    /// Append `other` after this event, choosing the merge strategy from
    /// `other`'s children. Returns the strategy that was used.
    pub fn concatenate(&mut self, other: SimultaneousEvent) -> MergeStrategy {
        let strategy = MergeStrategy::select(&other);
        self.merge(other, strategy);
        strategy
    }

    pub fn concatenate_by_tag(&mut self, other: SimultaneousEvent) {
        self.merge(other, MergeStrategy::ByTag);
    }

    pub fn concatenate_by_index(&mut self, other: SimultaneousEvent) {
        self.merge(other, MergeStrategy::ByIndex);
    }

    fn merge(&mut self, mut other: SimultaneousEvent, strategy: MergeStrategy) {
        let self_duration = self.duration();
        self.extend_until(&self_duration);
        other.align();

        for (index, mut track) in other.events.into_iter().enumerate() {
            let slot = match strategy {
                MergeStrategy::ByTag => track.tag().and_then(|tag| self.position_of_tag(tag)),
                MergeStrategy::ByIndex => (index < self.events.len()).then_some(index),
            };
            match slot {
                Some(i) => self.events[i].append_in_time(track),
                None => {
                    track.pad_front(&self_duration);
                    self.events.push(track);
                }
            }
        }

        self.align();
    }
}
