// Clock trees: nested generative layers with a synchronized control stream.
//
// A `ClockTree` is an n-ary tree of `ClockLayer`s stored in an arena and
// addressed by `LayerKey`. Each layer owns three samplers: one for its own
// events, one choosing which child to descend into, and one choosing how many
// iterations a single pop runs (drawn from `event_count_range`).
//
// Popping a layer runs its iterations. Each iteration:
// 1. refreshes the child sampler with the layer's *current* children (the
//    tree may have grown since the layer was created),
// 2. appends one local event if the event sampler yields one,
// 3. pops one child if the child sampler yields one, splicing the child's
//    content onto the output and merging the child's control fragment,
// 4. back-fills every child timeline with an inactive span up to the running
//    total,
// 5. records an active span for this iteration on the layer's own timeline.
// Adjacent inactive spans are tied together at the end.
//
// The control stream is a simultaneous event holding one tagged sequential
// timeline per layer seen (tag = layer id, own timeline first). Every
// timeline has exactly the duration of the content, so for any offset a
// consumer can tell which nested layers were sounding.
//
// Topology is read-only during a pop; layers only hold their key and ask the
// arena for children, so keys stay valid as the tree grows.

use crate::duration::Duration;
use crate::error::ClockError;
use crate::event::{Event, SequentialEvent, SimpleEvent, SimultaneousEvent};
use crate::sampler::{PickFirst, PickSample};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use tracing::{debug, trace, warn};

/// Stable handle of a layer inside its tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerKey(usize);

impl LayerKey {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for LayerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LayerKey({})", self.0)
    }
}

pub type EventSampler = Box<dyn PickSample<Event>>;
pub type ChildSampler = Box<dyn PickSample<LayerKey>>;
pub type CountSampler = Box<dyn PickSample<usize>>;

/// Declaration of a layer, consumed by `ClockTree::create_layer`.
#[derive(Debug)]
pub struct LayerSpec {
    pub id: String,
    pub parent: Option<String>,
    pub fetch_event: EventSampler,
    pub fetch_child: ChildSampler,
    /// Half-open range of iteration counts per pop. Default `1..2`.
    pub event_count_range: Range<usize>,
    /// Chooses the iteration count from the values in `event_count_range`.
    pub pick_event_count: CountSampler,
}

impl LayerSpec {
    pub fn new(
        id: impl Into<String>,
        parent: Option<&str>,
        fetch_event: impl PickSample<Event> + 'static,
        fetch_child: impl PickSample<LayerKey> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            parent: parent.map(str::to_string),
            fetch_event: Box::new(fetch_event),
            fetch_child: Box::new(fetch_child),
            event_count_range: 1..2,
            pick_event_count: Box::new(PickFirst::default()),
        }
    }

    pub fn with_event_count(mut self, range: Range<usize>, picker: impl PickSample<usize> + 'static) -> Self {
        self.event_count_range = range;
        self.pick_event_count = Box::new(picker);
        self
    }
}

/// Per-layer generation behavior.
#[derive(Debug)]
pub struct ClockLayer {
    key: LayerKey,
    fetch_event: EventSampler,
    fetch_child: ChildSampler,
    event_count_range: Range<usize>,
    pick_event_count: CountSampler,
}

impl ClockLayer {
    pub fn key(&self) -> LayerKey {
        self.key
    }

    pub fn event_count_range(&self) -> Range<usize> {
        self.event_count_range.clone()
    }

    fn draw_event_count(&mut self) -> usize {
        let counts: Vec<usize> = self.event_count_range.clone().collect();
        self.pick_event_count.refresh(&counts);
        self.pick_event_count.pick().unwrap_or(0)
    }
}

#[derive(Debug)]
struct LayerNode {
    id: String,
    parent: Option<LayerKey>,
    children: Vec<LayerKey>,
    layer: ClockLayer,
}

/// Output of one pop: the musical content and its control stream.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoppedClock {
    pub content: SequentialEvent,
    pub control: SimultaneousEvent,
}

impl PoppedClock {
    pub fn duration(&self) -> Duration {
        self.content.duration()
    }

    /// The control timeline of the layer with the given id.
    pub fn timeline(&self, id: &str) -> Option<&SequentialEvent> {
        match self.control.get_tagged(id)? {
            Event::Sequential(seq) => Some(seq),
            _ => None,
        }
    }
}

/// Arena-backed tree of clock layers.
#[derive(Debug, Default)]
pub struct ClockTree {
    nodes: Vec<LayerNode>,
    index: FxHashMap<String, LayerKey>,
    root: Option<LayerKey>,
}

impl ClockTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<LayerKey> {
        self.root
    }

    pub fn key(&self, id: &str) -> Option<LayerKey> {
        self.index.get(id).copied()
    }

    pub fn id(&self, key: LayerKey) -> Option<&str> {
        self.nodes.get(key.0).map(|n| n.id.as_str())
    }

    pub fn parent(&self, key: LayerKey) -> Option<LayerKey> {
        self.nodes.get(key.0).and_then(|n| n.parent)
    }

    /// Children of a layer in creation order.
    pub fn children(&self, key: LayerKey) -> &[LayerKey] {
        self.nodes.get(key.0).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn layer(&self, key: LayerKey) -> Option<&ClockLayer> {
        self.nodes.get(key.0).map(|n| &n.layer)
    }

    /// Insert a new layer under its (already existing) parent.
    pub fn create_layer(&mut self, spec: LayerSpec) -> Result<LayerKey, ClockError> {
        if self.index.contains_key(&spec.id) {
            return Err(ClockError::DuplicateLayer(spec.id));
        }
        let parent = match &spec.parent {
            Some(parent_id) => Some(self.key(parent_id).ok_or_else(|| ClockError::UnknownParent {
                layer: spec.id.clone(),
                parent: parent_id.clone(),
            })?),
            None => {
                if let Some(root) = self.root {
                    return Err(ClockError::SecondRoot {
                        layer: spec.id,
                        root: self.nodes[root.0].id.clone(),
                    });
                }
                None
            }
        };

        let key = LayerKey(self.nodes.len());
        self.nodes.push(LayerNode {
            id: spec.id.clone(),
            parent,
            children: Vec::new(),
            layer: ClockLayer {
                key,
                fetch_event: spec.fetch_event,
                fetch_child: spec.fetch_child,
                event_count_range: spec.event_count_range,
                pick_event_count: spec.pick_event_count,
            },
        });
        match parent {
            Some(p) => self.nodes[p.0].children.push(key),
            None => self.root = Some(key),
        }
        debug!(layer = %spec.id, parent = ?spec.parent, "created clock layer");
        self.index.insert(spec.id, key);
        Ok(key)
    }

    /// Pop one slice of content and control from the given layer.
    pub fn pop_event(&mut self, key: LayerKey) -> Result<PoppedClock, ClockError> {
        if key.0 >= self.nodes.len() {
            return Err(ClockError::UnknownLayer(key.to_string()));
        }
        Ok(self.pop_layer(key))
    }

    pub fn pop_by_id(&mut self, id: &str) -> Result<PoppedClock, ClockError> {
        let key = self.key(id).ok_or_else(|| ClockError::UnknownLayer(id.to_string()))?;
        Ok(self.pop_layer(key))
    }

    pub fn pop_root(&mut self) -> Result<PoppedClock, ClockError> {
        let root = self.root.ok_or(ClockError::EmptyTree)?;
        Ok(self.pop_layer(root))
    }

    /// Pop the root `cycles` times and join the results.
    ///
    /// Content is concatenated; control timelines are merged by layer id,
    /// with inactive spans wherever a layer did not take part in a cycle.
    pub fn pop_cycles(&mut self, cycles: usize) -> Result<PoppedClock, ClockError> {
        let root = self.root.ok_or(ClockError::EmptyTree)?;
        let mut content = SequentialEvent::default();
        let mut timelines: Vec<SequentialEvent> = Vec::new();
        for _ in 0..cycles {
            let popped = self.pop_layer(root);
            let start = content.duration();
            content.events.extend(popped.content.events);
            absorb_control(&mut timelines, popped.control, &start);
            backfill(&mut timelines, &content.duration(), 0);
        }
        Ok(PoppedClock {
            content,
            control: finish_control(timelines),
        })
    }

    fn pop_layer(&mut self, key: LayerKey) -> PoppedClock {
        let id = self.nodes[key.0].id.clone();
        let children = self.nodes[key.0].children.clone();
        let event_count = self.nodes[key.0].layer.draw_event_count();

        let mut content = SequentialEvent::default();
        let mut timelines = vec![SequentialEvent::tagged(id.as_str(), Vec::new())];
        let mut offset = Duration::zero();

        for iteration in 0..event_count {
            let (event, child) = {
                let layer = &mut self.nodes[key.0].layer;
                layer.fetch_child.refresh(&children);
                (layer.fetch_event.pick(), layer.fetch_child.pick())
            };

            if let Some(event) = event {
                content.push(event);
            }

            if let Some(child) = child {
                if child.0 < self.nodes.len() {
                    let child_start = content.duration();
                    let popped = self.pop_layer(child);
                    content.events.extend(popped.content.events);
                    // Timelines the child already has from earlier iterations
                    // get an inactive span up to `child_start` before the new
                    // activity, or that activity would land too early.
                    absorb_control(&mut timelines, popped.control, &child_start);
                } else {
                    warn!(layer = %id, child = %child, "child sampler returned a key outside the tree");
                }
            }

            let total = content.duration();
            backfill(&mut timelines, &total, 1);
            let contribution = &total - &offset;
            if contribution.is_positive() {
                timelines[0].push(SimpleEvent::span(true, contribution));
            }
            trace!(layer = %id, iteration, %total, "clock layer iteration");
            offset = total;
        }

        debug!(layer = %id, event_count, duration = %offset, "popped clock layer");
        PoppedClock {
            content,
            control: finish_control(timelines),
        }
    }
}

fn inactive(duration: Duration) -> SimpleEvent {
    SimpleEvent::span(false, duration)
}

/// Merge a child's control fragment into `timelines`, with the fragment
/// starting at `start`.
///
/// A timeline seen for the first time is front-padded with an inactive span
/// up to `start`. A timeline that already exists is padded the same way
/// before being extended, so its activity stays where it happened.
fn absorb_control(timelines: &mut Vec<SequentialEvent>, fragment: SimultaneousEvent, start: &Duration) {
    for part in fragment.events {
        let Event::Sequential(part) = part else {
            continue;
        };
        let position = timelines.iter().position(|t| t.tag == part.tag);
        let timeline = match position {
            Some(i) => &mut timelines[i],
            None => {
                timelines.push(SequentialEvent {
                    tag: part.tag.clone(),
                    events: Vec::new(),
                });
                let last = timelines.len() - 1;
                &mut timelines[last]
            }
        };
        timeline.extend_until_with(start, inactive);
        timeline.events.extend(part.events);
    }
}

/// Pad every timeline from index `skip` on to `total` with inactive spans.
fn backfill(timelines: &mut [SequentialEvent], total: &Duration, skip: usize) {
    for timeline in timelines.iter_mut().skip(skip) {
        timeline.extend_until_with(total, inactive);
    }
}

/// Tie runs of inactive spans and wrap the timelines as a control stream.
fn finish_control(timelines: Vec<SequentialEvent>) -> SimultaneousEvent {
    let both_inactive = |a: &SimpleEvent, b: &SimpleEvent| a.is_active() == Some(false) && b.is_active() == Some(false);
    let events = timelines
        .into_iter()
        .map(|mut timeline| {
            timeline.tie_by(&both_inactive);
            Event::Sequential(timeline)
        })
        .collect();
    SimultaneousEvent::new(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{PickSampleByChoice, PickSampleByCycle};
    use pretty_assertions::assert_eq;

    fn d(n: i64) -> Duration {
        Duration::from_integer(n)
    }

    fn rests(beats: i64) -> PickSampleByCycle<Event> {
        PickSampleByCycle::new(vec![SimpleEvent::rest(d(beats)).into()])
    }

    fn no_children() -> PickSampleByCycle<LayerKey> {
        PickSampleByCycle::default()
    }

    fn spans(tag: &str, parts: &[(i64, bool)]) -> Event {
        SequentialEvent::tagged(tag, parts.iter().map(|&(b, a)| SimpleEvent::span(a, d(b)).into()).collect()).into()
    }

    fn two_level_tree() -> ClockTree {
        let mut tree = ClockTree::new();
        tree.create_layer(LayerSpec::new("root", None, rests(10), no_children())).unwrap();
        tree.create_layer(LayerSpec::new("leaf", Some("root"), rests(1), no_children())).unwrap();
        tree
    }

    #[test]
    fn create_layer_wires_parent_and_children() {
        let tree = two_level_tree();
        let root = tree.key("root").unwrap();
        let leaf = tree.key("leaf").unwrap();
        assert_eq!(tree.root(), Some(root));
        assert_eq!(tree.children(root), &[leaf]);
        assert_eq!(tree.parent(leaf), Some(root));
        assert_eq!(tree.id(leaf), Some("leaf"));
        assert_eq!(tree.layer(leaf).unwrap().event_count_range(), 1..2);
    }

    #[test]
    fn create_layer_rejects_unknown_parent() {
        let mut tree = ClockTree::new();
        let err = tree.create_layer(LayerSpec::new("orphan", Some("nowhere"), rests(1), no_children())).unwrap_err();
        assert_eq!(
            err,
            ClockError::UnknownParent {
                layer: "orphan".into(),
                parent: "nowhere".into()
            }
        );
        assert!(tree.is_empty());
    }

    #[test]
    fn create_layer_rejects_duplicates_and_second_root() {
        let mut tree = two_level_tree();
        assert_eq!(
            tree.create_layer(LayerSpec::new("leaf", Some("root"), rests(1), no_children())).unwrap_err(),
            ClockError::DuplicateLayer("leaf".into())
        );
        assert!(matches!(
            tree.create_layer(LayerSpec::new("other", None, rests(1), no_children())),
            Err(ClockError::SecondRoot { .. })
        ));
    }

    #[test]
    fn leaf_pop_is_fully_active() {
        let mut tree = ClockTree::new();
        let key = tree
            .create_layer(
                LayerSpec::new("leaf", None, rests(2), no_children()).with_event_count(3..4, PickFirst::default()),
            )
            .unwrap();
        let popped = tree.pop_event(key).unwrap();
        assert_eq!(popped.content.len(), 3);
        assert_eq!(popped.duration(), d(6));
        let own = popped.timeline("leaf").unwrap();
        assert_eq!(own.duration(), d(6));
        assert!(own.simple_events().all(|s| s.is_active() == Some(true)));
        assert_eq!(popped.control.len(), 1);
    }

    #[test]
    fn two_level_pop_pads_child_timeline() {
        let mut tree = two_level_tree();
        let leaf = tree.key("leaf").unwrap();

        let popped = tree.pop_event(leaf).unwrap();
        assert_eq!(popped.control, SimultaneousEvent::new(vec![spans("leaf", &[(1, true)])]));

        let popped = tree.pop_root().unwrap();
        assert_eq!(
            popped.content,
            SequentialEvent::new(vec![SimpleEvent::rest(d(10)).into(), SimpleEvent::rest(d(1)).into()])
        );
        assert_eq!(
            popped.control,
            SimultaneousEvent::new(vec![spans("root", &[(11, true)]), spans("leaf", &[(10, false), (1, true)])])
        );
    }

    #[test]
    fn repeated_child_keeps_its_activity_in_place() {
        let mut tree = ClockTree::new();
        tree.create_layer(
            LayerSpec::new("root", None, rests(10), no_children()).with_event_count(2..3, PickFirst::default()),
        )
        .unwrap();
        tree.create_layer(LayerSpec::new("leaf", Some("root"), rests(1), no_children())).unwrap();

        let popped = tree.pop_root().unwrap();
        assert_eq!(popped.duration(), d(22));
        assert_eq!(
            popped.control,
            SimultaneousEvent::new(vec![
                spans("root", &[(11, true), (11, true)]),
                spans("leaf", &[(10, false), (1, true), (10, false), (1, true)]),
            ])
        );
    }

    #[test]
    fn children_added_after_creation_are_picked_up() {
        let mut tree = ClockTree::new();
        tree.create_layer(LayerSpec::new("root", None, rests(4), no_children())).unwrap();
        assert_eq!(tree.pop_root().unwrap().duration(), d(4));

        tree.create_layer(LayerSpec::new("late", Some("root"), rests(1), no_children())).unwrap();
        let popped = tree.pop_root().unwrap();
        assert_eq!(popped.duration(), d(5));
        assert!(popped.timeline("late").is_some());
    }

    #[test]
    fn unvisited_siblings_are_backfilled_and_grandchildren_surface() {
        let mut tree = ClockTree::new();
        tree.create_layer(
            LayerSpec::new("root", None, rests(4), no_children()).with_event_count(2..3, PickFirst::default()),
        )
        .unwrap();
        tree.create_layer(LayerSpec::new("a", Some("root"), rests(2), no_children())).unwrap();
        tree.create_layer(LayerSpec::new("b", Some("root"), rests(1), no_children())).unwrap();
        tree.create_layer(LayerSpec::new("a1", Some("a"), rests(1), no_children())).unwrap();

        // Iteration 1: 4 + a(2 + a1(1)); iteration 2: 4 + b(1).
        let popped = tree.pop_root().unwrap();
        assert_eq!(popped.duration(), d(12));
        for timeline in &popped.control.events {
            assert_eq!(timeline.duration(), d(12), "timeline {:?} out of sync", timeline.tag());
        }
        assert_eq!(
            popped.control.get_tagged("a").unwrap(),
            &spans("a", &[(4, false), (3, true), (5, false)])
        );
        assert_eq!(
            popped.control.get_tagged("a1").unwrap(),
            &spans("a1", &[(6, false), (1, true), (5, false)])
        );
        assert_eq!(popped.control.get_tagged("b").unwrap(), &spans("b", &[(11, false), (1, true)]));
    }

    #[test]
    fn layer_without_material_yields_nothing() {
        let mut tree = ClockTree::new();
        tree.create_layer(LayerSpec::new("silent", None, PickSampleByCycle::default(), no_children()))
            .unwrap();
        let popped = tree.pop_root().unwrap();
        assert!(popped.content.is_empty());
        assert_eq!(popped.control, SimultaneousEvent::new(vec![spans("silent", &[])]));
    }

    #[test]
    fn empty_count_range_runs_no_iterations() {
        let mut tree = ClockTree::new();
        tree.create_layer(
            LayerSpec::new("root", None, rests(1), no_children()).with_event_count(3..3, PickFirst::default()),
        )
        .unwrap();
        assert_eq!(tree.pop_root().unwrap().duration(), Duration::zero());
    }

    #[test]
    fn prime_tuplets_stay_exact_across_a_pop() {
        const PRIMES: [i64; 16] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53];
        let tuplets = PickSampleByCycle::new(PRIMES.iter().map(|&p| SimpleEvent::rest(Duration::new(1, p)).into()).collect());
        let mut tree = ClockTree::new();
        tree.create_layer(
            LayerSpec::new("root", None, tuplets, no_children()).with_event_count(16..17, PickFirst::default()),
        )
        .unwrap();
        tree.create_layer(LayerSpec::new("leaf", Some("root"), rests(1), no_children())).unwrap();

        let popped = tree.pop_root().unwrap();
        let tuplet_sum: Duration = PRIMES.iter().map(|&p| Duration::new(1, p)).sum();
        assert_eq!(popped.duration(), tuplet_sum + d(16));
        assert_eq!(popped.control.len(), 2);
        for timeline in &popped.control.events {
            assert_eq!(timeline.duration(), popped.duration(), "timeline {:?} out of sync", timeline.tag());
        }
    }

    #[test]
    fn pop_errors() {
        let mut tree = ClockTree::new();
        assert_eq!(tree.pop_root().unwrap_err(), ClockError::EmptyTree);
        assert_eq!(tree.pop_by_id("x").unwrap_err(), ClockError::UnknownLayer("x".into()));
        assert!(tree.pop_event(LayerKey(3)).is_err());
    }

    #[test]
    fn pop_cycles_joins_control_by_layer() {
        let mut tree = ClockTree::new();
        tree.create_layer(LayerSpec::new("root", None, rests(2), no_children())).unwrap();
        tree.create_layer(LayerSpec::new("a", Some("root"), rests(1), no_children())).unwrap();
        tree.create_layer(LayerSpec::new("b", Some("root"), rests(1), no_children())).unwrap();

        let popped = tree.pop_cycles(2).unwrap();
        assert_eq!(popped.duration(), d(6));
        assert_eq!(
            popped.control,
            SimultaneousEvent::new(vec![
                spans("root", &[(3, true), (3, true)]),
                spans("a", &[(2, false), (1, true), (3, false)]),
                spans("b", &[(5, false), (1, true)]),
            ])
        );
    }

    #[test]
    fn random_child_choice_is_reproducible() {
        let build = || {
            let mut tree = ClockTree::new();
            tree.create_layer(
                LayerSpec::new("root", None, rests(1), PickSampleByChoice::new(Vec::new(), 5))
                    .with_event_count(8..9, PickFirst::default()),
            )
            .unwrap();
            for (id, beats) in [("x", 1), ("y", 2), ("z", 3)] {
                tree.create_layer(LayerSpec::new(id, Some("root"), rests(beats), no_children())).unwrap();
            }
            tree
        };
        let mut a = build();
        let mut b = build();
        assert_eq!(a.pop_root().unwrap(), b.pop_root().unwrap());
    }
}
