// Candidate samplers used by clock layers.
//
// A sampler holds an ordered candidate list (duplicates allowed) and hands
// out one candidate per `pick()`. An empty list is not an error: `pick()`
// returns `None`, which callers read as "nothing to add here".
//
// Layers call `refresh()` on every pop with the candidates as they are *now*
// (a layer's children can grow after the layer was created). `refresh()`
// compares a content hash of the incoming list with the held one and only
// resets on a change, so a cycling sampler keeps its position across pops
// while the tree is stable.
//
// Implementations:
// - `PickSampleByCycle`: candidates in order, wrapping forever.
// - `PickSampleByChoice`: independent uniform draws from an owned `ClockRng`.
// - `PickFirst`: always the first candidate (the default iteration-count
//   policy of a layer).

use clockwork_prng::{ClockRng, DEFAULT_SEED};
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Content hash of a candidate list. Stable across runs (FxHasher has no
/// per-process random state).
pub fn content_hash<T: Hash>(items: &[T]) -> u64 {
    let mut hasher = FxHasher::default();
    items.hash(&mut hasher);
    hasher.finish()
}

/// Selection over a refreshable candidate list.
pub trait PickSample<T: Clone + Hash>: fmt::Debug {
    /// Next candidate, or `None` when there are no candidates.
    fn pick(&mut self) -> Option<T>;

    /// Replace the candidates and clear selection state.
    fn reset(&mut self, items: Vec<T>);

    /// Current candidates.
    fn items(&self) -> &[T];

    /// Hash of the current candidates, as computed at the last reset.
    fn items_hash(&self) -> u64;

    /// Reset only if `items` differs from the held candidates.
    fn refresh(&mut self, items: &[T]) {
        if content_hash(items) != self.items_hash() {
            self.reset(items.to_vec());
        }
    }
}

/// Cycles through the candidates in order.
#[derive(Clone, Debug)]
pub struct PickSampleByCycle<T> {
    items: Vec<T>,
    items_hash: u64,
    cursor: usize,
}

impl<T: Clone + Hash> PickSampleByCycle<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items_hash: content_hash(&items),
            items,
            cursor: 0,
        }
    }
}

impl<T: Clone + Hash> Default for PickSampleByCycle<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: Clone + Hash + fmt::Debug> PickSample<T> for PickSampleByCycle<T> {
    fn pick(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let item = self.items[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.items.len();
        Some(item)
    }

    fn reset(&mut self, items: Vec<T>) {
        self.items_hash = content_hash(&items);
        self.items = items;
        self.cursor = 0;
    }

    fn items(&self) -> &[T] {
        &self.items
    }

    fn items_hash(&self) -> u64 {
        self.items_hash
    }
}

/// Draws a uniformly random candidate on every call.
///
/// The generator is not reseeded on reset: draws continue the same stream
/// after the candidate list changes.
#[derive(Clone, Debug)]
pub struct PickSampleByChoice<T> {
    items: Vec<T>,
    items_hash: u64,
    rng: ClockRng,
}

impl<T: Clone + Hash> PickSampleByChoice<T> {
    pub fn new(items: Vec<T>, seed: u64) -> Self {
        Self {
            items_hash: content_hash(&items),
            items,
            rng: ClockRng::new(seed),
        }
    }

    pub fn with_default_seed(items: Vec<T>) -> Self {
        Self::new(items, DEFAULT_SEED)
    }
}

impl<T: Clone + Hash + fmt::Debug> PickSample<T> for PickSampleByChoice<T> {
    fn pick(&mut self) -> Option<T> {
        let i = self.rng.choose_index(self.items.len())?;
        Some(self.items[i].clone())
    }

    fn reset(&mut self, items: Vec<T>) {
        self.items_hash = content_hash(&items);
        self.items = items;
    }

    fn items(&self) -> &[T] {
        &self.items
    }

    fn items_hash(&self) -> u64 {
        self.items_hash
    }
}

/// Always returns the first candidate.
#[derive(Clone, Debug)]
pub struct PickFirst<T> {
    items: Vec<T>,
    items_hash: u64,
}

impl<T: Clone + Hash> PickFirst<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items_hash: content_hash(&items),
            items,
        }
    }
}

impl<T: Clone + Hash> Default for PickFirst<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T: Clone + Hash + fmt::Debug> PickSample<T> for PickFirst<T> {
    fn pick(&mut self) -> Option<T> {
        self.items.first().cloned()
    }

    fn reset(&mut self, items: Vec<T>) {
        self.items_hash = content_hash(&items);
        self.items = items;
    }

    fn items(&self) -> &[T] {
        &self.items
    }

    fn items_hash(&self) -> u64 {
        self.items_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn letters() -> Vec<char> {
        "abcdefg".chars().collect()
    }

    #[test]
    fn cycle_returns_items_in_order() {
        let mut s = PickSampleByCycle::new(letters());
        assert_eq!(s.pick(), Some('a'));
        assert_eq!(s.pick(), Some('b'));
        assert_eq!(s.pick(), Some('c'));
    }

    #[test]
    fn empty_samplers_are_exhausted_not_failing() {
        let mut cycle: PickSampleByCycle<char> = PickSampleByCycle::default();
        let mut choice: PickSampleByChoice<char> = PickSampleByChoice::with_default_seed(Vec::new());
        let mut first: PickFirst<char> = PickFirst::default();
        for _ in 0..3 {
            assert_eq!(cycle.pick(), None);
            assert_eq!(choice.pick(), None);
            assert_eq!(first.pick(), None);
        }
    }

    #[test]
    fn reset_switches_candidates() {
        let mut s = PickSampleByCycle::new(letters());
        s.pick();
        s.reset(vec!['x', 'y']);
        assert_eq!(s.pick(), Some('x'));
    }

    #[test]
    fn refresh_with_same_items_keeps_position() {
        let mut s = PickSampleByCycle::new(letters());
        assert_eq!(s.pick(), Some('a'));
        s.refresh(&letters());
        assert_eq!(s.pick(), Some('b'));
    }

    #[test]
    fn refresh_with_new_items_restarts() {
        let mut s = PickSampleByCycle::new(letters());
        s.pick();
        s.pick();
        s.refresh(&['1', '2', '3']);
        assert_eq!(s.pick(), Some('1'));
    }

    #[test]
    fn choice_picks_members_and_is_seeded() {
        let mut a = PickSampleByChoice::new(letters(), 7);
        let mut b = PickSampleByChoice::new(letters(), 7);
        for _ in 0..50 {
            let x = a.pick().unwrap();
            assert!(letters().contains(&x));
            assert_eq!(Some(x), b.pick());
        }
        a.refresh(&['q']);
        assert_eq!(a.pick(), Some('q'));
    }

    #[test]
    fn pick_first_ignores_call_count() {
        let mut s = PickFirst::new(vec![3usize, 4, 5]);
        assert_eq!(s.pick(), Some(3));
        assert_eq!(s.pick(), Some(3));
    }

    proptest! {
        #[test]
        fn cycle_repeats_candidates_exactly(items in prop::collection::vec(0u8..16, 1..12)) {
            let mut s = PickSampleByCycle::new(items.clone());
            for _ in 0..2 {
                let round: Vec<u8> = (0..items.len()).filter_map(|_| s.pick()).collect();
                prop_assert_eq!(&round, &items);
            }
        }

        #[test]
        fn refresh_unchanged_never_moves_cursor(
            items in prop::collection::vec(0u8..16, 1..12),
            advance in 0usize..24,
        ) {
            let mut s = PickSampleByCycle::new(items.clone());
            for _ in 0..advance {
                s.pick();
            }
            s.refresh(&items);
            prop_assert_eq!(s.pick(), Some(items[advance % items.len()]));
        }

        #[test]
        fn refresh_changed_restarts_at_first(
            items in prop::collection::vec(0u8..16, 1..12),
            other in prop::collection::vec(16u8..32, 1..12),
            advance in 0usize..24,
        ) {
            let mut s = PickSampleByCycle::new(items);
            for _ in 0..advance {
                s.pick();
            }
            s.refresh(&other);
            prop_assert_eq!(s.pick(), Some(other[0]));
        }
    }
}
