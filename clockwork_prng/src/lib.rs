// Deterministic, portable pseudo-random number generator.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding.
// Every stochastic decision in clockwork goes through a `ClockRng`: the
// weighted-random samplers, the derivation-tree node selection, and the
// per-picker seeds a composition config derives from its one seed. Each
// sampler and each derivation tree owns its own instance, so two trees never
// share generator state.
//
// On top of the raw stream this crate offers the two draws the composition
// engine needs: a uniform index into a candidate list and a weighted index
// where the weights are unnormalized relative likelihoods.
//
// **Critical constraint: determinism.** Re-running a composition with the
// same seed and the same structural input must produce the same music. The
// integer core must stay free of platform-dependent behavior; floating point
// is only used to turn a finished `u64` draw into a unit-interval value.

use serde::{Deserialize, Serialize};

/// Seed used when a caller does not supply one.
pub const DEFAULT_SEED: u64 = 100;

/// Xoshiro256++ PRNG owned by a sampler or a derivation tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockRng {
    s: [u64; 4],
}

impl Default for ClockRng {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl ClockRng {
    /// Create a new PRNG seeded from a `u64`.
    ///
    /// SplitMix64 expands the seed into the 256-bit state, so nearby seeds
    /// still give unrelated streams.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform `f64` in [0, 1), built from the upper 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform integer in `[low, high)`, rejection-sampled to avoid modulo
    /// bias. Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Uniform `usize` in `[low, high)`. Panics if `low >= high`.
    pub fn range_usize(&mut self, low: usize, high: usize) -> usize {
        self.range_u64(low as u64, high as u64) as usize
    }

    /// Pick a uniformly random index into a collection of `len` items.
    ///
    /// Returns `None` for an empty collection instead of panicking, which is
    /// how samplers report exhaustion.
    pub fn choose_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.range_usize(0, len))
    }

    /// Pick an index with probability proportional to its weight.
    ///
    /// Weights are relative likelihoods; they are scaled to sum to 1 before
    /// the draw. Negative and non-finite weights count as zero. If every
    /// weight is zero the draw falls back to a uniform choice, and an empty
    /// slice yields `None`.
    pub fn choose_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        if weights.is_empty() {
            return None;
        }
        let clean = |w: f64| if w.is_finite() && w > 0.0 { w } else { 0.0 };
        let total: f64 = weights.iter().copied().map(clean).sum();
        if total <= 0.0 {
            return self.choose_index(weights.len());
        }

        let target = self.next_f64();
        let mut cumulative = 0.0;
        let mut last_positive = 0;
        for (i, &w) in weights.iter().enumerate() {
            let p = clean(w) / total;
            if p <= 0.0 {
                continue;
            }
            last_positive = i;
            cumulative += p;
            if target < cumulative {
                return Some(i);
            }
        }
        // Rounding can leave the cumulative sum a hair below 1.0.
        Some(last_positive)
    }
}

/// SplitMix64, used only to expand a `u64` seed into xoshiro state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
