// Exact musical time.
//
// All durations in clockwork are arbitrary-precision rationals
// (`num_rational::BigRational`), never floats and never fixed-width
// fractions: a clock tree concatenates layer output recursively, and float
// drift would desynchronize the content stream from its control timelines,
// while mixing many tuplet divisions quickly outgrows any fixed-width
// denominator. The `Duration` newtype keeps the arithmetic surface small and
// gives durations a string form ("3/2", "4") for JSON configs and dumps.
//
// Durations are not `Copy`. Arithmetic is implemented for owned values and
// references, so hot paths can add `&a + &b` without cloning.
//
// `DurationRange` is the closed [min, max] interval of durations a grammar
// terminal (or a whole derivation) can render to.

use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};
use std::str::FromStr;

/// A duration in beats, stored as an exact fraction.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Duration(BigRational);

impl Duration {
    pub fn zero() -> Self {
        Self(BigRational::zero())
    }

    /// `numer / denom` beats. Panics if `denom` is zero.
    pub fn new(numer: i64, denom: i64) -> Self {
        Self(BigRational::new(numer.into(), denom.into()))
    }

    pub fn from_integer(beats: i64) -> Self {
        Self(BigRational::from_integer(beats.into()))
    }

    pub fn ratio(&self) -> &BigRational {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_positive()
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// This duration multiplied by an exact factor.
    pub fn scaled(&self, factor: &BigRational) -> Self {
        Self(&self.0 * factor)
    }

    /// Rounded conversion to an integer tick count with `per_beat` ticks
    /// per beat, saturating at the `i64` bounds. Used by exporters that need
    /// a fixed grid.
    pub fn to_ticks(&self, per_beat: u32) -> i64 {
        let ticks = (&self.0 * BigRational::from_integer(per_beat.into())).round().to_integer();
        match i64::try_from(&ticks) {
            Ok(t) => t,
            Err(_) if ticks.is_negative() => i64::MIN,
            Err(_) => i64::MAX,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match (self.0.numer().to_f64(), self.0.denom().to_f64()) {
            (Some(n), Some(d)) => n / d,
            _ => f64::NAN,
        }
    }
}

impl Default for Duration {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<i64> for Duration {
    fn from(beats: i64) -> Self {
        Self::from_integer(beats)
    }
}

impl From<BigRational> for Duration {
    fn from(r: BigRational) -> Self {
        Self(r)
    }
}

// Binary operators for every owned/borrowed operand combination.
macro_rules! duration_binop {
    ($trait:ident, $method:ident) => {
        impl $trait<Duration> for Duration {
            type Output = Duration;
            fn $method(self, rhs: Duration) -> Duration {
                Duration(self.0.$method(rhs.0))
            }
        }

        impl $trait<&Duration> for Duration {
            type Output = Duration;
            fn $method(self, rhs: &Duration) -> Duration {
                Duration(self.0.$method(&rhs.0))
            }
        }

        impl $trait<Duration> for &Duration {
            type Output = Duration;
            fn $method(self, rhs: Duration) -> Duration {
                Duration((&self.0).$method(rhs.0))
            }
        }

        impl $trait<&Duration> for &Duration {
            type Output = Duration;
            fn $method(self, rhs: &Duration) -> Duration {
                Duration((&self.0).$method(&rhs.0))
            }
        }
    };
}

duration_binop!(Add, add);
duration_binop!(Sub, sub);

impl AddAssign<Duration> for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl AddAssign<&Duration> for Duration {
    fn add_assign(&mut self, rhs: &Duration) {
        self.0 += &rhs.0;
    }
}

impl SubAssign<Duration> for Duration {
    fn sub_assign(&mut self, rhs: Duration) {
        self.0 -= rhs.0;
    }
}

impl SubAssign<&Duration> for Duration {
    fn sub_assign(&mut self, rhs: &Duration) {
        self.0 -= &rhs.0;
    }
}

impl Neg for Duration {
    type Output = Duration;
    fn neg(self) -> Duration {
        Duration(-self.0)
    }
}

impl Mul<i64> for &Duration {
    type Output = Duration;
    fn mul(self, rhs: i64) -> Duration {
        Duration(&self.0 * BigRational::from_integer(rhs.into()))
    }
}

impl Mul<i64> for Duration {
    type Output = Duration;
    fn mul(self, rhs: i64) -> Duration {
        &self * rhs
    }
}

/// Ratio of two durations.
impl Div<&Duration> for &Duration {
    type Output = BigRational;
    fn div(self, rhs: &Duration) -> BigRational {
        &self.0 / &rhs.0
    }
}

impl Sum for Duration {
    fn sum<I: Iterator<Item = Duration>>(iter: I) -> Self {
        iter.fold(Duration::zero(), |acc, d| acc + d)
    }
}

impl<'a> Sum<&'a Duration> for Duration {
    fn sum<I: Iterator<Item = &'a Duration>>(iter: I) -> Self {
        iter.fold(Duration::zero(), |acc, d| acc + d)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({})", self.0)
    }
}

/// Error returned when a duration string is not `n` or `n/d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDurationError(pub String);

impl fmt::Display for ParseDurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid duration '{}'", self.0)
    }
}

impl std::error::Error for ParseDurationError {}

impl FromStr for Duration {
    type Err = ParseDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseDurationError(s.to_string());
        let trimmed = s.trim();
        match trimmed.split_once('/') {
            Some((n, d)) => {
                let n: i64 = n.trim().parse().map_err(|_| err())?;
                let d: i64 = d.trim().parse().map_err(|_| err())?;
                if d == 0 {
                    return Err(err());
                }
                Ok(Duration::new(n, d))
            }
            None => trimmed.parse::<i64>().map(Duration::from_integer).map_err(|_| err()),
        }
    }
}

// Durations travel as strings so JSON configs can write "1/3" exactly.
impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Closed interval `[start, end]` of possible durations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DurationRange {
    pub start: Duration,
    pub end: Duration,
}

impl DurationRange {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn new(start: Duration, end: Duration) -> Self {
        Self { start, end }
    }

    /// A range containing exactly one duration.
    pub fn point(d: Duration) -> Self {
        Self { start: d.clone(), end: d }
    }

    pub fn contains(&self, d: &Duration) -> bool {
        &self.start <= d && d <= &self.end
    }
}

impl Add for DurationRange {
    type Output = DurationRange;
    fn add(self, rhs: Self) -> Self {
        Self {
            start: self.start + rhs.start,
            end: self.end + rhs.end,
        }
    }
}

impl Sum for DurationRange {
    fn sum<I: Iterator<Item = DurationRange>>(iter: I) -> Self {
        iter.fold(DurationRange::zero(), |acc, r| acc + r)
    }
}

impl fmt::Display for DurationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
