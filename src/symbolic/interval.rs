use std::{
    fmt::{Display, Formatter},
    ops::Add,
};

/// A closed integer interval `[lo, hi]`. Empty when `lo > hi`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    pub lo: i64,
    pub hi: i64,
}

impl Interval {
    pub const fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    pub const fn point(value: i64) -> Self {
        Self {
            lo: value,
            hi: value,
        }
    }

    /// The range of a dimension with `size` elements, `[0, size - 1]`.
    pub const fn extent(size: i64) -> Self {
        Self { lo: 0, hi: size - 1 }
    }

    pub fn is_point(&self) -> bool {
        self.lo == self.hi
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }

    pub fn contains(&self, value: i64) -> bool {
        self.lo <= value && value <= self.hi
    }

    pub fn contains_interval(&self, other: Interval) -> bool {
        other.is_empty() || (self.lo <= other.lo && other.hi <= self.hi)
    }

    pub fn intersect(self, other: Interval) -> Interval {
        Interval::new(self.lo.max(other.lo), self.hi.min(other.hi))
    }

    pub fn is_disjoint(&self, other: Interval) -> bool {
        self.intersect(other).is_empty()
    }

    /// Number of integers in the interval.
    pub fn size(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.hi - self.lo + 1
        }
    }

    pub(crate) fn scale(self, factor: i64) -> Interval {
        let (a, b) = (
            self.lo.saturating_mul(factor),
            self.hi.saturating_mul(factor),
        );
        Interval::new(a.min(b), a.max(b))
    }

    pub(crate) fn floor_div(self, divisor: i64) -> Interval {
        Interval::new(self.lo.div_euclid(divisor), self.hi.div_euclid(divisor))
    }

    /// Range of `x mod divisor` for `x` in this interval.
    pub(crate) fn modulo(self, divisor: i64) -> Interval {
        if self.lo.div_euclid(divisor) == self.hi.div_euclid(divisor) {
            Interval::new(self.lo.rem_euclid(divisor), self.hi.rem_euclid(divisor))
        } else {
            Interval::new(0, divisor - 1)
        }
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, rhs: Interval) -> Interval {
        Interval::new(self.lo.saturating_add(rhs.lo), self.hi.saturating_add(rhs.hi))
    }
}

impl Display for Interval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}
