// region.rs — Ranges, boxes and interval arithmetic
//
// `Range` / `Region` describe concrete iteration domains as `(min, extent)`
// per dimension. `Interval` is the inclusive, possibly unbounded value range
// used by the bounds oracle in `expr`.
//
// Preconditions: none.
// Postconditions: interval operations over-approximate the exact value set.
// Failure modes: arithmetic overflow widens the affected bound to unbounded.
// Side effects: none.

use std::fmt;

// ── Range / Region ──────────────────────────────────────────────────────────

/// A half-open integer range `[min, min + extent)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: i64,
    pub extent: i64,
}

impl Range {
    pub fn new(min: i64, extent: i64) -> Self {
        Range { min, extent }
    }

    /// Last index covered by the range (inclusive).
    pub fn max(&self) -> i64 {
        self.min + self.extent - 1
    }

    /// Smallest range containing both.
    pub fn union(&self, other: &Range) -> Range {
        let min = self.min.min(other.min);
        let max = self.max().max(other.max());
        Range::new(min, max - min + 1)
    }

    pub fn contains(&self, other: &Range) -> bool {
        other.min >= self.min && other.max() <= self.max()
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.extent)
    }
}

/// A box: one range per dimension, innermost dimension first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Region(pub Vec<Range>);

impl Region {
    pub fn new(ranges: Vec<Range>) -> Self {
        Region(ranges)
    }

    pub fn dims(&self) -> usize {
        self.0.len()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.0
    }

    /// Number of points in the box. Non-positive extents count as empty.
    pub fn points(&self) -> u64 {
        self.0
            .iter()
            .map(|r| r.extent.max(0) as u64)
            .fold(1u64, |acc, e| acc.saturating_mul(e))
    }

    /// Bounding box of both regions. Dimension counts must match.
    pub fn union(&self, other: &Region) -> Region {
        debug_assert_eq!(self.dims(), other.dims());
        Region(
            self.0
                .iter()
                .zip(&other.0)
                .map(|(a, b)| a.union(b))
                .collect(),
        )
    }

    pub fn contains(&self, other: &Region) -> bool {
        self.dims() == other.dims() && self.0.iter().zip(&other.0).all(|(a, b)| a.contains(b))
    }

    /// Same mins, with every extent replaced by `extents[d]`.
    pub fn with_extents(&self, extents: &[i64]) -> Region {
        Region(
            self.0
                .iter()
                .zip(extents)
                .map(|(r, &e)| Range::new(r.min, e))
                .collect(),
        )
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " x ")?;
            }
            write!(f, "{r}")?;
        }
        Ok(())
    }
}

// ── Interval ────────────────────────────────────────────────────────────────

/// Inclusive value interval. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interval {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl Interval {
    pub fn new(min: i64, max: i64) -> Self {
        Interval {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn point(v: i64) -> Self {
        Interval::new(v, v)
    }

    pub fn everything() -> Self {
        Interval {
            min: None,
            max: None,
        }
    }

    pub fn from_range(r: Range) -> Self {
        Interval::new(r.min, r.max())
    }

    pub fn is_bounded(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    pub fn as_point(&self) -> Option<i64> {
        match (self.min, self.max) {
            (Some(a), Some(b)) if a == b => Some(a),
            _ => None,
        }
    }

    /// Convert a bounded interval into a `(min, extent)` range.
    pub fn to_range(&self) -> Option<Range> {
        let (min, max) = (self.min?, self.max?);
        let extent = max.checked_sub(min)?.checked_add(1)?;
        Some(Range::new(min, extent.max(1)))
    }

    pub fn union(&self, other: &Interval) -> Interval {
        Interval {
            min: both(self.min, other.min, i64::min),
            max: both(self.max, other.max, i64::max),
        }
    }

    pub fn neg(&self) -> Interval {
        Interval {
            min: self.max.and_then(i64::checked_neg),
            max: self.min.and_then(i64::checked_neg),
        }
    }

    pub fn add(&self, other: &Interval) -> Interval {
        Interval {
            min: checked(self.min, other.min, i64::checked_add),
            max: checked(self.max, other.max, i64::checked_add),
        }
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        if let Some(c) = other.as_point() {
            return self.scale(c);
        }
        if let Some(c) = self.as_point() {
            return other.scale(c);
        }
        self.corners(other, i64::checked_mul)
    }

    fn scale(&self, c: i64) -> Interval {
        match c.cmp(&0) {
            std::cmp::Ordering::Equal => Interval::point(0),
            std::cmp::Ordering::Greater => Interval {
                min: self.min.and_then(|v| v.checked_mul(c)),
                max: self.max.and_then(|v| v.checked_mul(c)),
            },
            std::cmp::Ordering::Less => Interval {
                min: self.max.and_then(|v| v.checked_mul(c)),
                max: self.min.and_then(|v| v.checked_mul(c)),
            },
        }
    }

    /// Floor division. Divisors that may be zero give an unbounded result.
    pub fn div(&self, other: &Interval) -> Interval {
        match (other.min, other.max) {
            (Some(lo), Some(_)) if lo > 0 => self.corners(other, floor_div),
            (Some(_), Some(hi)) if hi < 0 => self.corners(other, floor_div),
            _ => Interval::everything(),
        }
    }

    /// Real division of enclosures of real values, rounded outward.
    pub fn div_real(&self, other: &Interval) -> Interval {
        match (other.min, other.max) {
            (Some(lo), Some(hi)) if lo > 0 || hi < 0 => {
                let lower = self.corners(other, floor_div);
                let upper = self.corners(other, ceil_div);
                Interval {
                    min: lower.min,
                    max: upper.max,
                }
            }
            _ => Interval::everything(),
        }
    }

    /// Euclidean modulo: a positive divisor `d` bounds the result by `[0, d - 1]`.
    pub fn modulo(&self, other: &Interval) -> Interval {
        match (other.min, other.max) {
            (Some(lo), Some(hi)) if lo > 0 => {
                if let (Some(a), Some(b)) = (self.min, self.max) {
                    if a >= 0 && b < lo {
                        return *self;
                    }
                }
                Interval::new(0, hi - 1)
            }
            _ => Interval::everything(),
        }
    }

    /// Real modulo: a positive divisor below `d` bounds the result by `[0, d]`.
    pub fn modulo_real(&self, other: &Interval) -> Interval {
        match (other.min, other.max) {
            (Some(lo), Some(hi)) if lo > 0 => {
                if let (Some(a), Some(b)) = (self.min, self.max) {
                    if a >= 0 && b < lo {
                        return *self;
                    }
                }
                Interval::new(0, hi)
            }
            _ => Interval::everything(),
        }
    }

    pub fn min_with(&self, other: &Interval) -> Interval {
        Interval {
            min: both(self.min, other.min, i64::min),
            max: either(self.max, other.max, i64::min),
        }
    }

    pub fn max_with(&self, other: &Interval) -> Interval {
        Interval {
            min: either(self.min, other.min, i64::max),
            max: both(self.max, other.max, i64::max),
        }
    }

    pub fn abs(&self) -> Interval {
        match (self.min, self.max) {
            (Some(a), _) if a >= 0 => *self,
            (_, Some(b)) if b <= 0 => self.neg(),
            (Some(a), Some(b)) => Interval {
                min: Some(0),
                max: a.checked_neg().map(|na| na.max(b)),
            },
            _ => Interval {
                min: Some(0),
                max: None,
            },
        }
    }

    /// Apply `f` to all four corner pairs; any unbounded side or overflow
    /// makes the result unbounded.
    fn corners(&self, other: &Interval, f: fn(i64, i64) -> Option<i64>) -> Interval {
        let (Some(a), Some(b), Some(c), Some(d)) = (self.min, self.max, other.min, other.max)
        else {
            return Interval::everything();
        };
        let vals = [f(a, c), f(a, d), f(b, c), f(b, d)];
        if vals.iter().any(Option::is_none) {
            return Interval::everything();
        }
        let vals: Vec<i64> = vals.iter().flatten().copied().collect();
        Interval {
            min: vals.iter().copied().min(),
            max: vals.iter().copied().max(),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.min {
            Some(v) => write!(f, "[{v}, ")?,
            None => write!(f, "(-inf, ")?,
        }
        match self.max {
            Some(v) => write!(f, "{v}]"),
            None => write!(f, "+inf)"),
        }
    }
}

/// Combine two bounds that are both required (unbounded if either is).
fn both(a: Option<i64>, b: Option<i64>, f: fn(i64, i64) -> i64) -> Option<i64> {
    Some(f(a?, b?))
}

/// Combine two bounds where one known side suffices.
fn either(a: Option<i64>, b: Option<i64>, f: fn(i64, i64) -> i64) -> Option<i64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(f(x, y)),
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

fn checked(a: Option<i64>, b: Option<i64>, f: fn(i64, i64) -> Option<i64>) -> Option<i64> {
    f(a?, b?)
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let q = a.checked_div(b)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

fn ceil_div(a: i64, b: i64) -> Option<i64> {
    floor_div(a.checked_neg()?, b)?.checked_neg()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_union_and_max() {
        let a = Range::new(0, 10);
        let b = Range::new(-2, 4);
        assert_eq!(a.max(), 9);
        assert_eq!(a.union(&b), Range::new(-2, 12));
        assert!(a.union(&b).contains(&a));
    }

    #[test]
    fn region_points_saturate() {
        let r = Region::new(vec![Range::new(0, 4096), Range::new(0, 4096)]);
        assert_eq!(r.points(), 4096 * 4096);
        let huge = Region::new(vec![Range::new(0, i64::MAX); 3]);
        assert_eq!(huge.points(), u64::MAX);
    }

    #[test]
    fn region_display() {
        let r = Region::new(vec![Range::new(0, 16), Range::new(-1, 3)]);
        assert_eq!(r.to_string(), "[0, 16] x [-1, 3]");
    }

    #[test]
    fn interval_add_shifts() {
        let x = Interval::new(0, 99);
        assert_eq!(x.add(&Interval::point(2)), Interval::new(2, 101));
        assert_eq!(x.sub(&Interval::point(1)), Interval::new(-1, 98));
    }

    #[test]
    fn interval_mul_by_negative_swaps() {
        let x = Interval::new(1, 5);
        assert_eq!(x.mul(&Interval::point(-2)), Interval::new(-10, -2));
        assert_eq!(x.mul(&Interval::new(-1, 2)), Interval::new(-5, 10));
    }

    #[test]
    fn interval_floor_div() {
        let x = Interval::new(-3, 9);
        assert_eq!(x.div(&Interval::point(2)), Interval::new(-2, 4));
        assert_eq!(x.div(&Interval::new(-1, 1)), Interval::everything());
    }

    #[test]
    fn interval_real_div_rounds_outward() {
        let x = Interval::new(-3, 9);
        assert_eq!(x.div_real(&Interval::point(2)), Interval::new(-2, 5));
        assert_eq!(Interval::new(0, 9).div_real(&Interval::point(-2)), Interval::new(-5, 0));
        assert_eq!(x.div_real(&Interval::new(0, 2)), Interval::everything());
    }

    #[test]
    fn interval_real_modulo_keeps_fraction_below_divisor() {
        assert_eq!(
            Interval::new(0, 100).modulo_real(&Interval::point(8)),
            Interval::new(0, 8)
        );
        assert_eq!(
            Interval::new(2, 5).modulo_real(&Interval::point(8)),
            Interval::new(2, 5)
        );
    }

    #[test]
    fn interval_modulo_by_constant() {
        assert_eq!(
            Interval::everything().modulo(&Interval::point(8)),
            Interval::new(0, 7)
        );
        assert_eq!(
            Interval::new(1, 3).modulo(&Interval::point(8)),
            Interval::new(1, 3)
        );
    }

    #[test]
    fn interval_clamp_bounds_unbounded_value() {
        let clamped = Interval::everything()
            .max_with(&Interval::point(0))
            .min_with(&Interval::point(255));
        assert_eq!(clamped, Interval::new(0, 255));
    }

    #[test]
    fn interval_abs() {
        assert_eq!(Interval::new(-4, 3).abs(), Interval::new(0, 4));
        assert_eq!(Interval::new(-4, -1).abs(), Interval::new(1, 4));
    }

    #[test]
    fn interval_overflow_widens() {
        let big = Interval::new(i64::MAX - 1, i64::MAX);
        let sum = big.add(&Interval::point(5));
        assert_eq!(sum.max, None);
    }

    #[test]
    fn interval_to_range() {
        assert_eq!(Interval::new(-1, 4).to_range(), Some(Range::new(-1, 6)));
        assert_eq!(Interval::everything().to_range(), None);
    }
}
