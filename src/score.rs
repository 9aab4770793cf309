//! Integer placement scores with saturating `+INFINITY` / `-INFINITY` arithmetic.
//!
//! Used throughout for resource priorities, colocation weights, and
//! per-node placement preferences.

use std::fmt;
use std::str::FromStr;

/// The magnitude used to represent "infinity".
pub const INFINITY_MAGNITUDE: i64 = 1_000_000;

/// A saturating integer score.
///
/// `Score` never holds a value outside `[-INFINITY_MAGNITUDE, INFINITY_MAGNITUDE]`.
/// Addition saturates; an operand at `+INFINITY`/`-INFINITY` dominates the
/// result, with negative infinity winning over positive when both operands
/// are infinite with opposite sign.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Score(i64);

impl Score {
    pub const ZERO: Score = Score(0);
    pub const INFINITY: Score = Score(INFINITY_MAGNITUDE);
    pub const NEG_INFINITY: Score = Score(-INFINITY_MAGNITUDE);

    pub fn new(value: i64) -> Score {
        Score(value.clamp(-INFINITY_MAGNITUDE, INFINITY_MAGNITUDE))
    }

    pub fn value(self) -> i64 {
        self.0
    }

    pub fn is_infinite(self) -> bool {
        self.0.abs() >= INFINITY_MAGNITUDE
    }

    pub fn is_positive_infinity(self) -> bool {
        self.0 >= INFINITY_MAGNITUDE
    }

    pub fn is_negative_infinity(self) -> bool {
        self.0 <= -INFINITY_MAGNITUDE
    }

    /// Whether this score should be treated as "mandatory" (the dependent
    /// constraint is not a preference but a requirement). "Score
    /// at or beyond +INFINITY/-INFINITY is mandatory."
    pub fn is_mandatory(self) -> bool {
        self.is_infinite()
    }

    /// Score 0 must never enter a constraint set (invariant); a
    /// colocation built with this score should simply be dropped.
    pub fn is_ignorable(self) -> bool {
        self.0 == 0
    }

    /// Saturating add. If either operand is infinite, the dominant sign
    /// wins: same-sign infinities stay infinite, and opposite-sign
    /// infinities resolve to `-INFINITY`.
    pub fn add(self, other: Score) -> Score {
        if self.is_infinite() || other.is_infinite() {
            return Self::combine_infinities(self, other);
        }
        Score::new(self.0.saturating_add(other.0))
    }

    fn combine_infinities(a: Score, b: Score) -> Score {
        let a_neg = a.is_negative_infinity();
        let b_neg = b.is_negative_infinity();
        let a_pos = a.is_positive_infinity();
        let b_pos = b.is_positive_infinity();
        if a_neg || b_neg {
            Score::NEG_INFINITY
        } else if a_pos || b_pos {
            Score::INFINITY
        } else {
            // unreachable in practice: at least one operand is infinite by
            // construction of the caller, but guard anyway.
            Score::new(a.0.saturating_add(b.0))
        }
    }

    /// Multiply by a floating point attenuation factor, used by the
    /// recursive colocated-node-scores traversal to attenuate
    /// scores by `score/INFINITY` at each hop.
    ///
    /// Rounds half away from zero. A nonzero score multiplied by a nonzero
    /// factor must never collapse to zero; the result is
    /// forced to `±1` in that case.
    pub fn scale(self, factor: f64) -> Score {
        if self.is_infinite() {
            return if factor < 0.0 { self.negate() } else { self };
        }
        if self.0 == 0 || factor == 0.0 {
            return Score::ZERO;
        }
        let scaled = self.0 as f64 * factor;
        let rounded = round_half_away_from_zero(scaled);
        let forced = if rounded == 0.0 {
            if scaled > 0.0 { 1.0 } else { -1.0 }
        } else {
            rounded
        };
        Score::new(forced as i64)
    }

    pub fn negate(self) -> Score {
        Score::new(-self.0)
    }

    pub fn min(self, other: Score) -> Score {
        std::cmp::min(self, other)
    }

    pub fn max(self, other: Score) -> Score {
        std::cmp::max(self, other)
    }
}

fn round_half_away_from_zero(x: f64) -> f64 {
    if x >= 0.0 { (x + 0.5).floor() } else { (x - 0.5).ceil() }
}

impl fmt::Debug for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_positive_infinity() {
            write!(f, "INFINITY")
        } else if self.is_negative_infinity() {
            write!(f, "-INFINITY")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Parses the string encodings accepted by the input data model:
/// `INFINITY`, `+INFINITY`, `-INFINITY`, or a plain signed integer.
impl FromStr for Score {
    type Err = ScoreParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed {
            "INFINITY" | "+INFINITY" => Ok(Score::INFINITY),
            "-INFINITY" => Ok(Score::NEG_INFINITY),
            _ => trimmed
                .parse::<i64>()
                .map(Score::new)
                .map_err(|_| ScoreParseError(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid score literal: {0}")]
pub struct ScoreParseError(String);

impl From<i64> for Score {
    fn from(value: i64) -> Self {
        Score::new(value)
    }
}

impl From<i32> for Score {
    fn from(value: i32) -> Self {
        Score::new(value as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturates_within_bounds() {
        assert_eq!(Score::new(i64::MAX).value(), INFINITY_MAGNITUDE);
        assert_eq!(Score::new(i64::MIN).value(), -INFINITY_MAGNITUDE);
    }

    #[test]
    fn add_saturates_at_infinity() {
        let a = Score::new(INFINITY_MAGNITUDE - 1);
        let b = Score::new(10);
        assert_eq!(a.add(b), Score::INFINITY);
    }

    #[test]
    fn opposite_sign_infinities_resolve_negative() {
        assert_eq!(Score::INFINITY.add(Score::NEG_INFINITY), Score::NEG_INFINITY);
        assert_eq!(Score::NEG_INFINITY.add(Score::INFINITY), Score::NEG_INFINITY);
    }

    #[test]
    fn same_sign_infinities_stay_infinite() {
        assert_eq!(Score::INFINITY.add(Score::INFINITY), Score::INFINITY);
        assert_eq!(Score::NEG_INFINITY.add(Score::NEG_INFINITY), Score::NEG_INFINITY);
    }

    #[test]
    fn scale_never_collapses_nonzero_to_zero() {
        let s = Score::new(1);
        let scaled = s.scale(0.1);
        assert_eq!(scaled, Score::new(1));

        let neg = Score::new(-1);
        assert_eq!(neg.scale(0.1), Score::new(-1));
    }

    #[test]
    fn scale_rounds_half_away_from_zero() {
        assert_eq!(Score::new(5).scale(0.5), Score::new(3));
        assert_eq!(Score::new(-5).scale(0.5), Score::new(-3));
    }

    #[test]
    fn parses_infinity_literals() {
        assert_eq!("INFINITY".parse::<Score>().unwrap(), Score::INFINITY);
        assert_eq!("+INFINITY".parse::<Score>().unwrap(), Score::INFINITY);
        assert_eq!("-INFINITY".parse::<Score>().unwrap(), Score::NEG_INFINITY);
        assert_eq!("42".parse::<Score>().unwrap(), Score::new(42));
    }

    #[test]
    fn zero_is_ignorable() {
        assert!(Score::ZERO.is_ignorable());
        assert!(!Score::new(1).is_ignorable());
    }
}
