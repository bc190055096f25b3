//! Temporal resolution: choosing, loading and combining the concrete ratings
//! that answer each query time.

use std::ops::Bound::{Excluded, Unbounded};

use log::debug;
use rating_utils::interpolation::{interpolate, Segment};
use rating_utils::times::{format_millis, now_millis};

use super::{Inner, Materialized, RatingSet};
use crate::error::{RatingError, Result};
use crate::method::RatingMethod;
use crate::rating::{ConcreteRating, Rate};

/// How one query time is answered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Resolution {
    /// The policy says the value is undefined.
    Undefined,
    /// Evaluate this rating alone.
    Single(i64),
    /// Evaluate both ratings and combine them across time.
    Interpolate { lower: i64, upper: i64, method: RatingMethod },
}

impl Inner {
    fn floor(&self, t: i64) -> Option<i64> {
        self.active.range(..=t).next_back().copied()
    }

    fn ceiling(&self, t: i64) -> Option<i64> {
        self.active.range(t..).next().copied()
    }

    fn higher(&self, key: i64) -> Option<i64> {
        self.active.range((Excluded(key), Unbounded)).next().copied()
    }

    fn lower(&self, key: i64) -> Option<i64> {
        self.active.range(..key).next_back().copied()
    }

    /// Apply the set's time-axis lookup methods to the active index.
    pub(crate) fn resolve(&self, t: i64) -> Result<Resolution> {
        use RatingMethod::*;
        let (Some(&first), Some(&last)) = (self.active.first(), self.active.last()) else {
            return Err(RatingError::NoActiveRatings);
        };
        let count = self.active.len();
        let spec_id = || self.spec.spec_id();

        // out-of-range times get an extrapolation bracket, then follow the
        // in-range policy like any other gap
        let (lower, upper) = if t < first {
            match self.spec.out_range_low_method {
                Error => {
                    return Err(RatingError::Policy(format!(
                        "{} is before the earliest effective date {} of {}",
                        format_millis(t),
                        format_millis(first),
                        spec_id()
                    )))
                }
                Null => return Ok(Resolution::Undefined),
                Next | Nearest | Higher | Closest => return Ok(Resolution::Single(first)),
                Previous | Lower => {
                    return Err(RatingError::Policy(format!(
                        "{} has no rating before {}",
                        spec_id(),
                        format_millis(t)
                    )))
                }
                method if count == 1 => return Err(RatingError::InsufficientRatingsForMethod(method)),
                _ => (first, self.higher(first).ok_or(RatingError::NoActiveRatings)?),
            }
        } else if t > last {
            match self.spec.out_range_high_method {
                Error => {
                    return Err(RatingError::Policy(format!(
                        "{} is after the latest effective date {} of {}",
                        format_millis(t),
                        format_millis(last),
                        spec_id()
                    )))
                }
                Null => return Ok(Resolution::Undefined),
                Previous | Nearest | Lower | Closest => return Ok(Resolution::Single(last)),
                Next | Higher => {
                    return Err(RatingError::Policy(format!(
                        "{} has no rating after {}",
                        spec_id(),
                        format_millis(t)
                    )))
                }
                Linear if count == 1 => return Ok(Resolution::Single(last)),
                method if count == 1 => return Err(RatingError::InsufficientRatingsForMethod(method)),
                _ => (self.lower(last).ok_or(RatingError::NoActiveRatings)?, last),
            }
        } else {
            match (self.floor(t), self.ceiling(t)) {
                (Some(lower), Some(upper)) => (lower, upper),
                _ => return Err(RatingError::NoActiveRatings),
            }
        };

        if lower == t {
            return Ok(Resolution::Single(lower));
        }
        if upper == t {
            return Ok(Resolution::Single(upper));
        }
        match self.spec.in_range_method {
            Error => Err(RatingError::Policy(format!(
                "{} falls between effective dates {} and {} of {}",
                format_millis(t),
                format_millis(lower),
                format_millis(upper),
                spec_id()
            ))),
            Null => Ok(Resolution::Undefined),
            Previous | Lower => Ok(Resolution::Single(lower)),
            Next | Higher => Ok(Resolution::Single(upper)),
            Nearest | Closest => Ok(Resolution::Single(if t - lower < upper - t { lower } else { upper })),
            method => Ok(Resolution::Interpolate { lower, upper, method }),
        }
    }
}

/// The parts of a batch that differ between forward and reverse rating.
trait Direction {
    fn check(&self, times: usize, ind_param_count: usize) -> Result<()>;

    fn evaluate(&self, rating: &ConcreteRating, i: usize, t: i64) -> Result<Option<f64>>;

    fn combine(
        &self,
        lower: &ConcreteRating,
        upper: &ConcreteRating,
        method: RatingMethod,
        i: usize,
        t: i64,
    ) -> Result<Option<f64>>;
}

struct Forward<'a, V> {
    inputs: &'a [V],
}

impl<V: AsRef<[f64]>> Direction for Forward<'_, V> {
    fn check(&self, times: usize, ind_param_count: usize) -> Result<()> {
        if self.inputs.len() != times {
            return Err(RatingError::Configuration(format!(
                "{} times but {} input vectors",
                times,
                self.inputs.len()
            )));
        }
        if let Some(bad) = self.inputs.iter().find(|v| v.as_ref().len() != ind_param_count) {
            return Err(RatingError::Configuration(format!(
                "input vector of length {} where {} independent parameters are expected",
                bad.as_ref().len(),
                ind_param_count
            )));
        }
        Ok(())
    }

    fn evaluate(&self, rating: &ConcreteRating, i: usize, t: i64) -> Result<Option<f64>> {
        rating.rate_one(t, self.inputs[i].as_ref())
    }

    fn combine(
        &self,
        lower: &ConcreteRating,
        upper: &ConcreteRating,
        _method: RatingMethod,
        i: usize,
        t: i64,
    ) -> Result<Option<f64>> {
        let (Some(y1), Some(y2)) = (self.evaluate(lower, i, t)?, self.evaluate(upper, i, t)?) else {
            return Ok(None);
        };
        let t2 = upper.effective_date;
        // the lower rating may have changed behavior (shifts) after its own date,
        // and the upper one may start its transition late
        let mut t1 = lower.latest_effective_date(t2)?;
        if let Some(start) = upper.transition_start_date {
            if start > t1 && start < t2 {
                t1 = start;
            }
        }
        let y = if t <= t1 {
            y1
        } else if t1 >= t2 {
            y2
        } else {
            y1 + ((t - t1) as f64 / (t2 - t1) as f64) * (y2 - y1)
        };
        Ok(Some(y))
    }
}

struct Reverse<'a> {
    outputs: &'a [f64],
}

impl Direction for Reverse<'_> {
    fn check(&self, times: usize, _ind_param_count: usize) -> Result<()> {
        if self.outputs.len() != times {
            return Err(RatingError::Configuration(format!(
                "{} times but {} output values",
                times,
                self.outputs.len()
            )));
        }
        Ok(())
    }

    fn evaluate(&self, rating: &ConcreteRating, i: usize, t: i64) -> Result<Option<f64>> {
        rating.reverse_rate_one(t, self.outputs[i])
    }

    fn combine(
        &self,
        lower: &ConcreteRating,
        upper: &ConcreteRating,
        method: RatingMethod,
        i: usize,
        t: i64,
    ) -> Result<Option<f64>> {
        let (Some(y1), Some(y2)) = (self.evaluate(lower, i, t)?, self.evaluate(upper, i, t)?) else {
            return Ok(None);
        };
        let seg = Segment {
            x1: lower.effective_date as f64,
            x2: upper.effective_date as f64,
            y1,
            y2,
        };
        let y = interpolate(t as f64, seg, method.transform(), 0.0);
        Ok(y.is_finite().then_some(y))
    }
}

impl RatingSet {
    fn resolve_batch<D: Direction>(&self, times: &[i64], direction: &D) -> Result<Vec<Option<f64>>> {
        let mut inner = self.lock()?;
        direction.check(times.len(), inner.spec.ind_param_count())?;
        if inner.active.is_empty() {
            return Err(RatingError::NoActiveRatings);
        }

        let mut results: Vec<Option<f64>> = Vec::with_capacity(times.len());
        let mut last: Option<Resolution> = None;
        for (i, &t) in times.iter().enumerate() {
            if i > 0 && times[i - 1] == t {
                if let Some(value) = Self::reuse(&inner, direction, last, i, t)? {
                    results.push(value);
                    continue;
                }
            }
            let (value, used) = self.resolve_element(&mut inner, direction, i, t)?;
            last = Some(used);
            results.push(value);
        }
        Ok(results)
    }

    /// Answer a repeated time from the previous element's resolution. `None`
    /// when its ratings are gone and the time must be resolved again.
    fn reuse<D: Direction>(
        inner: &Inner,
        direction: &D,
        last: Option<Resolution>,
        i: usize,
        t: i64,
    ) -> Result<Option<Option<f64>>> {
        match last {
            Some(Resolution::Undefined) => Ok(Some(None)),
            Some(Resolution::Single(key)) => match inner.all.get(&key) {
                Some(rating) => direction.evaluate(rating, i, t).map(Some),
                None => Ok(None),
            },
            Some(Resolution::Interpolate { lower, upper, method }) => {
                match (inner.all.get(&lower), inner.all.get(&upper)) {
                    (Some(lo), Some(hi)) => direction.combine(lo, hi, method, i, t).map(Some),
                    _ => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    fn resolve_element<D: Direction>(
        &self,
        inner: &mut Inner,
        direction: &D,
        i: usize,
        t: i64,
    ) -> Result<(Option<f64>, Resolution)> {
        // a pruned bracket shrinks the index, so this terminates
        loop {
            #[cfg(test)]
            {
                inner.bracket_searches += 1;
            }
            let resolution = inner.resolve(t)?;
            match resolution {
                Resolution::Undefined => return Ok((None, resolution)),
                Resolution::Single(key) => {
                    if self.materialize_locked(inner, key)? == Materialized::Pruned {
                        continue;
                    }
                    let value = direction.evaluate(inner.loaded(key)?, i, t)?;
                    return Ok((value, resolution));
                }
                Resolution::Interpolate { lower, upper, method } => {
                    if self.materialize_locked(inner, lower)? == Materialized::Pruned
                        || self.materialize_locked(inner, upper)? == Materialized::Pruned
                    {
                        continue;
                    }
                    debug!(
                        "interpolating {} between {} and {}",
                        format_millis(t),
                        format_millis(lower),
                        format_millis(upper)
                    );
                    let value = direction.combine(inner.loaded(lower)?, inner.loaded(upper)?, method, i, t)?;
                    return Ok((value, resolution));
                }
            }
        }
    }

    /// Rate a batch of input vectors, one per time.
    ///
    /// Returns one value per element, `None` where the lookup policy yields an
    /// undefined value. Any failure fails the whole batch.
    pub fn rate<V: AsRef<[f64]>>(&self, times: &[i64], inputs: &[V]) -> Result<Vec<Option<f64>>> {
        self.resolve_batch(times, &Forward { inputs })
    }

    /// Find the input producing each output value, one per time.
    pub fn reverse_rate(&self, times: &[i64], outputs: &[f64]) -> Result<Vec<Option<f64>>> {
        self.resolve_batch(times, &Reverse { outputs })
    }

    pub fn rate_one(&self, time: i64, inputs: &[f64]) -> Result<Option<f64>> {
        Ok(self.rate(&[time], &[inputs])?.into_iter().next().flatten())
    }

    pub fn reverse_rate_one(&self, time: i64, output: f64) -> Result<Option<f64>> {
        Ok(self.reverse_rate(&[time], &[output])?.into_iter().next().flatten())
    }

    /// `[min, max]` per parameter of the rating in effect at `as_of` (now when
    /// `None`), or of the earliest rating if none is in effect yet.
    pub fn rating_extents(&self, as_of: Option<i64>) -> Result<Vec<[f64; 2]>> {
        let t = as_of.unwrap_or_else(now_millis);
        let mut inner = self.lock()?;
        loop {
            let key = inner
                .floor(t)
                .or_else(|| inner.active.first().copied())
                .ok_or(RatingError::NoActiveRatings)?;
            if self.materialize_locked(&mut inner, key)? == Materialized::Pruned {
                continue;
            }
            return inner.loaded(key)?.extents();
        }
    }
}
