use crate::error::{RatingError, Result};
use crate::expression::Expression;
use crate::rating::Rate;
use crate::set::RatingSet;

/// One input to a virtual or transitional rating.
#[derive(Debug)]
pub enum SourceRating {
    /// A formula over the composite rating's inputs.
    Expression(Expression),
    /// A rating set owned by the composite rating and resolved in time on its own.
    Ratings(RatingSet),
}

impl SourceRating {
    pub fn expression(formula: &str) -> Result<Self> {
        let expression = Expression::parse(formula)?;
        if expression.source_count() > 0 {
            return Err(RatingError::Configuration(format!(
                "source formula '{}' may not reference other sources",
                formula
            )));
        }
        Ok(SourceRating::Expression(expression))
    }

    pub fn rating_set(&self) -> Option<&RatingSet> {
        match self {
            SourceRating::Ratings(set) => Some(set),
            SourceRating::Expression(_) => None,
        }
    }

    pub fn ind_param_count(&self) -> Result<usize> {
        match self {
            SourceRating::Expression(e) => Ok(e.input_count()),
            SourceRating::Ratings(set) => Ok(set.spec()?.ind_param_count()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SourceRating::Expression(e) => format!("formula '{}'", e),
            SourceRating::Ratings(set) => set
                .spec()
                .map(|s| s.spec_id())
                .unwrap_or_else(|_| "<unavailable rating set>".to_string()),
        }
    }
}

impl Rate for SourceRating {
    fn rate_one(&self, time: i64, inputs: &[f64]) -> Result<Option<f64>> {
        match self {
            SourceRating::Expression(e) => {
                let value = e.evaluate_inputs(inputs)?;
                Ok(value.is_finite().then_some(value))
            }
            SourceRating::Ratings(set) => set.rate_one(time, inputs),
        }
    }

    fn reverse_rate_one(&self, time: i64, output: f64) -> Result<Option<f64>> {
        match self {
            SourceRating::Expression(e) => Err(RatingError::Unsupported(format!(
                "reverse rating through formula '{}'",
                e
            ))),
            SourceRating::Ratings(set) => set.reverse_rate_one(time, output),
        }
    }
}
