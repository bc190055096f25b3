//! Transitional ratings: pick one of several evaluations by testing conditions
//! in order, the last evaluation being the default.

use std::cell::RefCell;

use crate::error::{RatingError, Result};
use crate::expression::{Expression, Variable};
use crate::rating::Rate;
use crate::source::SourceRating;

#[derive(Debug)]
pub struct TransitionalRating {
    conditions: Vec<Expression>,
    evaluations: Vec<Expression>,
    sources: Vec<SourceRating>,
    ind_param_count: usize,
}

impl TransitionalRating {
    pub fn new(
        conditions: &[&str],
        evaluations: &[&str],
        sources: Vec<SourceRating>,
        ind_param_count: usize,
    ) -> Result<Self> {
        if evaluations.len() != conditions.len() + 1 {
            return Err(RatingError::Configuration(format!(
                "transitional rating needs one evaluation per condition plus a default, got {} conditions and {} evaluations",
                conditions.len(),
                evaluations.len()
            )));
        }
        let parse_all = |texts: &[&str]| texts.iter().map(|t| Expression::parse(t)).collect::<Result<Vec<_>>>();
        let conditions = parse_all(conditions)?;
        let evaluations = parse_all(evaluations)?;
        for expr in conditions.iter().chain(evaluations.iter()) {
            for var in expr.variables() {
                let valid = match var {
                    Variable::Input(i) => i < ind_param_count,
                    Variable::Source(i) => i < sources.len(),
                };
                if !valid {
                    return Err(RatingError::Configuration(format!(
                        "'{}' references {} which does not exist",
                        expr, var
                    )));
                }
            }
        }
        Ok(Self {
            conditions,
            evaluations,
            sources,
            ind_param_count,
        })
    }

    pub fn conditions(&self) -> &[Expression] {
        &self.conditions
    }

    pub fn evaluations(&self) -> &[Expression] {
        &self.evaluations
    }

    pub fn sources(&self) -> &[SourceRating] {
        &self.sources
    }

    pub fn ind_param_count(&self) -> usize {
        self.ind_param_count
    }
}

impl Rate for TransitionalRating {
    fn rate_one(&self, time: i64, inputs: &[f64]) -> Result<Option<f64>> {
        if inputs.len() != self.ind_param_count {
            return Err(RatingError::Configuration(format!(
                "transitional rating takes {} inputs, got {}",
                self.ind_param_count,
                inputs.len()
            )));
        }
        // source outputs are computed on first use; undefined becomes NaN
        let cache: RefCell<Vec<Option<f64>>> = RefCell::new(vec![None; self.sources.len()]);
        let lookup = |var: Variable| -> Result<f64> {
            match var {
                Variable::Input(i) => Ok(inputs[i]),
                Variable::Source(i) => {
                    if let Some(v) = cache.borrow()[i] {
                        return Ok(v);
                    }
                    let v = self.sources[i].rate_one(time, inputs)?.unwrap_or(f64::NAN);
                    cache.borrow_mut()[i] = Some(v);
                    Ok(v)
                }
            }
        };

        let mut selected = self.evaluations.len() - 1;
        for (i, condition) in self.conditions.iter().enumerate() {
            let truth = condition.evaluate(lookup)?;
            if truth != 0.0 && !truth.is_nan() {
                selected = i;
                break;
            }
        }
        let value = self.evaluations[selected].evaluate(lookup)?;
        Ok(value.is_finite().then_some(value))
    }

    fn reverse_rate_one(&self, _time: i64, _output: f64) -> Result<Option<f64>> {
        Err(RatingError::Unsupported(
            "reverse rating a transitional rating".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> Vec<SourceRating> {
        vec![
            SourceRating::expression("ARG1 * 10").unwrap(),
            SourceRating::expression("ARG1 * 100").unwrap(),
        ]
    }

    #[test]
    fn test_first_true_condition_wins() {
        let t = TransitionalRating::new(&["I1 < 5", "I1 < 10"], &["R1", "R2", "0"], sources(), 1).unwrap();
        assert_eq!(t.rate_one(0, &[2.0]).unwrap(), Some(20.0));
        assert_eq!(t.rate_one(0, &[7.0]).unwrap(), Some(700.0));
        assert_eq!(t.rate_one(0, &[12.0]).unwrap(), Some(0.0));
    }

    #[test]
    fn test_conditions_may_use_sources() {
        let t = TransitionalRating::new(&["R1 > 50"], &["R2", "R1"], sources(), 1).unwrap();
        assert_eq!(t.rate_one(0, &[6.0]).unwrap(), Some(600.0));
        assert_eq!(t.rate_one(0, &[4.0]).unwrap(), Some(40.0));
    }

    #[test]
    fn test_validation() {
        assert!(TransitionalRating::new(&["I1 < 5"], &["R1"], sources(), 1).is_err());
        assert!(TransitionalRating::new(&["I2 < 5"], &["R1", "R2"], sources(), 1).is_err());
        assert!(TransitionalRating::new(&["I1 < 5"], &["R3", "R2"], sources(), 1).is_err());
        assert!(TransitionalRating::new(&[], &["I1 + 1"], Vec::new(), 1).is_ok());
    }

    #[test]
    fn test_reverse_unsupported() {
        let t = TransitionalRating::new(&[], &["I1"], Vec::new(), 1).unwrap();
        assert!(matches!(t.reverse_rate_one(0, 1.0), Err(RatingError::Unsupported(_))));
    }
}
