//! USGS-style stream ratings: a base stage/flow table adjusted by a
//! time-varying shift history and an optional log-interpolation offset table.

use crate::error::{RatingError, Result};
use crate::method::{LookupMethods, RatingMethod};
use crate::rating::Rate;
use crate::set::RatingSet;
use crate::table::RatingTable;

const SHIFT_ITERATIONS: usize = 32;
const SHIFT_TOLERANCE: f64 = 1e-9;

#[derive(Debug)]
pub struct UsgsStreamRating {
    pub table: RatingTable,
    pub lookup: LookupMethods,
    /// Stage to shift, resolved in time like any other rating set.
    pub shifts: Option<RatingSet>,
    /// Stage to offset; subtracted from stage before log interpolation.
    pub offsets: Option<RatingTable>,
}

impl UsgsStreamRating {
    pub fn new(table: RatingTable) -> Result<Self> {
        if table.depth() != 1 {
            return Err(RatingError::Configuration(
                "a stream rating table has exactly one independent parameter".to_string(),
            ));
        }
        Ok(Self {
            table,
            lookup: LookupMethods::default(),
            shifts: None,
            offsets: None,
        })
    }

    pub fn with_shifts(mut self, shifts: RatingSet) -> Self {
        self.shifts = Some(shifts);
        self
    }

    pub fn with_offsets(mut self, offsets: RatingTable) -> Self {
        self.offsets = Some(offsets);
        self
    }

    fn shift_at(&self, time: i64, stage: f64) -> Result<f64> {
        match &self.shifts {
            Some(shifts) if shifts.active_rating_count()? > 0 => {
                Ok(shifts.rate_one(time, &[stage])?.unwrap_or(0.0))
            }
            _ => Ok(0.0),
        }
    }

    fn offset_at(&self, stage: f64) -> Result<f64> {
        match &self.offsets {
            Some(offsets) => {
                let step = LookupMethods::new(RatingMethod::Previous, RatingMethod::Next, RatingMethod::Previous);
                Ok(offsets.rate(&[stage], &[step])?.unwrap_or(0.0))
            }
            None => Ok(0.0),
        }
    }

    /// Latest of `own` and the active shift dates at or before `time`.
    pub fn latest_effective_date(&self, own: i64, time: i64) -> Result<i64> {
        let latest_shift = match &self.shifts {
            Some(shifts) => shifts
                .active_effective_dates()?
                .into_iter()
                .filter(|d| *d <= time)
                .max(),
            None => None,
        };
        Ok(latest_shift.map_or(own, |d| d.max(own)))
    }
}

impl Rate for UsgsStreamRating {
    fn rate_one(&self, time: i64, inputs: &[f64]) -> Result<Option<f64>> {
        let [stage] = inputs else {
            return Err(RatingError::Configuration(format!(
                "stream rating takes one input, got {}",
                inputs.len()
            )));
        };
        let shifted = stage + self.shift_at(time, *stage)?;
        let offset = self.offset_at(shifted)?;
        self.table.rate_with_offset(shifted, &self.lookup, offset)
    }

    fn reverse_rate_one(&self, time: i64, output: f64) -> Result<Option<f64>> {
        let Some(shifted) = self.table.reverse_rate(output, &self.lookup)? else {
            return Ok(None);
        };
        // solve stage + shift(stage) = shifted
        let mut stage = shifted;
        for _ in 0..SHIFT_ITERATIONS {
            let next = shifted - self.shift_at(time, stage)?;
            let done = (next - stage).abs() < SHIFT_TOLERANCE;
            stage = next;
            if done {
                break;
            }
        }
        Ok(Some(stage))
    }

    fn extents(&self) -> Result<Vec<[f64; 2]>> {
        Ok(self.table.extents())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::{ConcreteRating, RatingBody, TableRating};
    use crate::spec::RatingSpec;

    fn base() -> RatingTable {
        RatingTable::from_pairs(&[(0.0, 0.0), (10.0, 100.0), (20.0, 300.0)]).unwrap()
    }

    fn shift_set(dates_and_shifts: &[(i64, f64)]) -> RatingSet {
        let spec = RatingSpec::new("SWT", "GAGE", "Stage;Stage-Shift.USGS", "Production")
            .with_methods(RatingMethod::Previous, RatingMethod::Null, RatingMethod::Previous);
        let set = RatingSet::new(spec.clone());
        let ratings = dates_and_shifts.iter().map(|&(date, shift)| {
            let table = RatingTable::from_pairs(&[(0.0, shift), (20.0, shift)]).unwrap();
            ConcreteRating::for_spec(&spec, date, 0, RatingBody::Table(TableRating::new(table)))
        });
        set.add_ratings(ratings).unwrap();
        set
    }

    #[test]
    fn test_unshifted() {
        let r = UsgsStreamRating::new(base()).unwrap();
        assert_eq!(r.rate_one(0, &[5.0]).unwrap(), Some(50.0));
        assert_eq!(r.reverse_rate_one(0, 200.0).unwrap(), Some(15.0));
        assert_eq!(r.latest_effective_date(100, 500).unwrap(), 100);
    }

    #[test]
    fn test_shift_applies_by_time() {
        let r = UsgsStreamRating::new(base()).unwrap().with_shifts(shift_set(&[(100, 0.0), (200, 1.0)]));
        // before the first shift the shift set yields undefined, treated as 0
        assert_eq!(r.rate_one(50, &[5.0]).unwrap(), Some(50.0));
        assert_eq!(r.rate_one(150, &[5.0]).unwrap(), Some(50.0));
        assert_eq!(r.rate_one(250, &[5.0]).unwrap(), Some(60.0));
        let stage = r.reverse_rate_one(250, 60.0).unwrap().unwrap();
        assert!((stage - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_latest_effective_date_uses_shifts() {
        let r = UsgsStreamRating::new(base()).unwrap().with_shifts(shift_set(&[(100, 0.0), (200, 1.0)]));
        assert_eq!(r.latest_effective_date(50, 150).unwrap(), 100);
        assert_eq!(r.latest_effective_date(50, 300).unwrap(), 200);
        assert_eq!(r.latest_effective_date(250, 300).unwrap(), 250);
    }

    #[test]
    fn test_offsets_drive_log_interpolation() {
        let table = RatingTable::from_pairs(&[(15.0, 1.0), (105.0, 100.0)]).unwrap();
        let mut r = UsgsStreamRating::new(table)
            .unwrap()
            .with_offsets(RatingTable::from_pairs(&[(0.0, 5.0)]).unwrap());
        r.lookup = LookupMethods::new(RatingMethod::Logarithmic, RatingMethod::Null, RatingMethod::Null);
        let y = r.rate_one(0, &[5.0 + 10f64.powf(1.5)]).unwrap().unwrap();
        assert!((y - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_multi_parameter_table() {
        let sub = RatingTable::from_pairs(&[(0.0, 0.0), (1.0, 1.0)]).unwrap();
        let table = RatingTable::new(vec![crate::table::TableValue::table(1.0, sub)]).unwrap();
        assert!(UsgsStreamRating::new(table).is_err());
    }
}
