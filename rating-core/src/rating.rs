//! Concrete ratings: one versioned instance of a rating, valid from its
//! effective date onward.

use rating_utils::times::format_millis;

use crate::error::{RatingError, Result};
use crate::expression::{Expression, Variable};
use crate::method::LookupMethods;
use crate::set::RatingSet;
use crate::spec::RatingSpec;
use crate::table::RatingTable;
use crate::transitional::TransitionalRating;
use crate::usgs::UsgsStreamRating;
use crate::virtual_rating::VirtualRating;

/// Evaluation capability shared by every rating variant.
pub trait Rate {
    /// Rate one input vector at `time`. `None` is an undefined result.
    fn rate_one(&self, time: i64, inputs: &[f64]) -> Result<Option<f64>>;

    /// Find the single input producing `output` at `time`.
    fn reverse_rate_one(&self, time: i64, output: f64) -> Result<Option<f64>>;

    /// `[min, max]` per parameter, independent parameters first.
    fn extents(&self) -> Result<Vec<[f64; 2]>> {
        Err(RatingError::Unsupported(
            "this rating type has no fixed extents".to_string(),
        ))
    }
}

/// Table rating with the lookup methods installed from its spec.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRating {
    pub table: RatingTable,
    pub lookup: Vec<LookupMethods>,
}

impl TableRating {
    pub fn new(table: RatingTable) -> Self {
        let lookup = vec![LookupMethods::default(); table.depth()];
        Self { table, lookup }
    }
}

impl Rate for TableRating {
    fn rate_one(&self, _time: i64, inputs: &[f64]) -> Result<Option<f64>> {
        self.table.rate(inputs, &self.lookup)
    }

    fn reverse_rate_one(&self, _time: i64, output: f64) -> Result<Option<f64>> {
        let methods = self.lookup.first().copied().unwrap_or_default();
        self.table.reverse_rate(output, &methods)
    }

    fn extents(&self) -> Result<Vec<[f64; 2]>> {
        Ok(self.table.extents())
    }
}

/// Formula rating over the independent inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionRating {
    pub expression: Expression,
    pub ind_param_count: usize,
}

impl ExpressionRating {
    pub fn new(formula: &str, ind_param_count: usize) -> Result<Self> {
        let expression = Expression::parse(formula)?;
        if expression.source_count() > 0 {
            return Err(RatingError::Configuration(format!(
                "formula '{}' references source ratings",
                formula
            )));
        }
        if expression.input_count() > ind_param_count {
            return Err(RatingError::Configuration(format!(
                "formula '{}' uses {} inputs but the rating has {}",
                formula,
                expression.input_count(),
                ind_param_count
            )));
        }
        Ok(Self {
            expression,
            ind_param_count,
        })
    }
}

impl Rate for ExpressionRating {
    fn rate_one(&self, _time: i64, inputs: &[f64]) -> Result<Option<f64>> {
        let value = self.expression.evaluate(|var| match var {
            Variable::Input(i) => inputs.get(i).copied().ok_or_else(|| {
                RatingError::Configuration(format!("missing input {}", var))
            }),
            Variable::Source(_) => Err(RatingError::Configuration(format!(
                "unexpected source reference {}",
                var
            ))),
        })?;
        Ok(value.is_finite().then_some(value))
    }

    fn reverse_rate_one(&self, _time: i64, _output: f64) -> Result<Option<f64>> {
        Err(RatingError::Unsupported(format!(
            "reverse rating through formula '{}'",
            self.expression
        )))
    }
}

/// Variant payload of a concrete rating.
#[derive(Debug)]
pub enum RatingBody {
    /// Index entry whose data has not been fetched yet.
    Unloaded,
    Table(TableRating),
    Expression(ExpressionRating),
    UsgsStream(UsgsStreamRating),
    Virtual(VirtualRating),
    Transitional(TransitionalRating),
}

impl RatingBody {
    pub fn kind(&self) -> &'static str {
        match self {
            RatingBody::Unloaded => "unloaded",
            RatingBody::Table(_) => "table",
            RatingBody::Expression(_) => "expression",
            RatingBody::UsgsStream(_) => "usgs-stream",
            RatingBody::Virtual(_) => "virtual",
            RatingBody::Transitional(_) => "transitional",
        }
    }
}

#[derive(Debug)]
pub struct ConcreteRating {
    pub office_id: String,
    pub spec_id: String,
    pub units_id: String,
    pub effective_date: i64,
    pub create_date: i64,
    pub transition_start_date: Option<i64>,
    pub active: bool,
    pub description: Option<String>,
    pub body: RatingBody,
}

impl ConcreteRating {
    pub fn new(office_id: &str, spec_id: &str, effective_date: i64, create_date: i64, body: RatingBody) -> Self {
        Self {
            office_id: office_id.to_string(),
            spec_id: spec_id.to_string(),
            units_id: String::new(),
            effective_date,
            create_date,
            transition_start_date: None,
            active: true,
            description: None,
            body,
        }
    }

    /// A rating carrying the identifiers of `spec`.
    pub fn for_spec(spec: &RatingSpec, effective_date: i64, create_date: i64, body: RatingBody) -> Self {
        Self::new(&spec.office_id, &spec.spec_id(), effective_date, create_date, body)
    }

    /// An index entry to be materialized later.
    pub fn placeholder(spec: &RatingSpec, effective_date: i64, create_date: i64) -> Self {
        Self::for_spec(spec, effective_date, create_date, RatingBody::Unloaded)
    }

    pub fn with_transition_start(mut self, date: i64) -> Self {
        self.transition_start_date = Some(date);
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_units(mut self, units_id: &str) -> Self {
        self.units_id = units_id.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn is_loaded(&self) -> bool {
        !matches!(self.body, RatingBody::Unloaded)
    }

    /// Independent-parameter count of the loaded data; `None` for placeholders.
    pub fn ind_param_count(&self) -> Option<usize> {
        match &self.body {
            RatingBody::Unloaded => None,
            RatingBody::Table(t) => Some(t.table.depth()),
            RatingBody::Expression(e) => Some(e.ind_param_count),
            RatingBody::UsgsStream(_) => Some(1),
            RatingBody::Virtual(v) => Some(v.ind_param_count()),
            RatingBody::Transitional(t) => Some(t.ind_param_count()),
        }
    }

    /// Latest date at or before `time` on which this rating's effective
    /// behavior changed. Differs from the effective date only when later
    /// shifts apply.
    pub fn latest_effective_date(&self, time: i64) -> Result<i64> {
        match &self.body {
            RatingBody::UsgsStream(u) => u.latest_effective_date(self.effective_date, time),
            _ => Ok(self.effective_date),
        }
    }

    /// Rating sets owned by this rating.
    pub fn child_sets(&self) -> Vec<&RatingSet> {
        match &self.body {
            RatingBody::UsgsStream(u) => u.shifts.iter().collect(),
            RatingBody::Virtual(v) => v.sources().iter().filter_map(|s| s.rating_set()).collect(),
            RatingBody::Transitional(t) => t.sources().iter().filter_map(|s| s.rating_set()).collect(),
            _ => Vec::new(),
        }
    }

    /// Install the spec's lookup behavior into the loaded body.
    pub(crate) fn apply_spec(&mut self, spec: &RatingSpec) -> Result<()> {
        match &mut self.body {
            RatingBody::Table(t) => t.lookup = spec.lookups(t.table.depth()),
            RatingBody::UsgsStream(u) => {
                u.lookup = spec.lookup_for(0);
                if let Some(shifts) = &u.shifts {
                    shifts.set_in_range_method(spec.in_range_method)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn not_loaded(&self) -> RatingError {
        RatingError::Configuration(format!(
            "rating {} effective {} is not loaded",
            self.spec_id,
            format_millis(self.effective_date)
        ))
    }
}

impl Rate for ConcreteRating {
    fn rate_one(&self, time: i64, inputs: &[f64]) -> Result<Option<f64>> {
        match &self.body {
            RatingBody::Unloaded => Err(self.not_loaded()),
            RatingBody::Table(r) => r.rate_one(time, inputs),
            RatingBody::Expression(r) => r.rate_one(time, inputs),
            RatingBody::UsgsStream(r) => r.rate_one(time, inputs),
            RatingBody::Virtual(r) => r.rate_one(time, inputs),
            RatingBody::Transitional(r) => r.rate_one(time, inputs),
        }
    }

    fn reverse_rate_one(&self, time: i64, output: f64) -> Result<Option<f64>> {
        match &self.body {
            RatingBody::Unloaded => Err(self.not_loaded()),
            RatingBody::Table(r) => r.reverse_rate_one(time, output),
            RatingBody::Expression(r) => r.reverse_rate_one(time, output),
            RatingBody::UsgsStream(r) => r.reverse_rate_one(time, output),
            RatingBody::Virtual(r) => r.reverse_rate_one(time, output),
            RatingBody::Transitional(r) => r.reverse_rate_one(time, output),
        }
    }

    fn extents(&self) -> Result<Vec<[f64; 2]>> {
        match &self.body {
            RatingBody::Unloaded => Err(self.not_loaded()),
            RatingBody::Table(r) => r.extents(),
            RatingBody::UsgsStream(r) => r.extents(),
            other => Err(RatingError::Unsupported(format!(
                "{} ratings have no fixed extents",
                other.kind()
            ))),
        }
    }
}
