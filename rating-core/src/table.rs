//! Lookup tables: the leaf evaluator behind table and USGS stream ratings.
//!
//! A table is a list of rows sorted by independent value. Each row holds either a
//! dependent value or, for multi-parameter ratings, a sub-table over the next
//! independent parameter.

use rating_utils::interpolation::{interpolate, AxisTransform, Segment};

use crate::error::{RatingError, Result};
use crate::method::{LookupMethods, RatingMethod};

#[derive(Debug, Clone, PartialEq)]
pub enum TableDep {
    Value(f64),
    Table(RatingTable),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableValue {
    pub ind: f64,
    pub dep: TableDep,
    pub note: Option<String>,
}

impl TableValue {
    pub fn value(ind: f64, dep: f64) -> Self {
        Self {
            ind,
            dep: TableDep::Value(dep),
            note: None,
        }
    }

    pub fn table(ind: f64, table: RatingTable) -> Self {
        Self {
            ind,
            dep: TableDep::Table(table),
            note: None,
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

/// Where a value falls along one axis.
enum Placement {
    Below,
    Above,
    Exact(usize),
    Between { lo: usize, hi: usize, lo_nearer: bool },
}

/// What the axis methods decided to do with a placement.
enum Choice {
    Undefined,
    Row(usize),
    Interpolate { lo: usize, hi: usize, method: RatingMethod },
}

fn choose(placement: Placement, n: usize, methods: &LookupMethods, value: f64) -> Result<Choice> {
    use RatingMethod::*;
    let choice = match placement {
        Placement::Exact(i) => Choice::Row(i),
        Placement::Below => match methods.out_range_low {
            Null => Choice::Undefined,
            Error => {
                return Err(RatingError::Policy(format!(
                    "value {} is below the table range",
                    value
                )))
            }
            Next | Nearest | Higher | Closest => Choice::Row(0),
            Previous | Lower => {
                return Err(RatingError::Policy(format!(
                    "value {} has no lower table value",
                    value
                )))
            }
            method => Choice::Interpolate { lo: 0, hi: 1, method },
        },
        Placement::Above => match methods.out_range_high {
            Null => Choice::Undefined,
            Error => {
                return Err(RatingError::Policy(format!(
                    "value {} is above the table range",
                    value
                )))
            }
            Previous | Nearest | Lower | Closest => Choice::Row(n - 1),
            Next | Higher => {
                return Err(RatingError::Policy(format!(
                    "value {} has no higher table value",
                    value
                )))
            }
            method => Choice::Interpolate {
                lo: n.saturating_sub(2),
                hi: n - 1,
                method,
            },
        },
        Placement::Between { lo, hi, lo_nearer } => match methods.in_range {
            Null => Choice::Undefined,
            Error => {
                return Err(RatingError::Policy(format!(
                    "value {} is not an exact table value",
                    value
                )))
            }
            Previous | Lower => Choice::Row(lo),
            Next | Higher => Choice::Row(hi),
            Nearest | Closest => Choice::Row(if lo_nearer { lo } else { hi }),
            method => Choice::Interpolate { lo, hi, method },
        },
    };
    if matches!(choice, Choice::Interpolate { .. }) && n < 2 {
        return Err(RatingError::Policy(
            "cannot extrapolate from a single table value".to_string(),
        ));
    }
    Ok(choice)
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatingTable {
    values: Vec<TableValue>,
}

impl RatingTable {
    /// Build a table, sorting rows by independent value.
    ///
    /// Rows must be non-empty, have distinct finite independent values, and be
    /// uniformly leaves or uniformly sub-tables of the same depth.
    pub fn new(mut values: Vec<TableValue>) -> Result<Self> {
        if values.is_empty() {
            return Err(RatingError::Configuration("rating table has no rows".to_string()));
        }
        if let Some(bad) = values.iter().find(|v| !v.ind.is_finite()) {
            return Err(RatingError::Configuration(format!(
                "rating table has a non-finite independent value {}",
                bad.ind
            )));
        }
        values.sort_by(|a, b| a.ind.total_cmp(&b.ind));
        if let Some(pair) = values.windows(2).find(|w| w[0].ind == w[1].ind) {
            return Err(RatingError::Configuration(format!(
                "rating table has duplicate independent value {}",
                pair[0].ind
            )));
        }
        let depth_of = |v: &TableValue| match &v.dep {
            TableDep::Value(_) => 1,
            TableDep::Table(t) => t.depth() + 1,
        };
        let depth = depth_of(&values[0]);
        if values.iter().any(|v| depth_of(v) != depth) {
            return Err(RatingError::Configuration(
                "rating table mixes values and sub-tables of different depths".to_string(),
            ));
        }
        Ok(Self { values })
    }

    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self> {
        Self::new(pairs.iter().map(|&(ind, dep)| TableValue::value(ind, dep)).collect())
    }

    /// Read a single-parameter table from `ind,dep[,note]` CSV rows.
    ///
    /// A leading header row (non-numeric first field) is skipped.
    pub fn from_csv(text: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .comment(Some(b'#'))
            .from_reader(text.as_bytes());

        let mut values = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| RatingError::Codec(e.to_string()))?;
            if record.iter().all(|f| f.is_empty()) {
                continue;
            }
            let field = |i: usize| record.get(i).unwrap_or("");
            let ind = match field(0).parse::<f64>() {
                Ok(v) => v,
                Err(_) if line == 0 => continue,
                Err(_) => {
                    return Err(RatingError::Codec(format!(
                        "line {}: bad independent value '{}'",
                        line + 1,
                        field(0)
                    )))
                }
            };
            let dep = field(1).parse::<f64>().map_err(|_| {
                RatingError::Codec(format!(
                    "line {}: bad dependent value '{}'",
                    line + 1,
                    field(1)
                ))
            })?;
            let mut value = TableValue::value(ind, dep);
            if !field(2).is_empty() {
                value = value.with_note(field(2));
            }
            values.push(value);
        }
        Self::new(values)
    }

    pub fn values(&self) -> &[TableValue] {
        &self.values
    }

    /// Number of independent parameters.
    pub fn depth(&self) -> usize {
        match self.values.first().map(|v| &v.dep) {
            Some(TableDep::Table(t)) => t.depth() + 1,
            _ => 1,
        }
    }

    /// `(ind, dep)` rows of a single-parameter table.
    pub fn leaf_pairs(&self) -> Option<Vec<(f64, f64)>> {
        self.values
            .iter()
            .map(|v| match v.dep {
                TableDep::Value(dep) => Some((v.ind, dep)),
                TableDep::Table(_) => None,
            })
            .collect()
    }

    fn place(&self, x: f64) -> Placement {
        let n = self.values.len();
        if x < self.values[0].ind {
            return Placement::Below;
        }
        if x > self.values[n - 1].ind {
            return Placement::Above;
        }
        let idx = self.values.partition_point(|v| v.ind <= x);
        let lo = idx - 1;
        if self.values[lo].ind == x {
            return Placement::Exact(lo);
        }
        Placement::Between {
            lo,
            hi: idx,
            lo_nearer: x - self.values[lo].ind < self.values[idx].ind - x,
        }
    }

    fn rate_axes(&self, inputs: &[f64], lookups: &[LookupMethods], offset: f64) -> Result<Option<f64>> {
        let x = inputs[0];
        if x.is_nan() {
            return Ok(None);
        }
        let methods = lookups.first().copied().unwrap_or_default();
        let rest = &inputs[1..];
        let rest_lookups = lookups.get(1..).unwrap_or(&[]);
        let dep_of = |row: &TableValue| match &row.dep {
            TableDep::Value(v) => Ok(Some(*v)),
            TableDep::Table(sub) => sub.rate_axes(rest, rest_lookups, 0.0),
        };

        let n = self.values.len();
        match choose(self.place(x), n, &methods, x)? {
            Choice::Undefined => Ok(None),
            Choice::Row(i) => dep_of(&self.values[i]),
            Choice::Interpolate { lo, hi, method } => {
                let (a, b) = (&self.values[lo], &self.values[hi]);
                match (dep_of(a)?, dep_of(b)?) {
                    (Some(y1), Some(y2)) => {
                        let seg = Segment {
                            x1: a.ind,
                            x2: b.ind,
                            y1,
                            y2,
                        };
                        Ok(finite(interpolate(x, seg, method.transform(), offset)))
                    }
                    _ => Ok(None),
                }
            }
        }
    }

    /// Rate a full input vector, one lookup entry per axis.
    pub fn rate(&self, inputs: &[f64], lookups: &[LookupMethods]) -> Result<Option<f64>> {
        if inputs.len() != self.depth() {
            return Err(RatingError::Configuration(format!(
                "table has {} independent parameters but {} inputs were given",
                self.depth(),
                inputs.len()
            )));
        }
        self.rate_axes(inputs, lookups, 0.0)
    }

    /// Rate a single-parameter table, subtracting `offset` from independent
    /// values before any log transform.
    pub fn rate_with_offset(&self, x: f64, methods: &LookupMethods, offset: f64) -> Result<Option<f64>> {
        if self.depth() != 1 {
            return Err(RatingError::Configuration(
                "offset lookup needs a single-parameter table".to_string(),
            ));
        }
        self.rate_axes(&[x], std::slice::from_ref(methods), offset)
    }

    /// Find the independent value producing `y` (single-parameter tables only).
    ///
    /// Dependent values must be monotonic so the answer is unique.
    pub fn reverse_rate(&self, y: f64, methods: &LookupMethods) -> Result<Option<f64>> {
        let pairs = self.leaf_pairs().ok_or_else(|| {
            RatingError::Unsupported("reverse rating through a multi-parameter table".to_string())
        })?;
        if y.is_nan() {
            return Ok(None);
        }
        let n = pairs.len();
        let increasing = pairs[n - 1].1 >= pairs[0].1;
        let monotonic = pairs.windows(2).all(|w| {
            if increasing {
                w[1].1 >= w[0].1
            } else {
                w[1].1 <= w[0].1
            }
        });
        if !monotonic {
            return Err(RatingError::Unsupported(
                "reverse rating through a non-monotonic table".to_string(),
            ));
        }

        // "below" and "above" refer to the independent axis
        let placement = if (increasing && y < pairs[0].1) || (!increasing && y > pairs[0].1) {
            Placement::Below
        } else if (increasing && y > pairs[n - 1].1) || (!increasing && y < pairs[n - 1].1) {
            Placement::Above
        } else if let Some(i) = pairs.iter().position(|p| p.1 == y) {
            Placement::Exact(i)
        } else {
            let hi = pairs.partition_point(|p| if increasing { p.1 < y } else { p.1 > y });
            let lo = hi - 1;
            Placement::Between {
                lo,
                hi,
                lo_nearer: (y - pairs[lo].1).abs() < (pairs[hi].1 - y).abs(),
            }
        };

        match choose(placement, n, methods, y)? {
            Choice::Undefined => Ok(None),
            Choice::Row(i) => Ok(Some(pairs[i].0)),
            Choice::Interpolate { lo, hi, method } => {
                let seg = Segment {
                    x1: pairs[lo].1,
                    x2: pairs[hi].1,
                    y1: pairs[lo].0,
                    y2: pairs[hi].0,
                };
                // axes swap roles going backwards
                let transform = AxisTransform::new(method.dependent_log(), method.independent_log());
                Ok(finite(interpolate(y, seg, transform, 0.0)))
            }
        }
    }

    /// `[min, max]` per parameter: independent axes first, dependent last.
    pub fn extents(&self) -> Vec<[f64; 2]> {
        let n = self.values.len();
        let mut extents = vec![[self.values[0].ind, self.values[n - 1].ind]];
        let mut dep_range: Option<[f64; 2]> = None;
        let mut sub_extents: Option<Vec<[f64; 2]>> = None;
        for row in &self.values {
            match &row.dep {
                TableDep::Value(v) => {
                    dep_range = Some(match dep_range {
                        Some([lo, hi]) => [lo.min(*v), hi.max(*v)],
                        None => [*v, *v],
                    });
                }
                TableDep::Table(sub) => {
                    let ext = sub.extents();
                    sub_extents = Some(match sub_extents {
                        Some(acc) => acc
                            .iter()
                            .zip(ext.iter())
                            .map(|(a, b)| [a[0].min(b[0]), a[1].max(b[1])])
                            .collect(),
                        None => ext,
                    });
                }
            }
        }
        extents.extend(dep_range);
        extents.extend(sub_extents.unwrap_or_default());
        extents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RatingMethod::*;

    fn table() -> RatingTable {
        RatingTable::from_pairs(&[(1.0, 10.0), (2.0, 20.0), (4.0, 60.0)]).unwrap()
    }

    fn methods(in_range: RatingMethod, low: RatingMethod, high: RatingMethod) -> LookupMethods {
        LookupMethods::new(in_range, low, high)
    }

    #[test]
    fn test_rows_sorted_and_validated() {
        let t = RatingTable::from_pairs(&[(3.0, 30.0), (1.0, 10.0)]).unwrap();
        assert_eq!(t.values()[0].ind, 1.0);
        assert!(RatingTable::from_pairs(&[]).is_err());
        assert!(RatingTable::from_pairs(&[(1.0, 1.0), (1.0, 2.0)]).is_err());
        assert!(RatingTable::from_pairs(&[(f64::NAN, 1.0)]).is_err());
    }

    #[test]
    fn test_linear_lookup() {
        let t = table();
        let m = [LookupMethods::default()];
        assert_eq!(t.rate(&[1.5], &m).unwrap(), Some(15.0));
        assert_eq!(t.rate(&[3.0], &m).unwrap(), Some(40.0));
        assert_eq!(t.rate(&[2.0], &m).unwrap(), Some(20.0));
    }

    #[test]
    fn test_out_of_range_methods() {
        let t = table();
        assert_eq!(t.rate(&[0.0], &[methods(Linear, Null, Null)]).unwrap(), None);
        assert!(matches!(
            t.rate(&[0.0], &[methods(Linear, Error, Null)]),
            Err(RatingError::Policy(_))
        ));
        assert_eq!(t.rate(&[0.0], &[methods(Linear, Nearest, Null)]).unwrap(), Some(10.0));
        assert_eq!(t.rate(&[0.0], &[methods(Linear, Linear, Null)]).unwrap(), Some(0.0));
        assert_eq!(t.rate(&[5.0], &[methods(Linear, Null, Linear)]).unwrap(), Some(80.0));
        assert_eq!(t.rate(&[5.0], &[methods(Linear, Null, Previous)]).unwrap(), Some(60.0));
        assert!(t.rate(&[5.0], &[methods(Linear, Null, Next)]).is_err());
    }

    #[test]
    fn test_in_range_selection() {
        let t = table();
        assert_eq!(t.rate(&[2.5], &[methods(Previous, Null, Null)]).unwrap(), Some(20.0));
        assert_eq!(t.rate(&[2.5], &[methods(Next, Null, Null)]).unwrap(), Some(60.0));
        assert_eq!(t.rate(&[2.5], &[methods(Closest, Null, Null)]).unwrap(), Some(20.0));
        // tie goes to the upper row
        assert_eq!(t.rate(&[3.0], &[methods(Closest, Null, Null)]).unwrap(), Some(60.0));
        assert_eq!(t.rate(&[2.5], &[methods(Null, Null, Null)]).unwrap(), None);
        assert!(t.rate(&[2.5], &[methods(Error, Null, Null)]).is_err());
    }

    #[test]
    fn test_log_interpolation_falls_back_on_zero() {
        let t = RatingTable::from_pairs(&[(0.0, 0.0), (10.0, 100.0)]).unwrap();
        let y = t.rate(&[5.0], &[methods(Logarithmic, Null, Null)]).unwrap();
        assert_eq!(y, Some(50.0));
    }

    #[test]
    fn test_offset_log_interpolation() {
        let t = RatingTable::from_pairs(&[(15.0, 1.0), (105.0, 100.0)]).unwrap();
        let x = 5.0 + 10f64.powf(1.5);
        let y = t
            .rate_with_offset(x, &methods(Logarithmic, Null, Null), 5.0)
            .unwrap()
            .unwrap();
        assert!((y - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_two_parameter_table() {
        let low = RatingTable::from_pairs(&[(0.0, 0.0), (10.0, 100.0)]).unwrap();
        let high = RatingTable::from_pairs(&[(0.0, 0.0), (10.0, 200.0)]).unwrap();
        let t = RatingTable::new(vec![TableValue::table(1.0, low), TableValue::table(2.0, high)]).unwrap();
        assert_eq!(t.depth(), 2);
        let m = [LookupMethods::default(); 2];
        // halfway between sub-tables giving 50 and 100
        assert_eq!(t.rate(&[1.5, 5.0], &m).unwrap(), Some(75.0));
        assert!(matches!(t.rate(&[1.5], &m), Err(RatingError::Configuration(_))));
        assert!(matches!(t.reverse_rate(50.0, &m[0]), Err(RatingError::Unsupported(_))));
        assert_eq!(t.extents(), vec![[1.0, 2.0], [0.0, 10.0], [0.0, 200.0]]);
    }

    #[test]
    fn test_mixed_depth_rejected() {
        let sub = RatingTable::from_pairs(&[(0.0, 0.0)]).unwrap();
        let rows = vec![TableValue::value(1.0, 1.0), TableValue::table(2.0, sub)];
        assert!(RatingTable::new(rows).is_err());
    }

    #[test]
    fn test_reverse_lookup() {
        let t = table();
        let m = LookupMethods::default();
        assert_eq!(t.reverse_rate(15.0, &m).unwrap(), Some(1.5));
        assert_eq!(t.reverse_rate(60.0, &m).unwrap(), Some(4.0));
        assert_eq!(t.reverse_rate(5.0, &m).unwrap(), None);
        let m = methods(Linear, Linear, Linear);
        assert_eq!(t.reverse_rate(80.0, &m).unwrap(), Some(5.0));
    }

    #[test]
    fn test_reverse_decreasing_table() {
        let t = RatingTable::from_pairs(&[(0.0, 100.0), (10.0, 0.0)]).unwrap();
        let m = methods(Linear, Null, Null);
        assert_eq!(t.reverse_rate(25.0, &m).unwrap(), Some(7.5));
        assert_eq!(t.reverse_rate(150.0, &m).unwrap(), None);
    }

    #[test]
    fn test_reverse_non_monotonic() {
        let t = RatingTable::from_pairs(&[(0.0, 0.0), (1.0, 10.0), (2.0, 5.0)]).unwrap();
        assert!(matches!(
            t.reverse_rate(7.0, &LookupMethods::default()),
            Err(RatingError::Unsupported(_))
        ));
    }

    #[test]
    fn test_extents() {
        assert_eq!(table().extents(), vec![[1.0, 4.0], [10.0, 60.0]]);
    }

    #[test]
    fn test_from_csv() {
        let text = "stage,flow,note\n1.0, 10.0\n# measured\n2.0,20.0,rated\n";
        let t = RatingTable::from_csv(text).unwrap();
        assert_eq!(t.leaf_pairs().unwrap(), vec![(1.0, 10.0), (2.0, 20.0)]);
        assert_eq!(t.values()[1].note.as_deref(), Some("rated"));
        assert!(matches!(
            RatingTable::from_csv("1.0,10.0\nbad,2.0\n"),
            Err(RatingError::Codec(_))
        ));
    }
}
