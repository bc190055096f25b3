//! JSON container format for rating sets, the text exchanged with a backing
//! store, plus the gzip form used for stored bodies.

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rating_utils::times;
use serde::{Deserialize, Serialize};

use crate::error::{RatingError, Result};
use crate::rating::{ConcreteRating, ExpressionRating, RatingBody, TableRating};
use crate::set::RatingSet;
use crate::source::SourceRating;
use crate::spec::RatingSpec;
use crate::store::RatingStore;
use crate::table::{RatingTable, TableDep, TableValue};
use crate::transitional::TransitionalRating;
use crate::usgs::UsgsStreamRating;
use crate::virtual_rating::VirtualRating;

fn default_active() -> bool {
    true
}

/// One table row: a dependent value, or a sub-table over the next parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub ind: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dep: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<TableRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SourceContainer {
    Expression { formula: String },
    Ratings { set: RatingSetContainer },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BodyContainer {
    Unloaded,
    Table {
        values: Vec<TableRow>,
    },
    Expression {
        formula: String,
    },
    UsgsStream {
        values: Vec<TableRow>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shifts: Option<RatingSetContainer>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        offsets: Option<Vec<TableRow>>,
    },
    Virtual {
        connections: String,
        sources: Vec<SourceContainer>,
    },
    Transitional {
        conditions: Vec<String>,
        evaluations: Vec<String>,
        #[serde(default)]
        sources: Vec<SourceContainer>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingContainer {
    pub office_id: String,
    pub spec_id: String,
    #[serde(default)]
    pub units_id: String,
    pub effective_date: DateTime<Utc>,
    pub create_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_start_date: Option<DateTime<Utc>>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub body: BodyContainer,
}

impl BodyContainer {
    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            BodyContainer::Unloaded => "unloaded",
            BodyContainer::Table { .. } => "table",
            BodyContainer::Expression { .. } => "expression",
            BodyContainer::UsgsStream { .. } => "usgs-stream",
            BodyContainer::Virtual { .. } => "virtual",
            BodyContainer::Transitional { .. } => "transitional",
        }
    }
}

impl RatingContainer {
    pub fn effective_millis(&self) -> i64 {
        times::to_millis(&self.effective_date)
    }

    pub fn is_loaded(&self) -> bool {
        self.body != BodyContainer::Unloaded
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSetContainer {
    pub spec: RatingSpec,
    #[serde(default)]
    pub ratings: Vec<RatingContainer>,
}

impl RatingSetContainer {
    pub fn new(spec: RatingSpec) -> Self {
        Self {
            spec,
            ratings: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_compressed(&self) -> Result<Vec<u8>> {
        compress(&self.to_json()?)
    }

    pub fn from_compressed(bytes: &[u8]) -> Result<Self> {
        Self::from_json(&decompress(bytes)?)
    }
}

pub fn compress(text: &str) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(text.as_bytes())
        .map_err(|e| RatingError::Codec(e.to_string()))?;
    encoder.finish().map_err(|e| RatingError::Codec(e.to_string()))
}

pub fn decompress(bytes: &[u8]) -> Result<String> {
    let mut text = String::new();
    GzDecoder::new(bytes)
        .read_to_string(&mut text)
        .map_err(|e| RatingError::Codec(e.to_string()))?;
    Ok(text)
}

fn to_utc(millis: i64) -> Result<DateTime<Utc>> {
    times::from_millis(millis).map_err(|e| RatingError::Codec(e.to_string()))
}

fn table_from_rows(rows: &[TableRow]) -> Result<RatingTable> {
    let values = rows
        .iter()
        .map(|row| {
            let dep = match (&row.dep, &row.values) {
                (Some(v), None) => TableDep::Value(*v),
                (None, Some(sub)) => TableDep::Table(table_from_rows(sub)?),
                _ => {
                    return Err(RatingError::Codec(format!(
                        "table row at {} needs exactly one of 'dep' or 'values'",
                        row.ind
                    )))
                }
            };
            Ok(TableValue {
                ind: row.ind,
                dep,
                note: row.note.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    RatingTable::new(values)
}

fn rows_from_table(table: &RatingTable) -> Vec<TableRow> {
    table
        .values()
        .iter()
        .map(|v| {
            let (dep, values) = match &v.dep {
                TableDep::Value(d) => (Some(*d), None),
                TableDep::Table(sub) => (None, Some(rows_from_table(sub))),
            };
            TableRow {
                ind: v.ind,
                dep,
                values,
                note: v.note.clone(),
            }
        })
        .collect()
}

fn sources_from_containers(
    sources: &[SourceContainer],
    store: &Option<Arc<dyn RatingStore>>,
) -> Result<Vec<SourceRating>> {
    sources
        .iter()
        .map(|s| match s {
            SourceContainer::Expression { formula } => SourceRating::expression(formula),
            SourceContainer::Ratings { set } => {
                Ok(SourceRating::Ratings(RatingSet::from_container_in(set, store.clone())?))
            }
        })
        .collect()
}

fn sources_to_containers(sources: &[SourceRating]) -> Result<Vec<SourceContainer>> {
    sources
        .iter()
        .map(|s| match s {
            SourceRating::Expression(e) => Ok(SourceContainer::Expression {
                formula: e.text().to_string(),
            }),
            SourceRating::Ratings(set) => Ok(SourceContainer::Ratings {
                set: set.to_container()?,
            }),
        })
        .collect()
}

impl ConcreteRating {
    /// Decode one rating. Child rating sets share `store` so they can
    /// materialize their own placeholders.
    pub fn from_container(
        container: &RatingContainer,
        ind_param_count: usize,
        store: Option<Arc<dyn RatingStore>>,
    ) -> Result<Self> {
        let body = match &container.body {
            BodyContainer::Unloaded => RatingBody::Unloaded,
            BodyContainer::Table { values } => RatingBody::Table(TableRating::new(table_from_rows(values)?)),
            BodyContainer::Expression { formula } => {
                RatingBody::Expression(ExpressionRating::new(formula, ind_param_count)?)
            }
            BodyContainer::UsgsStream {
                values,
                shifts,
                offsets,
            } => {
                let mut rating = UsgsStreamRating::new(table_from_rows(values)?)?;
                if let Some(shifts) = shifts {
                    rating = rating.with_shifts(RatingSet::from_container_in(shifts, store.clone())?);
                }
                if let Some(offsets) = offsets {
                    rating = rating.with_offsets(table_from_rows(offsets)?);
                }
                RatingBody::UsgsStream(rating)
            }
            BodyContainer::Virtual {
                connections,
                sources,
            } => RatingBody::Virtual(VirtualRating::new(
                connections,
                sources_from_containers(sources, &store)?,
                ind_param_count,
            )?),
            BodyContainer::Transitional {
                conditions,
                evaluations,
                sources,
            } => {
                let conditions: Vec<&str> = conditions.iter().map(String::as_str).collect();
                let evaluations: Vec<&str> = evaluations.iter().map(String::as_str).collect();
                RatingBody::Transitional(TransitionalRating::new(
                    &conditions,
                    &evaluations,
                    sources_from_containers(sources, &store)?,
                    ind_param_count,
                )?)
            }
        };
        Ok(Self {
            office_id: container.office_id.clone(),
            spec_id: container.spec_id.clone(),
            units_id: container.units_id.clone(),
            effective_date: times::to_millis(&container.effective_date),
            create_date: times::to_millis(&container.create_date),
            transition_start_date: container.transition_start_date.as_ref().map(times::to_millis),
            active: container.active,
            description: container.description.clone(),
            body,
        })
    }

    pub fn to_container(&self) -> Result<RatingContainer> {
        let body = match &self.body {
            RatingBody::Unloaded => BodyContainer::Unloaded,
            RatingBody::Table(t) => BodyContainer::Table {
                values: rows_from_table(&t.table),
            },
            RatingBody::Expression(e) => BodyContainer::Expression {
                formula: e.expression.text().to_string(),
            },
            RatingBody::UsgsStream(u) => BodyContainer::UsgsStream {
                values: rows_from_table(&u.table),
                shifts: u.shifts.as_ref().map(RatingSet::to_container).transpose()?,
                offsets: u.offsets.as_ref().map(rows_from_table),
            },
            RatingBody::Virtual(v) => BodyContainer::Virtual {
                connections: v.connections().text().to_string(),
                sources: sources_to_containers(v.sources())?,
            },
            RatingBody::Transitional(t) => BodyContainer::Transitional {
                conditions: t.conditions().iter().map(|e| e.text().to_string()).collect(),
                evaluations: t.evaluations().iter().map(|e| e.text().to_string()).collect(),
                sources: sources_to_containers(t.sources())?,
            },
        };
        Ok(RatingContainer {
            office_id: self.office_id.clone(),
            spec_id: self.spec_id.clone(),
            units_id: self.units_id.clone(),
            effective_date: to_utc(self.effective_date)?,
            create_date: to_utc(self.create_date)?,
            transition_start_date: self.transition_start_date.map(to_utc).transpose()?,
            active: self.active,
            description: self.description.clone(),
            body,
        })
    }
}

impl RatingSet {
    /// Build a set, without a backing store, from decoded container data.
    pub fn from_container(container: &RatingSetContainer) -> Result<Self> {
        Self::from_container_in(container, None)
    }

    pub(crate) fn from_container_in(
        container: &RatingSetContainer,
        store: Option<Arc<dyn RatingStore>>,
    ) -> Result<Self> {
        let count = container.spec.ind_param_count();
        let ratings = container
            .ratings
            .iter()
            .map(|r| ConcreteRating::from_container(r, count, store.clone()))
            .collect::<Result<Vec<_>>>()?;
        let set = RatingSet::build(container.spec.clone(), store);
        set.add_ratings(ratings)?;
        Ok(set)
    }

    /// Snapshot of the whole set, placeholders included.
    pub fn to_container(&self) -> Result<RatingSetContainer> {
        let inner = self.lock()?;
        Ok(RatingSetContainer {
            spec: inner.spec.clone(),
            ratings: inner
                .all
                .values()
                .map(ConcreteRating::to_container)
                .collect::<Result<Vec<_>>>()?,
        })
    }
}
