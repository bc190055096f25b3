use serde::{Deserialize, Serialize};

use crate::method::{LookupMethods, RatingMethod};

fn default_in_range() -> RatingMethod {
    RatingMethod::Linear
}

fn default_out_range() -> RatingMethod {
    RatingMethod::Nearest
}

/// Identity and lookup policy shared by every concrete rating of a set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSpec {
    pub office_id: String,
    pub location_id: String,
    /// Parameters and template version, e.g. `Stage;Flow.USGS-EXSA`.
    pub template_id: String,
    pub version: String,
    /// Time-axis method between two effective dates.
    #[serde(default = "default_in_range")]
    pub in_range_method: RatingMethod,
    /// Time-axis method before the earliest effective date.
    #[serde(default = "default_out_range")]
    pub out_range_low_method: RatingMethod,
    /// Time-axis method after the latest effective date.
    #[serde(default = "default_out_range")]
    pub out_range_high_method: RatingMethod,
    /// Value-axis methods, one entry per independent parameter.
    #[serde(default)]
    pub lookup: Vec<LookupMethods>,
    #[serde(default)]
    pub ind_rounding: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dep_rounding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RatingSpec {
    pub fn new(office_id: &str, location_id: &str, template_id: &str, version: &str) -> Self {
        Self {
            office_id: office_id.to_string(),
            location_id: location_id.to_string(),
            template_id: template_id.to_string(),
            version: version.to_string(),
            in_range_method: default_in_range(),
            out_range_low_method: default_out_range(),
            out_range_high_method: default_out_range(),
            lookup: Vec::new(),
            ind_rounding: Vec::new(),
            dep_rounding: None,
            description: None,
        }
    }

    /// Set the time-axis methods.
    pub fn with_methods(
        mut self,
        in_range: RatingMethod,
        out_range_low: RatingMethod,
        out_range_high: RatingMethod,
    ) -> Self {
        self.in_range_method = in_range;
        self.out_range_low_method = out_range_low;
        self.out_range_high_method = out_range_high;
        self
    }

    pub fn with_lookup(mut self, lookup: Vec<LookupMethods>) -> Self {
        self.lookup = lookup;
        self
    }

    /// `location.template.version`
    pub fn spec_id(&self) -> String {
        format!("{}.{}.{}", self.location_id, self.template_id, self.version)
    }

    /// The parameters part of the template id (`Stage;Flow`).
    pub fn parameters_id(&self) -> &str {
        self.template_id
            .split_once('.')
            .map_or(self.template_id.as_str(), |(params, _)| params)
    }

    pub fn ind_parameters(&self) -> Vec<&str> {
        match self.parameters_id().split_once(';') {
            Some((inds, _)) => inds.split(',').map(str::trim).collect(),
            None => Vec::new(),
        }
    }

    pub fn dep_parameter(&self) -> Option<&str> {
        self.parameters_id().split_once(';').map(|(_, dep)| dep.trim())
    }

    /// Number of independent parameters.
    pub fn ind_param_count(&self) -> usize {
        let inds = self.ind_parameters();
        if inds.is_empty() {
            self.lookup.len().max(1)
        } else {
            inds.len()
        }
    }

    /// Lookup methods for one value axis, defaulting when the spec has none.
    pub fn lookup_for(&self, axis: usize) -> LookupMethods {
        self.lookup.get(axis).copied().unwrap_or_default()
    }

    pub fn lookups(&self, axes: usize) -> Vec<LookupMethods> {
        (0..axes).map(|axis| self.lookup_for(axis)).collect()
    }
}
