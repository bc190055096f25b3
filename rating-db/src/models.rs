//! Query result models.
//!
//! All structs derive `Serialize` so the command layer can print them as JSON.

use serde::Serialize;

/// One stored specification with a summary of its ratings.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogEntry {
    pub office_id: String,
    pub spec_id: String,
    pub rating_count: i64,
    /// Earliest effective date ("YYYY-MM-DD HH:MM:SS" UTC), if any ratings are stored.
    pub first_effective: Option<String>,
    pub last_effective: Option<String>,
}

/// Header of one stored rating.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RatingRow {
    pub effective_date: String,
    pub create_date: String,
    pub transition_start_date: Option<String>,
    pub active: bool,
    /// Body variant (`table`, `usgs-stream`, ...).
    pub kind: String,
    pub units_id: String,
}
