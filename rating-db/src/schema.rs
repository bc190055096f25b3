//! SQL schema for the rating store.
//!
//! Applied as a single batch when the database is opened.

/// Returns the full SQL schema as a single batch string.
///
/// - `rating_specs`: one row per (office, specification) holding the
///   specification as JSON
/// - `ratings`: one row per concrete rating; header columns are plain values
///   so placeholders can be listed without touching `body`, which holds the
///   gzip-compressed JSON of the full rating
///
/// Identifiers compare case-insensitively, matching how rating sets compare
/// specification ids.
pub fn create_schema() -> &'static str {
    r#"
    CREATE TABLE IF NOT EXISTS rating_specs (
        office_id TEXT NOT NULL COLLATE NOCASE,
        spec_id TEXT NOT NULL COLLATE NOCASE,
        body TEXT NOT NULL,
        PRIMARY KEY (office_id, spec_id)
    );

    CREATE TABLE IF NOT EXISTS ratings (
        office_id TEXT NOT NULL COLLATE NOCASE,
        spec_id TEXT NOT NULL COLLATE NOCASE,
        effective_date INTEGER NOT NULL,
        create_date INTEGER NOT NULL,
        transition_start_date INTEGER,
        active INTEGER NOT NULL DEFAULT 1,
        units_id TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL,
        body BLOB NOT NULL,
        PRIMARY KEY (office_id, spec_id, effective_date)
    );
    CREATE INDEX IF NOT EXISTS idx_ratings_spec ON ratings(office_id, spec_id);
    CREATE INDEX IF NOT EXISTS idx_ratings_create ON ratings(create_date);
    "#
}
