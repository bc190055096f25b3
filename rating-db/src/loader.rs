//! Writing container text into the database.
//!
//! Input is the JSON container format from [`rating_core::container`]. Each
//! loaded rating becomes one row of `ratings` with a gzip-compressed body;
//! placeholders carry no data and are skipped.

use anyhow::bail;
use rating_core::container::compress;
use rating_core::RatingSetContainer;
use rating_utils::times::{format_millis, to_millis};
use rusqlite::{params, Connection, OptionalExtension};

use crate::Database;

/// Store every loaded rating in `text` inside one transaction.
///
/// Returns the number of ratings written.
pub(crate) fn store_text(conn: &Connection, text: &str, overwrite: bool, replace_base: bool) -> anyhow::Result<usize> {
    let container = RatingSetContainer::from_json(text)?;
    let spec = &container.spec;
    let spec_id = spec.spec_id();
    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT OR REPLACE INTO rating_specs (office_id, spec_id, body) VALUES (?1, ?2, ?3)",
        params![spec.office_id, spec_id, serde_json::to_string(spec)?],
    )?;
    if replace_base {
        let dropped = tx.execute(
            "DELETE FROM ratings WHERE office_id = ?1 AND spec_id = ?2",
            params![spec.office_id, spec_id],
        )?;
        log::debug!("loader: replaced {} stored ratings of {}", dropped, spec_id);
    }

    let mut count = 0usize;
    let mut skipped = 0usize;
    for rating in &container.ratings {
        if !rating.is_loaded() {
            skipped += 1;
            continue;
        }
        if !rating.spec_id.eq_ignore_ascii_case(&spec_id) {
            bail!("rating for {} does not belong to {}", rating.spec_id, spec_id);
        }
        let effective = rating.effective_millis();
        if !overwrite {
            let existing: Option<i64> = tx
                .query_row(
                    "SELECT effective_date FROM ratings
                     WHERE office_id = ?1 AND spec_id = ?2 AND effective_date = ?3",
                    params![spec.office_id, spec_id, effective],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                bail!(
                    "{} already has a rating effective {}",
                    spec_id,
                    format_millis(effective)
                );
            }
        }
        let body = compress(&serde_json::to_string(rating)?)?;
        tx.execute(
            "INSERT OR REPLACE INTO ratings
             (office_id, spec_id, effective_date, create_date, transition_start_date, active, units_id, kind, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                spec.office_id,
                spec_id,
                effective,
                to_millis(&rating.create_date),
                rating.transition_start_date.as_ref().map(to_millis),
                rating.active,
                rating.units_id,
                rating.body.kind(),
                body,
            ],
        )?;
        count += 1;
    }
    tx.commit()?;
    log::info!(
        "loader: stored {} ratings of {}, skipped {} placeholders",
        count,
        spec_id,
        skipped
    );
    Ok(count)
}

impl Database {
    /// Store container text. See [`rating_core::StoreSession::store_ratings_text`].
    pub fn store_ratings_text(&self, text: &str, overwrite: bool, replace_base: bool) -> anyhow::Result<usize> {
        let conn = self.lock()?;
        store_text(&conn, text, overwrite, replace_base)
    }

    /// Delete one stored rating. Returns whether it existed.
    pub fn delete_rating(&self, office_id: &str, spec_id: &str, effective_date: i64) -> anyhow::Result<bool> {
        let conn = self.lock()?;
        let n = conn.execute(
            "DELETE FROM ratings WHERE office_id = ?1 AND spec_id = ?2 AND effective_date = ?3",
            params![office_id, spec_id, effective_date],
        )?;
        log::info!(
            "loader: deleted {} rating(s) of {} effective {}",
            n,
            spec_id,
            format_millis(effective_date)
        );
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::*;
    use crate::Database;
    use rating_core::ConcreteRating;

    #[test]
    fn store_writes_one_row_per_loaded_rating() {
        let db = Database::new().unwrap();
        let placeholder = ConcreteRating::placeholder(&spec(), 300, 0);
        let n = db
            .store_ratings_text(&text(&[scaled(100, 0, 1.0), scaled(200, 0, 2.0), placeholder]), false, false)
            .unwrap();
        assert_eq!(n, 2);
        let rows = db.query_ratings("SWT", SPEC_ID).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.kind == "table" && r.active));
    }

    #[test]
    fn store_rejects_existing_without_overwrite() {
        let db = Database::new().unwrap();
        db.store_ratings_text(&text(&[scaled(100, 0, 1.0)]), false, false).unwrap();
        let err = db.store_ratings_text(&text(&[scaled(200, 0, 2.0), scaled(100, 0, 3.0)]), false, false);
        assert!(err.is_err());
        // the failed batch left nothing behind
        assert_eq!(db.query_ratings("SWT", SPEC_ID).unwrap().len(), 1);

        db.store_ratings_text(&text(&[scaled(100, 0, 3.0)]), true, false).unwrap();
        assert_eq!(db.query_ratings("SWT", SPEC_ID).unwrap().len(), 1);
    }

    #[test]
    fn store_replace_base_drops_history() {
        let db = Database::new().unwrap();
        db.store_ratings_text(&text(&[scaled(100, 0, 1.0), scaled(200, 0, 2.0)]), false, false)
            .unwrap();
        db.store_ratings_text(&text(&[scaled(300, 0, 3.0)]), false, true).unwrap();
        let rows = db.query_ratings("SWT", SPEC_ID).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].effective_date, "1970-01-01 00:00:00");
    }

    #[test]
    fn store_rejects_bad_text() {
        let db = Database::new().unwrap();
        assert!(db.store_ratings_text("not json", false, false).is_err());
    }

    #[test]
    fn delete_rating() {
        let db = Database::new().unwrap();
        db.store_ratings_text(&text(&[scaled(100, 0, 1.0)]), false, false).unwrap();
        assert!(db.delete_rating("SWT", SPEC_ID, 100).unwrap());
        assert!(!db.delete_rating("SWT", SPEC_ID, 100).unwrap());
    }
}
