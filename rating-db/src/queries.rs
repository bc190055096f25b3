//! Read queries: container text for the store contract, plus typed summaries
//! from [`crate::models`] for listing what is stored.

use rating_core::container::decompress;
use rating_core::{BodyContainer, RatingContainer, RatingSetContainer, RatingSpec};
use rating_utils::times::{format_millis, from_millis};
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{CatalogEntry, RatingRow};
use crate::Database;

fn stored_spec(conn: &Connection, spec_id: &str, office_id: &str) -> anyhow::Result<Option<RatingSpec>> {
    let body: Option<String> = conn
        .query_row(
            "SELECT body FROM rating_specs WHERE office_id = ?1 AND spec_id = ?2",
            params![office_id, spec_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(body.map(|b| serde_json::from_str(&b)).transpose()?)
}

fn decode_body(body: &[u8]) -> anyhow::Result<RatingContainer> {
    Ok(serde_json::from_str(&decompress(body)?)?)
}

/// Full ratings with effective dates in `[from, to]`, created at or before
/// `as_of`. Empty text when the specification is unknown.
pub(crate) fn ratings_text(
    conn: &Connection,
    spec_id: &str,
    office_id: &str,
    from: Option<i64>,
    to: Option<i64>,
    as_of: Option<i64>,
) -> anyhow::Result<String> {
    let Some(spec) = stored_spec(conn, spec_id, office_id)? else {
        return Ok(String::new());
    };
    let mut stmt = conn.prepare(
        "SELECT effective_date, body FROM ratings
         WHERE office_id = ?1 AND spec_id = ?2
           AND effective_date >= ?3 AND effective_date <= ?4
           AND create_date <= ?5
         ORDER BY effective_date",
    )?;
    let bodies = stmt
        .query_map(
            params![
                office_id,
                spec_id,
                from.unwrap_or(i64::MIN),
                to.unwrap_or(i64::MAX),
                as_of.unwrap_or(i64::MAX)
            ],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    let mut container = RatingSetContainer::new(spec);
    for (effective_date, body) in bodies {
        // an unreadable body is left out so the set prunes that rating
        match decode_body(&body) {
            Ok(rating) => container.ratings.push(rating),
            Err(e) => log::warn!(
                "skipping unreadable rating of {} effective {}: {:#}",
                spec_id,
                format_millis(effective_date),
                e
            ),
        }
    }
    log::debug!(
        "query: {} ratings of {} between {:?} and {:?}",
        container.ratings.len(),
        spec_id,
        from,
        to
    );
    Ok(container.to_json()?)
}

/// Every rating created at or before `as_of` as an unloaded placeholder.
pub(crate) fn headers_text(
    conn: &Connection,
    spec_id: &str,
    office_id: &str,
    as_of: Option<i64>,
) -> anyhow::Result<String> {
    let Some(spec) = stored_spec(conn, spec_id, office_id)? else {
        return Ok(String::new());
    };
    let mut stmt = conn.prepare(
        "SELECT effective_date, create_date, transition_start_date, active, units_id
         FROM ratings
         WHERE office_id = ?1 AND spec_id = ?2 AND create_date <= ?3
         ORDER BY effective_date",
    )?;
    let rows = stmt
        .query_map(params![office_id, spec_id, as_of.unwrap_or(i64::MAX)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, bool>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut container = RatingSetContainer::new(spec);
    for (effective, create, transition, active, units_id) in rows {
        container.ratings.push(RatingContainer {
            office_id: container.spec.office_id.clone(),
            spec_id: container.spec.spec_id(),
            units_id,
            effective_date: from_millis(effective)?,
            create_date: from_millis(create)?,
            transition_start_date: transition.map(from_millis).transpose()?,
            active,
            description: None,
            body: BodyContainer::Unloaded,
        });
    }
    log::debug!("query: {} rating headers of {}", container.ratings.len(), spec_id);
    Ok(container.to_json()?)
}

impl Database {
    /// Container text of the stored ratings. See
    /// [`rating_core::StoreSession::fetch_ratings_text`].
    pub fn fetch_ratings_text(
        &self,
        spec_id: &str,
        office_id: &str,
        from: Option<i64>,
        to: Option<i64>,
        as_of: Option<i64>,
    ) -> anyhow::Result<String> {
        let conn = self.lock()?;
        ratings_text(&conn, spec_id, office_id, from, to, as_of)
    }

    /// Every stored specification with its rating count and date range.
    pub fn query_catalog(&self) -> anyhow::Result<Vec<CatalogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT s.office_id, s.spec_id, COUNT(r.effective_date),
                    MIN(r.effective_date), MAX(r.effective_date)
             FROM rating_specs s
             LEFT JOIN ratings r ON r.office_id = s.office_id AND r.spec_id = s.spec_id
             GROUP BY s.office_id, s.spec_id
             ORDER BY s.office_id, s.spec_id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(CatalogEntry {
                    office_id: row.get(0)?,
                    spec_id: row.get(1)?,
                    rating_count: row.get(2)?,
                    first_effective: row.get::<_, Option<i64>>(3)?.map(format_millis),
                    last_effective: row.get::<_, Option<i64>>(4)?.map(format_millis),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("query: query_catalog returned {} specifications", rows.len());
        Ok(rows)
    }

    /// Headers of every stored rating of one specification, oldest first.
    pub fn query_ratings(&self, office_id: &str, spec_id: &str) -> anyhow::Result<Vec<RatingRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT effective_date, create_date, transition_start_date, active, kind, units_id
             FROM ratings
             WHERE office_id = ?1 AND spec_id = ?2
             ORDER BY effective_date",
        )?;
        let rows = stmt
            .query_map(params![office_id, spec_id], |row| {
                Ok(RatingRow {
                    effective_date: format_millis(row.get(0)?),
                    create_date: format_millis(row.get(1)?),
                    transition_start_date: row.get::<_, Option<i64>>(2)?.map(format_millis),
                    active: row.get(3)?,
                    kind: row.get(4)?,
                    units_id: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        log::info!("query: query_ratings returned {} ratings of {}", rows.len(), spec_id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn db_with(ratings: &[rating_core::ConcreteRating]) -> Database {
        let db = Database::new().unwrap();
        db.store_ratings_text(&text(ratings), false, false).unwrap();
        db
    }

    #[test]
    fn unknown_spec_is_empty_text() {
        let db = Database::new().unwrap();
        assert_eq!(db.fetch_ratings_text(SPEC_ID, "SWT", None, None, None).unwrap(), "");
    }

    #[test]
    fn fetch_filters_by_date_window() {
        let db = db_with(&[scaled(100, 0, 1.0), scaled(200, 0, 2.0), scaled(300, 0, 3.0)]);
        let text = db.fetch_ratings_text(SPEC_ID, "SWT", Some(150), Some(300), None).unwrap();
        let container = RatingSetContainer::from_json(&text).unwrap();
        let dates: Vec<i64> = container.ratings.iter().map(|r| r.effective_millis()).collect();
        assert_eq!(dates, vec![200, 300]);
        assert!(container.ratings.iter().all(|r| r.is_loaded()));
    }

    #[test]
    fn fetch_skips_unreadable_bodies() {
        let db = db_with(&[scaled(100, 0, 1.0), scaled(200, 0, 2.0), scaled(300, 0, 3.0)]);
        db.lock()
            .unwrap()
            .execute("UPDATE ratings SET body = x'00010203' WHERE effective_date = 200", [])
            .unwrap();
        let text = db.fetch_ratings_text(SPEC_ID, "SWT", None, None, None).unwrap();
        let container = RatingSetContainer::from_json(&text).unwrap();
        let dates: Vec<i64> = container.ratings.iter().map(|r| r.effective_millis()).collect();
        assert_eq!(dates, vec![100, 300]);

        let single = db.fetch_ratings_text(SPEC_ID, "SWT", Some(200), Some(200), None).unwrap();
        assert!(RatingSetContainer::from_json(&single).unwrap().ratings.is_empty());
    }

    #[test]
    fn fetch_ignores_identifier_case() {
        let db = db_with(&[scaled(100, 0, 1.0)]);
        let text = db
            .fetch_ratings_text(&SPEC_ID.to_uppercase(), "swt", None, None, None)
            .unwrap();
        assert_eq!(RatingSetContainer::from_json(&text).unwrap().ratings.len(), 1);
    }

    #[test]
    fn fetch_filters_by_creation() {
        let db = db_with(&[scaled(100, 10, 1.0), scaled(200, 50, 2.0)]);
        let text = db.fetch_ratings_text(SPEC_ID, "SWT", None, None, Some(20)).unwrap();
        assert_eq!(RatingSetContainer::from_json(&text).unwrap().ratings.len(), 1);
    }

    #[test]
    fn headers_are_placeholders() {
        let db = db_with(&[scaled(100, 10, 1.0), scaled(200, 50, 2.0).with_transition_start(150)]);
        let conn = db.lock().unwrap();
        let container = RatingSetContainer::from_json(&headers_text(&conn, SPEC_ID, "SWT", None).unwrap()).unwrap();
        assert_eq!(container.ratings.len(), 2);
        assert!(container.ratings.iter().all(|r| !r.is_loaded()));
        assert_eq!(
            container.ratings[1].transition_start_date.as_ref().map(rating_utils::times::to_millis),
            Some(150)
        );
        let early = headers_text(&conn, SPEC_ID, "SWT", Some(20)).unwrap();
        assert_eq!(RatingSetContainer::from_json(&early).unwrap().ratings.len(), 1);
    }

    #[test]
    fn catalog_summarizes_specs() {
        let db = db_with(&[scaled(100, 0, 1.0), scaled(200, 0, 2.0)]);
        let catalog = db.query_catalog().unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].spec_id, SPEC_ID);
        assert_eq!(catalog[0].rating_count, 2);
        assert_eq!(catalog[0].first_effective.as_deref(), Some("1970-01-01 00:00:00"));
    }
}
