//! Store a rating history, reopen it lazily, and check that tables are only
//! fetched when a query needs them.

use std::sync::{Arc, Mutex};

use rating_core::{
    ConcreteRating, LoadMode, RatingBody, RatingSet, RatingSetEvent, RatingSpec, RatingStore, RatingTable,
    TableRating,
};
use rating_db::Database;

const SPEC_ID: &str = "KEYS.Stage;Flow.Linear.Production";

fn spec() -> RatingSpec {
    RatingSpec::new("SWT", "KEYS", "Stage;Flow.Linear", "Production")
}

fn scaled(effective_date: i64, scale: f64) -> ConcreteRating {
    let table = RatingTable::from_pairs(&[(0.0, 0.0), (1000.0, 1000.0 * scale)]).unwrap();
    ConcreteRating::for_spec(&spec(), effective_date, 0, RatingBody::Table(TableRating::new(table)))
}

fn stored() -> Database {
    let db = Database::new().unwrap();
    let set = RatingSet::new(spec());
    set.add_ratings(vec![scaled(100, 1.0), scaled(200, 2.0), scaled(300, 3.0)])
        .unwrap();
    set.store_to(&db, false).unwrap();
    db
}

#[test]
fn lazy_set_materializes_on_demand() {
    let db = stored();
    let store: Arc<dyn RatingStore> = Arc::new(db);
    let set = RatingSet::from_store(store, "SWT", SPEC_ID, LoadMode::Lazy, None).unwrap();
    assert_eq!(set.effective_dates().unwrap(), vec![100, 200, 300]);
    assert_eq!(set.is_loaded(100).unwrap(), Some(false));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    set.subscribe(move |e| sink.lock().unwrap().push(e.clone()));

    assert_eq!(set.rate(&[150], &[[10.0]]).unwrap(), vec![Some(15.0)]);
    assert_eq!(set.is_loaded(100).unwrap(), Some(true));
    assert_eq!(set.is_loaded(200).unwrap(), Some(true));
    assert_eq!(set.is_loaded(300).unwrap(), Some(false));

    let materialized = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, RatingSetEvent::Materialized { .. }))
        .count();
    assert_eq!(materialized, 2);

    assert_eq!(set.reverse_rate(&[300], &[30.0]).unwrap(), vec![Some(10.0)]);
}

#[test]
fn eager_set_is_fully_loaded() {
    let db = stored();
    let set = RatingSet::from_store(Arc::new(db), "SWT", SPEC_ID, LoadMode::Eager, None).unwrap();
    for date in [100, 200, 300] {
        assert_eq!(set.is_loaded(date).unwrap(), Some(true));
    }
    assert_eq!(set.rating_extents(Some(250)).unwrap(), vec![[0.0, 1000.0], [0.0, 2000.0]]);
}

#[test]
fn deleted_rating_is_pruned_on_use() {
    let db = stored();
    let set = RatingSet::from_store(Arc::new(db.clone()), "SWT", SPEC_ID, LoadMode::Lazy, None).unwrap();
    assert!(db.delete_rating("SWT", SPEC_ID, 200).unwrap());

    // 250 now falls between 100 and 300
    assert_eq!(set.rate_one(250, &[10.0]).unwrap(), Some(25.0));
    assert_eq!(set.effective_dates().unwrap(), vec![100, 300]);
}

#[test]
fn unreadable_rating_is_pruned_on_use() {
    let path = std::env::temp_dir().join(format!("rating-db-unreadable-{}.sqlite", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let db = Database::open(&path).unwrap();
    let set = RatingSet::new(spec());
    set.add_ratings(vec![scaled(100, 1.0), scaled(200, 2.0), scaled(300, 3.0)])
        .unwrap();
    set.store_to(&db, false).unwrap();
    rusqlite::Connection::open(&path)
        .unwrap()
        .execute("UPDATE ratings SET body = x'00010203' WHERE effective_date = 200", [])
        .unwrap();

    let set = RatingSet::from_store(Arc::new(db), "SWT", SPEC_ID, LoadMode::Lazy, None).unwrap();
    assert_eq!(set.rate_one(250, &[10.0]).unwrap(), Some(25.0));
    assert_eq!(set.effective_dates().unwrap(), vec![100, 300]);
    drop(set);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn unknown_spec_fails_to_load() {
    let db = Database::new().unwrap();
    assert!(RatingSet::from_store(Arc::new(db), "SWT", SPEC_ID, LoadMode::Lazy, None).is_err());
}

#[test]
fn store_to_twice_needs_overwrite() {
    let db = stored();
    let set = RatingSet::from_store(Arc::new(db.clone()), "SWT", SPEC_ID, LoadMode::Lazy, None).unwrap();
    assert!(set.store_to(&db, false).is_err());
    set.store_to(&db, true).unwrap();
    assert_eq!(db.query_ratings("SWT", SPEC_ID).unwrap().len(), 3);
}
