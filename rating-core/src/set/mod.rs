//! The time-ordered index of concrete ratings for one rating specification.
//!
//! Every rating lives in `all`, keyed by effective date. `active` holds the keys
//! of the ratings that take part in resolution: flagged active and created
//! strictly before the set's as-of time. It is rebuilt from `all` after every
//! change, so it never refers to a rating that is not in `all`.

mod materialize;
mod resolve;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use rating_utils::times::{format_millis, now_millis};

use crate::container::RatingSetContainer;
use crate::error::{RatingError, Result};
use crate::method::RatingMethod;
use crate::observer::{Observers, RatingSetEvent, SubscriptionId};
use crate::rating::ConcreteRating;
use crate::spec::RatingSpec;
use crate::store::RatingStore;

pub use materialize::Materialized;

/// How much to read from the store when building a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Read every rating in full.
    Eager,
    /// Read only the headers; ratings are materialized when a query needs them.
    Lazy,
}

pub(crate) struct Inner {
    pub(crate) spec: RatingSpec,
    pub(crate) all: BTreeMap<i64, ConcreteRating>,
    pub(crate) active: BTreeSet<i64>,
    /// Pinned as-of time; `None` means "now" at each refresh.
    pub(crate) rating_time: Option<i64>,
    child_subscriptions: Vec<(Arc<Observers>, SubscriptionId)>,
    #[cfg(test)]
    pub(crate) bracket_searches: usize,
}

impl Inner {
    pub(crate) fn as_of(&self) -> i64 {
        self.rating_time.unwrap_or_else(now_millis)
    }

    pub(crate) fn loaded(&self, effective_date: i64) -> Result<&ConcreteRating> {
        self.all.get(&effective_date).ok_or_else(|| {
            RatingError::Configuration(format!(
                "no rating effective {} in {}",
                format_millis(effective_date),
                self.spec.spec_id()
            ))
        })
    }
}

/// Rejects a rating whose child rating sets repeat a specification already on
/// the path from the root.
fn check_acyclic(path: &mut Vec<String>, rating: &ConcreteRating) -> Result<()> {
    for child in rating.child_sets() {
        let inner = child.lock()?;
        let spec_id = inner.spec.spec_id();
        if path.iter().any(|p| p.eq_ignore_ascii_case(&spec_id)) {
            return Err(RatingError::Configuration(format!(
                "rating {} refers back to itself through {}",
                path.join(" -> "),
                spec_id
            )));
        }
        path.push(spec_id);
        for grandchild in inner.all.values() {
            check_acyclic(path, grandchild)?;
        }
        path.pop();
    }
    Ok(())
}

/// Checks a rating against the set it is joining.
pub(crate) fn validate(spec: &RatingSpec, rating: &ConcreteRating) -> Result<()> {
    let spec_id = spec.spec_id();
    if !rating.spec_id.eq_ignore_ascii_case(&spec_id) {
        return Err(RatingError::Configuration(format!(
            "rating for {} cannot join the set for {}",
            rating.spec_id, spec_id
        )));
    }
    if let Some(count) = rating.ind_param_count() {
        if count != spec.ind_param_count() {
            return Err(RatingError::Configuration(format!(
                "rating effective {} has {} independent parameters, {} expects {}",
                format_millis(rating.effective_date),
                count,
                spec_id,
                spec.ind_param_count()
            )));
        }
    }
    check_acyclic(&mut vec![spec_id], rating)
}

pub struct RatingSet {
    inner: Mutex<Inner>,
    observers: Arc<Observers>,
    store: Option<Arc<dyn RatingStore>>,
}

impl RatingSet {
    pub fn new(spec: RatingSpec) -> Self {
        Self::build(spec, None)
    }

    /// A set whose placeholders are materialized from `store`.
    pub fn with_store(spec: RatingSpec, store: Arc<dyn RatingStore>) -> Self {
        Self::build(spec, Some(store))
    }

    pub(crate) fn build(spec: RatingSpec, store: Option<Arc<dyn RatingStore>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                spec,
                all: BTreeMap::new(),
                active: BTreeSet::new(),
                rating_time: None,
                child_subscriptions: Vec::new(),
                #[cfg(test)]
                bracket_searches: 0,
            }),
            observers: Arc::new(Observers::new()),
            store,
        }
    }

    /// Read a set from the store, fully or as placeholders.
    ///
    /// `as_of` limits the set to ratings created by then and pins the set's
    /// rating time to it.
    pub fn from_store(
        store: Arc<dyn RatingStore>,
        office_id: &str,
        spec_id: &str,
        mode: LoadMode,
        as_of: Option<i64>,
    ) -> Result<Self> {
        let text = {
            let session = store.connect()?;
            match mode {
                LoadMode::Eager => session.fetch_ratings_text(spec_id, office_id, None, None, as_of)?,
                LoadMode::Lazy => session.fetch_rating_headers(spec_id, office_id, as_of)?,
            }
        };
        if text.trim().is_empty() {
            return Err(RatingError::Configuration(format!(
                "no ratings stored for {} at office {}",
                spec_id, office_id
            )));
        }
        let container = RatingSetContainer::from_json(&text)?;
        let set = Self::from_container_in(&container, Some(store))?;
        if as_of.is_some() {
            set.set_rating_time(as_of)?;
        }
        info!(
            "loaded {} ratings for {} ({:?})",
            set.rating_count()?,
            spec_id,
            mode
        );
        Ok(set)
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| RatingError::Poisoned)
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    pub fn spec(&self) -> Result<RatingSpec> {
        Ok(self.lock()?.spec.clone())
    }

    pub fn spec_id(&self) -> Result<String> {
        Ok(self.lock()?.spec.spec_id())
    }

    /// Change the time-axis in-range method and refresh.
    pub fn set_in_range_method(&self, method: RatingMethod) -> Result<()> {
        let mut inner = self.lock()?;
        inner.spec.in_range_method = method;
        self.refresh_locked(&mut inner)
    }

    pub fn rating_count(&self) -> Result<usize> {
        Ok(self.lock()?.all.len())
    }

    pub fn active_rating_count(&self) -> Result<usize> {
        Ok(self.lock()?.active.len())
    }

    /// Effective dates of every rating, ascending.
    pub fn effective_dates(&self) -> Result<Vec<i64>> {
        Ok(self.lock()?.all.keys().copied().collect())
    }

    /// Create dates of every rating, ascending.
    pub fn create_dates(&self) -> Result<Vec<i64>> {
        let mut dates: Vec<i64> = self.lock()?.all.values().map(|r| r.create_date).collect();
        dates.sort_unstable();
        Ok(dates)
    }

    pub fn active_effective_dates(&self) -> Result<Vec<i64>> {
        Ok(self.lock()?.active.iter().copied().collect())
    }

    /// Whether the rating at `effective_date` holds data; `None` if there is none.
    pub fn is_loaded(&self, effective_date: i64) -> Result<Option<bool>> {
        Ok(self.lock()?.all.get(&effective_date).map(ConcreteRating::is_loaded))
    }

    pub fn rating_time(&self) -> Result<Option<i64>> {
        Ok(self.lock()?.rating_time)
    }

    /// Pin the as-of time (`None` follows the clock) and refresh.
    pub fn set_rating_time(&self, rating_time: Option<i64>) -> Result<()> {
        let mut inner = self.lock()?;
        inner.rating_time = rating_time;
        self.refresh_locked(&mut inner)
    }

    pub fn observers(&self) -> Arc<Observers> {
        Arc::clone(&self.observers)
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&RatingSetEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Insert new ratings. Fails without changing the set if any effective
    /// date is already present or any rating does not fit the spec.
    pub fn add_ratings<I>(&self, ratings: I) -> Result<()>
    where
        I: IntoIterator<Item = ConcreteRating>,
    {
        let mut ratings: Vec<ConcreteRating> = ratings.into_iter().collect();
        if ratings.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock()?;
        let mut incoming = BTreeSet::new();
        for rating in &mut ratings {
            if inner.all.contains_key(&rating.effective_date) || !incoming.insert(rating.effective_date) {
                return Err(RatingError::DuplicateEffectiveDate(rating.effective_date));
            }
            validate(&inner.spec, rating)?;
            rating.apply_spec(&inner.spec)?;
        }
        let dates: Vec<i64> = incoming.into_iter().collect();
        for rating in ratings {
            inner.all.insert(rating.effective_date, rating);
        }
        debug!("added {} ratings to {}", dates.len(), inner.spec.spec_id());
        self.refresh_locked(&mut inner)?;
        self.observers.notify(&RatingSetEvent::Added { effective_dates: dates });
        Ok(())
    }

    /// Replace existing ratings at their effective dates.
    pub fn replace_ratings<I>(&self, ratings: I) -> Result<()>
    where
        I: IntoIterator<Item = ConcreteRating>,
    {
        let mut ratings: Vec<ConcreteRating> = ratings.into_iter().collect();
        let mut inner = self.lock()?;
        for rating in &mut ratings {
            if !inner.all.contains_key(&rating.effective_date) {
                return Err(RatingError::Configuration(format!(
                    "no rating effective {} to replace",
                    format_millis(rating.effective_date)
                )));
            }
            validate(&inner.spec, rating)?;
            rating.apply_spec(&inner.spec)?;
        }
        let dates: Vec<i64> = ratings.iter().map(|r| r.effective_date).collect();
        for rating in ratings {
            inner.all.insert(rating.effective_date, rating);
        }
        self.refresh_locked(&mut inner)?;
        self.observers.notify(&RatingSetEvent::Replaced { effective_dates: dates });
        Ok(())
    }

    pub fn remove_rating(&self, effective_date: i64) -> Result<ConcreteRating> {
        let mut inner = self.lock()?;
        let removed = inner.all.remove(&effective_date).ok_or_else(|| {
            RatingError::Configuration(format!(
                "no rating effective {} to remove",
                format_millis(effective_date)
            ))
        })?;
        self.refresh_locked(&mut inner)?;
        self.observers.notify(&RatingSetEvent::Removed {
            effective_dates: vec![effective_date],
        });
        Ok(removed)
    }

    pub fn remove_all_ratings(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let dates: Vec<i64> = inner.all.keys().copied().collect();
        inner.all.clear();
        self.refresh_locked(&mut inner)?;
        self.observers.notify(&RatingSetEvent::Removed { effective_dates: dates });
        Ok(())
    }

    /// Rebuild the active index and child subscriptions.
    pub fn refresh(&self) -> Result<()> {
        let mut inner = self.lock()?;
        self.refresh_locked(&mut inner)
    }

    pub(crate) fn refresh_locked(&self, inner: &mut Inner) -> Result<()> {
        let as_of = inner.as_of();
        inner.active = inner
            .all
            .values()
            .filter(|r| r.active && r.create_date < as_of)
            .map(|r| r.effective_date)
            .collect();
        self.resubscribe(inner)?;
        debug!(
            "refreshed {}: {} of {} ratings active as of {}",
            inner.spec.spec_id(),
            inner.active.len(),
            inner.all.len(),
            format_millis(as_of)
        );
        self.observers.notify(&RatingSetEvent::Refreshed);
        Ok(())
    }

    /// Forward every change of a child rating set to this set's observers.
    fn resubscribe(&self, inner: &mut Inner) -> Result<()> {
        for (observers, id) in inner.child_subscriptions.drain(..) {
            observers.unsubscribe(id);
        }
        let mut subscriptions = Vec::new();
        for rating in inner.all.values() {
            for child in rating.child_sets() {
                let spec_id = child.spec_id()?;
                let parent = Arc::downgrade(&self.observers);
                let child_observers = child.observers();
                let id = child_observers.subscribe(move |_| {
                    if let Some(parent) = parent.upgrade() {
                        parent.notify(&RatingSetEvent::SourceChanged {
                            spec_id: spec_id.clone(),
                        });
                    }
                });
                subscriptions.push((child_observers, id));
            }
        }
        inner.child_subscriptions = subscriptions;
        Ok(())
    }

    /// Materialize everything and save the set.
    pub fn store_to(&self, store: &dyn RatingStore, overwrite: bool) -> Result<()> {
        self.load_all()?;
        let container = self.to_container()?;
        let text = container.to_json()?;
        let session = store.connect()?;
        session.store_ratings_text(&text, overwrite, false)?;
        info!(
            "stored {} ratings for {}",
            container.ratings.len(),
            container.spec.spec_id()
        );
        Ok(())
    }
}

impl fmt::Debug for RatingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("RatingSet");
        if let Ok(inner) = self.inner.try_lock() {
            s.field("spec_id", &inner.spec.spec_id())
                .field("ratings", &inner.all.len())
                .field("active", &inner.active.len());
        }
        s.field("has_store", &self.store.is_some()).finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::container::RatingSetContainer;
    use crate::error::{RatingError, Result};
    use crate::method::RatingMethod;
    use crate::rating::{ConcreteRating, RatingBody, TableRating};
    use crate::spec::RatingSpec;
    use crate::store::{RatingStore, StoreSession};
    use crate::table::RatingTable;

    pub fn spec(in_range: RatingMethod, low: RatingMethod, high: RatingMethod) -> RatingSpec {
        RatingSpec::new("SWT", "KEYS", "Stage;Flow.Linear", "Production").with_methods(in_range, low, high)
    }

    /// Y = scale * X
    pub fn scaled(spec: &RatingSpec, effective_date: i64, scale: f64) -> ConcreteRating {
        let table = RatingTable::from_pairs(&[(0.0, 0.0), (1000.0, 1000.0 * scale)]).unwrap();
        ConcreteRating::for_spec(spec, effective_date, 0, RatingBody::Table(TableRating::new(table)))
    }

    /// Y = value for any X in range
    pub fn constant(spec: &RatingSpec, effective_date: i64, value: f64) -> ConcreteRating {
        let table = RatingTable::from_pairs(&[(0.0, value), (1000.0, value)]).unwrap();
        ConcreteRating::for_spec(spec, effective_date, 0, RatingBody::Table(TableRating::new(table)))
    }

    pub fn container_text(spec: &RatingSpec, ratings: &[ConcreteRating]) -> String {
        RatingSetContainer {
            spec: spec.clone(),
            ratings: ratings.iter().map(|r| r.to_container().unwrap()).collect(),
        }
        .to_json()
        .unwrap()
    }

    /// Serves canned container text keyed by (spec id, effective date).
    #[derive(Default)]
    pub struct MemoryStore {
        pub texts: Mutex<HashMap<(String, i64), String>>,
        pub fetches: AtomicUsize,
        pub releases: AtomicUsize,
        pub delay: Duration,
        pub fail: bool,
    }

    impl MemoryStore {
        pub fn serve(&self, spec: &RatingSpec, rating: ConcreteRating) {
            let key = (spec.spec_id(), rating.effective_date);
            let text = container_text(spec, &[rating]);
            self.texts.lock().unwrap().insert(key, text);
        }

        pub fn serve_text(&self, spec: &RatingSpec, effective_date: i64, text: &str) {
            self.texts
                .lock()
                .unwrap()
                .insert((spec.spec_id(), effective_date), text.to_string());
        }

        pub fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    pub struct MemorySession<'a> {
        store: &'a MemoryStore,
    }

    impl Drop for MemorySession<'_> {
        fn drop(&mut self) {
            self.store.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl StoreSession for MemorySession<'_> {
        fn fetch_ratings_text(
            &self,
            spec_id: &str,
            _office_id: &str,
            from: Option<i64>,
            _to: Option<i64>,
            _as_of: Option<i64>,
        ) -> Result<String> {
            self.store.fetches.fetch_add(1, Ordering::SeqCst);
            if !self.store.delay.is_zero() {
                std::thread::sleep(self.store.delay);
            }
            if self.store.fail {
                return Err(RatingError::store("connection reset"));
            }
            let key = (spec_id.to_string(), from.unwrap_or_default());
            Ok(self.store.texts.lock().unwrap().get(&key).cloned().unwrap_or_default())
        }

        fn fetch_rating_headers(&self, _spec_id: &str, _office_id: &str, _as_of: Option<i64>) -> Result<String> {
            Err(RatingError::Unsupported("headers".to_string()))
        }

        fn store_ratings_text(&self, _text: &str, _overwrite: bool, _replace_base: bool) -> Result<()> {
            Err(RatingError::Unsupported("store".to_string()))
        }
    }

    impl RatingStore for MemoryStore {
        fn connect(&self) -> Result<Box<dyn StoreSession + '_>> {
            Ok(Box::new(MemorySession { store: self }))
        }
    }

    pub fn shared(store: MemoryStore) -> Arc<MemoryStore> {
        Arc::new(store)
    }
}
