//! On-demand loading of placeholder ratings.

use log::{debug, warn};
use rating_utils::times::format_millis;

use super::{validate, Inner, RatingSet};
use crate::container::RatingSetContainer;
use crate::error::{RatingError, Result};
use crate::observer::RatingSetEvent;
use crate::rating::ConcreteRating;

/// Outcome of materializing one rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// The rating holds data (possibly it already did).
    Loaded,
    /// The store had nothing usable; the rating was removed from the set.
    Pruned,
}

impl RatingSet {
    /// Make sure the rating at `effective_date` holds data.
    pub fn materialize(&self, effective_date: i64) -> Result<Materialized> {
        let mut inner = self.lock()?;
        self.materialize_locked(&mut inner, effective_date)
    }

    /// Materialize every active rating. Returns how many hold data afterwards.
    pub fn load_all(&self) -> Result<usize> {
        let mut inner = self.lock()?;
        let keys: Vec<i64> = inner.active.iter().copied().collect();
        let mut loaded = 0;
        for key in keys {
            if self.materialize_locked(&mut inner, key)? == Materialized::Loaded {
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Runs with the set's lock held, so concurrent callers asking for the same
    /// placeholder wait for the first fetch instead of repeating it.
    pub(crate) fn materialize_locked(&self, inner: &mut Inner, key: i64) -> Result<Materialized> {
        let (spec_id, office_id) = match inner.all.get(&key) {
            Some(rating) if rating.is_loaded() => return Ok(Materialized::Loaded),
            Some(rating) => (rating.spec_id.clone(), rating.office_id.clone()),
            None => {
                return Err(RatingError::Configuration(format!(
                    "no rating effective {} in {}",
                    format_millis(key),
                    inner.spec.spec_id()
                )))
            }
        };
        let store = self.store.as_ref().ok_or_else(|| {
            RatingError::Configuration(format!(
                "rating {} effective {} is not loaded and the set has no store",
                spec_id,
                format_millis(key)
            ))
        })?;

        debug!("materializing {} effective {}", spec_id, format_millis(key));
        let text = {
            let session = store.connect()?;
            session.fetch_ratings_text(&spec_id, &office_id, Some(key), Some(key), Some(inner.as_of()))?
        };

        match self.decode(inner, &text, key) {
            Ok(rating) => {
                inner.all.insert(key, rating);
                self.refresh_locked(inner)?;
                self.observers
                    .notify(&RatingSetEvent::Materialized { effective_date: key });
                Ok(Materialized::Loaded)
            }
            Err(err @ (RatingError::Store(_) | RatingError::Poisoned)) => Err(err),
            Err(err) => {
                warn!(
                    "pruning {} effective {}: {}",
                    spec_id,
                    format_millis(key),
                    err
                );
                inner.all.remove(&key);
                self.refresh_locked(inner)?;
                self.observers
                    .notify(&RatingSetEvent::Pruned { effective_date: key });
                Ok(Materialized::Pruned)
            }
        }
    }

    fn decode(&self, inner: &Inner, text: &str, key: i64) -> Result<ConcreteRating> {
        let unusable = |reason: &str| RatingError::MaterializationData {
            effective_date: key,
            reason: reason.to_string(),
        };
        if text.trim().is_empty() {
            return Err(unusable("the store returned no data"));
        }
        let container = RatingSetContainer::from_json(text)?;
        let found = container
            .ratings
            .iter()
            .find(|r| r.effective_millis() == key && r.is_loaded())
            .ok_or_else(|| unusable("the store returned no loaded rating at this date"))?;
        let mut rating = ConcreteRating::from_container(found, inner.spec.ind_param_count(), self.store.clone())?;
        validate(&inner.spec, &rating)?;
        rating.apply_spec(&inner.spec)?;
        Ok(rating)
    }
}
