//! Contract for the backing store that ratings are fetched from and saved to.
//!
//! Rating data crosses this boundary as container text (see
//! [`crate::container`]). Times are epoch milliseconds.

use crate::error::Result;

/// One checked-out connection to the store.
///
/// Implementations release the underlying resource when the session is dropped,
/// so every exit path of a caller gives it back.
pub trait StoreSession {
    /// Full ratings of one specification with effective dates in
    /// `[from, to]` (unbounded where `None`) and created at or before `as_of`.
    ///
    /// Returns empty text when nothing is stored.
    fn fetch_ratings_text(
        &self,
        spec_id: &str,
        office_id: &str,
        from: Option<i64>,
        to: Option<i64>,
        as_of: Option<i64>,
    ) -> Result<String>;

    /// Like [`fetch_ratings_text`](Self::fetch_ratings_text) over all dates,
    /// but every rating is an unloaded placeholder.
    fn fetch_rating_headers(&self, spec_id: &str, office_id: &str, as_of: Option<i64>) -> Result<String>;

    /// Save container text. With `overwrite` false an existing rating at the
    /// same effective date is an error; `replace_base` first drops every stored
    /// rating of the specification.
    fn store_ratings_text(&self, text: &str, overwrite: bool, replace_base: bool) -> Result<()>;
}

pub trait RatingStore: Send + Sync {
    fn connect(&self) -> Result<Box<dyn StoreSession + '_>>;
}
