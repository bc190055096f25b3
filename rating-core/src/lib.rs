//! Time-versioned rating sets.
//!
//! A [`RatingSet`] indexes the concrete ratings of one rating specification by
//! effective date and resolves `(time, inputs)` batches to rated values, or the
//! reverse. Concrete ratings may be placeholders that are materialized from a
//! [`RatingStore`] the first time a query needs them.
//!
//! ```rust
//! use rating_core::{ConcreteRating, RatingBody, RatingMethod, RatingSet, RatingSpec, RatingTable, TableRating};
//!
//! let spec = RatingSpec::new("SWT", "KEYS", "Stage;Flow.Standard", "Production")
//!     .with_methods(RatingMethod::Linear, RatingMethod::Error, RatingMethod::Linear);
//! let set = RatingSet::new(spec.clone());
//! let table = |scale: f64| {
//!     RatingTable::from_pairs(&[(0.0, 0.0), (100.0, 100.0 * scale)]).unwrap()
//! };
//! set.add_ratings(vec![
//!     ConcreteRating::for_spec(&spec, 100, 0, RatingBody::Table(TableRating::new(table(1.0)))),
//!     ConcreteRating::for_spec(&spec, 200, 0, RatingBody::Table(TableRating::new(table(2.0)))),
//! ])
//! .unwrap();
//!
//! let rated = set.rate(&[150], &[vec![10.0]]).unwrap();
//! assert_eq!(rated, vec![Some(15.0)]);
//! ```

pub mod container;
pub mod error;
pub mod expression;
pub mod method;
pub mod observer;
pub mod rating;
pub mod set;
pub mod source;
pub mod spec;
pub mod store;
pub mod table;
pub mod transitional;
pub mod usgs;
pub mod virtual_rating;

pub use container::{BodyContainer, RatingContainer, RatingSetContainer, SourceContainer, TableRow};
pub use error::{RatingError, Result};
pub use expression::{Expression, Variable};
pub use method::{LookupMethods, RatingMethod};
pub use observer::{Observers, RatingSetEvent, SubscriptionId};
pub use rating::{ConcreteRating, ExpressionRating, Rate, RatingBody, TableRating};
pub use set::{LoadMode, Materialized, RatingSet};
pub use source::SourceRating;
pub use spec::RatingSpec;
pub use store::{RatingStore, StoreSession};
pub use table::{RatingTable, TableDep, TableValue};
pub use transitional::TransitionalRating;
pub use usgs::UsgsStreamRating;
pub use virtual_rating::{ConnectionPoint, Connections, VirtualRating};
