use thiserror::Error;

use crate::method::RatingMethod;

#[derive(Error, Debug)]
pub enum RatingError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("A rating with effective date {0} already exists in the set")]
    DuplicateEffectiveDate(i64),

    #[error("No active ratings")]
    NoActiveRatings,

    #[error("Rating method {0} needs more than one active rating")]
    InsufficientRatingsForMethod(RatingMethod),

    #[error("{0}")]
    Policy(String),

    #[error("Unusable data for rating effective at {effective_date}: {reason}")]
    MaterializationData { effective_date: i64, reason: String },

    #[error("Backing store failure: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid expression: {0}")]
    Expression(String),

    #[error("Rating container error: {0}")]
    Codec(String),

    #[error("Rating set lock was poisoned by a panicking thread")]
    Poisoned,
}

impl RatingError {
    /// Wrap a store transport error.
    pub fn store<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        RatingError::Store(err.into())
    }
}

impl From<serde_json::Error> for RatingError {
    fn from(err: serde_json::Error) -> Self {
        RatingError::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RatingError>;
