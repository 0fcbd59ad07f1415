//! Error and outcome types shared by the store and the engine
//!
//! Store failures are errors. Missing or foreign-owned entities are not: they
//! come back as [`Outcome::NotFound`] so callers can render a normal
//! "unsuccessful" reply.

use thiserror::Error;

/// Error type for graph store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Query error: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("Pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("Incompatible schema: {0}")]
    Schema(String),
    #[error("Malformed record: {0}")]
    Malformed(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// What could not be resolved for the requesting author
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFound {
    #[error("project with id: {0} not found")]
    Project(String),
    #[error("box or pipeline with id: {0} not found")]
    Stage(String),
    #[error("pipeline with id: {0} not found")]
    Pipeline(String),
    #[error("box with id: {0} not found")]
    Box(String),
    #[error("task with id: {0} not found")]
    Task(String),
}

/// Result of an engine operation that may legitimately find nothing
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    NotFound(NotFound),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    /// The value, if the operation resolved everything it needed
    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::NotFound(_) => None,
        }
    }

    pub fn not_found(&self) -> Option<&NotFound> {
        match self {
            Outcome::Done(_) => None,
            Outcome::NotFound(missing) => Some(missing),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(value) => Outcome::Done(f(value)),
            Outcome::NotFound(missing) => Outcome::NotFound(missing),
        }
    }
}
