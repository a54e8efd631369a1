use std::sync::{PoisonError, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;

/// Failure of a single document issuance request.
#[derive(Error, Debug)]
pub enum IssueError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(
        "Could not allocate a unique number for '{doc_type}' after {attempts} attempts \
         (last candidate {last_candidate})"
    )]
    ExhaustedRetries {
        doc_type: String,
        attempts: u32,
        last_candidate: String,
    },
}

impl IssueError {
    /// True when the request never reached storage.
    pub fn is_validation(&self) -> bool {
        matches!(self, IssueError::Validation(_))
    }
}

/// Extension trait for converting lock errors to StorageError.
pub trait LockResultExt<T> {
    /// Converts a lock error to a StorageError.
    fn map_lock_err(self) -> Result<T, StorageError>;
}

impl<'a, T> LockResultExt<RwLockReadGuard<'a, T>>
    for Result<RwLockReadGuard<'a, T>, PoisonError<RwLockReadGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<RwLockReadGuard<'a, T>, StorageError> {
        self.map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

impl<'a, T> LockResultExt<RwLockWriteGuard<'a, T>>
    for Result<RwLockWriteGuard<'a, T>, PoisonError<RwLockWriteGuard<'a, T>>>
{
    #[inline]
    fn map_lock_err(self) -> Result<RwLockWriteGuard<'a, T>, StorageError> {
        self.map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    /// The counter or document table could not be reached or written.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A document with the same number already exists, whatever its type.
    #[error("Number {number} already issued")]
    Conflict { number: String },

    #[error("Sequence not found: {0}")]
    SequenceNotFound(String),

    #[error("Sequence overflow: {0}")]
    SequenceOverflow(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Destination must not be empty")]
    EmptyDestination,

    #[error("Destination exceeds {max} characters")]
    DestinationTooLong { max: usize },

    #[error("Invalid issue date '{0}', expected DD/MM/YYYY")]
    InvalidIssueDate(String),

    #[error("Invalid filter date '{0}', expected YYYY-MM-DD")]
    InvalidFilterDate(String),

    #[error("Unknown document type: {0}")]
    UnknownDocumentType(String),

    #[error("Invalid document type key '{0}'")]
    InvalidTypeKey(String),

    #[error("Document type labels '{first}' and '{second}' both normalize to '{key}'")]
    DuplicateTypeKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("Counter value must be positive")]
    NonPositiveCounter,

    #[error("Year {0} is outside 1..=9999")]
    InvalidYear(i32),

    #[error("Malformed document number '{0}', expected NNN/YYYY")]
    MalformedNumber(String),
}
