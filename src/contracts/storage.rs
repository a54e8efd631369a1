use std::future::Future;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::contracts::error::StorageError;
use crate::numbering::TypeKey;

/// Durable table of issued documents.
///
/// # Invariants
/// - `number` is unique across the whole table, across all document types
///   and series
/// - Inserts never overwrite an existing row; a duplicate number is a
///   `StorageError::Conflict`
/// - Records are never mutated or deleted
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document, returning the stored record with its id.
    fn insert_unique(
        &self,
        document: &NewDocument,
    ) -> impl Future<Output = Result<DocumentRecord, StorageError>> + Send;

    /// Returns matching documents, newest first by insertion order.
    fn query_history(
        &self,
        filter: &HistoryFilter,
    ) -> impl Future<Output = Result<Vec<DocumentRecord>, StorageError>> + Send;

    /// Looks up a document by its number.
    fn find_by_number(
        &self,
        number: &str,
    ) -> impl Future<Output = Result<Option<DocumentRecord>, StorageError>> + Send;
}

/// A document ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    /// Canonical catalog label, e.g. "Carta Precatoria Expedida"
    pub doc_type: String,
    pub type_key: String,
    pub series: String,
    pub number: String,
    pub destination: String,
    pub issue_date: NaiveDate,
}

/// A persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: u64,
    pub doc_type: String,
    pub type_key: String,
    pub series: String,
    pub number: String,
    pub destination: String,
    /// Stored as `YYYY-MM-DD`
    pub issue_date: String,
}

impl DocumentRecord {
    pub fn from_new(id: u64, document: &NewDocument) -> Self {
        Self {
            id,
            doc_type: document.doc_type.clone(),
            type_key: document.type_key.clone(),
            series: document.series.clone(),
            number: document.number.clone(),
            destination: document.destination.clone(),
            issue_date: iso_date(document.issue_date),
        }
    }
}

/// History query parameters. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub type_key: Option<TypeKey>,
    pub issue_date: Option<NaiveDate>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn matches(&self, record: &DocumentRecord) -> bool {
        self.type_key
            .as_ref()
            .is_none_or(|k| k.as_str() == record.type_key)
            && self
                .issue_date
                .is_none_or(|d| iso_date(d) == record.issue_date)
    }
}

/// Formats a date the way the document table stores it.
pub fn iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
