use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;

use crate::contracts::{
    DocumentRecord, DocumentStore, HistoryFilter, LockResultExt, NewDocument, SequenceRegistry,
    StorageError,
};
use crate::numbering::SequenceKey;
use crate::storage::sequence::AtomicCounter;

/// Process-local storage for tests and local development.
///
/// Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    sequences: DashMap<SequenceKey, Arc<AtomicCounter>>,
    documents: RwLock<DocumentTable>,
}

#[derive(Default)]
struct DocumentTable {
    /// Insertion order; the id of `rows[i]` is `i + 1`
    rows: Vec<DocumentRecord>,
    /// Issued numbers, across all series
    numbers: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.documents.read().map_lock_err()?.rows.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl SequenceRegistry for MemoryStore {
    async fn ensure(&self, key: &SequenceKey) -> Result<(), StorageError> {
        self.sequences
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AtomicCounter::new()));
        Ok(())
    }

    async fn next(&self, key: &SequenceKey) -> Result<u64, StorageError> {
        let counter = self
            .sequences
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StorageError::SequenceNotFound(key.to_string()))?;
        counter
            .next()
            .ok_or_else(|| StorageError::SequenceOverflow(key.to_string()))
    }

    async fn current(&self, key: &SequenceKey) -> Result<Option<u64>, StorageError> {
        Ok(self.sequences.get(key).map(|entry| entry.value().current()))
    }
}

impl DocumentStore for MemoryStore {
    async fn insert_unique(&self, document: &NewDocument) -> Result<DocumentRecord, StorageError> {
        let mut table = self.documents.write().map_lock_err()?;
        if table.numbers.contains(&document.number) {
            return Err(StorageError::Conflict {
                number: document.number.clone(),
            });
        }
        let record = DocumentRecord::from_new(table.rows.len() as u64 + 1, document);
        table.numbers.insert(document.number.clone());
        table.rows.push(record.clone());
        Ok(record)
    }

    async fn query_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<DocumentRecord>, StorageError> {
        let table = self.documents.read().map_lock_err()?;
        Ok(table
            .rows
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<DocumentRecord>, StorageError> {
        let table = self.documents.read().map_lock_err()?;
        Ok(table.rows.iter().find(|r| r.number == number).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::numbering::{Series, TypeKey};

    fn key(name: &str) -> SequenceKey {
        SequenceKey::new(Series::Type(TypeKey::parse(name).unwrap()), 2025).unwrap()
    }

    fn doc(series: &str, number: &str) -> NewDocument {
        NewDocument {
            doc_type: "Oficio".into(),
            type_key: "oficio".into(),
            series: series.into(),
            number: number.into(),
            destination: "Forum".into(),
            issue_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
        }
    }

    #[tokio::test]
    async fn next_requires_ensure() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.next(&key("oficio")).await,
            Err(StorageError::SequenceNotFound(_))
        ));
        assert_eq!(store.current(&key("oficio")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let store = MemoryStore::new();
        store.ensure(&key("oficio")).await.unwrap();
        assert_eq!(store.next(&key("oficio")).await.unwrap(), 1);
        store.ensure(&key("oficio")).await.unwrap();
        assert_eq!(store.next(&key("oficio")).await.unwrap(), 2);
        assert_eq!(store.current(&key("oficio")).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn duplicate_number_conflicts_without_overwrite() {
        let store = MemoryStore::new();
        store.insert_unique(&doc("oficio", "001/2025")).await.unwrap();

        let mut other = doc("oficio", "001/2025");
        other.destination = "Elsewhere".into();
        let err = store.insert_unique(&other).await.unwrap_err();
        assert!(err.is_conflict());

        let kept = store.find_by_number("001/2025").await.unwrap().unwrap();
        assert_eq!(kept.destination, "Forum");
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn same_number_in_other_series_conflicts() {
        let store = MemoryStore::new();
        store.insert_unique(&doc("oficio", "001/2025")).await.unwrap();

        let err = store
            .insert_unique(&doc("protocolo", "001/2025"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { ref number } if number == "001/2025"));

        store
            .insert_unique(&doc("protocolo", "002/2025"))
            .await
            .unwrap();
        assert_eq!(store.len().unwrap(), 2);
        let kept = store.find_by_number("001/2025").await.unwrap().unwrap();
        assert_eq!(kept.series, "oficio");
    }

    #[tokio::test]
    async fn history_is_newest_first_with_limit() {
        let store = MemoryStore::new();
        for n in ["001/2025", "002/2025", "003/2025"] {
            store.insert_unique(&doc("oficio", n)).await.unwrap();
        }
        let filter = HistoryFilter {
            limit: Some(2),
            ..Default::default()
        };
        let rows = store.query_history(&filter).await.unwrap();
        let numbers: Vec<_> = rows.iter().map(|r| r.number.as_str()).collect();
        assert_eq!(numbers, ["003/2025", "002/2025"]);
        assert_eq!(rows[0].id, 3);
    }
}
