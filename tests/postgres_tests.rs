//! PostgreSQL backend tests.
//!
//! Skipped unless `DOCNUM_TEST_PG_HOST` is set. The remaining connection
//! settings use the `DOCNUM_TEST_PG_` prefix in place of `DOCNUM_PG_`, e.g.
//!
//! ```text
//! DOCNUM_TEST_PG_HOST=localhost DOCNUM_TEST_PG_USER=postgres \
//! DOCNUM_TEST_PG_PASSWORD=postgres DOCNUM_TEST_PG_DATABASE=docnum_test \
//! DOCNUM_TEST_PG_SSLMODE=disable cargo test --test postgres_tests
//! ```
//!
//! Numbers are unique across the whole documents table, so each test works in
//! its own freshly created schema and never sees rows from other tests or
//! earlier runs.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;

use docnum::config::{AllocatorConfig, NumberingScope, PostgresConfig};
use docnum::contracts::{DocumentStore, NewDocument, SequenceRegistry, StorageError};
use docnum::numbering::{Allocator, DocumentTypeCatalog, FixedClock, SequenceKey, Series, TypeKey};
use docnum::storage::PostgresStore;

fn nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos()
}

/// Connection settings pointing at a schema no other test run uses.
fn test_config(prefix: &str) -> Option<PostgresConfig> {
    std::env::var("DOCNUM_TEST_PG_HOST").ok()?;
    let mut config = PostgresConfig::from_lookup(|var| {
        std::env::var(var.replacen("DOCNUM_PG_", "DOCNUM_TEST_PG_", 1)).ok()
    })
    .expect("DOCNUM_TEST_PG_* settings are incomplete");
    config.schema = Some(format!(
        "docnum_test_{}_{}",
        prefix.to_ascii_lowercase(),
        nanos() % 1_000_000_000_000
    ));
    Some(config)
}

async fn setup(prefix: &str) -> Option<(Arc<PostgresStore>, Arc<DocumentTypeCatalog>, String)> {
    let config = test_config(prefix)?;
    let store = Arc::new(PostgresStore::connect(&config).await.unwrap());
    let label = format!("{} Report", prefix);
    let catalog = Arc::new(DocumentTypeCatalog::with_extra([label.as_str()]).unwrap());
    Some((store, catalog, label))
}

fn allocator(
    store: &Arc<PostgresStore>,
    catalog: &Arc<DocumentTypeCatalog>,
) -> Allocator<PostgresStore, PostgresStore, FixedClock> {
    Allocator::new(
        Arc::clone(store),
        Arc::clone(store),
        Arc::clone(catalog),
        AllocatorConfig {
            max_attempts: 5,
            scope: NumberingScope::PerType,
        },
    )
    .with_clock(FixedClock(NaiveDate::from_ymd_opt(2025, 3, 15).unwrap()))
}

#[tokio::test]
async fn sequence_lifecycle() {
    let Some((store, _catalog, label)) = setup("Seq").await else {
        return;
    };
    let key = SequenceKey::new(Series::Type(TypeKey::from_label(&label).unwrap()), 2025).unwrap();

    assert_eq!(store.current(&key).await.unwrap(), None);
    assert!(matches!(
        store.next(&key).await,
        Err(StorageError::SequenceNotFound(_))
    ));

    store.ensure(&key).await.unwrap();
    store.ensure(&key).await.unwrap();
    assert_eq!(store.current(&key).await.unwrap(), Some(0));
    assert_eq!(store.next(&key).await.unwrap(), 1);
    assert_eq!(store.next(&key).await.unwrap(), 2);
    assert_eq!(store.current(&key).await.unwrap(), Some(2));
}

#[tokio::test]
async fn duplicate_number_is_a_conflict() {
    let Some((store, _catalog, label)) = setup("Dup").await else {
        return;
    };
    let key = TypeKey::from_label(&label).unwrap();
    let document = NewDocument {
        doc_type: label.clone(),
        type_key: key.to_string(),
        series: key.to_string(),
        number: "001/2025".into(),
        destination: "Forum".into(),
        issue_date: NaiveDate::from_ymd_opt(2025, 3, 15).unwrap(),
    };

    let first = store.insert_unique(&document).await.unwrap();
    let err = store.insert_unique(&document).await.unwrap_err();
    assert!(err.is_conflict());

    let mut other_type = document.clone();
    other_type.doc_type = "Oficio".into();
    other_type.type_key = "oficio".into();
    other_type.series = "oficio".into();
    let err = store.insert_unique(&other_type).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict { ref number } if number == "001/2025"));

    let found = store
        .find_by_number(&document.number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found, first);
}

#[tokio::test]
async fn allocator_numbers_sequentially() {
    let Some((store, catalog, label)) = setup("Alloc").await else {
        return;
    };
    let allocator = allocator(&store, &catalog);

    for expected in ["001/2025", "002/2025", "003/2025"] {
        let issued = allocator.issue_and_save(&label, "Forum", None).await.unwrap();
        assert_eq!(issued.number.to_string(), expected);
    }

    let history = allocator.history(Some(&label), None, None).await.unwrap();
    let numbers: Vec<&str> = history.iter().map(|r| r.number.as_str()).collect();
    assert_eq!(numbers, ["003/2025", "002/2025", "001/2025"]);
}

#[tokio::test]
async fn other_type_retries_past_taken_numbers() {
    let Some((store, catalog, label)) = setup("Mixed").await else {
        return;
    };
    let allocator = allocator(&store, &catalog);

    allocator.issue_and_save("Oficio", "A", None).await.unwrap();
    let issued = allocator.issue_and_save(&label, "B", None).await.unwrap();
    assert_eq!(issued.number.to_string(), "002/2025");
    assert_eq!(issued.attempts, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_issues_are_unique() {
    let Some((store, catalog, label)) = setup("Conc").await else {
        return;
    };
    let allocator = Arc::new(allocator(&store, &catalog));

    let handles: Vec<_> = (0..8)
        .map(|task| {
            let allocator = Arc::clone(&allocator);
            let label = label.clone();
            tokio::spawn(async move {
                let mut numbers = Vec::new();
                for i in 0..10 {
                    let issued = allocator
                        .issue_and_save(&label, &format!("task-{}-{}", task, i), None)
                        .await
                        .unwrap();
                    numbers.push(issued.record.number);
                }
                numbers
            })
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for number in handle.await.unwrap() {
            assert!(all.insert(number), "duplicate number issued");
        }
    }
    assert_eq!(all.len(), 80);
}
