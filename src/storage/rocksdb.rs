use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    Direction, ErrorKind, IteratorMode, Options, Transaction, TransactionDB,
    TransactionDBOptions,
};

use crate::config::RocksDbConfig;
use crate::contracts::{
    DocumentRecord, DocumentStore, HistoryFilter, NewDocument, SequenceRegistry, StorageError,
};
use crate::numbering::SequenceKey;

/// Key prefix for sequence counters
const SEQUENCE_PREFIX: &str = "seq";
/// Key prefix for document records
const DOCUMENT_PREFIX: &str = "doc";
/// Key prefix for the number uniqueness index
const NUMBER_PREFIX: &str = "num";
/// Last document id handed out
const LAST_ID_KEY: &str = "meta:last_id";

/// Embedded RocksDB storage for counters and documents.
///
/// Counter increments and document inserts run in pessimistic transactions:
/// `get_for_update` takes a row lock, so concurrent callers serialize on the
/// key being changed. Lock waits block the calling thread, so every operation
/// runs on tokio's blocking pool. The directory is locked by RocksDB, so one
/// process owns a store at a time.
pub struct RocksDbStore {
    db: Arc<TransactionDB>,
}

impl RocksDbStore {
    /// Opens or creates a store with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_with_config(&RocksDbConfig {
            data_dir: path.as_ref().to_path_buf(),
            ..RocksDbConfig::default()
        })
    }

    pub fn open_with_config(config: &RocksDbConfig) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let mut txn_opts = TransactionDBOptions::default();
        // Also bounds how long a caller waits behind a concurrent increment
        txn_opts.set_txn_lock_timeout(config.lock_timeout.as_millis() as i64);

        let db = TransactionDB::open(&opts, &txn_opts, &config.data_dir).map_err(map_rocks_err)?;
        tracing::info!(
            path = %config.data_dir.display(),
            lock_timeout_ms = config.lock_timeout.as_millis() as u64,
            "Opened RocksDB document store"
        );

        Ok(Self { db: Arc::new(db) })
    }

    /// Runs `f` against the database on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&TransactionDB) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StorageError::Unavailable(format!("RocksDB task failed: {}", e)))?
    }

    /// Format: seq:{series}:{year}
    fn sequence_key(key: &SequenceKey) -> String {
        format!("{}:{}:{}", SEQUENCE_PREFIX, key.series(), key.year())
    }

    /// Format: doc:{id_hex}, so byte order matches insertion order
    fn document_key(id: u64) -> String {
        format!("{}:{:016x}", DOCUMENT_PREFIX, id)
    }

    /// Format: num:{number}
    fn number_key(number: &str) -> String {
        format!("{}:{}", NUMBER_PREFIX, number)
    }

    fn serialize_record(record: &DocumentRecord) -> Result<Vec<u8>, StorageError> {
        bincode::serialize(record).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn deserialize_record(bytes: &[u8]) -> Result<DocumentRecord, StorageError> {
        bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    #[inline]
    fn parse_u64_be(bytes: &[u8]) -> Result<u64, StorageError> {
        bytes
            .try_into()
            .map(u64::from_be_bytes)
            .map_err(|_| StorageError::Serialization("Invalid u64 bytes".into()))
    }

    fn locked_u64(
        txn: &Transaction<'_, TransactionDB>,
        key: &str,
    ) -> Result<Option<u64>, StorageError> {
        txn.get_for_update(key.as_bytes(), true)
            .map_err(map_rocks_err)?
            .map(|bytes| Self::parse_u64_be(&bytes))
            .transpose()
    }

    fn get_u64(db: &TransactionDB, key: &str) -> Result<Option<u64>, StorageError> {
        db.get(key.as_bytes())
            .map_err(map_rocks_err)?
            .map(|bytes| Self::parse_u64_be(&bytes))
            .transpose()
    }

    fn get_record(db: &TransactionDB, id: u64) -> Result<Option<DocumentRecord>, StorageError> {
        db.get(Self::document_key(id).as_bytes())
            .map_err(map_rocks_err)?
            .map(|bytes| Self::deserialize_record(&bytes))
            .transpose()
    }

    fn insert_blocking(
        db: &TransactionDB,
        document: &NewDocument,
    ) -> Result<DocumentRecord, StorageError> {
        let number_key = Self::number_key(&document.number);
        let txn = db.transaction();

        // Lock order is always number index, then id counter
        if txn
            .get_for_update(number_key.as_bytes(), true)
            .map_err(map_rocks_err)?
            .is_some()
        {
            txn.rollback().map_err(map_rocks_err)?;
            return Err(StorageError::Conflict {
                number: document.number.clone(),
            });
        }

        let id = Self::locked_u64(&txn, LAST_ID_KEY)?.unwrap_or(0) + 1;
        let record = DocumentRecord::from_new(id, document);

        txn.put(
            Self::document_key(id).as_bytes(),
            Self::serialize_record(&record)?,
        )
        .map_err(map_rocks_err)?;
        txn.put(number_key.as_bytes(), id.to_be_bytes())
            .map_err(map_rocks_err)?;
        txn.put(LAST_ID_KEY.as_bytes(), id.to_be_bytes())
            .map_err(map_rocks_err)?;
        txn.commit().map_err(map_rocks_err)?;

        Ok(record)
    }

    fn history_blocking(
        db: &TransactionDB,
        filter: &HistoryFilter,
    ) -> Result<Vec<DocumentRecord>, StorageError> {
        let prefix = format!("{}:", DOCUMENT_PREFIX);
        // ';' sorts right after ':', so this seeks to the last document key
        let upper = format!("{};", DOCUMENT_PREFIX);
        let limit = filter.limit.unwrap_or(usize::MAX);

        let mut records = Vec::new();
        for item in db.iterator(IteratorMode::From(upper.as_bytes(), Direction::Reverse)) {
            if records.len() >= limit {
                break;
            }
            let (key, value) = item.map_err(map_rocks_err)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let record = Self::deserialize_record(&value)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }

        Ok(records)
    }
}

/// Lock waits and busy errors mean the store could not serve the request in
/// time; everything else is an I/O or corruption problem.
fn map_rocks_err(e: rocksdb::Error) -> StorageError {
    match e.kind() {
        ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
            StorageError::Unavailable(format!("RocksDB lock wait: {}", e))
        }
        ErrorKind::Corruption => StorageError::InvariantViolation(format!("RocksDB: {}", e)),
        _ => StorageError::Unavailable(format!("RocksDB: {}", e)),
    }
}

impl SequenceRegistry for RocksDbStore {
    async fn ensure(&self, key: &SequenceKey) -> Result<(), StorageError> {
        let key = key.clone();
        self.blocking(move |db| {
            let db_key = Self::sequence_key(&key);
            let txn = db.transaction();
            if Self::locked_u64(&txn, &db_key)?.is_none() {
                txn.put(db_key.as_bytes(), 0u64.to_be_bytes())
                    .map_err(map_rocks_err)?;
                tracing::debug!(sequence = %key, "Created sequence counter");
            }
            txn.commit().map_err(map_rocks_err)
        })
        .await
    }

    async fn next(&self, key: &SequenceKey) -> Result<u64, StorageError> {
        let key = key.clone();
        self.blocking(move |db| {
            let db_key = Self::sequence_key(&key);
            let txn = db.transaction();
            let current = Self::locked_u64(&txn, &db_key)?
                .ok_or_else(|| StorageError::SequenceNotFound(key.to_string()))?;
            let next = current
                .checked_add(1)
                .ok_or_else(|| StorageError::SequenceOverflow(key.to_string()))?;
            txn.put(db_key.as_bytes(), next.to_be_bytes())
                .map_err(map_rocks_err)?;
            txn.commit().map_err(map_rocks_err)?;
            Ok(next)
        })
        .await
    }

    async fn current(&self, key: &SequenceKey) -> Result<Option<u64>, StorageError> {
        let db_key = Self::sequence_key(key);
        self.blocking(move |db| Self::get_u64(db, &db_key)).await
    }
}

impl DocumentStore for RocksDbStore {
    async fn insert_unique(&self, document: &NewDocument) -> Result<DocumentRecord, StorageError> {
        let document = document.clone();
        self.blocking(move |db| Self::insert_blocking(db, &document))
            .await
    }

    async fn query_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<DocumentRecord>, StorageError> {
        let filter = filter.clone();
        self.blocking(move |db| Self::history_blocking(db, &filter))
            .await
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<DocumentRecord>, StorageError> {
        let number_key = Self::number_key(number);
        self.blocking(move |db| {
            let Some(id) = Self::get_u64(db, &number_key)? else {
                return Ok(None);
            };
            match Self::get_record(db, id)? {
                Some(record) => Ok(Some(record)),
                None => Err(StorageError::InvariantViolation(format!(
                    "number index points at missing document {}",
                    id
                ))),
            }
        })
        .await
    }
}
