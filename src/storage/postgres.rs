//! PostgreSQL storage: native `SEQUENCE` objects for counters and a
//! `documents` table with a unique index on `number`.
//!
//! Safe to share between any number of processes. Sequence names are built
//! from [`SequenceKey::object_name`], which only yields `[a-z0-9_]`. With
//! `DOCNUM_PG_SCHEMA` set, the table and sequences live in that schema.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

use crate::config::{PostgresConfig, SslMode};
use crate::contracts::{
    iso_date, DocumentRecord, DocumentStore, HistoryFilter, NewDocument, SequenceRegistry,
    StorageError,
};
use crate::numbering::SequenceKey;

/// SQLSTATE for `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE for `undefined_table`, raised by `nextval` on a missing sequence
const UNDEFINED_TABLE: &str = "42P01";

const CREATE_DOCUMENTS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS documents (
    id BIGSERIAL PRIMARY KEY,
    doc_type TEXT NOT NULL,
    type_key TEXT NOT NULL,
    series TEXT NOT NULL,
    number TEXT NOT NULL,
    destination TEXT NOT NULL,
    issue_date TEXT NOT NULL
)";

const CREATE_NUMBER_INDEX: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS documents_number_key ON documents (number)";

const CREATE_TYPE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS documents_type_key_idx ON documents (type_key, id DESC)";

type RecordRow = (i64, String, String, String, String, String, String);

/// Shared PostgreSQL storage.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects and creates the schema if needed.
    ///
    /// Fails if no connection can be established within the configured
    /// timeout.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StorageError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(pg_ssl_mode(config.ssl_mode));
        let options = match &config.schema {
            Some(schema) => options.options([("search_path", schema.as_str())]),
            None => options,
        };

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options)
            .await
            .map_err(map_sqlx_err)?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            schema = config.schema.as_deref().unwrap_or("public"),
            "Connected to PostgreSQL"
        );

        let store = Self { pool };
        if let Some(schema) = &config.schema {
            // Validated by PostgresConfig to [a-z0-9_]
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema))
                .execute(&store.pool)
                .await
                .map_err(map_sqlx_err)?;
        }
        store.migrate().await?;
        Ok(store)
    }

    /// Wraps an existing pool. The schema is not touched.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the documents table and its indexes.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        for statement in [CREATE_DOCUMENTS_TABLE, CREATE_NUMBER_INDEX, CREATE_TYPE_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_err)?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

fn sqlstate(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn map_sqlx_err(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StorageError::Serialization(e.to_string())
        }
        _ => StorageError::Unavailable(e.to_string()),
    }
}

fn to_record(row: RecordRow) -> Result<DocumentRecord, StorageError> {
    let (id, doc_type, type_key, series, number, destination, issue_date) = row;
    let id = u64::try_from(id)
        .map_err(|_| StorageError::InvariantViolation(format!("negative document id {}", id)))?;
    Ok(DocumentRecord {
        id,
        doc_type,
        type_key,
        series,
        number,
        destination,
        issue_date,
    })
}

impl SequenceRegistry for PostgresStore {
    async fn ensure(&self, key: &SequenceKey) -> Result<(), StorageError> {
        // object_name() only yields [a-z0-9_]
        let sql = format!(
            "CREATE SEQUENCE IF NOT EXISTS \"{}\" START WITH 1 INCREMENT BY 1",
            key.object_name()
        );
        match sqlx::query(&sql).execute(&self.pool).await {
            Ok(_) => Ok(()),
            // Two sessions racing on IF NOT EXISTS: the loser trips the catalog's
            // unique index, but the sequence exists either way
            Err(e) if sqlstate(&e).as_deref() == Some(UNIQUE_VIOLATION) => {
                tracing::debug!(sequence = %key, "Sequence created concurrently");
                Ok(())
            }
            Err(e) => Err(map_sqlx_err(e)),
        }
    }

    async fn next(&self, key: &SequenceKey) -> Result<u64, StorageError> {
        let value: i64 = sqlx::query_scalar("SELECT nextval($1::regclass)")
            .bind(key.object_name())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match sqlstate(&e).as_deref() {
                Some(UNDEFINED_TABLE) => StorageError::SequenceNotFound(key.to_string()),
                // 2200H: sequence_generator_limit_exceeded
                Some("2200H") => StorageError::SequenceOverflow(key.to_string()),
                _ => map_sqlx_err(e),
            })?;
        u64::try_from(value).map_err(|_| {
            StorageError::InvariantViolation(format!("sequence {} returned {}", key, value))
        })
    }

    async fn current(&self, key: &SequenceKey) -> Result<Option<u64>, StorageError> {
        let row: Option<(Option<i64>,)> = sqlx::query_as(
            "SELECT last_value FROM pg_sequences \
             WHERE schemaname = current_schema() AND sequencename = $1",
        )
        .bind(key.object_name())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        // last_value stays NULL until the first nextval
        Ok(row.map(|(last,)| last.map_or(0, |v| v.max(0) as u64)))
    }
}

impl DocumentStore for PostgresStore {
    async fn insert_unique(&self, document: &NewDocument) -> Result<DocumentRecord, StorageError> {
        let result: Result<(i64,), sqlx::Error> = sqlx::query_as(
            "INSERT INTO documents (doc_type, type_key, series, number, destination, issue_date) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(&document.doc_type)
        .bind(&document.type_key)
        .bind(&document.series)
        .bind(&document.number)
        .bind(&document.destination)
        .bind(iso_date(document.issue_date))
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok((id,)) => {
                let id = u64::try_from(id).map_err(|_| {
                    StorageError::InvariantViolation(format!("negative document id {}", id))
                })?;
                Ok(DocumentRecord::from_new(id, document))
            }
            Err(e) if sqlstate(&e).as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StorageError::Conflict {
                    number: document.number.clone(),
                })
            }
            Err(e) => Err(map_sqlx_err(e)),
        }
    }

    async fn query_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<DocumentRecord>, StorageError> {
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(i64::MAX);

        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT id, doc_type, type_key, series, number, destination, issue_date \
             FROM documents \
             WHERE ($1::text IS NULL OR type_key = $1) \
               AND ($2::text IS NULL OR issue_date = $2) \
             ORDER BY id DESC \
             LIMIT $3",
        )
        .bind(filter.type_key.as_ref().map(|k| k.as_str().to_string()))
        .bind(filter.issue_date.map(iso_date))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(to_record).collect()
    }

    async fn find_by_number(&self, number: &str) -> Result<Option<DocumentRecord>, StorageError> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT id, doc_type, type_key, series, number, destination, issue_date \
             FROM documents WHERE number = $1",
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(to_record).transpose()
    }
}
