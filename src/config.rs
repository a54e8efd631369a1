//! Environment-driven configuration.
//!
//! Every struct reads its variables through a lookup closure so tests can
//! feed a map instead of mutating the process environment. Unset variables
//! take their defaults; a value that is set but unparseable is an error.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Reads `var` and parses it, falling back to `default` when unset or empty.
pub(crate) fn parse_or<T, F>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

pub(crate) fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Which storage backend holds counters and documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    Postgres,
    #[default]
    RocksDb,
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "rocksdb" => Ok(Self::RocksDb),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// PostgreSQL TLS negotiation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    Disable,
    Allow,
    Prefer,
    #[default]
    Require,
    VerifyCa,
    VerifyFull,
}

impl FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "allow" => Ok(Self::Allow),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(format!("unknown sslmode '{}'", other)),
        }
    }
}

/// PostgreSQL connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: SslMode,
    /// Upper bound on establishing or acquiring a connection.
    pub connect_timeout: Duration,
    pub max_connections: u32,
    /// Schema holding the table and sequences; `None` uses the server's
    /// search path.
    pub schema: Option<String>,
}

impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout", &self.connect_timeout)
            .field("max_connections", &self.max_connections)
            .field("schema", &self.schema)
            .finish()
    }
}

impl PostgresConfig {
    /// Reads:
    /// - `DOCNUM_PG_HOST` (default: localhost)
    /// - `DOCNUM_PG_PORT` (default: 5432)
    /// - `DOCNUM_PG_USER`, `DOCNUM_PG_PASSWORD`, `DOCNUM_PG_DATABASE` (required)
    /// - `DOCNUM_PG_SSLMODE` (default: require)
    /// - `DOCNUM_PG_CONNECT_TIMEOUT_SECS` (default: 10)
    /// - `DOCNUM_PG_MAX_CONNECTIONS` (default: 4)
    /// - `DOCNUM_PG_SCHEMA` (optional; `[a-z0-9_]`, created on connect)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let connect_timeout_secs: u64 = parse_or(&lookup, "DOCNUM_PG_CONNECT_TIMEOUT_SECS", 10)?;
        if connect_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "DOCNUM_PG_CONNECT_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        let max_connections: u32 = parse_or(&lookup, "DOCNUM_PG_MAX_CONNECTIONS", 4)?;
        if max_connections == 0 {
            return Err(ConfigError::Invalid {
                var: "DOCNUM_PG_MAX_CONNECTIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let schema = lookup("DOCNUM_PG_SCHEMA")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty());
        if let Some(raw) = &schema {
            let valid = raw.starts_with(|c: char| c.is_ascii_lowercase())
                && raw
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
                && raw.len() <= 63;
            if !valid {
                return Err(ConfigError::Invalid {
                    var: "DOCNUM_PG_SCHEMA",
                    value: raw.clone(),
                    reason: "expected [a-z][a-z0-9_]*, at most 63 bytes".into(),
                });
            }
        }

        Ok(Self {
            host: parse_or(&lookup, "DOCNUM_PG_HOST", "localhost".to_string())?,
            port: parse_or(&lookup, "DOCNUM_PG_PORT", 5432)?,
            user: required(&lookup, "DOCNUM_PG_USER")?,
            password: required(&lookup, "DOCNUM_PG_PASSWORD")?,
            database: required(&lookup, "DOCNUM_PG_DATABASE")?,
            ssl_mode: parse_or(&lookup, "DOCNUM_PG_SSLMODE", SslMode::default())?,
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            max_connections,
            schema,
        })
    }
}

/// Embedded RocksDB settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RocksDbConfig {
    pub data_dir: PathBuf,
    /// How long a transaction waits for a row lock before giving up.
    pub lock_timeout: Duration,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_secs(10),
        }
    }
}

impl RocksDbConfig {
    /// Reads `DOCNUM_DATA_DIR` (default: ./data) and
    /// `DOCNUM_LOCK_TIMEOUT_MS` (default: 10000).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let default = Self::default();
        let lock_timeout_ms: u64 = parse_or(
            &lookup,
            "DOCNUM_LOCK_TIMEOUT_MS",
            default.lock_timeout.as_millis() as u64,
        )?;
        Ok(Self {
            data_dir: parse_or(&lookup, "DOCNUM_DATA_DIR", default.data_dir)?,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
        })
    }
}

/// How counters are shared between document types.
///
/// Either way a number is unique across the whole document table. Under
/// `PerType` two types can draw the same candidate; the second insert
/// conflicts and the allocator moves on to that type's next value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberingScope {
    /// One counter per document type and year.
    #[default]
    PerType,
    /// One counter per year for all types; candidates never collide.
    Shared,
}

impl FromStr for NumberingScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "per_type" | "per-type" => Ok(Self::PerType),
            "shared" => Ok(Self::Shared),
            other => Err(format!("unknown numbering scope '{}'", other)),
        }
    }
}

/// Allocation policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Candidates tried before giving up with `ExhaustedRetries`.
    pub max_attempts: u32,
    pub scope: NumberingScope,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            scope: NumberingScope::default(),
        }
    }
}

impl AllocatorConfig {
    /// Reads `DOCNUM_MAX_ATTEMPTS` (default: 5) and
    /// `DOCNUM_NUMBERING_SCOPE` (default: per_type).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let default = Self::default();
        let max_attempts: u32 = parse_or(&lookup, "DOCNUM_MAX_ATTEMPTS", default.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "DOCNUM_MAX_ATTEMPTS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(Self {
            max_attempts,
            scope: parse_or(&lookup, "DOCNUM_NUMBERING_SCOPE", default.scope)?,
        })
    }
}

/// Storage selection plus backend settings.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Postgres(PostgresConfig),
    RocksDb(RocksDbConfig),
    Memory,
}

impl BackendConfig {
    /// Startup warning for backends that cannot be shared between server
    /// processes.
    pub fn single_process_warning(&self) -> Option<&'static str> {
        match self {
            BackendConfig::Postgres(_) => None,
            BackendConfig::RocksDb(_) => Some(
                "RocksDB storage is embedded and locked to this process; \
                 use DOCNUM_BACKEND=postgres to run more than one instance",
            ),
            BackendConfig::Memory => Some("Using in-memory storage; issued numbers are lost on exit"),
        }
    }
}

/// Everything the server binary needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub allocator: AllocatorConfig,
    /// Labels accepted in addition to the built-in catalog.
    pub extra_document_types: Vec<String>,
}

impl AppConfig {
    /// Reads `DOCNUM_BACKEND` (default: rocksdb), the selected backend's
    /// variables, the allocator variables and `DOCNUM_EXTRA_DOCUMENT_TYPES`
    /// (comma-separated labels).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let backend = match parse_or(&lookup, "DOCNUM_BACKEND", BackendKind::default())? {
            BackendKind::Postgres => BackendConfig::Postgres(PostgresConfig::from_lookup(&lookup)?),
            BackendKind::RocksDb => BackendConfig::RocksDb(RocksDbConfig::from_lookup(&lookup)?),
            BackendKind::Memory => BackendConfig::Memory,
        };
        let extra_document_types = lookup("DOCNUM_EXTRA_DOCUMENT_TYPES")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            backend,
            allocator: AllocatorConfig::from_lookup(&lookup)?,
            extra_document_types,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_select_rocksdb() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        match &config.backend {
            BackendConfig::RocksDb(rocks) => {
                assert_eq!(rocks.data_dir, PathBuf::from("./data"));
                assert_eq!(rocks.lock_timeout, Duration::from_secs(10));
            }
            other => panic!("unexpected backend {:?}", other),
        }
        assert_eq!(config.allocator, AllocatorConfig::default());
        assert!(config.extra_document_types.is_empty());
        assert!(config
            .backend
            .single_process_warning()
            .is_some_and(|w| w.contains("DOCNUM_BACKEND=postgres")));
    }

    #[test]
    fn only_postgres_starts_without_a_warning() {
        let postgres = AppConfig::from_lookup(lookup(&[
            ("DOCNUM_BACKEND", "postgres"),
            ("DOCNUM_PG_USER", "u"),
            ("DOCNUM_PG_PASSWORD", "p"),
            ("DOCNUM_PG_DATABASE", "d"),
        ]))
        .unwrap();
        assert_eq!(postgres.backend.single_process_warning(), None);

        let memory = AppConfig::from_lookup(lookup(&[("DOCNUM_BACKEND", "memory")])).unwrap();
        assert!(memory.backend.single_process_warning().is_some());
    }

    #[test]
    fn postgres_schema_must_be_a_plain_identifier() {
        let base = [
            ("DOCNUM_PG_USER", "u"),
            ("DOCNUM_PG_PASSWORD", "p"),
            ("DOCNUM_PG_DATABASE", "d"),
        ];

        let unset = PostgresConfig::from_lookup(lookup(&base)).unwrap();
        assert_eq!(unset.schema, None);

        let mut pairs = base.to_vec();
        pairs.push(("DOCNUM_PG_SCHEMA", "docnum_test_1"));
        let set = PostgresConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(set.schema.as_deref(), Some("docnum_test_1"));

        for bad in ["Public", "1abc", "a\"b", "a-b"] {
            let mut pairs = base.to_vec();
            pairs.push(("DOCNUM_PG_SCHEMA", bad));
            assert!(matches!(
                PostgresConfig::from_lookup(lookup(&pairs)),
                Err(ConfigError::Invalid {
                    var: "DOCNUM_PG_SCHEMA",
                    ..
                })
            ));
        }
    }

    #[test]
    fn postgres_requires_credentials() {
        let err = AppConfig::from_lookup(lookup(&[("DOCNUM_BACKEND", "postgres")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DOCNUM_PG_USER"));
    }

    #[test]
    fn postgres_reads_all_fields() {
        let config = PostgresConfig::from_lookup(lookup(&[
            ("DOCNUM_PG_HOST", "db.internal"),
            ("DOCNUM_PG_PORT", "6543"),
            ("DOCNUM_PG_USER", "registry"),
            ("DOCNUM_PG_PASSWORD", "secret"),
            ("DOCNUM_PG_DATABASE", "documents"),
            ("DOCNUM_PG_SSLMODE", "verify-full"),
            ("DOCNUM_PG_CONNECT_TIMEOUT_SECS", "3"),
        ]))
        .unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.ssl_mode, SslMode::VerifyFull);
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.max_connections, 4);
    }

    #[test]
    fn debug_output_hides_password() {
        let config = PostgresConfig::from_lookup(lookup(&[
            ("DOCNUM_PG_USER", "u"),
            ("DOCNUM_PG_PASSWORD", "hunter2"),
            ("DOCNUM_PG_DATABASE", "d"),
        ]))
        .unwrap();
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn invalid_values_are_errors_not_defaults() {
        let err = AllocatorConfig::from_lookup(lookup(&[("DOCNUM_MAX_ATTEMPTS", "many")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "DOCNUM_MAX_ATTEMPTS",
                ..
            }
        ));
        assert!(AllocatorConfig::from_lookup(lookup(&[("DOCNUM_MAX_ATTEMPTS", "0")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("DOCNUM_BACKEND", "mysql")])).is_err());
        assert!(PostgresConfig::from_lookup(lookup(&[
            ("DOCNUM_PG_USER", "u"),
            ("DOCNUM_PG_PASSWORD", "p"),
            ("DOCNUM_PG_DATABASE", "d"),
            ("DOCNUM_PG_SSLMODE", "sometimes"),
        ]))
        .is_err());
    }

    #[test]
    fn scope_and_extra_types_are_read() {
        let config = AppConfig::from_lookup(lookup(&[
            ("DOCNUM_BACKEND", "memory"),
            ("DOCNUM_NUMBERING_SCOPE", "shared"),
            ("DOCNUM_EXTRA_DOCUMENT_TYPES", "Memorando, Certidao ,,"),
        ]))
        .unwrap();
        assert!(matches!(config.backend, BackendConfig::Memory));
        assert_eq!(config.allocator.scope, NumberingScope::Shared);
        assert_eq!(config.extra_document_types, ["Memorando", "Certidao"]);
    }
}
