mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::config::{env_lookup, parse_or, ConfigError};
use crate::contracts::{DocumentStore, SequenceRegistry};
use crate::numbering::Clock;

pub use handlers::{
    ApiError, AppState, DocumentTypesResponse, DocumentView, ErrorResponse, HistoryQuery,
    HistoryResponse, IssueDocumentRequest, IssueDocumentResponse, DEFAULT_HISTORY_LIMIT,
};

/// Creates the API router.
pub fn create_router<R, D, C>(state: Arc<AppState<R, D, C>>) -> Router
where
    R: SequenceRegistry + 'static,
    D: DocumentStore + 'static,
    C: Clock + 'static,
{
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics::<R, D, C>))
        .route("/document-types", get(handlers::document_types::<R, D, C>))
        .route(
            "/documents",
            get(handlers::list_documents::<R, D, C>).post(handlers::issue_document::<R, D, C>),
        )
        .with_state(state)
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Reads `DOCNUM_HOST` and `DOCNUM_PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            host: parse_or(&lookup, "DOCNUM_HOST", default.host)?,
            port: parse_or(&lookup, "DOCNUM_PORT", default.port)?,
        })
    }
}

/// Starts the HTTP server.
pub async fn start_server<R, D, C, F>(
    config: ServerConfig,
    state: Arc<AppState<R, D, C>>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    R: SequenceRegistry + 'static,
    D: DocumentStore + 'static,
    C: Clock + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn server_port_must_parse() {
        let err = ServerConfig::from_lookup(|k| (k == "DOCNUM_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "DOCNUM_PORT", .. }));
    }
}
