//! Number allocation with bounded retry on conflict.
//!
//! One issuance walks a small state machine:
//!
//! ```text
//! Validating -> Allocating -> Inserting -> Success
//!                   ^             |
//!                   |             v
//!                   +-------- Retrying -> ExhaustedFailure
//! ```
//!
//! The counter only supplies candidates. The store's uniqueness constraint
//! decides which candidate wins, so no lock or transaction spans the two.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, NaiveDate};

use crate::config::{AllocatorConfig, NumberingScope};
use crate::contracts::{
    DocumentRecord, DocumentStore, HistoryFilter, IssueError, NewDocument, SequenceRegistry,
    StorageError, ValidationError,
};
use crate::metrics::IssueMetrics;
use crate::numbering::catalog::{DocumentType, DocumentTypeCatalog};
use crate::numbering::clock::{Clock, SystemClock};
use crate::numbering::format::DocumentNumber;
use crate::numbering::key::{SequenceKey, Series};

/// Longest destination accepted, in characters.
pub const MAX_DESTINATION_CHARS: usize = 500;

/// Most history rows returned by one query.
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Successful issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedDocument {
    pub number: DocumentNumber,
    pub record: DocumentRecord,
    /// Number of candidates tried, 1 when there was no conflict.
    pub attempts: u32,
}

/// Non-terminal states of the allocation loop.
#[derive(Debug)]
enum AllocationState {
    Allocating { attempt: u32 },
    Inserting { attempt: u32, number: DocumentNumber },
    Retrying { attempt: u32, rejected: DocumentNumber },
}

/// Terminal failures of the allocation loop.
#[derive(Debug)]
enum AllocationFailure {
    Storage(StorageError),
    Exhausted {
        attempts: u32,
        last_candidate: DocumentNumber,
    },
}

impl From<StorageError> for AllocationFailure {
    fn from(e: StorageError) -> Self {
        AllocationFailure::Storage(e)
    }
}

/// Validated request, ready for allocation.
struct IssueRequest<'a> {
    doc_type: &'a DocumentType,
    destination: String,
    issue_date: NaiveDate,
    sequence: SequenceKey,
}

/// Issues document numbers against a sequence registry and a document store.
pub struct Allocator<R, D, C = SystemClock> {
    registry: Arc<R>,
    store: Arc<D>,
    catalog: Arc<DocumentTypeCatalog>,
    clock: C,
    config: AllocatorConfig,
    metrics: Arc<IssueMetrics>,
}

impl<R, D> Allocator<R, D, SystemClock>
where
    R: SequenceRegistry,
    D: DocumentStore,
{
    pub fn new(
        registry: Arc<R>,
        store: Arc<D>,
        catalog: Arc<DocumentTypeCatalog>,
        config: AllocatorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            catalog,
            clock: SystemClock,
            config,
            metrics: Arc::new(IssueMetrics::default()),
        }
    }
}

impl<R, D, C> Allocator<R, D, C>
where
    R: SequenceRegistry,
    D: DocumentStore,
    C: Clock,
{
    /// Replaces the clock used for default issue dates and the number year.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> Allocator<R, D, C2> {
        Allocator {
            registry: self.registry,
            store: self.store,
            catalog: self.catalog,
            clock,
            config: self.config,
            metrics: self.metrics,
        }
    }

    /// Records into a shared metrics instance instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<IssueMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn catalog(&self) -> &DocumentTypeCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<IssueMetrics> {
        &self.metrics
    }

    /// Allocates a number for `raw_type` and persists the document.
    ///
    /// `issue_date` is `DD/MM/YYYY`; `None` means today. The number's year is
    /// the current year at allocation time.
    pub async fn issue_and_save(
        &self,
        raw_type: &str,
        destination: &str,
        issue_date: Option<&str>,
    ) -> Result<IssuedDocument, IssueError> {
        let start = Instant::now();
        let request = self.validate(raw_type, destination, issue_date).map_err(|e| {
            self.metrics.record_validation_error();
            tracing::debug!(doc_type = %raw_type, error = %e, "Rejected issue request");
            IssueError::Validation(e)
        })?;

        match self.allocate(&request).await {
            Ok(issued) => {
                let latency_us = start.elapsed().as_micros() as u64;
                self.metrics
                    .record_issued(request.doc_type.key.as_str(), issued.attempts, latency_us);
                tracing::info!(
                    doc_type = %request.doc_type.label,
                    number = %issued.number,
                    attempts = issued.attempts,
                    "Document issued"
                );
                Ok(issued)
            }
            Err(AllocationFailure::Exhausted {
                attempts,
                last_candidate,
            }) => {
                self.metrics.record_exhausted();
                Err(IssueError::ExhaustedRetries {
                    doc_type: request.doc_type.label.clone(),
                    attempts,
                    last_candidate: last_candidate.to_string(),
                })
            }
            Err(AllocationFailure::Storage(e)) => {
                self.metrics.record_storage_error();
                tracing::warn!(
                    doc_type = %request.doc_type.label,
                    error = %e,
                    "Document issuance failed"
                );
                Err(e.into())
            }
        }
    }

    fn validate<'a>(
        &'a self,
        raw_type: &str,
        destination: &str,
        issue_date: Option<&str>,
    ) -> Result<IssueRequest<'a>, ValidationError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(ValidationError::EmptyDestination);
        }
        if destination.chars().count() > MAX_DESTINATION_CHARS {
            return Err(ValidationError::DestinationTooLong {
                max: MAX_DESTINATION_CHARS,
            });
        }

        let issue_date = match issue_date {
            Some(raw) => parse_display_date(raw)?,
            None => self.clock.today(),
        };

        let doc_type = self.catalog.resolve(raw_type)?;
        let series = match self.config.scope {
            NumberingScope::PerType => Series::Type(doc_type.key.clone()),
            NumberingScope::Shared => Series::Shared,
        };
        let sequence = SequenceKey::new(series, self.clock.today().year())?;

        Ok(IssueRequest {
            doc_type,
            destination: destination.to_string(),
            issue_date,
            sequence,
        })
    }

    async fn allocate(
        &self,
        request: &IssueRequest<'_>,
    ) -> Result<IssuedDocument, AllocationFailure> {
        let max_attempts = self.config.max_attempts.max(1);
        self.registry.ensure(&request.sequence).await?;

        let mut state = AllocationState::Allocating { attempt: 1 };
        loop {
            state = match state {
                AllocationState::Allocating { attempt } => {
                    let raw = self.registry.next(&request.sequence).await?;
                    let number = DocumentNumber::new(raw, request.sequence.year()).map_err(|e| {
                        StorageError::InvariantViolation(format!(
                            "sequence {} produced {}: {}",
                            request.sequence, raw, e
                        ))
                    })?;
                    AllocationState::Inserting { attempt, number }
                }
                AllocationState::Inserting { attempt, number } => {
                    let document = NewDocument {
                        doc_type: request.doc_type.label.clone(),
                        type_key: request.doc_type.key.to_string(),
                        series: request.sequence.series().to_string(),
                        number: number.to_string(),
                        destination: request.destination.clone(),
                        issue_date: request.issue_date,
                    };
                    match self.store.insert_unique(&document).await {
                        Ok(record) => {
                            return Ok(IssuedDocument {
                                number,
                                record,
                                attempts: attempt,
                            })
                        }
                        Err(e) if e.is_conflict() => AllocationState::Retrying {
                            attempt,
                            rejected: number,
                        },
                        Err(e) => return Err(e.into()),
                    }
                }
                AllocationState::Retrying { attempt, rejected } => {
                    self.metrics.record_conflict();
                    if attempt >= max_attempts {
                        tracing::error!(
                            doc_type = %request.doc_type.label,
                            sequence = %request.sequence,
                            attempts = attempt,
                            last_candidate = %rejected,
                            "Exhausted number allocation attempts"
                        );
                        return Err(AllocationFailure::Exhausted {
                            attempts: attempt,
                            last_candidate: rejected,
                        });
                    }
                    tracing::warn!(
                        doc_type = %request.doc_type.label,
                        number = %rejected,
                        attempt,
                        "Number already taken, allocating another"
                    );
                    AllocationState::Allocating {
                        attempt: attempt + 1,
                    }
                }
            };
        }
    }

    /// Lists issued documents, newest first.
    ///
    /// `doc_type` goes through the catalog; `issue_date` is `YYYY-MM-DD`.
    pub async fn history(
        &self,
        doc_type: Option<&str>,
        issue_date: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentRecord>, IssueError> {
        let type_key = doc_type
            .map(|raw| self.catalog.resolve(raw).map(|t| t.key.clone()))
            .transpose()?;
        let issue_date = issue_date.map(parse_iso_date).transpose()?;
        let filter = HistoryFilter {
            type_key,
            issue_date,
            limit: Some(limit.unwrap_or(MAX_HISTORY_LIMIT).min(MAX_HISTORY_LIMIT)),
        };
        Ok(self.store.query_history(&filter).await?)
    }
}

/// Parses a `DD/MM/YYYY` date.
pub fn parse_display_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let raw = raw.trim();
    let invalid = || ValidationError::InvalidIssueDate(raw.to_string());
    let b = raw.as_bytes();
    if b.len() != 10 || b[2] != b'/' || b[5] != b'/' {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y").map_err(|_| invalid())
}

/// Parses a `YYYY-MM-DD` date.
pub fn parse_iso_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let raw = raw.trim();
    let invalid = || ValidationError::InvalidFilterDate(raw.to_string());
    let b = raw.as_bytes();
    if b.len() != 10 || b[4] != b'-' || b[7] != b'-' {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())
}
