//! Document-number allocation: type normalization, formatting and the
//! retrying allocator that ties the sequence registry to the document store.

pub mod allocator;
pub mod catalog;
pub mod clock;
pub mod format;
pub mod key;

pub use allocator::{
    parse_display_date, parse_iso_date, Allocator, IssuedDocument, MAX_DESTINATION_CHARS,
    MAX_HISTORY_LIMIT,
};
pub use catalog::{DocumentType, DocumentTypeCatalog, DEFAULT_DOCUMENT_TYPES};
pub use clock::{Clock, FixedClock, SystemClock};
pub use format::{format, DocumentNumber};
pub use key::{normalize, SequenceKey, Series, TypeKey, MAX_TYPE_KEY_LEN, SHARED_SERIES};
