pub mod error;
pub mod sequence;
pub mod storage;

pub use error::{IssueError, LockResultExt, StorageError, ValidationError};
pub use sequence::SequenceRegistry;
pub use storage::{iso_date, DocumentRecord, DocumentStore, HistoryFilter, NewDocument};
