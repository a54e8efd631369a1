pub mod api;
pub mod config;
pub mod contracts;
pub mod metrics;
pub mod numbering;
pub mod storage;
