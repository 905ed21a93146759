//! paperpair-core — bilingual paper records, ledger storage, config, ingestion.

pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod storage;

pub use config::AppConfig;
pub use error::{CoreError, Result};
pub use models::{ExtractionMethod, Language, Pairing, Record, RecordPatch};
pub use storage::ledger::JsonLedger;
pub use storage::RecordStore;
