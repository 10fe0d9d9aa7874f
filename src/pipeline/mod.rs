//! Ingestion pipeline: fingerprint extraction and the queue-consuming worker
pub mod extractor;
pub mod worker;

pub use extractor::FingerprintExtractor;
pub use worker::IngestionWorker;
