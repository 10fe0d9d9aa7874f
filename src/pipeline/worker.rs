use crate::aggregator::MessageBuffer;
use crate::pipeline::FingerprintExtractor;
use crate::records::Record;
use log::{debug, error, info};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Consumes records from the ingestion queue and feeds the message buffer.
///
/// The worker isolates failures at the per-record boundary: extraction
/// substitutes absence markers for anything unresolvable, and a panic from
/// truly unexpected input is caught and logged so one adversarial record can
/// never stop ingestion of the ones behind it.
pub struct IngestionWorker {
    extractor: FingerprintExtractor,
    buffer: Arc<MessageBuffer>,
}

impl IngestionWorker {
    /// Create a worker feeding `buffer` with fingerprints from `extractor`.
    pub fn new(extractor: FingerprintExtractor, buffer: Arc<MessageBuffer>) -> Self {
        Self { extractor, buffer }
    }

    /// Spawn the worker thread.
    ///
    /// The thread blocks on the record queue until the shutdown channel
    /// signals, then drains any records still queued before exiting so they
    /// are counted in the final flush.
    pub fn spawn(self, records: Receiver<Record>, shutdown: Receiver<()>) -> JoinHandle<()> {
        thread::spawn(move || {
            info!("Ingestion worker started");

            loop {
                if shutdown.try_recv().is_ok() {
                    info!("Ingestion worker received shutdown signal");
                    while let Ok(record) = records.try_recv() {
                        self.process_record(&record);
                    }
                    break;
                }

                match records.recv_timeout(Duration::from_millis(100)) {
                    Ok(record) => self.process_record(&record),
                    Err(RecvTimeoutError::Timeout) => {
                        // Timeout is expected, continue
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("Record queue disconnected");
                        break;
                    }
                }
            }

            info!("Ingestion worker stopped");
        })
    }

    /// Process a single record: extract its fingerprint and count it.
    fn process_record(&self, record: &Record) {
        debug!("Processing incoming record");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let (fingerprint, source) = self.extractor.extract(record);
            self.buffer.add(fingerprint, &source);
        }));

        if let Err(payload) = outcome {
            error!("Unhandled failure while processing record, will attempt to log details");
            // Best effort: the panic payload may not be printable at all.
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned());
            match detail {
                Some(detail) => error!("Record processing failure: {}", detail),
                None => error!("Could not capture failure details"),
            }
        } else {
            debug!("Done processing incoming record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{FieldValue, FingerprintSchema};
    use crate::report::{TemplateRenderer, DEFAULT_BODY_TEMPLATE, DEFAULT_SUBJECT_TEMPLATE};
    use std::sync::mpsc;

    fn test_worker() -> (IngestionWorker, Arc<MessageBuffer>) {
        let renderer = Arc::new(TemplateRenderer::new(
            DEFAULT_SUBJECT_TEMPLATE.to_string(),
            DEFAULT_BODY_TEMPLATE.to_string(),
        ));
        let buffer = Arc::new(MessageBuffer::new("test".to_string(), renderer));
        let extractor = FingerprintExtractor::new(
            Arc::new(FingerprintSchema::default()),
            "source".to_string(),
        );
        (
            IngestionWorker::new(extractor, Arc::clone(&buffer)),
            buffer,
        )
    }

    fn record(message: &str, source: &str) -> Record {
        let mut record = Record::new();
        record.insert(
            "message".to_string(),
            FieldValue::Text(message.to_string()),
        );
        record.insert("kind".to_string(), FieldValue::Text("app".to_string()));
        record.insert(
            "source".to_string(),
            FieldValue::Text(source.to_string()),
        );
        record
    }

    #[test]
    fn test_processes_record_into_buffer() {
        let (worker, buffer) = test_worker();

        worker.process_record(&record("boom", "host1"));
        worker.process_record(&record("boom", "host2"));

        assert_eq!(buffer.total(), 2);
        assert_eq!(buffer.total_unique(), 1);
    }

    #[test]
    fn test_malformed_record_does_not_stop_subsequent_ones() {
        let (worker, buffer) = test_worker();

        // A record carrying none of the fingerprint fields still counts,
        // under an all-absent fingerprint.
        worker.process_record(&Record::new());
        worker.process_record(&record("real error", "host1"));

        assert_eq!(buffer.total(), 2);
        assert_eq!(buffer.total_unique(), 2);
    }

    #[test]
    fn test_worker_thread_consumes_queue_until_shutdown() {
        let (worker, buffer) = test_worker();
        let (record_sender, record_receiver) = mpsc::channel();
        let (shutdown_sender, shutdown_receiver) = mpsc::channel();

        let handle = worker.spawn(record_receiver, shutdown_receiver);

        for i in 0..5 {
            record_sender
                .send(record(&format!("error {}", i), "host1"))
                .unwrap();
        }

        // Records queued before the shutdown signal are drained, not lost.
        shutdown_sender.send(()).unwrap();
        handle.join().unwrap();

        assert_eq!(buffer.total(), 5);
    }

    #[test]
    fn test_worker_thread_stops_when_queue_disconnects() {
        let (worker, buffer) = test_worker();
        let (record_sender, record_receiver) = mpsc::channel();
        let (_shutdown_sender, shutdown_receiver) = mpsc::channel();

        let handle = worker.spawn(record_receiver, shutdown_receiver);
        record_sender.send(record("boom", "host1")).unwrap();
        drop(record_sender);

        handle.join().unwrap();
        assert_eq!(buffer.total(), 1);
    }
}
