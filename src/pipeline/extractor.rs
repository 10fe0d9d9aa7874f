use crate::records::{FieldValue, Fingerprint, FingerprintSchema, Record, ABSENT_LABEL};
use log::{debug, warn};
use std::sync::Arc;

/// Converts loosely-typed incoming records into fixed-shape fingerprints.
///
/// Extraction never fails: a field the record doesn't carry becomes the
/// absence marker (with a diagnostic), so the pipeline cannot be blocked by a
/// single malformed input. Output is a pure function of the record and the
/// static schema; the only side effect is logging.
pub struct FingerprintExtractor {
    schema: Arc<FingerprintSchema>,
    source_field: String,
}

impl FingerprintExtractor {
    /// Create an extractor for the given schema and source field name.
    pub fn new(schema: Arc<FingerprintSchema>, source_field: String) -> Self {
        Self {
            schema,
            source_field,
        }
    }

    /// The schema fingerprints are extracted against.
    pub fn schema(&self) -> &Arc<FingerprintSchema> {
        &self.schema
    }

    /// Extract the fingerprint and source identifier from one record.
    pub fn extract(&self, record: &Record) -> (Fingerprint, String) {
        let mut values: Vec<FieldValue> = self
            .schema
            .fields()
            .iter()
            .map(|field| match record.get(field) {
                Some(value) => value.clone(),
                None => {
                    warn!("No value for fingerprint field {}, using absence marker", field);
                    FieldValue::Absent
                }
            })
            .collect();

        self.clip_multiline_message(&mut values);

        let source = match record.get(&self.source_field).and_then(FieldValue::as_text) {
            Some(source) => source.to_string(),
            None => {
                debug!(
                    "Record has no usable {} field, counting under the absence marker",
                    self.source_field
                );
                ABSENT_LABEL.to_string()
            }
        };

        (Fingerprint::new(Arc::clone(&self.schema), values), source)
    }

    /// If the message spans multiple lines, clip it at the first so the
    /// fingerprint stays a one-line summary. The full original text moves
    /// into the detail field unless the record already supplied a non-empty
    /// detail of its own.
    fn clip_multiline_message(&self, values: &mut [FieldValue]) {
        let Some(message_position) = self.schema.message_position() else {
            return;
        };
        let FieldValue::Text(message) = &values[message_position] else {
            return;
        };
        let Some(newline) = message.find('\n') else {
            return;
        };

        let full_text = message.clone();
        if let Some(detail_position) = self.schema.detail_position() {
            // Absent and empty both count as "no detail present" here.
            let detail_missing = match &values[detail_position] {
                FieldValue::Absent => true,
                FieldValue::Text(text) => text.is_empty(),
                _ => false,
            };
            if detail_missing {
                values[detail_position] = FieldValue::Text(full_text.clone());
            }
        }
        values[message_position] = FieldValue::Text(full_text[..newline].to_string());
    }
}
