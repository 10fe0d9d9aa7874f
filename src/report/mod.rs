//! Digest report rendering
//!
//! A flush of the message buffer produces a parameter bag describing the
//! flushed messages; a [`ReportRenderer`] turns that bag into the subject and
//! body of a digest email. The shipped implementation renders configurable
//! minijinja template strings, so deployments can reshape the digest without
//! rebuilding the daemon.

use crate::aggregator::OccurrenceStats;
use crate::error::ReportError;
use crate::records::{Fingerprint, Timestamp, ABSENT_LABEL};
use minijinja::Environment;
use serde::Serialize;
use std::collections::BTreeSet;

pub mod renderer;

pub use renderer::TemplateRenderer;

/// Default template for the digest subject line.
pub const DEFAULT_SUBJECT_TEMPLATE: &str =
    "[{{ server_name }}] {{ total }} errors, {{ total_unique }} unique";

/// Default template for the digest body.
pub const DEFAULT_BODY_TEMPLATE: &str = "\
{{ total }} errors ({{ total_unique }} unique) were reported on {{ server_name }}.
Kinds: {% for kind in kinds %}{{ kind }}{% if not loop.last %}, {% endif %}{% endfor %}

{% for entry in entries %}----------------------------------------
{{ entry.total }}x {{ entry.summary }}
first seen: {{ entry.first_seen }}
last seen:  {{ entry.last_seen }}
{% for field in entry.fields %}{{ field.name }}: {{ field.value }}
{% endfor %}sources: {% for source in entry.sources %}{{ source.name }} ({{ source.count }}){% if not loop.last %}, {% endif %}{% endfor %}

{% endfor %}";

/// Parameter bag handed to the renderer by a buffer flush.
#[derive(Debug, Clone, Serialize)]
pub struct ReportParams {
    /// Name of the server producing the digest
    pub server_name: String,
    /// Grand total of messages flushed
    pub total: u64,
    /// Number of distinct fingerprints flushed
    pub total_unique: usize,
    /// Distinct kind labels present in the flushed set
    pub kinds: BTreeSet<String>,
    /// Flushed fingerprints with their stats, sorted by descending total
    pub entries: Vec<ReportEntry>,
}

/// One flushed fingerprint, flattened for template consumption.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    /// The message summary line (absence marker if the schema has no message field)
    pub summary: String,
    /// All fingerprint fields as display text, in schema order
    pub fields: Vec<ReportField>,
    /// Total occurrences across all sources
    pub total: u64,
    /// Per-source counts, sorted by source name
    pub sources: Vec<SourceCount>,
    /// When the first occurrence was seen, formatted
    pub first_seen: String,
    /// When the latest occurrence was seen, formatted
    pub last_seen: String,
}

/// A named fingerprint field rendered as text.
#[derive(Debug, Clone, Serialize)]
pub struct ReportField {
    pub name: String,
    pub value: String,
}

/// Occurrence count for one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCount {
    pub name: String,
    pub count: u64,
}

impl ReportEntry {
    /// Flatten a fingerprint and its occurrence stats into template data.
    pub fn new(fingerprint: &Fingerprint, stats: &OccurrenceStats) -> Self {
        let summary = match fingerprint.message() {
            Some(value) => value.to_string(),
            None => ABSENT_LABEL.to_string(),
        };
        let fields = fingerprint
            .named_values()
            .map(|(name, value)| ReportField {
                name: name.to_string(),
                value: value.to_string(),
            })
            .collect();
        let sources = stats
            .sources_sorted()
            .into_iter()
            .map(|(name, count)| SourceCount { name, count })
            .collect();
        Self {
            summary,
            fields,
            total: stats.total(),
            sources,
            first_seen: format_timestamp(stats.first_seen()),
            last_seen: format_timestamp(stats.last_seen()),
        }
    }
}

fn format_timestamp(timestamp: Option<Timestamp>) -> String {
    match timestamp {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => String::new(),
    }
}

/// A rendered digest: subject line and body text.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedReport {
    pub subject: String,
    pub body: String,
}

/// Renders a flush parameter bag into digest subject and body.
///
/// Rendering may fail; the buffer tolerates that by clearing itself anyway
/// and skipping the digest for the cycle.
pub trait ReportRenderer: Send + Sync {
    fn render(&self, params: &ReportParams) -> Result<RenderedReport, ReportError>;
}

/// Convenience: a strict minijinja environment shared by renderer code.
pub(crate) fn template_environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);
    env
}
