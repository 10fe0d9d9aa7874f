//! Deduplicating message buffer
//!
//! Stores and organizes incoming messages by fingerprint in a
//! concurrency-safe way, counting occurrences per source. Can be flushed to
//! produce a digest report about the messages it has seen before forgetting
//! them.

use crate::records::{Fingerprint, Timestamp};
use crate::report::{ReportEntry, ReportParams, ReportRenderer};
use chrono::Utc;
use log::error;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Occurrence counters for one fingerprint: how many times it was received
/// from each source, and when it was first and last seen.
#[derive(Debug, Clone, Default)]
pub struct OccurrenceStats {
    sources: HashMap<String, u64>,
    first_seen: Option<Timestamp>,
    last_seen: Option<Timestamp>,
}

impl OccurrenceStats {
    /// Count one occurrence from `source`, updating the first and last seen
    /// timestamps accordingly.
    pub fn increment(&mut self, source: &str) {
        *self.sources.entry(source.to_string()).or_insert(0) += 1;
        let now = Utc::now();
        if self.first_seen.is_none() {
            self.first_seen = Some(now);
        }
        self.last_seen = Some(now);
    }

    /// Total occurrences across all sources.
    pub fn total(&self) -> u64 {
        self.sources.values().sum()
    }

    /// (source, count) pairs sorted by source name, for stable report output.
    pub fn sources_sorted(&self) -> Vec<(String, u64)> {
        let mut pairs: Vec<(String, u64)> = self
            .sources
            .iter()
            .map(|(source, count)| (source.clone(), *count))
            .collect();
        pairs.sort();
        pairs
    }

    /// When the first occurrence was counted.
    pub fn first_seen(&self) -> Option<Timestamp> {
        self.first_seen
    }

    /// When the latest occurrence was counted.
    pub fn last_seen(&self) -> Option<Timestamp> {
        self.last_seen
    }
}

/// What a flush produced: the rendered digest (if any) and the flushed
/// fingerprints for recipient routing.
#[derive(Debug, Default)]
pub struct FlushOutcome {
    pub subject: Option<String>,
    pub body: Option<String>,
    pub fingerprints: Vec<Fingerprint>,
}

struct BufferState {
    counts: HashMap<Fingerprint, OccurrenceStats>,
    // First-occurrence order, so equal totals sort stably in reports.
    order: Vec<Fingerprint>,
}

/// Concurrency-safe mapping from fingerprint to occurrence stats.
///
/// A single lock guards the mapping: `add` and `flush` are mutually
/// exclusive, and the read-only totals take the lock for the duration of the
/// read so they observe a consistent point-in-time view. Flush atomically
/// snapshots the contents and installs an empty mapping; an `add` that
/// completes before a flush begins lands in that flush, an `add` that starts
/// after it returns lands in the next one, and no `add` is ever lost or
/// double-counted.
pub struct MessageBuffer {
    state: Mutex<BufferState>,
    renderer: Arc<dyn ReportRenderer>,
    server_name: String,
}

impl MessageBuffer {
    /// Create an empty buffer that renders its flush reports with `renderer`.
    pub fn new(server_name: String, renderer: Arc<dyn ReportRenderer>) -> Self {
        Self {
            state: Mutex::new(BufferState {
                counts: HashMap::new(),
                order: Vec::new(),
            }),
            renderer,
            server_name,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        // A thread that panicked while holding the lock leaves the counts in
        // a consistent state (each mutation is a single increment), so keep
        // serving rather than poisoning the whole daemon.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Count an occurrence of `fingerprint` from `source`.
    pub fn add(&self, fingerprint: Fingerprint, source: &str) {
        let mut state = self.lock();
        if !state.counts.contains_key(&fingerprint) {
            state.order.push(fingerprint.clone());
        }
        state
            .counts
            .entry(fingerprint)
            .or_default()
            .increment(source);
    }

    /// Total occurrences over all entries whose fingerprint satisfies `pred`.
    pub fn total_matching<F>(&self, pred: F) -> u64
    where
        F: Fn(&Fingerprint) -> bool,
    {
        let state = self.lock();
        state
            .counts
            .iter()
            .filter(|(fingerprint, _)| pred(fingerprint))
            .map(|(_, stats)| stats.total())
            .sum()
    }

    /// Total occurrences across all entries.
    pub fn total(&self) -> u64 {
        self.total_matching(|_| true)
    }

    /// Number of distinct fingerprints in the buffer.
    pub fn total_unique(&self) -> usize {
        self.lock().counts.len()
    }

    /// Atomically snapshot the buffer contents, render a digest report, and
    /// clear the buffer.
    ///
    /// If the buffer is empty, no report is rendered and the outcome is
    /// empty. If rendering fails, the failure is logged and the buffer is
    /// still cleared: a template problem must never leave stale data stuck in
    /// the buffer or crash the cycle, it just costs that cycle's digest.
    pub fn flush(&self) -> FlushOutcome {
        let mut state = self.lock();

        // The grand total counts everything, monitoring markers included:
        // the digest reports even on intentional canary errors.
        let total: u64 = state.counts.values().map(|stats| stats.total()).sum();
        if total == 0 {
            return FlushOutcome::default();
        }

        let mut subject = None;
        let mut body = None;
        match self.renderer.render(&self.report_params(&state, total)) {
            Ok(report) => {
                subject = Some(report.subject);
                body = Some(report.body);
            }
            Err(e) => {
                error!("Could not render digest report: {}", e);
            }
        }

        let fingerprints = std::mem::take(&mut state.order);
        state.counts.clear();
        FlushOutcome {
            subject,
            body,
            fingerprints,
        }
    }

    fn report_params(&self, state: &BufferState, total: u64) -> ReportParams {
        let kinds: BTreeSet<String> = state
            .order
            .iter()
            .map(|fingerprint| fingerprint.kind_label())
            .collect();

        // Stable sort: entries with equal totals keep first-occurrence order.
        let mut pairs: Vec<(&Fingerprint, &OccurrenceStats)> = state
            .order
            .iter()
            .filter_map(|fingerprint| {
                state
                    .counts
                    .get(fingerprint)
                    .map(|stats| (fingerprint, stats))
            })
            .collect();
        pairs.sort_by(|a, b| b.1.total().cmp(&a.1.total()));

        ReportParams {
            server_name: self.server_name.clone(),
            total,
            total_unique: state.counts.len(),
            kinds,
            entries: pairs
                .into_iter()
                .map(|(fingerprint, stats)| ReportEntry::new(fingerprint, stats))
                .collect(),
        }
    }
}
