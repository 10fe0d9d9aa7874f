use crate::aggregator::{MessageBuffer, RateWindow};
use crate::config::{Config, PagerConfig, ReportConfig};
use crate::notify::{send_logged, Email, RoutingTable, Transport};
use log::{debug, error, info};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Drives the repeating flush cycle.
///
/// Each tick first checks the incoming message rate, paging if the window
/// limit was reached, then flushes the message buffer and mails the digest to
/// the routed recipients. The two phases fail independently: a problem in one
/// is logged and never blocks the other. Notifications are dispatched on
/// short-lived threads which the tick joins before returning, so ticks never
/// overlap and nothing is in flight when a tick ends.
pub struct CycleCoordinator {
    buffer: Arc<MessageBuffer>,
    rate_window: RateWindow,
    routing: RoutingTable,
    transport: Arc<dyn Transport>,
    server_name: String,
    report: ReportConfig,
    pager: PagerConfig,
    flush_interval: Duration,
}

impl CycleCoordinator {
    /// Create a coordinator over `buffer`, dispatching through `transport`.
    pub fn new(config: &Config, buffer: Arc<MessageBuffer>, transport: Arc<dyn Transport>) -> Self {
        Self {
            buffer,
            rate_window: RateWindow::new(config.cycle.pager_window_size, config.cycle.pager_limit),
            routing: RoutingTable::from_config(config),
            transport,
            server_name: config.server_name.clone(),
            report: config.report.clone(),
            pager: config.pager.clone(),
            flush_interval: Duration::from_secs(config.cycle.flush_seconds),
        }
    }

    /// Spawn the cycle thread.
    ///
    /// Ticks fire every flush interval until the shutdown channel signals;
    /// the shutdown signal triggers one final tick, run to completion before
    /// the thread exits, so buffered data is never silently dropped.
    pub fn spawn(mut self, shutdown: Receiver<()>) -> JoinHandle<()> {
        thread::spawn(move || {
            info!("Cycle coordinator started");

            loop {
                match shutdown.recv_timeout(self.flush_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        info!("Cycle coordinator received shutdown signal, running final flush");
                        self.tick();
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        debug!("Triggering flush");
                        self.tick();
                    }
                }
            }

            info!("Cycle coordinator stopped");
        })
    }

    /// Run one full cycle: rate phase, then flush phase, then wait for the
    /// dispatched notifications.
    pub fn tick(&mut self) {
        let mut dispatches = Vec::new();

        if let Some(handle) = self.rate_phase() {
            dispatches.push(handle);
        }
        if let Some(handle) = self.flush_phase() {
            dispatches.push(handle);
        }

        for handle in dispatches {
            if handle.join().is_err() {
                error!("Notification dispatch thread panicked");
            }
        }
    }

    /// Check the incoming message rate, paging if the window limit was
    /// reached. Intentional monitoring errors don't count toward the rate.
    fn rate_phase(&mut self) -> Option<JoinHandle<()>> {
        let alertable = self
            .buffer
            .total_matching(|fingerprint| !self.routing.markers().matches(fingerprint));
        debug!(
            "Found {} alertable messages, {} total",
            alertable,
            self.buffer.total()
        );

        let (exceeded, total) = self.rate_window.record_and_check(alertable);
        if !exceeded {
            debug!("Not dispatching a page");
            return None;
        }

        debug!("Dispatching a page");
        self.rate_window.reset();
        self.dispatch_page(total)
    }

    fn dispatch_page(&self, total: u64) -> Option<JoinHandle<()>> {
        if self.pager.pager_to.is_empty() {
            error!(
                "Pager recipient is not configured, dropping page for {} errors",
                total
            );
            return None;
        }

        info!("Pager is emailing, count = {}", total);
        let email = Email {
            from: self.pager.pager_from.clone(),
            to: vec![self.pager.pager_to.clone()],
            subject: format!("{} error rate exceeded", self.server_name),
            body: format!("Danger: received {} errors within the alert window.", total),
            reply_to: self.pager.pager_reply_to.clone(),
        };
        let transport = Arc::clone(&self.transport);
        Some(thread::spawn(move || {
            send_logged(transport.as_ref(), &email)
        }))
    }

    /// Flush the buffer and mail the digest, if one was produced.
    fn flush_phase(&self) -> Option<JoinHandle<()>> {
        let outcome = self.buffer.flush();
        let body = match outcome.body {
            Some(body) => body,
            None => {
                debug!("Not dispatching a digest");
                return None;
            }
        };
        let subject = outcome.subject.unwrap_or_default();

        let mut recipients = self.routing.recipients(&outcome.fingerprints);
        debug!("Calculated recipients = {:?}", recipients);
        if recipients.is_empty() {
            error!(
                "Recipient set was empty, falling back to {}",
                self.report.report_to
            );
            recipients.push(self.report.report_to.clone());
        }

        let email = Email {
            from: self.report.report_from.clone(),
            to: recipients,
            subject,
            body,
            reply_to: self.report.reply_to.clone(),
        };
        let transport = Arc::clone(&self.transport);
        Some(thread::spawn(move || {
            send_logged(transport.as_ref(), &email)
        }))
    }
}
