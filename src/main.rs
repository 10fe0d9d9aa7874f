use anyhow::{bail, Context};
use clap::Parser;
use floodgate::aggregator::MessageBuffer;
use floodgate::config::{Config, TransportConfig};
use floodgate::cycle::CycleCoordinator;
use floodgate::listener::UdpListener;
use floodgate::notify::{MockTransport, SendmailTransport, Transport};
use floodgate::pipeline::{FingerprintExtractor, IngestionWorker};
use floodgate::records::{FingerprintSchema, Record};
use floodgate::report::{ReportRenderer, TemplateRenderer};
use log::{error, info};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Command-line arguments for the error aggregation daemon
#[derive(Parser)]
#[command(
    name = "floodgate",
    about = "A daemon for batching error log messages, emailing digests, and alerting on error rates",
    long_about = "Receives structured error records over UDP from a fleet of remote processes, \
                  deduplicates them by semantic fingerprint, and emails one digest per flush \
                  interval summarizing all distinct errors, plus a page when the error rate \
                  within the sliding window crosses the configured limit."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,
}

/// Main application struct that wires the daemon's components together
///
/// The daemon owns three long-lived threads: the UDP listener feeding the
/// record queue, the ingestion worker draining it into the message buffer,
/// and the cycle coordinator flushing the buffer on its timer. Shutdown stops
/// them in that order so records already received are counted and the final
/// flush sees them.
pub struct Daemon {
    listener: UdpListener,

    worker: Option<IngestionWorker>,
    record_receiver: Option<Receiver<Record>>,
    worker_shutdown: Sender<()>,
    worker_shutdown_receiver: Option<Receiver<()>>,
    worker_handle: Option<JoinHandle<()>>,

    coordinator: Option<CycleCoordinator>,
    coordinator_shutdown: Sender<()>,
    coordinator_shutdown_receiver: Option<Receiver<()>>,
    coordinator_handle: Option<JoinHandle<()>>,

    /// Signal that tells the main thread to begin shutdown
    shutdown_sender: Sender<()>,
    shutdown_receiver: Receiver<()>,
}

impl Daemon {
    /// Create a new Daemon from validated configuration.
    pub fn new(config: Config) -> Self {
        info!("Initializing daemon components");

        let (record_sender, record_receiver) = mpsc::channel();
        let (worker_shutdown, worker_shutdown_receiver) = mpsc::channel();
        let (coordinator_shutdown, coordinator_shutdown_receiver) = mpsc::channel();
        let (shutdown_sender, shutdown_receiver) = mpsc::channel();

        let schema = Arc::new(FingerprintSchema::new(config.fingerprint.fields.clone()));
        let extractor =
            FingerprintExtractor::new(schema, config.fingerprint.source_field.clone());

        let renderer: Arc<dyn ReportRenderer> = Arc::new(TemplateRenderer::new(
            config.report.subject_template.clone(),
            config.report.body_template.clone(),
        ));
        let buffer = Arc::new(MessageBuffer::new(config.server_name.clone(), renderer));

        let transport: Arc<dyn Transport> = match &config.transport {
            TransportConfig::Sendmail { command } => {
                Arc::new(SendmailTransport::new(command.clone()))
            }
            TransportConfig::Mock => Arc::new(MockTransport::new()),
        };

        let listener = UdpListener::new(
            config.listener.bind.clone(),
            config.listener.max_datagram_bytes,
            record_sender,
        );
        let worker = IngestionWorker::new(extractor, Arc::clone(&buffer));
        let coordinator = CycleCoordinator::new(&config, buffer, transport);

        Daemon {
            listener,
            worker: Some(worker),
            record_receiver: Some(record_receiver),
            worker_shutdown,
            worker_shutdown_receiver: Some(worker_shutdown_receiver),
            worker_handle: None,
            coordinator: Some(coordinator),
            coordinator_shutdown,
            coordinator_shutdown_receiver: Some(coordinator_shutdown_receiver),
            coordinator_handle: None,
            shutdown_sender,
            shutdown_receiver,
        }
    }

    /// Load configuration from a file, or use defaults when none is given.
    ///
    /// An explicitly requested file that is unreadable or invalid is fatal;
    /// refusing to start beats running with settings the operator didn't ask
    /// for.
    pub fn load_config(config_path: Option<&PathBuf>) -> anyhow::Result<Config> {
        let config = match config_path {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                Config::from_file(path)
                    .with_context(|| format!("loading configuration from {}", path.display()))?
            }
            None => {
                info!("Using default configuration");
                Config::default()
            }
        };
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Start all daemon threads.
    pub fn start(&mut self) -> anyhow::Result<()> {
        info!("Starting daemon components");

        let (Some(worker), Some(records), Some(worker_shutdown)) = (
            self.worker.take(),
            self.record_receiver.take(),
            self.worker_shutdown_receiver.take(),
        ) else {
            bail!("Daemon already started");
        };
        self.worker_handle = Some(worker.spawn(records, worker_shutdown));

        let (Some(coordinator), Some(coordinator_shutdown)) = (
            self.coordinator.take(),
            self.coordinator_shutdown_receiver.take(),
        ) else {
            bail!("Daemon already started");
        };
        self.coordinator_handle = Some(coordinator.spawn(coordinator_shutdown));

        // The listener starts last so nothing arrives before the pipeline is
        // ready to drain it.
        self.listener.start().context("starting UDP listener")?;

        info!("All daemon components started successfully");
        Ok(())
    }

    /// Stop all daemon threads, flushing buffered messages on the way out.
    ///
    /// Ordering matters: the listener stops first so no new records arrive,
    /// the worker then drains the queue, and only then does the coordinator
    /// run its final flush, so everything received is counted before the
    /// digest goes out.
    pub fn stop(&mut self) -> anyhow::Result<()> {
        info!("Stopping daemon components");

        if let Err(e) = self.listener.stop() {
            error!("Failed to stop UDP listener: {}", e);
        }

        if let Err(e) = self.worker_shutdown.send(()) {
            error!("Failed to send worker shutdown signal: {}", e);
        }
        if let Some(handle) = self.worker_handle.take() {
            if handle.join().is_err() {
                error!("Ingestion worker thread failed to join");
            }
        }

        if let Err(e) = self.coordinator_shutdown.send(()) {
            error!("Failed to send coordinator shutdown signal: {}", e);
        }
        if let Some(handle) = self.coordinator_handle.take() {
            if handle.join().is_err() {
                error!("Cycle coordinator thread failed to join");
            }
        }

        info!("Daemon stopped");
        Ok(())
    }

    /// Block until a shutdown signal is received.
    pub fn wait_for_shutdown(&self) -> anyhow::Result<()> {
        info!("Waiting for shutdown signal...");
        self.shutdown_receiver
            .recv()
            .context("waiting for shutdown signal")?;
        info!("Shutdown signal received");
        Ok(())
    }

    /// A handle for signalling shutdown from another thread.
    pub fn shutdown_handle(&self) -> Sender<()> {
        self.shutdown_sender.clone()
    }
}

fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    info!("Starting up");

    // Load and validate configuration; configuration problems are fatal.
    let config = match Daemon::load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    let mut daemon = Daemon::new(config);

    if let Err(e) = daemon.start() {
        error!("Failed to start daemon: {:#}", e);
        std::process::exit(1);
    }

    // Set up signal handling for graceful shutdown (SIGINT)
    let shutdown_sender = daemon.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    })
    .expect("Error setting SIGINT handler for graceful shutdown");

    info!("Daemon is running. Press Ctrl+C to stop.");

    if let Err(e) = daemon.wait_for_shutdown() {
        error!("Error during shutdown wait: {:#}", e);
    }

    // Stop everything; this runs the final flush so buffered messages still
    // go out as a digest.
    if let Err(e) = daemon.stop() {
        error!("Error during shutdown: {:#}", e);
        std::process::exit(1);
    }

    info!("Shutdown complete");
}
