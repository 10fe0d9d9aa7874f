use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Errors that can occur in the UDP record listener
#[derive(Error, Debug)]
pub enum ListenerError {
    #[error("Failed to bind UDP socket {0}: {1}")]
    Bind(String, std::io::Error),

    #[error("Listener thread terminated unexpectedly: {0}")]
    ThreadTerminated(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur while rendering a digest report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to render template: {0}")]
    RenderError(#[from] minijinja::Error),

    #[error("Failed to serialize report context: {0}")]
    ContextError(#[from] serde_json::Error),
}

/// Errors that can occur when delivering a notification
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to deliver mail: {0}")]
    DeliveryFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
