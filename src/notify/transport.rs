use crate::error::TransportError;
use log::{error, info};
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Mutex;

/// An outbound notification mail.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub reply_to: Option<String>,
}

/// Delivers notification mail.
///
/// Implementations are expected to apply their own bounded timeout; callers
/// treat any failure as recoverable and never retry within a cycle (the next
/// cycle's digest is the retry mechanism).
pub trait Transport: Send + Sync {
    fn send(&self, email: &Email) -> Result<(), TransportError>;
}

/// Send a mail, logging any delivery failure instead of propagating it.
///
/// Dispatch sites use this so a transport outage degrades to a log line, not
/// a crashed cycle.
pub fn send_logged(transport: &dyn Transport, email: &Email) {
    info!(
        "Sending \"{}\" to {}",
        email.subject,
        email.to.join(", ")
    );
    if let Err(e) = transport.send(email) {
        error!("Error sending email \"{}\": {}", email.subject, e);
    }
}

/// Delivers mail by piping a plain-text message to a sendmail-compatible
/// command (`sendmail -t` reads the recipients from the headers).
pub struct SendmailTransport {
    command: String,
}

impl SendmailTransport {
    /// Create a transport invoking `command` (e.g. "/usr/sbin/sendmail").
    pub fn new(command: String) -> Self {
        Self { command }
    }

    /// Format the message with headers the way sendmail expects it.
    fn format_message(email: &Email) -> String {
        let mut message = String::new();
        message.push_str(&format!("From: {}\n", email.from));
        message.push_str(&format!("To: {}\n", email.to.join(", ")));
        message.push_str(&format!("Subject: {}\n", email.subject));
        if let Some(reply_to) = &email.reply_to {
            message.push_str(&format!("Reply-To: {}\n", reply_to));
        }
        message.push('\n');
        message.push_str(&email.body);
        message
    }
}

impl Transport for SendmailTransport {
    fn send(&self, email: &Email) -> Result<(), TransportError> {
        let mut child = Command::new(&self.command)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TransportError::DeliveryFailed(format!(
                    "Failed to spawn {}: {}",
                    self.command, e
                ))
            })?;

        let message = Self::format_message(email);
        match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(message.as_bytes())?,
            None => {
                return Err(TransportError::DeliveryFailed(
                    "Mail command has no stdin".to_string(),
                ))
            }
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::DeliveryFailed(format!(
                "{} exited with status {}: {}",
                self.command, output.status, stderr
            )));
        }

        Ok(())
    }
}

/// Records mail in memory instead of delivering it. Used by tests and by the
/// mock transport mode for dry runs.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Email>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mail sent through this transport so far.
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    fn send(&self, email: &Email) -> Result<(), TransportError> {
        info!(
            "MOCK MAIL - To: {}, Subject: {}",
            email.to.join(", "),
            email.subject
        );
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}
