//! UDP record listener
//!
//! Receives one JSON-encoded record per datagram and pushes decoded records
//! onto the ingestion queue. A datagram that cannot be decoded is replaced by
//! a synthetic internal-error record so decode failures surface in the digest
//! instead of disappearing into the log.

use crate::error::ListenerError;
use crate::records::{FieldValue, Record};
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Listens for record datagrams and feeds the ingestion queue.
pub struct UdpListener {
    bind: String,
    max_datagram_bytes: usize,
    output: Sender<Record>,
    thread_handle: Option<JoinHandle<()>>,
    running: Arc<Mutex<bool>>,
    local_addr: Option<SocketAddr>,
}

impl UdpListener {
    /// Create a listener for `bind` (e.g. "0.0.0.0:1549").
    pub fn new(bind: String, max_datagram_bytes: usize, output: Sender<Record>) -> Self {
        Self {
            bind,
            max_datagram_bytes,
            output,
            thread_handle: None,
            running: Arc::new(Mutex::new(false)),
            local_addr: None,
        }
    }

    /// Bind the socket and start the receive thread.
    ///
    /// # Errors
    ///
    /// Returns `ListenerError::Bind` if the socket cannot be bound; a bind
    /// failure at startup is fatal to the process.
    pub fn start(&mut self) -> Result<(), ListenerError> {
        {
            let mut running = self.running.lock().unwrap();
            if *running {
                return Ok(()); // Already running
            }
            *running = true;
        }

        let socket = match UdpSocket::bind(&self.bind) {
            Ok(socket) => socket,
            Err(e) => {
                *self.running.lock().unwrap() = false;
                return Err(ListenerError::Bind(self.bind.clone(), e));
            }
        };
        // A read timeout lets the receive loop observe the running flag.
        socket.set_read_timeout(Some(Duration::from_millis(200)))?;
        self.local_addr = socket.local_addr().ok();
        info!("Listening on {}", self.bind);

        let output = self.output.clone();
        let running = Arc::clone(&self.running);
        let max_datagram_bytes = self.max_datagram_bytes;
        let handle = thread::spawn(move || {
            Self::listener_thread(socket, max_datagram_bytes, output, running);
        });
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// The address the socket actually bound to (useful when the configured
    /// port is 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stop the receive thread and wait for it to finish.
    pub fn stop(&mut self) -> Result<(), ListenerError> {
        {
            let mut running = self.running.lock().unwrap();
            *running = false;
        }

        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| {
                ListenerError::ThreadTerminated("Failed to join listener thread".to_string())
            })?;
        }

        info!("UDP listener stopped");
        Ok(())
    }

    fn listener_thread(
        socket: UdpSocket,
        max_datagram_bytes: usize,
        output: Sender<Record>,
        running: Arc<Mutex<bool>>,
    ) {
        let mut buffer = vec![0u8; max_datagram_bytes];
        let mut error_count: u64 = 0;

        while *running.lock().unwrap() {
            match socket.recv_from(&mut buffer) {
                Ok((length, _peer)) => match decode_datagram(&buffer[..length]) {
                    Ok(record) => {
                        if output.send(record).is_err() {
                            info!("Record queue closed, stopping listener");
                            break;
                        }
                    }
                    Err(e) => {
                        error_count += 1;
                        error!("Error on incoming packet: {}", e);
                        // Surface the failure in the digest itself.
                        if output.send(internal_error_record(error_count, &e)).is_err() {
                            break;
                        }
                    }
                },
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    // Read timeout, loop to re-check the running flag
                }
                Err(e) => {
                    error_count += 1;
                    warn!("Error receiving datagram: {}", e);
                }
            }
        }
    }
}

/// Decode one datagram as a JSON object mapped to a record.
pub fn decode_datagram(data: &[u8]) -> Result<Record, serde_json::Error> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(data)?;

    let mut record = Record::new();
    for (key, value) in &object {
        match field_value_from_json(value) {
            Some(field_value) => {
                record.insert(key.clone(), field_value);
            }
            None => {
                debug!("Skipping unsupported value for record key {}", key);
            }
        }
    }
    Ok(record)
}

/// Map a JSON value onto the record value types: text, integer, or list of
/// text. Nulls become the absence marker; anything else is unsupported.
fn field_value_from_json(value: &serde_json::Value) -> Option<FieldValue> {
    match value {
        serde_json::Value::String(text) => Some(FieldValue::Text(text.clone())),
        serde_json::Value::Number(number) => number.as_i64().map(FieldValue::Int),
        serde_json::Value::Array(items) => {
            let texts = items
                .iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(text) => Some(text.clone()),
                    serde_json::Value::Number(number) => Some(number.to_string()),
                    _ => None,
                })
                .collect();
            Some(FieldValue::List(texts))
        }
        serde_json::Value::Null => Some(FieldValue::Absent),
        _ => None,
    }
}

/// Build the record representing a decode failure, with every default
/// fingerprint field filled in so it aggregates like any other message.
fn internal_error_record(count: u64, error: &serde_json::Error) -> Record {
    let mut record = Record::new();
    for field in ["module", "function", "file", "path", "kind", "message"] {
        record.insert(field.to_string(), FieldValue::Text("unknown".to_string()));
    }
    record.insert("line".to_string(), FieldValue::Int(0));
    record.insert(
        "detail".to_string(),
        FieldValue::Text(format!("Internal error: {} {}", count, error)),
    );
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_decode_datagram_maps_json_types() {
        let data = br#"{
            "message": "boom",
            "line": 42,
            "args": ["a", "b", 3],
            "detail": null,
            "extra": {"nested": true}
        }"#;

        let record = decode_datagram(data).unwrap();
        assert_eq!(
            record.get("message"),
            Some(&FieldValue::Text("boom".to_string()))
        );
        assert_eq!(record.get("line"), Some(&FieldValue::Int(42)));
        assert_eq!(
            record.get("args"),
            Some(&FieldValue::List(vec![
                "a".to_string(),
                "b".to_string(),
                "3".to_string()
            ]))
        );
        assert_eq!(record.get("detail"), Some(&FieldValue::Absent));
        // Nested objects are unsupported and skipped.
        assert!(!record.contains_key("extra"));
    }

    #[test]
    fn test_decode_datagram_rejects_non_objects() {
        assert!(decode_datagram(b"[1, 2, 3]").is_err());
        assert!(decode_datagram(b"not json at all").is_err());
    }

    #[test]
    fn test_internal_error_record_has_all_default_fields() {
        let error = serde_json::from_slice::<serde_json::Value>(b"nope").unwrap_err();
        let record = internal_error_record(3, &error);

        assert_eq!(
            record.get("message"),
            Some(&FieldValue::Text("unknown".to_string()))
        );
        assert_eq!(record.get("line"), Some(&FieldValue::Int(0)));
        let detail = record.get("detail").unwrap().to_string();
        assert!(detail.starts_with("Internal error: 3 "));
    }

    #[test]
    fn test_listener_delivers_datagrams_to_queue() {
        let (sender, receiver) = mpsc::channel();
        let mut listener = UdpListener::new("127.0.0.1:0".to_string(), 65536, sender);
        listener.start().unwrap();
        let address = listener.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client
            .send_to(br#"{"message": "boom", "source": "host1"}"#, address)
            .unwrap();

        let record = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            record.get("message"),
            Some(&FieldValue::Text("boom".to_string()))
        );
        assert_eq!(
            record.get("source"),
            Some(&FieldValue::Text("host1".to_string()))
        );

        listener.stop().unwrap();
    }

    #[test]
    fn test_malformed_datagram_becomes_internal_error_record() {
        let (sender, receiver) = mpsc::channel();
        let mut listener = UdpListener::new("127.0.0.1:0".to_string(), 65536, sender);
        listener.start().unwrap();
        let address = listener.local_addr().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"{{{ not json", address).unwrap();
        client
            .send_to(br#"{"message": "still alive"}"#, address)
            .unwrap();

        let first = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(first.get("detail").unwrap().to_string().contains("Internal error: 1"));

        // The listener keeps receiving after a bad packet.
        let second = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            second.get("message"),
            Some(&FieldValue::Text("still alive".to_string()))
        );

        listener.stop().unwrap();
    }

    #[test]
    fn test_bind_failure_is_an_error() {
        let (first_sender, _first_receiver) = mpsc::channel();
        let mut first = UdpListener::new("127.0.0.1:0".to_string(), 65536, first_sender);
        first.start().unwrap();
        let address = first.local_addr().unwrap();

        // Binding the same port again must fail cleanly.
        let (second_sender, _second_receiver) = mpsc::channel();
        let mut second = UdpListener::new(address.to_string(), 65536, second_sender);
        let result = second.start();
        assert!(matches!(result, Err(ListenerError::Bind(_, _))));

        first.stop().unwrap();
    }
}
