//! Append-only exchange log.
//!
//! One human-readable line per event:
//!
//! ```text
//! 2026-01-05T10:42:07.153Z [PING] Sent message #0
//! 2026-01-05T10:42:07.161Z [PING] Received message #1
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Logged exchange event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeEvent {
    /// An inbound hop was accepted
    Received,
    /// An outbound hop was handed to the transport
    Sent,
    /// An outbound hop did not reach the peer
    SendFailed,
    /// The bound was reached
    Done,
}

impl fmt::Display for ExchangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExchangeEvent::Received => "Received",
            ExchangeEvent::Sent => "Sent",
            ExchangeEvent::SendFailed => "Send failed",
            ExchangeEvent::Done => "Done at",
        };
        f.write_str(s)
    }
}

/// Exchange event sink
#[derive(Debug)]
pub struct ExchangeLog {
    name: String,
    path: Option<PathBuf>,
    file: Option<Mutex<File>>,
}

impl ExchangeLog {
    /// Log to `tracing` only
    #[must_use]
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            file: None,
        }
    }

    /// Append to `path`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened for appending.
    pub fn open(name: impl Into<String>, path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            name: name.into(),
            path: Some(path.to_path_buf()),
            file: Some(Mutex::new(file)),
        })
    }

    /// File being appended to, if any
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Format one line without the trailing newline
    #[must_use]
    pub fn format_line(&self, at: DateTime<Utc>, event: ExchangeEvent, counter: u64) -> String {
        format!(
            "{} [{}] {} message #{}",
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.name,
            event,
            counter
        )
    }

    /// Record an event
    ///
    /// Write failures are reported through `tracing` and otherwise ignored;
    /// the log never interrupts the exchange.
    pub fn record(&self, event: ExchangeEvent, counter: u64) {
        match event {
            ExchangeEvent::SendFailed => {
                tracing::warn!("[{}] {} message #{}", self.name, event, counter);
            }
            _ => tracing::info!("[{}] {} message #{}", self.name, event, counter),
        }

        let Some(file) = &self.file else {
            return;
        };
        let line = self.format_line(Utc::now(), event, counter);
        let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "{line}") {
            tracing::warn!("Failed to append to exchange log: {}", e);
        }
    }
}
