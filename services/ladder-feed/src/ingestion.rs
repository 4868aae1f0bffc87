//! Inbound framing and parsing for the feed backend's standard output
//!
//! Bytes arrive in arbitrary chunks. The framer buffers them and splits on
//! newline; every complete, non-blank line is decoded into a
//! [`FeedMessage`]. Parse failures drop the line and are reported to the
//! caller, the connection itself keeps running.

use std::collections::BTreeMap;

use ladder_types::errors::FeedError;
use tracing::{debug, warn};

use crate::events::FeedMessage;

/// Configuration for the line framer.
#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Longest partial line kept while waiting for its newline.
    pub max_line_bytes: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Splits a byte stream into newline-terminated lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    /// Leading bytes of `buffer` already known to hold no newline.
    scanned: usize,
    /// Dropping the remainder of an oversized line up to its newline.
    discarding: bool,
    config: FramerConfig,
    overflows: u64,
}

impl LineFramer {
    pub fn new(config: FramerConfig) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            discarding: false,
            config,
            overflows: 0,
        }
    }

    /// Append a chunk and return every complete, non-blank line in order.
    ///
    /// A trailing `\r` is stripped. The unterminated tail stays buffered.
    /// Once a partial line outgrows the limit, everything up to its newline
    /// is dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut chunk = chunk;
        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    chunk = &chunk[pos + 1..];
                }
                None => return Vec::new(),
            }
        }
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(pos) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + pos;
            let mut line = &self.buffer[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(line.to_vec());
            }
            start = end + 1;
            search_from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.config.max_line_bytes {
            self.overflows += 1;
            warn!(
                buffered = self.buffer.len(),
                limit = self.config.max_line_bytes,
                "Discarding oversized partial line"
            );
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }

        lines
    }

    /// Bytes waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Partial lines discarded for exceeding the size limit.
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Drop any partial line, e.g. when the process is restarted.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
    }
}

/// Frames and decodes the backend's output, keeping per-type counters.
#[derive(Debug, Default)]
pub struct Ingester {
    framer: LineFramer,
    lines_accepted: u64,
    lines_malformed: u64,
    by_type: BTreeMap<&'static str, u64>,
}

impl Ingester {
    pub fn new(config: FramerConfig) -> Self {
        Self {
            framer: LineFramer::new(config),
            ..Default::default()
        }
    }

    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Feed a stdout chunk; returns one result per complete line.
    pub fn ingest_chunk(&mut self, chunk: &[u8]) -> Vec<Result<FeedMessage, FeedError>> {
        self.framer
            .push(chunk)
            .into_iter()
            .map(|line| self.ingest_line(&line))
            .collect()
    }

    /// Decode one complete line.
    pub fn ingest_line(&mut self, line: &[u8]) -> Result<FeedMessage, FeedError> {
        match FeedMessage::parse(line) {
            Ok(message) => {
                self.lines_accepted += 1;
                *self.by_type.entry(message.type_label()).or_insert(0) += 1;
                debug!(message_type = message.type_label(), bytes = line.len(), "Line accepted");
                Ok(message)
            }
            Err(err) => {
                self.lines_malformed += 1;
                warn!(
                    error = %err,
                    preview = %String::from_utf8_lossy(&line[..line.len().min(120)]),
                    "Dropping malformed feed line"
                );
                Err(err)
            }
        }
    }

    /// Forget buffered bytes; counters are kept.
    pub fn reset_stream(&mut self) {
        self.framer.clear();
    }

    pub fn lines_accepted(&self) -> u64 {
        self.lines_accepted
    }

    pub fn lines_malformed(&self) -> u64 {
        self.lines_malformed
    }

    /// Accepted lines per message type.
    pub fn messages_by_type(&self) -> &BTreeMap<&'static str, u64> {
        &self.by_type
    }

    pub fn framer(&self) -> &LineFramer {
        &self.framer
    }
}
