//! Streaming shard decoder
//!
//! A shard is a gzip file whose decompressed content holds one JSON object
//! per line. [`DocumentStream`] decompresses and parses incrementally, so
//! only one line is resident at a time regardless of shard size.
//!
//! A line that fails to parse yields a `MalformedRecord` error and the stream
//! carries on. A broken compressed stream yields `ShardUnreadable` once and
//! the stream ends.

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn};

use crate::error::{IngestError, Result};
use crate::models::{Document, ShardHandle};

const READ_BUFFER_BYTES: usize = 64 * 1024;

/// A successfully decoded line
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedDocument {
    /// 1-based line number in the decompressed shard
    pub line: u64,
    pub document: Document,
}

/// Single-pass iterator over the documents of one shard
///
/// The underlying file is closed when the stream is dropped or as soon as it
/// reaches the end or a stream error.
pub struct DocumentStream {
    shard: Arc<str>,
    reader: Option<BufReader<MultiGzDecoder<File>>>,
    line_number: u64,
    buf: Vec<u8>,
}

impl DocumentStream {
    /// Open a shard and validate its gzip header
    pub fn open(shard: &ShardHandle) -> Result<Self> {
        let unreadable = |reason: String| IngestError::ShardUnreadable {
            shard: shard.name.clone(),
            reason,
        };

        let file = File::open(&shard.path).map_err(|e| unreadable(e.to_string()))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, MultiGzDecoder::new(file));

        // Pull the first block so a bad header fails here rather than mid-stream
        reader.fill_buf().map_err(|e| unreadable(e.to_string()))?;

        Ok(Self {
            shard: Arc::from(shard.name.as_str()),
            reader: Some(reader),
            line_number: 0,
            buf: Vec::new(),
        })
    }

    pub fn shard_name(&self) -> &Arc<str> {
        &self.shard
    }

    /// Lines consumed so far, including blank and malformed ones
    pub fn lines_read(&self) -> u64 {
        self.line_number
    }

    fn malformed(&self, reason: String) -> IngestError {
        IngestError::MalformedRecord {
            shard: self.shard.to_string(),
            line: self.line_number,
            reason,
        }
    }
}

impl Iterator for DocumentStream {
    type Item = Result<DecodedDocument>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            self.buf.clear();

            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {
                    self.line_number += 1;
                    if self.buf.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    let parsed = serde_json::from_slice::<Document>(&self.buf);
                    return Some(match parsed {
                        Ok(document) => Ok(DecodedDocument {
                            line: self.line_number,
                            document,
                        }),
                        Err(e) => Err(self.malformed(e.to_string())),
                    });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.reader = None;
                    return Some(Err(IngestError::ShardUnreadable {
                        shard: self.shard.to_string(),
                        reason: format!("stream failed after line {}: {}", self.line_number, e),
                    }));
                }
            }
        }
    }
}

/// Per-shard decode counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShardCount {
    pub documents: u64,
    pub malformed: u64,
}

/// Decode a whole shard and count documents and malformed lines
///
/// Stream failures part-way through are returned as errors.
pub fn count_documents(shard: &ShardHandle) -> Result<ShardCount> {
    let mut count = ShardCount::default();
    for item in DocumentStream::open(shard)? {
        match item {
            Ok(_) => count.documents += 1,
            Err(IngestError::MalformedRecord { .. }) => count.malformed += 1,
            Err(e) => return Err(e),
        }
    }
    Ok(count)
}

/// Count non-blank lines without parsing them
pub fn count_lines(shard: &ShardHandle) -> Result<u64> {
    let unreadable = |e: std::io::Error| IngestError::ShardUnreadable {
        shard: shard.name.clone(),
        reason: e.to_string(),
    };
    let file = File::open(&shard.path).map_err(unreadable)?;
    let mut reader = BufReader::with_capacity(READ_BUFFER_BYTES, MultiGzDecoder::new(file));
    let mut buf = Vec::new();
    let mut lines = 0u64;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).map_err(unreadable)? == 0 {
            return Ok(lines);
        }
        if !buf.iter().all(u8::is_ascii_whitespace) {
            lines += 1;
        }
    }
}

/// Everything the decoding side reports to the async side
#[derive(Debug)]
pub enum DecodeEvent {
    Document {
        shard: Arc<str>,
        line: u64,
        document: Document,
    },
    /// `IngestError::MalformedRecord`
    Malformed(IngestError),
    /// `IngestError::ShardUnreadable`; no further events for that shard
    ShardFailed(IngestError),
    ShardFinished {
        shard: Arc<str>,
        documents: u64,
        malformed: u64,
    },
}

/// What the decoder got through before returning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Documents handed to the queue
    pub documents: u64,
    /// Every shard was read to its end or to its failure
    pub completed: bool,
}

/// Decode `shards` in order, pushing events into a bounded queue
///
/// Runs on a blocking thread. Returns early when the stop signal is raised or
/// the receiving side goes away.
pub fn decode_shards(
    shards: Vec<ShardHandle>,
    tx: mpsc::Sender<DecodeEvent>,
    cancel: CancellationToken,
) -> DecodeSummary {
    let mut summary = DecodeSummary::default();
    for shard in shards {
        if cancel.is_cancelled() {
            debug!("Stop signal raised, no further shards will be opened");
            return summary;
        }

        let span = info_span!("shard", shard = %shard.name, bytes = shard.size_bytes);
        let _entered = span.enter();

        let stream = match DocumentStream::open(&shard) {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Skipping unreadable shard");
                if tx.blocking_send(DecodeEvent::ShardFailed(e)).is_err() {
                    return summary;
                }
                continue;
            }
        };

        let name = Arc::clone(stream.shard_name());
        let mut documents = 0u64;
        let mut malformed = 0u64;
        let mut failed = false;

        for item in stream {
            if cancel.is_cancelled() {
                return summary;
            }
            let event = match item {
                Ok(decoded) => {
                    documents += 1;
                    DecodeEvent::Document {
                        shard: Arc::clone(&name),
                        line: decoded.line,
                        document: decoded.document,
                    }
                }
                Err(e @ IngestError::MalformedRecord { .. }) => {
                    malformed += 1;
                    warn!(error = %e, "Skipping malformed record");
                    DecodeEvent::Malformed(e)
                }
                Err(e) => {
                    failed = true;
                    error!(error = %e, documents, "Shard stream failed");
                    DecodeEvent::ShardFailed(e)
                }
            };
            let is_document = matches!(event, DecodeEvent::Document { .. });
            if tx.blocking_send(event).is_err() {
                return summary;
            }
            if is_document {
                summary.documents += 1;
            }
        }

        if !failed {
            debug!(documents, malformed, "Shard decoded");
            let finished = DecodeEvent::ShardFinished {
                shard: name,
                documents,
                malformed,
            };
            if tx.blocking_send(finished).is_err() {
                return summary;
            }
        }
    }
    summary.completed = true;
    summary
}
