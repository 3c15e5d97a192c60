//! Query result container format.
//!
//! A container is self-describing and record-oriented:
//!
//! ```text
//! [magic:4 = "RQC1"][schema_len:4 BE][schema JSON:schema_len]
//! [kind:1][length:4 BE][payload:length]   (repeated)
//! ```
//!
//! Record kinds:
//! - `0x00` Data: a slice of result bytes
//! - `0x01` Progress: JSON `{bytes_scanned, total_bytes}`
//! - `0x02` Error: JSON `{name, description, fatal, position}`
//! - `0x03` End: terminates the container; zero-length payload
//!
//! [`ContainerDecoder`] parses records incrementally from a chunked byte
//! stream; chunk boundaries never align with record boundaries. The
//! encode helpers produce containers for tests and producers.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;
use relay_pipeline::PipelineError;
use serde::{Deserialize, Serialize};

use crate::QueryError;

/// Container magic.
pub const MAGIC: &[u8; 4] = b"RQC1";

/// Size of a record header: kind byte plus big-endian length.
pub const RECORD_HEADER_SIZE: usize = 5;

/// Record kind byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Data = 0x00,
    Progress = 0x01,
    Error = 0x02,
    End = 0x03,
}

impl TryFrom<u8> for RecordKind {
    type Error = QueryError;

    fn try_from(value: u8) -> Result<Self, QueryError> {
        match value {
            0x00 => Ok(RecordKind::Data),
            0x01 => Ok(RecordKind::Progress),
            0x02 => Ok(RecordKind::Error),
            0x03 => Ok(RecordKind::End),
            other => Err(QueryError::Container(format!(
                "unknown record kind 0x{other:02x}"
            ))),
        }
    }
}

/// A decoded container record.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Data(Bytes),
    Progress(Progress),
    Error(ErrorRecord),
    End,
}

/// Scan progress reported by the producer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub bytes_scanned: u64,
    pub total_bytes: u64,
}

/// An error embedded in the container by the producer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub name: String,
    pub description: String,
    pub fatal: bool,
    #[serde(default)]
    pub position: Option<u64>,
}

impl From<ErrorRecord> for QueryError {
    fn from(record: ErrorRecord) -> Self {
        QueryError::Record {
            name: record.name,
            description: record.description,
            fatal: record.fatal,
            position: record.position,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for the 4-byte magic.
    Magic,
    /// Waiting for the schema length and blob.
    Schema,
    /// Reading records.
    Records,
}

/// Incremental decoder over a chunked byte stream.
///
/// Yields [`Record`]s in container order; the schema is available via
/// [`ContainerDecoder::schema`] once the header has been consumed.
pub struct ContainerDecoder<S> {
    stream: S,
    buffer: BytesMut,
    state: DecodeState,
    schema: Option<serde_json::Value>,
    finished: bool,
}

impl<S> ContainerDecoder<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::new(),
            state: DecodeState::Magic,
            schema: None,
            finished: false,
        }
    }

    /// The container's embedded schema, once decoded.
    pub fn schema(&self) -> Option<&serde_json::Value> {
        self.schema.as_ref()
    }

    /// Whether the End record has been seen.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Try to parse the next record from the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    fn try_parse(&mut self) -> Result<Option<Record>, QueryError> {
        loop {
            match self.state {
                DecodeState::Magic => {
                    if self.buffer.len() < MAGIC.len() {
                        return Ok(None);
                    }
                    let magic = self.buffer.split_to(MAGIC.len());
                    if magic[..] != MAGIC[..] {
                        return Err(QueryError::Container(format!(
                            "bad magic {:02x?}",
                            &magic[..]
                        )));
                    }
                    self.state = DecodeState::Schema;
                }
                DecodeState::Schema => {
                    if self.buffer.len() < 4 {
                        return Ok(None);
                    }
                    let schema_len =
                        u32::from_be_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
                            as usize;
                    if self.buffer.len() < 4 + schema_len {
                        return Ok(None);
                    }
                    self.buffer.advance(4);
                    let blob = self.buffer.split_to(schema_len);
                    let schema = serde_json::from_slice(&blob)
                        .map_err(|e| QueryError::Container(format!("invalid schema: {e}")))?;
                    self.schema = Some(schema);
                    self.state = DecodeState::Records;
                }
                DecodeState::Records => {
                    if self.buffer.len() < RECORD_HEADER_SIZE {
                        return Ok(None);
                    }
                    let kind = RecordKind::try_from(self.buffer[0])?;
                    let length =
                        u32::from_be_bytes([self.buffer[1], self.buffer[2], self.buffer[3], self.buffer[4]])
                            as usize;
                    if self.buffer.len() < RECORD_HEADER_SIZE + length {
                        return Ok(None);
                    }
                    self.buffer.advance(RECORD_HEADER_SIZE);
                    let payload = self.buffer.split_to(length).freeze();

                    let record = match kind {
                        RecordKind::Data => Record::Data(payload),
                        RecordKind::Progress => {
                            let progress = serde_json::from_slice(&payload).map_err(|e| {
                                QueryError::Container(format!("invalid progress record: {e}"))
                            })?;
                            Record::Progress(progress)
                        }
                        RecordKind::Error => {
                            let error = serde_json::from_slice(&payload).map_err(|e| {
                                QueryError::Container(format!("invalid error record: {e}"))
                            })?;
                            Record::Error(error)
                        }
                        RecordKind::End => {
                            self.finished = true;
                            Record::End
                        }
                    };
                    return Ok(Some(record));
                }
            }
        }
    }
}

impl<S> Unpin for ContainerDecoder<S> where S: Unpin {}

impl<S> Stream for ContainerDecoder<S>
where
    S: Stream<Item = Result<Bytes, PipelineError>> + Unpin,
{
    type Item = Result<Record, QueryError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            match this.try_parse() {
                Ok(Some(record)) => return Poll::Ready(Some(Ok(record))),
                Ok(None) => {}
                Err(e) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
            }

            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.buffer.extend_from_slice(&chunk);
                }
                Poll::Ready(Some(Err(e))) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                Poll::Ready(None) => {
                    // Source ended before the End record.
                    this.finished = true;
                    return Poll::Ready(Some(Err(QueryError::UnexpectedEof)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ============================================================================
// Encode helpers
// ============================================================================

/// Encode the container header for the given schema.
pub fn encode_header(schema: &serde_json::Value) -> Bytes {
    let blob = serde_json::to_vec(schema).unwrap_or_else(|_| b"{}".to_vec());
    let mut out = Vec::with_capacity(MAGIC.len() + 4 + blob.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(blob.len() as u32).to_be_bytes());
    out.extend_from_slice(&blob);
    Bytes::from(out)
}

fn encode_record(kind: RecordKind, payload: &[u8]) -> Bytes {
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    out.push(kind as u8);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Bytes::from(out)
}

/// Encode a data record.
pub fn encode_data(payload: &[u8]) -> Bytes {
    encode_record(RecordKind::Data, payload)
}

/// Encode a progress record.
pub fn encode_progress(progress: &Progress) -> Bytes {
    let payload = serde_json::to_vec(progress).unwrap_or_else(|_| b"{}".to_vec());
    encode_record(RecordKind::Progress, &payload)
}

/// Encode an error record.
pub fn encode_error(error: &ErrorRecord) -> Bytes {
    let payload = serde_json::to_vec(error).unwrap_or_else(|_| b"{}".to_vec());
    encode_record(RecordKind::Error, &payload)
}

/// Encode the End record.
pub fn encode_end() -> Bytes {
    encode_record(RecordKind::End, b"")
}
