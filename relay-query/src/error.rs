//! Query error types.

use relay_pipeline::PipelineError;

/// Errors surfaced while decoding or reading a query result container.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// An error record embedded in the container by the producer.
    #[error("query error '{name}': {description}")]
    Record {
        /// Machine-readable error name from the record.
        name: String,
        /// Human-readable description from the record.
        description: String,
        /// Whether the producer marked the error as fatal.
        fatal: bool,
        /// Byte position within the scanned source, when reported.
        position: Option<u64>,
    },

    /// A backward seek reached past the retained replay window.
    #[error("seek to {requested} is before the retained window starting at {window_start}")]
    WindowExceeded { requested: u64, window_start: u64 },

    /// Malformed container: bad magic, bad framing, undecodable schema
    /// or record payload.
    #[error("malformed container: {0}")]
    Container(String),

    /// The byte source ended before the container did.
    #[error("unexpected end of container stream")]
    UnexpectedEof,

    /// Failure in the underlying byte source.
    #[error(transparent)]
    Transport(#[from] PipelineError),
}

impl QueryError {
    /// Whether this is a fatal embedded error record.
    pub fn is_fatal_record(&self) -> bool {
        matches!(self, QueryError::Record { fatal: true, .. })
    }
}
