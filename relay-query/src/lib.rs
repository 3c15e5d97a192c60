//! Streaming reader for self-describing query result containers.
//!
//! A producer streams results back as a length-delimited record
//! container: a magic and JSON schema header followed by data, progress,
//! error, and end records. This crate decodes that container
//! incrementally from any chunked byte source, typically the streaming
//! body of a [`relay_pipeline`] response.
//!
//! - [`ContainerDecoder`] yields raw [`Record`]s.
//! - [`QueryReader`] yields data payloads, tracks progress, and handles
//!   embedded error records per [`OnError`].
//! - [`StreamCursor`] gives blocking consumers a forward cursor with a
//!   bounded replay window.
//!
//! ```ignore
//! use futures::StreamExt;
//! use relay_query::QueryReader;
//!
//! let response = pipeline.run_with_options(request, options).await?;
//! let mut reader = QueryReader::new(response.into_stream()?);
//! while let Some(chunk) = reader.next().await {
//!     sink.write_all(&chunk?)?;
//! }
//! ```

pub mod container;
pub mod cursor;
mod error;
pub mod reader;

pub use container::{
    encode_data, encode_end, encode_error, encode_header, encode_progress, ContainerDecoder,
    ErrorRecord, Progress, Record, RecordKind,
};
pub use cursor::{StreamCursor, REPLAY_WINDOW};
pub use error::QueryError;
pub use reader::{ErrorCallback, OnError, QueryReader, RecordStream};
