//! Streaming query result reader.
//!
//! [`QueryReader`] consumes a chunked byte source carrying a result
//! container and yields data payloads in order. Progress records update
//! [`QueryReader::bytes_processed`] and [`QueryReader::total_bytes`];
//! embedded error records are raised, skipped, or referred to a caller
//! callback per [`OnError`].

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use relay_pipeline::PipelineError;

use crate::container::{ContainerDecoder, ErrorRecord, Record};
use crate::QueryError;

/// Decision callback for embedded error records: return `true` to keep
/// reading, `false` to raise.
pub type ErrorCallback = Arc<dyn Fn(&ErrorRecord) -> bool + Send + Sync>;

/// How embedded error records are handled.
#[derive(Clone, Default)]
pub enum OnError {
    /// Raise every error record as [`QueryError::Record`].
    #[default]
    Raise,
    /// Skip every error record, fatal ones included, and keep reading.
    Ignore,
    /// Ask the callback per record.
    Callback(ErrorCallback),
}

impl std::fmt::Debug for OnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnError::Raise => write!(f, "OnError::Raise"),
            OnError::Ignore => write!(f, "OnError::Ignore"),
            OnError::Callback(_) => write!(f, "OnError::Callback"),
        }
    }
}

/// Forward-only reader over a query result container.
///
/// # Example
///
/// ```ignore
/// use futures::StreamExt;
/// use relay_query::QueryReader;
///
/// let mut reader = QueryReader::new(response.into_stream()?);
/// while let Some(chunk) = reader.next().await {
///     handle(chunk?);
/// }
/// println!("{}/{} bytes scanned", reader.bytes_processed(), reader.total_bytes());
/// ```
pub struct QueryReader<S> {
    decoder: ContainerDecoder<S>,
    on_error: OnError,
    bytes_processed: u64,
    total_bytes: u64,
}

impl<S> QueryReader<S> {
    /// Create a reader raising every embedded error record.
    pub fn new(source: S) -> Self {
        Self::with_error_mode(source, OnError::Raise)
    }

    /// Create a reader with an explicit error handling mode.
    pub fn with_error_mode(source: S, on_error: OnError) -> Self {
        Self {
            decoder: ContainerDecoder::new(source),
            on_error,
            bytes_processed: 0,
            total_bytes: 0,
        }
    }

    /// Bytes of the source the producer has scanned so far.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Total bytes the producer will scan, once reported.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// The container's embedded schema, once decoded.
    pub fn schema(&self) -> Option<&serde_json::Value> {
        self.decoder.schema()
    }

    fn handle_error_record(&self, record: ErrorRecord) -> Option<QueryError> {
        match &self.on_error {
            OnError::Raise => Some(record.into()),
            OnError::Ignore => {
                tracing::warn!(
                    name = %record.name,
                    fatal = record.fatal,
                    "ignoring embedded error record"
                );
                None
            }
            OnError::Callback(callback) => {
                if callback(&record) {
                    None
                } else {
                    Some(record.into())
                }
            }
        }
    }
}

impl<S> QueryReader<S>
where
    S: Stream<Item = Result<Bytes, PipelineError>> + Unpin,
{
    /// Read the whole result, concatenating every data payload.
    pub async fn readall(&mut self) -> Result<Bytes, QueryError> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }

    /// Split the result on a delimiter, yielding one item per delimited
    /// record. A trailing record without the delimiter is yielded too.
    pub fn records(self, delimiter: u8) -> RecordStream<S> {
        RecordStream {
            reader: self,
            pending: BytesMut::new(),
            done: false,
            delimiter,
        }
    }
}

impl<S> Stream for QueryReader<S>
where
    S: Stream<Item = Result<Bytes, PipelineError>> + Unpin,
{
    type Item = Result<Bytes, QueryError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match futures::ready!(Pin::new(&mut this.decoder).poll_next(cx)) {
                Some(Ok(Record::Data(payload))) => return Poll::Ready(Some(Ok(payload))),
                Some(Ok(Record::Progress(progress))) => {
                    this.bytes_processed = progress.bytes_scanned;
                    this.total_bytes = progress.total_bytes;
                }
                Some(Ok(Record::End)) => {
                    // The producer finished scanning everything it reported.
                    if this.total_bytes > 0 {
                        this.bytes_processed = this.total_bytes;
                    }
                    return Poll::Ready(None);
                }
                Some(Ok(Record::Error(record))) => {
                    if let Some(err) = this.handle_error_record(record) {
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => return Poll::Ready(None),
            }
        }
    }
}

impl<S> std::fmt::Debug for QueryReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryReader")
            .field("on_error", &self.on_error)
            .field("bytes_processed", &self.bytes_processed)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

/// Stream of delimiter-split records over a [`QueryReader`].
pub struct RecordStream<S> {
    reader: QueryReader<S>,
    pending: BytesMut,
    done: bool,
    delimiter: u8,
}

impl<S> Stream for RecordStream<S>
where
    S: Stream<Item = Result<Bytes, PipelineError>> + Unpin,
{
    type Item = Result<Bytes, QueryError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(pos) = this.pending.iter().position(|&b| b == this.delimiter) {
                let mut record = this.pending.split_to(pos + 1);
                record.truncate(pos);
                return Poll::Ready(Some(Ok(record.freeze())));
            }
            if this.done {
                if this.pending.is_empty() {
                    return Poll::Ready(None);
                }
                let rest = std::mem::take(&mut this.pending);
                return Poll::Ready(Some(Ok(rest.freeze())));
            }

            match futures::ready!(Pin::new(&mut this.reader).poll_next(cx)) {
                Some(Ok(chunk)) => this.pending.extend_from_slice(&chunk),
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => this.done = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{
        encode_data, encode_end, encode_error, encode_header, encode_progress, Progress,
    };
    use std::sync::atomic::{AtomicU32, Ordering};

    fn chunked(data: Vec<u8>, chunk_size: usize) -> impl Stream<Item = Result<Bytes, PipelineError>> + Unpin {
        let chunks: Vec<Result<Bytes, PipelineError>> = data
            .chunks(chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(chunks)
    }

    fn container_with_error(fatal: bool) -> Vec<u8> {
        let mut data = encode_header(&serde_json::json!({"format": "csv"})).to_vec();
        data.extend_from_slice(&encode_data(b"1,2\n"));
        data.extend_from_slice(&encode_error(&ErrorRecord {
            name: "BadRow".into(),
            description: "row 2 is malformed".into(),
            fatal,
            position: Some(4),
        }));
        data.extend_from_slice(&encode_data(b"3,4\n"));
        data.extend_from_slice(&encode_progress(&Progress {
            bytes_scanned: 8,
            total_bytes: 8,
        }));
        data.extend_from_slice(&encode_end());
        data
    }

    #[tokio::test]
    async fn test_readall_concatenates_data() {
        let mut data = encode_header(&serde_json::json!({})).to_vec();
        data.extend_from_slice(&encode_data(b"hello "));
        data.extend_from_slice(&encode_data(b"world"));
        data.extend_from_slice(&encode_end());

        let mut reader = QueryReader::new(chunked(data, 3));
        assert_eq!(reader.readall().await.unwrap(), Bytes::from("hello world"));
    }

    #[tokio::test]
    async fn test_error_record_raises_by_default() {
        let mut reader = QueryReader::new(chunked(container_with_error(false), 1024));

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first, Bytes::from("1,2\n"));

        let err = reader.next().await.unwrap().unwrap_err();
        match err {
            QueryError::Record { name, fatal, .. } => {
                assert_eq!(name, "BadRow");
                assert!(!fatal);
            }
            other => panic!("expected record error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fatal_record_raises_by_default() {
        let mut reader = QueryReader::new(chunked(container_with_error(true), 1024));
        let _ = reader.next().await.unwrap().unwrap();
        let err = reader.next().await.unwrap().unwrap_err();
        assert!(err.is_fatal_record());
    }

    #[tokio::test]
    async fn test_ignore_skips_fatal_records_too() {
        let mut reader = QueryReader::with_error_mode(
            chunked(container_with_error(true), 1024),
            OnError::Ignore,
        );
        let all = reader.readall().await.unwrap();
        assert_eq!(all, Bytes::from("1,2\n3,4\n"));
    }

    #[tokio::test]
    async fn test_callback_decides_per_record() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_cb = seen.clone();
        let mut reader = QueryReader::with_error_mode(
            chunked(container_with_error(false), 1024),
            OnError::Callback(Arc::new(move |record| {
                seen_cb.fetch_add(1, Ordering::SeqCst);
                !record.fatal
            })),
        );

        let all = reader.readall().await.unwrap();
        assert_eq!(all, Bytes::from("1,2\n3,4\n"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_false_raises() {
        let mut reader = QueryReader::with_error_mode(
            chunked(container_with_error(false), 1024),
            OnError::Callback(Arc::new(|_| false)),
        );
        let err = reader.readall().await.unwrap_err();
        assert!(matches!(err, QueryError::Record { .. }));
    }

    #[tokio::test]
    async fn test_progress_tracking() {
        let data = container_with_error(false);
        let mut reader = QueryReader::with_error_mode(chunked(data, 5), OnError::Ignore);
        assert_eq!(reader.bytes_processed(), 0);

        reader.readall().await.unwrap();
        assert_eq!(reader.bytes_processed(), 8);
        assert_eq!(reader.total_bytes(), 8);
    }

    #[tokio::test]
    async fn test_records_split_on_delimiter() {
        let mut data = encode_header(&serde_json::json!({})).to_vec();
        // Record boundary falls inside a data payload.
        data.extend_from_slice(&encode_data(b"one\ntw"));
        data.extend_from_slice(&encode_data(b"o\nthree"));
        data.extend_from_slice(&encode_end());

        let reader = QueryReader::new(chunked(data, 4));
        let records: Vec<Bytes> = reader
            .records(b'\n')
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(
            records,
            vec![
                Bytes::from("one"),
                Bytes::from("two"),
                Bytes::from("three"),
            ]
        );
    }

    #[tokio::test]
    async fn test_schema_available_after_first_read() {
        let mut data = encode_header(&serde_json::json!({"format": "csv"})).to_vec();
        data.extend_from_slice(&encode_data(b"x"));
        data.extend_from_slice(&encode_end());

        let mut reader = QueryReader::new(chunked(data, 1024));
        assert!(reader.schema().is_none());
        let _ = reader.next().await.unwrap().unwrap();
        assert_eq!(reader.schema(), Some(&serde_json::json!({"format": "csv"})));
    }
}
