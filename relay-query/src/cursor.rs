//! Bounded-replay cursor over a chunked byte source.

use bytes::{Buf, Bytes, BytesMut};

use crate::QueryError;

/// Minimum (and default) number of already-read bytes kept for replay.
pub const REPLAY_WINDOW: usize = 16;

/// Forward cursor over an iterator of byte chunks with a small replay
/// window for backward seeks.
///
/// Reads pull chunks on demand; bytes more than the window size behind
/// the cursor are discarded, so memory stays bounded regardless of how
/// much has been read. Seeking backward works only within the retained
/// window and fails with [`QueryError::WindowExceeded`] past it.
#[derive(Debug)]
pub struct StreamCursor<I> {
    source: I,
    buffer: BytesMut,
    /// Absolute offset of `buffer[0]` within the stream.
    buffer_start: u64,
    /// Absolute cursor position.
    position: u64,
    window: usize,
    exhausted: bool,
}

impl<I> StreamCursor<I>
where
    I: Iterator<Item = Bytes>,
{
    /// Create a cursor with the default replay window.
    pub fn new(source: I) -> Self {
        Self::with_window(source, REPLAY_WINDOW)
    }

    /// Create a cursor retaining at least `window` bytes behind the
    /// cursor. Values below [`REPLAY_WINDOW`] are raised to it.
    pub fn with_window(source: I, window: usize) -> Self {
        Self {
            source,
            buffer: BytesMut::new(),
            buffer_start: 0,
            position: 0,
            window: window.max(REPLAY_WINDOW),
            exhausted: false,
        }
    }

    /// Current absolute position.
    pub fn tell(&self) -> u64 {
        self.position
    }

    /// Read up to `n` bytes, advancing the cursor. Returns fewer bytes
    /// only at end of stream, and an empty buffer once exhausted.
    pub fn read(&mut self, n: usize) -> Bytes {
        self.fill_to(self.position + n as u64);

        let offset = (self.position - self.buffer_start) as usize;
        let available = self.buffer.len().saturating_sub(offset);
        let take = n.min(available);
        let out = Bytes::copy_from_slice(&self.buffer[offset..offset + take]);
        self.position += take as u64;
        self.trim();
        out
    }

    /// Move the cursor to an absolute position.
    ///
    /// Forward seeks read and discard. Backward seeks succeed only
    /// within the retained replay window.
    pub fn seek(&mut self, pos: u64) -> Result<(), QueryError> {
        if pos < self.buffer_start {
            return Err(QueryError::WindowExceeded {
                requested: pos,
                window_start: self.buffer_start,
            });
        }
        if pos > self.position {
            self.fill_to(pos);
            let end = self.buffer_start + self.buffer.len() as u64;
            // Seeking past EOF parks the cursor at the end.
            self.position = pos.min(end);
            self.trim();
        } else {
            self.position = pos;
        }
        Ok(())
    }

    /// Pull chunks until the buffer covers `target` or the source ends.
    fn fill_to(&mut self, target: u64) {
        while !self.exhausted && self.buffer_start + (self.buffer.len() as u64) < target {
            match self.source.next() {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => self.exhausted = true,
            }
        }
    }

    /// Drop bytes more than `window` behind the cursor.
    fn trim(&mut self) {
        let keep_from = self.position.saturating_sub(self.window as u64);
        if keep_from > self.buffer_start {
            let drop = (keep_from - self.buffer_start) as usize;
            self.buffer.advance(drop);
            self.buffer_start = keep_from;
        }
    }
}
