//! Bounded audio ingress buffer.
//!
//! The decoupling point between the client-driven ingress rate and the
//! upstream-driven egress rate: a bounded FIFO of opaque PCM byte chunks
//! with exactly one producer (the client reader) and one consumer (the
//! upstream audio pump). It neither batches nor reorders.
//!
//! The single-writer/single-reader invariant holds by construction: the
//! channel is created as a split [`AudioWriter`]/[`AudioReader`] pair and
//! neither half is cloneable.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by the ingress buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// Write attempted after the buffer was closed.
    #[error("audio stream closed")]
    StreamClosed,

    /// The buffer is closed and fully drained.
    #[error("end of audio stream")]
    EndOfStream,
}

/// Creates a bounded ingress buffer, returning its producer and consumer halves.
///
/// `capacity` is the maximum number of queued chunks; when full, `write`
/// blocks, which in turn throttles the client read loop.
pub fn ingress_channel(capacity: usize) -> (AudioWriter, AudioReader) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        AudioWriter { tx },
        AudioReader {
            rx,
            carryover: None,
        },
    )
}

/// Producer half of the ingress buffer.
pub struct AudioWriter {
    tx: mpsc::Sender<Bytes>,
}

impl AudioWriter {
    /// Copies `chunk` into the buffer, waiting for space when full.
    ///
    /// The argument is copied so callers may reuse their buffer immediately.
    /// Fails with [`AudioError::StreamClosed`] once the reader side is gone.
    pub async fn write(&self, chunk: &[u8]) -> Result<(), AudioError> {
        self.tx
            .send(Bytes::copy_from_slice(chunk))
            .await
            .map_err(|_| AudioError::StreamClosed)
    }

    /// Closes the buffer.
    ///
    /// Chunks already enqueued remain readable; after the queue drains the
    /// reader observes [`AudioError::EndOfStream`].
    pub fn close(self) {
        drop(self.tx);
    }
}

/// Consumer half of the ingress buffer.
pub struct AudioReader {
    rx: mpsc::Receiver<Bytes>,
    /// Remainder of a chunk larger than the caller's destination slice.
    carryover: Option<Bytes>,
}

impl AudioReader {
    /// Dequeues one chunk and copies up to `dst.len()` bytes into `dst`.
    ///
    /// A chunk larger than `dst` is split: the remainder is returned by the
    /// next call before any newer chunk. Returns the number of bytes copied;
    /// a zero-byte chunk yields `Ok(0)` without meaning end of stream.
    pub async fn read(&mut self, dst: &mut [u8]) -> Result<usize, AudioError> {
        let chunk = match self.take_chunk().await {
            Some(chunk) => chunk,
            None => return Err(AudioError::EndOfStream),
        };

        let n = chunk.len().min(dst.len());
        dst[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.carryover = Some(chunk.slice(n..));
        }
        Ok(n)
    }

    /// Dequeues one whole chunk, or `None` once closed and drained.
    ///
    /// Used by the audio pump, which forwards chunks verbatim and has no
    /// destination slice to fill.
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        self.take_chunk().await
    }

    async fn take_chunk(&mut self) -> Option<Bytes> {
        if let Some(rest) = self.carryover.take() {
            return Some(rest);
        }
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_chunks_in_order() {
        let (writer, mut reader) = ingress_channel(4);
        writer.write(b"one").await.unwrap();
        writer.write(b"two").await.unwrap();

        assert_eq!(reader.next_chunk().await.unwrap().as_ref(), b"one");
        assert_eq!(reader.next_chunk().await.unwrap().as_ref(), b"two");
    }

    #[tokio::test]
    async fn write_copies_the_callers_buffer() {
        let (writer, mut reader) = ingress_channel(4);
        let mut buf = *b"abc";
        writer.write(&buf).await.unwrap();
        buf.copy_from_slice(b"xyz");

        assert_eq!(reader.next_chunk().await.unwrap().as_ref(), b"abc");
    }

    #[tokio::test]
    async fn close_then_drain_then_end_of_stream() {
        let (writer, mut reader) = ingress_channel(4);
        writer.write(b"tail").await.unwrap();
        writer.close();

        let mut dst = [0u8; 16];
        assert_eq!(reader.read(&mut dst).await.unwrap(), 4);
        assert_eq!(&dst[..4], b"tail");
        assert_eq!(reader.read(&mut dst).await, Err(AudioError::EndOfStream));
    }

    #[tokio::test]
    async fn write_fails_after_reader_dropped() {
        let (writer, reader) = ingress_channel(4);
        drop(reader);
        assert_eq!(writer.write(b"x").await, Err(AudioError::StreamClosed));
    }

    #[tokio::test]
    async fn oversized_chunk_carries_over() {
        let (writer, mut reader) = ingress_channel(4);
        writer.write(b"0123456789").await.unwrap();
        writer.write(b"next").await.unwrap();

        let mut dst = [0u8; 4];
        assert_eq!(reader.read(&mut dst).await.unwrap(), 4);
        assert_eq!(&dst, b"0123");
        assert_eq!(reader.read(&mut dst).await.unwrap(), 4);
        assert_eq!(&dst, b"4567");
        assert_eq!(reader.read(&mut dst).await.unwrap(), 2);
        assert_eq!(&dst[..2], b"89");
        // Carryover exhausted; the next chunk follows in order.
        assert_eq!(reader.read(&mut dst).await.unwrap(), 4);
        assert_eq!(&dst, b"next");
    }

    #[tokio::test]
    async fn zero_byte_chunk_is_not_end_of_stream() {
        let (writer, mut reader) = ingress_channel(4);
        writer.write(b"").await.unwrap();
        writer.write(b"data").await.unwrap();

        let mut dst = [0u8; 8];
        assert_eq!(reader.read(&mut dst).await.unwrap(), 0);
        assert_eq!(reader.read(&mut dst).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn full_buffer_blocks_writer() {
        let (writer, mut reader) = ingress_channel(1);
        writer.write(b"a").await.unwrap();

        // Second write must wait for the reader to free a slot.
        let pending = writer.write(b"b");
        tokio::pin!(pending);
        assert!(futures::poll!(pending.as_mut()).is_pending());

        assert_eq!(reader.next_chunk().await.unwrap().as_ref(), b"a");
        pending.await.unwrap();
        assert_eq!(reader.next_chunk().await.unwrap().as_ref(), b"b");
    }

    #[tokio::test]
    async fn write_then_close_delivers_everything_before_eof() {
        let (writer, mut reader) = ingress_channel(8);
        for i in 0..5u8 {
            writer.write(&[i]).await.unwrap();
        }
        writer.close();

        for i in 0..5u8 {
            assert_eq!(reader.next_chunk().await.unwrap().as_ref(), &[i]);
        }
        assert!(reader.next_chunk().await.is_none());
    }
}
