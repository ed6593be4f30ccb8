//! Byte-stream capabilities of an inbound tunnel request.
//!
//! The transport hands the core a [`Responder`]; writing the status consumes
//! it and yields the request body reader plus the response body writer, so a
//! second status can never be written and no body byte can precede the first.

use crate::status::ProxyStatus;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Source of request body chunks.
#[async_trait]
pub trait BodyReader: Send + 'static {
    /// Next chunk, or `None` at end-of-stream.
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>>;
}

/// Explicit flush, for sinks that buffer.
#[async_trait]
pub trait Flush: Send {
    async fn flush(&mut self) -> io::Result<()>;
}

/// Sink for response body chunks.
#[async_trait]
pub trait BodyWriter: Send + 'static {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()>;

    /// Signal end-of-stream to the client.
    async fn finish(&mut self) -> io::Result<()>;

    /// Flush capability, if this sink has one.
    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        None
    }
}

/// Ability to commit the response head of one request.
#[async_trait]
pub trait Responder: Send {
    type Reader: BodyReader;
    type Writer: BodyWriter;

    /// Write `status` and its headers, then hand over the body streams.
    async fn respond(self, status: ProxyStatus) -> io::Result<(Self::Reader, Self::Writer)>;
}

/// Flushes the inner writer after every successful write when it can.
pub struct FlushingWriter<W> {
    inner: W,
}

impl<W: BodyWriter> FlushingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W: BodyWriter> BodyWriter for FlushingWriter<W> {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.inner.write_chunk(chunk).await?;
        if let Some(flusher) = self.inner.flusher() {
            flusher.flush().await?;
        }
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.inner.finish().await
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        self.inner.flusher()
    }
}

/// [`BodyReader`] over any tokio reader.
pub struct IoReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R> IoReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0u8; READ_CHUNK_SIZE],
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> BodyReader for IoReader<R> {
    async fn read_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let n = self.inner.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Bytes::copy_from_slice(&self.buf[..n])))
    }
}

/// [`BodyWriter`] over any tokio writer; exposes the writer's flush.
pub struct IoWriter<W> {
    inner: W,
}

impl<W> IoWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> Flush for IoWriter<W> {
    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> BodyWriter for IoWriter<W> {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.inner.write_all(&chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    fn flusher(&mut self) -> Option<&mut dyn Flush> {
        Some(self)
    }
}
