use crate::body::{BodyReader, BodyWriter, FlushingWriter};
use crate::error::{Direction, ProxyError};
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved by a tunnel that ran to completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Client to destination.
    pub upstream_bytes: u64,
    /// Destination to client.
    pub downstream_bytes: u64,
}

impl RelayStats {
    fn record(&mut self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Upstream => self.upstream_bytes = bytes,
            Direction::Downstream => self.downstream_bytes = bytes,
        }
    }
}

/// Copy bytes both ways between an established request and its outbound
/// connection until both directions are done.
///
/// Each direction runs in its own task and finishes on its own; neither is
/// cut short when the other ends. The first error of either is returned once
/// both have stopped. Cancelling `cancel` aborts both tasks, which closes the
/// outbound connection.
///
/// The outbound socket is owned by the two copy tasks and is released when
/// the second of them drops its half.
pub async fn relay<R, W>(
    body: R,
    outbound: TcpStream,
    writer: W,
    cancel: &CancellationToken,
) -> Result<RelayStats, ProxyError>
where
    R: BodyReader,
    W: BodyWriter,
{
    let (outbound_read, outbound_write) = outbound.into_split();

    let mut tasks = JoinSet::new();
    tasks.spawn(copy_upstream(body, outbound_write));
    tasks.spawn(copy_downstream(outbound_read, FlushingWriter::new(writer)));

    let mut stats = RelayStats::default();
    let mut first_error = None;

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok(Ok((direction, bytes)))) => {
                    debug!("{} finished after {} bytes", direction, bytes);
                    stats.record(direction, bytes);
                }
                Some(Ok(Err(e))) => {
                    first_error.get_or_insert(e);
                }
                Some(Err(e)) => {
                    first_error.get_or_insert(ProxyError::Io(std::io::Error::other(e)));
                }
            },
            _ = cancel.cancelled() => {
                tasks.shutdown().await;
                first_error.get_or_insert(ProxyError::Cancelled);
                break;
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(stats),
    }
}

/// Request body into the outbound socket; half-closes the socket at the end.
async fn copy_upstream<R: BodyReader>(
    mut body: R,
    mut outbound: OwnedWriteHalf,
) -> Result<(Direction, u64), ProxyError> {
    let direction = Direction::Upstream;
    let mut bytes = 0u64;

    while let Some(chunk) = body
        .read_chunk()
        .await
        .map_err(|e| ProxyError::relay(direction, e))?
    {
        outbound
            .write_all(&chunk)
            .await
            .map_err(|e| ProxyError::relay(direction, e))?;
        bytes += chunk.len() as u64;
    }

    outbound
        .shutdown()
        .await
        .map_err(|e| ProxyError::relay(direction, e))?;
    Ok((direction, bytes))
}

/// Outbound socket into the response body; finishes the response at the end.
async fn copy_downstream<W: BodyWriter>(
    mut outbound: OwnedReadHalf,
    mut writer: FlushingWriter<W>,
) -> Result<(Direction, u64), ProxyError> {
    let direction = Direction::Downstream;
    let mut bytes = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    loop {
        let n = outbound
            .read(&mut buf)
            .await
            .map_err(|e| ProxyError::relay(direction, e))?;
        if n == 0 {
            break;
        }
        writer
            .write_chunk(bytes::Bytes::copy_from_slice(&buf[..n]))
            .await
            .map_err(|e| ProxyError::relay(direction, e))?;
        bytes += n as u64;
    }

    writer
        .finish()
        .await
        .map_err(|e| ProxyError::relay(direction, e))?;
    Ok((direction, bytes))
}
