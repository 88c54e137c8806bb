//! # TCP Transport
//!
//! One request per connection: the client writes a frame, reads the reply
//! frame, and both sides close. Every frame is length-prefixed:
//!
//! ```text
//! ┌──────────────┬─────────────────────┐
//! │ len[4] (LE)  │ body[len]           │
//! └──────────────┴─────────────────────┘
//! ```
//!
//! Every connect, read and write runs under a deadline. A peer that stops
//! talking costs us at most one timeout, never a stuck task.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("unexpected reply from {0}")]
    UnexpectedReply(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Runs `fut` with a deadline.
pub async fn with_deadline<T, E, F>(after: Duration, fut: F) -> Result<T, NetworkError>
where
    F: Future<Output = Result<T, E>>,
    NetworkError: From<E>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res.map_err(NetworkError::from),
        Err(_) => Err(NetworkError::Timeout(after)),
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<(), NetworkError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len()).map_err(|_| NetworkError::FrameTooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_u32_le(len).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame. The length is checked against `max` before anything
/// is allocated.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Vec<u8>, NetworkError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32_le().await? as usize;
    if len > max {
        return Err(NetworkError::FrameTooLarge { len, max });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Sends `body` to `addr` and returns the reply body.
pub async fn send(
    addr: &str,
    body: &[u8],
    io_timeout: Duration,
    max_frame: usize,
) -> Result<Vec<u8>, NetworkError> {
    let mut stream = with_deadline(io_timeout, TcpStream::connect(addr)).await?;
    with_deadline(io_timeout, write_frame(&mut stream, body)).await?;
    let reply = with_deadline(io_timeout, read_frame(&mut stream, max_frame)).await?;
    trace!(peer = %addr, sent = body.len(), received = reply.len(), "request completed");
    Ok(reply)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// One inbound request, with the connection its reply goes back on.
#[derive(Debug)]
pub struct Packet {
    pub body: Vec<u8>,
    pub stream: TcpStream,
    pub peer: SocketAddr,
}

impl Packet {
    /// Writes the reply frame and closes the connection.
    pub async fn reply(mut self, body: &[u8], io_timeout: Duration) -> Result<(), NetworkError> {
        with_deadline(io_timeout, write_frame(&mut self.stream, body)).await?;
        // Best effort: the peer already has its reply.
        let _ = self.stream.shutdown().await;
        Ok(())
    }
}

pub async fn bind(addr: &str) -> Result<TcpListener, NetworkError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| NetworkError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Accepts connections until `shutdown` flips, reading one frame from each
/// on its own task and forwarding it to `packets`.
pub async fn accept_loop(
    listener: TcpListener,
    packets: mpsc::Sender<Packet>,
    io_timeout: Duration,
    max_frame: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(local) = listener.local_addr() {
        info!(address = %local, "listening for peers");
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let packets = packets.clone();
                tokio::spawn(async move {
                    match with_deadline(io_timeout, read_frame(&mut stream, max_frame)).await {
                        Ok(body) => {
                            if packets.send(Packet { body, stream, peer }).await.is_err() {
                                debug!(peer = %peer, "dispatcher gone, dropping packet");
                            }
                        }
                        Err(e) => debug!(peer = %peer, error = %e, "dropping connection"),
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("listener shutting down");
                break;
            }
        }
    }
}
