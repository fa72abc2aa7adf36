//! Socket transport
//!
//! Endpoints are `tcp://host:port` or `ipc:///path/to.sock`. Every frame on
//! the wire is a big-endian `u32` length followed by that many bytes.

use crate::error::{BusError, Result};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{debug, info, warn};

pub type FrameReader = Box<dyn AsyncRead + Send + Unpin>;
pub type FrameWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Parsed bus address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Ipc(PathBuf),
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(addr) = url.strip_prefix("tcp://") {
            if addr.is_empty() || !addr.contains(':') {
                return Err(BusError::endpoint(url, "expected tcp://host:port"));
            }
            // `tcp://*:port` listens on every interface
            let addr = match addr.strip_prefix("*:") {
                Some(port) => format!("0.0.0.0:{}", port),
                None => addr.to_string(),
            };
            return Ok(Self::Tcp(addr));
        }

        if let Some(path) = url.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(BusError::endpoint(url, "expected ipc:///path"));
            }
            return Ok(Self::Ipc(PathBuf::from(path)));
        }

        Err(BusError::endpoint(url, "unsupported scheme"))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}

/// Bound listening socket
pub enum Listener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str())
                    .await
                    .map_err(|e| BusError::network(format!("Failed to bind {}", addr), e))?;
                info!("Bus listening on tcp://{}", addr);
                Ok(Self::Tcp(listener))
            }
            Endpoint::Ipc(path) => {
                if path.exists() {
                    std::fs::remove_file(path).map_err(|e| {
                        BusError::network("Failed to remove existing socket", e)
                    })?;
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        BusError::network("Failed to create socket directory", e)
                    })?;
                }
                let listener = UnixListener::bind(path)
                    .map_err(|e| BusError::network("Failed to bind Unix socket", e))?;
                info!("Bus listening on ipc://{}", path.display());
                Ok(Self::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    /// Address actually bound, with the kernel-assigned port for `:0`
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match self {
            Self::Tcp(listener) => {
                let addr = listener
                    .local_addr()
                    .map_err(|e| BusError::network("Failed to read local address", e))?;
                Ok(Endpoint::Tcp(addr.to_string()))
            }
            Self::Unix { path, .. } => Ok(Endpoint::Ipc(path.clone())),
        }
    }

    pub async fn accept(&self) -> Result<(FrameReader, FrameWriter, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener
                    .accept()
                    .await
                    .map_err(|e| BusError::network("Failed to accept connection", e))?;
                configure_tcp(&stream);
                let (reader, writer) = stream.into_split();
                debug!(%peer, "Accepted TCP connection");
                Ok((Box::new(reader), Box::new(writer), peer.to_string()))
            }
            Self::Unix { listener, path } => {
                let (stream, _) = listener
                    .accept()
                    .await
                    .map_err(|e| BusError::network("Failed to accept connection", e))?;
                let (reader, writer) = stream.into_split();
                debug!("Accepted Unix socket connection");
                Ok((Box::new(reader), Box::new(writer), path.display().to_string()))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

pub async fn connect(endpoint: &Endpoint) -> Result<(FrameReader, FrameWriter)> {
    match endpoint {
        Endpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str())
                .await
                .map_err(|e| BusError::network(format!("Failed to connect to {}", addr), e))?;
            configure_tcp(&stream);
            let (reader, writer) = stream.into_split();
            Ok((Box::new(reader), Box::new(writer)))
        }
        Endpoint::Ipc(path) => {
            let stream = UnixStream::connect(path)
                .await
                .map_err(|e| BusError::network("Failed to connect to Unix socket", e))?;
            let (reader, writer) = stream.into_split();
            Ok((Box::new(reader), Box::new(writer)))
        }
    }
}

fn configure_tcp(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| BusError::FrameTooLarge {
        size: data.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(4 + data.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(data);

    writer
        .write_all(&buf)
        .await
        .map_err(|e| BusError::network("Failed to write frame", e))?;
    writer
        .flush()
        .await
        .map_err(|e| BusError::network("Failed to flush stream", e))?;
    Ok(())
}

/// Next frame, or `None` when the peer closed the connection cleanly
pub async fn read_frame<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
    max_size: usize,
) -> Result<Option<Bytes>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BusError::network("Failed to read frame length", e)),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_size {
        return Err(BusError::FrameTooLarge {
            size: len,
            max: max_size,
        });
    }

    let mut buf = BytesMut::zeroed(len);
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| BusError::network("Failed to read frame data", e))?;
    Ok(Some(buf.freeze()))
}
