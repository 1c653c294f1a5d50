use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use super::*;
use crate::telnet::{TelnetCodec, TelnetFrame};

/// A byte stream to the router with no protocol knowledge.
///
/// Reads may return any amount of text; callers must not assume framing.
pub trait Transport: Send {
    /// Reads the next available chunk of shell text, waiting at most `deadline`.
    ///
    /// An elapsed deadline is reported as [`io::ErrorKind::TimedOut`] and the
    /// remote side closing the stream as [`io::ErrorKind::UnexpectedEof`].
    fn read_chunk(&mut self, deadline: Duration)
    -> impl Future<Output = io::Result<Bytes>> + Send;

    /// Writes raw bytes to the router.
    fn write_all(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Flushes and closes the connection.
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Telnet connection to the router over TCP.
pub struct TelnetTransport {
    framed: Framed<TcpStream, TelnetCodec>,
}

impl TelnetTransport {
    /// Resolves the configured address and dials the first acceptable result.
    pub async fn connect(options: &ConnectOptions) -> Result<TelnetTransport, ConnectError> {
        let address = options.address();
        let network_type = options.network_type();
        let candidates = tokio::net::lookup_host(&address)
            .await
            .map_err(ConnectError::ConnectFailed)?
            .filter(|addr| network_type.accepts(addr))
            .collect::<Vec<_>>();

        let mut last_err = io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {network_type:?} address found for {address}"),
        );
        for candidate in candidates {
            match TcpStream::connect(candidate).await {
                Ok(stream) => {
                    debug!("{} TCP connection successful", candidate);
                    return Ok(Self::from_stream(stream));
                }
                Err(err) => {
                    debug!("{} TCP connection failed: {:?}", candidate, err);
                    last_err = err;
                }
            }
        }
        Err(ConnectError::ConnectFailed(last_err))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, TelnetCodec::new()),
        }
    }
}

impl Transport for TelnetTransport {
    async fn read_chunk(&mut self, deadline: Duration) -> io::Result<Bytes> {
        let framed = &mut self.framed;
        let read = async {
            loop {
                match framed.next().await {
                    Some(Ok(TelnetFrame::Data(data))) => return Ok(data),
                    Some(Ok(frame)) => {
                        if let Some(reply) = frame.refusal() {
                            trace!("refusing telnet option: {:?}", frame);
                            framed.send(reply).await?;
                        }
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "connection closed by router",
                        ));
                    }
                }
            }
        };

        match tokio::time::timeout(deadline, read).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no data within {deadline:?}"),
            )),
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.framed
            .send(TelnetFrame::Data(Bytes::copy_from_slice(data)))
            .await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.framed.close().await
    }
}
