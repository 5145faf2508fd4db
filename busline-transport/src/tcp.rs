//! `tcp://` transport (spec §4.2a), grounded in the teacher's
//! `TcpChannel`/`TcpListener` split: a thin wrapper over
//! `tokio::net::{TcpStream, TcpListener}` with socket options applied via
//! `socket2::SockRef`, the same indirection the teacher's
//! `TcpSocketConfig::apply` uses to set `SO_LINGER` without exposing
//! `socket2` types to callers.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use busline_core::channel::{Channel, ServerChannel, TransportProvider};
use busline_core::error::{codes, BusError};
use busline_core::url::{BusUrl, PortSpec};
use socket2::SockRef;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};

use crate::error::map_io_error;

/// Socket options applied at connect/accept time, mirroring the teacher's
/// `TcpSocketConfig`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpSocketConfig {
    pub linger: Option<Duration>,
    pub reuse_address: bool,
}

impl TcpSocketConfig {
    fn apply(&self, stream: &TcpStream) -> std::io::Result<()> {
        let sock = SockRef::from(stream);
        sock.set_linger(self.linger)?;
        stream.set_nodelay(true)?;
        Ok(())
    }
}

pub struct TcpChannel {
    stream: TcpStream,
    local: SocketAddr,
    peer: SocketAddr,
}

impl TcpChannel {
    fn from_parts(stream: TcpStream, local: SocketAddr, peer: SocketAddr) -> Self {
        TcpChannel { stream, local, peer }
    }
}

impl tokio::io::AsyncRead for TcpChannel {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for TcpChannel {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

impl Channel for TcpChannel {
    fn local_addr_description(&self) -> String {
        self.local.to_string()
    }

    fn peer_addr_description(&self) -> String {
        self.peer.to_string()
    }

    fn is_local(&self) -> bool {
        false
    }
}

pub struct TcpServerChannel {
    inner: TokioTcpListener,
    bound_addr: SocketAddr,
}

#[async_trait]
impl ServerChannel for TcpServerChannel {
    type Stream = TcpChannel;

    async fn accept(&self) -> Result<Self::Stream, BusError> {
        let (stream, peer) = self
            .inner
            .accept()
            .await
            .map_err(|e| map_io_error(codes::TRANSPORT_IO, e))?;
        let local = stream
            .local_addr()
            .map_err(|e| map_io_error(codes::TRANSPORT_IO, e))?;
        TcpSocketConfig::default()
            .apply(&stream)
            .map_err(|e| map_io_error(codes::TRANSPORT_IO, e))?;
        Ok(TcpChannel::from_parts(stream, local, peer))
    }

    fn local_url(&self) -> BusUrl {
        BusUrl::Tcp {
            host: self.bound_addr.ip().to_string(),
            port: PortSpec::Fixed(self.bound_addr.port()),
        }
    }
}

#[derive(Default)]
pub struct TcpProvider;

fn port_from_spec(spec: PortSpec) -> u16 {
    match spec {
        PortSpec::Fixed(p) => p,
        PortSpec::Autoselect => 0,
    }
}

fn socket_addr_from_url(url: &BusUrl) -> Result<SocketAddr, BusError> {
    match url {
        BusUrl::Tcp { host, port } => {
            let addr = format!("{host}:{}", port_from_spec(*port));
            addr.parse().map_err(|_| {
                BusError::transport(
                    codes::URL_GRAMMAR,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("bad tcp addr {addr}")),
                )
            })
        }
        _ => Err(BusError::transport(
            codes::URL_GRAMMAR,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a tcp:// url"),
        )),
    }
}

#[async_trait]
impl TransportProvider for TcpProvider {
    type Stream = TcpChannel;
    type Listener = TcpServerChannel;

    /// Retries transient bind failures up to `retries` times (spec §4.2).
    async fn bind(&self, url: &BusUrl, retries: u32) -> Result<Self::Listener, BusError> {
        let addr = socket_addr_from_url(url)?;
        let mut last_err = None;
        for attempt in 0..=retries {
            match TokioTcpListener::bind(addr).await {
                Ok(listener) => {
                    let bound_addr = listener
                        .local_addr()
                        .map_err(|e| map_io_error(codes::TRANSPORT_BIND_FAILED, e))?;
                    return Ok(TcpServerChannel { inner: listener, bound_addr });
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt < retries {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
        Err(map_io_error(codes::TRANSPORT_BIND_FAILED, last_err.unwrap()))
    }

    async fn connect(
        &self,
        url: &BusUrl,
        retries: u32,
        retry_interval_ms: u64,
        timeout_ms: u64,
    ) -> Result<Self::Stream, BusError> {
        let addr = socket_addr_from_url(url)?;
        let mut last_err: Option<BusError> = None;
        for attempt in 0..=retries {
            let attempt_result = tokio::time::timeout(Duration::from_millis(timeout_ms), TcpStream::connect(addr)).await;
            match attempt_result {
                Ok(Ok(stream)) => {
                    let local = stream
                        .local_addr()
                        .map_err(|e| map_io_error(codes::TRANSPORT_CONNECT_FAILED, e))?;
                    TcpSocketConfig::default()
                        .apply(&stream)
                        .map_err(|e| map_io_error(codes::TRANSPORT_CONNECT_FAILED, e))?;
                    return Ok(TcpChannel::from_parts(stream, local, addr));
                }
                Ok(Err(e)) => last_err = Some(map_io_error(codes::TRANSPORT_CONNECT_FAILED, e)),
                Err(_) => {
                    last_err = Some(BusError::timeout("tcp connect timed out"));
                }
            }
            if attempt < retries {
                tokio::time::sleep(Duration::from_millis(retry_interval_ms)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| BusError::timeout("tcp connect exhausted retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_then_connect_then_accept_round_trips_bytes() {
        let provider = TcpProvider;
        let bind_url = BusUrl::Tcp {
            host: "127.0.0.1".to_string(),
            port: PortSpec::Autoselect,
        };
        let listener = provider.bind(&bind_url, 1).await.unwrap();
        let bound = match listener.local_url() {
            BusUrl::Tcp { host, port: PortSpec::Fixed(p) } => format!("{host}:{p}"),
            _ => panic!("expected fixed port after bind"),
        };
        let connect_url = BusUrl::parse(&format!("tcp://{bound}")).unwrap();

        let accept_task = tokio::spawn(async move { listener.accept().await });
        let mut client = provider.connect(&connect_url, 1, 10, 2_000).await.unwrap();
        let mut server = accept_task.await.unwrap().unwrap();

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }
}
