//! `ipc://` transport (spec §4.2a): `tokio::net::{UnixListener, UnixStream}`,
//! capturing peer credentials at accept time via `UnixStream::peer_cred()`
//! (spec §4.2: "capture peer credentials (pid/uid/gid) via `SO_PEERCRED`
//! or equivalent").

use std::time::Duration;

use async_trait::async_trait;
use busline_core::channel::{Channel, PeerCredentials, ServerChannel, TransportProvider};
use busline_core::error::{codes, BusError};
use busline_core::url::BusUrl;
use tokio::net::{UnixListener, UnixStream};

use crate::error::map_io_error;

pub struct IpcChannel {
    stream: UnixStream,
    path: String,
    credentials: PeerCredentials,
}

impl IpcChannel {
    fn new(stream: UnixStream, path: String) -> Self {
        let credentials = stream
            .peer_cred()
            .map(|c| PeerCredentials {
                pid: c.pid().map(|p| p as u32),
                uid: Some(c.uid()),
                gid: Some(c.gid()),
            })
            .unwrap_or_default();
        IpcChannel { stream, path, credentials }
    }
}

impl tokio::io::AsyncRead for IpcChannel {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl tokio::io::AsyncWrite for IpcChannel {
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

impl Channel for IpcChannel {
    fn peer_credentials(&self) -> PeerCredentials {
        self.credentials
    }

    fn local_addr_description(&self) -> String {
        self.path.clone()
    }

    fn peer_addr_description(&self) -> String {
        self.path.clone()
    }

    fn is_local(&self) -> bool {
        true
    }
}

pub struct IpcServerChannel {
    inner: UnixListener,
    path: String,
}

#[async_trait]
impl ServerChannel for IpcServerChannel {
    type Stream = IpcChannel;

    async fn accept(&self) -> Result<Self::Stream, BusError> {
        let (stream, _addr) = self
            .inner
            .accept()
            .await
            .map_err(|e| map_io_error(codes::TRANSPORT_IO, e))?;
        Ok(IpcChannel::new(stream, self.path.clone()))
    }

    fn local_url(&self) -> BusUrl {
        BusUrl::Ipc { path: self.path.clone() }
    }
}

#[derive(Default)]
pub struct IpcProvider;

fn path_from_url(url: &BusUrl) -> Result<&str, BusError> {
    match url {
        BusUrl::Ipc { path } => Ok(path),
        _ => Err(BusError::transport(
            codes::URL_GRAMMAR,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "not an ipc:// url"),
        )),
    }
}

#[async_trait]
impl TransportProvider for IpcProvider {
    type Stream = IpcChannel;
    type Listener = IpcServerChannel;

    async fn bind(&self, url: &BusUrl, retries: u32) -> Result<Self::Listener, BusError> {
        let path = path_from_url(url)?;
        // A stale socket file from a crashed prior instance is a transient
        // bind failure, same class as the teacher's bind-retry loop.
        let _ = std::fs::remove_file(path);
        let mut last_err = None;
        for attempt in 0..=retries {
            match UnixListener::bind(path) {
                Ok(listener) => {
                    return Ok(IpcServerChannel {
                        inner: listener,
                        path: path.to_string(),
                    })
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
        let path = path_from_url(url)?;
        let mut last_err: Option<BusError> = None;
        for attempt in 0..=retries {
            let attempt_result =
                tokio::time::timeout(Duration::from_millis(timeout_ms), UnixStream::connect(path)).await;
            match attempt_result {
                Ok(Ok(stream)) => return Ok(IpcChannel::new(stream, path.to_string())),
                Ok(Err(e)) => last_err = Some(map_io_error(codes::TRANSPORT_CONNECT_FAILED, e)),
                Err(_) => last_err = Some(BusError::timeout("ipc connect timed out")),
            }
            if attempt < retries {
                tokio::time::sleep(Duration::from_millis(retry_interval_ms)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| BusError::timeout("ipc connect exhausted retries")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_then_connect_then_accept_round_trips_bytes_and_captures_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("busline-test.sock");
        let provider = IpcProvider;
        let url = BusUrl::Ipc {
            path: sock_path.to_str().unwrap().to_string(),
        };
        let listener = provider.bind(&url, 1).await.unwrap();
        let accept_task = tokio::spawn(async move { listener.accept().await });
        let mut client = provider.connect(&url, 1, 10, 2_000).await.unwrap();
        let server = accept_task.await.unwrap().unwrap();

        assert!(server.is_local());
        assert!(server.peer_credentials().uid.is_some());

        use tokio::io::AsyncWriteExt;
        client.write_all(b"ping").await.unwrap();
    }
}
