//! Transport contract (spec §4.2, §4.2a): the socket abstraction
//! `busline-core` depends on without committing to a concrete OS transport.
//!
//! `busline-transport` supplies `tokio`-backed implementations of these
//! traits for `ipc://`, `tcp://` and the UDP datagram path; `busline-core`
//! only ever talks to `Channel`/`ServerChannel`/`DatagramSocket` trait
//! objects, mirroring how the teacher's `spark-core` depends on a
//! `Channel` trait rather than directly on `tokio::net`.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::BusError;
use crate::url::BusUrl;

/// Peer credentials captured at accept time on local-domain transports
/// (spec §4.2: "capture peer credentials (pid/uid/gid) via `SO_PEERCRED`
/// or equivalent"). TCP peers never populate this.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

/// A connected byte stream: one session's transport. The framing layer
/// reads and writes frames against the `AsyncRead + AsyncWrite` halves
/// directly; this trait only surfaces what framing/session bookkeeping
/// needs beyond raw bytes.
pub trait Channel: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    fn peer_credentials(&self) -> PeerCredentials {
        PeerCredentials::default()
    }

    fn local_addr_description(&self) -> String;

    fn peer_addr_description(&self) -> String;

    /// Whether this channel's transport is local to the host (unix domain
    /// socket). Gates the watchdog (spec §4.9: "only sessions on local
    /// transports are monitored").
    fn is_local(&self) -> bool;
}

/// A bound listening socket (spec §4.2 `bind(url) -> ServerSocket`).
#[async_trait]
pub trait ServerChannel: Send + 'static {
    type Stream: Channel;

    /// Accepts one connection. Implementations are expected to already be
    /// non-blocking; the spec's "set non-blocking after accept" is the
    /// underlying runtime's default behavior for `tokio` sockets.
    async fn accept(&self) -> Result<Self::Stream, BusError>;

    fn local_url(&self) -> BusUrl;
}

/// Factory the endpoint/session layer uses to turn a [`BusUrl`] into a
/// concrete transport, without knowing which one.
#[async_trait]
pub trait TransportProvider: Send + Sync + 'static {
    type Stream: Channel;
    type Listener: ServerChannel<Stream = Self::Stream>;

    /// Binds a server socket, retrying transient failures up to
    /// `retries` times (spec §4.2: "retry bind up to N times on transient
    /// failures").
    async fn bind(&self, url: &BusUrl, retries: u32) -> Result<Self::Listener, BusError>;

    /// Connects with a bounded overall timeout, retrying up to `retries`
    /// times with `retry_interval_ms` between attempts (spec §4.2).
    async fn connect(
        &self,
        url: &BusUrl,
        retries: u32,
        retry_interval_ms: u64,
        timeout_ms: u64,
    ) -> Result<Self::Stream, BusError>;
}

/// The unreliable datagram path (spec §4.2: "one syscall per message, no
/// reassembly").
#[async_trait]
pub trait DatagramSocket: Send + Sync + 'static {
    async fn send_to(&self, bytes: &[u8], addr: &str) -> Result<usize, BusError>;
    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, String), BusError>;
}
