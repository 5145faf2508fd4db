//! Concrete transport providers for `ipc://`, `tcp://`, and the UDP
//! datagram path (spec §4.2), implementing the `Channel`/`ServerChannel`/
//! `TransportProvider` contracts declared in `busline_core::channel`.
//!
//! Each transport is a thin wrapper over the matching `tokio::net` type;
//! socket-option handling (peer credentials, `SO_LINGER`, `TCP_NODELAY`)
//! is kept local to the transport that needs it rather than hoisted into
//! `busline-core`, mirroring the teacher's split between transport-neutral
//! contracts and per-transport adapters.

mod error;
mod ipc;
mod tcp;
mod udp;

pub use error::map_io_error;
pub use ipc::{IpcChannel, IpcProvider, IpcServerChannel};
pub use tcp::{TcpChannel, TcpProvider, TcpServerChannel, TcpSocketConfig};
pub use udp::UdpChannel;
