//! UDP datagram path (spec §4.2, §4.2a): one syscall per message, no
//! reassembly, used when a message carries the `PreferUdp` flag.

use async_trait::async_trait;
use busline_core::channel::DatagramSocket;
use busline_core::error::{codes, BusError};
use tokio::net::UdpSocket;

use crate::error::map_io_error;

pub struct UdpChannel {
    socket: UdpSocket,
}

impl UdpChannel {
    pub async fn bind(local_addr: &str) -> Result<Self, BusError> {
        let socket = UdpSocket::bind(local_addr)
            .await
            .map_err(|e| map_io_error(codes::TRANSPORT_BIND_FAILED, e))?;
        Ok(UdpChannel { socket })
    }
}

#[async_trait]
impl DatagramSocket for UdpChannel {
    async fn send_to(&self, bytes: &[u8], addr: &str) -> Result<usize, BusError> {
        self.socket
            .send_to(bytes, addr)
            .await
            .map_err(|e| map_io_error(codes::TRANSPORT_IO, e))
    }

    async fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, String), BusError> {
        let (n, from) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|e| map_io_error(codes::TRANSPORT_IO, e))?;
        Ok((n, from.to_string()))
    }
}
