//! Wake-on-LAN dispatch.
//!
//! Delivery is fire-and-forget: success means the magic packet left the
//! socket, not that the target powered on.

use std::net::{Ipv4Addr, SocketAddrV4};
use tokio::net::UdpSocket;
use tracing::info;
use shared::protocol::{MAGIC_PACKET_LEN, WOL_PORT};
use shared::types::MacAddress;
use crate::config::WakeConfig;
use crate::error::{Error, Result};

/// Six bytes of 0xFF followed by the hardware address sixteen times
pub fn magic_packet(mac: MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFFu8; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac.octets());
    }
    packet
}

pub struct WakeDispatcher {
    target: Ipv4Addr,
    ports: Vec<u16>,
}

impl WakeDispatcher {
    pub fn new(config: &WakeConfig) -> Self {
        let ports = if config.ports.is_empty() {
            vec![WOL_PORT]
        } else {
            config.ports.clone()
        };
        Self {
            target: config.broadcast_addr,
            ports,
        }
    }

    /// Parse `mac` and send one magic packet to every configured port.
    /// Nothing is transmitted when the address is malformed.
    pub async fn wake(&self, mac: &str) -> Result<MacAddress> {
        let mac: MacAddress = mac.parse()?;
        let packet = magic_packet(mac);

        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| Error::TransmissionFailure(format!("failed to bind datagram socket: {}", e)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| Error::TransmissionFailure(format!("failed to enable broadcast: {}", e)))?;

        for &port in &self.ports {
            let dest = SocketAddrV4::new(self.target, port);
            socket
                .send_to(&packet, dest)
                .await
                .map_err(|e| Error::TransmissionFailure(format!("send to {} failed: {}", dest, e)))?;
        }

        info!(mac = %mac, target = %self.target, ports = ?self.ports, "Magic packet sent");
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn listener() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    fn dispatcher(port: u16) -> WakeDispatcher {
        WakeDispatcher::new(&WakeConfig {
            broadcast_addr: Ipv4Addr::LOCALHOST,
            ports: vec![port],
        })
    }

    #[test]
    fn test_magic_packet_layout() {
        let mac = MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let packet = magic_packet(mac);

        assert_eq!(packet.len(), 102);
        assert_eq!(&packet[..6], &[0xFF; 6]);
        for rep in packet[6..].chunks(6) {
            assert_eq!(rep, &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        }
    }

    #[tokio::test]
    async fn test_wake_transmits_magic_packet() {
        let (socket, port) = listener().await;

        let sent = dispatcher(port).wake("AA:BB:CC:DD:EE:FF").await.unwrap();
        assert_eq!(sent.to_string(), "aa:bb:cc:dd:ee:ff");

        let mut buf = [0u8; 512];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 102);
        assert_eq!(&buf[..n], &magic_packet(sent)[..]);
    }

    #[tokio::test]
    async fn test_wake_accepts_hyphen_form() {
        let (socket, port) = listener().await;

        dispatcher(port).wake("aa-bb-cc-dd-ee-ff").await.unwrap();

        let mut buf = [0u8; 512];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 102);
    }

    #[tokio::test]
    async fn test_invalid_mac_sends_nothing() {
        let (socket, port) = listener().await;

        let result = dispatcher(port).wake("invalid-mac").await;
        assert!(matches!(result, Err(Error::InvalidHardwareAddress(_))));

        let mut buf = [0u8; 512];
        let received = tokio::time::timeout(Duration::from_millis(200), socket.recv_from(&mut buf)).await;
        assert!(received.is_err());
    }

    #[test]
    fn test_empty_port_list_uses_default() {
        let wake = WakeDispatcher::new(&WakeConfig {
            broadcast_addr: Ipv4Addr::BROADCAST,
            ports: Vec::new(),
        });
        assert_eq!(wake.ports, vec![WOL_PORT]);
    }
}
