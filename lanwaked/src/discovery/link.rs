//! Raw link-layer access.
//!
//! `LinkLayer` enumerates interfaces and opens raw Ethernet channels. The
//! production implementation is backed by pnet's datalink channels.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use pnet::datalink::{self, Channel, DataLinkReceiver, DataLinkSender, NetworkInterface};
use pnet::util::MacAddr;
use shared::types::MacAddress;
use crate::error::{Error, Result};

/// An interface candidate for raw probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInterface {
    pub name: String,
    pub mac: Option<MacAddress>,
    /// First IPv4 address assigned to the interface
    pub ipv4: Option<Ipv4Addr>,
}

/// A bidirectional raw Ethernet channel bound to one interface
pub trait FrameChannel: Send {
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Next received frame, or `None` when the read timeout passed without one
    fn recv(&mut self) -> io::Result<Option<Vec<u8>>>;
}

pub trait LinkLayer: Send + Sync {
    /// Non-loopback interfaces present on the host, in host order
    fn interfaces(&self) -> Vec<LinkInterface>;

    /// Open a raw channel. Refusal (privilege, missing interface, unsupported
    /// platform) is a `TransmissionFailure`.
    fn open(&self, interface: &str, read_timeout: Duration) -> Result<Box<dyn FrameChannel>>;
}

pub struct PnetLink;

impl LinkLayer for PnetLink {
    fn interfaces(&self) -> Vec<LinkInterface> {
        datalink::interfaces()
            .iter()
            .filter(|iface| !iface.is_loopback())
            .map(to_link_interface)
            .collect()
    }

    fn open(&self, interface: &str, read_timeout: Duration) -> Result<Box<dyn FrameChannel>> {
        let iface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == interface)
            .ok_or_else(|| {
                Error::TransmissionFailure(format!("interface {} not found", interface))
            })?;

        let config = datalink::Config {
            read_timeout: Some(read_timeout),
            ..Default::default()
        };

        match datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(tx, rx)) => Ok(Box::new(PnetChannel { tx, rx })),
            Ok(_) => Err(Error::TransmissionFailure(format!(
                "unsupported channel type on {}",
                interface
            ))),
            Err(e) => Err(Error::TransmissionFailure(format!(
                "cannot open raw channel on {}: {}",
                interface, e
            ))),
        }
    }
}

fn to_link_interface(iface: &NetworkInterface) -> LinkInterface {
    let ipv4 = iface.ips.iter().find_map(|net| match net.ip() {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    });

    LinkInterface {
        name: iface.name.clone(),
        mac: iface
            .mac
            .filter(|mac| *mac != MacAddr::zero())
            .map(from_pnet_mac),
        ipv4,
    }
}

pub(crate) fn from_pnet_mac(mac: MacAddr) -> MacAddress {
    let MacAddr(a, b, c, d, e, f) = mac;
    MacAddress::new([a, b, c, d, e, f])
}

pub(crate) fn to_pnet_mac(mac: MacAddress) -> MacAddr {
    let [a, b, c, d, e, f] = mac.octets();
    MacAddr::new(a, b, c, d, e, f)
}

struct PnetChannel {
    tx: Box<dyn DataLinkSender>,
    rx: Box<dyn DataLinkReceiver>,
}

impl FrameChannel for PnetChannel {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx
            .send_to(frame, None)
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::Other, "send buffer unavailable")))
    }

    fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.rx.next() {
            Ok(frame) => Ok(Some(frame.to_vec())),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
