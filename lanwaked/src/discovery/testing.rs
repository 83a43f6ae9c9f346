//! In-memory stand-ins for the network used by discovery tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::{MutablePacket, Packet};
use shared::types::MacAddress;
use crate::discovery::arp::ARP_FRAME_LEN;
use crate::discovery::link::{from_pnet_mac, to_pnet_mac, FrameChannel, LinkInterface, LinkLayer};
use crate::discovery::resolve::ReverseLookup;
use crate::discovery::sweep::HostProbe;
use crate::error::{Error, Result};

pub const SIM_MAC: MacAddress = MacAddress::new([0x02, 0x00, 0x5e, 0x00, 0x00, 0x01]);

pub fn reply_frame(
    sender_mac: MacAddress,
    sender_ip: Ipv4Addr,
    target_mac: MacAddress,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let mut buf = vec![0u8; ARP_FRAME_LEN];
    let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
    eth.set_destination(to_pnet_mac(target_mac));
    eth.set_source(to_pnet_mac(sender_mac));
    eth.set_ethertype(EtherTypes::Arp);

    let mut arp = MutableArpPacket::new(eth.payload_mut()).unwrap();
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Reply);
    arp.set_sender_hw_addr(to_pnet_mac(sender_mac));
    arp.set_sender_proto_addr(sender_ip);
    arp.set_target_hw_addr(to_pnet_mac(target_mac));
    arp.set_target_proto_addr(target_ip);
    buf
}

/// A LAN segment that answers ARP requests from a fixed host table
#[derive(Default)]
pub struct SimulatedLan {
    interfaces: Vec<LinkInterface>,
    hosts: HashMap<Ipv4Addr, MacAddress>,
    duplicate_replies: bool,
    refuse_open: bool,
    refuse_send: bool,
    interface_queries: AtomicUsize,
    open_channels: Arc<AtomicUsize>,
}

impl SimulatedLan {
    pub fn new() -> Self {
        Self {
            interfaces: vec![LinkInterface {
                name: "eth0".to_string(),
                mac: Some(SIM_MAC),
                ipv4: Some(Ipv4Addr::new(192, 168, 1, 254)),
            }],
            ..Default::default()
        }
    }

    pub fn with_host(mut self, ip: Ipv4Addr, mac: MacAddress) -> Self {
        self.hosts.insert(ip, mac);
        self
    }

    pub fn with_duplicate_replies(mut self) -> Self {
        self.duplicate_replies = true;
        self
    }

    pub fn refusing_open(mut self) -> Self {
        self.refuse_open = true;
        self
    }

    pub fn refusing_sends(mut self) -> Self {
        self.refuse_send = true;
        self
    }

    pub fn without_interfaces(mut self) -> Self {
        self.interfaces.clear();
        self
    }

    pub fn interfaces_snapshot(&self) -> Vec<LinkInterface> {
        self.interfaces.clone()
    }

    pub fn interface_queries(&self) -> usize {
        self.interface_queries.load(Ordering::SeqCst)
    }

    /// Channels opened and not yet dropped
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::SeqCst)
    }

    pub fn open_channel(&self) -> Box<dyn FrameChannel> {
        self.open_channels.fetch_add(1, Ordering::SeqCst);
        Box::new(SimChannel {
            hosts: self.hosts.clone(),
            duplicate_replies: self.duplicate_replies,
            refuse_send: self.refuse_send,
            pending: VecDeque::new(),
            open_channels: self.open_channels.clone(),
        })
    }
}

impl LinkLayer for SimulatedLan {
    fn interfaces(&self) -> Vec<LinkInterface> {
        self.interface_queries.fetch_add(1, Ordering::SeqCst);
        self.interfaces.clone()
    }

    fn open(&self, interface: &str, _read_timeout: Duration) -> Result<Box<dyn FrameChannel>> {
        if self.refuse_open {
            return Err(Error::TransmissionFailure(format!(
                "permission denied opening {}",
                interface
            )));
        }
        Ok(self.open_channel())
    }
}

struct SimChannel {
    hosts: HashMap<Ipv4Addr, MacAddress>,
    duplicate_replies: bool,
    refuse_send: bool,
    pending: VecDeque<Vec<u8>>,
    open_channels: Arc<AtomicUsize>,
}

impl Drop for SimChannel {
    fn drop(&mut self) {
        self.open_channels.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FrameChannel for SimChannel {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        if self.refuse_send {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "operation not permitted"));
        }

        let eth = EthernetPacket::new(frame)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "short frame"))?;
        let arp = ArpPacket::new(eth.payload())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "short ARP payload"))?;

        let target = arp.get_target_proto_addr();
        if let Some(&mac) = self.hosts.get(&target) {
            let reply = reply_frame(
                mac,
                target,
                from_pnet_mac(arp.get_sender_hw_addr()),
                arp.get_sender_proto_addr(),
            );
            if self.duplicate_replies {
                self.pending.push_back(reply.clone());
            }
            self.pending.push_back(reply);
        }
        Ok(())
    }

    fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.pending.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                // Stand in for the read timeout of a real socket
                std::thread::sleep(Duration::from_millis(10));
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
pub struct StaticLookup {
    names: HashMap<IpAddr, String>,
    delay: Option<Duration>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, ip: Ipv4Addr, name: &str) -> Self {
        self.names.insert(IpAddr::V4(ip), name.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl ReverseLookup for StaticLookup {
    fn lookup(&self, ip: IpAddr) -> Option<String> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.names.get(&ip).cloned()
    }
}

/// Answers pings for a fixed set of hosts
#[derive(Default)]
pub struct ScriptedProbe {
    reachable: HashMap<Ipv4Addr, Option<MacAddress>>,
    slow_from: Option<(Ipv4Addr, Duration)>,
    probes: AtomicUsize,
    cache_reads: Mutex<Vec<Ipv4Addr>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reachable(mut self, ip: Ipv4Addr, mac: Option<MacAddress>) -> Self {
        self.reachable.insert(ip, mac);
        self
    }

    /// Probes of `ip` and every higher address hang for `delay`
    pub fn with_delay_from(mut self, ip: Ipv4Addr, delay: Duration) -> Self {
        self.slow_from = Some((ip, delay));
        self
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn cache_reads(&self) -> Vec<Ipv4Addr> {
        self.cache_reads.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostProbe for ScriptedProbe {
    async fn is_reachable(&self, ip: Ipv4Addr, _timeout: Duration) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some((from, delay)) = self.slow_from {
            if ip >= from {
                tokio::time::sleep(delay).await;
            }
        }
        self.reachable.contains_key(&ip)
    }

    async fn neighbor_mac(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        self.cache_reads.lock().unwrap().push(ip);
        self.reachable.get(&ip).copied().flatten()
    }
}

