//! ARP discovery: broadcast a who-has for every target, collect replies for a
//! fixed window, resolve hostnames off the receive path.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use futures::stream::{self, StreamExt};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::{MutablePacket, Packet};
use pnet::util::MacAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use shared::types::{DiscoveredDevice, MacAddress};
use crate::discovery::link::{from_pnet_mac, to_pnet_mac, FrameChannel, LinkInterface, LinkLayer};
use crate::discovery::resolve::HostnameResolver;
use crate::error::{Error, Result};

/// Ethernet header (14) + ARP payload for IPv4 over Ethernet (28)
pub const ARP_FRAME_LEN: usize = 42;

/// Read timeout on the raw channel; bounds how quickly cancellation is noticed
const RECV_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArpReply {
    pub ip: Ipv4Addr,
    pub mac: MacAddress,
}

/// Broadcast who-has frame asking for `target`
pub fn build_request(source_mac: MacAddress, source_ip: Ipv4Addr, target: Ipv4Addr) -> Vec<u8> {
    let source = to_pnet_mac(source_mac);
    let mut buf = vec![0u8; ARP_FRAME_LEN];

    let mut eth = MutableEthernetPacket::new(&mut buf).expect("buffer sized for an ARP frame");
    eth.set_destination(MacAddr::broadcast());
    eth.set_source(source);
    eth.set_ethertype(EtherTypes::Arp);

    let mut arp = MutableArpPacket::new(eth.payload_mut()).expect("buffer sized for an ARP frame");
    arp.set_hardware_type(ArpHardwareTypes::Ethernet);
    arp.set_protocol_type(EtherTypes::Ipv4);
    arp.set_hw_addr_len(6);
    arp.set_proto_addr_len(4);
    arp.set_operation(ArpOperations::Request);
    arp.set_sender_hw_addr(source);
    arp.set_sender_proto_addr(source_ip);
    arp.set_target_hw_addr(MacAddr::zero());
    arp.set_target_proto_addr(target);

    buf
}

/// Sender IP and hardware address of an ARP reply; `None` for anything else
pub fn parse_reply(frame: &[u8]) -> Option<ArpReply> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Arp {
        return None;
    }

    let arp = ArpPacket::new(eth.payload())?;
    if arp.get_operation() != ArpOperations::Reply {
        return None;
    }

    Some(ArpReply {
        ip: arp.get_sender_proto_addr(),
        mac: from_pnet_mac(arp.get_sender_hw_addr()),
    })
}

/// Send one request per target, then hand every new reply from a target to
/// `on_reply` until `window` elapses, `cancel` fires or `on_reply` returns false.
///
/// Blocking. Returns the number of requests sent. Fails only when not a
/// single request could be transmitted.
pub fn collect_replies(
    channel: &mut dyn FrameChannel,
    source_mac: MacAddress,
    source_ip: Ipv4Addr,
    targets: &[Ipv4Addr],
    window: Duration,
    cancel: &CancellationToken,
    mut on_reply: impl FnMut(ArpReply) -> bool,
) -> Result<usize> {
    let wanted: HashSet<Ipv4Addr> = targets.iter().copied().collect();
    let mut sent = 0usize;
    let mut last_error = None;

    for &target in targets {
        if cancel.is_cancelled() {
            break;
        }
        match channel.send(&build_request(source_mac, source_ip, target)) {
            Ok(()) => sent += 1,
            Err(e) => {
                trace!(ip = %target, error = %e, "ARP request not sent");
                last_error = Some(e);
            }
        }
    }

    if sent == 0 {
        return match last_error {
            Some(e) => Err(Error::TransmissionFailure(format!(
                "no ARP request could be sent: {}",
                e
            ))),
            None => Ok(0),
        };
    }

    let deadline = Instant::now() + window;
    let mut seen = HashSet::new();

    while Instant::now() < deadline && !cancel.is_cancelled() {
        match channel.recv() {
            Ok(Some(frame)) => {
                let Some(reply) = parse_reply(&frame) else {
                    continue;
                };
                // Retransmitted replies repeat the same pair
                if !wanted.contains(&reply.ip) || !seen.insert(reply) {
                    continue;
                }
                debug!(ip = %reply.ip, mac = %reply.mac, "ARP reply");
                if !on_reply(reply) {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Receiving ARP replies failed, keeping what was collected");
                break;
            }
        }
    }

    Ok(sent)
}

/// Keep the latest reply per hardware address, in order of first appearance
fn merge_replies(mut resolved: Vec<(usize, ArpReply, Option<String>)>) -> Vec<DiscoveredDevice> {
    resolved.sort_by_key(|(seq, _, _)| *seq);

    let mut index: HashMap<MacAddress, usize> = HashMap::new();
    let mut devices = Vec::new();

    for (_, reply, hostname) in resolved {
        let device = DiscoveredDevice::new(hostname, reply.ip, Some(reply.mac));
        match index.get(&reply.mac) {
            Some(&i) => devices[i] = device,
            None => {
                index.insert(reply.mac, devices.len());
                devices.push(device);
            }
        }
    }

    devices
}

pub struct ArpEngine {
    link: Arc<dyn LinkLayer>,
    resolver: HostnameResolver,
    window: Duration,
    resolver_concurrency: usize,
}

impl ArpEngine {
    pub fn new(
        link: Arc<dyn LinkLayer>,
        resolver: HostnameResolver,
        window: Duration,
        resolver_concurrency: usize,
    ) -> Self {
        Self {
            link,
            resolver,
            window,
            resolver_concurrency: resolver_concurrency.max(1),
        }
    }

    /// Check that a raw channel can be opened on `interface`
    pub fn check_access(&self, interface: &str) -> Result<()> {
        self.link.open(interface, RECV_POLL).map(drop)
    }

    pub async fn discover(
        &self,
        iface: &LinkInterface,
        targets: Vec<Ipv4Addr>,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredDevice>> {
        let source_mac = iface.mac.ok_or_else(|| {
            Error::TransmissionFailure(format!("interface {} has no hardware address", iface.name))
        })?;
        // An unnumbered interface can still probe with a zero sender address
        let source_ip = iface.ipv4.unwrap_or(Ipv4Addr::UNSPECIFIED);

        let mut channel = self.link.open(&iface.name, RECV_POLL)?;

        // Unbounded so slow lookups never stall the receive loop; the number of
        // distinct replies is bounded by the target count.
        let (tx, rx) = mpsc::unbounded_channel::<ArpReply>();
        let window = self.window;
        // Dropping this future, not just cancelling it, must release the channel
        let collector_cancel = cancel.child_token();
        let _stop_collector = collector_cancel.clone().drop_guard();
        let collector = tokio::task::spawn_blocking(move || {
            collect_replies(
                channel.as_mut(),
                source_mac,
                source_ip,
                &targets,
                window,
                &collector_cancel,
                |reply| tx.send(reply).is_ok(),
            )
        });

        let replies = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|reply| (reply, rx))
        });

        let resolved: Vec<(usize, ArpReply, Option<String>)> = replies
            .enumerate()
            .map(|(seq, reply)| {
                let resolver = self.resolver.clone();
                let cancel = cancel.clone();
                async move {
                    let hostname = resolver.resolve(reply.ip, &cancel).await;
                    (seq, reply, hostname)
                }
            })
            .buffer_unordered(self.resolver_concurrency)
            .collect()
            .await;

        match collector.await {
            Ok(Ok(sent)) => {
                debug!(interface = %iface.name, sent, replies = resolved.len(), "ARP collection finished");
            }
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                return Err(Error::TransmissionFailure(format!("ARP collector failed: {}", e)));
            }
        }

        Ok(merge_replies(resolved))
    }
}
