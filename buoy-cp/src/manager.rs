//! Switch registry and event dispatcher.
//!
//! The `Manager` owns all controller state: the route store and the
//! registry of connected switches. Route creation fans rules out to
//! every registered switch; a first packet punted by a switch triggers
//! a reinstall of the matching route's rules on that switch alone.
//! Both paths re-run the compiler; installs are idempotent on the
//! switch side, so the redundancy is harmless.
//!
//! Switches that connect after a route was created do not receive its
//! rules until one of their packets misses and lands here. Registry
//! entries are never removed; installs to a dead switch surface as
//! logged send errors.

use crate::flow::{self, FlowConfig, FlowRule};
use crate::multipath::{self, FlowTuple};
use crate::openflow::{ControlChannel, DatapathId, SwitchEvent};
use crate::route::Route;
use crate::store::{self, RouteStore};
use smoltcp::wire::{EthernetFrame, EthernetProtocol, IpProtocol, Ipv4Packet, TcpPacket, UdpPacket};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

pub struct Manager {
    config: FlowConfig,
    store: RwLock<RouteStore>,
    switches: RwLock<HashMap<DatapathId, Arc<dyn ControlChannel>>>,
}

impl Manager {
    pub fn new(config: FlowConfig) -> Self {
        Manager {
            config,
            store: RwLock::new(RouteStore::new()),
            switches: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Register a switch and grant it controller-chosen table ids.
    ///
    /// Reconnection under the same datapath id replaces the previous
    /// channel.
    pub async fn on_switch_connected(&self, dpid: DatapathId, channel: Arc<dyn ControlChannel>) {
        let replaced = self
            .switches
            .write()
            .await
            .insert(dpid, channel.clone())
            .is_some();

        if let Err(e) = channel.enable_flow_mod_table_id(true).await {
            warn!(%dpid, "failed to enable table id selection: {e}");
        }

        info!(%dpid, reconnect = replaced, "bridge connection established");
    }

    /// Store a route and install its rules on every registered switch.
    pub async fn create_route(&self, route: Route) -> flow::Result<()> {
        let rules = flow::compile_route(&route, &self.config)?;
        let public_ip = route.public_ip;
        self.store.write().await.put(route);

        let switches: Vec<_> = self
            .switches
            .read()
            .await
            .iter()
            .map(|(dpid, channel)| (*dpid, channel.clone()))
            .collect();

        info!(
            %public_ip,
            rules = rules.len(),
            switches = switches.len(),
            "route created, installing flows"
        );

        for (dpid, channel) in switches {
            self.install(dpid, channel.as_ref(), &rules).await;
        }
        Ok(())
    }

    pub async fn get_route(&self, public_ip: Ipv4Addr) -> store::Result<Route> {
        self.store.read().await.get(public_ip).cloned()
    }

    pub async fn list_routes(&self) -> Vec<Route> {
        self.store.read().await.list()
    }

    /// React to a first-of-flow packet punted by a switch.
    pub async fn on_packet_in(&self, dpid: DatapathId, in_port: u16, data: &[u8]) {
        let Some(ip) = ipv4_layer(data) else {
            debug!(%dpid, in_port, "non-IP packet received, ignoring");
            return;
        };
        let dst = ip.dst_addr();

        let route = {
            let store = self.store.read().await;
            if !store.contains(dst) {
                info!(%dpid, destination = %dst, "unknown address, blocking temporarily");
                return;
            }
            match store.get(dst) {
                Ok(route) => route.clone(),
                Err(_) => return,
            }
        };

        if let Some(tuple) = flow_tuple(&ip) {
            let link = multipath::select_link(&tuple, route.endpoints.len() as u16);
            debug!(
                destination = %dst,
                link,
                backend = %route.endpoints[usize::from(link)].private_ip,
                "flow will pin to backend"
            );
        }

        let Some(channel) = self.switches.read().await.get(&dpid).cloned() else {
            warn!(%dpid, "packet-in from unregistered datapath, ignoring");
            return;
        };

        info!(%dpid, public_ip = %dst, "packet received for floating IP, building flows");
        match flow::compile_route(&route, &self.config) {
            Ok(rules) => self.install(dpid, channel.as_ref(), &rules).await,
            Err(e) => warn!(public_ip = %dst, "stored route failed to compile: {e}"),
        }
    }

    /// Push a compiled rule set to one switch, logging failures.
    async fn install(&self, dpid: DatapathId, channel: &dyn ControlChannel, rules: &[FlowRule]) {
        for rule in rules {
            if let Err(e) = channel.add_flow(rule).await {
                warn!(%dpid, table = rule.table, "flow install failed: {e}");
            }
        }
    }

    #[cfg(test)]
    async fn switch_count(&self) -> usize {
        self.switches.read().await.len()
    }
}

/// Drain switch events, one at a time, until the transport shuts down.
pub async fn run_events(manager: Arc<Manager>, mut events: mpsc::Receiver<SwitchEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SwitchEvent::Connected { dpid, channel } => {
                manager.on_switch_connected(dpid, channel).await;
            }
            SwitchEvent::PacketIn { dpid, in_port, data } => {
                manager.on_packet_in(dpid, in_port, &data).await;
            }
        }
    }
    info!("switch event channel closed");
}

fn ipv4_layer(data: &[u8]) -> Option<Ipv4Packet<&[u8]>> {
    let frame = EthernetFrame::new_checked(data).ok()?;
    if frame.ethertype() != EthernetProtocol::Ipv4 {
        return None;
    }
    Ipv4Packet::new_checked(frame.payload()).ok()
}

fn flow_tuple(ip: &Ipv4Packet<&[u8]>) -> Option<FlowTuple> {
    let (tp_src, tp_dst) = match ip.next_header() {
        IpProtocol::Tcp => {
            let tcp = TcpPacket::new_checked(ip.payload()).ok()?;
            (tcp.src_port(), tcp.dst_port())
        }
        IpProtocol::Udp => {
            let udp = UdpPacket::new_checked(ip.payload()).ok()?;
            (udp.src_port(), udp.dst_port())
        }
        _ => return None,
    };

    Some(FlowTuple {
        nw_src: ip.src_addr(),
        nw_dst: ip.dst_addr(),
        nw_proto: ip.next_header().into(),
        tp_src,
        tp_dst,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Action;
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        flows: Mutex<Vec<FlowRule>>,
        table_mods: Mutex<Vec<bool>>,
    }

    impl RecordingChannel {
        fn flows(&self) -> Vec<FlowRule> {
            self.flows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ControlChannel for RecordingChannel {
        async fn add_flow(&self, rule: &FlowRule) -> io::Result<()> {
            self.flows.lock().unwrap().push(rule.clone());
            Ok(())
        }

        async fn enable_flow_mod_table_id(&self, enable: bool) -> io::Result<()> {
            self.table_mods.lock().unwrap().push(enable);
            Ok(())
        }
    }

    fn route() -> Route {
        Route::new(
            Ipv4Addr::new(203, 0, 113, 5),
            [Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2)],
        )
    }

    /// Minimal Ethernet + IPv4 + UDP frame.
    fn udp_frame(src: Ipv4Addr, dst: Ipv4Addr, tp_src: u16, tp_dst: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 14 + 20 + 8];
        buf[12..14].copy_from_slice(&0x0800u16.to_be_bytes());

        let ip = &mut buf[14..];
        ip[0] = 0x45; // version 4, header length 20
        ip[2..4].copy_from_slice(&28u16.to_be_bytes()); // total length
        ip[8] = 64; // ttl
        ip[9] = 17; // udp
        ip[12..16].copy_from_slice(&src.octets());
        ip[16..20].copy_from_slice(&dst.octets());

        let udp = &mut ip[20..];
        udp[0..2].copy_from_slice(&tp_src.to_be_bytes());
        udp[2..4].copy_from_slice(&tp_dst.to_be_bytes());
        udp[4..6].copy_from_slice(&8u16.to_be_bytes());
        buf
    }

    #[tokio::test]
    async fn connect_registers_and_enables_table_ids() {
        let manager = Manager::new(FlowConfig::default());
        let channel = Arc::new(RecordingChannel::default());

        manager
            .on_switch_connected(DatapathId(1), channel.clone())
            .await;
        assert_eq!(manager.switch_count().await, 1);
        assert_eq!(*channel.table_mods.lock().unwrap(), vec![true]);

        // Reconnecting is an upsert, not a duplicate.
        manager
            .on_switch_connected(DatapathId(1), channel.clone())
            .await;
        assert_eq!(manager.switch_count().await, 1);
    }

    #[tokio::test]
    async fn create_route_installs_on_every_switch() {
        let manager = Manager::new(FlowConfig::default());
        let first = Arc::new(RecordingChannel::default());
        let second = Arc::new(RecordingChannel::default());
        manager.on_switch_connected(DatapathId(1), first.clone()).await;
        manager
            .on_switch_connected(DatapathId(2), second.clone())
            .await;

        manager.create_route(route()).await.unwrap();

        // 2 + N north rules and N south rules, on both switches.
        for channel in [&first, &second] {
            assert_eq!(channel.flows().len(), 4 + 2);
        }
        assert!(manager.get_route(route().public_ip).await.is_ok());
    }

    #[tokio::test]
    async fn create_route_without_switches_still_stores() {
        let manager = Manager::new(FlowConfig::default());
        manager.create_route(route()).await.unwrap();
        assert_eq!(manager.list_routes().await.len(), 1);
    }

    #[tokio::test]
    async fn create_route_rejects_empty_endpoints() {
        let manager = Manager::new(FlowConfig::default());
        let empty = Route::new(Ipv4Addr::new(203, 0, 113, 9), []);
        assert!(manager.create_route(empty.clone()).await.is_err());
        assert!(manager.get_route(empty.public_ip).await.is_err());
    }

    #[tokio::test]
    async fn packet_in_for_unknown_destination_installs_nothing() {
        let manager = Manager::new(FlowConfig::default());
        let channel = Arc::new(RecordingChannel::default());
        manager.on_switch_connected(DatapathId(1), channel.clone()).await;

        let frame = udp_frame(
            Ipv4Addr::new(198, 51, 100, 7),
            Ipv4Addr::new(203, 0, 113, 99),
            40000,
            80,
        );
        manager.on_packet_in(DatapathId(1), 1, &frame).await;
        assert!(channel.flows().is_empty());
    }

    #[tokio::test]
    async fn packet_in_reinstalls_on_the_originating_switch_only() {
        let manager = Manager::new(FlowConfig::default());
        let origin = Arc::new(RecordingChannel::default());
        let other = Arc::new(RecordingChannel::default());
        manager.on_switch_connected(DatapathId(1), origin.clone()).await;
        manager.on_switch_connected(DatapathId(2), other.clone()).await;

        let r = route();
        manager.create_route(r.clone()).await.unwrap();
        let installed_at_creation = origin.flows().len();

        let frame = udp_frame(Ipv4Addr::new(198, 51, 100, 7), r.public_ip, 40000, 80);
        manager.on_packet_in(DatapathId(1), 1, &frame).await;

        let expected = flow::compile_route(&r, manager.config()).unwrap();
        let reinstalled = origin.flows()[installed_at_creation..].to_vec();
        assert_eq!(reinstalled, expected);
        assert_eq!(other.flows().len(), installed_at_creation);
    }

    #[tokio::test]
    async fn non_ip_packets_are_ignored() {
        let manager = Manager::new(FlowConfig::default());
        let channel = Arc::new(RecordingChannel::default());
        manager.on_switch_connected(DatapathId(1), channel.clone()).await;
        manager.create_route(route()).await.unwrap();
        let before = channel.flows().len();

        // ARP ethertype.
        let mut frame = vec![0u8; 42];
        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        manager.on_packet_in(DatapathId(1), 1, &frame).await;

        assert_eq!(channel.flows().len(), before);
    }

    #[test]
    fn compiled_rules_include_the_multipath_stage() {
        // End to end: the 203.0.113.5 example pins two backends behind
        // one multipath rule selecting over links {0, 1}.
        let rules = flow::compile_route(&route(), &FlowConfig::default()).unwrap();
        let multipath: Vec<_> = rules
            .iter()
            .filter(|r| r.table == flow::MULTIPATH_TABLE)
            .collect();
        assert_eq!(multipath.len(), 1);
        assert!(matches!(
            multipath[0].actions[0],
            Action::Multipath { max_link: 1, .. }
        ));

        let rewrites: Vec<_> = rules
            .iter()
            .filter(|r| r.table == flow::NAT_TABLE)
            .collect();
        assert_eq!(rewrites.len(), 2);
    }
}
