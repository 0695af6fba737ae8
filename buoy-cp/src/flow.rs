//! Route to flow-rule compilation.
//!
//! Each route becomes a three-table pipeline, installed on every
//! switch:
//!
//! ```text
//! table 0    admission: northbound port + floating IP -> resubmit 100
//! table 100  multipath: symmetric-L4 HRW hash -> link index in reg1
//! table 110  NAT:       reg1 = link -> rewrite dst, output southbound
//! ```
//!
//! The split keeps hash-based selection shared by every flow admitted
//! for the same floating IP, and lets per-endpoint rewrite rules change
//! independently of the admission stage. The reverse direction needs no
//! selection stage: the backend is already identified by the match.
//!
//! Compilation is pure. The same route always produces the same ordered
//! rule list, and every rule of a route carries the route's public IP
//! as its cookie so the whole set can later be identified (or bulk
//! deleted) as a unit.

use crate::openflow::wire::{NX_HASH_FIELDS_SYMMETRIC_L4, NX_MP_ALG_HRW};
use crate::route::Route;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Admission table.
pub const INGRESS_TABLE: u8 = 0;
/// Multipath selection table.
pub const MULTIPATH_TABLE: u8 = 100;
/// NAT rewrite and egress table.
pub const NAT_TABLE: u8 = 110;
/// Register carrying the selected link index between tables.
pub const MULTIPATH_REG: u8 = 1;

const ETHERTYPE_IPV4: u16 = 0x0800;

/// Compiler errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowError {
    #[error("route {0} has no endpoints")]
    EmptyEndpoints(Ipv4Addr),
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// Flow-compiler knobs, flag-configurable on the daemon.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Switch port facing the public network.
    pub northbound_port: u16,
    /// Switch port facing the private backends.
    pub southbound_port: u16,
    /// Idle timeout for ephemeral drop flows, seconds.
    pub drop_idle_timeout_sec: u32,
    /// Hard timeout for ephemeral drop flows, seconds.
    pub drop_hard_timeout_sec: u32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            northbound_port: 1,
            southbound_port: 2,
            drop_idle_timeout_sec: 1000,
            drop_hard_timeout_sec: 120_000,
        }
    }
}

/// Switch-side expiry for a rule set. Zero means permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub idle: u16,
    pub hard: u16,
}

impl Timeouts {
    pub const PERMANENT: Timeouts = Timeouts { idle: 0, hard: 0 };

    /// Expiry for ephemeral drop-flow variants. The wire fields are
    /// 16 bit, so configured values saturate at the field maximum.
    pub fn drop_flows(config: &FlowConfig) -> Timeouts {
        Timeouts {
            idle: config.drop_idle_timeout_sec.min(u32::from(u16::MAX)) as u16,
            hard: config.drop_hard_timeout_sec.min(u32::from(u16::MAX)) as u16,
        }
    }
}

/// A network-address predicate: exact host, or CIDR via mask.
///
/// Resolved once at the API boundary; the compiler and the wire layer
/// never re-interpret address text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NwAddr {
    Exact(Ipv4Addr),
    Masked(Ipv4Addr, u32),
}

/// Structured match predicate over the fields this pipeline uses.
///
/// At most one of `nw_src`/`nw_dst` carries a mask in practice; the
/// admission direction matches on destination, the reverse direction
/// on source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Match {
    pub in_port: Option<u16>,
    pub dl_src: Option<[u8; 6]>,
    pub dl_dst: Option<[u8; 6]>,
    pub dl_type: Option<u16>,
    pub nw_src: Option<NwAddr>,
    pub nw_dst: Option<NwAddr>,
    pub nw_proto: Option<u8>,
    /// `(register index, value)` pairs, matched exactly.
    pub registers: Vec<(u8, u32)>,
    pub tun_id: Option<u64>,
}

impl Match {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_port(mut self, port: u16) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn dl_type(mut self, ethertype: u16) -> Self {
        self.dl_type = Some(ethertype);
        self
    }

    pub fn dl_src(mut self, mac: [u8; 6]) -> Self {
        self.dl_src = Some(mac);
        self
    }

    pub fn dl_dst(mut self, mac: [u8; 6]) -> Self {
        self.dl_dst = Some(mac);
        self
    }

    /// Match the IPv4 destination. Implies the IPv4 ethertype unless
    /// one was set explicitly.
    pub fn nw_dst(mut self, addr: NwAddr) -> Self {
        self.nw_dst = Some(addr);
        if self.dl_type.is_none() {
            self.dl_type = Some(ETHERTYPE_IPV4);
        }
        self
    }

    /// Match the IPv4 source. Implies the IPv4 ethertype unless one
    /// was set explicitly.
    pub fn nw_src(mut self, addr: NwAddr) -> Self {
        self.nw_src = Some(addr);
        if self.dl_type.is_none() {
            self.dl_type = Some(ETHERTYPE_IPV4);
        }
        self
    }

    pub fn nw_proto(mut self, proto: u8) -> Self {
        self.nw_proto = Some(proto);
        self
    }

    pub fn reg(mut self, index: u8, value: u32) -> Self {
        self.registers.push((index, value));
        self
    }

    pub fn tun_id(mut self, id: u64) -> Self {
        self.tun_id = Some(id);
        self
    }
}

/// One forwarding action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Continue matching in another table.
    ResubmitTable(u8),
    /// Rewrite the IPv4 destination.
    SetNwDst(Ipv4Addr),
    /// Rewrite the IPv4 source.
    SetNwSrc(Ipv4Addr),
    /// Emit on a switch port.
    Output(u16),
    /// Hash the flow and store a link index into a register.
    Multipath {
        fields: u16,
        basis: u16,
        algorithm: u16,
        /// Largest selectable link index (link count minus one).
        max_link: u16,
        arg: u32,
        /// Destination register index.
        reg: u8,
    },
}

/// One compiled match/action rule, bound for a switch table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRule {
    pub table: u8,
    pub matching: Match,
    pub actions: Vec<Action>,
    /// `None` installs at the switch default priority.
    pub priority: Option<u16>,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
    /// The route's public IP; shared by every rule of one route.
    pub cookie: u64,
}

/// Compile the full bidirectional rule set for a route.
pub fn compile_route(route: &Route, config: &FlowConfig) -> Result<Vec<FlowRule>> {
    let mut rules = north_to_south(route, config, Timeouts::PERMANENT)?;
    rules.extend(south_to_north(route, config, Timeouts::PERMANENT)?);
    Ok(rules)
}

/// Public-to-private direction: admission, multipath, NAT rewrite.
///
/// Produces `2 + N` rules for `N` endpoints: one admission rule, one
/// multipath rule, and one rewrite rule per endpoint.
pub fn north_to_south(
    route: &Route,
    config: &FlowConfig,
    timeouts: Timeouts,
) -> Result<Vec<FlowRule>> {
    if route.endpoints.is_empty() {
        return Err(FlowError::EmptyEndpoints(route.public_ip));
    }

    let cookie = u64::from(u32::from(route.public_ip));
    let max_link = (route.endpoints.len() - 1) as u16;
    let mut rules = Vec::with_capacity(2 + route.endpoints.len());

    rules.push(FlowRule {
        table: INGRESS_TABLE,
        matching: Match::new()
            .in_port(config.northbound_port)
            .nw_dst(NwAddr::Exact(route.public_ip)),
        actions: vec![Action::ResubmitTable(MULTIPATH_TABLE)],
        priority: None,
        idle_timeout: timeouts.idle,
        hard_timeout: timeouts.hard,
        cookie,
    });

    rules.push(FlowRule {
        table: MULTIPATH_TABLE,
        matching: Match::new().nw_dst(NwAddr::Exact(route.public_ip)),
        actions: vec![
            Action::Multipath {
                fields: NX_HASH_FIELDS_SYMMETRIC_L4,
                basis: 0,
                algorithm: NX_MP_ALG_HRW,
                max_link,
                arg: 0,
                reg: MULTIPATH_REG,
            },
            Action::ResubmitTable(NAT_TABLE),
        ],
        priority: None,
        idle_timeout: timeouts.idle,
        hard_timeout: timeouts.hard,
        cookie,
    });

    for (link, endpoint) in route.endpoints.iter().enumerate() {
        rules.push(FlowRule {
            table: NAT_TABLE,
            matching: Match::new()
                .reg(MULTIPATH_REG, link as u32)
                .nw_dst(NwAddr::Exact(route.public_ip)),
            actions: vec![
                Action::SetNwDst(endpoint.private_ip),
                Action::Output(config.southbound_port),
            ],
            priority: None,
            idle_timeout: timeouts.idle,
            hard_timeout: timeouts.hard,
            cookie,
        });
    }

    Ok(rules)
}

/// Private-to-public direction: reverse NAT, one rule per endpoint.
///
/// The source match already identifies the backend, so this direction
/// needs no selection stage and lives entirely in the admission table.
pub fn south_to_north(
    route: &Route,
    config: &FlowConfig,
    timeouts: Timeouts,
) -> Result<Vec<FlowRule>> {
    if route.endpoints.is_empty() {
        return Err(FlowError::EmptyEndpoints(route.public_ip));
    }

    let cookie = u64::from(u32::from(route.public_ip));
    let rules = route
        .endpoints
        .iter()
        .map(|endpoint| FlowRule {
            table: INGRESS_TABLE,
            matching: Match::new()
                .in_port(config.southbound_port)
                .nw_src(NwAddr::Exact(endpoint.private_ip)),
            actions: vec![
                Action::SetNwSrc(route.public_ip),
                Action::Output(config.northbound_port),
            ],
            priority: None,
            idle_timeout: timeouts.idle,
            hard_timeout: timeouts.hard,
            cookie,
        })
        .collect();

    Ok(rules)
}
