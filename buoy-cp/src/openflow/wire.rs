//! OpenFlow 1.0 + Nicira extensions wire codec.
//!
//! Only the controller's message set is implemented: hello/echo and
//! features for the handshake, packet-in parsing, and the two Nicira
//! vendor messages that carry flow programming (`NXT_FLOW_MOD` with
//! NXM match TLVs, and `NXT_FLOW_MOD_TABLE_ID`). Flow mods pack the
//! target table into the high-order byte of the command word; the
//! table-id capability message is what makes switches honor it.

use crate::flow::{Action, FlowRule, Match, NwAddr};
use crate::openflow::DatapathId;
use std::net::Ipv4Addr;

pub const OFP_VERSION: u8 = 0x01;
pub const OFP_HEADER_LEN: usize = 8;

// Message types.
pub const OFPT_HELLO: u8 = 0;
pub const OFPT_ERROR: u8 = 1;
pub const OFPT_ECHO_REQUEST: u8 = 2;
pub const OFPT_ECHO_REPLY: u8 = 3;
pub const OFPT_VENDOR: u8 = 4;
pub const OFPT_FEATURES_REQUEST: u8 = 5;
pub const OFPT_FEATURES_REPLY: u8 = 6;
pub const OFPT_PACKET_IN: u8 = 10;

pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;
pub const OFPP_IN_PORT: u16 = 0xfff8;
pub const OFPP_NONE: u16 = 0xffff;
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;

// Flow mod commands (low byte of the command word).
pub const OFPFC_ADD: u16 = 0;

// Standard action types.
pub const OFPAT_OUTPUT: u16 = 0;
pub const OFPAT_SET_NW_SRC: u16 = 6;
pub const OFPAT_SET_NW_DST: u16 = 7;
pub const OFPAT_VENDOR: u16 = 0xffff;

// Nicira vendor id and message subtypes.
pub const NX_VENDOR_ID: u32 = 0x0000_2320;
pub const NXT_FLOW_MOD: u32 = 13;
pub const NXT_FLOW_MOD_TABLE_ID: u32 = 15;

// Nicira action subtypes.
pub const NXAST_MULTIPATH: u16 = 10;
pub const NXAST_RESUBMIT_TABLE: u16 = 14;

// Multipath hash fields and algorithms.
pub const NX_HASH_FIELDS_SYMMETRIC_L4: u16 = 1;
pub const NX_MP_ALG_HRW: u16 = 2;

/// NXM field header: match class, field number, mask presence, and
/// payload length packed into one big-endian word.
const fn nxm_header(class: u16, field: u8, hasmask: bool, len: u8) -> u32 {
    ((class as u32) << 16) | ((field as u32) << 9) | ((hasmask as u32) << 8) | len as u32
}

pub const NXM_OF_IN_PORT: u32 = nxm_header(0x0000, 0, false, 2);
pub const NXM_OF_ETH_DST: u32 = nxm_header(0x0000, 1, false, 6);
pub const NXM_OF_ETH_SRC: u32 = nxm_header(0x0000, 2, false, 6);
pub const NXM_OF_ETH_TYPE: u32 = nxm_header(0x0000, 3, false, 2);
pub const NXM_OF_IP_PROTO: u32 = nxm_header(0x0000, 6, false, 1);
pub const NXM_OF_IP_SRC: u32 = nxm_header(0x0000, 7, false, 4);
pub const NXM_OF_IP_SRC_W: u32 = nxm_header(0x0000, 7, true, 8);
pub const NXM_OF_IP_DST: u32 = nxm_header(0x0000, 8, false, 4);
pub const NXM_OF_IP_DST_W: u32 = nxm_header(0x0000, 8, true, 8);
pub const NXM_NX_TUN_ID: u32 = nxm_header(0x0001, 16, false, 8);

/// NXM header for a Nicira extension register.
pub const fn nxm_reg(index: u8) -> u32 {
    nxm_header(0x0001, index, false, 4)
}

/// Bit-range operand used by register-writing actions: offset in the
/// high bits, field width minus one in the low six.
pub const fn ofs_nbits(ofs: u16, nbits: u16) -> u16 {
    (ofs << 6) | (nbits - 1)
}

/// Parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub version: u8,
    pub msg_type: u8,
    pub length: u16,
    pub xid: u32,
}

impl MsgHeader {
    pub fn parse(buf: &[u8; OFP_HEADER_LEN]) -> MsgHeader {
        MsgHeader {
            version: buf[0],
            msg_type: buf[1],
            length: u16::from_be_bytes([buf[2], buf[3]]),
            xid: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

fn message(msg_type: u8, xid: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(OFP_HEADER_LEN + body.len());
    buf.push(OFP_VERSION);
    buf.push(msg_type);
    buf.extend_from_slice(&((OFP_HEADER_LEN + body.len()) as u16).to_be_bytes());
    buf.extend_from_slice(&xid.to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

pub fn hello(xid: u32) -> Vec<u8> {
    message(OFPT_HELLO, xid, &[])
}

pub fn echo_reply(xid: u32, payload: &[u8]) -> Vec<u8> {
    message(OFPT_ECHO_REPLY, xid, payload)
}

pub fn features_request(xid: u32) -> Vec<u8> {
    message(OFPT_FEATURES_REQUEST, xid, &[])
}

/// `NXT_FLOW_MOD_TABLE_ID`: let flow mods address tables explicitly.
pub fn flow_mod_table_id(xid: u32, enable: bool) -> Vec<u8> {
    let mut body = Vec::with_capacity(16);
    body.extend_from_slice(&NX_VENDOR_ID.to_be_bytes());
    body.extend_from_slice(&NXT_FLOW_MOD_TABLE_ID.to_be_bytes());
    body.push(u8::from(enable));
    body.extend_from_slice(&[0u8; 7]);
    message(OFPT_VENDOR, xid, &body)
}

/// `NXT_FLOW_MOD` adding one rule, table id packed into the command.
pub fn flow_mod(xid: u32, rule: &FlowRule) -> Vec<u8> {
    let mut tlvs = Vec::new();
    put_match(&mut tlvs, &rule.matching);
    let match_len = tlvs.len();
    // The match region is zero-padded to an 8-byte boundary.
    while tlvs.len() % 8 != 0 {
        tlvs.push(0);
    }

    let mut actions = Vec::new();
    put_actions(&mut actions, &rule.actions);

    let command = (u16::from(rule.table) << 8) | OFPFC_ADD;
    let priority = rule.priority.unwrap_or(OFP_DEFAULT_PRIORITY);

    let mut body = Vec::with_capacity(40 + tlvs.len() + actions.len());
    body.extend_from_slice(&NX_VENDOR_ID.to_be_bytes());
    body.extend_from_slice(&NXT_FLOW_MOD.to_be_bytes());
    body.extend_from_slice(&rule.cookie.to_be_bytes());
    body.extend_from_slice(&command.to_be_bytes());
    body.extend_from_slice(&rule.idle_timeout.to_be_bytes());
    body.extend_from_slice(&rule.hard_timeout.to_be_bytes());
    body.extend_from_slice(&priority.to_be_bytes());
    body.extend_from_slice(&OFP_NO_BUFFER.to_be_bytes());
    body.extend_from_slice(&OFPP_NONE.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes()); // flags
    body.extend_from_slice(&(match_len as u16).to_be_bytes());
    body.extend_from_slice(&[0u8; 6]);
    body.extend_from_slice(&tlvs);
    body.extend_from_slice(&actions);

    message(OFPT_VENDOR, xid, &body)
}

/// Datapath id from a features reply body (header stripped).
pub fn parse_features_reply(body: &[u8]) -> Option<DatapathId> {
    let dpid = body.get(0..8)?;
    Some(DatapathId(u64::from_be_bytes(dpid.try_into().ok()?)))
}

/// Ingress port and frame bytes from a packet-in body (header
/// stripped).
pub fn parse_packet_in(body: &[u8]) -> Option<(u16, Vec<u8>)> {
    // buffer_id(4) total_len(2) in_port(2) reason(1) pad(1) data
    if body.len() < 10 {
        return None;
    }
    let in_port = u16::from_be_bytes([body[6], body[7]]);
    Some((in_port, body[10..].to_vec()))
}

fn put_nxm(buf: &mut Vec<u8>, header: u32, value: &[u8]) {
    debug_assert_eq!((header & 0xff) as usize, value.len());
    buf.extend_from_slice(&header.to_be_bytes());
    buf.extend_from_slice(value);
}

fn put_nw(buf: &mut Vec<u8>, exact: u32, masked: u32, addr: NwAddr) {
    match addr {
        NwAddr::Exact(ip) => put_nxm(buf, exact, &u32::from(ip).to_be_bytes()),
        NwAddr::Masked(ip, mask) => {
            let mut value = [0u8; 8];
            value[0..4].copy_from_slice(&u32::from(ip).to_be_bytes());
            value[4..8].copy_from_slice(&mask.to_be_bytes());
            put_nxm(buf, masked, &value);
        }
    }
}

/// Serialize a match as NXM TLVs. Field order satisfies the NXM
/// prerequisite rule: the Ethernet type precedes every IP field.
fn put_match(buf: &mut Vec<u8>, m: &Match) {
    if let Some(port) = m.in_port {
        put_nxm(buf, NXM_OF_IN_PORT, &port.to_be_bytes());
    }
    if let Some(mac) = m.dl_src {
        put_nxm(buf, NXM_OF_ETH_SRC, &mac);
    }
    if let Some(mac) = m.dl_dst {
        put_nxm(buf, NXM_OF_ETH_DST, &mac);
    }
    if let Some(ethertype) = m.dl_type {
        put_nxm(buf, NXM_OF_ETH_TYPE, &ethertype.to_be_bytes());
    }
    if let Some(proto) = m.nw_proto {
        put_nxm(buf, NXM_OF_IP_PROTO, &[proto]);
    }
    if let Some(addr) = m.nw_src {
        put_nw(buf, NXM_OF_IP_SRC, NXM_OF_IP_SRC_W, addr);
    }
    if let Some(addr) = m.nw_dst {
        put_nw(buf, NXM_OF_IP_DST, NXM_OF_IP_DST_W, addr);
    }
    for &(index, value) in &m.registers {
        put_nxm(buf, nxm_reg(index), &value.to_be_bytes());
    }
    if let Some(id) = m.tun_id {
        put_nxm(buf, NXM_NX_TUN_ID, &id.to_be_bytes());
    }
}

fn put_set_nw(buf: &mut Vec<u8>, action_type: u16, addr: Ipv4Addr) {
    buf.extend_from_slice(&action_type.to_be_bytes());
    buf.extend_from_slice(&8u16.to_be_bytes());
    buf.extend_from_slice(&u32::from(addr).to_be_bytes());
}

fn put_actions(buf: &mut Vec<u8>, actions: &[Action]) {
    for action in actions {
        match *action {
            Action::Output(port) => {
                buf.extend_from_slice(&OFPAT_OUTPUT.to_be_bytes());
                buf.extend_from_slice(&8u16.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                buf.extend_from_slice(&0u16.to_be_bytes()); // max_len
            }
            Action::SetNwDst(addr) => put_set_nw(buf, OFPAT_SET_NW_DST, addr),
            Action::SetNwSrc(addr) => put_set_nw(buf, OFPAT_SET_NW_SRC, addr),
            Action::ResubmitTable(table) => {
                buf.extend_from_slice(&OFPAT_VENDOR.to_be_bytes());
                buf.extend_from_slice(&16u16.to_be_bytes());
                buf.extend_from_slice(&NX_VENDOR_ID.to_be_bytes());
                buf.extend_from_slice(&NXAST_RESUBMIT_TABLE.to_be_bytes());
                buf.extend_from_slice(&OFPP_IN_PORT.to_be_bytes());
                buf.push(table);
                buf.extend_from_slice(&[0u8; 3]);
            }
            Action::Multipath {
                fields,
                basis,
                algorithm,
                max_link,
                arg,
                reg,
            } => {
                buf.extend_from_slice(&OFPAT_VENDOR.to_be_bytes());
                buf.extend_from_slice(&32u16.to_be_bytes());
                buf.extend_from_slice(&NX_VENDOR_ID.to_be_bytes());
                buf.extend_from_slice(&NXAST_MULTIPATH.to_be_bytes());
                buf.extend_from_slice(&fields.to_be_bytes());
                buf.extend_from_slice(&basis.to_be_bytes());
                buf.extend_from_slice(&[0u8; 2]);
                buf.extend_from_slice(&algorithm.to_be_bytes());
                buf.extend_from_slice(&max_link.to_be_bytes());
                buf.extend_from_slice(&arg.to_be_bytes());
                buf.extend_from_slice(&[0u8; 2]);
                buf.extend_from_slice(&ofs_nbits(0, 32).to_be_bytes());
                buf.extend_from_slice(&nxm_reg(reg).to_be_bytes());
            }
        }
    }
}
