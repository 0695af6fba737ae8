//! IPv4 address and CIDR text codec.
//!
//! OpenFlow matches and NAT actions carry addresses as big-endian u32
//! values, while the REST API and CLI speak dotted-quad strings. This
//! module converts between the two and expands CIDR blocks into the
//! per-host `/32` entries used for bulk route provisioning.

use ipnet::Ipv4Net;
use serde::Deserialize;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors for caller-supplied address text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid IPv4 address: {0}")]
    Address(String),

    #[error("invalid prefix length in {0}")]
    PrefixLength(String),

    #[error("missing prefix length in {0}")]
    MissingPrefix(String),
}

pub type Result<T> = std::result::Result<T, FormatError>;

/// Parse a dotted-quad address into its big-endian u32 value.
pub fn parse_ipv4(text: &str) -> Result<u32> {
    let addr: Ipv4Addr = text
        .parse()
        .map_err(|_| FormatError::Address(text.to_string()))?;
    Ok(u32::from(addr))
}

/// Parse `a.b.c.d/len` into `(address, netmask)` u32 values.
pub fn parse_ipv4_cidr(text: &str) -> Result<(u32, u32)> {
    let (addr, prefix) = text
        .split_once('/')
        .ok_or_else(|| FormatError::MissingPrefix(text.to_string()))?;

    let prefix: u8 = prefix
        .parse()
        .map_err(|_| FormatError::PrefixLength(text.to_string()))?;
    if prefix > 32 {
        return Err(FormatError::PrefixLength(text.to_string()));
    }

    Ok((parse_ipv4(addr)?, cidr_mask_to_net_mask(prefix)))
}

/// Convert a prefix length into a contiguous netmask.
pub fn cidr_mask_to_net_mask(prefix: u8) -> u32 {
    debug_assert!(prefix <= 32);
    (((1u64 << 32) - (1u64 << (32 - u64::from(prefix)))) & 0xffff_ffff) as u32
}

/// Render a big-endian u32 as its canonical dotted-quad form.
pub fn format_ipv4(addr: u32) -> String {
    Ipv4Addr::from(addr).to_string()
}

/// CIDR input for host-block expansion: a single block, or an
/// arbitrarily nested list of blocks (as found in provisioning JSON).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CidrBlocks {
    One(String),
    Many(Vec<CidrBlocks>),
}

/// Expand CIDR blocks into the usable host addresses as `/32` strings.
///
/// Network and broadcast addresses are excluded. Blocks of two or fewer
/// addresses (prefix 31 or 32) have no distinct network/broadcast pair
/// and yield the block's own address as a single `/32`. Nested lists
/// are expanded recursively, concatenated in input order.
pub fn expand_cidr_to_host_blocks(blocks: &CidrBlocks) -> Result<Vec<String>> {
    match blocks {
        CidrBlocks::Many(list) => {
            let mut out = Vec::new();
            for block in list {
                out.extend(expand_cidr_to_host_blocks(block)?);
            }
            Ok(out)
        }
        CidrBlocks::One(text) => {
            let (addr, prefix) = match text.split_once('/') {
                Some((addr, prefix)) => {
                    let addr: Ipv4Addr = addr
                        .parse()
                        .map_err(|_| FormatError::Address(text.to_string()))?;
                    let prefix: u8 = prefix
                        .parse()
                        .map_err(|_| FormatError::PrefixLength(text.to_string()))?;
                    (addr, prefix)
                }
                // A bare address is a host block.
                None => (
                    text.parse()
                        .map_err(|_| FormatError::Address(text.to_string()))?,
                    32,
                ),
            };

            let net = Ipv4Net::new(addr, prefix)
                .map_err(|_| FormatError::PrefixLength(text.to_string()))?;

            if prefix >= 31 {
                return Ok(vec![format!("{addr}/32")]);
            }

            // hosts() skips the network and broadcast addresses.
            Ok(net.hosts().map(|host| format!("{host}/32")).collect())
        }
    }
}
