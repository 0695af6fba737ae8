//! Route domain types.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// One private backend behind a floating IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub private_ip: Ipv4Addr,
}

/// A floating IP mapped to an ordered set of private backends.
///
/// Endpoint order is significant: the position of an endpoint is its
/// multipath link index, and a flow's hash resolves to a link index.
/// Reordering endpoints repins existing flows to different backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub public_ip: Ipv4Addr,
    pub endpoints: Vec<Endpoint>,
}

impl Route {
    pub fn new(public_ip: Ipv4Addr, backends: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        Route {
            public_ip,
            endpoints: backends
                .into_iter()
                .map(|private_ip| Endpoint { private_ip })
                .collect(),
        }
    }
}
