//! In-memory route repository.
//!
//! Routes live for the process lifetime only; there is no persistence
//! and no delete path. `put` on an existing public IP replaces the
//! stored route wholesale.

use crate::route::Route;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Repository errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("route not found: {0}")]
    NotFound(Ipv4Addr),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Keyed store of routes, keyed by public IP.
#[derive(Debug, Default)]
pub struct RouteStore {
    routes: HashMap<Ipv4Addr, Route>,
}

impl RouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the route keyed by its public IP.
    /// Returns the replaced route, if any.
    pub fn put(&mut self, route: Route) -> Option<Route> {
        self.routes.insert(route.public_ip, route)
    }

    /// Look up a route by public IP.
    pub fn get(&self, public_ip: Ipv4Addr) -> Result<&Route> {
        self.routes
            .get(&public_ip)
            .ok_or(StoreError::NotFound(public_ip))
    }

    /// All stored routes, in no particular order.
    pub fn list(&self) -> Vec<Route> {
        self.routes.values().cloned().collect()
    }

    /// Whether `addr` is a known floating IP.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.routes.contains_key(&addr)
    }

    /// The set of public IPs with a stored route.
    pub fn public_ips(&self) -> Vec<Ipv4Addr> {
        self.routes.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
