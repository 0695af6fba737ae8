//! Switch-control boundary.
//!
//! The dispatcher sees switches through two narrow interfaces: a
//! [`ControlChannel`] for sending commands to one switch, and a stream
//! of [`SwitchEvent`]s coming back from all of them. The TCP transport
//! and the OpenFlow 1.0 + Nicira-extensions encoding behind those
//! interfaces live in [`listener`] and [`wire`].

pub mod listener;
pub mod wire;

use crate::flow::FlowRule;
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;

/// A switch identity, as reported in its features reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatapathId(pub u64);

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Command channel to one connected switch.
///
/// Sends are fire-and-forget: no acknowledgment is awaited and no
/// retry is attempted. A failed send surfaces as an error for the
/// caller to log.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Install one rule, targeting the rule's table explicitly.
    async fn add_flow(&self, rule: &FlowRule) -> io::Result<()>;

    /// Allow the controller, rather than the switch default, to choose
    /// the table id of inserted rules. Sent once per connection.
    async fn enable_flow_mod_table_id(&self, enable: bool) -> io::Result<()>;
}

/// Everything a switch can tell the dispatcher.
#[derive(Clone)]
pub enum SwitchEvent {
    /// Handshake completed; the switch is addressable.
    Connected {
        dpid: DatapathId,
        channel: Arc<dyn ControlChannel>,
    },
    /// A packet missed every installed rule and was punted to us.
    PacketIn {
        dpid: DatapathId,
        in_port: u16,
        data: Vec<u8>,
    },
}

impl fmt::Debug for SwitchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchEvent::Connected { dpid, .. } => {
                f.debug_struct("Connected").field("dpid", dpid).finish()
            }
            SwitchEvent::PacketIn { dpid, in_port, data } => f
                .debug_struct("PacketIn")
                .field("dpid", dpid)
                .field("in_port", in_port)
                .field("len", &data.len())
                .finish(),
        }
    }
}
