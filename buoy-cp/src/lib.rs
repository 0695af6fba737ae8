pub mod flow;
pub mod ip;
pub mod manager;
pub mod multipath;
pub mod openflow;
pub mod rest;
pub mod route;
pub mod store;

pub use flow::{FlowConfig, FlowError, FlowRule};
pub use manager::{Manager, run_events};
pub use openflow::{ControlChannel, DatapathId, SwitchEvent};
pub use route::{Endpoint, Route};
pub use store::{RouteStore, StoreError};
