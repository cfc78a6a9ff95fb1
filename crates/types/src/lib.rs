//! Shared domain types for the lidar perception core and the network
//! resilience core.

mod lidar;
mod net;

pub use lidar::*;
pub use net::*;
