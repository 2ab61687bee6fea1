//! Demonstration protocols built on the public node API.
//!
//! - [`flood`]: seen-flag flooding, bare or layered
//! - [`route_discovery`]: RREQ/RREP route discovery with periodic data on layered nodes

pub mod flood;
pub mod route_discovery;

pub use flood::{Flood, FloodLog, FloodReception};
pub use route_discovery::{RouteDiscovery, RouteLog, SharedRouteLog};
