pub mod broker;
pub mod diag;
pub mod dispatch;
pub mod policy;

pub use broker::RegisterBroker;
pub use dispatch::{clamp_range, RegisterFile};
pub use policy::{ConfigPolicy, RoutingQuirk};
