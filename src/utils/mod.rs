//! Shared helpers

pub mod net;
pub mod throttle;

pub use net::{interface_ipv4, server_urls};
pub use throttle::LogThrottler;
