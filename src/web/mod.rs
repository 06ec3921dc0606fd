//! HTTP bootstrap responder for browser viewers

mod bootstrap;

pub use bootstrap::{bootstrap_router, BootstrapAssets, BootstrapPage, BootstrapServer};
