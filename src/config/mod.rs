//! Configuration schema and persistent store

mod schema;
mod store;

pub use schema::{
    AppConfig, DeviceConfig, NegotiationConfig, RateControl, StreamerConfig, VideoCodec,
};
pub use store::{ConfigChange, ConfigStore};
