//! vision-rtc - Low-latency WebRTC camera streaming for embedded devices
//!
//! This crate captures NV21 frames, encodes them to H.264/H.265 and streams
//! them to one browser viewer over WebRTC, with optional Opus audio and a
//! hardware overlay compositor.

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod overlay;
pub mod utils;
pub mod video;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
pub use webrtc::SessionManager;
