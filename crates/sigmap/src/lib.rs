//! A peer-to-peer signal mapping runtime: multicast discovery, mapping
//! negotiation, and an arithmetic expression engine for streaming typed
//! signals between devices on a local network.
//!
//! Devices advertise themselves and their signals on a well-known
//! multicast admin bus; any device can propose a map between a source
//! signal and a destination signal, optionally transformed by a small
//! expression DSL, and the runtime negotiates, evaluates, and transports
//! it without any central coordinator.
//!
//! ```no_run
//! use sigmap::config::DeviceConfig;
//! use sigmap::device::Device;
//! use sigmap::signal::{Direction, SignalDecl, ValueType};
//!
//! # async fn run() -> sigmap::error::Result<()> {
//! let mut device = Device::new("synth", DeviceConfig::new()).await?;
//! device.add_signal(SignalDecl::new("freq", Direction::Output, ValueType::Float32, 1))?;
//! loop {
//!     device.poll(100).await?;
//! }
//! # }
//! ```

pub mod admin_proto;
pub mod alloc;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod expr;
pub mod graph;
pub mod map;
pub mod net;
pub mod signal;
pub mod time;

pub use device::Device;
pub use error::{Error, Result};
pub use map::MapHandle;
