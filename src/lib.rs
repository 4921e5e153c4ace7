//! # libmqtt - MQTT 3.1.1 session engine
//!
//! A client for the MQTT 3.1.1 publish-subscribe protocol, built for embedded
//! devices and hosted services alike. The library supports `no_std`
//! environments and never allocates.
//!
//! ## Features
//!
//! - **Session engine**: connect, subscribe, unsubscribe, publish and a
//!   blocking read loop with keep-alive
//! - **Topic matching**: `+` and `#` wildcards, `$`-prefixed topics excluded
//!   from root wildcards
//! - **Reconnect**: subscriptions survive a dropped connection and are
//!   restored on the next `connect`
//! - **Transport agnostic**: any reliable byte-stream implementing the
//!   [`network`] traits, with a `std::net` TCP transport behind the `std`
//!   feature
//!
//! ## Usage
//!
//! ```rust,no_run
//! # #[cfg(feature = "std")]
//! # fn main() -> Result<(), libmqtt::mqtt::Error> {
//! use libmqtt::mqtt::{InboundMessage, Options, QoS, Session, StdClock};
//! use libmqtt::network::tcp::TcpConnector;
//!
//! let mut print = |message: &InboundMessage<'_>| {
//!     let _ = (message.topic, message.payload);
//! };
//!
//! let mut session = Session::new(TcpConnector::default(), StdClock::new());
//! session.on_message(&mut print);
//! session.connect("broker.hivemq.com:1883", &Options::new("my_device"))?;
//! session.subscribe("sensors/+/temperature", QoS::AtLeastOnce)?;
//! session.run()
//! # }
//! # #[cfg(not(feature = "std"))]
//! # fn main() {}
//! ```
//!
//! ## Optional Features
//!
//! - `std`: Enable standard library support: TCP transport and wall clock
//!   (default: disabled)
//! - `defmt`: Enable defmt logging support for embedded debugging
//! - `tracing`: Emit log events through `tracing`

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
mod fmt;

/// Transport abstraction the session engine runs over.
///
/// Defines the byte-stream traits and, with the `std` feature, a TCP
/// implementation.
pub mod network;

/// The MQTT client session engine.
pub mod mqtt;
