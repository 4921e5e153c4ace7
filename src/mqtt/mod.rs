//! MQTT 3.1.1 client session engine.
//!
//! MQTT is a publish-subscribe protocol: clients subscribe to topic filters at
//! a broker and receive every message published to a matching topic. This
//! module implements the client side of one long-lived session:
//!
//! - connecting and the CONNECT / CONNACK handshake ([`Session::connect`])
//! - topic filter validation and matching with `+` and `#` ([`topic`])
//! - the subscription table, restored after every reconnect
//!   ([`Session::subscribe`], [`Session::unsubscribe`])
//! - delivery of inbound messages to a [`MessageHandler`] with the QoS 1 and
//!   QoS 2 acknowledgement flows
//! - outbound publishing at QoS 0, 1 and 2 ([`Session::publish`])
//! - keep-alive pings and graceful disconnect ([`Session::run`],
//!   [`DisconnectSignal`])
//!
//! All buffers are fixed-size, so the engine runs without an allocator. The
//! capacities are the constants below.
//!
//! ```rust,no_run
//! use libmqtt::mqtt::{topic, QoS};
//!
//! assert!(topic::matches("home/kitchen/temp", "home/+/temp"));
//! assert!(topic::matches("home/kitchen/temp", "home/#"));
//! assert!(!topic::matches("$SYS/uptime", "#"));
//! assert_eq!(QoS::try_from(2u8), Ok(QoS::ExactlyOnce));
//! ```

/// Longest topic name or filter, in bytes.
pub const MAX_TOPIC_LEN: usize = 256;

/// Largest inbound or outbound payload, in bytes.
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// Largest encoded control packet, in bytes.
pub const MAX_PACKET_SIZE: usize = 2048;

/// Filters a session can hold at once.
pub const MAX_SUBSCRIPTIONS: usize = 16;

/// Storage for the client identifier, in bytes.
pub const MAX_CLIENT_ID_LEN: usize = 128;

/// Inbound QoS 2 messages awaiting PUBREL at once.
pub const MAX_INFLIGHT: usize = 16;

/// Time source.
pub mod clock;
/// Error types.
pub mod error;
/// Connection options.
pub mod options;
/// Control packet codec.
pub mod packet;
/// The session engine.
pub mod session;
/// Subscription table.
pub mod subscription;
/// Topic names and filters.
pub mod topic;

#[cfg(feature = "std")]
pub use clock::StdClock;
pub use clock::Clock;
pub use error::{ConnectReturnCode, Error, FilterError, ProtocolError};
pub use options::{ConfigError, Options, Will};
pub use packet::QoS;
pub use session::{ConnectionState, DisconnectSignal, InboundMessage, MessageHandler, Session};
pub use subscription::{Subscription, SubscriptionTable};
