//! Print every message published under a topic filter.
//!
//! ```text
//! MQTT_ADDRESS=broker.hivemq.com:1883 MQTT_TOPIC='sensors/#' cargo run --example subscriber --features std,tracing
//! ```
//!
//! The session reconnects after a lost connection, and subscriptions come
//! back on their own.

use dotenvy::dotenv;
use libmqtt::mqtt::topic::is_valid_filter;
use libmqtt::mqtt::{InboundMessage, Options, QoS, Session, StdClock};
use libmqtt::network::tcp::TcpConnector;
use std::env;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let address = env::var("MQTT_ADDRESS").unwrap_or("mqtt-dashboard.com:1883".to_string());
    let filter = env::var("MQTT_TOPIC").unwrap_or("Amjaad/#".to_string());
    if !is_valid_filter(&filter) {
        tracing::error!("MQTT_TOPIC is not a valid topic filter: {filter}");
        return;
    }
    let client_id = format!("libmqtt-{:08x}", rand::random::<u32>());

    let mut print = |message: &InboundMessage<'_>| {
        println!(
            "{} {}",
            message.topic,
            String::from_utf8_lossy(message.payload)
        );
    };

    let mut session = Session::new(TcpConnector::default(), StdClock::new());
    session.on_message(&mut print);
    let options = Options::new(&client_id);

    loop {
        match session.connect(&address, &options) {
            Ok(()) => {
                tracing::info!("connected to {address}");
                if session.subscriptions().is_empty() {
                    if let Err(e) = session.subscribe(&filter, QoS::AtMostOnce) {
                        tracing::error!("subscribe to {filter} failed: {e}");
                        return;
                    }
                }
                if let Err(e) = session.run() {
                    tracing::warn!("connection lost: {e}");
                }
            }
            Err(e) => tracing::warn!("connect to {address} failed: {e}"),
        }
        thread::sleep(RECONNECT_DELAY);
    }
}
