//! The client session engine.
//!
//! A [`Session`] owns one logical connection to a broker. It opens the
//! transport through a [`Connect`] implementation, performs the CONNECT /
//! CONNACK handshake, keeps the table of active subscriptions, and routes
//! inbound PUBLISH packets to the registered [`MessageHandler`].
//!
//! # State machine
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──CONNACK 0──▶ Connected ──disconnect()──▶ Disconnected
//!                                 │                        │
//!                     refused / timeout / I/O     keep-alive / I/O / protocol
//!                                 ▼                        ▼
//!                               Failed ◀───────────────────┘
//! ```
//!
//! `Failed` keeps the error that caused it ([`Session::last_error`]) until the
//! caller explicitly calls [`Session::connect`] again. Every registered filter
//! is re-subscribed as part of each successful `connect`, before it returns.
//!
//! # Blocking
//!
//! Only transport reads block, and the transport bounds them with its read
//! timeout. [`Session::run`] loops over [`Session::poll`] and checks the
//! attached [`DisconnectSignal`] once per iteration, so a disconnect request
//! from another thread (or from inside the handler) ends `run` within one read
//! timeout.

use super::clock::Clock;
use super::error::{ConnectReturnCode, Error, ProtocolError};
use super::options::Options;
use super::packet::{self, Frame, Packet, Publish, QoS, ReturnCodes};
use super::subscription::SubscriptionTable;
use super::topic;
use super::{MAX_CLIENT_ID_LEN, MAX_INFLIGHT, MAX_PACKET_SIZE, MAX_PAYLOAD_LEN, MAX_SUBSCRIPTIONS};
use crate::network::{self, Close, Connect, Read, TransportError};
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use heapless::{String, Vec};

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 256;

/// Connection lifecycle states.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectionState {
    /// No transport; the initial state and the result of `disconnect`.
    Disconnected,
    /// Transport open, waiting for CONNACK.
    Connecting,
    /// Handshake complete.
    Connected,
    /// The last connection ended with an error.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConnectionState {
    fn format(&self, f: defmt::Formatter) {
        match self {
            ConnectionState::Disconnected => defmt::write!(f, "Disconnected"),
            ConnectionState::Connecting => defmt::write!(f, "Connecting"),
            ConnectionState::Connected => defmt::write!(f, "Connected"),
            ConnectionState::Failed => defmt::write!(f, "Failed"),
        }
    }
}

/// A publication delivered to the handler.
///
/// Borrowed from the session's receive path and only valid for the duration
/// of the handler call.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct InboundMessage<'m> {
    /// Concrete topic the message was published to.
    pub topic: &'m str,
    /// Message payload.
    pub payload: &'m [u8],
    /// Strongest level granted across the subscriptions matching `topic`.
    pub qos: QoS,
    /// The broker delivered a retained message.
    pub retain: bool,
    /// The broker flagged this as a redelivery.
    pub duplicate: bool,
}

/// Receiver of inbound publications.
///
/// Called synchronously from the session's read path. Long-running work here
/// delays keep-alive processing.
pub trait MessageHandler {
    /// Handle one message that matched at least one subscription.
    fn on_message(&mut self, message: &InboundMessage<'_>);
}

impl<F> MessageHandler for F
where
    F: FnMut(&InboundMessage<'_>),
{
    fn on_message(&mut self, message: &InboundMessage<'_>) {
        self(message)
    }
}

/// Requests a graceful disconnect of a running session from any context.
///
/// # Examples
///
/// ```rust
/// use libmqtt::mqtt::DisconnectSignal;
///
/// static SHUTDOWN: DisconnectSignal = DisconnectSignal::new();
///
/// SHUTDOWN.request();
/// assert!(SHUTDOWN.is_requested());
/// ```
#[derive(Debug, Default)]
pub struct DisconnectSignal {
    requested: AtomicBool,
}

impl DisconnectSignal {
    /// A signal with no pending request.
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    /// Ask the session to disconnect at its next loop iteration.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// `true` while a request is pending.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    fn take(&self) -> bool {
        let requested = self.is_requested();
        if requested {
            self.requested.store(false, Ordering::Release);
        }
        requested
    }
}

/// Acknowledgements an operation can wait for.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Expect {
    ConnAck,
    SubAck(u16),
    UnsubAck(u16),
    PubAck(u16),
    PubRec(u16),
    PubComp(u16),
}

impl Expect {
    fn matches(self, packet: &Packet) -> bool {
        match (self, packet) {
            (Expect::ConnAck, Packet::ConnAck { .. }) => true,
            (Expect::SubAck(id), Packet::SubAck { packet_id, .. }) => id == *packet_id,
            (Expect::UnsubAck(id), Packet::UnsubAck(got)) => id == *got,
            (Expect::PubAck(id), Packet::PubAck(got)) => id == *got,
            (Expect::PubRec(id), Packet::PubRec(got)) => id == *got,
            (Expect::PubComp(id), Packet::PubComp(got)) => id == *got,
            _ => false,
        }
    }
}

/// Reassembles control packets from a byte-stream.
#[derive(Debug)]
struct FrameReader {
    buf: Vec<u8, MAX_PACKET_SIZE>,
}

impl FrameReader {
    const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn clear(&mut self) {
        self.buf.clear();
    }

    fn next_frame(&mut self) -> Result<Option<Packet>, Error> {
        match packet::decode(&self.buf)? {
            Some((packet, used)) => {
                let len = self.buf.len();
                self.buf.copy_within(used..len, 0);
                self.buf.truncate(len - used);
                Ok(Some(packet))
            }
            None => Ok(None),
        }
    }

    /// Return a buffered frame, or read once from `transport` and try again.
    ///
    /// `Ok(None)` means no complete frame yet: the read timed out or delivered
    /// only part of a frame.
    fn poll<R: Read>(&mut self, transport: &mut R) -> Result<Option<Packet>, Error> {
        if let Some(packet) = self.next_frame()? {
            return Ok(Some(packet));
        }

        let spare = MAX_PACKET_SIZE - self.buf.len();
        if spare == 0 {
            return Err(ProtocolError::PacketTooLarge.into());
        }
        let mut chunk = [0u8; READ_CHUNK];
        let want = spare.min(READ_CHUNK);
        match transport.read(&mut chunk[..want]) {
            Ok(0) => Err(Error::Transport(network::Error::ConnectionClosed)),
            Ok(n) => {
                self.buf
                    .extend_from_slice(&chunk[..n])
                    .map_err(|_| Error::BufferOverflow)?;
                self.next_frame()
            }
            Err(e) if e.is_timeout() => Ok(None),
            Err(_) => Err(Error::Transport(network::Error::ReadError)),
        }
    }
}

/// An MQTT 3.1.1 client session.
///
/// # Type Parameters
///
/// * `N` - opens the transport, see [`Connect`]
/// * `K` - time source for keep-alive and acknowledgement deadlines
///
/// # Examples
///
/// ```rust,no_run
/// use libmqtt::mqtt::{Clock, InboundMessage, Options, QoS, Session};
/// # use libmqtt::network::{Close, Connect, Connection, Read, Write};
/// # struct MockConnection;
/// # impl Connection for MockConnection {}
/// # impl Read for MockConnection {
/// #     type Error = ();
/// #     fn read(&mut self, _buf: &mut [u8]) -> Result<usize, Self::Error> { Ok(0) }
/// # }
/// # impl Write for MockConnection {
/// #     type Error = ();
/// #     fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
/// #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
/// # }
/// # impl Close for MockConnection {
/// #     type Error = ();
/// #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
/// # }
/// # struct MockNetwork;
/// # impl Connect for MockNetwork {
/// #     type Connection = MockConnection;
/// #     type Error = ();
/// #     fn connect(&mut self, _remote: &str) -> Result<MockConnection, ()> { Ok(MockConnection) }
/// # }
/// # struct Ticks;
/// # impl Clock for Ticks { fn now_ms(&self) -> u64 { 0 } }
///
/// let mut print = |message: &InboundMessage<'_>| {
///     let _ = (message.topic, message.payload);
/// };
///
/// let mut session = Session::new(MockNetwork, Ticks);
/// session.on_message(&mut print);
/// session.connect("broker:1883", &Options::new("weather_station"))?;
/// session.subscribe("sensors/#", QoS::AtLeastOnce)?;
/// session.run()?;
/// # Ok::<(), libmqtt::mqtt::Error>(())
/// ```
pub struct Session<'a, N: Connect, K: Clock> {
    connector: N,
    clock: K,
    transport: Option<N::Connection>,
    reader: FrameReader,
    frame: Frame,
    state: ConnectionState,
    last_error: Option<Error>,
    client_id: String<MAX_CLIENT_ID_LEN>,
    keep_alive_ms: u64,
    ack_timeout_ms: u64,
    session_present: bool,
    subscriptions: SubscriptionTable,
    handler: Option<&'a mut dyn MessageHandler>,
    signal: Option<&'a DisconnectSignal>,
    next_packet_id: u16,
    last_sent_ms: u64,
    ping_sent_ms: Option<u64>,
    awaiting_release: Vec<u16, MAX_INFLIGHT>,
}

impl<'a, N: Connect, K: Clock> Session<'a, N, K> {
    /// A disconnected session.
    pub fn new(connector: N, clock: K) -> Self {
        Self {
            connector,
            clock,
            transport: None,
            reader: FrameReader::new(),
            frame: Frame::new(),
            state: ConnectionState::Disconnected,
            last_error: None,
            client_id: String::new(),
            keep_alive_ms: 0,
            ack_timeout_ms: super::options::DEFAULT_ACK_TIMEOUT_MS,
            session_present: false,
            subscriptions: SubscriptionTable::new(),
            handler: None,
            signal: None,
            next_packet_id: 1,
            last_sent_ms: 0,
            ping_sent_ms: None,
            awaiting_release: Vec::new(),
        }
    }

    /// Attach a signal that ends [`run`](Self::run) with a graceful disconnect.
    pub fn with_disconnect_signal(mut self, signal: &'a DisconnectSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Register the message handler, replacing any previous one.
    pub fn on_message(&mut self, handler: &'a mut dyn MessageHandler) {
        self.handler = Some(handler);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `true` in the `Connected` state.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The error that moved the session to `Failed`, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    /// Client identifier of the current or last connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Keep-alive interval of the current or last connection, in seconds.
    pub fn keep_alive_seconds(&self) -> u16 {
        u16::try_from(self.keep_alive_ms / 1000).unwrap_or(u16::MAX)
    }

    /// The broker resumed a stored session on the last CONNACK.
    pub fn session_present(&self) -> bool {
        self.session_present
    }

    /// Registered filters.
    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    /// Open the transport to `endpoint` and perform the MQTT handshake.
    ///
    /// On success every registered filter has been subscribed again. A new
    /// call while connected first disconnects gracefully.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidClientId`] - empty or too long identifier, nothing sent
    /// * [`Error::Transport`] - the stream could not be opened, or closed or
    ///   failed before CONNACK
    /// * [`Error::ConnectionRefused`] - non-zero CONNACK return code
    /// * [`Error::Timeout`] - no CONNACK within the acknowledgement window
    /// * [`Error::Protocol`] - the broker answered with something else
    ///
    /// All but the first leave the session in `Failed`.
    pub fn connect(&mut self, endpoint: &str, options: &Options<'_>) -> Result<(), Error> {
        if !options.client_id_is_valid() {
            return Err(Error::InvalidClientId);
        }
        let client_id = String::try_from(options.client_id).map_err(|_| Error::InvalidClientId)?;

        if self.is_connected() {
            self.disconnect();
        } else {
            self.close_transport();
        }

        self.client_id = client_id;
        self.keep_alive_ms = u64::from(options.keep_alive_seconds) * 1000;
        self.ack_timeout_ms = options.ack_window_ms();
        self.last_error = None;
        if options.clean_session {
            self.awaiting_release.clear();
        }
        self.transition(ConnectionState::Connecting);

        match self.connector.connect(endpoint) {
            Ok(transport) => self.transport = Some(transport),
            Err(_) => {
                return Err(self.fail(Error::Transport(network::Error::ConnectionRefused)));
            }
        }

        if let Err(e) = self.handshake(options) {
            return Err(self.fail(e));
        }
        info!(
            "connected as {} (session present: {})",
            self.client_id.as_str(),
            self.session_present
        );
        self.transition(ConnectionState::Connected);

        self.resubscribe()
    }

    fn handshake(&mut self, options: &Options<'_>) -> Result<(), Error> {
        packet::encode_connect(options, &mut self.frame)?;
        self.write_frame()?;

        match self.await_ack(Expect::ConnAck)? {
            Packet::ConnAck {
                session_present,
                return_code: 0,
            } => {
                self.session_present = session_present;
                Ok(())
            }
            Packet::ConnAck { return_code, .. } => Err(ConnectReturnCode::from_u8(return_code)
                .map_or(
                    Error::Protocol(ProtocolError::InvalidReturnCode),
                    Error::ConnectionRefused,
                )),
            _ => Err(ProtocolError::UnexpectedPacket.into()),
        }
    }

    /// Restore every registered filter.
    ///
    /// All SUBSCRIBE frames are written before anything else is read, so
    /// messages a resumed session queued behind CONNACK are dispatched only
    /// once every filter is registered again. Filters share one frame unless
    /// they outgrow [`MAX_PACKET_SIZE`].
    fn resubscribe(&mut self) -> Result<(), Error> {
        if self.subscriptions.is_empty() {
            return Ok(());
        }
        let return_codes = match self.request_resubscription() {
            Ok(codes) => codes,
            Err(e) => return Err(self.fail(e)),
        };

        for (index, &code) in return_codes.iter().enumerate().rev() {
            match QoS::from_u8(code) {
                Some(granted) => self.subscriptions.set_granted_at(index, granted),
                None => {
                    let dropped = self.subscriptions.remove_at(index);
                    warn!("broker rejected {} on re-subscribe, dropping it", dropped.filter());
                }
            }
        }
        debug!("re-subscribed {} filters", self.subscriptions.len());
        Ok(())
    }

    /// Returns one SUBACK code per registered filter, in table order.
    fn request_resubscription(&mut self) -> Result<ReturnCodes, Error> {
        // (packet id, filters in that frame)
        let mut batches: Vec<(u16, usize), MAX_SUBSCRIPTIONS> = Vec::new();
        let mut start = 0;
        while start < self.subscriptions.len() {
            let packet_id = self.next_packet_id();
            let count = self.encode_resubscribe_batch(packet_id, start)?;
            self.write_frame()?;
            batches
                .push((packet_id, count))
                .map_err(|_| Error::BufferOverflow)?;
            start += count;
        }

        let mut return_codes = ReturnCodes::new();
        for (packet_id, count) in batches {
            let codes = match self.await_ack(Expect::SubAck(packet_id))? {
                Packet::SubAck { return_codes, .. } if return_codes.len() == count => return_codes,
                _ => return Err(ProtocolError::MalformedPacket.into()),
            };
            return_codes
                .extend_from_slice(&codes)
                .map_err(|_| Error::BufferOverflow)?;
        }
        Ok(return_codes)
    }

    /// Encode the filters from `start` on that fit one frame. Returns how
    /// many were taken.
    fn encode_resubscribe_batch(&mut self, packet_id: u16, start: usize) -> Result<usize, Error> {
        let mut filters: Vec<(&str, QoS), MAX_SUBSCRIPTIONS> = Vec::new();
        for entry in self.subscriptions.iter().skip(start) {
            filters
                .push((entry.filter(), entry.requested()))
                .map_err(|_| Error::BufferOverflow)?;
            if filters.len() > 1 && packet::subscribe_frame_len(&filters) > MAX_PACKET_SIZE {
                filters.pop();
                break;
            }
        }
        packet::encode_subscribe_many(packet_id, &filters, &mut self.frame)?;
        Ok(filters.len())
    }

    /// Subscribe to a topic filter and return the level the broker granted.
    ///
    /// Subscribing again to an active filter replaces its level; the filter
    /// stays a single entry, so messages are still delivered once.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidFilter`] - syntax error, nothing sent
    /// * [`Error::NotConnected`] - the session is not `Connected`
    /// * [`Error::BufferOverflow`] - the subscription table is full
    /// * [`Error::SubscriptionRejected`] - the broker declined this filter;
    ///   the connection stays up
    /// * [`Error::Transport`], [`Error::Timeout`], [`Error::Protocol`] - fatal,
    ///   the session moves to `Failed`
    pub fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<QoS, Error> {
        topic::validate_filter(filter)?;
        self.ensure_connected()?;
        if !self.subscriptions.has_room_for(filter) {
            return Err(Error::BufferOverflow);
        }

        let result = self.request_subscription(filter, qos);
        let granted = self.guard(result)?;
        self.subscriptions.upsert(filter, qos, granted)?;
        Ok(granted)
    }

    fn request_subscription(&mut self, filter: &str, qos: QoS) -> Result<QoS, Error> {
        let packet_id = self.next_packet_id();
        packet::encode_subscribe(packet_id, filter, qos, &mut self.frame)?;
        self.write_frame()?;

        match self.await_ack(Expect::SubAck(packet_id))? {
            Packet::SubAck { return_codes, .. } => match return_codes.as_slice() {
                [code] => match QoS::from_u8(*code) {
                    Some(granted) => {
                        info!("subscribed to {} (QoS {} granted {})", filter, qos, granted);
                        Ok(granted)
                    }
                    None => {
                        warn!("broker rejected filter {}", filter);
                        Err(Error::SubscriptionRejected(*code))
                    }
                },
                _ => Err(ProtocolError::MalformedPacket.into()),
            },
            _ => Err(ProtocolError::UnexpectedPacket.into()),
        }
    }

    /// Remove a subscription.
    ///
    /// Unknown filters are a no-op. While connected the broker is told with
    /// UNSUBSCRIBE; the filter is dropped locally either way, so it is not
    /// restored by a later re-subscription.
    pub fn unsubscribe(&mut self, filter: &str) -> Result<(), Error> {
        if !self.subscriptions.remove(filter) {
            debug!("unsubscribe: {} was not subscribed", filter);
            return Ok(());
        }
        if !self.is_connected() {
            return Ok(());
        }

        let result = self.request_unsubscription(filter);
        self.guard(result)
    }

    fn request_unsubscription(&mut self, filter: &str) -> Result<(), Error> {
        let packet_id = self.next_packet_id();
        packet::encode_unsubscribe(packet_id, filter, &mut self.frame)?;
        self.write_frame()?;
        self.await_ack(Expect::UnsubAck(packet_id))?;
        info!("unsubscribed from {}", filter);
        Ok(())
    }

    /// Publish a message.
    ///
    /// QoS 0 returns once the frame is written, QoS 1 after PUBACK, QoS 2
    /// after the PUBREC / PUBREL / PUBCOMP exchange.
    pub fn publish(
        &mut self,
        topic_name: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        if !topic::is_valid_topic_name(topic_name) {
            return Err(Error::InvalidTopic);
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::BufferOverflow);
        }
        self.ensure_connected()?;

        let result = self.send_publish(topic_name, payload, qos, retain);
        self.guard(result)
    }

    fn send_publish(
        &mut self,
        topic_name: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(self.next_packet_id()),
        };
        packet::encode_publish(topic_name, payload, qos, packet_id, retain, &mut self.frame)?;
        self.write_frame()?;

        match (qos, packet_id) {
            (QoS::AtLeastOnce, Some(id)) => {
                self.await_ack(Expect::PubAck(id))?;
            }
            (QoS::ExactlyOnce, Some(id)) => {
                self.await_ack(Expect::PubRec(id))?;
                packet::encode_ack(packet::PUBREL, id, &mut self.frame)?;
                self.write_frame()?;
                self.await_ack(Expect::PubComp(id))?;
            }
            _ => {}
        }
        trace!("published {} bytes to {}", payload.len(), topic_name);
        Ok(())
    }

    /// Send DISCONNECT if connected, close the transport, and move to
    /// `Disconnected`. Transport errors are ignored.
    pub fn disconnect(&mut self) {
        if self.is_connected() {
            let sent = packet::encode_disconnect(&mut self.frame).and_then(|()| self.write_frame());
            if let Err(e) = sent {
                debug!("DISCONNECT not delivered: {}", e);
            }
        }
        self.close_transport();
        self.transition(ConnectionState::Disconnected);
    }

    /// Drive the session once: send a keep-alive ping if due, then handle at
    /// most one inbound packet.
    ///
    /// Returns after one transport read at most. Any error is fatal and leaves
    /// the session `Failed`.
    pub fn poll(&mut self) -> Result<(), Error> {
        self.ensure_connected()?;
        let result = self.step();
        result.map_err(|e| self.fail(e))
    }

    /// Read loop. Returns `Ok(())` after a disconnect requested through the
    /// attached [`DisconnectSignal`], or the error that failed the session.
    pub fn run(&mut self) -> Result<(), Error> {
        self.ensure_connected()?;
        debug!("read loop started for {}", self.client_id.as_str());
        loop {
            if self.signal.is_some_and(DisconnectSignal::take) {
                info!("disconnect requested");
                self.disconnect();
                return Ok(());
            }
            self.poll()?;
        }
    }

    fn step(&mut self) -> Result<(), Error> {
        self.drive_keep_alive()?;
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        if let Some(packet) = self.reader.poll(transport)? {
            self.handle_packet(packet)?;
        }
        Ok(())
    }

    fn drive_keep_alive(&mut self) -> Result<(), Error> {
        if self.keep_alive_ms == 0 {
            return Ok(());
        }
        let now = self.clock.now_ms();
        match self.ping_sent_ms {
            Some(sent) if now.saturating_sub(sent) >= self.keep_alive_ms * 3 / 2 => {
                warn!("no PINGRESP within {} ms", self.keep_alive_ms * 3 / 2);
                Err(Error::Timeout)
            }
            Some(_) => Ok(()),
            None if now.saturating_sub(self.last_sent_ms) >= self.keep_alive_ms => {
                trace!("sending PINGREQ");
                packet::encode_pingreq(&mut self.frame)?;
                self.write_frame()?;
                self.ping_sent_ms = Some(now);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Wait for a specific acknowledgement, handling other traffic meanwhile.
    fn await_ack(&mut self, expect: Expect) -> Result<Packet, Error> {
        let deadline = self.clock.now_ms().saturating_add(self.ack_timeout_ms);
        loop {
            let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
            if let Some(packet) = self.reader.poll(transport)? {
                if expect.matches(&packet) {
                    return Ok(packet);
                }
                if expect == Expect::ConnAck {
                    return Err(ProtocolError::UnexpectedPacket.into());
                }
                self.handle_packet(packet)?;
            }
            if self.clock.now_ms() >= deadline {
                return Err(Error::Timeout);
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<(), Error> {
        match packet {
            Packet::Publish(publish) => self.handle_publish(publish),
            Packet::PingResp => {
                trace!("PINGRESP");
                self.ping_sent_ms = None;
                Ok(())
            }
            Packet::PubRel(packet_id) => {
                if let Some(index) = self.awaiting_release.iter().position(|&id| id == packet_id) {
                    self.awaiting_release.swap_remove(index);
                }
                packet::encode_ack(packet::PUBCOMP, packet_id, &mut self.frame)?;
                self.write_frame()
            }
            Packet::OversizedPublish { qos, packet_id } => {
                warn!("discarding a PUBLISH larger than the receive buffers");
                match (qos, packet_id) {
                    (QoS::ExactlyOnce, Some(packet_id)) => {
                        packet::encode_ack(packet::PUBREC, packet_id, &mut self.frame)?;
                        self.write_frame()
                    }
                    (QoS::AtLeastOnce, Some(packet_id)) => {
                        packet::encode_ack(packet::PUBACK, packet_id, &mut self.frame)?;
                        self.write_frame()
                    }
                    _ => Ok(()),
                }
            }
            Packet::ConnAck { .. } => Err(ProtocolError::UnexpectedPacket.into()),
            other => {
                debug!("ignoring unsolicited {}", other.name());
                Ok(())
            }
        }
    }

    fn handle_publish(&mut self, publish: Publish) -> Result<(), Error> {
        match (publish.qos, publish.packet_id) {
            (QoS::ExactlyOnce, Some(packet_id)) => {
                if self.awaiting_release.contains(&packet_id) {
                    debug!("dropping redelivered QoS 2 message {}", packet_id);
                } else {
                    self.dispatch(&publish);
                    if self.awaiting_release.is_full() {
                        warn!("too many unreleased QoS 2 messages, forgetting the oldest");
                        self.awaiting_release.remove(0);
                    }
                    self.awaiting_release
                        .push(packet_id)
                        .map_err(|_| Error::BufferOverflow)?;
                }
                packet::encode_ack(packet::PUBREC, packet_id, &mut self.frame)?;
                self.write_frame()
            }
            (QoS::AtLeastOnce, Some(packet_id)) => {
                self.dispatch(&publish);
                packet::encode_ack(packet::PUBACK, packet_id, &mut self.frame)?;
                self.write_frame()
            }
            _ => {
                self.dispatch(&publish);
                Ok(())
            }
        }
    }

    fn dispatch(&mut self, publish: &Publish) {
        let Some(qos) = self.subscriptions.match_qos(&publish.topic) else {
            debug!("no subscription matches {}", publish.topic.as_str());
            return;
        };
        let message = InboundMessage {
            topic: &publish.topic,
            payload: &publish.payload,
            qos,
            retain: publish.retain,
            duplicate: publish.dup,
        };
        match self.handler.as_mut() {
            Some(handler) => handler.on_message(&message),
            None => trace!("no handler registered for {}", message.topic),
        }
    }

    fn write_frame(&mut self) -> Result<(), Error> {
        let transport = self.transport.as_mut().ok_or(Error::NotConnected)?;
        network::write_all(transport, &self.frame)?;
        self.last_sent_ms = self.clock.now_ms();
        Ok(())
    }

    fn next_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = id.checked_add(1).unwrap_or(1);
        id
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.is_connected() && self.transport.is_some() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Fail the session on fatal errors; pass the rest through.
    fn guard<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        result.map_err(|e| if e.is_fatal() { self.fail(e) } else { e })
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!("session failed: {}", error);
        self.close_transport();
        self.last_error = Some(error);
        self.transition(ConnectionState::Failed);
        error
    }

    fn close_transport(&mut self) {
        self.reader.clear();
        self.ping_sent_ms = None;
        if let Some(transport) = self.transport.take() {
            if transport.close().is_err() {
                debug!("transport reported an error on close");
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!("state {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

impl<N: Connect, K: Clock> fmt::Debug for Session<'_, N, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id.as_str())
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .field("subscriptions", &self.subscriptions.len())
            .field("has_handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}
