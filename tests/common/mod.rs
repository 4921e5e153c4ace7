//! Scripted in-memory broker for driving a `Session` without a network.
//!
//! The broker parses every frame the client writes and queues the reply a
//! real broker would send. Reads with nothing queued fail with a timeout and
//! advance the shared manual clock by [`IDLE_TICK_MS`], so keep-alive and
//! acknowledgement deadlines elapse deterministically.

#![allow(dead_code)]

use libmqtt::mqtt::{Clock, Session};
use libmqtt::network::error::Error;
use libmqtt::network::{Close, Connect, Connection, Read, Write};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

/// Simulated time consumed by a read that finds no data.
pub const IDLE_TICK_MS: u64 = 100;

pub const CONNECT: u8 = 0x10;
pub const PUBLISH: u8 = 0x30;
pub const PUBACK: u8 = 0x40;
pub const PUBREC: u8 = 0x50;
pub const PUBREL: u8 = 0x60;
pub const PUBCOMP: u8 = 0x70;
pub const SUBSCRIBE: u8 = 0x80;
pub const UNSUBSCRIBE: u8 = 0xA0;
pub const PINGREQ: u8 = 0xC0;
pub const DISCONNECT: u8 = 0xE0;

#[derive(Debug)]
pub struct Broker {
    /// CONNACK return code.
    pub connack_code: u8,
    pub session_present: bool,
    /// Highest level granted to any subscription.
    pub max_qos: u8,
    /// Filters answered with SUBACK 0x80.
    pub rejected: Vec<String>,
    pub answer_pings: bool,
    /// Send no replies at all.
    pub silent: bool,
    /// Make the connector fail to open a stream.
    pub refuse_open: bool,
    /// Make reads report end of stream.
    pub eof: bool,
    /// Real time slept by idle reads, for tests that run across threads.
    pub idle_delay: Option<Duration>,
    /// Frames queued right behind every CONNACK, like messages a resumed
    /// session held for the client.
    pub after_connack: Vec<Vec<u8>>,

    /// Every frame the client wrote, over all connections.
    pub frames: Vec<Vec<u8>>,
    /// (filter, requested QoS) of every filter in every SUBSCRIBE.
    pub subscribes: Vec<(String, u8)>,
    pub unsubscribes: Vec<String>,
    pub connects: usize,
    pub closes: usize,

    inbox: VecDeque<u8>,
    pending: Vec<u8>,
}

impl Default for Broker {
    fn default() -> Self {
        Self {
            connack_code: 0,
            session_present: false,
            max_qos: 2,
            rejected: Vec::new(),
            answer_pings: true,
            silent: false,
            refuse_open: false,
            eof: false,
            idle_delay: None,
            after_connack: Vec::new(),
            frames: Vec::new(),
            subscribes: Vec::new(),
            unsubscribes: Vec::new(),
            connects: 0,
            closes: 0,
            inbox: VecDeque::new(),
            pending: Vec::new(),
        }
    }
}

impl Broker {
    /// Queue raw bytes for the client to read.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.inbox.extend(bytes);
    }

    /// Upper nibble of every frame the client wrote.
    pub fn sent_types(&self) -> Vec<u8> {
        self.frames.iter().map(|f| f[0] & 0xF0).collect()
    }

    /// Frames of one type the client wrote.
    pub fn sent(&self, kind: u8) -> Vec<Vec<u8>> {
        self.frames
            .iter()
            .filter(|f| f[0] & 0xF0 == kind)
            .cloned()
            .collect()
    }

    pub fn count(&self, kind: u8) -> usize {
        self.sent(kind).len()
    }

    fn open(&mut self) {
        self.inbox.clear();
        self.pending.clear();
    }

    fn receive(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        while let Some((header, total)) = frame_bounds(&self.pending) {
            let frame: Vec<u8> = self.pending.drain(..total).collect();
            self.react(&frame, header);
            self.frames.push(frame);
        }
    }

    fn react(&mut self, frame: &[u8], header: usize) {
        let body = &frame[header..];
        match frame[0] & 0xF0 {
            CONNECT => {
                self.connects += 1;
                let reply = [0x20, 0x02, u8::from(self.session_present), self.connack_code];
                self.reply(&reply);
                for queued in self.after_connack.clone() {
                    self.reply(&queued);
                }
            }
            SUBSCRIBE => {
                let mut reply = vec![0x90, 0x02, body[0], body[1]];
                let mut rest = &body[2..];
                while !rest.is_empty() {
                    let (filter, tail) = read_string(rest);
                    let requested = tail[0];
                    rest = &tail[1..];
                    let code = if self.rejected.contains(&filter) {
                        0x80
                    } else {
                        requested.min(self.max_qos)
                    };
                    self.subscribes.push((filter, requested));
                    reply.push(code);
                    reply[1] += 1;
                }
                self.reply(&reply);
            }
            UNSUBSCRIBE => {
                let (filter, _) = read_string(&body[2..]);
                self.unsubscribes.push(filter);
                self.reply(&[0xB0, 0x02, body[0], body[1]]);
            }
            PUBLISH => {
                let qos = (frame[0] >> 1) & 0x03;
                if qos > 0 {
                    let (_, rest) = read_string(body);
                    let reply = if qos == 1 { 0x40 } else { 0x50 };
                    self.reply(&[reply, 0x02, rest[0], rest[1]]);
                }
            }
            PUBREL => self.reply(&[0x70, 0x02, body[0], body[1]]),
            PINGREQ if self.answer_pings => self.reply(&[0xD0, 0x00]),
            _ => {}
        }
    }

    fn reply(&mut self, bytes: &[u8]) {
        if !self.silent {
            self.inbox.extend(bytes);
        }
    }
}

/// (header length, total length) of the first complete frame in `buf`.
fn frame_bounds(buf: &[u8]) -> Option<(usize, usize)> {
    let mut len = 0usize;
    let mut shift = 0;
    for (i, byte) in buf.iter().enumerate().skip(1).take(4) {
        len |= usize::from(byte & 0x7F) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            let header = i + 1;
            return (buf.len() >= header + len).then_some((header, header + len));
        }
    }
    None
}

fn read_string(buf: &[u8]) -> (String, &[u8]) {
    let len = usize::from(u16::from_be_bytes([buf[0], buf[1]]));
    let text = String::from_utf8(buf[2..2 + len].to_vec()).unwrap();
    (text, &buf[2 + len..])
}

fn remaining_length(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

/// A broker-to-client PUBLISH frame.
pub fn publish_frame(topic: &str, payload: &[u8], qos: u8, packet_id: u16) -> Vec<u8> {
    publish_frame_with_flags(topic, payload, qos, packet_id, false, false)
}

pub fn publish_frame_with_flags(
    topic: &str,
    payload: &[u8],
    qos: u8,
    packet_id: u16,
    retain: bool,
    dup: bool,
) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    body.extend_from_slice(topic.as_bytes());
    if qos > 0 {
        body.extend_from_slice(&packet_id.to_be_bytes());
    }
    body.extend_from_slice(payload);

    let mut frame = vec![0x30 | (u8::from(dup) << 3) | (qos << 1) | u8::from(retain)];
    remaining_length(&mut frame, body.len());
    frame.extend(body);
    frame
}

/// A broker-to-client PUBREL frame.
pub fn pubrel_frame(packet_id: u16) -> Vec<u8> {
    let id = packet_id.to_be_bytes();
    vec![0x62, 0x02, id[0], id[1]]
}

#[derive(Debug)]
pub struct MockConnection {
    broker: Rc<RefCell<Broker>>,
    clock: Rc<Cell<u64>>,
}

impl Read for MockConnection {
    type Error = Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut broker = self.broker.borrow_mut();
        if broker.eof {
            return Ok(0);
        }
        if broker.inbox.is_empty() {
            if let Some(delay) = broker.idle_delay {
                std::thread::sleep(delay);
            }
            self.clock.set(self.clock.get() + IDLE_TICK_MS);
            return Err(Error::Timeout);
        }
        let len = buf.len().min(broker.inbox.len());
        for (slot, byte) in buf.iter_mut().zip(broker.inbox.drain(..len)) {
            *slot = byte;
        }
        Ok(len)
    }
}

impl Write for MockConnection {
    type Error = Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.broker.borrow_mut().receive(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Close for MockConnection {
    type Error = Error;

    fn close(self) -> Result<(), Self::Error> {
        self.broker.borrow_mut().closes += 1;
        Ok(())
    }
}

impl Connection for MockConnection {}

#[derive(Debug)]
pub struct MockConnector {
    broker: Rc<RefCell<Broker>>,
    clock: Rc<Cell<u64>>,
}

impl Connect for MockConnector {
    type Connection = MockConnection;
    type Error = Error;

    fn connect(&mut self, _remote: &str) -> Result<Self::Connection, Self::Error> {
        let mut broker = self.broker.borrow_mut();
        if broker.refuse_open {
            return Err(Error::ConnectionRefused);
        }
        broker.open();
        Ok(MockConnection {
            broker: Rc::clone(&self.broker),
            clock: Rc::clone(&self.clock),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MockClock(Rc<Cell<u64>>);

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

/// Broker state and clock shared with the sessions built from it.
#[derive(Debug, Default)]
pub struct Harness {
    pub broker: Rc<RefCell<Broker>>,
    pub clock: Rc<Cell<u64>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session<'a>(&self) -> Session<'a, MockConnector, MockClock> {
        let connector = MockConnector {
            broker: Rc::clone(&self.broker),
            clock: Rc::clone(&self.clock),
        };
        Session::new(connector, MockClock(Rc::clone(&self.clock)))
    }

    pub fn now(&self) -> u64 {
        self.clock.get()
    }

    pub fn advance(&self, ms: u64) {
        self.clock.set(self.clock.get() + ms);
    }
}
