//! Handshake state machine, ping/RTT estimation, MTU expansion, and channel dispatch for a single
//! remote endpoint (spec §4.E, §3 "Connection").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use collections::map::Key;

use crate::bits::BitBuffer;
use crate::channel::{Channel, PendingFrame, SendOutcome};
use crate::config::{Config, UnreliableSizeBehaviour};
use crate::fragment::GroupAllocator;
use crate::frame::FRAME_HEADER_LEN;
use crate::message::{get_delivery_method, DeliveryMethod, MessageType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
	None,
	InitiatedConnect,
	ReceivedInitiation,
	RespondedAwaitingApproval,
	RespondedConnect,
	Connected,
	Disconnecting,
	Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
	WrongAppIdentifier,
	HandshakeValidationFailed,
	Timeout,
}

/// Total number of distinct channel slots across all delivery methods (spec §4.D table).
const TOTAL_CHANNELS: usize = 1 + 32 + 1 + 32 + 32;

fn channel_slot(method: DeliveryMethod, channel: u8) -> usize {
	match method {
		DeliveryMethod::Unreliable => 0,
		DeliveryMethod::UnreliableSequenced => 1 + channel as usize,
		DeliveryMethod::ReliableUnordered => 33,
		DeliveryMethod::ReliableSequenced => 34 + channel as usize,
		DeliveryMethod::ReliableOrdered | DeliveryMethod::Stream => 66 + channel as usize,
	}
}

/// Encode queued `(base_type, sequence)` pairs into an `Acknowledge` library message payload
/// (spec §4.D "Ack coalescing").
pub fn encode_acks(acks: &[(u8, u16)]) -> Vec<u8> {
	let mut buf = BitBuffer::new();
	buf.write_varuint64(acks.len() as u64);
	for &(base_type, seq) in acks {
		buf.write_u8(base_type);
		buf.write_uint_bits(seq as u64, 16);
	}
	buf.into_bytes()
}

pub fn decode_acks(payload: &[u8]) -> Vec<(u8, u16)> {
	let mut buf = BitBuffer::from_bytes(payload.to_vec(), payload.len() * 8);
	let Ok(count) = buf.read_varuint64() else { return Vec::new() };

	let mut acks = Vec::with_capacity(count as usize);
	for _ in 0..count {
		let Ok(base_type) = buf.read_u8() else { break };
		let Ok(seq) = buf.read_uint_bits(16) else { break };
		acks.push((base_type, seq as u16));
	}
	acks
}

fn make_channels() -> Vec<Channel> {
	let mut channels = Vec::with_capacity(TOTAL_CHANNELS);
	channels.push(Channel::unreliable());
	for _ in 0..32 {
		channels.push(Channel::unreliable_sequenced());
	}
	channels.push(Channel::reliable_unordered());
	for _ in 0..32 {
		channels.push(Channel::reliable_sequenced());
	}
	for _ in 0..32 {
		channels.push(Channel::reliable_ordered());
	}
	channels
}

/// An event the connection wants the peer scheduler to act on — send a handshake/control message,
/// surface a status change to user code, or actually transmit queued channel frames.
pub enum ConnectionEvent {
	SendControl { message_type: u8, payload: Vec<u8> },
	StatusChanged { status: Status, reason: String },
	Frame(PendingFrame),
	/// Entered `RespondedAwaitingApproval`; the embedder must call [`Connection::approve`] or
	/// [`Connection::deny`] to advance the handshake (spec §4.E).
	ApprovalRequested { hail: Vec<u8> },
}

/// A single outstanding ping awaiting its pong.
struct PendingPing {
	sent_at: Instant,
}

pub struct Connection {
	pub remote: SocketAddr,
	pub status: Status,
	pub current_mtu: usize,
	pub remote_time_offset: i64,
	pub average_rtt: Duration,
	created_at: Instant,

	send_channels: Vec<Channel>,
	receive_channels: Vec<Channel>,
	queued_outbound_acks: Vec<(u8, u16)>,

	pub remote_unique_identifier: i64,
	local_hail: Vec<u8>,
	remote_hail: Vec<u8>,

	connect_requested: bool,
	disconnect_requested: bool,
	last_handshake_send_time: Option<Instant>,
	handshake_attempts: u32,

	next_ping_id: u8,
	pings: HashMap<u8, PendingPing>,
	last_ping_sent: Option<Instant>,
	last_packet_received: Instant,

	mtu_ceiling: usize,
	mtu_fail_attempts: u32,
	last_mtu_probe: Option<Instant>,
	pending_probe_size: Option<usize>,

	group_allocator: GroupAllocator,
}

impl Connection {
	fn new(remote: SocketAddr, config: &Config, now: Instant) -> Self {
		Self {
			remote,
			status: Status::None,
			current_mtu: config.maximum_transmission_unit as usize,
			remote_time_offset: 0,
			average_rtt: Duration::from_millis(200),
			created_at: now,
			send_channels: make_channels(),
			receive_channels: make_channels(),
			queued_outbound_acks: Vec::new(),
			remote_unique_identifier: 0,
			local_hail: Vec::new(),
			remote_hail: Vec::new(),
			connect_requested: false,
			disconnect_requested: false,
			last_handshake_send_time: None,
			handshake_attempts: 0,
			next_ping_id: 0,
			pings: HashMap::new(),
			last_ping_sent: None,
			last_packet_received: now,
			mtu_ceiling: config.maximum_transmission_unit as usize,
			mtu_fail_attempts: 0,
			last_mtu_probe: None,
			pending_probe_size: None,
			group_allocator: GroupAllocator::default(),
		}
	}

	/// Begin an outbound connection attempt.
	pub fn connect(remote: SocketAddr, config: &Config, local_unique_id: i64, hail: Vec<u8>, now: Instant) -> Self {
		let mut conn = Self::new(remote, config, now);
		conn.remote_unique_identifier = local_unique_id;
		conn.local_hail = hail;
		conn.status = Status::InitiatedConnect;
		conn.connect_requested = true;
		conn
	}

	/// Begin tracking an inbound connection attempt (the handshakes table entry).
	pub fn accept(remote: SocketAddr, config: &Config, now: Instant) -> Self {
		let mut conn = Self::new(remote, config, now);
		conn.status = Status::ReceivedInitiation;
		conn
	}

	pub fn resend_delay(&self, config: &Config) -> Duration {
		let jitter = Duration::from_millis(20);
		(self.average_rtt * 2 + jitter).max(config.min_resend_delay)
	}

	pub fn is_connected(&self) -> bool {
		self.status == Status::Connected
	}

	pub fn is_finished(&self) -> bool {
		self.status == Status::Disconnected
	}

	fn touch(&mut self, now: Instant) {
		self.last_packet_received = now;
	}

	// ---- handshake payload encode/decode ----

	fn encode_hello(&self, app_identifier: &str, local_unique_id: i64, now_ticks: Duration, hail: &[u8]) -> Vec<u8> {
		let mut buf = BitBuffer::new();
		buf.write_str(app_identifier);
		buf.write_int_bits(local_unique_id, 64);
		buf.write_timespan(now_ticks);
		for &b in hail {
			buf.write_u8(b);
		}
		buf.into_bytes()
	}

	fn decode_hello(bytes: &[u8]) -> crate::bits::Result<(String, i64, Duration, Vec<u8>)> {
		let mut buf = BitBuffer::from_bytes(bytes.to_vec(), bytes.len() * 8);
		let app_identifier = buf.read_string()?;
		let unique_id = buf.read_int_bits(64)?;
		let now = buf.read_timespan()?;

		let mut hail = Vec::new();
		while buf.remaining_bits() >= 8 {
			hail.push(buf.read_u8()?);
		}

		Ok((app_identifier, unique_id, now, hail))
	}

	/// Enqueue a message for delivery on the channel matching `message_type`.
	pub fn enqueue(&mut self, message_type: u8, message: crate::message::OutgoingMessage, config: &Config) -> SendOutcome {
		if !self.is_connected() {
			return SendOutcome::FailedNotConnected;
		}

		let Some((method, channel)) = get_delivery_method(message_type) else {
			warn!("Refusing to enqueue message with unknown type {message_type}");
			return SendOutcome::Dropped;
		};

		let slot = channel_slot(method, channel);
		let budget = self.current_mtu.saturating_sub(FRAME_HEADER_LEN);

		if message.buffer.byte_len() <= budget {
			return self.send_channels[slot].enqueue(message);
		}

		let is_unreliable = matches!(method, DeliveryMethod::Unreliable | DeliveryMethod::UnreliableSequenced);

		if is_unreliable {
			match config.unreliable_size_behaviour {
				UnreliableSizeBehaviour::DropAboveMtu => return SendOutcome::Dropped,
				UnreliableSizeBehaviour::IgnoreMtu => return self.send_channels[slot].enqueue(message),
				UnreliableSizeBehaviour::NormalFragmentation => {}
			}
		}

		let group = self.group_allocator.next_group();
		let mut outcome = SendOutcome::Dropped;
		for fragment in crate::fragment::split(message, self.current_mtu, group) {
			outcome = self.send_channels[slot].enqueue(fragment);
		}
		outcome
	}

	/// Drive handshake retransmission, ping cadence, MTU probing and channel ticks. Pushes events
	/// the peer scheduler must act on (sending datagrams, surfacing status changes).
	pub fn tick(&mut self, now: Instant, config: &Config, out: &mut Vec<ConnectionEvent>) {
		match self.status {
			Status::InitiatedConnect => self.tick_handshake_resend(now, config, out, MessageType::CONNECT),
			Status::RespondedConnect => self.tick_handshake_resend(now, config, out, MessageType::CONNECT_RESPONSE),
			Status::Connected => self.tick_connected(now, config, out),
			Status::Disconnecting => {
				self.status = Status::Disconnected;
				out.push(ConnectionEvent::StatusChanged { status: Status::Disconnected, reason: "Disconnected".into() });
			}
			_ => {}
		}
	}

	fn tick_handshake_resend(&mut self, now: Instant, config: &Config, out: &mut Vec<ConnectionEvent>, message_type: u8) {
		let due = match self.last_handshake_send_time {
			None => true,
			Some(t) => now.duration_since(t) >= config.resend_handshake_interval,
		};

		if !due {
			return;
		}

		if self.handshake_attempts >= config.maximum_handshake_attempts {
			self.status = Status::Disconnected;
			out.push(ConnectionEvent::StatusChanged {
				status: Status::Disconnected,
				reason: "Failed to establish connection".into(),
			});
			return;
		}

		self.handshake_attempts += 1;
		self.last_handshake_send_time = Some(now);

		let local_ticks = now.duration_since(self.created_at);
		let payload = self.encode_hello(&config.app_identifier, self.remote_unique_identifier, local_ticks, &self.local_hail);
		out.push(ConnectionEvent::SendControl { message_type, payload });
	}

	fn tick_connected(&mut self, now: Instant, config: &Config, out: &mut Vec<ConnectionEvent>) {
		if now.duration_since(self.last_packet_received) > config.connection_timeout {
			self.status = Status::Disconnected;
			out.push(ConnectionEvent::StatusChanged { status: Status::Disconnected, reason: "Timeout".into() });
			return;
		}

		let ping_due = self.last_ping_sent.map_or(true, |t| now.duration_since(t) >= config.ping_interval);
		if ping_due {
			self.last_ping_sent = Some(now);
			let id = self.next_ping_id;
			self.next_ping_id = self.next_ping_id.wrapping_add(1);
			self.pings.insert(id, PendingPing { sent_at: now });
			out.push(ConnectionEvent::SendControl { message_type: MessageType::PING, payload: vec![id] });
		}

		if config.auto_expand_mtu && self.current_mtu < self.mtu_ceiling && self.mtu_fail_attempts < config.expand_mtu_fail_attempts {
			let probe_due = self.last_mtu_probe.map_or(true, |t| now.duration_since(t) >= config.expand_mtu_frequency);
			if probe_due {
				if self.pending_probe_size.is_some() {
					// Previous probe went unacknowledged: treated as an ICMP MessageSize failure.
					self.mtu_fail_attempts += 1;
				}

				self.last_mtu_probe = Some(now);
				let probe_size = (self.current_mtu + config.expand_mtu_step).min(self.mtu_ceiling);
				self.pending_probe_size = Some(probe_size);
				out.push(ConnectionEvent::SendControl { message_type: MessageType::MTU_PROBE, payload: vec![0u8; probe_size] });
			}
		}

		let resend_delay = self.resend_delay(config);

		if !self.queued_outbound_acks.is_empty() {
			let acks = std::mem::take(&mut self.queued_outbound_acks);
			out.push(ConnectionEvent::SendControl { message_type: MessageType::ACKNOWLEDGE, payload: encode_acks(&acks) });
		}

		for channel in &mut self.send_channels {
			let mut frames = Vec::new();
			channel.tick(now, resend_delay, &mut frames);
			out.extend(frames.into_iter().map(ConnectionEvent::Frame));
		}
	}

	/// Handle an inbound handshake/control message. Returns `Err` with the disconnect reason on
	/// validation failure (spec §9: exceptions during handshake parsing map to validation failure).
	pub fn receive_handshake(
		&mut self,
		message_type: u8,
		payload: &[u8],
		config: &Config,
		now: Instant,
		out: &mut Vec<ConnectionEvent>,
	) -> Result<(), ConnectionError> {
		self.touch(now);

		match message_type {
			MessageType::CONNECT if matches!(self.status, Status::ReceivedInitiation) => {
				let (app_id, unique_id, _remote_now, hail) = Self::decode_hello(payload).map_err(|_| ConnectionError::HandshakeValidationFailed)?;

				if app_id != config.app_identifier {
					return Err(ConnectionError::WrongAppIdentifier);
				}

				self.remote_unique_identifier = unique_id;
				self.remote_hail = hail;

				self.status = if config.accept_incoming_connections {
					Status::RespondedConnect
				} else {
					Status::RespondedAwaitingApproval
				};

				if self.status == Status::RespondedAwaitingApproval {
					out.push(ConnectionEvent::ApprovalRequested { hail: self.remote_hail.clone() });
				}

				Ok(())
			}
			MessageType::CONNECT_RESPONSE if matches!(self.status, Status::InitiatedConnect) => {
				let (app_id, unique_id, _remote_now, hail) = Self::decode_hello(payload).map_err(|_| ConnectionError::HandshakeValidationFailed)?;

				if app_id != config.app_identifier {
					return Err(ConnectionError::WrongAppIdentifier);
				}

				self.remote_unique_identifier = unique_id;
				self.remote_hail = hail;

				let established = BitBuffer::new().into_bytes();
				out.push(ConnectionEvent::SendControl { message_type: MessageType::CONNECTION_ESTABLISHED, payload: established });

				self.status = Status::Connected;
				out.push(ConnectionEvent::StatusChanged { status: Status::Connected, reason: String::new() });

				Ok(())
			}
			MessageType::CONNECTION_ESTABLISHED if matches!(self.status, Status::RespondedConnect) => {
				let mut buf = BitBuffer::from_bytes(payload.to_vec(), payload.len() * 8);
				let remote_ticks = buf.read_timespan().unwrap_or_default();
				let local_ticks = now.duration_since(self.created_at);
				self.remote_time_offset = local_ticks.as_nanos() as i64 - remote_ticks.as_nanos() as i64;

				self.status = Status::Connected;
				out.push(ConnectionEvent::StatusChanged { status: Status::Connected, reason: String::new() });

				Ok(())
			}
			MessageType::PING => {
				let id = payload.first().copied().unwrap_or(0);
				let local_nanos = now.duration_since(self.created_at).as_nanos() as u64;
				let mut pong = Vec::with_capacity(9);
				pong.push(id);
				pong.extend_from_slice(&local_nanos.to_le_bytes());
				out.push(ConnectionEvent::SendControl { message_type: MessageType::PONG, payload: pong });
				Ok(())
			}
			MessageType::PONG => {
				let id = payload.first().copied().unwrap_or(0);

				if let Some(ping) = self.pings.remove(&id) {
					let sample = now.duration_since(ping.sent_at);
					self.average_rtt = self.average_rtt.mul_f64(0.7) + sample.mul_f64(0.3);

					if payload.len() >= 9 {
						let mut remote_nanos = [0u8; 8];
						remote_nanos.copy_from_slice(&payload[1..9]);
						let remote_now = u64::from_le_bytes(remote_nanos) as i64;
						let local_nanos = now.duration_since(self.created_at).as_nanos() as i64;
						self.remote_time_offset = remote_now + sample.as_nanos() as i64 / 2 - local_nanos;
					}
				}

				Ok(())
			}
			MessageType::MTU_PROBE => {
				let mut ack = BitBuffer::new();
				ack.write_varuint64(payload.len() as u64);
				out.push(ConnectionEvent::SendControl { message_type: MessageType::MTU_PROBE_ACK, payload: ack.into_bytes() });
				Ok(())
			}
			MessageType::MTU_PROBE_ACK => {
				let mut buf = BitBuffer::from_bytes(payload.to_vec(), payload.len() * 8);
				let acked_size = buf.read_varuint64().unwrap_or(0) as usize;

				if self.pending_probe_size == Some(acked_size) {
					self.current_mtu = acked_size.max(self.current_mtu);
					self.pending_probe_size = None;
					self.mtu_fail_attempts = 0;
				}

				Ok(())
			}
			MessageType::ACKNOWLEDGE => {
				for (base_type, seq) in decode_acks(payload) {
					self.receive_ack(base_type, seq);
				}
				Ok(())
			}
			MessageType::DISCONNECT => {
				let mut buf = BitBuffer::from_bytes(payload.to_vec(), payload.len() * 8);
				let reason = buf.read_string().unwrap_or_default();
				debug!("Connection to {} disconnected by peer: {reason}", self.remote);
				self.status = Status::Disconnected;
				out.push(ConnectionEvent::StatusChanged { status: Status::Disconnected, reason });
				Ok(())
			}
			_ => {
				trace!("Ignoring handshake message type {message_type} in state {:?}", self.status);
				Ok(())
			}
		}
	}

	/// Handle an inbound, already-framed data message: queue its ack, then route it to the
	/// matching receiver channel (spec §4.D "every received message queues an ack").
	pub fn receive_data(
		&mut self,
		message_type: u8,
		seq: u16,
		message: crate::message::IncomingMessage,
		released: &mut std::collections::VecDeque<crate::message::IncomingMessage>,
		now: Instant,
	) {
		self.touch(now);

		let Some((method, channel)) = get_delivery_method(message_type) else {
			warn!("Dropping data message with unroutable type {message_type}");
			return;
		};

		let base_type = crate::message::channel_base_type(method, channel);
		self.queued_outbound_acks.push((base_type, seq));

		self.receive_channels[channel_slot(method, channel)].receive(seq, message, released);
	}

	pub fn receive_ack(&mut self, message_type: u8, seq: u16) {
		let Some((method, channel)) = get_delivery_method(message_type) else { return };
		self.send_channels[channel_slot(method, channel)].on_ack(seq);
	}

	/// Accept a connection held at `RespondedAwaitingApproval` (spec §4.E `Approve()`). The
	/// `CONNECT_RESPONSE` handshake message follows on the next tick, same as the
	/// `accept_incoming_connections` auto-accept path.
	pub fn approve(&mut self) {
		if self.status != Status::RespondedAwaitingApproval {
			trace!("Ignoring Approve() for {} in state {:?}", self.remote, self.status);
			return;
		}
		self.status = Status::RespondedConnect;
	}

	/// Reject a connection held at `RespondedAwaitingApproval` (spec §4.E `Deny()`).
	pub fn deny(&mut self, reason: String, out: &mut Vec<ConnectionEvent>) {
		if self.status != Status::RespondedAwaitingApproval {
			trace!("Ignoring Deny() for {} in state {:?}", self.remote, self.status);
			return;
		}
		self.request_disconnect(reason, out);
	}

	pub fn request_disconnect(&mut self, reason: String, out: &mut Vec<ConnectionEvent>) {
		self.disconnect_requested = true;

		let mut buf = BitBuffer::new();
		buf.write_str(&reason);
		out.push(ConnectionEvent::SendControl { message_type: MessageType::DISCONNECT, payload: buf.into_bytes() });

		self.status = Status::Disconnecting;
	}
}

impl Key for Connection {
	type Type = SocketAddr;

	fn key(&self) -> &SocketAddr {
		&self.remote
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn handshake_app_identifier_mismatch_s5() {
		let mut config = Config::builder("app/2".into()).build().unwrap();
		config.accept_incoming_connections = true;

		let now = Instant::now();
		let mut server = Connection::accept("127.0.0.1:1".parse().unwrap(), &config, now);

		let payload = server.encode_hello("app/1", 1, Duration::ZERO, &[]);
		let mut out = Vec::new();
		let result = server.receive_handshake(MessageType::CONNECT, &payload, &config, now, &mut out);

		assert_eq!(result, Err(ConnectionError::WrongAppIdentifier));
	}

	#[test]
	fn ack_coalescing_round_trip() {
		let acks = vec![(20u8, 5u16), (21, 1023), (54, 0)];
		let payload = encode_acks(&acks);
		assert_eq!(decode_acks(&payload), acks);
	}

	#[test]
	fn connect_with_approval_disabled_parks_then_approve_advances_s5() {
		let config = Config::builder("app/1".into()).accept_incoming_connections(false).build().unwrap();
		let now = Instant::now();

		let mut server = Connection::accept("127.0.0.1:1".parse().unwrap(), &config, now);
		let hello = server.encode_hello("app/1", 42, Duration::ZERO, &[9, 9]);

		let mut out = Vec::new();
		server.receive_handshake(MessageType::CONNECT, &hello, &config, now, &mut out).unwrap();

		assert_eq!(server.status, Status::RespondedAwaitingApproval);
		assert!(matches!(out.as_slice(), [ConnectionEvent::ApprovalRequested { hail }] if hail == &[9, 9]));

		let mut out = Vec::new();
		server.approve();
		assert_eq!(server.status, Status::RespondedConnect);
		assert!(out.is_empty());
	}

	#[test]
	fn deny_during_approval_disconnects_s5() {
		let config = Config::builder("app/1".into()).accept_incoming_connections(false).build().unwrap();
		let now = Instant::now();

		let mut server = Connection::accept("127.0.0.1:1".parse().unwrap(), &config, now);
		let hello = server.encode_hello("app/1", 42, Duration::ZERO, &[]);

		let mut out = Vec::new();
		server.receive_handshake(MessageType::CONNECT, &hello, &config, now, &mut out).unwrap();

		let mut out = Vec::new();
		server.deny("Not on the list".into(), &mut out);

		assert_eq!(server.status, Status::Disconnecting);
		assert!(out.iter().any(|e| matches!(e, ConnectionEvent::SendControl { message_type, .. } if *message_type == MessageType::DISCONNECT)));
	}

	#[test]
	fn handshake_completes_on_matching_identifier() {
		let config = Config::builder("app/1".into()).build().unwrap();
		let now = Instant::now();

		let mut server = Connection::accept("127.0.0.1:1".parse().unwrap(), &config, now);
		let hello = server.encode_hello("app/1", 42, Duration::ZERO, &[]);

		let mut out = Vec::new();
		server.receive_handshake(MessageType::CONNECT, &hello, &config, now, &mut out).unwrap();
		assert_eq!(server.status, Status::RespondedConnect);
	}
}
