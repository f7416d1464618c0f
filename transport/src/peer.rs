//! The network thread: socket I/O loop, packet parse/assemble, connection table, message pools
//! (spec §4.F, §4.G).
//!
//! `runtime::Io<T>` only wraps a single already-`connect()`-ed socket (one peer per fd); this
//! scheduler instead owns a raw non-blocking [`UdpSocket`] directly and drives its own `recv_from`/
//! `send_to` loop from a self-rescheduling [`stakker`] timer, the way `Timers::reset_keepalive`
//! reschedules itself in `wireguard::tunnel::timers`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use collections::map::Map;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, trace, warn};
use rand::Rng;
use stakker::{Cx, CX};
use utils::error::Ext;

use crate::bits::BitBuffer;
use crate::config::Config;
use crate::connection::{Connection, ConnectionError, ConnectionEvent, Status};
use crate::crypto::{self, Cipher, NullCipher};
use crate::discovery;
use crate::fragment::Reassembler;
use crate::frame::{self, Frame};
use crate::message::{self, FragmentInfo, IncomingKind, IncomingMessage, MessagePool, MessageType, OutgoingMessage};

/// Compile-time ceiling on simultaneously tracked connections; `N` must be a power of two for
/// [`collections::map::Map`]'s open-addressed storage. `config.maximum_connections` enforces the
/// (lower) runtime soft cap.
const CONNECTION_TABLE_CAPACITY: usize = 1024;

/// Heartbeat throttle (spec §4.F step 1): rate per second is
/// `min(MAX_HEARTBEAT_RATE_PER_SEC, HEARTBEAT_RATE_CEILING - num_connections)`.
const MAX_HEARTBEAT_RATE_PER_SEC: u64 = 250;
const HEARTBEAT_RATE_CEILING: u64 = 1250;
const RECV_BUFFER_LEN: usize = 8192;

/// A request handed from a user thread into the peer thread (spec §5 "user threads may mutate
/// only the lock-free outbound queues").
pub enum Command {
	Connect { remote: SocketAddr, hail: Vec<u8> },
	Send { remote: SocketAddr, message_type: u8, payload: Vec<u8> },
	SendUnconnected { remote: SocketAddr, message_type: u8, payload: Vec<u8> },
	Disconnect { remote: SocketAddr, reason: String },
	/// Accept a connection parked at `RespondedAwaitingApproval` (spec §4.E `Approve()`).
	Approve { remote: SocketAddr },
	/// Reject a connection parked at `RespondedAwaitingApproval` (spec §4.E `Deny()`).
	Deny { remote: SocketAddr, reason: String },
	Shutdown { reason: String },
}

/// Build the cross-thread command channel; the `Sender` half is handed to [`PeerHandle`], the
/// `Receiver` half to [`Peer::init`].
#[must_use]
pub fn command_channel() -> (Sender<Command>, Receiver<Command>) {
	crossbeam_channel::unbounded()
}

/// Build the cross-thread inbound-message channel; the `Receiver` half is handed to
/// [`PeerHandle`], the `Sender` half to [`Peer::init`].
#[must_use]
pub fn inbound_channel() -> (Sender<IncomingMessage>, Receiver<IncomingMessage>) {
	crossbeam_channel::unbounded()
}

/// The thread-safe view of a running [`Peer`] held by user threads.
#[derive(Clone)]
pub struct PeerHandle {
	commands: Sender<Command>,
	inbound: Receiver<IncomingMessage>,
}

impl PeerHandle {
	#[must_use]
	pub fn new(commands: Sender<Command>, inbound: Receiver<IncomingMessage>) -> Self {
		Self { commands, inbound }
	}

	pub fn connect(&self, remote: SocketAddr, hail: Vec<u8>) {
		let _ = self.commands.send(Command::Connect { remote, hail });
	}

	pub fn send(&self, remote: SocketAddr, message_type: u8, payload: Vec<u8>) {
		let _ = self.commands.send(Command::Send { remote, message_type, payload });
	}

	pub fn send_unconnected(&self, remote: SocketAddr, message_type: u8, payload: Vec<u8>) {
		let _ = self.commands.send(Command::SendUnconnected { remote, message_type, payload });
	}

	pub fn disconnect(&self, remote: SocketAddr, reason: impl Into<String>) {
		let _ = self.commands.send(Command::Disconnect { remote, reason: reason.into() });
	}

	/// Accept a connection currently awaiting approval (spec §4.E `Approve()`).
	pub fn approve(&self, remote: SocketAddr) {
		let _ = self.commands.send(Command::Approve { remote });
	}

	/// Reject a connection currently awaiting approval (spec §4.E `Deny()`).
	pub fn deny(&self, remote: SocketAddr, reason: impl Into<String>) {
		let _ = self.commands.send(Command::Deny { remote, reason: reason.into() });
	}

	pub fn shutdown(&self, reason: impl Into<String>) {
		let _ = self.commands.send(Command::Shutdown { reason: reason.into() });
	}

	/// Non-blocking read of the next released inbound message, if any are queued.
	pub fn try_recv(&self) -> Option<IncomingMessage> {
		self.inbound.try_recv().ok()
	}
}

/// A datagram delayed by the `min_latency`/`random_latency` simulation knobs (spec §6 "Simulation
/// knobs").
struct DelayedSend {
	deadline: Instant,
	remote: SocketAddr,
	datagram: Vec<u8>,
}

pub struct Peer {
	socket: UdpSocket,
	config: Config,
	local_unique_id: i64,

	connections: Map<Connection, CONNECTION_TABLE_CAPACITY>,
	reassembler: Reassembler,
	cipher: Box<dyn Cipher>,

	commands: Receiver<Command>,
	inbound: Sender<IncomingMessage>,
	pool: MessagePool,

	delayed: Vec<DelayedSend>,
	recv_buf: Vec<u8>,

	shutting_down: Option<String>,
}

impl Peer {
	pub fn init(cx: CX![], config: Config, commands: Receiver<Command>, inbound: Sender<IncomingMessage>) -> Option<Self> {
		let bind_addr = config.local_address.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.port));

		let socket = UdpSocket::bind(bind_addr).ok_or(|err| log::error!("Failed to bind UDP socket on {bind_addr}: {err}"))?;
		socket.set_nonblocking(true).ok_or(|err| log::error!("Failed to set socket non-blocking: {err}"))?;

		let pool = MessagePool::new(config.use_message_recycling);
		let reassembler = Reassembler::new(config.connection_timeout);
		let local_unique_id = rand::thread_rng().gen();

		let mut peer = Self {
			socket,
			local_unique_id,
			connections: Map::default(),
			reassembler,
			cipher: Box::new(NullCipher),
			commands,
			inbound,
			pool,
			delayed: Vec::new(),
			recv_buf: vec![0u8; RECV_BUFFER_LEN],
			config,
			shutting_down: None,
		};

		peer.schedule_tick(cx);
		Some(peer)
	}

	/// Install a non-default cipher for the encryption hook (spec §4.H); replaces the no-op default.
	pub fn set_cipher(&mut self, cipher: Box<dyn Cipher>) {
		self.cipher = cipher;
	}

	/// Throttle the heartbeat rate down as the connection table fills (spec §4.F step 1).
	fn heartbeat_interval(&self) -> Duration {
		let num_connections = self.connections.len() as u64;
		let rate = MAX_HEARTBEAT_RATE_PER_SEC.min(HEARTBEAT_RATE_CEILING.saturating_sub(num_connections)).max(1);
		Duration::from_millis(1000 / rate)
	}

	fn schedule_tick(&mut self, cx: &mut Cx<Self>) {
		let interval = self.heartbeat_interval();
		let actor = cx.access_actor().clone();
		cx.after(interval, move |s| actor.apply(s, move |this, cx| this.tick(cx)));
	}

	/// One scheduler iteration (spec §4.F steps 1-8).
	fn tick(&mut self, cx: &mut Cx<Self>) {
		let now = cx.now();

		self.drain_commands(now);
		self.flush_delayed(now);
		self.tick_connections(now);
		self.remove_finished_connections();
		self.poll_socket(now);
		self.reassembler.sweep(now);

		if self.shutting_down.is_some() && self.connections.is_empty() {
			return; // final tick: no further reschedule, actor is dropped by its owner.
		}

		self.schedule_tick(cx);
	}

	// ---- step 6: drain cross-thread command queue ----

	fn drain_commands(&mut self, now: Instant) {
		while let Ok(command) = self.commands.try_recv() {
			match command {
				Command::Connect { remote, hail } => self.handle_connect(remote, hail, now),
				Command::Send { remote, message_type, payload } => self.handle_send(remote, message_type, payload),
				Command::SendUnconnected { remote, message_type, payload } => {
					self.send_datagram_now(remote, message_type, &payload, now);
				}
				Command::Disconnect { remote, reason } => self.handle_disconnect(remote, reason, now),
				Command::Approve { remote } => self.handle_approve(remote),
				Command::Deny { remote, reason } => self.handle_deny(remote, reason, now),
				Command::Shutdown { reason } => self.handle_shutdown(reason, now),
			}
		}
	}

	fn handle_connect(&mut self, remote: SocketAddr, hail: Vec<u8>, now: Instant) {
		if self.connections.len() >= self.config.maximum_connections {
			warn!("Refusing connection to {remote}: maximum_connections reached");
			return;
		}

		if self.connections.find(&remote).is_some() {
			trace!("Connect requested for {remote} which already has a connection");
			return;
		}

		let connection = Connection::connect(remote, &self.config, self.local_unique_id, hail, now);
		self.connections.insert_unique(&remote).insert(connection);
	}

	fn handle_send(&mut self, remote: SocketAddr, message_type: u8, payload: Vec<u8>) {
		let Some(mut entry) = self.connections.find_entry(&remote).filled() else {
			warn!("Dropping send to {remote}: not connected");
			return;
		};

		let mut message = OutgoingMessage::new(message_type, &self.pool);
		for b in payload {
			message.buffer.write_u8(b);
		}

		entry.enqueue(message_type, message, &self.config);
	}

	fn handle_disconnect(&mut self, remote: SocketAddr, reason: String, now: Instant) {
		let events = {
			let Some(mut entry) = self.connections.find_entry(&remote).filled() else { return };
			let mut events = Vec::new();
			entry.request_disconnect(reason, &mut events);
			events
		};

		self.apply_events(remote, events, now);
	}

	fn handle_approve(&mut self, remote: SocketAddr) {
		let Some(mut entry) = self.connections.find_entry(&remote).filled() else { return };
		entry.approve();
	}

	fn handle_deny(&mut self, remote: SocketAddr, reason: String, now: Instant) {
		let events = {
			let Some(mut entry) = self.connections.find_entry(&remote).filled() else { return };
			let mut events = Vec::new();
			entry.deny(reason, &mut events);
			events
		};

		self.apply_events(remote, events, now);
	}

	fn handle_shutdown(&mut self, reason: String, now: Instant) {
		debug!("Peer shutting down: {reason}");
		self.shutting_down = Some(reason.clone());

		let remotes: Vec<SocketAddr> = self.connections.iter().map(|c| c.remote).collect();
		for remote in remotes {
			self.handle_disconnect(remote, reason.clone(), now);
		}
	}

	// ---- step 3: simulated-latency flush ----

	fn flush_delayed(&mut self, now: Instant) {
		let mut due = Vec::new();
		let mut remaining = Vec::new();

		for d in std::mem::take(&mut self.delayed) {
			if d.deadline <= now {
				due.push(d);
			} else {
				remaining.push(d);
			}
		}
		self.delayed = remaining;

		for d in due {
			if let Err(err) = self.socket.send_to(&d.datagram, d.remote) {
				warn!("Delayed send to {} failed: {err}", d.remote);
			}
		}
	}

	// ---- steps 2 & 4: tick every tracked connection ----

	fn tick_connections(&mut self, now: Instant) {
		let remotes: Vec<SocketAddr> = self.connections.iter().map(|c| c.remote).collect();

		for remote in remotes {
			let events = {
				let Some(mut entry) = self.connections.find_entry(&remote).filled() else { continue };
				let mut events = Vec::new();
				entry.tick(now, &self.config, &mut events);
				events
			};

			self.apply_events(remote, events, now);
		}
	}

	fn remove_finished_connections(&mut self) {
		let finished: Vec<SocketAddr> = self.connections.iter().filter(|c| c.is_finished()).map(|c| c.remote).collect();

		for remote in finished {
			self.connections.find_entry(&remote).remove();
		}
	}

	/// Apply the events a `Connection::tick`/`receive_*` call produced: pack+send control frames
	/// and data frames, surface status changes to the inbound queue.
	fn apply_events(&mut self, remote: SocketAddr, events: Vec<ConnectionEvent>, now: Instant) {
		let current_mtu = self.connections.find(&remote).map_or(self.config.maximum_transmission_unit as usize, |c| c.current_mtu);
		let mut datagram = Vec::with_capacity(current_mtu);

		for event in events {
			match event {
				ConnectionEvent::SendControl { message_type, payload } => {
					let payload_bits = payload.len() * 8;
					self.pack_or_flush(&mut datagram, remote, message_type, 0, None, &payload, payload_bits, current_mtu, now);
				}
				ConnectionEvent::Frame(frame) => {
					let payload_bits = frame.payload_bits;
					self.pack_or_flush(&mut datagram, remote, frame.message_type, frame.sequence, frame.fragment, &frame.payload, payload_bits, current_mtu, now);
				}
				ConnectionEvent::StatusChanged { status, reason } => {
					self.push_status_changed(remote, status, reason, now);
				}
				ConnectionEvent::ApprovalRequested { hail } => {
					self.push_approval_requested(remote, hail, now);
				}
			}
		}

		if !datagram.is_empty() {
			self.send_raw(remote, datagram, now);
		}
	}

	#[allow(clippy::too_many_arguments)]
	fn pack_or_flush(
		&mut self,
		datagram: &mut Vec<u8>,
		remote: SocketAddr,
		message_type: u8,
		sequence: u16,
		fragment: Option<FragmentInfo>,
		payload: &[u8],
		payload_bits: usize,
		current_mtu: usize,
		now: Instant,
	) {
		let is_fragment = fragment.is_some();

		// Encryption is interposed per message, beneath fragmentation: each chunk is its own
		// independently encrypted wire payload (spec §4.H).
		let encrypted = crypto::encrypt_message(self.cipher.as_ref(), payload_bits, payload);
		let encrypted_bits = encrypted.len() * 8;

		let fits = frame::pack(
			datagram,
			Frame { message_type, sequence, is_fragment, payload: &encrypted, payload_bits: encrypted_bits },
			fragment.as_ref(),
			current_mtu,
		);

		if !fits {
			if !datagram.is_empty() {
				let full = std::mem::replace(datagram, Vec::with_capacity(current_mtu));
				self.send_raw(remote, full, now);
			}

			frame::pack(
				datagram,
				Frame { message_type, sequence, is_fragment, payload: &encrypted, payload_bits: encrypted_bits },
				fragment.as_ref(),
				current_mtu,
			);
		}
	}

	fn push_status_changed(&mut self, remote: SocketAddr, status: Status, reason: String, now: Instant) {
		let mut buffer = BitBuffer::new();
		buffer.write_u8(status_code(status));
		buffer.write_str(&reason);

		let _ = self.inbound.send(IncomingMessage {
			buffer,
			incoming_kind: IncomingKind::StatusChanged,
			base_message_type: MessageType::UNCONNECTED,
			sequence_number: 0,
			is_fragment: false,
			receive_time: now,
			sender_endpoint: remote,
			sender_connection: Some(remote),
			fragment: None,
		});
	}

	/// Surface a pending approval decision to user code (spec §4.E); the hail bytes travel in the
	/// message buffer so the application can decide whether to call [`PeerHandle::approve`] or
	/// [`PeerHandle::deny`].
	fn push_approval_requested(&mut self, remote: SocketAddr, hail: Vec<u8>, now: Instant) {
		let mut buffer = BitBuffer::new();
		for b in hail {
			buffer.write_u8(b);
		}

		let _ = self.inbound.send(IncomingMessage {
			buffer,
			incoming_kind: IncomingKind::ConnectionApproval,
			base_message_type: MessageType::CONNECT,
			sequence_number: 0,
			is_fragment: false,
			receive_time: now,
			sender_endpoint: remote,
			sender_connection: Some(remote),
			fragment: None,
		});
	}

	/// Send `message_type` directly, bypassing the channel layer (control rejections and
	/// unconnected sends, spec §4.G).
	fn send_datagram_now(&mut self, remote: SocketAddr, message_type: u8, payload: &[u8], now: Instant) {
		let encrypted = crypto::encrypt_message(self.cipher.as_ref(), payload.len() * 8, payload);
		let frame = Frame { message_type, sequence: 0, is_fragment: false, payload: &encrypted, payload_bits: encrypted.len() * 8 };
		let mut datagram = Vec::new();
		frame::pack(&mut datagram, frame, None, self.config.maximum_transmission_unit as usize);
		self.send_raw(remote, datagram, now);
	}

	/// Apply loss/duplicate/latency simulation (spec §6) then hand off to the socket.
	fn send_raw(&mut self, remote: SocketAddr, datagram: Vec<u8>, now: Instant) {
		let mut rng = rand::thread_rng();

		if self.config.loss > 0.0 && rng.gen_bool(self.config.loss) {
			trace!("Simulated loss dropped a datagram to {remote}");
			return;
		}

		let copies = if self.config.duplicates > 0.0 && rng.gen_bool(self.config.duplicates) { 2 } else { 1 };

		for _ in 0..copies {
			if self.config.min_latency > Duration::ZERO || self.config.random_latency > Duration::ZERO {
				let jitter = if self.config.random_latency > Duration::ZERO {
					rng.gen_range(Duration::ZERO..self.config.random_latency)
				} else {
					Duration::ZERO
				};

				self.delayed.push(DelayedSend { deadline: now + self.config.min_latency + jitter, remote, datagram: datagram.clone() });
			} else if let Err(err) = self.socket.send_to(&datagram, remote) {
				warn!("Send to {remote} failed: {err}");
			}
		}
	}

	// ---- step 7: socket poll ----

	fn poll_socket(&mut self, now: Instant) {
		loop {
			let (n, sender) = match self.socket.recv_from(&mut self.recv_buf) {
				Ok(pair) => pair,
				Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
				Err(err) => {
					warn!("Socket recv_from failed: {err}");
					break;
				}
			};

			let datagram = self.recv_buf[..n].to_vec();
			self.handle_datagram(sender, &datagram, now);
		}
	}

	fn handle_datagram(&mut self, sender: SocketAddr, datagram: &[u8], now: Instant) {
		let mut offset = 0;

		while offset < datagram.len() {
			let parsed = match frame::unpack(datagram, &mut offset) {
				Ok(p) => p,
				Err(_) => {
					warn!("Dropping malformed datagram tail from {sender}");
					break;
				}
			};

			let Some(parsed) = self.decrypt_parsed(sender, parsed) else { continue };

			self.route_frame(sender, parsed, now);
		}
	}

	/// Reverse the per-message encryption applied in [`Self::pack_or_flush`]/[`Self::send_datagram_now`]
	/// (spec §4.H). Returns `None` and logs on authentication/format failure, dropping the frame.
	fn decrypt_parsed(&self, sender: SocketAddr, parsed: frame::Unpacked) -> Option<frame::Unpacked> {
		let Some((payload, payload_bits)) = crypto::decrypt_message(self.cipher.as_ref(), &parsed.payload) else {
			warn!("Dropping frame from {sender} that failed to decrypt");
			return None;
		};

		Some(frame::Unpacked { payload, payload_bits, ..parsed })
	}

	fn route_frame(&mut self, sender: SocketAddr, parsed: frame::Unpacked, now: Instant) {
		let message_type = parsed.message_type;

		if matches!(message_type, MessageType::UNCONNECTED | MessageType::DISCOVERY | MessageType::DISCOVERY_RESPONSE) {
			if let Some(incoming) = discovery::classify_unconnected(message_type, parsed.payload, sender, now) {
				let _ = self.inbound.send(incoming);
			}
			return;
		}

		if message_type == MessageType::CONNECT && self.connections.find(&sender).is_none() {
			if self.connections.len() >= self.config.maximum_connections {
				warn!("Rejecting inbound connect from {sender}: maximum_connections reached");
				return;
			}
			let connection = Connection::accept(sender, &self.config, now);
			self.connections.insert_unique(&sender).insert(connection);
		}

		if self.connections.find(&sender).is_none() {
			trace!("Dropping message type {message_type} from unknown peer {sender}");
			return;
		}

		if message::get_delivery_method(message_type).is_some() {
			self.route_data_frame(sender, message_type, parsed, now);
			return;
		}

		let mut events = Vec::new();
		let result = {
			let Some(mut entry) = self.connections.find_entry(&sender).filled() else { return };
			entry.receive_handshake(message_type, &parsed.payload, &self.config, now, &mut events)
		};

		match result {
			Ok(()) => self.apply_events(sender, events, now),
			Err(ConnectionError::WrongAppIdentifier) => self.reject_handshake(sender, "Wrong application identifier!", now),
			Err(ConnectionError::HandshakeValidationFailed) => self.reject_handshake(sender, "Handshake validation failed", now),
			Err(ConnectionError::Timeout) => self.reject_handshake(sender, "Timeout", now),
		}
	}

	fn reject_handshake(&mut self, remote: SocketAddr, reason: &str, now: Instant) {
		warn!("Rejecting handshake with {remote}: {reason}");

		let mut buf = BitBuffer::new();
		buf.write_str(reason);
		self.send_datagram_now(remote, MessageType::DISCONNECT, &buf.into_bytes(), now);

		self.connections.find_entry(&remote).remove();
	}

	fn route_data_frame(&mut self, sender: SocketAddr, message_type: u8, parsed: frame::Unpacked, now: Instant) {
		let buffer = BitBuffer::from_bytes(parsed.payload, parsed.payload_bits);

		let incoming = IncomingMessage {
			buffer,
			incoming_kind: IncomingKind::Data,
			base_message_type: message_type,
			sequence_number: parsed.sequence,
			is_fragment: parsed.is_fragment,
			receive_time: now,
			sender_endpoint: sender,
			sender_connection: Some(sender),
			fragment: parsed.fragment,
		};

		let released = {
			let Some(mut entry) = self.connections.find_entry(&sender).filled() else { return };
			let mut released = std::collections::VecDeque::new();
			entry.receive_data(message_type, parsed.sequence, incoming, &mut released, now);
			released
		};

		for message in released {
			self.deliver_released(sender, message, now);
		}
	}

	fn deliver_released(&mut self, sender: SocketAddr, message: IncomingMessage, now: Instant) {
		if !message.is_fragment {
			let _ = self.inbound.send(message);
			return;
		}

		let Some(info) = message.fragment else {
			warn!("Fragment-flagged message from {sender} carried no fragment metadata");
			return;
		};

		let chunk_bytes = message.buffer.as_bytes();

		if let Some((bytes, total_bits)) = self.reassembler.receive(sender, info.group, info.total_bits, info.chunk_byte_size, info.chunk_number, chunk_bytes, now) {
			let _ = self.inbound.send(IncomingMessage {
				buffer: BitBuffer::from_bytes(bytes, total_bits),
				incoming_kind: IncomingKind::Data,
				base_message_type: message.base_message_type,
				sequence_number: message.sequence_number,
				is_fragment: false,
				receive_time: now,
				sender_endpoint: sender,
				sender_connection: Some(sender),
				fragment: None,
			});
		}
	}
}

fn status_code(status: Status) -> u8 {
	match status {
		Status::None => 0,
		Status::InitiatedConnect => 1,
		Status::ReceivedInitiation => 2,
		Status::RespondedAwaitingApproval => 3,
		Status::RespondedConnect => 4,
		Status::Connected => 5,
		Status::Disconnecting => 6,
		Status::Disconnected => 7,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_peer() -> Peer {
		let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
		let config = Config::builder("test/1".into()).build().unwrap();
		let (_commands_tx, commands) = command_channel();
		let (inbound, _inbound_rx) = inbound_channel();

		Peer {
			socket,
			local_unique_id: 0,
			connections: Map::default(),
			reassembler: Reassembler::new(config.connection_timeout),
			cipher: Box::new(NullCipher),
			commands,
			inbound,
			pool: MessagePool::new(false),
			delayed: Vec::new(),
			recv_buf: vec![0u8; RECV_BUFFER_LEN],
			config,
			shutting_down: None,
		}
	}

	#[test]
	fn heartbeat_rate_throttles_with_connection_count_s1() {
		let mut peer = test_peer();
		assert_eq!(peer.heartbeat_interval(), Duration::from_millis(1000 / MAX_HEARTBEAT_RATE_PER_SEC));

		let now = Instant::now();
		for i in 0..1010u32 {
			let remote: SocketAddr = format!("127.0.0.1:{}", 2000 + i).parse().unwrap();
			let connection = Connection::connect(remote, &peer.config, 0, Vec::new(), now);
			peer.connections.insert_unique(&remote).insert(connection);
		}

		// 1010 connections: rate = min(250, 1250-1010) = 240 -> throttled below the cap.
		assert_eq!(peer.heartbeat_interval(), Duration::from_millis(1000 / 240));
	}

	#[test]
	fn command_and_inbound_channels_round_trip() {
		let (tx, rx) = command_channel();
		let (inbound_tx, inbound_rx) = inbound_channel();
		let handle = PeerHandle::new(tx, inbound_rx);

		handle.connect("127.0.0.1:9000".parse().unwrap(), vec![1, 2, 3]);
		let command = rx.try_recv().unwrap();
		assert!(matches!(command, Command::Connect { .. }));

		let _ = inbound_tx;
	}

	#[test]
	fn status_code_is_stable_per_variant() {
		assert_eq!(status_code(Status::Connected), 5);
		assert_eq!(status_code(Status::Disconnected), 7);
	}
}
