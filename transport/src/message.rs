//! Typed wrappers around a [`BitBuffer`] carrying routing metadata (spec §3).

use std::net::SocketAddr;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use crate::bits::BitBuffer;

/// The `u8` message-type namespace (spec §6).
#[allow(non_snake_case)]
pub mod MessageType {
	pub const UNCONNECTED: u8 = 0;
	pub const CONNECT: u8 = 1;
	pub const CONNECT_RESPONSE: u8 = 2;
	pub const CONNECTION_ESTABLISHED: u8 = 3;
	pub const ACKNOWLEDGE: u8 = 4;
	pub const DISCONNECT: u8 = 5;
	pub const DISCOVERY: u8 = 6;
	pub const DISCOVERY_RESPONSE: u8 = 7;
	pub const PING: u8 = 8;
	pub const PONG: u8 = 9;

	pub const LIBRARY_START: u8 = 10;
	pub const MTU_PROBE: u8 = 10;
	pub const MTU_PROBE_ACK: u8 = 11;
	pub const LIBRARY_END: u8 = 20;

	pub const UNRELIABLE: u8 = 20;

	pub const USER_SEQUENCED_START: u8 = 21;
	pub const USER_SEQUENCED_END: u8 = USER_SEQUENCED_START + 32;

	pub const USER_RELIABLE_UNORDERED: u8 = USER_SEQUENCED_END;

	pub const USER_RELIABLE_SEQUENCED_START: u8 = USER_RELIABLE_UNORDERED + 1;
	pub const USER_RELIABLE_SEQUENCED_END: u8 = USER_RELIABLE_SEQUENCED_START + 32;

	pub const USER_RELIABLE_ORDERED_START: u8 = USER_RELIABLE_SEQUENCED_END;
	pub const USER_RELIABLE_ORDERED_END: u8 = USER_RELIABLE_ORDERED_START + 32;

	pub const USER_STREAM_START: u8 = USER_RELIABLE_ORDERED_END;
	pub const USER_STREAM_END: u8 = USER_STREAM_START + 32;
}

/// Delivery semantics a [`MessageType`] maps onto (spec §4.D).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMethod {
	Unreliable,
	UnreliableSequenced,
	ReliableUnordered,
	ReliableSequenced,
	ReliableOrdered,
	/// Present in the wire namespace as a distinct range; behaves as `ReliableOrdered` (spec §9 open question).
	Stream,
}

/// Classify a message type by its range in the namespace above.
#[must_use]
pub fn get_delivery_method(message_type: u8) -> Option<(DeliveryMethod, u8)> {
	use MessageType::*;

	if message_type == UNRELIABLE {
		return Some((DeliveryMethod::Unreliable, 0));
	}
	if (USER_SEQUENCED_START..USER_SEQUENCED_END).contains(&message_type) {
		return Some((DeliveryMethod::UnreliableSequenced, message_type - USER_SEQUENCED_START));
	}
	if message_type == USER_RELIABLE_UNORDERED {
		return Some((DeliveryMethod::ReliableUnordered, 0));
	}
	if (USER_RELIABLE_SEQUENCED_START..USER_RELIABLE_SEQUENCED_END).contains(&message_type) {
		return Some((DeliveryMethod::ReliableSequenced, message_type - USER_RELIABLE_SEQUENCED_START));
	}
	if (USER_RELIABLE_ORDERED_START..USER_RELIABLE_ORDERED_END).contains(&message_type) {
		return Some((DeliveryMethod::ReliableOrdered, message_type - USER_RELIABLE_ORDERED_START));
	}
	if (USER_STREAM_START..USER_STREAM_END).contains(&message_type) {
		return Some((DeliveryMethod::Stream, message_type - USER_STREAM_START));
	}

	None
}

#[must_use]
pub fn channel_base_type(method: DeliveryMethod, channel: u8) -> u8 {
	use MessageType::*;

	match method {
		DeliveryMethod::Unreliable => UNRELIABLE,
		DeliveryMethod::UnreliableSequenced => USER_SEQUENCED_START + channel,
		DeliveryMethod::ReliableUnordered => USER_RELIABLE_UNORDERED,
		DeliveryMethod::ReliableSequenced => USER_RELIABLE_SEQUENCED_START + channel,
		DeliveryMethod::ReliableOrdered | DeliveryMethod::Stream => USER_RELIABLE_ORDERED_START + channel,
	}
}

/// Fragmentation routing carried alongside a message; absent when the message is unfragmented.
#[derive(Debug, Clone, Copy)]
pub struct FragmentInfo {
	pub group: u16,
	pub total_bits: usize,
	pub chunk_byte_size: usize,
	pub chunk_number: u32,
}

/// A pool of reusable backing byte vectors for outgoing message buffers (spec §6
/// `use_message_recycling`/`storage_pool`).
#[derive(Clone)]
pub struct MessagePool {
	free: Sender<Vec<u8>>,
	reuse: Receiver<Vec<u8>>,
	enabled: bool,
}

impl MessagePool {
	#[must_use]
	pub fn new(enabled: bool) -> Self {
		let (free, reuse) = crossbeam_channel::unbounded();
		Self { free, reuse, enabled }
	}

	fn checkout(&self) -> Vec<u8> {
		if self.enabled {
			self.reuse.try_recv().unwrap_or_default()
		} else {
			Vec::new()
		}
	}

	fn recycle(&self, mut buf: Vec<u8>) {
		if self.enabled {
			buf.clear();
			let _ = self.free.send(buf);
		}
	}
}

/// BitBuffer + routing metadata for an outbound message (spec §3).
pub struct OutgoingMessage {
	pub message_type: u8,
	pub buffer: BitBuffer,
	pub fragment: Option<FragmentInfo>,
	sealed: bool,
	pool: Option<MessagePool>,
}

impl OutgoingMessage {
	#[must_use]
	pub fn new(message_type: u8, pool: &MessagePool) -> Self {
		Self {
			message_type,
			buffer: BitBuffer::reuse(pool.checkout()),
			fragment: None,
			sealed: false,
			pool: Some(pool.clone()),
		}
	}

	/// Build a message around an already-written buffer (used by the fragmentation layer, and by
	/// tests that don't need pool accounting).
	#[must_use]
	pub fn with_buffer(message_type: u8, buffer: BitBuffer, fragment: Option<FragmentInfo>) -> Self {
		Self { message_type, buffer, fragment, sealed: false, pool: None }
	}

	#[must_use]
	pub fn is_fragmented(&self) -> bool {
		self.fragment.is_some()
	}

	/// Marks the message as handed off to the wire encoder; further writes are a logic error.
	pub fn seal(&mut self) {
		self.sealed = true;
	}

	#[must_use]
	pub fn is_sealed(&self) -> bool {
		self.sealed
	}
}

impl Drop for OutgoingMessage {
	fn drop(&mut self) {
		if let Some(pool) = self.pool.take() {
			let buffer = std::mem::take(&mut self.buffer);
			pool.recycle(buffer.into_bytes());
		}
	}
}

/// Classification of a released inbound message (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingKind {
	Data,
	StatusChanged,
	UnconnectedData,
	DiscoveryRequest,
	DiscoveryResponse,
	ConnectionApproval,
	Error,
}

/// BitBuffer + routing metadata for a received message, released to user code via the inbound queue.
pub struct IncomingMessage {
	pub buffer: BitBuffer,
	pub incoming_kind: IncomingKind,
	pub base_message_type: u8,
	pub sequence_number: u16,
	pub is_fragment: bool,
	pub receive_time: Instant,
	pub sender_endpoint: SocketAddr,
	pub sender_connection: Option<SocketAddr>,
	/// Group/chunk routing for a fragment chunk still awaiting reassembly; consumed internally by
	/// the peer scheduler and never surfaced once a message reaches the user-facing inbound queue.
	pub(crate) fragment: Option<FragmentInfo>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_delivery_ranges() {
		assert_eq!(get_delivery_method(MessageType::UNRELIABLE), Some((DeliveryMethod::Unreliable, 0)));
		assert_eq!(
			get_delivery_method(MessageType::USER_SEQUENCED_START + 5),
			Some((DeliveryMethod::UnreliableSequenced, 5))
		);
		assert_eq!(
			get_delivery_method(MessageType::USER_RELIABLE_ORDERED_START),
			Some((DeliveryMethod::ReliableOrdered, 0))
		);
		assert_eq!(get_delivery_method(MessageType::PING), None);
	}

	#[test]
	fn pool_recycles_buffers_when_enabled() {
		let pool = MessagePool::new(true);

		{
			let mut msg = OutgoingMessage::new(MessageType::UNRELIABLE, &pool);
			msg.buffer.write_u8(42);
		}

		let reused = pool.checkout();
		assert!(reused.capacity() > 0);
	}
}
