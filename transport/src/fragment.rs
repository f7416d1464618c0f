//! Splitting oversize outbound messages into MTU-sized chunks, and reassembling them on receive.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{trace, warn};

use crate::bits::BitBuffer;
use crate::message::{FragmentInfo, OutgoingMessage};

pub const MAX_GROUPS: u16 = 65534;

/// Conservative upper bound on the encoded size of the `varuint(group), varuint(total_bits),
/// varuint(chunk_byte_size), varuint(chunk_number)` fragment sub-header (spec §4.B).
const FRAGMENT_HEADER_MAX: usize = 16;
const FRAME_HEADER_LEN: usize = 5;

/// Assigns fragment group ids for outbound messages on a single sender.
#[derive(Default)]
pub struct GroupAllocator {
	next: u16,
}

impl GroupAllocator {
	pub fn next_group(&mut self) -> u16 {
		self.next = if self.next >= MAX_GROUPS { 1 } else { self.next + 1 };
		self.next
	}
}

/// Split `message` into MTU-sized chunks sharing a fresh group id. Returns one [`OutgoingMessage`]
/// per chunk, each carrying the original `message_type` and the shared fragment metadata.
pub fn split(message: OutgoingMessage, mtu: usize, group: u16) -> Vec<OutgoingMessage> {
	let bytes = message.buffer.as_bytes();
	let total_bits = message.buffer.bit_len();

	let chunk_byte_size = mtu.saturating_sub(FRAME_HEADER_LEN + FRAGMENT_HEADER_MAX).max(1);

	bytes
		.chunks(chunk_byte_size)
		.enumerate()
		.map(|(chunk_number, chunk)| {
			let mut buffer = BitBuffer::new();
			for &b in chunk {
				buffer.write_u8(b);
			}

			OutgoingMessage::with_buffer(
				message.message_type,
				buffer,
				Some(FragmentInfo {
					group,
					total_bits,
					chunk_byte_size,
					chunk_number: chunk_number as u32,
				}),
			)
		})
		.collect()
}

#[derive(Hash, PartialEq, Eq, Clone, Copy)]
struct Key {
	sender: SocketAddr,
	group: u16,
}

struct Reassembly {
	buffer: Vec<u8>,
	total_bits: usize,
	chunk_byte_size: usize,
	received: Vec<bool>,
	received_count: u32,
	last_touched: Instant,
}

impl Reassembly {
	fn new(total_bits: usize, chunk_byte_size: usize, now: Instant) -> Self {
		let total_bytes = (total_bits + 7) / 8;
		let total_chunks = (total_bytes + chunk_byte_size - 1) / chunk_byte_size;

		Self {
			buffer: vec![0; total_bytes],
			total_bits,
			chunk_byte_size,
			received: vec![false; total_chunks],
			received_count: 0,
			last_touched: now,
		}
	}

	fn insert(&mut self, chunk_number: u32, payload: &[u8], now: Instant) -> bool {
		self.last_touched = now;

		let idx = chunk_number as usize;

		let Some(slot) = self.received.get_mut(idx) else {
			warn!("Fragment chunk number {chunk_number} out of range for reassembly group");
			return false;
		};

		let start = idx * self.chunk_byte_size;
		let end = (start + payload.len()).min(self.buffer.len());

		if start >= end {
			warn!("Fragment chunk {chunk_number} would overflow reassembly buffer");
			return false;
		}

		if !*slot {
			*slot = true;
			self.received_count += 1;
		}

		self.buffer[start..end].copy_from_slice(&payload[..end - start]);

		self.received_count as usize == self.received.len()
	}
}

/// Per-`(sender, group)` reassembly state, with an opportunistic TTL sweep run on each peer tick
/// (spec §9 open question: the source has no expiry, so one is added here).
pub struct Reassembler {
	groups: HashMap<Key, Reassembly>,
	timeout: Duration,
}

impl Reassembler {
	pub fn new(timeout: Duration) -> Self {
		Self { groups: HashMap::new(), timeout }
	}

	/// Insert an arriving fragment chunk. Returns the reassembled `(bytes, total_bits)` once every
	/// chunk in the group has arrived.
	pub fn receive(
		&mut self,
		sender: SocketAddr,
		group: u16,
		total_bits: usize,
		chunk_byte_size: usize,
		chunk_number: u32,
		payload: &[u8],
		now: Instant,
	) -> Option<(Vec<u8>, usize)> {
		let key = Key { sender, group };

		let state = self
			.groups
			.entry(key)
			.or_insert_with(|| Reassembly::new(total_bits, chunk_byte_size, now));

		if state.insert(chunk_number, payload, now) {
			let state = self.groups.remove(&key).expect("just inserted");
			trace!("Fragment group {group} from {sender} reassembled ({} bytes)", state.buffer.len());
			return Some((state.buffer, state.total_bits));
		}

		None
	}

	/// Drop reassembly state untouched for longer than the configured timeout.
	pub fn sweep(&mut self, now: Instant) {
		self.groups.retain(|key, state| {
			let alive = now.duration_since(state.last_touched) < self.timeout;
			if !alive {
				warn!("Dropping incomplete fragment group {} from {} (timed out)", key.group, key.sender);
			}
			alive
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::MessageType;

	#[test]
	fn split_and_reassemble_round_trip() {
		let mut buffer = BitBuffer::new();
		let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
		for &b in &payload {
			buffer.write_u8(b);
		}

		let message = OutgoingMessage::with_buffer(MessageType::UNRELIABLE, buffer, None);
		let chunks = split(message, 1200, 7);

		assert!(chunks.len() > 1);

		let mut reassembler = Reassembler::new(Duration::from_secs(5));
		let sender: SocketAddr = "127.0.0.1:9000".parse().unwrap();
		let now = Instant::now();

		// Deliver in reverse order, including a duplicate of the first chunk delivered.
		let mut out = None;
		for chunk in chunks.iter().rev() {
			let info = chunk.fragment.unwrap();
			let bytes = chunk.buffer.as_bytes();
			out = reassembler.receive(sender, info.group, info.total_bits, info.chunk_byte_size, info.chunk_number, bytes, now);
		}
		let dup = chunks.last().unwrap();
		let info = dup.fragment.unwrap();
		reassembler.receive(sender, info.group, info.total_bits, info.chunk_byte_size, info.chunk_number, dup.buffer.as_bytes(), now);

		let (bytes, total_bits) = out.expect("reassembly should complete");
		assert_eq!(total_bits, payload.len() * 8);
		assert_eq!(bytes, payload);
	}

	#[test]
	fn sweep_drops_stale_groups() {
		let mut reassembler = Reassembler::new(Duration::from_millis(1));
		let sender: SocketAddr = "127.0.0.1:9000".parse().unwrap();
		let now = Instant::now();

		reassembler.receive(sender, 1, 16, 8, 0, &[1], now);
		assert_eq!(reassembler.groups.len(), 1);

		let later = now + Duration::from_millis(50);
		reassembler.sweep(later);
		assert!(reassembler.groups.is_empty());
	}
}
