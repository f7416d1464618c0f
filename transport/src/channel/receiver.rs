use std::collections::VecDeque;

use super::seq_advance;
use crate::bits::{relative, SEQUENCE_SPACE};
use crate::message::IncomingMessage;

/// `Unreliable`: no dedup, no ordering — every arrival is released immediately.
#[derive(Default)]
pub struct UnreliableReceiver;

impl UnreliableReceiver {
	pub fn receive(&mut self, _seq: u16, message: IncomingMessage, released: &mut VecDeque<IncomingMessage>) {
		released.push_back(message);
	}
}

/// `UnreliableSequenced`/`ReliableSequenced`: release only if newer than the last released sequence.
pub struct SequencedReceiver {
	last_received: Option<u16>,
}

impl Default for SequencedReceiver {
	fn default() -> Self {
		Self { last_received: None }
	}
}

impl SequencedReceiver {
	pub fn receive(&mut self, seq: u16, message: IncomingMessage, released: &mut VecDeque<IncomingMessage>) {
		let fresh = match self.last_received {
			None => true,
			Some(last) => relative(seq, seq_advance(last), SEQUENCE_SPACE) >= 0,
		};

		if !fresh {
			return;
		}

		self.last_received = Some(seq);
		released.push_back(message);
	}
}

/// `ReliableUnordered`: dedupe via a bitset over the window, release fresh messages immediately.
pub struct UnorderedReceiver {
	window_size: u16,
	seen: Vec<bool>,
	seen_seq: Vec<u16>,
}

impl UnorderedReceiver {
	#[must_use]
	pub fn new(window_size: u16) -> Self {
		Self {
			window_size,
			seen: vec![false; window_size as usize],
			seen_seq: vec![0; window_size as usize],
		}
	}

	pub fn receive(&mut self, seq: u16, message: IncomingMessage, released: &mut VecDeque<IncomingMessage>) {
		let slot = (seq % self.window_size) as usize;

		if self.seen[slot] && self.seen_seq[slot] == seq {
			return;
		}

		self.seen[slot] = true;
		self.seen_seq[slot] = seq;
		released.push_back(message);
	}
}

/// `ReliableOrdered`: strict in-order release with a reorder buffer (spec §4.D, §8 property S3).
pub struct OrderedReceiver {
	window_size: u16,
	window_start: u16,
	withheld: Vec<Option<IncomingMessage>>,
	earliest_received: Vec<bool>,
}

impl OrderedReceiver {
	#[must_use]
	pub fn new(window_size: u16) -> Self {
		Self {
			window_size,
			window_start: 0,
			withheld: (0..window_size).map(|_| None).collect(),
			earliest_received: vec![false; SEQUENCE_SPACE as usize],
		}
	}

	pub fn receive(&mut self, seq: u16, message: IncomingMessage, released: &mut VecDeque<IncomingMessage>) {
		let relate = relative(seq, self.window_start, SEQUENCE_SPACE);

		if relate < 0 {
			return; // duplicate
		}

		if relate == 0 {
			released.push_back(message);
			self.earliest_received[self.window_start as usize] = false;
			self.window_start = seq_advance(self.window_start);

			while let Some(withheld) = self.withheld[(self.window_start % self.window_size) as usize].take() {
				released.push_back(withheld);
				self.earliest_received[self.window_start as usize] = false;
				self.window_start = seq_advance(self.window_start);
			}

			return;
		}

		if (relate as u16) < self.window_size {
			self.earliest_received[seq as usize] = true;
			self.withheld[(seq % self.window_size) as usize] = Some(message);
		}
		// else: window overflow, sender must have abandoned — drop.
	}
}

#[cfg(test)]
mod tests {
	use std::net::SocketAddr;
	use std::time::Instant;

	use super::*;
	use crate::message::IncomingKind;

	fn msg(seq: u16) -> IncomingMessage {
		IncomingMessage {
			buffer: crate::bits::BitBuffer::new(),
			incoming_kind: IncomingKind::Data,
			base_message_type: 0,
			sequence_number: seq,
			is_fragment: false,
			receive_time: Instant::now(),
			sender_endpoint: "127.0.0.1:1".parse::<SocketAddr>().unwrap(),
			sender_connection: None,
			fragment: None,
		}
	}

	#[test]
	fn ordered_releases_in_order_after_reorder_s3() {
		let mut r = OrderedReceiver::new(64);
		let mut released = VecDeque::new();

		for &seq in &[0u16, 2, 1, 3] {
			r.receive(seq, msg(seq), &mut released);
		}

		let got: Vec<u16> = released.iter().map(|m| m.sequence_number).collect();
		assert_eq!(got, vec![0, 1, 2, 3]);
	}

	#[test]
	fn ordered_drops_duplicates() {
		let mut r = OrderedReceiver::new(64);
		let mut released = VecDeque::new();

		r.receive(0, msg(0), &mut released);
		r.receive(0, msg(0), &mut released);

		assert_eq!(released.len(), 1);
	}

	#[test]
	fn unordered_dedupes_but_releases_immediately() {
		let mut r = UnorderedReceiver::new(64);
		let mut released = VecDeque::new();

		r.receive(5, msg(5), &mut released);
		r.receive(5, msg(5), &mut released);
		r.receive(6, msg(6), &mut released);

		assert_eq!(released.len(), 2);
	}

	#[test]
	fn sequenced_drops_older_than_last() {
		let mut r = SequencedReceiver::default();
		let mut released = VecDeque::new();

		r.receive(5, msg(5), &mut released);
		r.receive(3, msg(3), &mut released);
		r.receive(7, msg(7), &mut released);

		let got: Vec<u16> = released.iter().map(|m| m.sequence_number).collect();
		assert_eq!(got, vec![5, 7]);
	}
}
