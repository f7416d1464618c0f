use std::collections::VecDeque;
use std::time::{Duration, Instant};

use log::trace;

use super::{seq_advance, PendingFrame, RetransmitReason, SendOutcome};
use crate::bits::{relative, SEQUENCE_SPACE};
use crate::message::OutgoingMessage;

/// Sanity cap on the outbound queue so a stalled peer can't grow it without bound.
const MAX_QUEUED: usize = 4096;

struct Stored {
	message: OutgoingMessage,
	send_time: Instant,
	num_sent: u32,
}

/// Sender-side state for `Unreliable`/`UnreliableSequenced`: no ack handling or retransmission,
/// just a monotonically advancing sequence counter (spec §4.D).
pub struct UnreliableSender {
	queued_sends: VecDeque<OutgoingMessage>,
	send_start: u16,
	window_size: u16,
}

impl UnreliableSender {
	#[must_use]
	pub fn new(window_size: u16) -> Self {
		Self { queued_sends: VecDeque::new(), send_start: 0, window_size }
	}

	pub fn enqueue(&mut self, message: OutgoingMessage) -> SendOutcome {
		if self.queued_sends.len() >= MAX_QUEUED {
			return SendOutcome::Dropped;
		}

		self.queued_sends.push_back(message);
		SendOutcome::Queued
	}

	pub fn tick(&mut self, _now: Instant, _resend_delay: Duration, out: &mut Vec<PendingFrame>) {
		// No window to respect for drops, but still cap how many frames go out in one tick so a
		// burst of enqueues doesn't blow past the datagram budget before the caller can pack MTU.
		let budget = self.window_size as usize;

		while out.len() < budget {
			let Some(mut message) = self.queued_sends.pop_front() else { break };

			message.seal();

			let sequence = self.send_start;
			self.send_start = seq_advance(self.send_start);

			out.push(PendingFrame {
				sequence,
				message_type: message.message_type,
				payload: message.buffer.as_bytes().to_vec(),
				payload_bits: message.buffer.bit_len(),
				fragment: message.fragment,
				retransmit: None,
			});
		}
	}

	pub fn reset(&mut self) {
		self.queued_sends.clear();
		self.send_start = 0;
	}
}

/// Sender-side state for the three reliable delivery methods (spec §3 "Sender channel state").
pub struct ReliableSender {
	window_size: u16,
	queued_sends: VecDeque<OutgoingMessage>,
	stored: Vec<Option<Stored>>,
	window_start: u16,
	send_start: u16,
	received_acks: Vec<bool>,
}

impl ReliableSender {
	#[must_use]
	pub fn new(window_size: u16) -> Self {
		Self {
			window_size,
			queued_sends: VecDeque::new(),
			stored: (0..window_size).map(|_| None).collect(),
			window_start: 0,
			send_start: 0,
			received_acks: vec![false; SEQUENCE_SPACE as usize],
		}
	}

	fn in_flight(&self) -> u16 {
		relative(self.send_start, self.window_start, SEQUENCE_SPACE).max(0) as u16
	}

	fn get_allowed_sends(&self) -> u16 {
		self.window_size.saturating_sub(self.in_flight())
	}

	pub fn enqueue(&mut self, message: OutgoingMessage) -> SendOutcome {
		if self.queued_sends.len() + self.in_flight() as usize >= MAX_QUEUED {
			return SendOutcome::Dropped;
		}

		self.queued_sends.push_back(message);
		SendOutcome::Queued
	}

	fn slot(&mut self, seq: u16) -> &mut Option<Stored> {
		&mut self.stored[(seq % self.window_size) as usize]
	}

	/// Whether any sequence strictly between `seq` (exclusive) and `send_start` (exclusive) has
	/// already been acked — used to fast-retransmit on a "hole" (spec §4.D).
	fn any_later_ack(&self, seq: u16) -> bool {
		let mut cursor = seq_advance(seq);
		while cursor != self.send_start {
			if self.received_acks[cursor as usize] {
				return true;
			}
			cursor = seq_advance(cursor);
		}
		false
	}

	pub fn tick(&mut self, now: Instant, resend_delay: Duration, out: &mut Vec<PendingFrame>) {
		while self.get_allowed_sends() > 0 {
			let Some(mut message) = self.queued_sends.pop_front() else { break };

			message.seal();

			let sequence = self.send_start;
			self.send_start = seq_advance(self.send_start);

			let payload = message.buffer.as_bytes().to_vec();
			let payload_bits = message.buffer.bit_len();
			let message_type = message.message_type;
			let fragment = message.fragment;

			*self.slot(sequence) = Some(Stored { message, send_time: now, num_sent: 1 });

			out.push(PendingFrame {
				sequence,
				message_type,
				payload,
				payload_bits,
				fragment,
				retransmit: None,
			});
		}

		let mut cursor = self.window_start;
		while cursor != self.send_start {
			let hole = self.any_later_ack(cursor);

			if let Some(stored) = self.slot(cursor) {
				let elapsed = now.duration_since(stored.send_time);

				if hole || elapsed > resend_delay {
					stored.send_time = now;
					stored.num_sent += 1;

					out.push(PendingFrame {
						sequence: cursor,
						message_type: stored.message.message_type,
						payload: stored.message.buffer.as_bytes().to_vec(),
						payload_bits: stored.message.buffer.bit_len(),
						fragment: stored.message.fragment,
						retransmit: Some(if hole { RetransmitReason::Hole } else { RetransmitReason::Delay }),
					});
				}
			}

			cursor = seq_advance(cursor);
		}
	}

	pub fn on_ack(&mut self, seq: u16) {
		let relate = relative(seq, self.window_start, SEQUENCE_SPACE);

		if relate < 0 {
			trace!("Dropping duplicate ack for sequence {seq}");
			return;
		}

		if relate == 0 {
			*self.slot(self.window_start) = None;
			self.received_acks[self.window_start as usize] = false;
			self.window_start = seq_advance(self.window_start);

			while self.received_acks[self.window_start as usize] {
				*self.slot(self.window_start) = None;
				self.received_acks[self.window_start as usize] = false;
				self.window_start = seq_advance(self.window_start);
			}
		} else {
			self.received_acks[seq as usize] = true;
		}
	}

	pub fn reset(&mut self) {
		self.queued_sends.clear();
		for slot in &mut self.stored {
			*slot = None;
		}
		self.received_acks.iter_mut().for_each(|b| *b = false);
		self.window_start = 0;
		self.send_start = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::MessageType;

	fn fill_window(sender: &mut ReliableSender, count: u16, pool: &crate::message::MessagePool) {
		for _ in 0..count {
			sender.enqueue(OutgoingMessage::new(MessageType::USER_RELIABLE_UNORDERED, pool));
		}
		let mut out = Vec::new();
		sender.tick(Instant::now(), Duration::from_secs(10), &mut out);
		assert_eq!(out.len(), count as usize);
	}

	#[test]
	fn ack_window_slide_s4() {
		let pool = crate::message::MessagePool::new(false);
		let mut sender = ReliableSender::new(64);
		fill_window(&mut sender, 64, &pool);

		sender.on_ack(5);
		assert!(sender.received_acks[5]);
		assert_eq!(sender.window_start, 0);

		for seq in 0..=4 {
			sender.on_ack(seq);
		}
		assert_eq!(sender.window_start, 6);
	}

	#[test]
	fn reliable_resend_on_delay() {
		let pool = crate::message::MessagePool::new(false);
		let mut sender = ReliableSender::new(64);
		sender.enqueue(OutgoingMessage::new(MessageType::USER_RELIABLE_UNORDERED, &pool));

		let t0 = Instant::now();
		let mut out = Vec::new();
		sender.tick(t0, Duration::from_millis(100), &mut out);
		assert_eq!(out.len(), 1);
		assert!(out[0].retransmit.is_none());

		let mut out = Vec::new();
		sender.tick(t0 + Duration::from_millis(50), Duration::from_millis(100), &mut out);
		assert!(out.is_empty());

		let mut out = Vec::new();
		sender.tick(t0 + Duration::from_millis(200), Duration::from_millis(100), &mut out);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].retransmit, Some(RetransmitReason::Delay));
	}

	#[test]
	fn duplicate_ack_is_idempotent() {
		let pool = crate::message::MessagePool::new(false);
		let mut sender = ReliableSender::new(64);
		sender.enqueue(OutgoingMessage::new(MessageType::USER_RELIABLE_UNORDERED, &pool));
		let mut out = Vec::new();
		sender.tick(Instant::now(), Duration::from_secs(10), &mut out);

		sender.on_ack(0);
		assert_eq!(sender.window_start, 1);
		sender.on_ack(0);
		assert_eq!(sender.window_start, 1);
	}
}
