//! Unconnected message routing: discovery request/response and arbitrary unconnected datagrams
//! (spec §4.G).

use std::net::SocketAddr;
use std::time::Instant;

use crate::bits::BitBuffer;
use crate::message::{IncomingKind, IncomingMessage, MessageType};

/// A message queued for send to a peer with no live [`Connection`](crate::connection::Connection).
pub struct UnconnectedSend {
	pub destination: SocketAddr,
	pub message_type: u8,
	pub payload: Vec<u8>,
}

/// Build a `Discovery` broadcast payload, a bare token the listener can use to identify the
/// requesting application (left opaque here; the embedder decides its contents).
#[must_use]
pub fn build_discovery_request(token: &[u8]) -> Vec<u8> {
	token.to_vec()
}

#[must_use]
pub fn build_discovery_response(server_name: &str) -> Vec<u8> {
	let mut buf = BitBuffer::new();
	buf.write_str(server_name);
	buf.into_bytes()
}

/// Classify an inbound datagram with no matching connection into the [`IncomingMessage`] the
/// scheduler appends to the inbound queue (spec §4.G).
#[must_use]
pub fn classify_unconnected(message_type: u8, payload: Vec<u8>, sender: SocketAddr, now: Instant) -> Option<IncomingMessage> {
	let kind = match message_type {
		MessageType::DISCOVERY => IncomingKind::DiscoveryRequest,
		MessageType::DISCOVERY_RESPONSE => IncomingKind::DiscoveryResponse,
		MessageType::UNCONNECTED => IncomingKind::UnconnectedData,
		_ => return None,
	};

	let byte_len = payload.len();
	Some(IncomingMessage {
		buffer: BitBuffer::from_bytes(payload, byte_len * 8),
		incoming_kind: kind,
		base_message_type: message_type,
		sequence_number: 0,
		is_fragment: false,
		receive_time: now,
		sender_endpoint: sender,
		sender_connection: None,
		fragment: None,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_discovery_request() {
		let sender: SocketAddr = "127.0.0.1:9000".parse().unwrap();
		let msg = classify_unconnected(MessageType::DISCOVERY, b"app/1".to_vec(), sender, Instant::now()).unwrap();
		assert_eq!(msg.incoming_kind, IncomingKind::DiscoveryRequest);
	}

	#[test]
	fn classifies_unconnected_data() {
		let sender: SocketAddr = "127.0.0.1:9000".parse().unwrap();
		let msg = classify_unconnected(MessageType::UNCONNECTED, b"ping".to_vec(), sender, Instant::now()).unwrap();
		assert_eq!(msg.incoming_kind, IncomingKind::UnconnectedData);
	}

	#[test]
	fn rejects_connected_message_types() {
		let sender: SocketAddr = "127.0.0.1:9000".parse().unwrap();
		assert!(classify_unconnected(MessageType::PING, vec![], sender, Instant::now()).is_none());
	}
}
