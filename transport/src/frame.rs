//! Datagram wire layout: a concatenation of message frames (spec §4.B).
//!
//! ```text
//! byte 0:   message_type (u8)
//! byte 1:   (sequence_number[0..7] << 1) | is_fragment_flag
//! byte 2:   sequence_number[7..15]
//! byte 3..4: payload_bit_length (u16, little-endian)
//! ```

use crate::bits::BitBuffer;
use crate::message::FragmentInfo;

pub const FRAME_HEADER_LEN: usize = 5;

pub struct Frame<'a> {
	pub message_type: u8,
	pub sequence: u16,
	pub is_fragment: bool,
	pub payload: &'a [u8],
	pub payload_bits: usize,
}

/// Append one frame (header + payload, with fragment sub-header if `fragment` is set) to `buf`.
/// Returns `false` without writing anything if doing so would exceed `current_mtu`.
pub fn pack(buf: &mut Vec<u8>, frame: Frame<'_>, fragment: Option<&FragmentInfo>, current_mtu: usize) -> bool {
	let mut sub_header = BitBuffer::new();
	if let Some(info) = fragment {
		sub_header.write_varuint64(info.group as u64);
		sub_header.write_varuint64(info.total_bits as u64);
		sub_header.write_varuint64(info.chunk_byte_size as u64);
		sub_header.write_varuint64(info.chunk_number as u64);
	}
	let sub_header = sub_header.into_bytes();

	let framed_len = FRAME_HEADER_LEN + sub_header.len() + frame.payload.len();
	if buf.len() + framed_len > current_mtu {
		return false;
	}

	let seq = frame.sequence & 0x7FFF;
	buf.push(frame.message_type);
	buf.push((((seq & 0x7F) as u8) << 1) | (frame.is_fragment as u8));
	buf.push((seq >> 7) as u8);

	let bit_len = (frame.payload_bits + sub_header.len() * 8) as u16;
	buf.extend_from_slice(&bit_len.to_le_bytes());
	buf.extend_from_slice(&sub_header);
	buf.extend_from_slice(frame.payload);

	true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpackError {
	Truncated,
}

pub struct Unpacked {
	pub message_type: u8,
	pub sequence: u16,
	pub is_fragment: bool,
	pub fragment: Option<FragmentInfo>,
	pub payload: Vec<u8>,
	pub payload_bits: usize,
}

/// Parse one frame starting at `datagram[*offset]`, advancing `offset` past it.
pub fn unpack(datagram: &[u8], offset: &mut usize) -> Result<Unpacked, UnpackError> {
	if datagram.len() < *offset + FRAME_HEADER_LEN {
		return Err(UnpackError::Truncated);
	}

	let header = &datagram[*offset..*offset + FRAME_HEADER_LEN];
	let message_type = header[0];
	let is_fragment = header[1] & 1 != 0;
	let seq_low = (header[1] >> 1) as u16;
	let seq_high = header[2] as u16;
	let sequence = seq_low | (seq_high << 7);
	let bit_len = u16::from_le_bytes([header[3], header[4]]) as usize;
	let byte_len = (bit_len + 7) / 8;

	*offset += FRAME_HEADER_LEN;

	if datagram.len() < *offset + byte_len {
		return Err(UnpackError::Truncated);
	}

	let mut body = BitBuffer::from_bytes(datagram[*offset..*offset + byte_len].to_vec(), bit_len);
	*offset += byte_len;

	let fragment = if is_fragment {
		let group = body.read_varuint64().map_err(|_| UnpackError::Truncated)? as u16;
		let total_bits = body.read_varuint64().map_err(|_| UnpackError::Truncated)? as usize;
		let chunk_byte_size = body.read_varuint64().map_err(|_| UnpackError::Truncated)? as usize;
		let chunk_number = body.read_varuint64().map_err(|_| UnpackError::Truncated)? as u32;
		Some(FragmentInfo { group, total_bits, chunk_byte_size, chunk_number })
	} else {
		None
	};

	let payload_bits = body.remaining_bits();
	let mut payload = vec![0u8; (payload_bits + 7) / 8];
	if payload_bits > 0 {
		body.read_bits(&mut payload, payload_bits).map_err(|_| UnpackError::Truncated)?;
	}

	Ok(Unpacked { message_type, sequence, is_fragment, fragment, payload, payload_bits })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pack_unpack_round_trip_unfragmented() {
		let mut datagram = Vec::new();
		let payload = [1u8, 2, 3, 4];

		let ok = pack(
			&mut datagram,
			Frame { message_type: 42, sequence: 513, is_fragment: false, payload: &payload, payload_bits: 32 },
			None,
			1408,
		);
		assert!(ok);

		let mut offset = 0;
		let parsed = unpack(&datagram, &mut offset).unwrap();
		assert_eq!(parsed.message_type, 42);
		assert_eq!(parsed.sequence, 513);
		assert!(!parsed.is_fragment);
		assert_eq!(parsed.payload, payload);
		assert_eq!(offset, datagram.len());
	}

	#[test]
	fn pack_unpack_round_trip_fragmented() {
		let mut datagram = Vec::new();
		let payload = [9u8; 10];
		let info = FragmentInfo { group: 7, total_bits: 400, chunk_byte_size: 10, chunk_number: 2 };

		pack(
			&mut datagram,
			Frame { message_type: 5, sequence: 1, is_fragment: true, payload: &payload, payload_bits: 80 },
			Some(&info),
			1408,
		);

		let mut offset = 0;
		let parsed = unpack(&datagram, &mut offset).unwrap();
		assert!(parsed.is_fragment);
		let frag = parsed.fragment.unwrap();
		assert_eq!(frag.group, 7);
		assert_eq!(frag.total_bits, 400);
		assert_eq!(frag.chunk_byte_size, 10);
		assert_eq!(frag.chunk_number, 2);
		assert_eq!(parsed.payload, payload);
	}

	#[test]
	fn pack_rejects_when_over_mtu() {
		let mut datagram = vec![0u8; 1400];
		let payload = [0u8; 100];

		let ok = pack(
			&mut datagram,
			Frame { message_type: 1, sequence: 0, is_fragment: false, payload: &payload, payload_bits: 800 },
			None,
			1408,
		);
		assert!(!ok);
	}

	#[test]
	fn multiple_frames_pack_into_one_datagram() {
		let mut datagram = Vec::new();
		let a = [1u8, 2];
		let b = [3u8, 4, 5];

		pack(&mut datagram, Frame { message_type: 1, sequence: 0, is_fragment: false, payload: &a, payload_bits: 16 }, None, 1408);
		pack(&mut datagram, Frame { message_type: 2, sequence: 1, is_fragment: false, payload: &b, payload_bits: 24 }, None, 1408);

		let mut offset = 0;
		let first = unpack(&datagram, &mut offset).unwrap();
		assert_eq!(first.payload, a);
		let second = unpack(&datagram, &mut offset).unwrap();
		assert_eq!(second.payload, b);
		assert_eq!(offset, datagram.len());
	}
}
