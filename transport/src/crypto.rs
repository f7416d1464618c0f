//! Pluggable pre-send encryption / post-receive decryption hook (spec §4.H).
//!
//! The transport only defines the wire shape around the cipher output; concrete algorithms are
//! an external collaborator (spec §1 "Deliberately OUT of scope").

/// Implemented by the embedding application to supply a concrete symmetric cipher. `encrypt`
/// takes ownership of the plaintext bytes and returns ciphertext of any length; `decrypt` is the
/// inverse and returns `None` on authentication/format failure.
pub trait Cipher: Send + Sync {
	fn encrypt(&self, plaintext: &[u8]) -> Vec<u8>;
	fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>>;
}

/// No-op cipher used when encryption is disabled; ships the plaintext unchanged.
pub struct NullCipher;

impl Cipher for NullCipher {
	fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
		plaintext.to_vec()
	}

	fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
		Some(ciphertext.to_vec())
	}
}

/// Tile/XOR-fold `seed` into exactly `len` bytes, used to derive a cipher's key/IV from a
/// caller-supplied byte sequence of arbitrary length (spec §4.H "tiling/XOR-folding").
#[must_use]
pub fn derive_key(seed: &[u8], len: usize) -> Vec<u8> {
	if seed.is_empty() {
		return vec![0; len];
	}

	let mut out = vec![0u8; len];
	for (i, slot) in out.iter_mut().enumerate() {
		*slot = seed[i % seed.len()] ^ seed[(i / seed.len().max(1)) % seed.len()];
	}
	out
}

use crate::bits::BitBuffer;

/// Wrap `plaintext` (with its original bit length) as `varuint(plain_bit_length) || ciphertext`.
#[must_use]
pub fn encrypt_message(cipher: &dyn Cipher, plain_bit_length: usize, plaintext: &[u8]) -> Vec<u8> {
	let mut buf = BitBuffer::new();
	buf.write_varuint64(plain_bit_length as u64);

	let mut out = buf.into_bytes();
	out.extend(cipher.encrypt(plaintext));
	out
}

/// Inverse of [`encrypt_message`]: returns `(plaintext_bytes, plain_bit_length)`.
#[must_use]
pub fn decrypt_message(cipher: &dyn Cipher, wire: &[u8]) -> Option<(Vec<u8>, usize)> {
	let mut buf = BitBuffer::from_bytes(wire.to_vec(), wire.len() * 8);
	let plain_bit_length = buf.read_varuint64().ok()? as usize;

	let header_bytes = buf.bit_position() / 8;
	let ciphertext = &wire[header_bytes..];

	let plaintext = cipher.decrypt(ciphertext)?;
	Some((plaintext, plain_bit_length))
}

#[cfg(test)]
mod tests {
	use super::*;

	struct XorCipher(u8);

	impl Cipher for XorCipher {
		fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
			plaintext.iter().map(|b| b ^ self.0).collect()
		}

		fn decrypt(&self, ciphertext: &[u8]) -> Option<Vec<u8>> {
			Some(ciphertext.iter().map(|b| b ^ self.0).collect())
		}
	}

	#[test]
	fn round_trips_through_wire_shape() {
		let cipher = XorCipher(0x5A);
		let plaintext = b"hello fragment";

		let wire = encrypt_message(&cipher, plaintext.len() * 8, plaintext);
		let (decoded, bit_length) = decrypt_message(&cipher, &wire).unwrap();

		assert_eq!(bit_length, plaintext.len() * 8);
		assert_eq!(decoded, plaintext);
	}

	#[test]
	fn derive_key_is_deterministic_and_correct_length() {
		let a = derive_key(b"seedvalue", 32);
		let b = derive_key(b"seedvalue", 32);
		assert_eq!(a, b);
		assert_eq!(a.len(), 32);
	}

	#[test]
	fn null_cipher_is_identity() {
		let cipher = NullCipher;
		assert_eq!(cipher.decrypt(&cipher.encrypt(b"abc")).unwrap(), b"abc");
	}
}
