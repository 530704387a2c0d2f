//! Length-prefixed, AEAD-sealed framing layered on top of a handshake's
//! `SessionKeys` (spec §4.A). Each frame is a 4-byte big-endian length
//! followed by a `ChaCha20Poly1305` ciphertext; the nonce is a per-direction
//! monotonic counter so it never repeats for the lifetime of a session.

use std::sync::atomic::{AtomicU64, Ordering};

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};

use crate::error::{Result, SignerError};
use crate::transport::handshake::SessionKeys;

/// Frames larger than this are rejected before any allocation, bounding the
/// damage a hostile or buggy peer can do with a bogus length prefix.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

fn nonce_from_counter(counter: u64) -> Nonce {
	let mut bytes = [0u8; 12];
	bytes[4..].copy_from_slice(&counter.to_be_bytes());
	Nonce::from(bytes)
}

/// One direction of a sealed channel: either the sender or the receiver side.
/// Two of these (one per direction) make up a full duplex session.
pub struct SealedChannel {
	send_cipher: ChaCha20Poly1305,
	recv_cipher: ChaCha20Poly1305,
	send_counter: AtomicU64,
	recv_counter: AtomicU64,
}

impl SealedChannel {
	pub fn new(keys: SessionKeys) -> Self {
		let send_cipher = ChaCha20Poly1305::new((&keys.send_key).into());
		let recv_cipher = ChaCha20Poly1305::new((&keys.recv_key).into());
		SealedChannel {
			send_cipher,
			recv_cipher,
			send_counter: AtomicU64::new(0),
			recv_counter: AtomicU64::new(0),
		}
	}

	/// Seal `plaintext` into a length-prefixed frame ready to write to the
	/// wire.
	pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
		let counter = self.send_counter.fetch_add(1, Ordering::SeqCst);
		let nonce = nonce_from_counter(counter);
		let ciphertext = self
			.send_cipher
			.encrypt(&nonce, plaintext)
			.map_err(|_| SignerError::Transport("frame encryption failed".into()))?;

		if ciphertext.len() > MAX_FRAME_LEN {
			return Err(SignerError::Transport("outbound frame exceeds maximum length".into()));
		}

		let mut framed = Vec::with_capacity(4 + ciphertext.len());
		framed.extend_from_slice(&(ciphertext.len() as u32).to_be_bytes());
		framed.extend_from_slice(&ciphertext);
		Ok(framed)
	}

	/// Open a ciphertext previously read off the wire (length prefix already
	/// stripped by the caller).
	pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
		if ciphertext.len() > MAX_FRAME_LEN {
			return Err(SignerError::Transport("inbound frame exceeds maximum length".into()));
		}
		let counter = self.recv_counter.fetch_add(1, Ordering::SeqCst);
		let nonce = nonce_from_counter(counter);
		self.recv_cipher
			.decrypt(&nonce, ciphertext)
			.map_err(|_| SignerError::Transport("frame decryption failed, possible tamper or desync".into()))
	}

	/// Parse a 4-byte big-endian length prefix, returning the payload length
	/// to read next. Callers read exactly that many bytes and pass them to
	/// [`SealedChannel::open`].
	pub fn read_length_prefix(prefix: [u8; 4]) -> Result<usize> {
		let len = u32::from_be_bytes(prefix) as usize;
		if len > MAX_FRAME_LEN {
			return Err(SignerError::Transport("advertised frame length exceeds maximum".into()));
		}
		Ok(len)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn paired_channels() -> (SealedChannel, SealedChannel) {
		let a_to_b = [7u8; 32];
		let b_to_a = [9u8; 32];
		let a = SealedChannel::new(SessionKeys { send_key: a_to_b, recv_key: b_to_a });
		let b = SealedChannel::new(SessionKeys { send_key: b_to_a, recv_key: a_to_b });
		(a, b)
	}

	#[test]
	fn seal_then_open_round_trips() {
		let (a, b) = paired_channels();
		let frame = a.seal(b"sign-vote-request").unwrap();
		let len = SealedChannel::read_length_prefix(frame[0..4].try_into().unwrap()).unwrap();
		let opened = b.open(&frame[4..4 + len]).unwrap();
		assert_eq!(opened, b"sign-vote-request");
	}

	#[test]
	fn tampered_ciphertext_fails_to_open() {
		let (a, b) = paired_channels();
		let mut frame = a.seal(b"payload").unwrap();
		let last = frame.len() - 1;
		frame[last] ^= 0xFF;
		let len = SealedChannel::read_length_prefix(frame[0..4].try_into().unwrap()).unwrap();
		assert!(b.open(&frame[4..4 + len]).is_err());
	}

	#[test]
	fn successive_frames_use_distinct_nonces() {
		let (a, _b) = paired_channels();
		let first = a.seal(b"same-payload").unwrap();
		let second = a.seal(b"same-payload").unwrap();
		assert_ne!(first, second);
	}
}
