//! Single-shot ECIES over X25519, used to encrypt a nonce shard to the
//! cosigner it belongs to (spec §4.F: "the cosigner encrypts each shard
//! `k_i,j` to cosigner `j`'s ECIES public key"). Each call generates a fresh
//! ephemeral key, so a fixed zero nonce for the AEAD is safe — the key is
//! never reused.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::error::{Result, SignerError};

const ECIES_INFO: &[u8] = b"threshold-signer nonce-shard-ecies v1";
const ZERO_NONCE: [u8; 12] = [0u8; 12];

/// Encrypt `plaintext` to `recipient_pub`. Output is `ephemeral_pub (32
/// bytes) ‖ ciphertext`.
pub fn encrypt(recipient_pub: &PublicKey, plaintext: &[u8]) -> Vec<u8> {
	let ephemeral = EphemeralSecret::random_from_rng(OsRng);
	let ephemeral_pub = PublicKey::from(&ephemeral);
	let shared = ephemeral.diffie_hellman(recipient_pub);

	let cipher = derive_cipher(shared.as_bytes());
	let ciphertext = cipher
		.encrypt(Nonce::from_slice(&ZERO_NONCE), plaintext)
		.expect("chacha20poly1305 encryption with a fresh key cannot fail");

	let mut out = Vec::with_capacity(32 + ciphertext.len());
	out.extend_from_slice(ephemeral_pub.as_bytes());
	out.extend_from_slice(&ciphertext);
	out
}

/// Decrypt a blob produced by [`encrypt`] using the recipient's static
/// secret key.
pub fn decrypt(recipient_secret: &StaticSecret, blob: &[u8]) -> Result<Vec<u8>> {
	if blob.len() < 32 {
		return Err(SignerError::Decode("ECIES blob shorter than an ephemeral public key".into()));
	}
	let mut ephemeral_pub_bytes = [0u8; 32];
	ephemeral_pub_bytes.copy_from_slice(&blob[..32]);
	let ephemeral_pub = PublicKey::from(ephemeral_pub_bytes);

	let shared = recipient_secret.diffie_hellman(&ephemeral_pub);
	let cipher = derive_cipher(shared.as_bytes());

	cipher
		.decrypt(Nonce::from_slice(&ZERO_NONCE), &blob[32..])
		.map_err(|_| SignerError::Decode("ECIES decryption failed".into()))
}

fn derive_cipher(shared_secret: &[u8; 32]) -> ChaCha20Poly1305 {
	let hk = Hkdf::<Sha256>::new(None, shared_secret);
	let mut key = [0u8; 32];
	hk.expand(ECIES_INFO, &mut key).expect("32 bytes is a valid HKDF output length");
	ChaCha20Poly1305::new((&key).into())
}
