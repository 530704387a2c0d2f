//! Authenticated X25519 handshake that derives the session keys for the
//! secret transport (spec §4.A). Each peer proves its long-term Ed25519
//! identity by signing the ephemeral-key transcript; the shared secret from
//! the X25519 exchange is then expanded with HKDF-SHA256 into independent
//! send/receive `ChaCha20Poly1305` keys, one per direction.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey as XPublicKey};
use zeroize::Zeroize;

use crate::error::{Result, SignerError};

pub const HANDSHAKE_INFO: &[u8] = b"threshold-signer secret-transport v1";

/// A peer's long-term identity: an Ed25519 keypair used only to sign the
/// handshake transcript, never to sign application data.
pub struct Identity {
	signing_key: SigningKey,
}

impl Identity {
	pub fn from_signing_key(signing_key: SigningKey) -> Self {
		Identity { signing_key }
	}

	pub fn public_key(&self) -> VerifyingKey {
		self.signing_key.verifying_key()
	}

	fn sign_transcript(&self, transcript: &[u8]) -> [u8; 64] {
		self.signing_key.sign(transcript).to_bytes()
	}
}

/// Keys derived once the handshake completes. Zeroed on drop so a compromise
/// of process memory after a connection closes doesn't leak past sessions.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SessionKeys {
	pub send_key: [u8; 32],
	pub recv_key: [u8; 32],
}

/// Run the initiator side of the handshake over an already-connected byte
/// stream abstraction: send our ephemeral key + signature, receive the
/// peer's, derive session keys. `write`/`read` are injected so this can be
/// tested without a real socket.
pub async fn initiate(
	identity: &Identity,
	expected_peer: &VerifyingKey,
	write: impl FnOnce(Vec<u8>) -> futures::future::BoxFuture<'static, std::io::Result<()>>,
	read: impl FnOnce() -> futures::future::BoxFuture<'static, std::io::Result<Vec<u8>>>,
) -> Result<SessionKeys> {
	let ephemeral = EphemeralSecret::random_from_rng(OsRng);
	let ephemeral_pub = XPublicKey::from(&ephemeral);

	let our_sig = identity.sign_transcript(ephemeral_pub.as_bytes());
	let hello = HandshakeMessage {
		ephemeral_pub: *ephemeral_pub.as_bytes(),
		identity_pub: identity.public_key().to_bytes(),
		signature: our_sig,
	};
	write(hello.encode())
		.await
		.map_err(|e| SignerError::Transport(format!("handshake write: {e}")))?;

	let peer_bytes =
		read().await.map_err(|e| SignerError::Transport(format!("handshake read: {e}")))?;
	let peer_hello = HandshakeMessage::decode(&peer_bytes)?;

	if peer_hello.identity_pub != expected_peer.to_bytes() {
		return Err(SignerError::Transport("peer identity does not match configured registry".into()));
	}

	let peer_verifying = VerifyingKey::from_bytes(&peer_hello.identity_pub)
		.map_err(|e| SignerError::Transport(format!("invalid peer identity key: {e}")))?;
	peer_verifying
		.verify(&peer_hello.ephemeral_pub, &ed25519_dalek::Signature::from_bytes(&peer_hello.signature))
		.map_err(|_| SignerError::Transport("handshake signature verification failed".into()))?;

	let peer_ephemeral_pub = XPublicKey::from(peer_hello.ephemeral_pub);
	let shared_secret = ephemeral.diffie_hellman(&peer_ephemeral_pub);

	Ok(derive_session_keys(shared_secret.as_bytes(), true))
}

/// Responder side, mirroring `initiate` with the initiator/responder roles
/// swapped for key derivation (the two sides must land on the same pair of
/// send/recv keys with directions swapped).
pub async fn respond(
	identity: &Identity,
	expected_peer: &VerifyingKey,
	write: impl FnOnce(Vec<u8>) -> futures::future::BoxFuture<'static, std::io::Result<()>>,
	read: impl FnOnce() -> futures::future::BoxFuture<'static, std::io::Result<Vec<u8>>>,
) -> Result<SessionKeys> {
	let peer_bytes =
		read().await.map_err(|e| SignerError::Transport(format!("handshake read: {e}")))?;
	let peer_hello = HandshakeMessage::decode(&peer_bytes)?;

	if peer_hello.identity_pub != expected_peer.to_bytes() {
		return Err(SignerError::Transport("peer identity does not match configured registry".into()));
	}
	let peer_verifying = VerifyingKey::from_bytes(&peer_hello.identity_pub)
		.map_err(|e| SignerError::Transport(format!("invalid peer identity key: {e}")))?;
	peer_verifying
		.verify(&peer_hello.ephemeral_pub, &ed25519_dalek::Signature::from_bytes(&peer_hello.signature))
		.map_err(|_| SignerError::Transport("handshake signature verification failed".into()))?;

	let ephemeral = EphemeralSecret::random_from_rng(OsRng);
	let ephemeral_pub = XPublicKey::from(&ephemeral);
	let our_sig = identity.sign_transcript(ephemeral_pub.as_bytes());
	let hello = HandshakeMessage {
		ephemeral_pub: *ephemeral_pub.as_bytes(),
		identity_pub: identity.public_key().to_bytes(),
		signature: our_sig,
	};
	write(hello.encode())
		.await
		.map_err(|e| SignerError::Transport(format!("handshake write: {e}")))?;

	let peer_ephemeral_pub = XPublicKey::from(peer_hello.ephemeral_pub);
	let shared_secret = ephemeral.diffie_hellman(&peer_ephemeral_pub);

	Ok(derive_session_keys(shared_secret.as_bytes(), false))
}

/// Responder side, like `respond`, but accepting the initiator's identity as
/// any of `acceptable_peers` rather than one pinned key. Used by the cosigner
/// peer server, which accepts inbound connections from any of the other
/// registered cosigners and doesn't know in advance which one is dialing.
/// Returns the matched peer's key alongside the derived session keys.
pub async fn respond_any(
	identity: &Identity,
	acceptable_peers: &[VerifyingKey],
	write: impl FnOnce(Vec<u8>) -> futures::future::BoxFuture<'static, std::io::Result<()>>,
	read: impl FnOnce() -> futures::future::BoxFuture<'static, std::io::Result<Vec<u8>>>,
) -> Result<(SessionKeys, VerifyingKey)> {
	let peer_bytes = read().await.map_err(|e| SignerError::Transport(format!("handshake read: {e}")))?;
	let peer_hello = HandshakeMessage::decode(&peer_bytes)?;

	if !acceptable_peers.iter().any(|k| k.to_bytes() == peer_hello.identity_pub) {
		return Err(SignerError::Transport("peer identity does not match configured registry".into()));
	}
	let peer_verifying = VerifyingKey::from_bytes(&peer_hello.identity_pub)
		.map_err(|e| SignerError::Transport(format!("invalid peer identity key: {e}")))?;
	peer_verifying
		.verify(&peer_hello.ephemeral_pub, &ed25519_dalek::Signature::from_bytes(&peer_hello.signature))
		.map_err(|_| SignerError::Transport("handshake signature verification failed".into()))?;

	let ephemeral = EphemeralSecret::random_from_rng(OsRng);
	let ephemeral_pub = XPublicKey::from(&ephemeral);
	let our_sig = identity.sign_transcript(ephemeral_pub.as_bytes());
	let hello = HandshakeMessage {
		ephemeral_pub: *ephemeral_pub.as_bytes(),
		identity_pub: identity.public_key().to_bytes(),
		signature: our_sig,
	};
	write(hello.encode()).await.map_err(|e| SignerError::Transport(format!("handshake write: {e}")))?;

	let peer_ephemeral_pub = XPublicKey::from(peer_hello.ephemeral_pub);
	let shared_secret = ephemeral.diffie_hellman(&peer_ephemeral_pub);

	Ok((derive_session_keys(shared_secret.as_bytes(), false), peer_verifying))
}

fn derive_session_keys(shared_secret: &[u8; 32], is_initiator: bool) -> SessionKeys {
	let hk = Hkdf::<Sha256>::new(None, shared_secret);
	let mut a_to_b = [0u8; 32];
	let mut b_to_a = [0u8; 32];
	hk.expand(&[HANDSHAKE_INFO, b":a->b"].concat(), &mut a_to_b)
		.expect("32 bytes is a valid HKDF output length");
	hk.expand(&[HANDSHAKE_INFO, b":b->a"].concat(), &mut b_to_a)
		.expect("32 bytes is a valid HKDF output length");

	if is_initiator {
		SessionKeys { send_key: a_to_b, recv_key: b_to_a }
	} else {
		SessionKeys { send_key: b_to_a, recv_key: a_to_b }
	}
}

struct HandshakeMessage {
	ephemeral_pub: [u8; 32],
	identity_pub: [u8; 32],
	signature: [u8; 64],
}

impl HandshakeMessage {
	fn encode(&self) -> Vec<u8> {
		let mut buf = Vec::with_capacity(32 + 32 + 64);
		buf.extend_from_slice(&self.ephemeral_pub);
		buf.extend_from_slice(&self.identity_pub);
		buf.extend_from_slice(&self.signature);
		buf
	}

	fn decode(bytes: &[u8]) -> Result<Self> {
		if bytes.len() != 128 {
			return Err(SignerError::Decode(format!(
				"handshake message wrong length: {}",
				bytes.len()
			)));
		}
		let mut ephemeral_pub = [0u8; 32];
		let mut identity_pub = [0u8; 32];
		let mut signature = [0u8; 64];
		ephemeral_pub.copy_from_slice(&bytes[0..32]);
		identity_pub.copy_from_slice(&bytes[32..64]);
		signature.copy_from_slice(&bytes[64..128]);
		Ok(HandshakeMessage { ephemeral_pub, identity_pub, signature })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::FutureExt;
	use rand_core::OsRng as OsRng2;

	#[tokio::test]
	async fn handshake_derives_matching_keys() {
		let initiator_identity = Identity::from_signing_key(SigningKey::generate(&mut OsRng2));
		let responder_identity = Identity::from_signing_key(SigningKey::generate(&mut OsRng2));

		let (init_tx, resp_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();
		let (resp_tx, init_rx) = tokio::sync::oneshot::channel::<Vec<u8>>();

		let initiator_pub = initiator_identity.public_key();
		let responder_pub = responder_identity.public_key();

		let initiator_fut = initiate(
			&initiator_identity,
			&responder_pub,
			|bytes| async move { init_tx.send(bytes).map_err(|_| std::io::Error::other("closed")) }.boxed(),
			|| async move { init_rx.await.map_err(|_| std::io::Error::other("closed")) }.boxed(),
		);

		let responder_fut = respond(
			&responder_identity,
			&initiator_pub,
			|bytes| async move { resp_tx.send(bytes).map_err(|_| std::io::Error::other("closed")) }.boxed(),
			|| async move { resp_rx.await.map_err(|_| std::io::Error::other("closed")) }.boxed(),
		);

		let (init_keys, resp_keys) = tokio::join!(initiator_fut, responder_fut);
		let init_keys = init_keys.unwrap();
		let resp_keys = resp_keys.unwrap();

		assert_eq!(init_keys.send_key, resp_keys.recv_key);
		assert_eq!(init_keys.recv_key, resp_keys.send_key);
	}
}
