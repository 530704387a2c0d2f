//! Local single-key signer (spec §4.J): the non-threshold fallback. Same
//! double-sign guard and durable store as the threshold path, but signs
//! directly with a full Ed25519 private key instead of running a FROST
//! session — no peers, no Raft, no nonce exchange.

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};

use crate::chain::{ChainId, SignRequest};
use crate::error::Result;
use crate::facade::SigningFacade;
use crate::guard::{Classification, DoubleSignGuard};
use crate::hwm::HighWaterMark;
use crate::session::SessionTable;
use crate::store::SignStateStore;

pub struct LocalSingleSigner {
	signing_key: SigningKey,
	guard: DoubleSignGuard,
	store: SignStateStore,
	sessions: SessionTable,
}

impl LocalSingleSigner {
	pub fn new(signing_key: SigningKey, store: SignStateStore) -> Self {
		LocalSingleSigner { signing_key, guard: DoubleSignGuard::new(), store, sessions: SessionTable::new() }
	}

	pub fn metrics(&self) -> &crate::guard::GuardMetrics {
		self.guard.metrics()
	}
}

#[async_trait]
impl SigningFacade for LocalSingleSigner {
	async fn sign(&self, request: SignRequest) -> Result<(Vec<u8>, Vec<u8>)> {
		let session_key = request.session_key();
		let lock = self.sessions.lock_for(session_key.clone()).await;
		let _session_guard = lock.lock().await;

		let hwm = self.store.load(&request.chain_id).await?;
		let result = match self.guard.classify(&request, hwm.as_ref()) {
			Classification::Replay { signature }
			| Classification::ReplayWithStoredTimestamp { signature } => {
				let hwm = hwm.expect("a Replay classification implies a stored HWM");
				Ok((hwm.signed_bytes, signature))
			}
			Classification::RejectBeyondBlock => Err(crate::error::SignerError::BeyondBlock(format!(
				"{:?} is at or below the stored high-water mark",
				request.position
			))),
			Classification::RejectConflicting => Err(crate::error::SignerError::ConflictingData(format!(
				"{:?} conflicts with the stored high-water mark",
				request.position
			))),
			Classification::Sign => {
				let signature = self.signing_key.sign(&request.signed_bytes);
				let new_hwm = HighWaterMark {
					position: request.position,
					signed_bytes: request.signed_bytes.clone(),
					signature: signature.to_bytes().to_vec(),
				};
				self.store.commit(&request.chain_id, &new_hwm).await?;
				Ok((request.signed_bytes.clone(), signature.to_bytes().to_vec()))
			}
		};

		self.sessions.remove(&session_key).await;
		result
	}

	async fn public_key(&self, _chain_id: &ChainId) -> Result<Vec<u8>> {
		Ok(self.signing_key.verifying_key().to_bytes().to_vec())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::{SignKind, SignPosition};

	fn request(height: u64, bytes: Vec<u8>) -> SignRequest {
		SignRequest {
			chain_id: "test-chain".into(),
			position: SignPosition { height, round: 0, kind: SignKind::Prevote },
			signed_bytes: bytes,
			timestamp_seconds: 0,
			timestamp_nanos: 0,
		}
	}

	#[tokio::test]
	async fn signs_and_the_signature_verifies_against_the_public_key() {
		let dir = tempfile::tempdir().unwrap();
		let signing_key = SigningKey::from_bytes(&[3u8; 32]);
		let signer = LocalSingleSigner::new(signing_key, SignStateStore::new(dir.path()));

		let (signed_bytes, signature) = signer.sign(request(10, vec![1, 2, 3, 4])).await.unwrap();
		let public_key = signer.public_key(&"test-chain".to_string()).await.unwrap();

		let verifying_key =
			ed25519_dalek::VerifyingKey::from_bytes(&public_key.try_into().unwrap()).unwrap();
		let sig = ed25519_dalek::Signature::from_bytes(&signature.try_into().unwrap());
		assert!(ed25519_dalek::Verifier::verify(&verifying_key, &signed_bytes, &sig).is_ok());
	}

	#[tokio::test]
	async fn beyond_block_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let signing_key = SigningKey::from_bytes(&[3u8; 32]);
		let signer = LocalSingleSigner::new(signing_key, SignStateStore::new(dir.path()));

		signer.sign(request(10, vec![1])).await.unwrap();
		let err = signer.sign(request(9, vec![2])).await.unwrap_err();
		assert!(matches!(err, crate::error::SignerError::BeyondBlock(_)));
	}

	#[tokio::test]
	async fn exact_replay_returns_the_stored_signature() {
		let dir = tempfile::tempdir().unwrap();
		let signing_key = SigningKey::from_bytes(&[3u8; 32]);
		let signer = LocalSingleSigner::new(signing_key, SignStateStore::new(dir.path()));

		let (_, first_signature) = signer.sign(request(10, vec![1, 2, 3])).await.unwrap();
		let (_, second_signature) = signer.sign(request(10, vec![1, 2, 3])).await.unwrap();
		assert_eq!(first_signature, second_signature);
	}
}
