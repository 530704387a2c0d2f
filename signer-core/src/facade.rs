//! Unifies `ThresholdSigner` and `LocalSingleSigner` behind one trait so the
//! sentry connector (§4.C) doesn't need to know which `sign_mode` is active.

use async_trait::async_trait;

use crate::chain::{ChainId, SignRequest};
use crate::error::Result;

/// What the connector needs from whichever signing backend is configured.
#[async_trait]
pub trait SigningFacade: Send + Sync {
	/// Admit `request` through the double-sign guard and, if admitted, drive
	/// it to a signature. Returns `(signed_bytes actually signed, signature)`
	/// — the signed bytes may have their timestamp rewritten for a
	/// timestamp-only replay (spec §4.E).
	async fn sign(&self, request: SignRequest) -> Result<(Vec<u8>, Vec<u8>)>;

	/// The public key for `chain_id`, for `PubKeyRequest`.
	async fn public_key(&self, chain_id: &ChainId) -> Result<Vec<u8>>;
}
