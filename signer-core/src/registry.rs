//! Cosigner registry (spec §3): the ordered, static list of `(shard_id,
//! network_address, peer_public_key)` every cosigner loads at startup and
//! uses both to dial peers and to verify inbound peer identities.

use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;
use x25519_dalek::PublicKey as XPublicKey;

/// One cosigner's entry in the cluster configuration.
#[derive(Clone, Debug)]
pub struct CosignerEntry {
	pub shard_id: u32,
	pub p2p_addr: String,
	pub identity_key: VerifyingKey,
	/// Public key this cosigner's nonce shards are ECIES-encrypted to.
	pub ecies_public_key: XPublicKey,
	/// This cosigner's share of the aggregate Ed25519 public key, `Y_i`.
	pub public_key_share: crate::crypto::Point,
}

/// The full cluster membership, keyed by `shard_id`.
#[derive(Clone, Debug, Default)]
pub struct CosignerRegistry {
	entries: BTreeMap<u32, CosignerEntry>,
}

impl CosignerRegistry {
	pub fn new(entries: Vec<CosignerEntry>) -> Self {
		CosignerRegistry { entries: entries.into_iter().map(|e| (e.shard_id, e)).collect() }
	}

	pub fn get(&self, shard_id: u32) -> Option<&CosignerEntry> {
		self.entries.get(&shard_id)
	}

	pub fn shard_ids(&self) -> impl Iterator<Item = u32> + '_ {
		self.entries.keys().copied()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &CosignerEntry> {
		self.entries.values()
	}

	/// The quorum size `⌊N/2⌋ + 1` for this membership, used both for Raft
	/// elections and (combined with the configured `threshold`) cluster
	/// validation.
	pub fn quorum(&self) -> usize {
		self.entries.len() / 2 + 1
	}
}

/// The cluster-wide parameters a signer is started with. Validated once at
/// startup so a misconfigured `threshold` fails fast instead of surfacing as
/// mysterious quorum timeouts later.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
	pub threshold: u8,
	pub registry: CosignerRegistry,
}

impl ClusterConfig {
	/// Enforces `K >= floor(N/2) + 1`: a threshold below quorum would let a
	/// minority of cosigners produce a signature without the rest of the
	/// cluster ever observing the session, defeating the point of
	/// replicating the HWM through Raft.
	pub fn validate(&self) -> crate::error::Result<()> {
		let quorum = self.registry.quorum();
		if (self.threshold as usize) < quorum {
			return Err(crate::error::SignerError::InvalidClusterConfig(format!(
				"threshold {} is below quorum {} for {} cosigners",
				self.threshold,
				quorum,
				self.registry.len()
			)));
		}
		if (self.threshold as usize) > self.registry.len() {
			return Err(crate::error::SignerError::InvalidClusterConfig(format!(
				"threshold {} exceeds cosigner count {}",
				self.threshold,
				self.registry.len()
			)));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key() -> VerifyingKey {
		ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]).verifying_key()
	}

	fn entry(shard_id: u32) -> CosignerEntry {
		let secret = x25519_dalek::StaticSecret::from([shard_id as u8; 32]);
		CosignerEntry {
			shard_id,
			p2p_addr: format!("127.0.0.1:{}", 9000 + shard_id),
			identity_key: key(),
			ecies_public_key: XPublicKey::from(&secret),
			public_key_share: crate::crypto::Point::identity(),
		}
	}

	#[test]
	fn quorum_is_majority_of_membership() {
		let registry = CosignerRegistry::new((1..=5).map(entry).collect());
		assert_eq!(registry.quorum(), 3);
	}
}
