//! Shamir `K`-of-`N` secret sharing over the Ed25519 scalar field, and the
//! Lagrange interpolation used both to reconstruct shares and to combine
//! partial Schnorr signatures (spec §4.F, §4.H). Grounded on
//! `get_lagrange_coeff` in the signing-detail module this crate's FROST-style
//! aggregation is modeled on.

use std::collections::BTreeSet;

use rand_core::RngCore;

use super::scalar::Scalar;

/// One party's share of a secret: `(index, value)` where `index` is the
/// party's 1-based shard id (never 0 — that's the secret itself).
#[derive(Clone, Copy, Debug)]
pub struct Share {
	pub index: u32,
	pub value: Scalar,
}

/// Split `secret` into `n` shares such that any `k` of them reconstruct it,
/// using a random degree-`(k-1)` polynomial with `secret` as the constant
/// term, evaluated at `1..=n`.
pub fn split(secret: Scalar, k: u8, n: u8, rng: &mut impl RngCore) -> Vec<Share> {
	assert!(k >= 1 && k <= n, "threshold must be between 1 and the number of shards");

	let mut coefficients = vec![secret];
	for _ in 1..k {
		coefficients.push(Scalar::random(rng));
	}

	(1..=n)
		.map(|index| Share { index: index as u32, value: evaluate(&coefficients, index as u32) })
		.collect()
}

fn evaluate(coefficients: &[Scalar], x: u32) -> Scalar {
	let x = Scalar::from(x);
	let mut acc = Scalar::zero();
	for coeff in coefficients.iter().rev() {
		acc = acc * x + *coeff;
	}
	acc
}

/// The Lagrange coefficient `lambda_i` for `signer_index` within the set
/// `all_signer_indices`, i.e. the weight that turns `signer_index`'s share
/// into its contribution to the secret at `x = 0`.
pub fn lagrange_coefficient(signer_index: u32, all_signer_indices: &BTreeSet<u32>) -> Scalar {
	let mut num = Scalar::from(1);
	let mut den = Scalar::from(1);

	for &j in all_signer_indices {
		if j == signer_index {
			continue;
		}
		let j = Scalar::from(j);
		let i = Scalar::from(signer_index);
		num = num * j;
		den = den * (j - i);
	}

	num * den.invert().expect("shard indices are unique and nonzero by construction")
}

/// Reconstruct the secret from `k` or more shares via Lagrange interpolation
/// at `x = 0`. Only used in tests and recovery tooling; the signing path
/// never reconstructs the full secret, only the aggregate signature.
pub fn reconstruct(shares: &[Share]) -> Scalar {
	let indices: BTreeSet<u32> = shares.iter().map(|s| s.index).collect();
	shares
		.iter()
		.map(|s| lagrange_coefficient(s.index, &indices) * s.value)
		.fold(Scalar::zero(), |acc, term| acc + term)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::OsRng;

	#[test]
	fn any_k_of_n_shares_reconstruct_the_secret() {
		let secret = Scalar::from(424242);
		let shares = split(secret, 2, 3, &mut OsRng);

		let subset_a = vec![shares[0], shares[1]];
		let subset_b = vec![shares[0], shares[2]];
		let subset_c = vec![shares[1], shares[2]];

		assert_eq!(reconstruct(&subset_a).to_bytes(), secret.to_bytes());
		assert_eq!(reconstruct(&subset_b).to_bytes(), secret.to_bytes());
		assert_eq!(reconstruct(&subset_c).to_bytes(), secret.to_bytes());
	}

	#[test]
	fn lagrange_coefficient_is_one_for_a_single_party() {
		let indices: BTreeSet<u32> = [1].into_iter().collect();
		assert_eq!(lagrange_coefficient(1, &indices).to_bytes(), Scalar::from(1).to_bytes());
	}
}
