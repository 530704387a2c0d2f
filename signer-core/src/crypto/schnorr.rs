//! FROST-style threshold Schnorr signing over Ed25519 (spec §4.F, §4.H).
//! The challenge/response equations match standard Ed25519 verification
//! exactly (`s*G = R + H(R‖A‖m)*A`), so the aggregate signature this produces
//! is a plain, independently-verifiable Ed25519 signature — cosigners never
//! need a custom verifier. Grounded on `SolCryptoScheme::build_challenge` /
//! `build_response` / `is_party_response_valid` in the teacher crate.

use sha2::{Digest, Sha512};

use super::point::Point;
use super::scalar::Scalar;

/// `H(R ‖ A ‖ m) mod L`, the Ed25519 challenge scalar.
pub fn build_challenge(pubkey: Point, nonce_commitment: Point, message: &[u8]) -> Scalar {
	let mut hasher = Sha512::new();
	hasher.update(nonce_commitment.as_bytes());
	hasher.update(pubkey.as_bytes());
	hasher.update(message);
	let digest: [u8; 64] = hasher.finalize().into();
	Scalar::from_bytes_mod_order_wide(&digest)
}

/// One cosigner's signature share: `s_i = k_i + c * x_i`, where `k_i` is
/// that cosigner's share of the combined nonce and `x_i` is its (Lagrange
/// weighted) share of the aggregate private key.
pub fn build_response(nonce_share: Scalar, private_key_share: Scalar, challenge: Scalar) -> Scalar {
	nonce_share + challenge * private_key_share
}

/// Verify one cosigner's response against its public key share before
/// aggregating (spec §4.H step 6): `s_i * G == R_i + lambda_i * c * Y_i`.
pub fn is_party_response_valid(
	public_key_share: Point,
	lagrange_coefficient: Scalar,
	nonce_commitment_share: Point,
	challenge: Scalar,
	response: Scalar,
) -> bool {
	Point::from_scalar(&response) == nonce_commitment_share + public_key_share * (challenge * lagrange_coefficient)
}

/// Sum the per-cosigner responses into the final Schnorr `s`, then pack with
/// the group nonce commitment `R` into the 64-byte Ed25519 signature
/// `R ‖ s`.
pub fn aggregate_signature(group_commitment: Point, responses: impl IntoIterator<Item = Scalar>) -> [u8; 64] {
	let s = responses.into_iter().fold(Scalar::zero(), |acc, r| acc + r);
	let mut signature = [0u8; 64];
	signature[..32].copy_from_slice(&group_commitment.as_bytes());
	signature[32..].copy_from_slice(&s.to_bytes());
	signature
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn single_party_response_satisfies_verification_equation() {
		let x = Scalar::from(11);
		let y = Point::from_scalar(&x);
		let k = Scalar::from(5);
		let r = Point::from_scalar(&k);

		let challenge = build_challenge(y, r, b"message");
		let s = build_response(k, x, challenge);

		let lambda = Scalar::from(1);
		assert!(is_party_response_valid(y, lambda, r, challenge, s));
	}

	#[test]
	fn wrong_response_fails_verification() {
		let x = Scalar::from(11);
		let y = Point::from_scalar(&x);
		let k = Scalar::from(5);
		let r = Point::from_scalar(&k);
		let challenge = build_challenge(y, r, b"message");

		let bogus = Scalar::from(999);
		assert!(!is_party_response_valid(y, Scalar::from(1), r, challenge, bogus));
	}
}
