//! Scalar arithmetic over the Ed25519 group order, wrapping
//! `curve25519_dalek::scalar::Scalar` the way the curve25519 modules this is
//! grounded on wrap it: a thin newtype with `Ord` over the encoded bytes (so
//! scalars can live in `BTreeMap` keys) and zeroization on drop.

use std::ops::{Add, Mul, Sub};

use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct Scalar(curve25519_dalek::scalar::Scalar);

impl Scalar {
	pub fn random(rng: &mut impl RngCore) -> Self {
		let mut bytes = [0u8; 64];
		rng.fill_bytes(&mut bytes);
		Scalar(curve25519_dalek::scalar::Scalar::from_bytes_mod_order_wide(&bytes))
	}

	pub fn zero() -> Self {
		Scalar(curve25519_dalek::scalar::Scalar::ZERO)
	}

	pub fn from_bytes_mod_order_wide(bytes: &[u8; 64]) -> Self {
		Scalar(curve25519_dalek::scalar::Scalar::from_bytes_mod_order_wide(bytes))
	}

	/// Decode 32 bytes already known to be a valid scalar encoding (e.g. a
	/// Shamir shard round-tripped through the wire), reducing mod the group
	/// order defensively rather than trusting the wire.
	pub fn from_bytes_mod_order(bytes: &[u8; 32]) -> Self {
		Scalar(curve25519_dalek::scalar::Scalar::from_bytes_mod_order(*bytes))
	}

	pub fn to_bytes(&self) -> [u8; 32] {
		self.0.to_bytes()
	}

	pub fn invert(&self) -> Option<Self> {
		if self.0 == curve25519_dalek::scalar::Scalar::ZERO {
			None
		} else {
			Some(Scalar(self.0.invert()))
		}
	}

	pub(crate) fn inner(&self) -> curve25519_dalek::scalar::Scalar {
		self.0
	}
}

impl From<u32> for Scalar {
	fn from(value: u32) -> Self {
		Scalar(curve25519_dalek::scalar::Scalar::from(value))
	}
}

impl Add for Scalar {
	type Output = Scalar;
	fn add(self, rhs: Scalar) -> Scalar {
		Scalar(self.0 + rhs.0)
	}
}

impl Sub for Scalar {
	type Output = Scalar;
	fn sub(self, rhs: Scalar) -> Scalar {
		Scalar(self.0 - rhs.0)
	}
}

impl Mul for Scalar {
	type Output = Scalar;
	fn mul(self, rhs: Scalar) -> Scalar {
		Scalar(self.0 * rhs.0)
	}
}

impl Ord for Scalar {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.to_bytes().cmp(&other.to_bytes())
	}
}

impl PartialOrd for Scalar {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn zero_has_no_inverse() {
		assert!(Scalar::zero().invert().is_none());
	}

	#[test]
	fn addition_matches_inner_curve25519_dalek_scalar() {
		let a = Scalar::from(3);
		let b = Scalar::from(4);
		assert_eq!((a + b).to_bytes(), Scalar::from(7).to_bytes());
	}
}
