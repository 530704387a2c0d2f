//! Edwards curve points, wrapping `curve25519_dalek::edwards::EdwardsPoint`
//! the way `crypto/curve25519/edwards.rs` wraps it in the teacher crate.

use std::ops::{Add, Mul, Sub};

use curve25519_dalek::traits::Identity;
use serde::{Deserialize, Serialize};

use super::scalar::Scalar;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point(curve25519_dalek::edwards::EdwardsPoint);

impl Point {
	pub fn from_scalar(scalar: &Scalar) -> Self {
		Point(curve25519_dalek::constants::ED25519_BASEPOINT_POINT * scalar.inner())
	}

	pub fn identity() -> Self {
		Point(curve25519_dalek::edwards::EdwardsPoint::identity())
	}

	pub fn as_bytes(&self) -> [u8; 32] {
		self.0.compress().to_bytes()
	}

	pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
		curve25519_dalek::edwards::CompressedEdwardsY(*bytes).decompress().map(Point)
	}
}

impl Add for Point {
	type Output = Point;
	fn add(self, rhs: Point) -> Point {
		Point(self.0 + rhs.0)
	}
}

impl Sub for Point {
	type Output = Point;
	fn sub(self, rhs: Point) -> Point {
		Point(self.0 - rhs.0)
	}
}

impl Mul<Scalar> for Point {
	type Output = Point;
	fn mul(self, rhs: Scalar) -> Point {
		Point(self.0 * rhs.inner())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_is_scalar_zero_times_basepoint() {
		assert_eq!(Point::identity(), Point::from_scalar(&Scalar::zero()));
	}

	#[test]
	fn round_trips_through_compressed_bytes() {
		let p = Point::from_scalar(&Scalar::from(7));
		let bytes = p.as_bytes();
		assert_eq!(Point::from_bytes(&bytes), Some(p));
	}
}
