//! Threshold Ed25519 cryptography (spec §4.F, §4.H): scalar/point wrappers,
//! Shamir secret sharing, FROST-style Schnorr partial signatures, and ECIES
//! for nonce-shard transport between cosigners.

pub mod ecies;
pub mod point;
pub mod scalar;
pub mod schnorr;
pub mod shamir;

pub use point::Point;
pub use scalar::Scalar;
