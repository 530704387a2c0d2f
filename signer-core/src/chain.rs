//! Core data model (spec §3): chain identifiers, sign kinds, and sign
//! requests. `SignKind`'s ordering is the total order spec.md fixes:
//! `prevote < precommit`, with proposals ordered separately (by convention
//! the lowest kind, since a proposal always precedes voting at the same
//! height/round).

use serde::{Deserialize, Serialize};

pub type ChainId = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SignKind {
	Proposal = 0,
	Prevote = 1,
	Precommit = 2,
}

impl SignKind {
	pub fn from_i32(value: i32) -> Option<Self> {
		match value {
			0 => Some(SignKind::Proposal),
			1 => Some(SignKind::Prevote),
			2 => Some(SignKind::Precommit),
			_ => None,
		}
	}
}

impl std::fmt::Display for SignKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SignKind::Proposal => write!(f, "proposal"),
			SignKind::Prevote => write!(f, "prevote"),
			SignKind::Precommit => write!(f, "precommit"),
		}
	}
}

/// The `(height, round, kind)` tuple the guard orders requests by (spec §4.E).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignPosition {
	pub height: u64,
	pub round: i32,
	pub kind: SignKind,
}

impl PartialOrd for SignPosition {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for SignPosition {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		(self.height, self.round, self.kind).cmp(&(other.height, other.round, other.kind))
	}
}

/// A request to produce a signature over canonical vote/proposal bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
	pub chain_id: ChainId,
	pub position: SignPosition,
	/// Canonical-encoded bytes the signature commits to, timestamp included.
	pub signed_bytes: Vec<u8>,
	pub timestamp_seconds: i64,
	pub timestamp_nanos: i32,
}

impl SignRequest {
	/// Session identity per spec §9: concurrent requests with the same key
	/// must collapse to one session.
	pub fn session_key(&self) -> (ChainId, u64, i32, SignKind) {
		(self.chain_id.clone(), self.position.height, self.position.round, self.position.kind)
	}

	/// Returns `true` if `self` and `other` agree on everything except
	/// possibly the timestamp portion of their signed bytes (spec §4.E
	/// timestamp-only replay rule). Callers check exact equality separately;
	/// this only needs to establish that the *non-timestamp* bytes match.
	///
	/// The canonical encoding (see `codec::canonical_encode`) always places
	/// the 12-byte timestamp (8-byte seconds + 4-byte nanos) at the end of
	/// the signed bytes, so "the rest" is simply the common prefix.
	pub fn non_timestamp_bytes_match(&self, other: &SignRequest) -> bool {
		const TIMESTAMP_LEN: usize = 12;
		if self.signed_bytes.len() != other.signed_bytes.len()
			|| self.signed_bytes.len() < TIMESTAMP_LEN
		{
			return false;
		}
		let split = self.signed_bytes.len() - TIMESTAMP_LEN;
		self.signed_bytes[..split] == other.signed_bytes[..split]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn position_ordering_matches_spec() {
		let a = SignPosition { height: 10, round: 0, kind: SignKind::Prevote };
		let b = SignPosition { height: 10, round: 0, kind: SignKind::Precommit };
		assert!(a < b);

		let c = SignPosition { height: 10, round: 1, kind: SignKind::Proposal };
		assert!(b < c);

		let d = SignPosition { height: 11, round: 0, kind: SignKind::Proposal };
		assert!(c < d);
	}
}
