//! Double-sign guard (spec §4.E): classifies an incoming request against the
//! stored high-water mark before (and again, under the leader's lock,
//! immediately before commit) any cryptographic work happens.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::chain::SignRequest;
use crate::hwm::HighWaterMark;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
	/// Strictly greater than the stored HWM: proceed to the signing pipeline.
	Sign,
	/// Exact repeat of the last signed request: return the stored signature.
	Replay { signature: Vec<u8> },
	/// Same position, only the timestamp differs: rewrite to the stored
	/// timestamp and return the stored signature.
	ReplayWithStoredTimestamp { signature: Vec<u8> },
	/// At or below the HWM position.
	RejectBeyondBlock,
	/// Same position, non-timestamp bytes differ: a potential double-sign.
	RejectConflicting,
}

/// In-process counters for operator visibility. Deliberately not a metrics
/// exporter (out of scope, spec §1) — just state an external exporter could
/// read.
#[derive(Default)]
pub struct GuardMetrics {
	pub beyond_block: AtomicU64,
	pub conflicting: AtomicU64,
	pub replays: AtomicU64,
	pub signs: AtomicU64,
}

impl GuardMetrics {
	pub fn snapshot(&self) -> GuardMetricsSnapshot {
		GuardMetricsSnapshot {
			beyond_block: self.beyond_block.load(Ordering::Relaxed),
			conflicting: self.conflicting.load(Ordering::Relaxed),
			replays: self.replays.load(Ordering::Relaxed),
			signs: self.signs.load(Ordering::Relaxed),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardMetricsSnapshot {
	pub beyond_block: u64,
	pub conflicting: u64,
	pub replays: u64,
	pub signs: u64,
}

#[derive(Default)]
pub struct DoubleSignGuard {
	metrics: GuardMetrics,
}

impl DoubleSignGuard {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn metrics(&self) -> &GuardMetrics {
		&self.metrics
	}

	/// Classify `request` against `hwm`, the stored HWM for its chain (`None`
	/// if this chain has never signed before).
	pub fn classify(&self, request: &SignRequest, hwm: Option<&HighWaterMark>) -> Classification {
		let Some(hwm) = hwm else {
			self.metrics.signs.fetch_add(1, Ordering::Relaxed);
			return Classification::Sign;
		};

		if request.position < hwm.position {
			self.metrics.beyond_block.fetch_add(1, Ordering::Relaxed);
			return Classification::RejectBeyondBlock;
		}

		if request.position == hwm.position {
			if request.signed_bytes == hwm.signed_bytes {
				self.metrics.replays.fetch_add(1, Ordering::Relaxed);
				return Classification::Replay { signature: hwm.signature.clone() };
			}

			let same_request = SignRequest {
				chain_id: request.chain_id.clone(),
				position: hwm.position,
				signed_bytes: hwm.signed_bytes.clone(),
				timestamp_seconds: 0,
				timestamp_nanos: 0,
			};

			if request.non_timestamp_bytes_match(&same_request) {
				self.metrics.replays.fetch_add(1, Ordering::Relaxed);
				return Classification::ReplayWithStoredTimestamp { signature: hwm.signature.clone() };
			}

			self.metrics.conflicting.fetch_add(1, Ordering::Relaxed);
			return Classification::RejectConflicting;
		}

		self.metrics.signs.fetch_add(1, Ordering::Relaxed);
		Classification::Sign
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::{SignKind, SignPosition};

	fn req(height: u64, round: i32, kind: SignKind, bytes: Vec<u8>) -> SignRequest {
		SignRequest {
			chain_id: "test-chain".into(),
			position: SignPosition { height, round, kind },
			signed_bytes: bytes,
			timestamp_seconds: 0,
			timestamp_nanos: 0,
		}
	}

	fn canonical(height: u64, round: i32, ts: i64) -> Vec<u8> {
		let mut bytes = vec![0xAA; 8];
		bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&round.to_be_bytes());
		bytes.extend_from_slice(&ts.to_be_bytes());
		bytes.extend_from_slice(&0i32.to_be_bytes());
		bytes
	}

	#[test]
	fn first_request_always_signs() {
		let guard = DoubleSignGuard::new();
		let r = req(10, 0, SignKind::Prevote, canonical(10, 0, 100));
		assert_eq!(guard.classify(&r, None), Classification::Sign);
	}

	#[test]
	fn strictly_greater_position_signs() {
		let guard = DoubleSignGuard::new();
		let hwm = HighWaterMark {
			position: SignPosition { height: 10, round: 0, kind: SignKind::Prevote },
			signed_bytes: canonical(10, 0, 100),
			signature: vec![9; 64],
		};
		let r = req(10, 0, SignKind::Precommit, canonical(10, 0, 100));
		assert_eq!(guard.classify(&r, Some(&hwm)), Classification::Sign);
	}

	#[test]
	fn lower_height_is_beyond_block() {
		let guard = DoubleSignGuard::new();
		let hwm = HighWaterMark {
			position: SignPosition { height: 10, round: 0, kind: SignKind::Precommit },
			signed_bytes: canonical(10, 0, 100),
			signature: vec![9; 64],
		};
		let r = req(10, 0, SignKind::Prevote, canonical(10, 0, 100));
		assert_eq!(guard.classify(&r, Some(&hwm)), Classification::RejectBeyondBlock);
	}

	#[test]
	fn exact_repeat_is_replay() {
		let guard = DoubleSignGuard::new();
		let bytes = canonical(10, 0, 100);
		let hwm = HighWaterMark {
			position: SignPosition { height: 10, round: 0, kind: SignKind::Prevote },
			signed_bytes: bytes.clone(),
			signature: vec![9; 64],
		};
		let r = req(10, 0, SignKind::Prevote, bytes);
		assert_eq!(
			guard.classify(&r, Some(&hwm)),
			Classification::Replay { signature: vec![9; 64] }
		);
	}

	#[test]
	fn timestamp_only_difference_is_replay_with_stored_timestamp() {
		let guard = DoubleSignGuard::new();
		let hwm = HighWaterMark {
			position: SignPosition { height: 10, round: 0, kind: SignKind::Prevote },
			signed_bytes: canonical(10, 0, 100),
			signature: vec![9; 64],
		};
		let r = req(10, 0, SignKind::Prevote, canonical(10, 0, 200));
		assert_eq!(
			guard.classify(&r, Some(&hwm)),
			Classification::ReplayWithStoredTimestamp { signature: vec![9; 64] }
		);
	}

	#[test]
	fn conflicting_block_id_is_rejected() {
		let guard = DoubleSignGuard::new();
		let hwm = HighWaterMark {
			position: SignPosition { height: 10, round: 0, kind: SignKind::Prevote },
			signed_bytes: canonical(10, 0, 100),
			signature: vec![9; 64],
		};
		let mut conflicting = canonical(10, 0, 100);
		conflicting[0] = 0xFF; // different block id byte, same timestamp suffix
		let r = req(10, 0, SignKind::Prevote, conflicting);
		assert_eq!(guard.classify(&r, Some(&hwm)), Classification::RejectConflicting);
	}
}
