//! High-water mark record (spec §3): the highest `(height, round, kind)` at
//! which a chain has been signed, together with the bytes and signature it
//! produced, so exact replays can return the identical signature.

use serde::{Deserialize, Serialize};

use crate::chain::{SignKind, SignPosition};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighWaterMark {
	pub position: SignPosition,
	pub signed_bytes: Vec<u8>,
	pub signature: Vec<u8>,
}

impl HighWaterMark {
	pub fn genesis() -> Self {
		HighWaterMark {
			position: SignPosition { height: 0, round: 0, kind: SignKind::Proposal },
			signed_bytes: Vec::new(),
			signature: Vec::new(),
		}
	}
}
