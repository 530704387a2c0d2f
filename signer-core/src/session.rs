//! Nonce-session table (spec §4.H, §9): the leader's bookkeeping for an
//! in-flight signing session. Owned by the leader only, never shared with
//! followers, and never persisted — a session that doesn't finish before
//! `session_timeout` is simply dropped. Keyed by `(chain_id, height, round,
//! kind)` so concurrent requests for the same position collapse onto one
//! session rather than racing two independent signing attempts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::chain::{ChainId, SignKind};
use crate::nonce::NonceContribution;

pub type SessionKey = (ChainId, u64, i32, SignKind);

/// Default session lifetime (spec §3: "live for at most `session_timeout`").
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(5);

pub struct NonceSession {
	pub own_contribution: NonceContribution,
	pub recruited_shard_ids: Vec<u32>,
}

/// Serializes the `GetNonces -> SetNoncesAndSign` pairing for each session
/// key via a per-key lock, so two concurrent calls for the same position
/// can't interleave their nonce exchange.
#[derive(Default)]
pub struct SessionTable {
	sessions: Mutex<HashMap<SessionKey, Arc<Mutex<Option<NonceSession>>>>>,
}

impl SessionTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Get or create the per-session lock for `key`. The caller locks it for
	/// the duration of the session's nonce exchange and signing round.
	pub async fn lock_for(&self, key: SessionKey) -> Arc<Mutex<Option<NonceSession>>> {
		let mut sessions = self.sessions.lock().await;
		sessions.entry(key).or_insert_with(|| Arc::new(Mutex::new(None))).clone()
	}

	/// Drop the session entry, releasing the generated nonce material. Called
	/// on both completion and timeout.
	pub async fn remove(&self, key: &SessionKey) {
		self.sessions.lock().await.remove(key);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn concurrent_requests_for_the_same_key_share_one_lock() {
		let table = SessionTable::new();
		let key: SessionKey = ("chain".into(), 10, 0, SignKind::Prevote);

		let a = table.lock_for(key.clone()).await;
		let b = table.lock_for(key.clone()).await;
		assert!(Arc::ptr_eq(&a, &b));

		table.remove(&key).await;
		let c = table.lock_for(key).await;
		assert!(!Arc::ptr_eq(&a, &c));
	}
}
