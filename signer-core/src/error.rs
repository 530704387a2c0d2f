//! Error kinds for the signing pipeline (spec §7).
//!
//! Every variant here is reported back to a sentry as a `RemoteSignerError`,
//! so the sentry never mistakes a failure for a successful sign.

use thiserror::Error;

use crate::proto::privval;

#[derive(Error, Debug)]
pub enum SignerError {
	#[error("transport error: {0}")]
	Transport(String),

	#[error("failed to decode frame: {0}")]
	Decode(String),

	#[error("beyond block: {0}")]
	BeyondBlock(String),

	#[error("conflicting data at same (height, round, kind): {0}")]
	ConflictingData(String),

	#[error("this cosigner is not the leader")]
	NotLeader { leader_shard_id: Option<u32> },

	#[error("peer {shard_id} unreachable: {reason}")]
	PeerUnreachable { shard_id: u32, reason: String },

	#[error("quorum not reached before session timeout")]
	QuorumTimeout,

	#[error("durable storage error: {0}")]
	Storage(String),

	#[error("invalid cluster configuration: {0}")]
	InvalidClusterConfig(String),

	#[error("signature failed verification")]
	VerificationFailed,
}

impl SignerError {
	/// Stable numeric codes so a sentry-side log scraper can key off them
	/// without string-matching the description.
	pub fn code(&self) -> i32 {
		match self {
			SignerError::Transport(_) => 1,
			SignerError::Decode(_) => 2,
			SignerError::BeyondBlock(_) => 3,
			SignerError::ConflictingData(_) => 4,
			SignerError::NotLeader { .. } => 5,
			SignerError::PeerUnreachable { .. } => 6,
			SignerError::QuorumTimeout => 7,
			SignerError::Storage(_) => 8,
			SignerError::InvalidClusterConfig(_) => 9,
			SignerError::VerificationFailed => 10,
		}
	}

	/// Whether a sentry may usefully retry the same request later.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			SignerError::NotLeader { .. }
				| SignerError::PeerUnreachable { .. }
				| SignerError::QuorumTimeout
		)
	}
}

impl From<&SignerError> for privval::RemoteSignerError {
	fn from(err: &SignerError) -> Self {
		privval::RemoteSignerError { code: err.code(), description: err.to_string() }
	}
}

pub type Result<T> = std::result::Result<T, SignerError>;
