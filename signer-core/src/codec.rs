//! Privval message codec (spec §4.B): the sum type over sign-vote,
//! sign-proposal, pubkey, and ping requests/responses, plus canonicalization
//! of vote/proposal bytes. The signer MUST sign exactly the bytes the sentry
//! will verify, so `CanonicalVote`/`CanonicalProposal` are the single source
//! of truth for that byte layout; nothing downstream re-derives it.

use prost::Message;

use crate::chain::{ChainId, SignKind, SignPosition, SignRequest};
use crate::error::{Result, SignerError};
use crate::proto::privval;

/// Canonical byte layout shared by votes and proposals: a one-byte kind tag,
/// big-endian height/round, a length-prefixed block id, a length-prefixed
/// chain id, and finally the 12-byte timestamp (8-byte seconds + 4-byte
/// nanos). The timestamp is always last so `SignRequest::non_timestamp_bytes_match`
/// can compare prefixes without knowing the block id's length.
fn canonical_encode(
	kind: SignKind,
	height: u64,
	round: i32,
	block_id: &[u8],
	chain_id: &str,
	timestamp_seconds: i64,
	timestamp_nanos: i32,
) -> Vec<u8> {
	let mut buf = Vec::with_capacity(1 + 8 + 4 + 4 + block_id.len() + 4 + chain_id.len() + 12);
	buf.push(kind as u8);
	buf.extend_from_slice(&height.to_be_bytes());
	buf.extend_from_slice(&round.to_be_bytes());
	buf.extend_from_slice(&(block_id.len() as u32).to_be_bytes());
	buf.extend_from_slice(block_id);
	buf.extend_from_slice(&(chain_id.len() as u32).to_be_bytes());
	buf.extend_from_slice(chain_id.as_bytes());
	buf.extend_from_slice(&timestamp_seconds.to_be_bytes());
	buf.extend_from_slice(&timestamp_nanos.to_be_bytes());
	buf
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalVote {
	pub chain_id: ChainId,
	pub height: u64,
	pub round: i32,
	pub kind: SignKind,
	pub block_id: Vec<u8>,
	pub timestamp_seconds: i64,
	pub timestamp_nanos: i32,
}

impl CanonicalVote {
	pub fn from_proto(chain_hint: &ChainId, v: privval::Vote) -> Result<Self> {
		let kind = SignKind::from_i32(v.kind)
			.filter(|k| *k != SignKind::Proposal)
			.ok_or_else(|| SignerError::Decode(format!("invalid vote kind {}", v.kind)))?;
		let chain_id = if v.chain_id.is_empty() { chain_hint.clone() } else { v.chain_id };
		Ok(CanonicalVote {
			chain_id,
			height: v.height as u64,
			round: v.round,
			kind,
			block_id: v.block_id,
			timestamp_seconds: v.timestamp_seconds,
			timestamp_nanos: v.timestamp_nanos,
		})
	}

	pub fn to_proto(&self, signature: Vec<u8>) -> privval::Vote {
		privval::Vote {
			kind: self.kind as i32,
			height: self.height as i64,
			round: self.round,
			block_id: self.block_id.clone(),
			timestamp_seconds: self.timestamp_seconds,
			timestamp_nanos: self.timestamp_nanos,
			chain_id: self.chain_id.clone(),
			signature,
		}
	}

	pub fn position(&self) -> SignPosition {
		SignPosition { height: self.height, round: self.round, kind: self.kind }
	}

	pub fn signed_bytes(&self) -> Vec<u8> {
		canonical_encode(
			self.kind,
			self.height,
			self.round,
			&self.block_id,
			&self.chain_id,
			self.timestamp_seconds,
			self.timestamp_nanos,
		)
	}

	pub fn into_sign_request(self) -> SignRequest {
		SignRequest {
			chain_id: self.chain_id.clone(),
			position: self.position(),
			signed_bytes: self.signed_bytes(),
			timestamp_seconds: self.timestamp_seconds,
			timestamp_nanos: self.timestamp_nanos,
		}
	}

	/// Rewrite the timestamp to the stored value, as required by the
	/// timestamp-only replay rule (spec §4.E).
	pub fn with_timestamp(mut self, seconds: i64, nanos: i32) -> Self {
		self.timestamp_seconds = seconds;
		self.timestamp_nanos = nanos;
		self
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalProposal {
	pub chain_id: ChainId,
	pub height: u64,
	pub round: i32,
	pub pol_round: i32,
	pub block_id: Vec<u8>,
	pub timestamp_seconds: i64,
	pub timestamp_nanos: i32,
}

impl CanonicalProposal {
	pub fn from_proto(chain_hint: &ChainId, p: privval::Proposal) -> Result<Self> {
		let chain_id = if p.chain_id.is_empty() { chain_hint.clone() } else { p.chain_id };
		Ok(CanonicalProposal {
			chain_id,
			height: p.height as u64,
			round: p.round,
			pol_round: p.pol_round,
			block_id: p.block_id,
			timestamp_seconds: p.timestamp_seconds,
			timestamp_nanos: p.timestamp_nanos,
		})
	}

	pub fn to_proto(&self, signature: Vec<u8>) -> privval::Proposal {
		privval::Proposal {
			height: self.height as i64,
			round: self.round,
			pol_round: self.pol_round,
			block_id: self.block_id.clone(),
			timestamp_seconds: self.timestamp_seconds,
			timestamp_nanos: self.timestamp_nanos,
			chain_id: self.chain_id.clone(),
			signature,
		}
	}

	pub fn position(&self) -> SignPosition {
		SignPosition { height: self.height, round: self.round, kind: SignKind::Proposal }
	}

	pub fn signed_bytes(&self) -> Vec<u8> {
		canonical_encode(
			SignKind::Proposal,
			self.height,
			self.round,
			&self.block_id,
			&self.chain_id,
			self.timestamp_seconds,
			self.timestamp_nanos,
		)
	}

	pub fn into_sign_request(self) -> SignRequest {
		SignRequest {
			chain_id: self.chain_id.clone(),
			position: self.position(),
			signed_bytes: self.signed_bytes(),
			timestamp_seconds: self.timestamp_seconds,
			timestamp_nanos: self.timestamp_nanos,
		}
	}

	pub fn with_timestamp(mut self, seconds: i64, nanos: i32) -> Self {
		self.timestamp_seconds = seconds;
		self.timestamp_nanos = nanos;
		self
	}
}

/// A decoded inbound privval request.
#[derive(Clone, Debug)]
pub enum InboundRequest {
	PubKey { chain_id: ChainId },
	SignVote(CanonicalVote),
	SignProposal(CanonicalProposal),
	Ping,
}

/// The outcome of handling one `InboundRequest`, ready to be re-encoded.
#[derive(Clone, Debug)]
pub enum OutboundResponse {
	PubKey(std::result::Result<Vec<u8>, SignerError>),
	SignedVote(std::result::Result<(CanonicalVote, Vec<u8>), SignerError>),
	SignedProposal(std::result::Result<(CanonicalProposal, Vec<u8>), SignerError>),
	Pong,
}

/// Decode one length-delimited privval frame (already decrypted by the
/// secret transport) into an `InboundRequest`.
pub fn decode_request(chain_hint: &ChainId, bytes: &[u8]) -> Result<InboundRequest> {
	let msg = privval::PrivValMessage::decode(bytes)
		.map_err(|e| SignerError::Decode(e.to_string()))?;
	match msg.sum {
		Some(privval::priv_val_message::Sum::PubKeyRequest(r)) => {
			let chain_id = if r.chain_id.is_empty() { chain_hint.clone() } else { r.chain_id };
			Ok(InboundRequest::PubKey { chain_id })
		}
		Some(privval::priv_val_message::Sum::SignVoteRequest(r)) => {
			let vote = r.vote.ok_or_else(|| SignerError::Decode("missing vote".into()))?;
			Ok(InboundRequest::SignVote(CanonicalVote::from_proto(chain_hint, vote)?))
		}
		Some(privval::priv_val_message::Sum::SignProposalRequest(r)) => {
			let proposal =
				r.proposal.ok_or_else(|| SignerError::Decode("missing proposal".into()))?;
			Ok(InboundRequest::SignProposal(CanonicalProposal::from_proto(chain_hint, proposal)?))
		}
		Some(privval::priv_val_message::Sum::PingRequest(_)) => Ok(InboundRequest::Ping),
		other => Err(SignerError::Decode(format!("unexpected message variant: {other:?}"))),
	}
}

/// Encode an `OutboundResponse` into the bytes to hand to the secret
/// transport for framing. A response is produced for every request,
/// including failures, to keep the sentry's channel drained (spec §4.C).
pub fn encode_response(response: OutboundResponse) -> Vec<u8> {
	use privval::priv_val_message::Sum;

	let sum = match response {
		OutboundResponse::PubKey(Ok(bytes)) => {
			Sum::PubKeyResponse(privval::PubKeyResponse { pub_key_bytes: bytes, error: None })
		}
		OutboundResponse::PubKey(Err(e)) => Sum::PubKeyResponse(privval::PubKeyResponse {
			pub_key_bytes: Vec::new(),
			error: Some((&e).into()),
		}),
		OutboundResponse::SignedVote(Ok((vote, signature))) => {
			Sum::SignedVoteResponse(privval::SignedVoteResponse {
				vote: Some(vote.to_proto(signature)),
				error: None,
			})
		}
		OutboundResponse::SignedVote(Err(e)) => {
			Sum::SignedVoteResponse(privval::SignedVoteResponse { vote: None, error: Some((&e).into()) })
		}
		OutboundResponse::SignedProposal(Ok((proposal, signature))) => {
			Sum::SignedProposalResponse(privval::SignedProposalResponse {
				proposal: Some(proposal.to_proto(signature)),
				error: None,
			})
		}
		OutboundResponse::SignedProposal(Err(e)) => Sum::SignedProposalResponse(
			privval::SignedProposalResponse { proposal: None, error: Some((&e).into()) },
		),
		OutboundResponse::Pong => Sum::PingResponse(privval::PingResponse {}),
	};

	privval::PrivValMessage { sum: Some(sum) }.encode_to_vec()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn vote_round_trip_preserves_signed_bytes() {
		let vote = CanonicalVote {
			chain_id: "test-chain".into(),
			height: 10,
			round: 0,
			kind: SignKind::Prevote,
			block_id: vec![1, 2, 3, 4],
			timestamp_seconds: 1_700_000_000,
			timestamp_nanos: 42,
		};
		let bytes = vote.signed_bytes();
		let rewritten = vote.clone().with_timestamp(1_700_000_005, 0);
		assert_ne!(bytes, rewritten.signed_bytes());

		let req = vote.clone().into_sign_request();
		let req2 = vote.into_sign_request();
		assert!(req.non_timestamp_bytes_match(&req2));
	}

	#[test]
	fn decode_sign_vote_request() {
		let inner = privval::SignVoteRequest {
			vote: Some(privval::Vote {
				kind: SignKind::Precommit as i32,
				height: 42,
				round: 1,
				block_id: vec![9, 9],
				timestamp_seconds: 5,
				timestamp_nanos: 0,
				chain_id: "c".into(),
				signature: Vec::new(),
			}),
		};
		let msg = privval::PrivValMessage {
			sum: Some(privval::priv_val_message::Sum::SignVoteRequest(inner)),
		};
		let bytes = msg.encode_to_vec();

		let decoded = decode_request(&"default".to_string(), &bytes).unwrap();
		match decoded {
			InboundRequest::SignVote(v) => {
				assert_eq!(v.height, 42);
				assert_eq!(v.kind, SignKind::Precommit);
			}
			_ => panic!("expected SignVote"),
		}
	}

	#[test]
	fn every_response_variant_produces_a_frame() {
		assert!(!encode_response(OutboundResponse::Pong).is_empty());
		assert!(!encode_response(OutboundResponse::PubKey(Err(SignerError::QuorumTimeout))).is_empty());
	}
}
