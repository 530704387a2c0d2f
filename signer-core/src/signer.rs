//! Threshold signer session orchestration (spec §4.H). The leader drives
//! Admit → Recruit → Gather nonces → Compute R → Partial signatures →
//! Aggregate → Verify; every cosigner (leader included) also answers
//! `GetNonces` / `SetNoncesAndSign` as a recruited participant, via
//! `PeerHandler`.
//!
//! Lagrange weighting is applied to *both* terms of each party's partial
//! response — its nonce share and its private key share — before calling
//! `schnorr::build_response`, so `aggregate_signature`'s unweighted sum of
//! responses reconstructs `s = Σ λ_j(k_j + c·x_j) = k + c·x`. Weighting only
//! one term would leave the nonce and key terms asymmetric and the result
//! would fail verification. See DESIGN.md.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::{Signature as Ed25519Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tokio::sync::Mutex;
use tonic::Status;
use tracing::instrument;
use x25519_dalek::StaticSecret;

use crate::chain::{ChainId, SignKind, SignPosition, SignRequest};
use crate::crypto::{ecies, schnorr, shamir, Point, Scalar};
use crate::error::{Result, SignerError};
use crate::facade::SigningFacade;
use crate::guard::{Classification, DoubleSignGuard};
use crate::hwm::HighWaterMark;
use crate::nonce::{self, NonceContribution};
use crate::peer::client::{PeerClient, PEER_CALL_DEADLINE};
use crate::peer::service::PeerHandler;
use crate::proto::cosigner::{
	AppendEntriesRequest, AppendEntriesResponse, EncryptedNonceShard, GetLeaderRequest,
	GetLeaderResponse, GetNoncesRequest, GetNoncesResponse, HealthRequest, HealthResponse,
	RequestVoteRequest, RequestVoteResponse, SessionId, SetNoncesAndSignRequest,
	SetNoncesAndSignResponse, TimeoutNowRequest, TimeoutNowResponse, TransferLeadershipRequest,
	TransferLeadershipResponse,
};
use crate::raft::election::RaftDriver;
use crate::raft::state::RaftState;
use crate::registry::{CosignerEntry, CosignerRegistry};
use crate::session::SessionTable;
use crate::store::SignStateStore;
use crate::transport::handshake::Identity;

pub struct ThresholdSignerConfig {
	pub self_shard_id: u32,
	pub threshold: u8,
	pub registry: CosignerRegistry,
	/// This cosigner's share of the aggregate Ed25519 private key, `x_i`.
	pub key_share: Scalar,
	pub aggregate_public_key: Point,
	pub ecies_secret: StaticSecret,
	pub session_timeout: Duration,
	/// Proves this cosigner's identity to peers it dials and to peers
	/// dialing it, per cosigner-peer-layer mutual authentication (spec
	/// §4.G/§6).
	pub identity: Arc<Identity>,
}

pub struct ThresholdSigner {
	config: ThresholdSignerConfig,
	guard: DoubleSignGuard,
	store: SignStateStore,
	sessions: SessionTable,
	raft: Arc<Mutex<RaftState>>,
	raft_driver: RaftDriver,
}

impl ThresholdSigner {
	pub fn new(
		config: ThresholdSignerConfig,
		store: SignStateStore,
		raft: Arc<Mutex<RaftState>>,
	) -> Self {
		let raft_driver = RaftDriver::new(raft.clone(), config.registry.clone(), config.identity.clone());
		ThresholdSigner {
			config,
			guard: DoubleSignGuard::new(),
			store,
			sessions: SessionTable::new(),
			raft,
			raft_driver,
		}
	}

	pub fn metrics(&self) -> &crate::guard::GuardMetrics {
		self.guard.metrics()
	}

	async fn is_leader(&self) -> bool {
		self.raft.lock().await.is_leader()
	}

	pub async fn get_leader(&self) -> (Option<u32>, u64) {
		let state = self.raft.lock().await;
		(state.leader_id, state.current_term)
	}

	pub async fn transfer_leadership(&self, target: u32) -> Result<()> {
		self.raft_driver.transfer_to(target).await
	}

	fn session_id_proto(chain_id: &ChainId, position: &SignPosition) -> SessionId {
		SessionId {
			chain_id: chain_id.clone(),
			height: position.height,
			round: position.round,
			kind: position.kind as i32,
		}
	}

	/// Select `K` cosigners including self, preferring ones that answer a
	/// health ping. Retries are bounded by `session_timeout` at the call
	/// site, not here.
	async fn recruit(&self) -> Result<Vec<u32>> {
		let mut recruited = vec![self.config.self_shard_id];
		for shard_id in self.config.registry.shard_ids() {
			if recruited.len() >= self.config.threshold as usize {
				break;
			}
			if shard_id == self.config.self_shard_id {
				continue;
			}
			let Some(entry) = self.config.registry.get(shard_id) else { continue };
			if let Ok(mut client) =
				PeerClient::connect(shard_id, &entry.p2p_addr, self.config.identity.clone(), entry.identity_key)
					.await
			{
				if client.health(HealthRequest {}).await.is_ok() {
					recruited.push(shard_id);
				}
			}
		}
		if recruited.len() < self.config.threshold as usize {
			return Err(SignerError::QuorumTimeout);
		}
		Ok(recruited)
	}

	fn encode_shard(commitment_bytes: [u8; 32], share: shamir::Share, recipient: &CosignerEntry) -> EncryptedNonceShard {
		let blob = ecies::encrypt(&recipient.ecies_public_key, &share.value.to_bytes());
		EncryptedNonceShard {
			recipient_shard_id: recipient.shard_id,
			ephemeral_pub_key: blob[..32].to_vec(),
			ciphertext: blob[32..].to_vec(),
			commitment: commitment_bytes.to_vec(),
		}
	}

	/// Generate this cosigner's own nonce contribution, pre-encrypted to
	/// every cosigner in the registry.
	fn generate_self_contribution(&self) -> (Point, Vec<EncryptedNonceShard>) {
		let contribution = NonceContribution::generate(
			self.config.threshold,
			self.config.registry.len() as u8,
			&mut OsRng,
		);
		let commitment_bytes = contribution.public_commitment.as_bytes();
		let shards = self
			.config
			.registry
			.iter()
			.filter_map(|entry| {
				contribution
					.shard_for(entry.shard_id)
					.map(|share| Self::encode_shard(commitment_bytes, share, entry))
			})
			.collect();
		(contribution.public_commitment, shards)
	}

	fn decrypt_shard(&self, shard: &EncryptedNonceShard) -> Result<Scalar> {
		let mut blob = shard.ephemeral_pub_key.clone();
		blob.extend_from_slice(&shard.ciphertext);
		let plaintext = ecies::decrypt(&self.config.ecies_secret, &blob)?;
		if plaintext.len() != 32 {
			return Err(SignerError::Decode("nonce shard has the wrong length".into()));
		}
		let mut bytes = [0u8; 32];
		bytes.copy_from_slice(&plaintext);
		Ok(Scalar::from_bytes_mod_order(&bytes))
	}

	/// A recruited cosigner's own double-sign check before it contributes a
	/// partial signature. Does not commit anything: the HWM is only known
	/// once the leader has the verified aggregate signature in hand, and is
	/// then replicated via `replicate_commit`.
	async fn check_admission(
		&self,
		chain_id: &ChainId,
		position: SignPosition,
		signed_bytes: &[u8],
	) -> std::result::Result<(), Status> {
		let request = SignRequest {
			chain_id: chain_id.clone(),
			position,
			signed_bytes: signed_bytes.to_vec(),
			timestamp_seconds: 0,
			timestamp_nanos: 0,
		};
		let hwm = self.store.load(chain_id).await.map_err(|e| Status::internal(e.to_string()))?;
		match self.guard.classify(&request, hwm.as_ref()) {
			Classification::Sign => Ok(()),
			_ => Err(Status::failed_precondition("double-sign guard rejected this session")),
		}
	}

	/// Commit the final HWM locally, replicate it to every recruited peer as
	/// a Raft log entry, and only report success once a quorum of the
	/// cluster (self included) has acknowledged the entry — a signature
	/// whose HWM a minority alone has observed must not reach the sentry
	/// (spec §4.I/§9).
	async fn replicate_commit(
		&self,
		chain_id: &ChainId,
		position: SignPosition,
		signed_bytes: Vec<u8>,
		signature: Vec<u8>,
		recruited: &[u32],
	) -> Result<()> {
		let hwm = HighWaterMark { position, signed_bytes: signed_bytes.clone(), signature: signature.clone() };
		self.store.commit(chain_id, &hwm).await?;

		let new_hwm = bincode::serialize(&hwm).map_err(|e| SignerError::Storage(e.to_string()))?;
		let (prev_log_index, prev_log_term) = {
			let raft = self.raft.lock().await;
			(raft.last_log_index(), raft.last_log_term())
		};
		let entry = {
			let mut raft = self.raft.lock().await;
			raft.append_local(crate::proto::cosigner::LogEntry {
				term: 0,
				index: 0,
				chain_id: chain_id.clone(),
				new_hwm,
				signature,
				signed_bytes,
			})
		};

		let mut acks = 1; // the leader's own durable commit above.
		for &shard_id in recruited.iter().filter(|&&id| id != self.config.self_shard_id) {
			let Some(peer) = self.config.registry.get(shard_id) else { continue };
			let (term, self_id) = {
				let raft = self.raft.lock().await;
				(raft.current_term, raft.self_shard_id)
			};
			if let Ok(mut client) =
				PeerClient::connect(shard_id, &peer.p2p_addr, self.config.identity.clone(), peer.identity_key)
					.await
			{
				let response = tokio::time::timeout(
					PEER_CALL_DEADLINE,
					client.append_entries(AppendEntriesRequest {
						term,
						leader_shard_id: self_id,
						prev_log_index,
						prev_log_term,
						entries: vec![entry.clone()],
						leader_commit: entry.index,
					}),
				)
				.await;
				if matches!(response, Ok(Ok(resp)) if resp.success) {
					acks += 1;
				}
			}
		}

		if acks < self.config.registry.quorum() {
			return Err(SignerError::QuorumTimeout);
		}
		Ok(())
	}

	fn position_from_commit(kind: i32, height: u64, round: i32) -> std::result::Result<SignPosition, Status> {
		let kind = SignKind::from_i32(kind).ok_or_else(|| Status::invalid_argument("invalid sign kind"))?;
		Ok(SignPosition { height, round, kind })
	}
}

#[async_trait]
impl SigningFacade for ThresholdSigner {
	#[instrument(skip(self, request), fields(chain_id = %request.chain_id))]
	async fn sign(&self, request: SignRequest) -> Result<(Vec<u8>, Vec<u8>)> {
		if !self.is_leader().await {
			let (leader_shard_id, _) = self.get_leader().await;
			return Err(SignerError::NotLeader { leader_shard_id });
		}

		let session_key = request.session_key();
		let lock = self.sessions.lock_for(session_key.clone()).await;
		let _session_guard = lock.lock().await;

		let hwm = self.store.load(&request.chain_id).await?;
		match self.guard.classify(&request, hwm.as_ref()) {
			Classification::Replay { signature }
			| Classification::ReplayWithStoredTimestamp { signature } => {
				let hwm = hwm.expect("a Replay classification implies a stored HWM");
				self.sessions.remove(&session_key).await;
				return Ok((hwm.signed_bytes, signature));
			}
			Classification::RejectBeyondBlock => {
				self.sessions.remove(&session_key).await;
				return Err(SignerError::BeyondBlock(format!(
					"{:?} is at or below the stored high-water mark",
					request.position
				)));
			}
			Classification::RejectConflicting => {
				self.sessions.remove(&session_key).await;
				return Err(SignerError::ConflictingData(format!(
					"{:?} conflicts with the stored high-water mark",
					request.position
				)));
			}
			Classification::Sign => {}
		}

		let result = self.run_session(&request).await;
		self.sessions.remove(&session_key).await;
		result
	}

	async fn public_key(&self, _chain_id: &ChainId) -> Result<Vec<u8>> {
		Ok(self.config.aggregate_public_key.as_bytes().to_vec())
	}
}

impl ThresholdSigner {
	async fn run_session(&self, request: &SignRequest) -> Result<(Vec<u8>, Vec<u8>)> {
		let recruited = tokio::time::timeout(self.config.session_timeout, self.recruit())
			.await
			.map_err(|_| SignerError::QuorumTimeout)??;
		let participant_set: BTreeSet<u32> = recruited.iter().copied().collect();
		let session_id = Self::session_id_proto(&request.chain_id, &request.position);

		let (self_commitment, self_shards) = self.generate_self_contribution();
		let mut group_commitment = self_commitment;
		let mut shards_by_recipient: std::collections::HashMap<u32, Vec<EncryptedNonceShard>> =
			std::collections::HashMap::new();
		for shard in self_shards {
			shards_by_recipient.entry(shard.recipient_shard_id).or_default().push(shard);
		}

		for &shard_id in recruited.iter().filter(|&&id| id != self.config.self_shard_id) {
			let entry = self
				.config
				.registry
				.get(shard_id)
				.ok_or_else(|| SignerError::PeerUnreachable { shard_id, reason: "not in registry".into() })?;
			let mut client =
				PeerClient::connect(shard_id, &entry.p2p_addr, self.config.identity.clone(), entry.identity_key)
					.await?;
			let resp: GetNoncesResponse = tokio::time::timeout(
				PEER_CALL_DEADLINE,
				client.get_nonces(GetNoncesRequest { session_id: Some(session_id.clone()) }),
			)
			.await
			.map_err(|_| SignerError::PeerUnreachable { shard_id, reason: "GetNonces timed out".into() })??;

			// Every shard in `resp.shards` (one per recipient) carries the same
			// commitment for this peer's contribution; fold it into R once.
			if let Some(first) = resp.shards.first() {
				let mut bytes = [0u8; 32];
				if first.commitment.len() == 32 {
					bytes.copy_from_slice(&first.commitment);
					if let Some(point) = Point::from_bytes(&bytes) {
						group_commitment = group_commitment + point;
					}
				}
			}
			for shard in resp.shards {
				shards_by_recipient.entry(shard.recipient_shard_id).or_default().push(shard);
			}
		}

		let mut responses: Vec<Scalar> = Vec::with_capacity(recruited.len());

		for &shard_id in &recruited {
			let shards_for_peer = shards_by_recipient.remove(&shard_id).unwrap_or_default();
			if shard_id == self.config.self_shard_id {
				let nonce_share = nonce::combine_shares(
					shards_for_peer.iter().map(|s| self.decrypt_shard(s)).collect::<Result<Vec<_>>>()?,
				);
				let lambda = shamir::lagrange_coefficient(self.config.self_shard_id, &participant_set);
				let nonce_share = lambda * nonce_share;
				let key_share = lambda * self.config.key_share;
				let challenge =
					schnorr::build_challenge(self.config.aggregate_public_key, group_commitment, &request.signed_bytes);
				let response = schnorr::build_response(nonce_share, key_share, challenge);
				responses.push(response);
			} else {
				let entry = self
					.config
					.registry
					.get(shard_id)
					.ok_or_else(|| SignerError::PeerUnreachable { shard_id, reason: "not in registry".into() })?;
				let mut client = PeerClient::connect(
					shard_id,
					&entry.p2p_addr,
					self.config.identity.clone(),
					entry.identity_key,
				)
				.await?;
				let req = SetNoncesAndSignRequest {
					session_id: Some(session_id.clone()),
					shards_for_me: shards_for_peer,
					signed_bytes: request.signed_bytes.clone(),
					commit_height: request.position.height,
					commit_round: request.position.round,
					commit_kind: request.position.kind as i32,
					participant_shard_ids: recruited.clone(),
					group_commitment: group_commitment.as_bytes().to_vec(),
				};
				let resp: SetNoncesAndSignResponse = tokio::time::timeout(
					PEER_CALL_DEADLINE,
					client.set_nonces_and_sign(req),
				)
				.await
				.map_err(|_| SignerError::PeerUnreachable { shard_id, reason: "SetNoncesAndSign timed out".into() })??;

				if resp.partial_signature.len() != 32 {
					return Err(SignerError::VerificationFailed);
				}
				let mut bytes = [0u8; 32];
				bytes.copy_from_slice(&resp.partial_signature);
				responses.push(Scalar::from_bytes_mod_order(&bytes));
			}
		}

		let signature = schnorr::aggregate_signature(group_commitment, responses);
		let verifying_key = VerifyingKey::from_bytes(&self.config.aggregate_public_key.as_bytes())
			.map_err(|_| SignerError::VerificationFailed)?;
		verifying_key
			.verify(&request.signed_bytes, &Ed25519Signature::from_bytes(&signature))
			.map_err(|_| SignerError::VerificationFailed)?;

		self.replicate_commit(
			&request.chain_id,
			request.position,
			request.signed_bytes.clone(),
			signature.to_vec(),
			&recruited,
		)
		.await?;

		Ok((request.signed_bytes.clone(), signature.to_vec()))
	}
}

#[async_trait]
impl PeerHandler for ThresholdSigner {
	async fn handle_get_nonces(
		&self,
		_req: GetNoncesRequest,
	) -> std::result::Result<GetNoncesResponse, Status> {
		let (_commitment, shards) = self.generate_self_contribution();
		Ok(GetNoncesResponse { shards })
	}

	async fn handle_set_nonces_and_sign(
		&self,
		req: SetNoncesAndSignRequest,
	) -> std::result::Result<SetNoncesAndSignResponse, Status> {
		let session = req.session_id.ok_or_else(|| Status::invalid_argument("missing session_id"))?;
		let position = Self::position_from_commit(req.commit_kind, req.commit_height, req.commit_round)?;
		let key: crate::session::SessionKey =
			(session.chain_id.clone(), position.height, position.round, position.kind);
		let lock = self.sessions.lock_for(key.clone()).await;
		let _session_guard = lock.lock().await;

		let group_commitment_bytes: [u8; 32] = req
			.group_commitment
			.clone()
			.try_into()
			.map_err(|_| Status::invalid_argument("group_commitment must be 32 bytes"))?;
		let group_commitment = Point::from_bytes(&group_commitment_bytes)
			.ok_or_else(|| Status::invalid_argument("group_commitment is not a valid point"))?;

		self.check_admission(&session.chain_id, position, &req.signed_bytes).await?;

		let participant_set: BTreeSet<u32> = req.participant_shard_ids.iter().copied().collect();
		let nonce_share = nonce::combine_shares(
			req.shards_for_me
				.iter()
				.map(|s| self.decrypt_shard(s))
				.collect::<Result<Vec<_>>>()
				.map_err(|e| Status::internal(e.to_string()))?,
		);
		let lambda = shamir::lagrange_coefficient(self.config.self_shard_id, &participant_set);
		let nonce_share = lambda * nonce_share;
		let key_share = lambda * self.config.key_share;
		let challenge =
			schnorr::build_challenge(self.config.aggregate_public_key, group_commitment, &req.signed_bytes);
		let response = schnorr::build_response(nonce_share, key_share, challenge);

		self.sessions.remove(&key).await;

		Ok(SetNoncesAndSignResponse { partial_signature: response.to_bytes().to_vec() })
	}

	async fn handle_append_entries(
		&self,
		req: AppendEntriesRequest,
	) -> std::result::Result<AppendEntriesResponse, Status> {
		let entries = req.entries.clone();
		let (term, success) = {
			let mut state = self.raft.lock().await;
			state.handle_append_entries(
				req.term,
				req.leader_shard_id,
				req.prev_log_index,
				req.prev_log_term,
				req.entries,
				req.leader_commit,
			)
		};

		// Entries accepted into the Raft log may carry a replicated HWM
		// commit (spec §4.I); apply those to this cosigner's own durable
		// store so a follower's stored signature matches the leader's.
		if success {
			for entry in entries {
				if entry.chain_id.is_empty() || entry.new_hwm.is_empty() {
					continue;
				}
				if let Ok(hwm) = bincode::deserialize::<HighWaterMark>(&entry.new_hwm) {
					if let Err(e) = self.store.commit(&entry.chain_id, &hwm).await {
						tracing::warn!(chain_id = %entry.chain_id, error = %e, "failed to apply replicated HWM");
					}
				}
			}
		}

		Ok(AppendEntriesResponse { term, success })
	}

	async fn handle_request_vote(
		&self,
		req: RequestVoteRequest,
	) -> std::result::Result<RequestVoteResponse, Status> {
		let mut state = self.raft.lock().await;
		let (term, vote_granted) = state.handle_request_vote(
			req.term,
			req.candidate_shard_id,
			req.last_log_index,
			req.last_log_term,
		);
		Ok(RequestVoteResponse { term, vote_granted })
	}

	async fn handle_transfer_leadership(
		&self,
		req: TransferLeadershipRequest,
	) -> std::result::Result<TransferLeadershipResponse, Status> {
		self.transfer_leadership(req.target_shard_id)
			.await
			.map_err(|e| Status::internal(e.to_string()))?;
		Ok(TransferLeadershipResponse { accepted: true })
	}

	async fn handle_get_leader(
		&self,
		_req: GetLeaderRequest,
	) -> std::result::Result<GetLeaderResponse, Status> {
		let (leader_shard_id, term) = self.get_leader().await;
		Ok(GetLeaderResponse { leader_shard_id, term })
	}

	async fn handle_health(&self, _req: HealthRequest) -> std::result::Result<HealthResponse, Status> {
		Ok(HealthResponse { shard_id: self.config.self_shard_id })
	}

	async fn handle_timeout_now(
		&self,
		_req: TimeoutNowRequest,
	) -> std::result::Result<TimeoutNowResponse, Status> {
		let mut state = self.raft.lock().await;
		state.become_candidate();
		state.become_leader();
		Ok(TimeoutNowResponse {})
	}
}
