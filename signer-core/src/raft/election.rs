//! Background Raft tasks (spec §5): one heartbeat ticker while leader, one
//! election timer otherwise. Grounded in the "one background task for
//! leader election heartbeats" scheduling model the concurrency section
//! describes; peer calls reuse the same 1500ms deadline as the rest of the
//! cosigner peer layer.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::peer::client::PeerClient;
use crate::proto::cosigner::{AppendEntriesRequest, RequestVoteRequest, TimeoutNowRequest};
use crate::raft::state::{RaftState, Role};
use crate::registry::CosignerRegistry;
use crate::transport::handshake::Identity;

/// Heartbeats go out this often while leader.
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(300);
/// Election timeouts are randomized within this window to avoid split votes.
const ELECTION_TIMEOUT_MIN: Duration = Duration::from_millis(800);
const ELECTION_TIMEOUT_MAX: Duration = Duration::from_millis(1500);

pub struct RaftDriver {
	state: Arc<Mutex<RaftState>>,
	registry: CosignerRegistry,
	identity: Arc<Identity>,
}

impl RaftDriver {
	pub fn new(state: Arc<Mutex<RaftState>>, registry: CosignerRegistry, identity: Arc<Identity>) -> Self {
		RaftDriver { state, registry, identity }
	}

    /// Runs until `stop` fires, alternating between the election-timeout
    /// wait and, once elected, the heartbeat ticker.
	pub async fn run(self, mut stop: watch::Receiver<bool>) {
		loop {
			if *stop.borrow() {
				return;
			}

			let is_leader = self.state.lock().await.is_leader();
			if is_leader {
				self.send_heartbeats().await;
				tokio::select! {
					_ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {}
					_ = stop.changed() => return,
				}
			} else {
				let timeout = random_election_timeout();
				let elapsed_since_heartbeat = self.state.lock().await.last_heartbeat.elapsed();
				if elapsed_since_heartbeat >= timeout {
					self.run_election().await;
				}
				tokio::select! {
					_ = tokio::time::sleep(Duration::from_millis(50)) => {}
					_ = stop.changed() => return,
				}
			}
		}
	}

	async fn send_heartbeats(&self) {
		let (term, self_id, prev_index, prev_term, commit) = {
			let state = self.state.lock().await;
			(
				state.current_term,
				state.self_shard_id,
				state.last_log_index(),
				state.last_log_term(),
				state.commit_index,
			)
		};

		for shard_id in self.registry.shard_ids().filter(|id| *id != self_id) {
			let Some(entry) = self.registry.get(shard_id) else { continue };
			let addr = entry.p2p_addr.clone();
			let req = AppendEntriesRequest {
				term,
				leader_shard_id: self_id,
				prev_log_index: prev_index,
				prev_log_term: prev_term,
				entries: vec![],
				leader_commit: commit,
			};
			if let Ok(mut client) =
				PeerClient::connect(shard_id, &addr, self.identity.clone(), entry.identity_key).await
			{
				if let Err(e) = client.append_entries(req).await {
					warn!(shard_id, error = %e, "heartbeat failed");
				}
			}
		}
	}

	async fn run_election(&self) {
		let (term, self_id, last_index, last_term) = {
			let mut state = self.state.lock().await;
			state.become_candidate();
			(state.current_term, state.self_shard_id, state.last_log_index(), state.last_log_term())
		};

		let mut votes = 1usize; // vote for self
		for shard_id in self.registry.shard_ids().filter(|id| *id != self_id) {
			let Some(entry) = self.registry.get(shard_id) else { continue };
			let addr = entry.p2p_addr.clone();
			let req = RequestVoteRequest {
				term,
				candidate_shard_id: self_id,
				last_log_index: last_index,
				last_log_term: last_term,
			};
			if let Ok(mut client) =
				PeerClient::connect(shard_id, &addr, self.identity.clone(), entry.identity_key).await
			{
				if let Ok(resp) = client.request_vote(req).await {
					if resp.vote_granted {
						votes += 1;
					}
				}
			}
		}

		let quorum = self.registry.quorum();
		let mut state = self.state.lock().await;
		if state.role == Role::Candidate && state.current_term == term && votes >= quorum {
			state.become_leader();
			info!(term, votes, quorum, "elected leader");
		}
	}

	/// Operator-initiated transfer (spec §6): the current leader steps down
	/// and prompts `target_shard_id` to start an election immediately rather
	/// than waiting out its timeout.
	pub async fn transfer_to(&self, target_shard_id: u32) -> crate::error::Result<()> {
		let entry = self.registry.get(target_shard_id).ok_or_else(|| {
			crate::error::SignerError::InvalidClusterConfig(format!("unknown target shard {target_shard_id}"))
		})?;
		let addr = entry.p2p_addr.clone();
		let identity_key = entry.identity_key;

		{
			let mut state = self.state.lock().await;
			state.role = Role::Follower;
			state.leader_id = None;
		}

		let mut client = PeerClient::connect(target_shard_id, &addr, self.identity.clone(), identity_key).await?;
		client.timeout_now(TimeoutNowRequest {}).await?;
		Ok(())
	}
}

fn random_election_timeout() -> Duration {
	let millis = rand::thread_rng()
		.gen_range(ELECTION_TIMEOUT_MIN.as_millis()..=ELECTION_TIMEOUT_MAX.as_millis());
	Duration::from_millis(millis as u64)
}
