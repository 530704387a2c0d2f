//! Raft-style leader election and log replication (spec §4.I). Scoped to
//! what this signer needs: a single leader decides HWM commits, a quorum of
//! `⌊N/2⌋ + 1` cosigners must acknowledge a commit, and a transfer-leadership
//! admin call exists for planned failover. This is not a general-purpose
//! Raft log — entries only ever carry one kind of payload, a sign-state
//! commit — so there is no snapshotting or log compaction, just a bounded
//! in-memory history.

use std::time::Instant;

use crate::proto::cosigner::LogEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
	Follower,
	Candidate,
	Leader,
}

/// The replicated state a cosigner keeps for Raft. `last_heartbeat` isn't
/// part of the Raft-paper state proper; it's what the election timer reads
/// to decide whether to start a new election.
pub struct RaftState {
	pub role: Role,
	pub current_term: u64,
	pub voted_for: Option<u32>,
	pub log: Vec<LogEntry>,
	pub commit_index: u64,
	pub leader_id: Option<u32>,
	pub last_heartbeat: Instant,
	pub self_shard_id: u32,
}

impl RaftState {
	pub fn new(self_shard_id: u32) -> Self {
		RaftState {
			role: Role::Follower,
			current_term: 0,
			voted_for: None,
			log: Vec::new(),
			commit_index: 0,
			leader_id: None,
			last_heartbeat: Instant::now(),
			self_shard_id,
		}
	}

	pub fn is_leader(&self) -> bool {
		self.role == Role::Leader
	}

	pub fn last_log_index(&self) -> u64 {
		self.log.last().map(|e| e.index).unwrap_or(0)
	}

	pub fn last_log_term(&self) -> u64 {
		self.log.last().map(|e| e.term).unwrap_or(0)
	}

	/// Step down to `Follower` on observing a strictly greater term, as
	/// every Raft RPC handler must before processing the rest of the
	/// message (Raft §5.1).
	fn observe_term(&mut self, term: u64) {
		if term > self.current_term {
			self.current_term = term;
			self.voted_for = None;
			self.role = Role::Follower;
		}
	}

	/// Begin a new election: bump the term, vote for self, become candidate.
	pub fn become_candidate(&mut self) {
		self.current_term += 1;
		self.voted_for = Some(self.self_shard_id);
		self.role = Role::Candidate;
		self.last_heartbeat = Instant::now();
	}

	pub fn become_leader(&mut self) {
		self.role = Role::Leader;
		self.leader_id = Some(self.self_shard_id);
	}

	/// Handle an inbound `RequestVote`. Returns `(current_term, vote_granted)`.
	pub fn handle_request_vote(
		&mut self,
		term: u64,
		candidate_shard_id: u32,
		last_log_index: u64,
		last_log_term: u64,
	) -> (u64, bool) {
		self.observe_term(term);

		if term < self.current_term {
			return (self.current_term, false);
		}

		let already_voted_elsewhere =
			self.voted_for.is_some() && self.voted_for != Some(candidate_shard_id);
		let candidate_log_is_at_least_as_up_to_date = (last_log_term, last_log_index)
			>= (self.last_log_term(), self.last_log_index());

		if !already_voted_elsewhere && candidate_log_is_at_least_as_up_to_date {
			self.voted_for = Some(candidate_shard_id);
			self.last_heartbeat = Instant::now();
			(self.current_term, true)
		} else {
			(self.current_term, false)
		}
	}

	/// Handle an inbound `AppendEntries` (including empty heartbeats).
	/// Returns `(current_term, success)`.
	pub fn handle_append_entries(
		&mut self,
		term: u64,
		leader_shard_id: u32,
		prev_log_index: u64,
		prev_log_term: u64,
		entries: Vec<LogEntry>,
		leader_commit: u64,
	) -> (u64, bool) {
		self.observe_term(term);

		if term < self.current_term {
			return (self.current_term, false);
		}

		self.role = Role::Follower;
		self.leader_id = Some(leader_shard_id);
		self.last_heartbeat = Instant::now();

		if prev_log_index > 0 {
			let matches = self
				.log
				.iter()
				.find(|e| e.index == prev_log_index)
				.map(|e| e.term == prev_log_term)
				.unwrap_or(false);
			if !matches {
				return (self.current_term, false);
			}
		}

		self.log.retain(|e| e.index <= prev_log_index);
		self.log.extend(entries);

		if leader_commit > self.commit_index {
			self.commit_index = leader_commit.min(self.last_log_index());
		}

		(self.current_term, true)
	}

	/// Leader-side: append a new entry to the local log ahead of replication.
	pub fn append_local(&mut self, mut entry: LogEntry) -> LogEntry {
		entry.term = self.current_term;
		entry.index = self.last_log_index() + 1;
		self.log.push(entry.clone());
		entry
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(index: u64, term: u64) -> LogEntry {
		LogEntry {
			term,
			index,
			chain_id: "chain".into(),
			new_hwm: vec![],
			signature: vec![],
			signed_bytes: vec![],
		}
	}

	#[test]
	fn grants_vote_to_candidate_with_up_to_date_log() {
		let mut state = RaftState::new(1);
		let (term, granted) = state.handle_request_vote(1, 2, 0, 0);
		assert_eq!(term, 1);
		assert!(granted);
	}

	#[test]
	fn refuses_second_vote_in_same_term() {
		let mut state = RaftState::new(1);
		state.handle_request_vote(1, 2, 0, 0);
		let (_, granted) = state.handle_request_vote(1, 3, 0, 0);
		assert!(!granted);
	}

	#[test]
	fn append_entries_from_stale_term_is_rejected() {
		let mut state = RaftState::new(1);
		state.current_term = 5;
		let (term, success) = state.handle_append_entries(3, 2, 0, 0, vec![], 0);
		assert_eq!(term, 5);
		assert!(!success);
	}

	#[test]
	fn append_entries_extends_log_and_advances_commit_index() {
		let mut state = RaftState::new(1);
		let (_, success) = state.handle_append_entries(1, 2, 0, 0, vec![entry(1, 1)], 1);
		assert!(success);
		assert_eq!(state.commit_index, 1);
		assert_eq!(state.leader_id, Some(2));
	}
}
