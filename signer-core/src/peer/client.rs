//! Outbound RPC to one cosigner peer (spec §4.G). Every call carries the
//! default 1500ms deadline; the calling site (session orchestration or Raft
//! election) treats a timeout the same as a transport error — the peer is
//! unresponsive for this attempt. The channel itself is mutually
//! authenticated: `connect` runs the same handshake as the secret transport
//! before handing `tonic` a byte stream, verifying the dialed peer's
//! identity against the registry rather than trusting a bare `http://` dial
//! (spec §4.G/§6).

use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::VerifyingKey;
use tonic::transport::Channel;
use tonic::Request;

use crate::error::{Result, SignerError};
use crate::peer::secure_channel;
use crate::proto::cosigner::cosigner_client::CosignerClient;
use crate::proto::cosigner::{
	AppendEntriesRequest, AppendEntriesResponse, GetLeaderRequest, GetLeaderResponse,
	GetNoncesRequest, GetNoncesResponse, HealthRequest, HealthResponse, RequestVoteRequest,
	RequestVoteResponse, SetNoncesAndSignRequest, SetNoncesAndSignResponse, TimeoutNowRequest,
	TimeoutNowResponse, TransferLeadershipRequest, TransferLeadershipResponse,
};
use crate::transport::handshake::Identity;

/// Default per-call deadline for peer and Raft RPCs (spec §4.G, §5).
pub const PEER_CALL_DEADLINE: Duration = Duration::from_millis(1500);

/// A connection to one cosigner, identified by its `shard_id` for error
/// reporting.
pub struct PeerClient {
	shard_id: u32,
	inner: CosignerClient<Channel>,
	deadline: Duration,
}

impl PeerClient {
	/// Dial `addr` and authenticate it as `expected_peer` before any RPC is
	/// sent, proving `identity` to the other side in turn.
	pub async fn connect(
		shard_id: u32,
		addr: &str,
		identity: Arc<Identity>,
		expected_peer: VerifyingKey,
	) -> Result<Self> {
		let target = addr.to_string();
		let connector = tower::service_fn(move |_uri: tonic::transport::Uri| {
			let target = target.clone();
			let identity = identity.clone();
			async move {
				secure_channel::connect_authenticated(&target, identity, expected_peer)
					.await
					.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
			}
		});
		let channel = Channel::from_shared(format!("http://{addr}"))
			.map_err(|e| SignerError::PeerUnreachable { shard_id, reason: e.to_string() })?
			.connect_with_connector(connector)
			.await
			.map_err(|e| SignerError::PeerUnreachable { shard_id, reason: e.to_string() })?;
		Ok(PeerClient { shard_id, inner: CosignerClient::new(channel), deadline: PEER_CALL_DEADLINE })
	}

	fn request<T>(&self, message: T) -> Request<T> {
		let mut request = Request::new(message);
		request.set_timeout(self.deadline);
		request
	}

	fn map_err<T>(&self, result: std::result::Result<tonic::Response<T>, tonic::Status>) -> Result<T> {
		result.map(|r| r.into_inner()).map_err(|status| SignerError::PeerUnreachable {
			shard_id: self.shard_id,
			reason: status.to_string(),
		})
	}

	pub async fn get_nonces(&mut self, req: GetNoncesRequest) -> Result<GetNoncesResponse> {
		let r = self.inner.get_nonces(self.request(req)).await;
		self.map_err(r)
	}

	pub async fn set_nonces_and_sign(
		&mut self,
		req: SetNoncesAndSignRequest,
	) -> Result<SetNoncesAndSignResponse> {
		let r = self.inner.set_nonces_and_sign(self.request(req)).await;
		self.map_err(r)
	}

	pub async fn append_entries(&mut self, req: AppendEntriesRequest) -> Result<AppendEntriesResponse> {
		let r = self.inner.append_entries(self.request(req)).await;
		self.map_err(r)
	}

	pub async fn request_vote(&mut self, req: RequestVoteRequest) -> Result<RequestVoteResponse> {
		let r = self.inner.request_vote(self.request(req)).await;
		self.map_err(r)
	}

	pub async fn transfer_leadership(
		&mut self,
		req: TransferLeadershipRequest,
	) -> Result<TransferLeadershipResponse> {
		let r = self.inner.transfer_leadership(self.request(req)).await;
		self.map_err(r)
	}

	pub async fn get_leader(&mut self, req: GetLeaderRequest) -> Result<GetLeaderResponse> {
		let r = self.inner.get_leader(self.request(req)).await;
		self.map_err(r)
	}

	pub async fn health(&mut self, req: HealthRequest) -> Result<HealthResponse> {
		let r = self.inner.health(self.request(req)).await;
		self.map_err(r)
	}

	pub async fn timeout_now(&mut self, req: TimeoutNowRequest) -> Result<TimeoutNowResponse> {
		let r = self.inner.timeout_now(self.request(req)).await;
		self.map_err(r)
	}
}
