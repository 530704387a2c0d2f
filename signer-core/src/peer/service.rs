//! Inbound side of the cosigner peer layer (spec §4.G). `CosignerService`
//! is the thin `tonic` adapter; all real behavior lives behind
//! `PeerHandler`, implemented by the session orchestrator (`ThresholdSigner`)
//! and the Raft state machine so this module stays free of signing logic.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::{Request, Response, Status};

use crate::proto::cosigner::cosigner_server::Cosigner;
use crate::proto::cosigner::{
	AppendEntriesRequest, AppendEntriesResponse, GetLeaderRequest, GetLeaderResponse,
	GetNoncesRequest, GetNoncesResponse, HealthRequest, HealthResponse, RequestVoteRequest,
	RequestVoteResponse, SetNoncesAndSignRequest, SetNoncesAndSignResponse, TimeoutNowRequest,
	TimeoutNowResponse, TransferLeadershipRequest, TransferLeadershipResponse,
};

/// What the inbound RPC surface needs from the rest of the cosigner.
#[async_trait]
pub trait PeerHandler: Send + Sync {
	async fn handle_get_nonces(&self, req: GetNoncesRequest) -> Result<GetNoncesResponse, Status>;
	async fn handle_set_nonces_and_sign(
		&self,
		req: SetNoncesAndSignRequest,
	) -> Result<SetNoncesAndSignResponse, Status>;
	async fn handle_append_entries(
		&self,
		req: AppendEntriesRequest,
	) -> Result<AppendEntriesResponse, Status>;
	async fn handle_request_vote(&self, req: RequestVoteRequest) -> Result<RequestVoteResponse, Status>;
	async fn handle_transfer_leadership(
		&self,
		req: TransferLeadershipRequest,
	) -> Result<TransferLeadershipResponse, Status>;
	async fn handle_get_leader(&self, req: GetLeaderRequest) -> Result<GetLeaderResponse, Status>;
	async fn handle_health(&self, req: HealthRequest) -> Result<HealthResponse, Status>;
	async fn handle_timeout_now(&self, req: TimeoutNowRequest) -> Result<TimeoutNowResponse, Status>;
}

pub struct CosignerService {
	handler: Arc<dyn PeerHandler>,
}

impl CosignerService {
	pub fn new(handler: Arc<dyn PeerHandler>) -> Self {
		CosignerService { handler }
	}
}

#[tonic::async_trait]
impl Cosigner for CosignerService {
	async fn get_nonces(
		&self,
		request: Request<GetNoncesRequest>,
	) -> Result<Response<GetNoncesResponse>, Status> {
		self.handler.handle_get_nonces(request.into_inner()).await.map(Response::new)
	}

	async fn set_nonces_and_sign(
		&self,
		request: Request<SetNoncesAndSignRequest>,
	) -> Result<Response<SetNoncesAndSignResponse>, Status> {
		self.handler.handle_set_nonces_and_sign(request.into_inner()).await.map(Response::new)
	}

	async fn append_entries(
		&self,
		request: Request<AppendEntriesRequest>,
	) -> Result<Response<AppendEntriesResponse>, Status> {
		self.handler.handle_append_entries(request.into_inner()).await.map(Response::new)
	}

	async fn request_vote(
		&self,
		request: Request<RequestVoteRequest>,
	) -> Result<Response<RequestVoteResponse>, Status> {
		self.handler.handle_request_vote(request.into_inner()).await.map(Response::new)
	}

	async fn transfer_leadership(
		&self,
		request: Request<TransferLeadershipRequest>,
	) -> Result<Response<TransferLeadershipResponse>, Status> {
		self.handler.handle_transfer_leadership(request.into_inner()).await.map(Response::new)
	}

	async fn get_leader(
		&self,
		request: Request<GetLeaderRequest>,
	) -> Result<Response<GetLeaderResponse>, Status> {
		self.handler.handle_get_leader(request.into_inner()).await.map(Response::new)
	}

	async fn health(&self, request: Request<HealthRequest>) -> Result<Response<HealthResponse>, Status> {
		self.handler.handle_health(request.into_inner()).await.map(Response::new)
	}

	async fn timeout_now(
		&self,
		request: Request<TimeoutNowRequest>,
	) -> Result<Response<TimeoutNowResponse>, Status> {
		self.handler.handle_timeout_now(request.into_inner()).await.map(Response::new)
	}
}
