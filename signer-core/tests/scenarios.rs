//! End-to-end scenarios driving a real cluster of `ThresholdSigner`s over
//! loopback gRPC (the cosigner peer layer has no injectable transport, so
//! "in-process" here means real `tonic` servers bound to OS-assigned
//! localhost ports) plus, for the sentry-reconnect scenario, a hand-rolled
//! fake sentry speaking the secret-transport handshake directly, the way
//! `transport::handshake`'s own tests drive both sides of a handshake
//! without a real socket.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};
use prost::Message;
use rand::rngs::OsRng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tonic::transport::Server;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

use signer_core::chain::{SignKind, SignRequest};
use signer_core::codec::CanonicalVote;
use signer_core::connector::{SentryConfig, SentryConnector};
use signer_core::crypto::{shamir, Point, Scalar};
use signer_core::error::SignerError;
use signer_core::facade::SigningFacade;
use signer_core::peer::service::{CosignerService, PeerHandler};
use signer_core::peer::authenticated_incoming;
use signer_core::proto::cosigner::cosigner_server::CosignerServer;
use signer_core::proto::privval::{priv_val_message::Sum, PingRequest, PrivValMessage};
use signer_core::raft::state::{RaftState, Role};
use signer_core::registry::{CosignerEntry, CosignerRegistry};
use signer_core::signer::{ThresholdSigner, ThresholdSignerConfig};
use signer_core::single::LocalSingleSigner;
use signer_core::store::SignStateStore;
use signer_core::transport::handshake::{self, Identity};
use signer_core::transport::framing::SealedChannel;

struct Cosigner {
	shard_id: u32,
	facade: Arc<ThresholdSigner>,
	raft: Arc<Mutex<RaftState>>,
	stop: watch::Sender<bool>,
	store_path: PathBuf,
}

struct Cluster {
	cosigners: Vec<Cosigner>,
	aggregate_public_key: Point,
	_tmp: tempfile::TempDir,
}

impl Cluster {
	fn get(&self, shard_id: u32) -> &Cosigner {
		self.cosigners.iter().find(|c| c.shard_id == shard_id).expect("shard exists")
	}
}

/// Builds `n` cosigners sharing an `n`-of-`k` threshold Ed25519 key, each
/// behind a real `tonic` server on an OS-assigned loopback port, all
/// registered in one shared `CosignerRegistry`.
async fn build_cluster(n: u8, k: u8) -> Cluster {
	let tmp = tempfile::tempdir().unwrap();
	let secret = Scalar::random(&mut OsRng);
	let aggregate_public_key = Point::from_scalar(&secret);
	let shares = shamir::split(secret, k, n, &mut OsRng);

	let mut listeners = Vec::new();
	let mut entries = Vec::new();
	let mut ecies_secrets = Vec::new();
	let mut identities = Vec::new();
	for share in &shares {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let ecies_secret = StaticSecret::random_from_rng(OsRng);
		let identity = Arc::new(Identity::from_signing_key(SigningKey::generate(&mut OsRng)));
		entries.push(CosignerEntry {
			shard_id: share.index,
			p2p_addr: addr.to_string(),
			identity_key: identity.public_key(),
			ecies_public_key: XPublicKey::from(&ecies_secret),
			public_key_share: Point::from_scalar(&share.value),
		});
		listeners.push(listener);
		ecies_secrets.push(ecies_secret);
		identities.push(identity);
	}
	let registry = CosignerRegistry::new(entries);
	let acceptable_peers = Arc::new(registry.iter().map(|e| e.identity_key).collect::<Vec<_>>());

	let mut cosigners = Vec::new();
	for (((share, listener), ecies_secret), identity) in
		shares.into_iter().zip(listeners).zip(ecies_secrets).zip(identities)
	{
		let store_path = tmp.path().join(format!("shard-{}", share.index));
		let config = ThresholdSignerConfig {
			self_shard_id: share.index,
			threshold: k,
			registry: registry.clone(),
			key_share: share.value,
			aggregate_public_key,
			ecies_secret,
			session_timeout: Duration::from_secs(2),
			identity: identity.clone(),
		};
		let store = SignStateStore::new(store_path.clone());
		let raft = Arc::new(Mutex::new(RaftState::new(share.index)));
		let facade = Arc::new(ThresholdSigner::new(config, store, raft.clone()));

		let (stop_tx, stop_rx) = watch::channel(false);
		let peer_handler: Arc<dyn PeerHandler> = facade.clone();
		let incoming = authenticated_incoming(listener, identity, acceptable_peers.clone());
		tokio::spawn(async move {
			let _ = Server::builder()
				.add_service(CosignerServer::new(CosignerService::new(peer_handler)))
				.serve_with_incoming_shutdown(incoming, async move {
					let _ = stop_rx.changed().await;
				})
				.await;
		});

		cosigners.push(Cosigner { shard_id: share.index, facade, raft, stop: stop_tx, store_path });
	}

	tokio::time::sleep(Duration::from_millis(50)).await;
	Cluster { cosigners, aggregate_public_key, _tmp: tmp }
}

async fn elect_leader(cluster: &Cluster, leader_shard_id: u32) {
	for cosigner in &cluster.cosigners {
		let mut state = cosigner.raft.lock().await;
		state.leader_id = Some(leader_shard_id);
		state.role = if cosigner.shard_id == leader_shard_id { Role::Leader } else { Role::Follower };
	}
}

fn vote_request(height: u64, round: i32, kind: SignKind, block_id: &[u8], ts: i64) -> SignRequest {
	CanonicalVote {
		chain_id: "test-chain".into(),
		height,
		round,
		kind,
		block_id: block_id.to_vec(),
		timestamp_seconds: ts,
		timestamp_nanos: 0,
	}
	.into_sign_request()
}

fn assert_valid_signature(aggregate_public_key: Point, signed_bytes: &[u8], signature: &[u8]) {
	let verifying_key = VerifyingKey::from_bytes(&aggregate_public_key.as_bytes()).unwrap();
	let sig_bytes: [u8; 64] = signature.to_vec().try_into().expect("64-byte signature");
	verifying_key.verify(signed_bytes, &Signature::from_bytes(&sig_bytes)).expect("signature verifies");
}

#[tokio::test]
async fn happy_path_two_of_three_signs_and_replays_identically() {
	let cluster = build_cluster(3, 2).await;
	elect_leader(&cluster, 1).await;
	let leader = cluster.get(1);

	let request = vote_request(10, 0, SignKind::Prevote, b"block-1", 1_700_000_000);
	let (signed_bytes, signature) = leader.facade.sign(request.clone()).await.unwrap();
	assert_valid_signature(cluster.aggregate_public_key, &signed_bytes, &signature);

	let stored = SignStateStore::new(&leader.store_path).load("test-chain").await.unwrap().unwrap();
	assert_eq!(stored.position.height, 10);
	assert_eq!(stored.position.kind, SignKind::Prevote);

	// Asking the same request again returns a byte-identical signature.
	let (_, replayed_signature) = leader.facade.sign(request).await.unwrap();
	assert_eq!(signature, replayed_signature);
}

#[tokio::test]
async fn beyond_block_is_rejected_without_changing_state() {
	let cluster = build_cluster(3, 2).await;
	elect_leader(&cluster, 1).await;
	let leader = cluster.get(1);

	leader
		.facade
		.sign(vote_request(10, 0, SignKind::Precommit, b"block-1", 1_700_000_000))
		.await
		.unwrap();

	let err = leader
		.facade
		.sign(vote_request(10, 0, SignKind::Prevote, b"block-1", 1_700_000_001))
		.await
		.unwrap_err();
	assert!(matches!(err, SignerError::BeyondBlock(_)));

	let stored = SignStateStore::new(&leader.store_path).load("test-chain").await.unwrap().unwrap();
	assert_eq!(stored.position.kind, SignKind::Precommit);
}

#[tokio::test]
async fn conflicting_data_at_the_same_position_is_rejected() {
	let cluster = build_cluster(3, 2).await;
	elect_leader(&cluster, 1).await;
	let leader = cluster.get(1);

	leader
		.facade
		.sign(vote_request(10, 0, SignKind::Prevote, b"block-1", 1_700_000_000))
		.await
		.unwrap();

	let err = leader
		.facade
		.sign(vote_request(10, 0, SignKind::Prevote, b"block-2", 1_700_000_000))
		.await
		.unwrap_err();
	assert!(matches!(err, SignerError::ConflictingData(_)));
}

#[tokio::test]
async fn one_downed_cosigner_still_reaches_quorum_two_downed_times_out() {
	let cluster = build_cluster(3, 2).await;
	elect_leader(&cluster, 1).await;
	let leader = cluster.get(1);

	// Stop cosigner 2; the leader (1) and cosigner 3 still make quorum.
	let _ = cluster.get(2).stop.send(true);
	tokio::time::sleep(Duration::from_millis(50)).await;

	let (signed_bytes, signature) =
		leader.facade.sign(vote_request(10, 0, SignKind::Prevote, b"block-1", 1_700_000_000)).await.unwrap();
	assert_valid_signature(cluster.aggregate_public_key, &signed_bytes, &signature);

	// Now stop cosigner 3 too: only the leader itself remains, below threshold 2.
	let _ = cluster.get(3).stop.send(true);
	tokio::time::sleep(Duration::from_millis(50)).await;

	let err = leader
		.facade
		.sign(vote_request(11, 0, SignKind::Prevote, b"block-2", 1_700_000_001))
		.await
		.unwrap_err();
	assert!(matches!(err, SignerError::QuorumTimeout));

	let stored = SignStateStore::new(&leader.store_path).load("test-chain").await.unwrap().unwrap();
	assert_eq!(stored.position.height, 10, "HWM must not advance on a failed session");
}

#[tokio::test]
async fn leader_transfer_moves_signing_authority() {
	let cluster = build_cluster(3, 2).await;
	elect_leader(&cluster, 1).await;
	let old_leader = cluster.get(1);
	let new_leader = cluster.get(3);

	old_leader.facade.transfer_leadership(3).await.unwrap();

	assert_eq!(new_leader.raft.lock().await.role, Role::Leader);
	assert_eq!(old_leader.raft.lock().await.role, Role::Follower);

	let err = old_leader
		.facade
		.sign(vote_request(20, 0, SignKind::Prevote, b"block-1", 1_700_000_000))
		.await
		.unwrap_err();
	assert!(matches!(err, SignerError::NotLeader { .. }));

	let (signed_bytes, signature) = new_leader
		.facade
		.sign(vote_request(20, 0, SignKind::Prevote, b"block-1", 1_700_000_000))
		.await
		.unwrap();
	assert_valid_signature(cluster.aggregate_public_key, &signed_bytes, &signature);
}

/// Accepts one connection, completes the responder side of the handshake,
/// and returns the sealed channel plus the raw halves for framing I/O.
async fn fake_sentry_accept(
	listener: &TcpListener,
	sentry_identity: &Identity,
	expected_signer_key: &VerifyingKey,
) -> (SealedChannel, Arc<Mutex<tokio::io::ReadHalf<TcpStream>>>, Arc<Mutex<tokio::io::WriteHalf<TcpStream>>>) {
	let (stream, _) = listener.accept().await.unwrap();
	let (reader, writer) = tokio::io::split(stream);
	let reader = Arc::new(Mutex::new(reader));
	let writer = Arc::new(Mutex::new(writer));

	let keys = {
		let w = writer.clone();
		let r = reader.clone();
		handshake::respond(
			sentry_identity,
			expected_signer_key,
			move |bytes| {
				let w = w.clone();
				Box::pin(async move { w.lock().await.write_all(&bytes).await })
			},
			move || {
				let r = r.clone();
				Box::pin(async move {
					let mut buf = vec![0u8; 128];
					r.lock().await.read_exact(&mut buf).await?;
					Ok(buf)
				})
			},
		)
		.await
		.unwrap()
	};
	(SealedChannel::new(keys), reader, writer)
}

async fn fake_sentry_send_ping(
	channel: &SealedChannel,
	writer: &Arc<Mutex<tokio::io::WriteHalf<TcpStream>>>,
) {
	let request = PrivValMessage { sum: Some(Sum::PingRequest(PingRequest {})) }.encode_to_vec();
	let frame = channel.seal(&request).unwrap();
	writer.lock().await.write_all(&frame).await.unwrap();
}

async fn fake_sentry_read_pong(
	channel: &SealedChannel,
	reader: &Arc<Mutex<tokio::io::ReadHalf<TcpStream>>>,
) {
	let mut len_prefix = [0u8; 4];
	reader.lock().await.read_exact(&mut len_prefix).await.unwrap();
	let len = SealedChannel::read_length_prefix(len_prefix).unwrap();
	let mut ciphertext = vec![0u8; len];
	reader.lock().await.read_exact(&mut ciphertext).await.unwrap();
	let plaintext = channel.open(&ciphertext).unwrap();
	let decoded = PrivValMessage::decode(plaintext.as_slice()).unwrap();
	assert!(matches!(decoded.sum, Some(Sum::PingResponse(_))));
}

#[tokio::test]
async fn sentry_reconnects_after_a_dropped_connection() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let sentry_addr = listener.local_addr().unwrap();

	let signer_identity = Identity::from_signing_key(SigningKey::generate(&mut OsRng));
	let sentry_identity = Identity::from_signing_key(SigningKey::generate(&mut OsRng));
	let signer_pub = signer_identity.public_key();
	let sentry_pub = sentry_identity.public_key();

	let store_dir = tempfile::tempdir().unwrap();
	let facade = Arc::new(LocalSingleSigner::new(
		SigningKey::from_bytes(&[5u8; 32]),
		SignStateStore::new(store_dir.path()),
	));

	let config = SentryConfig { chain_id: "test-chain".into(), address: sentry_addr.to_string(), expected_sentry_key: sentry_pub };
	let (_stop_tx, stop_rx) = watch::channel(false);
	let connector = SentryConnector::new(config, Arc::new(signer_identity), facade, stop_rx);
	tokio::spawn(connector.run());

	// First connection: handshake, send one ping, then drop the socket
	// without reading the response so the signer's next write fails.
	let (channel_a, reader_a, writer_a) =
		fake_sentry_accept(&listener, &sentry_identity, &signer_pub).await;
	fake_sentry_send_ping(&channel_a, &writer_a).await;
	drop(channel_a);
	drop(reader_a);
	drop(writer_a);

	// The connector's retry backoff is fixed; give it room to notice the
	// severed connection and redial within its retry window.
	let (channel_b, reader_b, writer_b) = tokio::time::timeout(
		Duration::from_secs(6),
		fake_sentry_accept(&listener, &sentry_identity, &signer_pub),
	)
	.await
	.expect("signer reconnects after its retry interval");

	fake_sentry_send_ping(&channel_b, &writer_b).await;
	fake_sentry_read_pong(&channel_b, &reader_b).await;
}
