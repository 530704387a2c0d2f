//! Sentry connector (spec §4.C): one task per sentry, cycling
//! `disconnected → dialing → handshaking → serving → disconnected`. Timing
//! constants mirror the reconnect loop this component is grounded on: a
//! short dial timeout and a fixed retry backoff, rather than the slower
//! exponential schedule used for cosigner-to-cosigner peer links.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::chain::ChainId;
use crate::codec::{decode_request, encode_response, InboundRequest, OutboundResponse};
use crate::facade::SigningFacade;
use crate::transport::framing::SealedChannel;
use crate::transport::handshake::{self, Identity};

/// Dial attempts give up after this long (spec §4.C).
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
/// After any dial or handshake failure, wait this long before retrying.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorState {
	Disconnected,
	Dialing,
	Handshaking,
	Serving,
}

/// Configuration for one sentry attachment.
pub struct SentryConfig {
	pub chain_id: ChainId,
	pub address: String,
	pub expected_sentry_key: ed25519_dalek::VerifyingKey,
}

/// Drives the per-sentry state machine until `stop` fires. Runs forever
/// otherwise: dial/handshake failures are expected steady-state events, not
/// reasons to exit the task.
pub struct SentryConnector<F: SigningFacade> {
	config: SentryConfig,
	identity: Arc<Identity>,
	facade: Arc<F>,
	stop: watch::Receiver<bool>,
}

impl<F: SigningFacade + 'static> SentryConnector<F> {
	pub fn new(
		config: SentryConfig,
		identity: Arc<Identity>,
		facade: Arc<F>,
		stop: watch::Receiver<bool>,
	) -> Self {
		SentryConnector { config, identity, facade, stop }
	}

	#[instrument(skip(self), fields(chain_id = %self.config.chain_id, addr = %self.config.address))]
	pub async fn run(mut self) {
		let mut state = ConnectorState::Disconnected;
		loop {
			if *self.stop.borrow() {
				info!("sentry connector stopping");
				return;
			}

			state = match state {
				ConnectorState::Disconnected => ConnectorState::Dialing,
				ConnectorState::Dialing => match self.dial().await {
					Ok(stream) => match self.attach(stream).await {
						Ok(()) => ConnectorState::Disconnected,
						Err(e) => {
							warn!(error = %e, "sentry connection ended");
							self.wait_and_retry().await;
							ConnectorState::Disconnected
						}
					},
					Err(e) => {
						warn!(error = %e, "sentry dial failed");
						self.wait_and_retry().await;
						ConnectorState::Disconnected
					}
				},
				ConnectorState::Handshaking | ConnectorState::Serving => {
					unreachable!("handshake and serving are folded into `attach`")
				}
			};
		}
	}

	async fn wait_and_retry(&mut self) {
		tokio::select! {
			_ = tokio::time::sleep(RETRY_INTERVAL) => {}
			_ = self.stop.changed() => {}
		}
	}

	async fn dial(&self) -> io::Result<TcpStream> {
		timeout(DIAL_TIMEOUT, TcpStream::connect(&self.config.address))
			.await
			.map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "dial timed out"))?
	}

	/// Handshake then serve, holding the split socket halves for the whole
	/// connection lifetime. Returns `Ok(())` only when shutdown was
	/// requested; any transport problem surfaces as an `Err` so the caller
	/// falls back to `disconnected` and retries.
	async fn attach(&mut self, stream: TcpStream) -> crate::error::Result<()> {
		let (reader, writer) = tokio::io::split(stream);
		let writer = Arc::new(tokio::sync::Mutex::new(writer));
		let reader = Arc::new(tokio::sync::Mutex::new(reader));

		let keys = {
			let write_writer = writer.clone();
			let read_reader = reader.clone();
			handshake::initiate(
				&self.identity,
				&self.config.expected_sentry_key,
				move |bytes| {
					let writer = write_writer.clone();
					Box::pin(async move { writer.lock().await.write_all(&bytes).await })
				},
				move || {
					let reader = read_reader.clone();
					Box::pin(async move {
						let mut buf = vec![0u8; 128];
						reader.lock().await.read_exact(&mut buf).await?;
						Ok(buf)
					})
				},
			)
			.await?
		};
		debug!("handshake complete");
		let channel = SealedChannel::new(keys);

		loop {
			if *self.stop.borrow() {
				return Ok(());
			}

			let mut len_prefix = [0u8; 4];
			let read_result = tokio::select! {
				r = async { reader.lock().await.read_exact(&mut len_prefix).await } => r,
				_ = self.stop.changed() => return Ok(()),
			};
			read_result.map_err(|e| crate::error::SignerError::Transport(e.to_string()))?;

			let len = crate::transport::framing::SealedChannel::read_length_prefix(len_prefix)?;
			let mut ciphertext = vec![0u8; len];
			reader
				.lock()
				.await
				.read_exact(&mut ciphertext)
				.await
				.map_err(|e| crate::error::SignerError::Transport(e.to_string()))?;

			let plaintext = channel.open(&ciphertext)?;
			let response_bytes = handle_one(&self.config.chain_id, self.facade.as_ref(), &plaintext).await;
			let frame = channel.seal(&response_bytes)?;

			writer
				.lock()
				.await
				.write_all(&frame)
				.await
				.map_err(|e| crate::error::SignerError::Transport(e.to_string()))?;
		}
	}
}

/// Decode-dispatch-encode for one request, shared by the connector and by
/// tests that drive the facade without a real socket.
pub async fn handle_one(
	chain_id: &ChainId,
	facade: &dyn SigningFacade,
	request_bytes: &[u8],
) -> Vec<u8> {
	let response = match decode_request(chain_id, request_bytes) {
		Ok(InboundRequest::PubKey { chain_id }) => {
			OutboundResponse::PubKey(facade.public_key(&chain_id).await)
		}
		Ok(InboundRequest::SignVote(vote)) => {
			let req = vote.clone().into_sign_request();
			match facade.sign(req).await {
				Ok((signed_bytes, signature)) => {
					let mut signed = vote;
					signed.timestamp_seconds = decode_timestamp_seconds(&signed_bytes);
					OutboundResponse::SignedVote(Ok((signed, signature)))
				}
				Err(e) => OutboundResponse::SignedVote(Err(e)),
			}
		}
		Ok(InboundRequest::SignProposal(proposal)) => {
			let req = proposal.clone().into_sign_request();
			match facade.sign(req).await {
				Ok((signed_bytes, signature)) => {
					let mut signed = proposal;
					signed.timestamp_seconds = decode_timestamp_seconds(&signed_bytes);
					OutboundResponse::SignedProposal(Ok((signed, signature)))
				}
				Err(e) => OutboundResponse::SignedProposal(Err(e)),
			}
		}
		Ok(InboundRequest::Ping) => OutboundResponse::Pong,
		Err(e) => OutboundResponse::PubKey(Err(e)),
	};
	encode_response(response)
}

fn decode_timestamp_seconds(signed_bytes: &[u8]) -> i64 {
	if signed_bytes.len() < 12 {
		return 0;
	}
	let split = signed_bytes.len() - 12;
	i64::from_be_bytes(signed_bytes[split..split + 8].try_into().unwrap())
}
