//! Process entry point: parses `Settings`, builds whichever `SigningFacade`
//! `sign_mode` selects, and drives the sentry connectors plus (threshold
//! mode) the cosigner peer server and Raft election loop until shutdown —
//! the wiring `chainflip-engine`'s `main.rs` does for its own components,
//! adapted to this signer's task set.

mod keys;
mod settings;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use signer_core::connector::{SentryConfig, SentryConnector};
use signer_core::peer::service::{CosignerService, PeerHandler};
use signer_core::peer::authenticated_incoming;
use signer_core::proto::cosigner::cosigner_server::CosignerServer;
use signer_core::raft::state::RaftState;
use signer_core::registry::{ClusterConfig, CosignerRegistry};
use signer_core::signer::{ThresholdSigner, ThresholdSignerConfig};
use signer_core::single::LocalSingleSigner;
use signer_core::store::SignStateStore;
use signer_core::transport::Identity;
use signer_core::SigningFacade;
use tokio::sync::watch;
use tonic::transport::Server;
use tracing::info;

use settings::{CommandLineOptions, SignMode, Settings};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
		.init();

	if let Err(err) = run().await {
		tracing::error!(error = %err, "threshold-signer exited with an error");
		std::process::exit(1);
	}
}

async fn run() -> Result<()> {
	let opts = CommandLineOptions::parse();
	let settings = Settings::new(&opts).context("loading settings")?;

	std::fs::create_dir_all(&settings.state_dir)
		.with_context(|| format!("creating state_dir {}", settings.state_dir.display()))?;

	let identity =
		Arc::new(Identity::from_signing_key(keys::load_signing_key(&settings.identity_key_file)?));

	let (stop_tx, stop_rx) = watch::channel(false);

	let mut tasks = tokio::task::JoinSet::new();

	match settings.sign_mode {
		SignMode::Single => {
			let single = settings
				.single
				.as_ref()
				.expect("Settings::validate requires [single] when sign_mode = \"single\"");
			let signing_key = keys::load_signing_key(&single.signing_key_file)?;
			let store = SignStateStore::new(settings.state_dir.join("hwm"));
			let facade = Arc::new(LocalSingleSigner::new(signing_key, store));

			spawn_sentry_connectors(&mut tasks, &settings, identity.clone(), facade, stop_rx.clone())?;
		}
		SignMode::Threshold => {
			let threshold = settings
				.threshold
				.as_ref()
				.expect("Settings::validate requires [threshold] when sign_mode = \"threshold\"");

			let entries = threshold
				.cosigners
				.iter()
				.map(keys::cosigner_entry)
				.collect::<Result<Vec<_>>>()?;
			let registry = CosignerRegistry::new(entries);
			ClusterConfig { threshold: threshold.threshold, registry: registry.clone() }
				.validate()
				.context("validating cluster configuration")?;

			let config = ThresholdSignerConfig {
				self_shard_id: threshold.self_shard_id,
				threshold: threshold.threshold,
				registry: registry.clone(),
				key_share: keys::load_key_share(&threshold.key_share_file)?,
				aggregate_public_key: keys::parse_point(&threshold.aggregate_public_key)?,
				ecies_secret: keys::load_ecies_secret(&threshold.ecies_secret_file)?,
				session_timeout: threshold.session_timeout(),
				identity: identity.clone(),
			};

			let store = SignStateStore::new(settings.state_dir.join("hwm"));
			let raft = Arc::new(tokio::sync::Mutex::new(RaftState::new(threshold.self_shard_id)));
			let signer = Arc::new(ThresholdSigner::new(config, store, raft.clone()));

			let peer_handler: Arc<dyn PeerHandler> = signer.clone();
			let listen_addr = threshold.listen_addr.parse().with_context(|| {
				format!("parsing threshold.listen_addr {}", threshold.listen_addr)
			})?;
			let acceptable_peers =
				Arc::new(registry.iter().map(|entry| entry.identity_key).collect::<Vec<_>>());
			let server_identity = identity.clone();
			let server_stop = stop_rx.clone();
			tasks.spawn(async move {
				info!(%listen_addr, "cosigner peer server listening");
				let listener = tokio::net::TcpListener::bind(listen_addr)
					.await
					.with_context(|| format!("binding cosigner peer listener on {listen_addr}"))?;
				let incoming = authenticated_incoming(listener, server_identity, acceptable_peers);
				Server::builder()
					.add_service(CosignerServer::new(CosignerService::new(peer_handler)))
					.serve_with_incoming_shutdown(incoming, async move {
						let _ = server_stop.changed().await;
					})
					.await
					.map_err(anyhow::Error::from)
			});

			// The driver inside `ThresholdSigner` only ever issues an
			// operator-triggered `transfer_to`; the background
			// heartbeat/election loop is a separate instance sharing the same
			// `raft` state and registry.
			let raft_driver =
				signer_core::raft::election::RaftDriver::new(raft, registry, identity.clone());
			let driver_stop = stop_rx.clone();
			tasks.spawn(async move {
				raft_driver.run(driver_stop).await;
				Ok(())
			});

			spawn_sentry_connectors(&mut tasks, &settings, identity.clone(), signer, stop_rx.clone())?;
		}
	}

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			info!("shutdown requested");
		}
		Some(result) = tasks.join_next() => {
			result.context("a signer task panicked")??;
		}
	}

	let _ = stop_tx.send(true);
	while let Some(result) = tasks.join_next().await {
		result.context("a signer task panicked")??;
	}
	Ok(())
}

fn spawn_sentry_connectors<F: SigningFacade + 'static>(
	tasks: &mut tokio::task::JoinSet<Result<()>>,
	settings: &Settings,
	identity: Arc<Identity>,
	facade: Arc<F>,
	stop_rx: watch::Receiver<bool>,
) -> Result<()> {
	for node in &settings.chain_nodes {
		let config = SentryConfig {
			chain_id: node.chain_id.clone(),
			address: node.priv_val_addr.clone(),
			expected_sentry_key: keys::parse_verifying_key(&node.sentry_identity_key)?,
		};
		let connector = SentryConnector::new(config, identity.clone(), facade.clone(), stop_rx.clone());
		tasks.spawn(async move {
			connector.run().await;
			Ok(())
		});
	}
	Ok(())
}
