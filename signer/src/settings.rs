//! `Settings` loaded from a TOML file plus environment overrides, the way
//! `chainflip-engine`'s `settings.rs` does it with the `config` crate. This
//! binary is the only place `sign_mode`/`threshold`/`cosigners`/
//! `grpc_timeout`/`raft_timeout`/`chain_nodes`/`state_dir` are ever parsed —
//! `signer_core` only ever sees an already-validated `ClusterConfig`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Parser, Clone, Debug)]
#[clap(name = "threshold-signer", about = "Threshold remote signer for a Tendermint-style validator")]
pub struct CommandLineOptions {
	/// Path to the TOML settings file.
	#[clap(short = 'c', long = "config-path", env = "SIGNER_CONFIG_PATH", default_value = "./config/Default.toml")]
	pub config_path: String,

	/// Override `state_dir` without editing the config file.
	#[clap(long = "state-dir", env = "SIGNER_STATE_DIR")]
	pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignMode {
	Single,
	Threshold,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainNode {
	pub chain_id: String,
	pub priv_val_addr: String,
	/// Hex-encoded Ed25519 verifying key the sentry authenticates its side
	/// of the secret-transport handshake with (spec §4.A).
	pub sentry_identity_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CosignerSetting {
	pub shard_id: u32,
	pub p2p_addr: String,
	/// Hex-encoded Ed25519 verifying key (peer-layer identity).
	pub identity_key: String,
	/// Hex-encoded X25519 public key (nonce-shard ECIES recipient).
	pub ecies_public_key: String,
	/// Hex-encoded Edwards point, this cosigner's share of the aggregate
	/// Ed25519 public key.
	pub public_key_share: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdSettings {
	pub threshold: u8,
	pub self_shard_id: u32,
	pub listen_addr: String,
	pub cosigners: Vec<CosignerSetting>,
	/// Hex-encoded file holding this cosigner's Ed25519 key-share scalar.
	pub key_share_file: PathBuf,
	/// Hex-encoded file holding this cosigner's X25519 ECIES secret.
	pub ecies_secret_file: PathBuf,
	/// Hex-encoded Edwards point, the full aggregate Ed25519 public key.
	pub aggregate_public_key: String,
	#[serde(default = "default_grpc_timeout_ms")]
	pub grpc_timeout_ms: u64,
	#[serde(default = "default_raft_timeout_ms")]
	pub raft_timeout_ms: u64,
	#[serde(default = "default_session_timeout_ms")]
	pub session_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleSettings {
	/// File holding the raw 32-byte Ed25519 signing key.
	pub signing_key_file: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
	pub sign_mode: SignMode,
	pub state_dir: PathBuf,
	/// Long-term Ed25519 keypair this process authenticates the sentry-facing
	/// secret transport with (spec §4.A) — distinct from the signing key
	/// share, which must never touch the sentry link.
	pub identity_key_file: PathBuf,
	pub chain_nodes: Vec<ChainNode>,
	pub threshold: Option<ThresholdSettings>,
	pub single: Option<SingleSettings>,
}

fn default_grpc_timeout_ms() -> u64 {
	1500
}

fn default_raft_timeout_ms() -> u64 {
	1500
}

fn default_session_timeout_ms() -> u64 {
	5000
}

impl ThresholdSettings {
	pub fn grpc_timeout(&self) -> Duration {
		Duration::from_millis(self.grpc_timeout_ms)
	}

	pub fn raft_timeout(&self) -> Duration {
		Duration::from_millis(self.raft_timeout_ms)
	}

	pub fn session_timeout(&self) -> Duration {
		Duration::from_millis(self.session_timeout_ms)
	}
}

impl Settings {
	pub fn new(opts: &CommandLineOptions) -> Result<Self, ConfigError> {
		let mut settings: Settings = Config::builder()
			.add_source(File::with_name(&opts.config_path))
			.add_source(Environment::with_prefix("SIGNER").separator("__"))
			.build()?
			.try_deserialize()?;

		if let Some(state_dir) = &opts.state_dir {
			settings.state_dir = state_dir.clone();
		}

		settings.validate()?;
		Ok(settings)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		match self.sign_mode {
			SignMode::Threshold if self.threshold.is_none() => Err(ConfigError::Message(
				"sign_mode = \"threshold\" requires a [threshold] section".into(),
			)),
			SignMode::Single if self.single.is_none() => {
				Err(ConfigError::Message("sign_mode = \"single\" requires a [single] section".into()))
			}
			_ => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn opts(path: &str) -> CommandLineOptions {
		CommandLineOptions { config_path: path.into(), state_dir: None }
	}

	#[test]
	fn single_mode_without_a_single_section_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bad.toml");
		std::fs::write(
			&path,
			"sign_mode = \"single\"\nstate_dir = \".\"\nidentity_key_file = \"identity.key\"\nchain_nodes = []\n",
		)
		.unwrap();

		let err = Settings::new(&opts(path.to_str().unwrap())).unwrap_err();
		assert!(matches!(err, ConfigError::Message(_)));
	}
}
