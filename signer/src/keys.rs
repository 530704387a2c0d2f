//! Loads the key material `spec.md` §6 calls "persistent files": the local
//! Ed25519 shard, the local ECIES keypair, and (single mode) the full
//! Ed25519 signing key. Cluster-wide public material (peer identities, key
//! shares) comes from the settings file as hex, matching `chainflip-engine`'s
//! convention of keeping secrets in dedicated files and public config inline.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use signer_core::crypto::{Point, Scalar};
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

use crate::settings::CosignerSetting;

pub fn read_hex_file(path: &Path) -> Result<Vec<u8>> {
	let contents = std::fs::read_to_string(path)
		.with_context(|| format!("reading secret file {}", path.display()))?;
	hex::decode(contents.trim()).with_context(|| format!("secret file {} is not valid hex", path.display()))
}

fn fixed_bytes<const N: usize>(bytes: Vec<u8>, what: &str) -> Result<[u8; N]> {
	bytes
		.try_into()
		.map_err(|v: Vec<u8>| anyhow!("{what} must be exactly {N} bytes, got {}", v.len()))
}

pub fn load_key_share(path: &Path) -> Result<Scalar> {
	let bytes = fixed_bytes::<32>(read_hex_file(path)?, "key share")?;
	Ok(Scalar::from_bytes_mod_order(&bytes))
}

pub fn load_ecies_secret(path: &Path) -> Result<StaticSecret> {
	let bytes = fixed_bytes::<32>(read_hex_file(path)?, "ECIES secret")?;
	Ok(StaticSecret::from(bytes))
}

pub fn load_signing_key(path: &Path) -> Result<SigningKey> {
	let bytes = fixed_bytes::<32>(read_hex_file(path)?, "Ed25519 signing key")?;
	Ok(SigningKey::from_bytes(&bytes))
}

pub fn parse_verifying_key(hex_str: &str) -> Result<VerifyingKey> {
	let bytes = fixed_bytes::<32>(hex::decode(hex_str)?, "Ed25519 verifying key")?;
	VerifyingKey::from_bytes(&bytes).map_err(|e| anyhow!("invalid Ed25519 verifying key: {e}"))
}

pub fn parse_x25519_public(hex_str: &str) -> Result<XPublicKey> {
	let bytes = fixed_bytes::<32>(hex::decode(hex_str)?, "X25519 public key")?;
	Ok(XPublicKey::from(bytes))
}

pub fn parse_point(hex_str: &str) -> Result<Point> {
	let bytes = fixed_bytes::<32>(hex::decode(hex_str)?, "Edwards point")?;
	Point::from_bytes(&bytes).ok_or_else(|| anyhow!("not a valid Edwards point"))
}

pub fn cosigner_entry(setting: &CosignerSetting) -> Result<signer_core::registry::CosignerEntry> {
	Ok(signer_core::registry::CosignerEntry {
		shard_id: setting.shard_id,
		p2p_addr: setting.p2p_addr.clone(),
		identity_key: parse_verifying_key(&setting.identity_key)?,
		ecies_public_key: parse_x25519_public(&setting.ecies_public_key)?,
		public_key_share: parse_point(&setting.public_key_share)?,
	})
}
