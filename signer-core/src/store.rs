//! Durable sign-state store (spec §4.D, §6): one file per `chain_id`, holding
//! the high-water mark plus the signed bytes and signature it produced, so
//! that exact replays can be served without re-signing. Every commit is
//! write-tmp-then-rename and fsync'd before it returns.

use std::path::{Path, PathBuf};

use crate::error::{Result, SignerError};
use crate::hwm::HighWaterMark;

#[derive(Clone)]
pub struct SignStateStore {
	root: PathBuf,
}

impl SignStateStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		SignStateStore { root: root.into() }
	}

	fn path_for(&self, chain_id: &str) -> PathBuf {
		self.root.join(format!("{}.hwm", sanitize(chain_id)))
	}

	/// Load the most recently committed HWM for `chain_id`, if any has ever
	/// been committed.
	pub async fn load(&self, chain_id: &str) -> Result<Option<HighWaterMark>> {
		let path = self.path_for(chain_id);
		tokio::task::spawn_blocking(move || load_blocking(&path))
			.await
			.map_err(|e| SignerError::Storage(e.to_string()))?
	}

	/// Durably replace the HWM for `chain_id`. MUST fsync before returning
	/// (spec §4.D): a caller that sees `Ok(())` can rely on the write having
	/// survived a crash.
	pub async fn commit(&self, chain_id: &str, hwm: &HighWaterMark) -> Result<()> {
		let path = self.path_for(chain_id);
		let hwm = hwm.clone();
		tokio::task::spawn_blocking(move || commit_blocking(&path, &hwm))
			.await
			.map_err(|e| SignerError::Storage(e.to_string()))?
	}
}

fn sanitize(chain_id: &str) -> String {
	chain_id
		.chars()
		.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
		.collect()
}

fn load_blocking(path: &Path) -> Result<Option<HighWaterMark>> {
	match std::fs::read(path) {
		Ok(bytes) => bincode::deserialize(&bytes)
			.map(Some)
			.map_err(|e| SignerError::Storage(format!("corrupt HWM file {}: {e}", path.display()))),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(SignerError::Storage(format!("reading {}: {e}", path.display()))),
	}
}

fn commit_blocking(path: &Path, hwm: &HighWaterMark) -> Result<()> {
	let dir = path.parent().ok_or_else(|| {
		SignerError::Storage(format!("HWM path {} has no parent directory", path.display()))
	})?;
	std::fs::create_dir_all(dir)
		.map_err(|e| SignerError::Storage(format!("creating {}: {e}", dir.display())))?;

	let tmp_path = path.with_extension("hwm.tmp");
	let bytes = bincode::serialize(hwm)
		.map_err(|e| SignerError::Storage(format!("encoding HWM: {e}")))?;

	{
		let mut file = std::fs::File::create(&tmp_path)
			.map_err(|e| SignerError::Storage(format!("creating {}: {e}", tmp_path.display())))?;
		use std::io::Write;
		file.write_all(&bytes)
			.map_err(|e| SignerError::Storage(format!("writing {}: {e}", tmp_path.display())))?;
		file.sync_all()
			.map_err(|e| SignerError::Storage(format!("fsync {}: {e}", tmp_path.display())))?;
	}

	std::fs::rename(&tmp_path, path)
		.map_err(|e| SignerError::Storage(format!("renaming {} -> {}: {e}", tmp_path.display(), path.display())))?;

	// fsync the directory entry too, or the rename itself may not survive a crash.
	let dir_file = std::fs::File::open(dir)
		.map_err(|e| SignerError::Storage(format!("opening {}: {e}", dir.display())))?;
	dir_file
		.sync_all()
		.map_err(|e| SignerError::Storage(format!("fsync dir {}: {e}", dir.display())))?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::{SignKind, SignPosition};

	#[tokio::test]
	async fn commit_then_load_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let store = SignStateStore::new(dir.path());

		assert!(store.load("chain-a").await.unwrap().is_none());

		let hwm = HighWaterMark {
			position: SignPosition { height: 10, round: 0, kind: SignKind::Prevote },
			signed_bytes: vec![1, 2, 3],
			signature: vec![4, 5, 6],
		};
		store.commit("chain-a", &hwm).await.unwrap();

		let loaded = store.load("chain-a").await.unwrap().unwrap();
		assert_eq!(loaded, hwm);
	}

	#[tokio::test]
	async fn commit_overwrites_previous_value() {
		let dir = tempfile::tempdir().unwrap();
		let store = SignStateStore::new(dir.path());

		let first = HighWaterMark {
			position: SignPosition { height: 10, round: 0, kind: SignKind::Prevote },
			signed_bytes: vec![1],
			signature: vec![2],
		};
		let second = HighWaterMark {
			position: SignPosition { height: 11, round: 0, kind: SignKind::Prevote },
			signed_bytes: vec![3],
			signature: vec![4],
		};
		store.commit("chain-a", &first).await.unwrap();
		store.commit("chain-a", &second).await.unwrap();

		assert_eq!(store.load("chain-a").await.unwrap().unwrap(), second);
	}
}
