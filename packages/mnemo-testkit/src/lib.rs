//! Throwaway SQLite databases for the test suites. Each test gets its own
//! file under the system temp directory; cleanup happens on drop.

use std::{
	env, fs,
	path::{Path, PathBuf},
};

use uuid::Uuid;

pub struct TestDatabase {
	path: PathBuf,
	url: String,
	cleaned: bool,
}

impl TestDatabase {
	#[allow(clippy::new_without_default)]
	pub fn new() -> Self {
		let name = format!("mnemo_test_{}.db", Uuid::new_v4().simple());
		let path = env::temp_dir().join(name);
		let url = format!("sqlite://{}?mode=rwc", path.display());

		Self { path, url, cleaned: false }
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn database_config(&self) -> mnemo_config::Database {
		mnemo_config::Database { url: self.url.clone(), auth_token: None, pool_max_conns: 2 }
	}

	pub fn cleanup(mut self) {
		self.cleanup_inner();
	}

	fn cleanup_inner(&mut self) {
		if self.cleaned {
			return;
		}

		for suffix in ["", "-wal", "-shm"] {
			let mut file = self.path.clone().into_os_string();

			file.push(suffix);

			let _ = fs::remove_file(PathBuf::from(file));
		}

		self.cleaned = true;
	}
}
impl Drop for TestDatabase {
	fn drop(&mut self) {
		self.cleanup_inner();
	}
}
