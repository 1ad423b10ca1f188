//! Common test utilities for the rust-dirview library

#![allow(dead_code)]

use rust_dirview::{
	MemoryFileSystem, RecordingSink, ResourceId, SchemeRegistry, ViewModel, ViewModelConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const SETTLE: Duration = Duration::from_secs(5);

/// Create a temporary directory for testing
pub fn setup_temp_dir() -> TempDir {
	TempDir::new().expect("Failed to create temp directory")
}

/// Create a test file with content
pub fn create_test_file(path: &Path, content: &str) -> std::io::Result<()> {
	std::fs::write(path, content)
}

/// Create multiple test files for testing
pub fn create_test_files(dir: &Path, count: usize) -> std::io::Result<Vec<PathBuf>> {
	let mut files = Vec::new();
	for i in 0..count {
		let file_path = dir.join(format!("test_file_{i:04}.txt"));
		create_test_file(&file_path, &format!("Content for file {i}"))?;
		files.push(file_path);
	}
	Ok(files)
}

/// In-memory backend registered under the `mem` scheme
pub fn memory_registry() -> (Arc<MemoryFileSystem>, SchemeRegistry) {
	let (fs, collaborators) = MemoryFileSystem::shared("mem");
	let mut registry = SchemeRegistry::new();
	registry.register("mem", collaborators);
	(fs, registry)
}

/// Model over an in-memory backend with a recording sink
pub fn memory_model(
	config: ViewModelConfig,
) -> (Arc<MemoryFileSystem>, ViewModel<RecordingSink>) {
	let (fs, registry) = memory_registry();
	let model =
		ViewModel::new(registry, config, RecordingSink::new()).expect("Failed to create model");
	(fs, model)
}

/// Model over the local filesystem with a recording sink
pub fn local_model(config: ViewModelConfig) -> ViewModel<RecordingSink> {
	ViewModel::new(SchemeRegistry::with_local(), config, RecordingSink::new())
		.expect("Failed to create model")
}

/// The `/home/u` fixture: `c.txt`, `b/`, `a.txt` in listing order
pub fn home_fixture(fs: &MemoryFileSystem) -> ResourceId {
	fs.add_file("/home/u/c.txt", 30);
	fs.add_dir("/home/u/b");
	fs.add_file("/home/u/a.txt", 10);
	fs.id("/home/u")
}

/// Row order as file names
pub fn names(model: &ViewModel<RecordingSink>) -> Vec<String> {
	model.ordered_ids().iter().map(|id| id.file_name()).collect()
}

/// Pump the model until `condition` holds or the timeout passes
pub async fn wait_until(
	model: &mut ViewModel<RecordingSink>, timeout: Duration,
	mut condition: impl FnMut(&ViewModel<RecordingSink>) -> bool,
) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	loop {
		model.process_pending();
		if condition(model) {
			return true;
		}
		if tokio::time::Instant::now() >= deadline {
			return false;
		}
		let _ = tokio::time::timeout(Duration::from_millis(50), model.process_next()).await;
	}
}
