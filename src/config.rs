use crate::error::{ModelError, Result};
use crate::sort::SortSpec;
use std::time::Duration;

/// When drained watch events are applied relative to an in-flight traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventPolicy {
	/// Apply events as soon as they are drained; duplicates with traversal
	/// batches are resolved by cache membership.
	#[default]
	Immediate,
	/// Hold events until the current traversal finishes, then apply them in order.
	AfterTraversal,
}

/// Configuration for a view model
#[derive(Debug, Clone)]
pub struct ViewModelConfig {
	/// Flush staged traversal entries once this much time has passed since the last flush
	pub batch_time_window: Duration,
	/// Flush staged traversal entries once this many are waiting
	pub batch_max_entries: usize,
	pub event_policy: EventPolicy,
	/// Collapse repeated updates of the same entry within one drain into one notification
	pub coalesce_updates: bool,
	/// Messages the owner may have outstanding before traversal waits for it
	pub message_capacity: usize,
	/// Sort applied to the view; `None` keeps discovery order
	pub initial_sort: Option<SortSpec>,
}

impl Default for ViewModelConfig {
	fn default() -> Self {
		Self {
			batch_time_window: Duration::from_millis(15),
			batch_max_entries: 1000,
			event_policy: EventPolicy::Immediate,
			coalesce_updates: true,
			message_capacity: 16,
			initial_sort: Some(SortSpec::default()),
		}
	}
}

impl ViewModelConfig {
	/// Unsorted configuration: rows stay in discovery/arrival order
	pub fn unsorted() -> Self {
		Self { initial_sort: None, ..Default::default() }
	}

	pub fn with_batching(time_window: Duration, max_entries: usize) -> Self {
		Self {
			batch_time_window: time_window,
			batch_max_entries: max_entries,
			..Default::default()
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.batch_max_entries == 0 {
			return Err(ModelError::configuration_error(
				"batch_max_entries",
				"batches must hold at least one entry",
				"> 0",
				"0",
			));
		}

		if self.batch_time_window.is_zero() {
			return Err(ModelError::configuration_error(
				"batch_time_window",
				"a zero window flushes every entry on its own",
				"> 0ms",
				"0ms",
			));
		}

		if self.message_capacity == 0 {
			return Err(ModelError::configuration_error(
				"message_capacity",
				"the owner channel needs room for at least one message",
				"> 0",
				"0",
			));
		}

		Ok(())
	}
}
