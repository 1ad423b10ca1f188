use thiserror::Error;

/// Errors raised by the view model and its collaborators
///
/// The model itself never fails its public mutators: enumeration, metadata and
/// watch failures are logged and degrade the view. These variants surface from
/// collaborator calls, registry lookups and configuration validation.
#[derive(Error, Debug)]
pub enum ModelError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Notify error: {0}")]
	Notify(#[from] notify::Error),

	#[error("Invalid path: {path}")]
	InvalidPath { path: String },

	#[error("No backend registered for scheme '{scheme}'")]
	UnknownScheme { scheme: String },

	#[error("Enumeration of {directory} failed: {cause}")]
	EnumerationFailed { directory: String, cause: String },

	#[error("Watch unavailable for {directory}: {reason}")]
	WatchUnavailable { directory: String, reason: String },

	#[error(
		"Configuration error: {parameter} - {reason} (expected: {expected}, actual: {actual})"
	)]
	ConfigurationError {
		parameter: String,
		reason: String,
		expected: String,
		actual: String,
	},
}

impl ModelError {
	/// Whether the model can keep running in a degraded mode after this error
	pub fn is_recoverable(&self) -> bool {
		match self {
			ModelError::Io(_) => true,
			ModelError::Notify(_) => true,
			ModelError::EnumerationFailed { .. } => true,
			ModelError::WatchUnavailable { .. } => true,
			ModelError::InvalidPath { .. } => false,
			ModelError::UnknownScheme { .. } => false,
			ModelError::ConfigurationError { .. } => false,
		}
	}

	/// Check if this error is related to configuration issues
	pub fn is_configuration_error(&self) -> bool {
		matches!(
			self,
			ModelError::ConfigurationError { .. }
				| ModelError::InvalidPath { .. }
				| ModelError::UnknownScheme { .. }
		)
	}

	/// Get error category for logging
	pub fn category(&self) -> &'static str {
		match self {
			ModelError::Io(_) => "io",
			ModelError::Notify(_) => "notify",
			ModelError::InvalidPath { .. } => "configuration",
			ModelError::UnknownScheme { .. } => "registry",
			ModelError::EnumerationFailed { .. } => "enumeration",
			ModelError::WatchUnavailable { .. } => "watch",
			ModelError::ConfigurationError { .. } => "configuration",
		}
	}

	pub fn enumeration_failed(directory: &str, cause: &str) -> Self {
		ModelError::EnumerationFailed {
			directory: directory.to_string(),
			cause: cause.to_string(),
		}
	}

	pub fn watch_unavailable(directory: &str, reason: &str) -> Self {
		ModelError::WatchUnavailable {
			directory: directory.to_string(),
			reason: reason.to_string(),
		}
	}

	pub fn unknown_scheme(scheme: &str) -> Self {
		ModelError::UnknownScheme { scheme: scheme.to_string() }
	}

	pub fn configuration_error(
		parameter: &str, reason: &str, expected: &str, actual: &str,
	) -> Self {
		ModelError::ConfigurationError {
			parameter: parameter.to_string(),
			reason: reason.to_string(),
			expected: expected.to_string(),
			actual: actual.to_string(),
		}
	}
}

pub type Result<T> = std::result::Result<T, ModelError>;
