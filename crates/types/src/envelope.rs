//! Uniform result envelope returned by every public operation
//!
//! An envelope is either a success carrying a payload or an error carrying a
//! kind and message, never both. Warnings may ride along on either.

use serde::Serialize;

use crate::errors::{ErrorKind, OasisError, OasisResult};

/// Terminal value of every routed or component-level call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<T> {
	payload: Option<T>,
	is_error: bool,
	error_kind: Option<ErrorKind>,
	message: String,
	warnings: Vec<String>,
	provider_id: Option<String>,
}

impl<T> Envelope<T> {
	/// Successful envelope carrying `payload`
	pub fn success(payload: T) -> Self {
		Self {
			payload: Some(payload),
			is_error: false,
			error_kind: None,
			message: String::new(),
			warnings: Vec::new(),
			provider_id: None,
		}
	}

	/// Error envelope; an error never carries a payload
	pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			payload: None,
			is_error: true,
			error_kind: Some(kind),
			message: message.into(),
			warnings: Vec::new(),
			provider_id: None,
		}
	}

	pub fn from_error(error: &OasisError) -> Self {
		Self::error(error.kind(), error.to_string())
	}

	pub fn from_result(result: OasisResult<T>) -> Self {
		match result {
			Ok(payload) => Self::success(payload),
			Err(e) => Self::from_error(&e),
		}
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = message.into();
		self
	}

	pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
		self.warnings.push(warning.into());
		self
	}

	pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
		self.warnings.extend(warnings);
		self
	}

	pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
		self.provider_id = Some(provider_id.into());
		self
	}

	pub fn push_warning(&mut self, warning: impl Into<String>) {
		self.warnings.push(warning.into());
	}

	pub fn is_success(&self) -> bool {
		!self.is_error
	}

	pub fn is_error(&self) -> bool {
		self.is_error
	}

	pub fn payload(&self) -> Option<&T> {
		self.payload.as_ref()
	}

	pub fn error_kind(&self) -> Option<ErrorKind> {
		self.error_kind
	}

	pub fn message(&self) -> &str {
		&self.message
	}

	pub fn warnings(&self) -> &[String] {
		&self.warnings
	}

	pub fn provider_id(&self) -> Option<&str> {
		self.provider_id.as_deref()
	}

	/// Transform the payload, keeping message, warnings and provider
	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Envelope<U> {
		Envelope {
			payload: self.payload.map(f),
			is_error: self.is_error,
			error_kind: self.error_kind,
			message: self.message,
			warnings: self.warnings,
			provider_id: self.provider_id,
		}
	}

	/// Consume the envelope into a plain `Result` for `?` propagation
	pub fn into_result(self) -> OasisResult<T> {
		match (self.is_error, self.payload) {
			(false, Some(payload)) => Ok(payload),
			_ => Err(OasisError::from_kind(
				self.error_kind.unwrap_or(ErrorKind::Permanent),
				self.message,
			)),
		}
	}

	/// Like `into_result` but also hands back the warnings
	pub fn into_parts(self) -> (OasisResult<T>, Vec<String>) {
		let warnings = self.warnings.clone();
		(self.into_result(), warnings)
	}
}

impl<T> From<OasisError> for Envelope<T> {
	fn from(error: OasisError) -> Self {
		Envelope::from_error(&error)
	}
}
