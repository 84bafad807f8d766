//! Configurable values that load from environment variables or plain text

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value that is either read from an environment variable or given inline
///
/// Used for credentials such as the price feed API key:
/// `{"type": "env", "value": "PRICE_FEED_API_KEY"}` or
/// `{"type": "plain", "value": "..."}`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConfigurableValue {
	#[serde(rename = "type")]
	pub value_type: ValueType,
	/// Environment variable name or the literal value
	pub value: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
	Env,
	Plain,
}

impl ConfigurableValue {
	pub fn from_env(env_var_name: &str) -> Self {
		Self {
			value_type: ValueType::Env,
			value: env_var_name.to_string(),
		}
	}

	pub fn from_plain(plain_value: &str) -> Self {
		Self {
			value_type: ValueType::Plain,
			value: plain_value.to_string(),
		}
	}

	/// Resolve to the actual value
	pub fn resolve(&self) -> Result<String, ConfigurableValueError> {
		match self.value_type {
			ValueType::Env => match std::env::var(&self.value) {
				Ok(value) if !value.is_empty() => Ok(value),
				Ok(_) => Err(ConfigurableValueError::EmptyValue(self.value.clone())),
				Err(_) => Err(ConfigurableValueError::EnvironmentVariableNotFound(
					self.value.clone(),
				)),
			},
			ValueType::Plain if self.value.is_empty() => {
				Err(ConfigurableValueError::EmptyValue("plain value".to_string()))
			},
			ValueType::Plain => Ok(self.value.clone()),
		}
	}

	/// Resolve, treating a missing environment variable as "not configured"
	pub fn resolve_optional(&self) -> Option<String> {
		self.resolve().ok()
	}

	pub fn is_plain(&self) -> bool {
		self.value_type == ValueType::Plain
	}

	/// Description safe to print in logs
	pub fn description(&self) -> String {
		match self.value_type {
			ValueType::Env => format!("environment variable '{}'", self.value),
			ValueType::Plain => "configured plain value".to_string(),
		}
	}
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigurableValueError {
	#[error("Environment variable '{0}' not found")]
	EnvironmentVariableNotFound(String),

	#[error("Configured value '{0}' is empty")]
	EmptyValue(String),
}

// Plain values are never printed
impl fmt::Display for ConfigurableValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.value_type {
			ValueType::Env => write!(f, "env:{}", self.value),
			ValueType::Plain => write!(f, "plain:[REDACTED]"),
		}
	}
}

impl From<&str> for ConfigurableValue {
	fn from(value: &str) -> Self {
		match value.strip_prefix("env:") {
			Some(env_var) => Self::from_env(env_var),
			None => Self::from_plain(value),
		}
	}
}

impl From<String> for ConfigurableValue {
	fn from(value: String) -> Self {
		ConfigurableValue::from(value.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::env;

	#[test]
	fn test_plain_value() {
		let value = ConfigurableValue::from_plain("api-key");
		assert!(value.is_plain());
		assert_eq!(value.resolve().unwrap(), "api-key");
		assert_eq!(value.to_string(), "plain:[REDACTED]");
	}

	#[test]
	fn test_env_value() {
		env::set_var("OASIS_TEST_PRICE_KEY", "from-env");

		let value = ConfigurableValue::from_env("OASIS_TEST_PRICE_KEY");
		assert_eq!(value.resolve().unwrap(), "from-env");
		assert_eq!(value.to_string(), "env:OASIS_TEST_PRICE_KEY");

		env::remove_var("OASIS_TEST_PRICE_KEY");
	}

	#[test]
	fn test_missing_env_value() {
		let value = ConfigurableValue::from_env("OASIS_TEST_NOT_SET");
		assert_eq!(
			value.resolve(),
			Err(ConfigurableValueError::EnvironmentVariableNotFound(
				"OASIS_TEST_NOT_SET".to_string()
			))
		);
		assert!(value.resolve_optional().is_none());
	}

	#[test]
	fn test_from_string_conversion() {
		assert_eq!(
			ConfigurableValue::from("env:MY_KEY"),
			ConfigurableValue::from_env("MY_KEY")
		);
		assert_eq!(
			ConfigurableValue::from("literal".to_string()),
			ConfigurableValue::from_plain("literal")
		);
	}

	#[test]
	fn test_serde_shape() {
		let json = serde_json::to_string(&ConfigurableValue::from_env("KEY")).unwrap();
		assert!(json.contains("\"type\":\"env\""));

		let parsed: ConfigurableValue =
			serde_json::from_str(r#"{"type":"plain","value":"x"}"#).unwrap();
		assert_eq!(parsed, ConfigurableValue::from_plain("x"));
	}
}
