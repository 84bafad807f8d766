//! Acting identity of a logical request flow

use serde::{Deserialize, Serialize};

/// Identifier used when no caller was established for the flow
pub const SYSTEM_CALLER_ID: &str = "system";

/// Fully resolved identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerIdentity {
	pub id: String,
	pub username: String,
	pub email: Option<String>,
}

impl CallerIdentity {
	pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			username: username.into(),
			email: None,
		}
	}
}

/// Either a resolved identity or a lazy reference to one, never both
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Caller {
	Identity(CallerIdentity),
	IdentityId(String),
}

impl Caller {
	pub fn system() -> Self {
		Caller::IdentityId(SYSTEM_CALLER_ID.to_string())
	}

	pub fn id(&self) -> &str {
		match self {
			Caller::Identity(identity) => &identity.id,
			Caller::IdentityId(id) => id,
		}
	}

	pub fn identity(&self) -> Option<&CallerIdentity> {
		match self {
			Caller::Identity(identity) => Some(identity),
			Caller::IdentityId(_) => None,
		}
	}

	pub fn is_system(&self) -> bool {
		self.id() == SYSTEM_CALLER_ID
	}
}

impl From<CallerIdentity> for Caller {
	fn from(identity: CallerIdentity) -> Self {
		Caller::Identity(identity)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_caller_id_for_both_forms() {
		let resolved = Caller::from(CallerIdentity::new("u1", "alice"));
		assert_eq!(resolved.id(), "u1");
		assert!(resolved.identity().is_some());

		let lazy = Caller::IdentityId("u2".to_string());
		assert_eq!(lazy.id(), "u2");
		assert!(lazy.identity().is_none());
		assert!(Caller::system().is_system());
	}
}
