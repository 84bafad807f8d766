//! Ambient caller context
//!
//! The identity of whoever started a logical flow is carried in a task-local
//! slot instead of being threaded through every signature. Concurrent flows
//! never observe each other's caller, and work spawned on behalf of a flow
//! must go through [`spawn_with_caller`] to keep it.

use oasis_types::{Caller, CallerIdentity};
use std::future::Future;
use tokio::task::JoinHandle;

tokio::task_local! {
	static CALLER: Caller;
}

/// Run `future` with `caller` as the ambient caller
pub async fn with_caller<F>(caller: impl Into<Caller>, future: F) -> F::Output
where
	F: Future,
{
	CALLER.scope(caller.into(), future).await
}

/// Run `future` on behalf of a full caller identity
pub async fn with_identity<F>(identity: CallerIdentity, future: F) -> F::Output
where
	F: Future,
{
	with_caller(Caller::Identity(identity), future).await
}

/// Run `future` on behalf of a caller known only by id
pub async fn with_identity_id<F>(id: impl Into<String>, future: F) -> F::Output
where
	F: Future,
{
	with_caller(Caller::IdentityId(id.into()), future).await
}

/// Synchronous variant of [`with_caller`]
pub fn sync_with_caller<R>(caller: impl Into<Caller>, f: impl FnOnce() -> R) -> R {
	CALLER.sync_scope(caller.into(), f)
}

/// Caller of the current flow, if one was set
pub fn current() -> Option<Caller> {
	CALLER.try_with(Caller::clone).ok()
}

/// Caller of the current flow, or the system caller outside any flow
pub fn current_or_system() -> Caller {
	current().unwrap_or_else(Caller::system)
}

pub fn current_id() -> String {
	current_or_system().id().to_string()
}

/// Spawn a task that inherits the current caller
pub fn spawn_with_caller<F>(future: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	match current() {
		Some(caller) => tokio::spawn(CALLER.scope(caller, future)),
		None => tokio::spawn(future),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use oasis_types::SYSTEM_CALLER_ID;
	use std::time::Duration;

	#[tokio::test]
	async fn test_outside_any_flow_is_system() {
		assert!(current().is_none());
		assert_eq!(current_id(), SYSTEM_CALLER_ID);
	}

	#[tokio::test]
	async fn test_concurrent_flows_are_isolated() {
		let first = tokio::spawn(with_identity_id("u1", async {
			tokio::time::sleep(Duration::from_millis(20)).await;
			current_id()
		}));
		let second = tokio::spawn(with_identity_id("u2", async {
			tokio::time::sleep(Duration::from_millis(5)).await;
			current_id()
		}));

		assert_eq!(first.await.unwrap(), "u1");
		assert_eq!(second.await.unwrap(), "u2");
	}

	#[tokio::test]
	async fn test_spawned_work_inherits_caller() {
		let identity = CallerIdentity::new("u1", "alice");
		let seen = with_identity(identity, async {
			spawn_with_caller(async { current().and_then(|c| c.identity().cloned()) })
				.await
				.unwrap()
		})
		.await;

		assert_eq!(seen.map(|i| i.username), Some("alice".to_string()));
	}

	#[tokio::test]
	async fn test_plain_spawn_does_not_leak_caller() {
		let seen = with_identity_id("u1", async { tokio::spawn(async { current() }).await.unwrap() }).await;
		assert!(seen.is_none());
	}

	#[test]
	fn test_sync_scope() {
		let id = sync_with_caller(Caller::IdentityId("u3".to_string()), current_id);
		assert_eq!(id, "u3");
		assert!(current().is_none());
	}
}
