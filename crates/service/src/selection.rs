//! Candidate ordering for routed requests
//!
//! The router hands every live candidate of a category to a selector, which
//! returns them in the order they should be tried. Strategies only reorder;
//! filtering by liveness or chain health happens before selection.

use oasis_adapters::ProviderHandle;
use oasis_types::{RoutedRequest, SelectionStrategy};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Request parameter naming the caller's preferred region
pub const REGION_PARAM: &str = "region";

/// Trait for ordering routing candidates
#[cfg_attr(test, mockall::automock)]
pub trait ProviderSelectorTrait: Send + Sync {
	fn order(
		&self,
		candidates: Vec<ProviderHandle>,
		strategy: SelectionStrategy,
		request: &RoutedRequest,
	) -> Vec<ProviderHandle>;
}

/// Default selector implementing every [`SelectionStrategy`]
pub struct ProviderSelector {
	default_strategy: SelectionStrategy,
	cursor: AtomicUsize,
}

impl Default for ProviderSelector {
	fn default() -> Self {
		Self::new(SelectionStrategy::Priority)
	}
}

impl ProviderSelector {
	pub fn new(default_strategy: SelectionStrategy) -> Self {
		Self {
			default_strategy,
			cursor: AtomicUsize::new(0),
		}
	}

	/// Strategy actually applied for a requested one
	pub fn effective_strategy(&self, strategy: SelectionStrategy) -> SelectionStrategy {
		match (strategy, self.default_strategy) {
			(SelectionStrategy::Auto, SelectionStrategy::Auto) => SelectionStrategy::Priority,
			(SelectionStrategy::Auto, default) => default,
			(explicit, _) => explicit,
		}
	}
}

fn by_rank(a: &ProviderHandle, b: &ProviderHandle) -> CmpOrdering {
	a.info()
		.priority
		.cmp(&b.info().priority)
		.then_with(|| a.id().cmp(b.id()))
}

impl ProviderSelectorTrait for ProviderSelector {
	fn order(
		&self,
		mut candidates: Vec<ProviderHandle>,
		strategy: SelectionStrategy,
		request: &RoutedRequest,
	) -> Vec<ProviderHandle> {
		candidates.sort_by(by_rank);
		if candidates.len() <= 1 {
			return candidates;
		}

		let strategy = self.effective_strategy(strategy);
		match strategy {
			SelectionStrategy::Auto | SelectionStrategy::Priority => {},
			SelectionStrategy::RoundRobin => {
				let offset = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
				candidates.rotate_left(offset);
			},
			SelectionStrategy::WeightedRoundRobin => {
				candidates = self.weighted_order(candidates);
			},
			SelectionStrategy::LeastRecentlyUsed => {
				// never-used providers carry i64::MIN and come first
				candidates.sort_by_key(|handle| handle.last_used_millis());
			},
			SelectionStrategy::Geographic => {
				if let Some(region) = request.param(REGION_PARAM).and_then(|v| v.as_str()) {
					candidates.sort_by_key(|handle| {
						!handle
							.info()
							.region
							.as_deref()
							.is_some_and(|r| r.eq_ignore_ascii_case(region))
					});
				}
			},
			SelectionStrategy::CostBased => {
				candidates.sort_by_key(|handle| handle.info().cost);
			},
			SelectionStrategy::Performance => {
				candidates.sort_by_key(|handle| handle.last_latency_ms().unwrap_or(u64::MAX));
			},
		}

		debug!(
			strategy = %strategy,
			operation = %request.operation,
			order = ?candidates.iter().map(|h| h.id()).collect::<Vec<_>>(),
			"Ordered routing candidates"
		);
		candidates
	}
}

impl ProviderSelector {
	/// Weighted sampling without replacement; every candidate keeps a slot
	fn weighted_order(&self, candidates: Vec<ProviderHandle>) -> Vec<ProviderHandle> {
		use rand::Rng;

		let mut rng = rand::rng();
		let mut ordered = Vec::with_capacity(candidates.len());
		let mut remaining = candidates;

		while !remaining.is_empty() {
			let weights: Vec<f64> = remaining
				.iter()
				.map(|handle| handle.info().weight.max(1) as f64)
				.collect();
			let total_weight: f64 = weights.iter().sum();

			let mut random_weight = rng.random::<f64>() * total_weight;
			let mut selected_index = remaining.len() - 1;
			for (i, weight) in weights.iter().enumerate() {
				if random_weight < *weight {
					selected_index = i;
					break;
				}
				random_weight -= weight;
			}

			ordered.push(remaining.remove(selected_index));
		}

		ordered
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use oasis_types::test_utils::ScriptedProvider;
	use oasis_types::OperationKind;
	use std::sync::Arc;
	use std::time::Duration;

	fn handle(provider: ScriptedProvider) -> ProviderHandle {
		ProviderHandle::new(Arc::new(provider), 5)
	}

	fn ids(handles: &[ProviderHandle]) -> Vec<&str> {
		handles.iter().map(|h| h.id()).collect()
	}

	fn request() -> RoutedRequest {
		RoutedRequest::new(OperationKind::ReadEntity, "k")
	}

	#[test]
	fn test_priority_orders_by_rank_then_id() {
		let selector = ProviderSelector::default();
		let candidates = vec![
			handle(ScriptedProvider::storage("c").with_priority(2)),
			handle(ScriptedProvider::storage("b").with_priority(1)),
			handle(ScriptedProvider::storage("a").with_priority(2)),
		];

		let ordered = selector.order(candidates, SelectionStrategy::Priority, &request());
		assert_eq!(ids(&ordered), vec!["b", "a", "c"]);
	}

	#[test]
	fn test_round_robin_rotates_start() {
		let selector = ProviderSelector::default();
		let candidates = || {
			vec![
				handle(ScriptedProvider::storage("a").with_priority(1)),
				handle(ScriptedProvider::storage("b").with_priority(2)),
				handle(ScriptedProvider::storage("c").with_priority(3)),
			]
		};

		let first = selector.order(candidates(), SelectionStrategy::RoundRobin, &request());
		let second = selector.order(candidates(), SelectionStrategy::RoundRobin, &request());
		let third = selector.order(candidates(), SelectionStrategy::RoundRobin, &request());

		assert_eq!(ids(&first), vec!["a", "b", "c"]);
		assert_eq!(ids(&second), vec!["b", "c", "a"]);
		assert_eq!(ids(&third), vec!["c", "a", "b"]);
	}

	#[test]
	fn test_weighted_keeps_every_candidate() {
		let selector = ProviderSelector::default();
		let candidates = vec![
			handle(ScriptedProvider::storage("a").with_weight(1)),
			handle(ScriptedProvider::storage("b").with_weight(50)),
			handle(ScriptedProvider::storage("c").with_weight(3)),
		];

		let mut ordered = ids(&selector.order(
			candidates,
			SelectionStrategy::WeightedRoundRobin,
			&request(),
		))
		.into_iter()
		.map(str::to_string)
		.collect::<Vec<_>>();
		ordered.sort();
		assert_eq!(ordered, vec!["a", "b", "c"]);
	}

	#[test]
	fn test_least_recently_used_prefers_idle() {
		let selector = ProviderSelector::default();
		let busy = handle(ScriptedProvider::storage("busy").with_priority(1));
		busy.record_success(Duration::from_millis(3));
		let idle = handle(ScriptedProvider::storage("idle").with_priority(2));

		let ordered = selector.order(
			vec![busy, idle],
			SelectionStrategy::LeastRecentlyUsed,
			&request(),
		);
		assert_eq!(ids(&ordered), vec!["idle", "busy"]);
	}

	#[test]
	fn test_geographic_prefers_matching_region() {
		let selector = ProviderSelector::default();
		let candidates = vec![
			handle(ScriptedProvider::storage("us").with_priority(1).with_region("us-east")),
			handle(ScriptedProvider::storage("eu").with_priority(2).with_region("eu-west")),
		];
		let request = request().with_param(REGION_PARAM, "EU-WEST");

		let ordered = selector.order(candidates, SelectionStrategy::Geographic, &request);
		assert_eq!(ids(&ordered), vec!["eu", "us"]);
	}

	#[test]
	fn test_cost_and_performance() {
		let selector = ProviderSelector::default();
		let cheap = handle(ScriptedProvider::storage("cheap").with_priority(2).with_cost(1));
		let fast = handle(ScriptedProvider::storage("fast").with_priority(1).with_cost(9));
		fast.record_success(Duration::from_millis(2));
		cheap.record_success(Duration::from_millis(40));

		let by_cost = selector.order(
			vec![fast.clone(), cheap.clone()],
			SelectionStrategy::CostBased,
			&request(),
		);
		assert_eq!(ids(&by_cost), vec!["cheap", "fast"]);

		let by_latency = selector.order(vec![cheap, fast], SelectionStrategy::Performance, &request());
		assert_eq!(ids(&by_latency), vec!["fast", "cheap"]);
	}

	#[test]
	fn test_auto_uses_configured_default() {
		let selector = ProviderSelector::new(SelectionStrategy::CostBased);
		assert_eq!(
			selector.effective_strategy(SelectionStrategy::Auto),
			SelectionStrategy::CostBased
		);
		assert_eq!(
			ProviderSelector::new(SelectionStrategy::Auto).effective_strategy(SelectionStrategy::Auto),
			SelectionStrategy::Priority
		);
	}
}
