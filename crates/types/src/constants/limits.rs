//! Global limits and defaults for configuration and runtime

/// Default priority rank for providers that do not declare one
pub const DEFAULT_PROVIDER_PRIORITY: u32 = 100;

/// Default weight for weighted round-robin
pub const DEFAULT_PROVIDER_WEIGHT: u32 = 1;

/// Minimum allowed per-attempt timeout in milliseconds
pub const MIN_ATTEMPT_TIMEOUT_MS: u64 = 10; // 10ms

/// Maximum allowed per-attempt timeout in milliseconds
pub const MAX_ATTEMPT_TIMEOUT_MS: u64 = 120_000; // 2min

/// Default per-attempt timeout in milliseconds
pub const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 5_000; // 5s

/// Maximum allowed retries of one provider within a routed request
pub const MAX_PROVIDER_RETRIES: u32 = 10;

/// Default retries of one provider before failing over
pub const DEFAULT_PROVIDER_RETRIES: u32 = 2;

/// Default base delay of the exponential retry backoff
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 100;

/// Default cap of the exponential retry backoff
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 5_000;

/// Consecutive routed failures after which a provider is no longer live
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 5;

/// Consecutive failed health checks after which a provider is deactivated
pub const DEFAULT_DEACTIVATE_AFTER_FAILED_CHECKS: u32 = 3;

/// Default interval between provider health checks
pub const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Default chain observer polling interval
pub const DEFAULT_OBSERVER_POLL_INTERVAL_MS: u64 = 5_000;

/// Capacity of observer broadcast channels
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Default lifetime of a bridge order before it expires
pub const DEFAULT_BRIDGE_ORDER_EXPIRY_MINUTES: i64 = 30;

/// Attempts to persist a bridge order after its transaction went through
pub const BRIDGE_SAVE_ATTEMPTS_AFTER_SUBMIT: u32 = 3;
