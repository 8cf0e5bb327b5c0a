//! Application constants
//!
//! Centralized location for all domain-level constants used throughout the
//! application.

// Well-known cache keys
pub const SUMMARY_CACHE_KEY: &str = "summary";
pub const ENTITY_CACHE_KEY_PREFIX: &str = "entity:";

// Payload field carrying the entity a notification refers to
pub const NOTIFICATION_ENTITY_FIELD: &str = "entity";

// Payload field summed into per-kind totals
pub const AMOUNT_FIELD: &str = "amount";

// Database defaults
pub const DEFAULT_DATABASE_PATH: &str = "tallysync.db";
pub const DEFAULT_POOL_SIZE: u32 = 8;

// Sync engine defaults
pub const DEFAULT_BATCH_SIZE: usize = 25;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_COMMIT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_SYNC_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_SYNC_MAX_DELAY_MS: u64 = 60_000;

// Cache defaults
pub const DEFAULT_CACHE_TTL_MS: u64 = 30_000;
pub const DEFAULT_STALE_RETENTION_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_REFRESH_DEBOUNCE_MS: u64 = 100;

// Realtime defaults
pub const DEFAULT_REALTIME_URL: &str = "ws://localhost:4000/socket/websocket";
pub const DEFAULT_REALTIME_TOPIC: &str = "tally:updates";
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MALFORMED_THRESHOLD: u32 = 5;
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

// Backoff defaults shared by sync and realtime
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_BACKOFF_JITTER: f64 = 0.3;

// Remote API defaults
pub const DEFAULT_REMOTE_BASE_URL: &str = "http://localhost:4000/api";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// Logging defaults
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Error messages surfaced to callers
pub const RETRY_BUDGET_EXHAUSTED: &str = "retry budget exhausted";
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;
