//! Fixed names and values shared by the compiler, the release orchestrator and
//! the packaged application runtime.

pub const APP_NAME: &str = "hover";

/// Name of the alias that carries live traffic on every function.
pub const LIVE_ALIAS: &str = "live";

/// Qualifier the control plane uses for the unpublished head of a function.
pub const LATEST_VERSION: &str = "$LATEST";

/// Seconds added to a worker group's timeout to get its queues' visibility timeout.
pub const QUEUE_VISIBILITY_MARGIN_SECS: u32 = 10;

/// Visibility timeout used when a worker group leaves its timeout unset.
pub const DEFAULT_QUEUE_VISIBILITY_SECS: u32 = 3;

pub const LOG_RETENTION_DAYS: u32 = 14;

/// Number of most recent artifacts a retention sweep always keeps.
pub const DEFAULT_RETENTION_KEEP: usize = 14;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

pub const WARMER_SCHEDULE: &str = "rate(5 minutes)";
pub const SCHEDULER_SCHEDULE: &str = "rate(1 minute)";
pub const SCHEDULER_COMMAND: &str = "schedule:run";

pub const CONFIG_CACHE_PATH: &str = "/tmp/storage/bootstrap/cache/config.php";
pub const EVENTS_CACHE_PATH: &str = "/tmp/storage/bootstrap/cache/events.php";
pub const ROUTES_CACHE_PATH: &str = "/tmp/storage/bootstrap/cache/routes-v7.php";

/// Top-level key prefix under which per-build assets are stored.
pub const ASSETS_ROOT: &str = "assets";

/// Name of the stack output carrying the manifest content hash.
pub const SIGNATURE_OUTPUT: &str = "Signature";
