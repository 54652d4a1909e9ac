/**
 * Configuration constants for the resource cache, watcher and reload loop
 */
use std::time::Duration;

/// Default tick for both the watch restart loop and the reload loop, in milliseconds
pub const DEFAULT_RELOAD_DELAY_MS: u64 = 250;

/// Default server-side watch timeout in seconds. A watch that times out closes
/// normally and is reopened by the restart loop.
pub const DEFAULT_WATCH_TIMEOUT_SECONDS: u64 = 60;

/// The API server rejects watch timeouts at or above this value
pub const MAX_WATCH_TIMEOUT_SECONDS: u64 = 295;

/// Buffer between the HTTP watch and the per-kind event consumer
pub const WATCH_EVENT_CHANNEL_CAPACITY: usize = 100;

/// Key segment delimiter of the flattened configuration tree
pub const KEY_DELIMITER: char = ':';

/// Label used by the default selector (`app=<host>`)
pub const DEFAULT_SELECTOR_LABEL: &str = "app";

/// Environment variable holding the running host's identity
pub const HOST_ENV_VAR: &str = "HOSTNAME";

#[must_use]
pub const fn default_reload_delay() -> Duration {
    Duration::from_millis(DEFAULT_RELOAD_DELAY_MS)
}

#[must_use]
pub const fn default_watch_timeout() -> Duration {
    Duration::from_secs(DEFAULT_WATCH_TIMEOUT_SECONDS)
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(DEFAULT_RELOAD_DELAY_MS > 0, "DEFAULT_RELOAD_DELAY_MS must be greater than 0");
    assert!(DEFAULT_WATCH_TIMEOUT_SECONDS > 0, "DEFAULT_WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(
        DEFAULT_WATCH_TIMEOUT_SECONDS < MAX_WATCH_TIMEOUT_SECONDS,
        "DEFAULT_WATCH_TIMEOUT_SECONDS must stay below the API server cap"
    );
    assert!(WATCH_EVENT_CHANNEL_CAPACITY > 0, "WATCH_EVENT_CHANNEL_CAPACITY must be greater than 0");
};
