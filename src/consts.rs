pub mod client_consts {
    //! Resilience Layer Configuration Constants
    //!
    //! Defaults for every tunable of the client, organized by functional area.
    //! All of them can be overridden through [`crate::config::ClientConfig`].

    /// Capacity of the broadcast channel carrying [`crate::events::ClientEvent`]s.
    pub const EVENT_QUEUE_SIZE: usize = 100;

    /// Directory under the user's home that holds config and credentials.
    pub const CONFIG_DIR_NAME: &str = ".apiguard";

    // =============================================================================
    // RETRY CONFIGURATION
    // =============================================================================

    /// Retry and backoff configuration
    pub mod retry {
        use std::time::Duration;

        /// Maximum number of automatic retries for a transient failure
        pub const MAX_ATTEMPTS: u32 = 3;

        /// Delay before the first retry (milliseconds)
        pub const BASE_DELAY_MS: u64 = 1000;

        /// Growth factor between successive retries.
        /// The upstream enforces hard per-minute quotas; doubling does not clear 429 windows.
        pub const BACKOFF_MULTIPLIER: u32 = 3;

        /// Upper bound for any single backoff, including server-provided Retry-After (milliseconds)
        pub const MAX_DELAY_MS: u64 = 10 * 60 * 1000; // 10 minutes

        /// How long a due retry waits for connectivity when the network is reported offline
        pub const OFFLINE_WAIT_MS: u64 = 30_000;

        pub const fn base_delay() -> Duration {
            Duration::from_millis(BASE_DELAY_MS)
        }

        pub const fn max_delay() -> Duration {
            Duration::from_millis(MAX_DELAY_MS)
        }

        pub const fn offline_wait() -> Duration {
            Duration::from_millis(OFFLINE_WAIT_MS)
        }
    }

    // =============================================================================
    // THROTTLING CONFIGURATION
    // =============================================================================

    /// Per-endpoint admission control
    pub mod throttling {
        use std::time::Duration;

        /// Length of the rolling quota window (milliseconds)
        pub const WINDOW_MS: u64 = 60_000; // 1 minute

        /// Length of the burst window (milliseconds)
        pub const BURST_WINDOW_MS: u64 = 1000;

        /// Requests per window for endpoints without an explicit entry
        pub const DEFAULT_MAX_PER_MINUTE: u32 = 60;

        /// Requests per burst window for endpoints without an explicit entry
        pub const DEFAULT_MAX_BURST: u32 = 10;

        pub const fn window() -> Duration {
            Duration::from_millis(WINDOW_MS)
        }

        pub const fn burst_window() -> Duration {
            Duration::from_millis(BURST_WINDOW_MS)
        }
    }

    // =============================================================================
    // TRANSPORT CONFIGURATION
    // =============================================================================

    pub mod transport {
        use std::time::Duration;

        /// Timeout applied to every transport call (milliseconds)
        pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

        /// TCP connect timeout for the reqwest transport (milliseconds)
        pub const CONNECT_TIMEOUT_MS: u64 = 10_000;

        /// Default API base URL
        pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

        /// Longest server message kept on an error record
        pub const MAX_ERROR_MESSAGE_LEN: usize = 512;

        pub const fn request_timeout() -> Duration {
            Duration::from_millis(REQUEST_TIMEOUT_MS)
        }

        pub const fn connect_timeout() -> Duration {
            Duration::from_millis(CONNECT_TIMEOUT_MS)
        }
    }

    // =============================================================================
    // NETWORK PROBE CONFIGURATION
    // =============================================================================

    pub mod probe {
        use std::time::Duration;

        /// Interval between periodic connectivity checks (milliseconds)
        pub const INTERVAL_MS: u64 = 30_000;

        /// Timeout for a single connectivity check (milliseconds)
        pub const TIMEOUT_MS: u64 = 5_000;

        pub const fn interval() -> Duration {
            Duration::from_millis(INTERVAL_MS)
        }

        pub const fn timeout() -> Duration {
            Duration::from_millis(TIMEOUT_MS)
        }
    }

    // =============================================================================
    // RESPONSE CACHE CONFIGURATION
    // =============================================================================

    pub mod cache {
        use std::time::Duration;

        /// Shortest TTL accepted from configuration (milliseconds)
        pub const MIN_TTL_MS: u64 = 2 * 60 * 1000; // 2 minutes

        /// Longest TTL accepted from configuration (milliseconds)
        pub const MAX_TTL_MS: u64 = 10 * 60 * 1000; // 10 minutes

        /// Maximum number of cached responses kept at once
        pub const MAX_ENTRIES: usize = 256;

        pub const fn min_ttl() -> Duration {
            Duration::from_millis(MIN_TTL_MS)
        }

        pub const fn max_ttl() -> Duration {
            Duration::from_millis(MAX_TTL_MS)
        }
    }
}
