use std::time::Duration;

/// Batch size threshold: flush when this many frames have accumulated.
pub const BATCH_SIZE_THRESHOLD: usize = 20;
/// Flush interval: any accumulated frames are flushed when this ticks.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(5);
/// Outbound channel capacity, in frames.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;
/// Writer buffer size, sourced from the pool.
pub const WRITER_BUFFER_BYTES: usize = 8 * 1024;
/// A single frame at or above this size (with batching disabled) is written
/// directly with no intermediate join buffer.
pub const ZERO_COPY_THRESHOLD_BYTES: usize = 4 * 1024;
/// Above this summed batch size, frames are streamed one-by-one instead of
/// joined into a single pooled buffer (4x the writer buffer).
pub const STREAMING_FLUSH_THRESHOLD_BYTES: usize = WRITER_BUFFER_BYTES * 4;

/// UDS connect retry count before falling back (or failing fatally).
pub const UDS_CONNECT_RETRIES: u32 = 10;
/// Initial UDS connect backoff.
pub const UDS_CONNECT_BACKOFF_START: Duration = Duration::from_millis(10);
/// Maximum per-attempt UDS connect backoff.
pub const UDS_CONNECT_BACKOFF_CAP: Duration = Duration::from_millis(500);
/// Default base path for the UDS transport; the worker appends
/// `_<process-id>.sock`.
pub const DEFAULT_UDS_BASE_PATH: &str = "/tmp/v2e_uds";

/// Default per-client RPC timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);
/// Bounded wait `deliver()` gives a slow/absent waiter before dropping the
/// response on the floor.
pub const DELIVERY_HANDOFF_TIMEOUT: Duration = Duration::from_secs(1);

/// Directory structured logs are written under, one `<process-id>.log` file
/// per worker.
pub const DEFAULT_LOGS_DIR: &str = "/tmp/v2e_logs";

/// Runtime-overridable subset of the above, so tests can shrink timeouts and
/// thresholds without touching production code paths. Production code
/// always constructs this via [`RuntimeConfig::default`]; the named consts
/// above remain the single source of truth for the defaults.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub batch_size_threshold: usize,
    pub flush_interval: Duration,
    pub outbound_channel_capacity: usize,
    pub writer_buffer_bytes: usize,
    pub zero_copy_threshold_bytes: usize,
    pub streaming_flush_threshold_bytes: usize,
    pub uds_connect_retries: u32,
    pub uds_connect_backoff_start: Duration,
    pub uds_connect_backoff_cap: Duration,
    pub rpc_timeout: Duration,
    pub delivery_handoff_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            batch_size_threshold: BATCH_SIZE_THRESHOLD,
            flush_interval: FLUSH_INTERVAL,
            outbound_channel_capacity: OUTBOUND_CHANNEL_CAPACITY,
            writer_buffer_bytes: WRITER_BUFFER_BYTES,
            zero_copy_threshold_bytes: ZERO_COPY_THRESHOLD_BYTES,
            streaming_flush_threshold_bytes: STREAMING_FLUSH_THRESHOLD_BYTES,
            uds_connect_retries: UDS_CONNECT_RETRIES,
            uds_connect_backoff_start: UDS_CONNECT_BACKOFF_START,
            uds_connect_backoff_cap: UDS_CONNECT_BACKOFF_CAP,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            delivery_handoff_timeout: DELIVERY_HANDOFF_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    /// Shrinks timing-sensitive thresholds for fast integration tests; kept
    /// out of the production path entirely.
    #[cfg(any(test, feature = "test-util"))]
    pub fn fast_for_tests() -> Self {
        Self {
            flush_interval: Duration::from_millis(1),
            rpc_timeout: Duration::from_millis(200),
            delivery_handoff_timeout: Duration::from_millis(50),
            uds_connect_backoff_start: Duration::from_millis(1),
            uds_connect_backoff_cap: Duration::from_millis(5),
            ..Self::default()
        }
    }
}
