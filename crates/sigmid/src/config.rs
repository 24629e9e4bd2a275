use std::time::Duration;

/// Span of one outer timer chain node.
pub const TIMER_OUTER_SPAN_SECS: u64 = 100;

/// Span of one inner sub-chain node; also the minimum tick resolution.
pub const TIMER_INNER_SPAN_MS: u64 = 50;

/// Sub-chain nodes that fit in one outer node.
pub const TIMER_MAX_SUB_NODES: u64 = TIMER_OUTER_SPAN_SECS * 1000 / TIMER_INNER_SPAN_MS;

/// Longest settable timer: 10 days.
pub const TIMER_MAX_DURATION_MS: u64 = 10 * 24 * 3600 * 1000;

/// Base interval of the ticker thread.
pub const TICK_INTERVAL: Duration = Duration::from_millis(TIMER_INNER_SPAN_MS);

/// Largest tick multiple a client may register (10 x 50 ms = 500 ms coarsest granularity).
pub const TICK_MAX_MULTIPLE: u32 = 10;

/// Packed timer id layout, high to low: outer chain id, sub-chain id, event id.
pub const TIMER_ID_CHAIN_BITS: u32 = 26;
pub const TIMER_ID_SUBCHAIN_BITS: u32 = 20;
pub const TIMER_ID_EVENT_BITS: u32 = 18;

/// Path length cap for the file-level XML helpers.
pub const MAX_FILE_PATH: usize = 160;
