//! Per-component configuration, mirroring the teacher crate's small
//! `Default`-able config structs (`CoreConfig`, `CsmaConfig`,
//! `BeaconConfig`) rather than one monolithic settings blob.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

/// Message pool geometry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PoolConfig {
    /// Number of fixed cells in the pool.
    pub num_buffers: usize,
    /// Size in bytes of each cell's payload area.
    pub buffer_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_buffers: 128,
            buffer_size: 128,
        }
    }
}

/// MAC controller timing and retry configuration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MacConfig {
    /// Minimum backoff, in symbol periods (802.15.4 `macMinBE`-derived).
    pub backoff_min_symbols: u32,
    /// Maximum backoff, in symbol periods.
    pub backoff_max_symbols: u32,
    /// Maximum number of retransmission attempts for acked unicast frames.
    pub max_retries: u8,
    /// Default per-channel dwell time during active scan, in ms.
    pub scan_default_interval_ms: u32,
    /// Channel mask covering all 802.15.4 2.4GHz channels (11..26).
    pub scan_channel_mask_all: u32,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            backoff_min_symbols: 1,
            backoff_max_symbols: 32,
            max_retries: 12,
            scan_default_interval_ms: 150,
            scan_channel_mask_all: 0x07fff800,
        }
    }
}

/// Mesh forwarder timing configuration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ForwarderConfig {
    /// Reassembly entry reap timeout, in seconds.
    pub reassembly_timeout_s: u16,
    /// Sleepy-child poll period, in ms.
    pub poll_period_ms: u32,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            reassembly_timeout_s: 5,
            poll_period_ms: 2_500,
        }
    }
}

/// Address resolver timing configuration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ResolverConfig {
    /// Number of cache entries (fixed capacity per spec).
    pub cache_entries: usize,
    /// Seconds to wait for an address-notification before retrying/expiring.
    pub discover_timeout_s: u16,
    /// CoAP UDP port used for `a/aq` / `a/an` / `a/ae`.
    pub coap_udp_port: u16,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_entries: 16,
            discover_timeout_s: 3,
            coap_udp_port: 61631,
        }
    }
}

/// Network Data Leader configuration.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LeaderConfig {
    /// Seconds an unused 6LoWPAN context id is held before being freed.
    pub context_id_reuse_delay_s: u32,
    /// Size of the canonical TLV store, in bytes.
    pub network_data_max_len: usize,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            context_id_reuse_delay_s: 48 * 60 * 60,
            network_data_max_len: 254,
        }
    }
}

/// Aggregate configuration for a `NetIf`, composed of the small
/// per-component configs above.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Config {
    pub pool: PoolConfig,
    pub mac: MacConfig,
    pub forwarder: ForwarderConfig,
    pub resolver: ResolverConfig,
    pub leader: LeaderConfig,
}
