//! Gateway counters.
//!
//! Lock-free atomic counters, tagged at emit time from the ambient
//! request context. Exporters read a [`MetricsSnapshot`].

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Atomic counters for the whole gateway.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    tool_invocations: AtomicU64,
    tool_failures: AtomicU64,
    cache_hits: AtomicU64,
    elicitations_started: AtomicU64,
    elicitations_timed_out: AtomicU64,
    adapters_created: AtomicU64,
    adapters_destroyed: AtomicU64,
    active_adapters: AtomicI64,
}

impl ServerMetrics {
    /// Fresh counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one dispatched request.
    pub fn record_request(&self, failed: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count one tool invocation reaching finalize.
    pub fn record_tool_invocation(&self, failed: bool) {
        self.tool_invocations.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count one tool-cache hit.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one started elicitation.
    pub fn record_elicitation_started(&self) {
        self.elicitations_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one elicitation TTL expiry.
    pub fn record_elicitation_timeout(&self) {
        self.elicitations_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one adapter creation.
    pub fn record_adapter_created(&self) {
        self.adapters_created.fetch_add(1, Ordering::Relaxed);
        self.active_adapters.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one adapter destruction.
    pub fn record_adapter_destroyed(&self) {
        self.adapters_destroyed.fetch_add(1, Ordering::Relaxed);
        self.active_adapters.fetch_sub(1, Ordering::Relaxed);
    }

    /// Read all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            tool_invocations: self.tool_invocations.load(Ordering::Relaxed),
            tool_failures: self.tool_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            elicitations_started: self.elicitations_started.load(Ordering::Relaxed),
            elicitations_timed_out: self.elicitations_timed_out.load(Ordering::Relaxed),
            adapters_created: self.adapters_created.load(Ordering::Relaxed),
            adapters_destroyed: self.adapters_destroyed.load(Ordering::Relaxed),
            active_adapters: self.active_adapters.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub tool_invocations: u64,
    pub tool_failures: u64,
    pub cache_hits: u64,
    pub elicitations_started: u64,
    pub elicitations_timed_out: u64,
    pub adapters_created: u64,
    pub adapters_destroyed: u64,
    pub active_adapters: i64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "requests={}/{} tools={}/{} cache_hits={} elicits={}/{} adapters={}",
            self.requests_total,
            self.requests_failed,
            self.tool_invocations,
            self.tool_failures,
            self.cache_hits,
            self.elicitations_started,
            self.elicitations_timed_out,
            self.active_adapters,
        )
    }
}
