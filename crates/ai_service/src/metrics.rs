//! Request counters for the inference service

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free counters updated on every request
#[derive(Debug)]
pub struct ServiceMetrics {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    rejected_requests: AtomicU64,
    failed_requests: AtomicU64,
    rows_predicted: AtomicU64,
    request_duration_us: AtomicU64,
    start_time: Instant,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            rows_predicted: AtomicU64::new(0),
            request_duration_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a served request of `rows` rows
    pub fn record_success(&self, rows: usize, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        self.rows_predicted.fetch_add(rows as u64, Ordering::Relaxed);
        self.add_duration(duration);
    }

    /// Record a failed request; `client` separates rejected input from faults
    pub fn record_failure(&self, client: bool, duration: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if client {
            self.rejected_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        self.add_duration(duration);
    }

    fn add_duration(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.request_duration_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let duration_us = self.request_duration_us.load(Ordering::Relaxed);
        let average_latency_ms = if total_requests > 0 {
            duration_us as f64 / total_requests as f64 / 1000.0
        } else {
            0.0
        };
        MetricsSnapshot {
            total_requests,
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            rows_predicted: self.rows_predicted.load(Ordering::Relaxed),
            average_latency_ms,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub rejected_requests: u64,
    pub failed_requests: u64,
    pub rows_predicted: u64,
    pub average_latency_ms: f64,
    pub uptime_seconds: u64,
}
