// src/market_data/health.rs
// Per-venue health tracking (SPEC_FULL §4.1). A venue that goes unhealthy is
// excluded from aggregation inputs until it recovers.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const MAX_RECENT_ERRORS: usize = 50;
const UNHEALTHY_IDLE_SECS: i64 = 30;
const UNHEALTHY_ERROR_COUNT_24H: u32 = 10;
const UNHEALTHY_QUALITY_FLOOR: f64 = 0.7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub venue: String,
    pub connected: bool,
    pub healthy: bool,
    pub reconnection_count: u32,
    pub average_latency_ms: f64,
    pub message_rate: f64,
    pub quality_score: f64,
    pub recent_errors: Vec<String>,
    pub last_update: DateTime<Utc>,
    pub error_count_24h: u32,
}

impl Health {
    pub fn new(venue: &str, now: DateTime<Utc>) -> Self {
        Self {
            venue: venue.to_string(),
            connected: true,
            healthy: true,
            reconnection_count: 0,
            average_latency_ms: 0.0,
            message_rate: 0.0,
            quality_score: 1.0,
            recent_errors: Vec::new(),
            last_update: now,
            error_count_24h: 0,
        }
    }

    pub fn recompute_healthy(&mut self, now: DateTime<Utc>) {
        let idle = (now - self.last_update).num_seconds() > UNHEALTHY_IDLE_SECS;
        self.healthy = !idle
            && self.error_count_24h <= UNHEALTHY_ERROR_COUNT_24H
            && self.quality_score >= UNHEALTHY_QUALITY_FLOOR;
    }

    pub fn on_tick(&mut self, latency_ms: f64, quality: f64, now: DateTime<Utc>) {
        // Exponential moving average keeps this cheap to update per-tick.
        self.average_latency_ms = self.average_latency_ms * 0.9 + latency_ms * 0.1;
        self.quality_score = self.quality_score * 0.9 + quality * 0.1;
        self.last_update = now;
        self.connected = true;
        self.recompute_healthy(now);
    }

    pub fn on_error(&mut self, msg: String) {
        self.error_count_24h += 1;
        self.recent_errors.push(msg);
        if self.recent_errors.len() > MAX_RECENT_ERRORS {
            self.recent_errors.remove(0);
        }
    }

    pub fn on_reconnect(&mut self) {
        self.reconnection_count += 1;
        self.connected = true;
    }

    pub fn on_disconnect(&mut self) {
        self.connected = false;
        self.healthy = false;
    }
}

/// Sliding history used only to keep `error_count_24h` accurate; kept
/// separate from `Health` so the hot path (`on_tick`) stays allocation-free.
#[derive(Debug, Default)]
pub struct ErrorWindow {
    timestamps: VecDeque<DateTime<Utc>>,
}

impl ErrorWindow {
    pub fn push(&mut self, now: DateTime<Utc>) {
        self.timestamps.push_back(now);
        self.prune(now);
    }

    pub fn prune(&mut self, now: DateTime<Utc>) {
        while let Some(front) = self.timestamps.front() {
            if (now - *front).num_hours() >= 24 {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn count(&self) -> u32 {
        self.timestamps.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn idle_venue_becomes_unhealthy() {
        let now = Utc::now();
        let mut h = Health::new("binance", now - Duration::seconds(60));
        h.recompute_healthy(now);
        assert!(!h.healthy);
    }

    #[test]
    fn low_quality_marks_unhealthy() {
        let now = Utc::now();
        let mut h = Health::new("binance", now);
        h.quality_score = 0.5;
        h.recompute_healthy(now);
        assert!(!h.healthy);
    }
}
