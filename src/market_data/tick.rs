// src/market_data/tick.rs
// Tick validation and the per-symbol single-writer ring buffer
// (SPEC_FULL §4.1, §5).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capabilities::RawTick;
use crate::config::EngineConfig;

pub const RING_BUFFER_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub venue: String,
    pub ts: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub volume_24h: f64,
    pub quality: f64,
    pub latency_ms: f64,
    pub stale: bool,
}

impl Tick {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread_bps(&self) -> f64 {
        let mid = self.mid();
        if mid <= 0.0 {
            0.0
        } else {
            (self.ask - self.bid) / mid * 10_000.0
        }
    }

    /// Validate and score a raw venue tick per SPEC_FULL §4.1. Never fails:
    /// a malformed tick is scored down and marked stale, not rejected.
    pub fn from_raw(raw: RawTick, venue: &str, now: DateTime<Utc>, cfg: &EngineConfig) -> Self {
        let mut quality = 1.0_f64;

        let crossed = raw.bid >= raw.ask;
        if crossed {
            quality -= 0.3;
        }
        if raw.last < raw.bid.min(raw.ask) || raw.last > raw.bid.max(raw.ask) {
            quality -= 0.1;
        }

        let mid = (raw.bid + raw.ask) / 2.0;
        let spread_bps = if mid > 0.0 {
            (raw.ask - raw.bid) / mid * 10_000.0
        } else {
            0.0
        };
        if spread_bps > 50.0 {
            quality -= 0.1;
        }

        let latency_ms = (now - raw.ts).num_milliseconds().max(0) as f64;
        if latency_ms > cfg.max_latency_ms as f64 {
            quality -= 0.2;
        }

        let quality = quality.clamp(0.0, 1.0);
        let stale = quality < 0.5 || !raw.bid.is_finite() || !raw.ask.is_finite();

        Self {
            symbol: raw.symbol,
            venue: venue.to_string(),
            ts: raw.ts,
            bid: raw.bid,
            ask: raw.ask,
            last: raw.last,
            bid_size: raw.bid_size,
            ask_size: raw.ask_size,
            volume_24h: raw.volume_24h,
            quality,
            latency_ms,
            stale: stale || crossed,
        }
    }
}

/// Single-writer ring buffer: only the owning venue producer pushes; readers
/// (the aggregator, external callers) only ever see a snapshot `Vec` copy.
#[derive(Debug, Default)]
pub struct TickRingBuffer {
    buf: VecDeque<Tick>,
}

impl TickRingBuffer {
    pub fn new() -> Self {
        Self { buf: VecDeque::with_capacity(RING_BUFFER_CAPACITY) }
    }

    pub fn push(&mut self, tick: Tick) {
        if self.buf.len() == RING_BUFFER_CAPACITY {
            self.buf.pop_front();
        }
        self.buf.push_back(tick);
    }

    pub fn latest(&self) -> Option<Tick> {
        self.buf.back().cloned()
    }

    pub fn recent(&self, n: usize) -> Vec<Tick> {
        let len = self.buf.len();
        let skip = len.saturating_sub(n);
        self.buf.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<Tick> {
        self.buf.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn raw(bid: f64, ask: f64, last: f64) -> RawTick {
        RawTick {
            symbol: "BTC".into(),
            ts: Utc::now(),
            bid,
            ask,
            last,
            bid_size: 1.0,
            ask_size: 1.0,
            last_size: 1.0,
            volume_24h: 1_000_000.0,
        }
    }

    #[test]
    fn crossed_market_marks_stale_and_penalizes_quality() {
        let tick = Tick::from_raw(raw(101.0, 100.0, 100.5), "binance", Utc::now(), &cfg());
        assert!(tick.stale);
        assert!(tick.quality < 0.8);
    }

    #[test]
    fn clean_tick_is_not_stale() {
        let tick = Tick::from_raw(raw(100.0, 100.05, 100.02), "binance", Utc::now(), &cfg());
        assert!(!tick.stale);
        assert_eq!(tick.quality, 1.0);
    }

    #[test]
    fn ring_buffer_caps_at_capacity() {
        let mut buf = TickRingBuffer::new();
        for _ in 0..(RING_BUFFER_CAPACITY + 10) {
            buf.push(Tick::from_raw(raw(100.0, 100.1, 100.05), "binance", Utc::now(), &cfg()));
        }
        assert_eq!(buf.snapshot().len(), RING_BUFFER_CAPACITY);
    }
}
