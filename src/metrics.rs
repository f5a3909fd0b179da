// src/metrics.rs
// Lightweight atomic-counter metrics, in the shape of the teacher's
// metrics::Metrics (Arc<AtomicU64> fields, a format_prometheus-style dump).
// No HTTP exposition endpoint ships here (that would be the out-of-scope UI
// surface) — the Engine exposes this struct for an embedder to poll.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub ticks_ingested_total: Arc<AtomicU64>,
    pub ticks_dropped_total: Arc<AtomicU64>,
    pub aggregations_total: Arc<AtomicU64>,

    pub signals_emitted_total: Arc<AtomicU64>,
    pub signals_no_action_total: Arc<AtomicU64>,

    pub decisions_strong_buy: Arc<AtomicU64>,
    pub decisions_buy: Arc<AtomicU64>,
    pub decisions_hold: Arc<AtomicU64>,
    pub decisions_sell: Arc<AtomicU64>,
    pub decisions_strong_sell: Arc<AtomicU64>,
    pub decisions_no_action: Arc<AtomicU64>,

    pub risk_violations_total: Arc<AtomicU64>,
    pub emergency_stops_total: Arc<AtomicU64>,

    pub positions_opened_total: Arc<AtomicU64>,
    pub positions_closed_total: Arc<AtomicU64>,

    pub correlation_updates_total: Arc<AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            ticks_ingested_total: Arc::new(AtomicU64::new(0)),
            ticks_dropped_total: Arc::new(AtomicU64::new(0)),
            aggregations_total: Arc::new(AtomicU64::new(0)),
            signals_emitted_total: Arc::new(AtomicU64::new(0)),
            signals_no_action_total: Arc::new(AtomicU64::new(0)),
            decisions_strong_buy: Arc::new(AtomicU64::new(0)),
            decisions_buy: Arc::new(AtomicU64::new(0)),
            decisions_hold: Arc::new(AtomicU64::new(0)),
            decisions_sell: Arc::new(AtomicU64::new(0)),
            decisions_strong_sell: Arc::new(AtomicU64::new(0)),
            decisions_no_action: Arc::new(AtomicU64::new(0)),
            risk_violations_total: Arc::new(AtomicU64::new(0)),
            emergency_stops_total: Arc::new(AtomicU64::new(0)),
            positions_opened_total: Arc::new(AtomicU64::new(0)),
            positions_closed_total: Arc::new(AtomicU64::new(0)),
            correlation_updates_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_tick(&self, dropped: bool) {
        self.ticks_ingested_total.fetch_add(1, Ordering::Relaxed);
        if dropped {
            self.ticks_dropped_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_aggregation(&self) {
        self.aggregations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal(&self, emitted: bool) {
        if emitted {
            self.signals_emitted_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.signals_no_action_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_decision(&self, action: crate::domain::Action) {
        use crate::domain::Action;
        let counter = match action {
            Action::StrongBuy => &self.decisions_strong_buy,
            Action::Buy => &self.decisions_buy,
            Action::Hold => &self.decisions_hold,
            Action::Sell => &self.decisions_sell,
            Action::StrongSell => &self.decisions_strong_sell,
            Action::NoAction => &self.decisions_no_action,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_violation(&self) {
        self.risk_violations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emergency_stop(&self) {
        self.emergency_stops_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_position_opened(&self) {
        self.positions_opened_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_position_closed(&self) {
        self.positions_closed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_correlation_update(&self) {
        self.correlation_updates_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Format metrics in Prometheus text format, for an embedder that wants
    /// to expose its own `/metrics` endpoint (not this crate's concern).
    pub fn format_prometheus(&self) -> String {
        let mut out = String::new();
        let gauge = |out: &mut String, name: &str, help: &str, value: u64| {
            out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"));
        };

        gauge(&mut out, "ticks_ingested_total", "Ticks ingested by MDF", self.ticks_ingested_total.load(Ordering::Relaxed));
        gauge(&mut out, "ticks_dropped_total", "Ticks dropped by MDF validation", self.ticks_dropped_total.load(Ordering::Relaxed));
        gauge(&mut out, "aggregations_total", "MDF aggregation cycles run", self.aggregations_total.load(Ordering::Relaxed));
        gauge(&mut out, "signals_emitted_total", "Signals emitted by SG", self.signals_emitted_total.load(Ordering::Relaxed));
        gauge(&mut out, "signals_no_action_total", "NoAction signals from SG", self.signals_no_action_total.load(Ordering::Relaxed));
        gauge(&mut out, "risk_violations_total", "Risk violations detected by RM", self.risk_violations_total.load(Ordering::Relaxed));
        gauge(&mut out, "emergency_stops_total", "Emergency stops triggered", self.emergency_stops_total.load(Ordering::Relaxed));
        gauge(&mut out, "positions_opened_total", "Positions opened by LS", self.positions_opened_total.load(Ordering::Relaxed));
        gauge(&mut out, "positions_closed_total", "Positions closed by LS", self.positions_closed_total.load(Ordering::Relaxed));
        gauge(&mut out, "correlation_updates_total", "CV recompute events", self.correlation_updates_total.load(Ordering::Relaxed));
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
