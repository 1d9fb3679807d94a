use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one engine instance
#[derive(Debug, Default)]
pub struct SyncMetrics {
	pub connections_opened: AtomicU64,
	pub connection_errors: AtomicU64,
	pub reconnect_attempts: AtomicU64,
	pub events_received: AtomicU64,
	pub events_malformed: AtomicU64,
	pub events_self_origin: AtomicU64,
	pub events_accepted: AtomicU64,
	pub timer_resets: AtomicU64,
	pub refreshes_fired: AtomicU64,
	pub refreshes_unhandled: AtomicU64,
	pub refresh_failures: AtomicU64,
	pub timers_cancelled: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
	pub connections_opened: u64,
	pub connection_errors: u64,
	pub reconnect_attempts: u64,
	pub events_received: u64,
	pub events_malformed: u64,
	pub events_self_origin: u64,
	pub events_accepted: u64,
	pub timer_resets: u64,
	pub refreshes_fired: u64,
	pub refreshes_unhandled: u64,
	pub refresh_failures: u64,
	pub timers_cancelled: u64,
}

impl SyncMetrics {
	pub(crate) fn incr(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
		MetricsSnapshot {
			connections_opened: load(&self.connections_opened),
			connection_errors: load(&self.connection_errors),
			reconnect_attempts: load(&self.reconnect_attempts),
			events_received: load(&self.events_received),
			events_malformed: load(&self.events_malformed),
			events_self_origin: load(&self.events_self_origin),
			events_accepted: load(&self.events_accepted),
			timer_resets: load(&self.timer_resets),
			refreshes_fired: load(&self.refreshes_fired),
			refreshes_unhandled: load(&self.refreshes_unhandled),
			refresh_failures: load(&self.refresh_failures),
			timers_cancelled: load(&self.timers_cancelled),
		}
	}

	/// Generate Prometheus-compatible metrics text
	pub fn to_prometheus_text(&self) -> String {
		let s = self.snapshot();
		let series: [(&str, &str, u64); 12] = [
			("connections_opened_total", "Push connections established", s.connections_opened),
			("connection_errors_total", "Push connection errors", s.connection_errors),
			("reconnect_attempts_total", "Scheduled reconnect attempts", s.reconnect_attempts),
			("events_received_total", "Change events parsed from the stream", s.events_received),
			("events_malformed_total", "Messages dropped as malformed", s.events_malformed),
			("events_self_origin_total", "Events dropped as local echoes", s.events_self_origin),
			("events_accepted_total", "Events routed to a debounce timer", s.events_accepted),
			("timer_resets_total", "Debounce timers pushed out by a new event", s.timer_resets),
			("refreshes_fired_total", "Refresh callbacks completed", s.refreshes_fired),
			(
				"refreshes_unhandled_total",
				"Settled entity types without a callback",
				s.refreshes_unhandled,
			),
			(
				"refresh_failures_total",
				"Refresh callbacks that failed or panicked",
				s.refresh_failures,
			),
			("timers_cancelled_total", "Pending timers cancelled on teardown", s.timers_cancelled),
		];

		let mut out = String::new();
		for (name, help, value) in series {
			out.push_str(&format!("# HELP ledger_sync_{} {}\n", name, help));
			out.push_str(&format!("# TYPE ledger_sync_{} counter\n", name));
			out.push_str(&format!("ledger_sync_{} {}\n", name, value));
		}
		out
	}
}
