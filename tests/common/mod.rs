/// Shared helpers for the engine integration tests.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ledger_sync::session::SessionId;
use ledger_sync::sync::{
	CallbackRegistry, ChannelFeed, ChannelTransport, EngineConfig, ReconnectPolicy, SyncEngine,
};

/// Session identity of the engine under test.
pub const LOCAL_TAB: &str = "tab-local";
/// Some other client's session.
pub const REMOTE_TAB: &str = "tab-remote";

/// One invocation counter per entity type.
#[derive(Clone, Default)]
pub struct Counters {
	counts: HashMap<String, Arc<AtomicUsize>>,
}

impl Counters {
	pub fn new(entity_types: &[&str]) -> Self {
		let counts = entity_types
			.iter()
			.map(|t| (t.to_string(), Arc::new(AtomicUsize::new(0))))
			.collect();
		Self { counts }
	}

	/// Callback set that bumps the matching counter.
	pub fn registry(&self) -> CallbackRegistry {
		let mut registry = CallbackRegistry::new();
		for (entity_type, counter) in &self.counts {
			let counter = Arc::clone(counter);
			registry.register(entity_type.clone(), move || {
				counter.fetch_add(1, Ordering::SeqCst);
				Ok(())
			});
		}
		registry
	}

	pub fn get(&self, entity_type: &str) -> usize {
		self.counts
			.get(entity_type)
			.map(|c| c.load(Ordering::SeqCst))
			.unwrap_or(0)
	}

	pub fn total(&self) -> usize {
		self.counts.values().map(|c| c.load(Ordering::SeqCst)).sum()
	}
}

/// Engine config with a deterministic (jitter free) reconnect delay.
pub fn test_config(quiet_ms: u64, reconnect_ms: u64) -> EngineConfig {
	EngineConfig {
		quiet_window: Duration::from_millis(quiet_ms),
		reconnect: ReconnectPolicy::fixed(Duration::from_millis(reconnect_ms)),
		refresh_on_reconnect: true,
		idle_timeout: None,
	}
}

/// Start an engine over an in-memory transport and wait for its first
/// connection.
#[allow(dead_code)]
pub async fn start_engine(
	config: EngineConfig,
	callbacks: CallbackRegistry,
) -> (SyncEngine, ChannelFeed) {
	let (transport, feed) = ChannelTransport::new();
	let engine = SyncEngine::start(
		config,
		Arc::new(transport),
		SessionId::from(LOCAL_TAB),
		callbacks,
	);
	feed.wait_for_connects(1).await;
	(engine, feed)
}
