//! The engine wires connection, filter, router and registry together.
//!
//! All state lives in one tokio task. Commands from [`EngineHandle`]s,
//! connection signals, debounce expiries and the reconnect timer are handled
//! one at a time in that task, so the timer table needs no locking and events
//! are routed in the order the connection delivered them.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Sleep, sleep};

use crate::config::Settings;
use crate::session::SessionId;
use crate::sync::SyncError;
use crate::sync::connection::{ConnectionSignal, EventStreamConnection, SseTransport, Transport};
use crate::sync::filter::OriginFilter;
use crate::sync::metrics::SyncMetrics;
use crate::sync::reconnect::ReconnectPolicy;
use crate::sync::registry::{CallbackRegistry, Dispatch, RefreshFn};
use crate::sync::router::{DEFAULT_QUIET_WINDOW, DebounceRouter, Scheduled};

/// Runtime knobs for one engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
	/// Quiet period that settles a burst
	pub quiet_window: Duration,
	/// Backoff used after the connection errors
	pub reconnect: ReconnectPolicy,
	/// After a re-open, refresh every registered entity type once since
	/// events may have been missed while disconnected
	pub refresh_on_reconnect: bool,
	/// Treat a silent stream as dead after this long
	pub idle_timeout: Option<Duration>,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			quiet_window: DEFAULT_QUIET_WINDOW,
			reconnect: ReconnectPolicy::default(),
			refresh_on_reconnect: true,
			idle_timeout: None,
		}
	}
}

impl From<&Settings> for EngineConfig {
	fn from(s: &Settings) -> Self {
		Self {
			quiet_window: Duration::from_millis(s.quiet_window_ms),
			reconnect: ReconnectPolicy {
				initial: Duration::from_millis(s.reconnect_initial_ms),
				max: Duration::from_millis(s.reconnect_max_ms),
				jitter_pct: s.reconnect_jitter_pct,
				max_attempts: (s.reconnect_max_attempts > 0).then_some(s.reconnect_max_attempts),
			},
			refresh_on_reconnect: s.refresh_on_reconnect,
			idle_timeout: (s.idle_timeout_ms > 0).then(|| Duration::from_millis(s.idle_timeout_ms)),
		}
	}
}

/// Connection status as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
	Connecting,
	Open,
	Reconnecting { attempt: u32, delay: Duration },
	/// The reconnect budget is exhausted; pending refreshes still fire
	Failed,
	Closed,
}

enum Command {
	ReplaceCallbacks(CallbackRegistry),
	Register(String, Arc<RefreshFn>),
	Unregister(String),
	Close(oneshot::Sender<usize>),
}

/// Cloneable handle for talking to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
	commands: mpsc::UnboundedSender<Command>,
	state: watch::Receiver<ConnectionState>,
	metrics: Arc<SyncMetrics>,
	session: SessionId,
}

impl EngineHandle {
	fn send(&self, command: Command) -> Result<(), SyncError> {
		self.commands
			.send(command)
			.map_err(|_| SyncError::EngineClosed)
	}

	/// Swap in a complete new callback set. Timers already counting down keep
	/// their deadline and resolve their callback from this set when they fire.
	pub fn replace_callbacks(&self, callbacks: CallbackRegistry) -> Result<(), SyncError> {
		self.send(Command::ReplaceCallbacks(callbacks))
	}

	/// Add or replace a single callback; last registration wins.
	pub fn register<F>(&self, entity_type: impl Into<String>, callback: F) -> Result<(), SyncError>
	where
		F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
	{
		self.send(Command::Register(entity_type.into(), Arc::new(callback)))
	}

	pub fn unregister(&self, entity_type: impl Into<String>) -> Result<(), SyncError> {
		self.send(Command::Unregister(entity_type.into()))
	}

	pub fn state(&self) -> ConnectionState {
		self.state.borrow().clone()
	}

	pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
		self.state.clone()
	}

	/// Wait until the connection state satisfies `predicate`.
	pub async fn wait_for_state<F>(&self, predicate: F) -> Result<ConnectionState, SyncError>
	where
		F: FnMut(&ConnectionState) -> bool,
	{
		let mut rx = self.state.clone();
		let state = rx
			.wait_for(predicate)
			.await
			.map_err(|_| SyncError::EngineClosed)?;
		Ok(state.clone())
	}

	pub fn metrics(&self) -> Arc<SyncMetrics> {
		Arc::clone(&self.metrics)
	}

	pub fn session_id(&self) -> &SessionId {
		&self.session
	}

	pub fn is_closed(&self) -> bool {
		self.commands.is_closed()
	}
}

/// An owned, running sync engine. Dropping it tears everything down; no
/// refresh starts after the drop returns.
pub struct SyncEngine {
	handle: EngineHandle,
	task: Option<JoinHandle<()>>,
	dropped: Arc<AtomicBool>,
}

impl SyncEngine {
	/// Spawn the engine on the current tokio runtime and open the connection.
	pub fn start(
		config: EngineConfig,
		transport: Arc<dyn Transport>,
		session: SessionId,
		callbacks: CallbackRegistry,
	) -> Self {
		let (signals_tx, signals_rx) = mpsc::unbounded_channel();
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
		let metrics = Arc::new(SyncMetrics::default());
		let dropped = Arc::new(AtomicBool::new(false));

		let connection = EventStreamConnection::new(transport, signals_tx, Arc::clone(&metrics))
			.with_idle_timeout(config.idle_timeout);

		let worker = Worker {
			connection,
			signals: signals_rx,
			commands: commands_rx,
			filter: OriginFilter::new(session.clone()),
			router: DebounceRouter::new(config.quiet_window),
			registry: callbacks,
			config,
			attempt: 0,
			ever_opened: false,
			reconnect: None,
			state: state_tx,
			metrics: Arc::clone(&metrics),
			dropped: Arc::clone(&dropped),
			closed: false,
		};

		info!("Starting sync engine for session {}", session);
		let task = tokio::spawn(worker.run());

		Self {
			handle: EngineHandle {
				commands: commands_tx,
				state: state_rx,
				metrics,
				session,
			},
			task: Some(task),
			dropped,
		}
	}

	pub fn handle(&self) -> EngineHandle {
		self.handle.clone()
	}

	/// Close the connection and cancel every pending refresh. Returns the
	/// number of timers cancelled. Safe to call more than once.
	pub async fn close(&mut self) -> usize {
		let Some(task) = self.task.take() else {
			return 0;
		};

		let (ack_tx, ack_rx) = oneshot::channel();
		let cancelled = match self.handle.commands.send(Command::Close(ack_tx)) {
			Ok(()) => ack_rx.await.unwrap_or(0),
			Err(_) => 0,
		};
		if let Err(e) = task.await {
			if e.is_panic() {
				error!("Sync engine task panicked: {}", e);
			}
		}
		cancelled
	}
}

impl Drop for SyncEngine {
	fn drop(&mut self) {
		if let Some(task) = self.task.take() {
			// abort only lands at the worker's next yield
			self.dropped.store(true, Ordering::Release);
			task.abort();
		}
	}
}

/// Disposer returned by [`subscribe`].
pub struct Subscription {
	engine: SyncEngine,
}

impl Subscription {
	pub fn handle(&self) -> EngineHandle {
		self.engine.handle()
	}

	/// Re-supply the full callback set, e.g. on every render of the
	/// subscriber. Debounce windows in flight are not restarted.
	pub fn update(&self, callbacks: CallbackRegistry) -> Result<(), SyncError> {
		self.engine.handle.replace_callbacks(callbacks)
	}

	/// Close the connection and cancel pending refreshes.
	pub async fn dispose(mut self) -> usize {
		self.engine.close().await
	}
}

impl From<SyncEngine> for Subscription {
	fn from(engine: SyncEngine) -> Self {
		Self { engine }
	}
}

/// Subscribe to the configured change stream with this process's session
/// identity.
pub fn subscribe(
	settings: &Settings,
	callbacks: CallbackRegistry,
) -> Result<Subscription, SyncError> {
	let session = SessionId::current();
	let transport = SseTransport::from_settings(settings, session.clone())?;
	let engine = SyncEngine::start(
		EngineConfig::from(settings),
		Arc::new(transport),
		session,
		callbacks,
	);
	Ok(Subscription::from(engine))
}

struct Worker {
	connection: EventStreamConnection,
	signals: mpsc::UnboundedReceiver<ConnectionSignal>,
	commands: mpsc::UnboundedReceiver<Command>,
	filter: OriginFilter,
	router: DebounceRouter,
	registry: CallbackRegistry,
	config: EngineConfig,
	attempt: u32,
	ever_opened: bool,
	reconnect: Option<Pin<Box<Sleep>>>,
	state: watch::Sender<ConnectionState>,
	metrics: Arc<SyncMetrics>,
	dropped: Arc<AtomicBool>,
	closed: bool,
}

impl Worker {
	async fn run(mut self) {
		self.connection.open();

		loop {
			if self.owner_dropped() {
				self.shutdown();
				return;
			}
			tokio::select! {
				biased;
				command = self.commands.recv() => match command {
					Some(Command::ReplaceCallbacks(registry)) => {
						debug!("Replacing refresh callbacks: {:?}", registry.entity_types());
						self.registry = registry;
					}
					Some(Command::Register(entity_type, callback)) => {
						self.registry.insert(entity_type, callback);
					}
					Some(Command::Unregister(entity_type)) => {
						self.registry.unregister(&entity_type);
					}
					Some(Command::Close(ack)) => {
						let cancelled = self.shutdown();
						let _ = ack.send(cancelled);
						return;
					}
					None => {
						self.shutdown();
						return;
					}
				},
				Some(signal) = self.signals.recv() => self.on_signal(signal),
				Some(entity_type) = self.router.next_settled(), if self.router.has_pending() => {
					if !self.owner_dropped() {
						self.fire(&entity_type);
					}
				}
				_ = wait_reconnect(&mut self.reconnect), if self.reconnect.is_some() => {
					self.reconnect = None;
					self.state.send_replace(ConnectionState::Connecting);
					self.connection.open();
				}
			}
		}
	}

	fn on_signal(&mut self, signal: ConnectionSignal) {
		match signal {
			ConnectionSignal::Opened => {
				let reopened = self.ever_opened;
				self.ever_opened = true;
				self.attempt = 0;
				self.state.send_replace(ConnectionState::Open);
				info!("Push connection open");

				if reopened && self.config.refresh_on_reconnect {
					let types = self.registry.entity_types();
					debug!("Catch-up refresh after reconnect for {:?}", types);
					for entity_type in types {
						self.route(&entity_type);
					}
				}
			}
			ConnectionSignal::Message(event) => {
				if !self.filter.accepts(&event) {
					SyncMetrics::incr(&self.metrics.events_self_origin);
					debug!("Ignoring echo of local {} change", event.entity_type);
					return;
				}
				SyncMetrics::incr(&self.metrics.events_accepted);
				self.route(&event.entity_type);
			}
			ConnectionSignal::Error(e) => {
				warn!("Push connection error: {}", e);
				self.connection.close();

				match self.config.reconnect.delay_for(self.attempt) {
					Some(delay) => {
						self.attempt += 1;
						SyncMetrics::incr(&self.metrics.reconnect_attempts);
						info!("Reconnecting in {:?} (attempt {})", delay, self.attempt);
						self.state.send_replace(ConnectionState::Reconnecting {
							attempt: self.attempt,
							delay,
						});
						self.reconnect = Some(Box::pin(sleep(delay)));
					}
					None => {
						error!(
							"Giving up on push connection after {} reconnect attempts",
							self.attempt
						);
						self.state.send_replace(ConnectionState::Failed);
					}
				}
			}
		}
	}

	fn owner_dropped(&self) -> bool {
		self.dropped.load(Ordering::Acquire)
	}

	fn route(&mut self, entity_type: &str) {
		if self.router.schedule(entity_type) == Scheduled::Reset {
			SyncMetrics::incr(&self.metrics.timer_resets);
		}
	}

	fn fire(&mut self, entity_type: &str) {
		match self.registry.invoke(entity_type) {
			Dispatch::Refreshed => {
				SyncMetrics::incr(&self.metrics.refreshes_fired);
				debug!("Refreshed {}", entity_type);
			}
			Dispatch::Unhandled => {
				SyncMetrics::incr(&self.metrics.refreshes_unhandled);
				debug!("No refresh registered for {}", entity_type);
			}
			Dispatch::Failed(reason) => {
				SyncMetrics::incr(&self.metrics.refresh_failures);
				error!("Refresh for {} failed: {}", entity_type, reason);
			}
			Dispatch::Panicked(reason) => {
				SyncMetrics::incr(&self.metrics.refresh_failures);
				error!("Refresh for {} panicked: {}", entity_type, reason);
			}
		}
	}

	fn shutdown(&mut self) -> usize {
		if self.closed {
			return 0;
		}
		self.closed = true;

		self.connection.close();
		self.reconnect = None;
		let cancelled = self.router.cancel_all();
		self.metrics
			.timers_cancelled
			.fetch_add(cancelled as u64, Ordering::Relaxed);
		self.state.send_replace(ConnectionState::Closed);
		info!("Sync engine closed, {} pending refreshes cancelled", cancelled);
		cancelled
	}
}

impl Drop for Worker {
	fn drop(&mut self) {
		self.shutdown();
	}
}

async fn wait_reconnect(timer: &mut Option<Pin<Box<Sleep>>>) {
	match timer {
		Some(delay) => delay.as_mut().await,
		None => std::future::pending().await,
	}
}
