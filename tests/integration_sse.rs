use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures_util::{Stream, stream};
use ledger_sync::config::Settings;
use ledger_sync::session::{SessionId, TAB_ID_HEADER};
use ledger_sync::sync::{CallbackRegistry, ConnectionState, SyncEvent, entity, subscribe};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

/// Minimal change-stream server: every connected client receives whatever
/// is published on `events`.
struct ChangeServer {
	events: broadcast::Sender<String>,
	last_tab: Mutex<Option<String>>,
}

impl ChangeServer {
	fn publish(&self, entity_type: &str, origin_id: &str) {
		let json = SyncEvent::new(entity_type, origin_id)
			.to_json()
			.expect("event serializes");
		let _ = self.events.send(json);
	}
}

async fn events(
	State(server): State<Arc<ChangeServer>>,
	headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let tab = headers
		.get(TAB_ID_HEADER)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);
	*server.last_tab.lock().expect("lock") = tab;

	let rx = server.events.subscribe();
	let stream = stream::unfold(rx, |mut rx| async move {
		match rx.recv().await {
			Ok(data) => Some((Ok::<Event, Infallible>(Event::default().data(data)), rx)),
			Err(_) => None,
		}
	});
	Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn serve() -> (SocketAddr, Arc<ChangeServer>) {
	let (tx, _) = broadcast::channel(64);
	let server = Arc::new(ChangeServer {
		events: tx,
		last_tab: Mutex::new(None),
	});
	let app = Router::new()
		.route("/api/sync/events", get(events))
		.with_state(Arc::clone(&server));

	let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
		.await
		.expect("bind loopback");
	let addr = listener.local_addr().expect("local addr");
	tokio::spawn(async move {
		let _ = axum::serve(listener, app).await;
	});
	(addr, server)
}

fn settings_for(addr: SocketAddr) -> Settings {
	let mut settings = Settings::default();
	settings.server_url = format!("http://{}/", addr).parse().expect("url");
	settings.quiet_window_ms = 100;
	settings.reconnect_initial_ms = 50;
	settings.reconnect_max_ms = 50;
	settings.reconnect_jitter_pct = 0;
	settings
}

fn counter_for(registry: &mut CallbackRegistry, entity_type: &str) -> Arc<AtomicUsize> {
	let count = Arc::new(AtomicUsize::new(0));
	let c = Arc::clone(&count);
	registry.register(entity_type, move || {
		c.fetch_add(1, Ordering::SeqCst);
		Ok(())
	});
	count
}

/// End to end over HTTP: the request carries the session id, remote bursts
/// are coalesced and our own echoes are ignored.
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_sse_stream_drives_refreshes() {
	let (addr, server) = serve().await;

	let mut callbacks = CallbackRegistry::new();
	let expenses = counter_for(&mut callbacks, entity::EXPENSE);
	let budgets = counter_for(&mut callbacks, entity::BUDGET);

	let subscription = subscribe(&settings_for(addr), callbacks).expect("subscribe");
	let handle = subscription.handle();
	timeout(
		Duration::from_secs(5),
		handle.wait_for_state(|s| *s == ConnectionState::Open),
	)
	.await
	.expect("connection opens in time")
	.expect("engine running");

	let local = SessionId::current();
	assert_eq!(
		server.last_tab.lock().expect("lock").as_deref(),
		Some(local.as_str())
	);

	for _ in 0..3 {
		server.publish(entity::EXPENSE, "another-tab");
	}
	server.publish(entity::BUDGET, local.as_str());
	server.publish(entity::BUDGET, local.as_str());

	sleep(Duration::from_millis(500)).await;
	assert_eq!(expenses.load(Ordering::SeqCst), 1);
	assert_eq!(budgets.load(Ordering::SeqCst), 0);

	let stats = handle.metrics().snapshot();
	assert_eq!(stats.events_received, 5);
	assert_eq!(stats.events_self_origin, 2);

	assert_eq!(subscription.dispose().await, 0);
	assert_eq!(handle.state(), ConnectionState::Closed);
}

/// A non-success status is a connection error and goes through reconnect.
#[tokio::test]
#[cfg(feature = "integration-tests")]
async fn test_error_status_triggers_reconnect() {
	let (addr, _server) = serve().await;

	let mut settings = settings_for(addr);
	settings.events_path = "/api/sync/missing".to_string();
	let subscription = subscribe(&settings, CallbackRegistry::new()).expect("subscribe");
	let handle = subscription.handle();

	let state = timeout(
		Duration::from_secs(5),
		handle.wait_for_state(|s| matches!(s, ConnectionState::Reconnecting { .. })),
	)
	.await
	.expect("reconnect scheduled in time")
	.expect("engine running");
	assert!(matches!(state, ConnectionState::Reconnecting { .. }));
	assert!(handle.metrics().snapshot().connection_errors >= 1);

	subscription.dispose().await;
}
