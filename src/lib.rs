pub mod config;
pub mod observability;
pub mod session;
pub mod sync;

use anyhow::Context;
use log::{debug, info, warn};

use crate::sync::{CallbackRegistry, ConnectionState};

/// Subscribe to the change stream and log every settled refresh for
/// `entity_types` until Ctrl-C or until reconnecting is given up.
pub async fn run(settings: config::Settings, entity_types: Vec<String>) -> anyhow::Result<()> {
	let mut callbacks = CallbackRegistry::new();
	for entity_type in entity_types {
		let name = entity_type.clone();
		callbacks.register(entity_type, move || {
			info!("Refresh {}", name);
			Ok(())
		});
	}

	let subscription =
		sync::subscribe(&settings, callbacks).context("failed to subscribe to change stream")?;
	let handle = subscription.handle();
	info!(
		"Watching {} as session {}",
		settings.events_url()?,
		handle.session_id()
	);

	let mut states = handle.watch_state();
	loop {
		tokio::select! {
			signal = tokio::signal::ctrl_c() => {
				signal.context("failed to listen for Ctrl-C")?;
				info!("Interrupted, shutting down");
				break;
			}
			changed = states.changed() => {
				if changed.is_err() {
					break;
				}
				let state = states.borrow_and_update().clone();
				debug!("Connection state: {:?}", state);
				if state == ConnectionState::Failed {
					warn!("Push connection failed permanently");
					break;
				}
			}
		}
	}

	let metrics = handle.metrics();
	let cancelled = subscription.dispose().await;
	debug!("{}", metrics.to_prometheus_text());
	info!("Stopped; {} pending refreshes discarded", cancelled);
	Ok(())
}
