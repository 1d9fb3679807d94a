//! In-memory transport driven by a [`ChannelFeed`].
//!
//! Useful when change notifications reach the process through something
//! other than HTTP, and for exercising the engine without a server.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{ConnectionError, Frame, FrameStream, Transport};
use crate::sync::event::SyncEvent;

type FrameSender = mpsc::UnboundedSender<Result<Frame, ConnectionError>>;

struct Shared {
	current: Mutex<Option<FrameSender>>,
	refusals: AtomicU32,
	connects: watch::Sender<u32>,
}

impl Shared {
	fn current(&self) -> MutexGuard<'_, Option<FrameSender>> {
		self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	fn push(&self, frame: Result<Frame, ConnectionError>) -> bool {
		match self.current().as_ref() {
			Some(tx) => tx.send(frame).is_ok(),
			None => false,
		}
	}
}

/// The transport half, handed to the engine.
pub struct ChannelTransport {
	shared: Arc<Shared>,
}

/// The feeding half, kept by whoever produces notifications.
#[derive(Clone)]
pub struct ChannelFeed {
	shared: Arc<Shared>,
}

impl ChannelTransport {
	pub fn new() -> (ChannelTransport, ChannelFeed) {
		let (connects, _) = watch::channel(0);
		let shared = Arc::new(Shared {
			current: Mutex::new(None),
			refusals: AtomicU32::new(0),
			connects,
		});
		(
			ChannelTransport {
				shared: Arc::clone(&shared),
			},
			ChannelFeed { shared },
		)
	}
}

#[async_trait]
impl Transport for ChannelTransport {
	async fn connect(&self) -> Result<FrameStream, ConnectionError> {
		let refused = self
			.shared
			.refusals
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();

		let result = if refused {
			Err(ConnectionError::Refused("channel feed refused the connection".to_string()))
		} else {
			let (tx, rx) = mpsc::unbounded_channel();
			*self.shared.current() = Some(tx);
			Ok(UnboundedReceiverStream::new(rx).boxed())
		};

		// counted last so a waiter never observes a connect before its sender exists
		self.shared.connects.send_modify(|n| *n += 1);
		result
	}

	fn describe(&self) -> String {
		"in-memory channel".to_string()
	}
}

impl ChannelFeed {
	/// Deliver a raw payload on the live stream. `false` when no stream is
	/// connected.
	pub fn send_raw(&self, payload: impl Into<String>) -> bool {
		self.shared.push(Ok(Frame::Message(payload.into())))
	}

	pub fn send(&self, event: &SyncEvent) -> bool {
		match event.to_json() {
			Ok(json) => self.send_raw(json),
			Err(_) => false,
		}
	}

	/// Deliver a freshly stamped event for `entity_type` from `origin_id`.
	pub fn send_event(&self, entity_type: &str, origin_id: &str) -> bool {
		self.send(&SyncEvent::new(entity_type, origin_id))
	}

	pub fn heartbeat(&self) -> bool {
		self.shared.push(Ok(Frame::Heartbeat))
	}

	/// Fail the live stream with `error` and drop it.
	pub fn fail(&self, error: ConnectionError) -> bool {
		let delivered = self.shared.push(Err(error));
		self.shared.current().take();
		delivered
	}

	/// End the live stream cleanly, as a server closing the response would.
	pub fn hang_up(&self) -> bool {
		self.shared.current().take().is_some()
	}

	/// Refuse the next `n` connection attempts.
	pub fn refuse_next(&self, n: u32) {
		self.shared.refusals.store(n, Ordering::SeqCst);
	}

	/// Connection attempts made so far, refused ones included.
	pub fn connects(&self) -> u32 {
		*self.shared.connects.borrow()
	}

	pub fn is_connected(&self) -> bool {
		self.shared.current().as_ref().is_some_and(|tx| !tx.is_closed())
	}

	/// Wait until at least `n` connection attempts were made.
	pub async fn wait_for_connects(&self, n: u32) {
		let mut rx = self.shared.connects.subscribe();
		let _ = rx.wait_for(|count| *count >= n).await;
	}
}
