//! The persistent push connection.
//!
//! A [`Transport`] knows how to open one stream of frames. The
//! [`EventStreamConnection`] drives a single reader over it and turns frames
//! into [`ConnectionSignal`]s for the engine. It never retries on its own;
//! re-opening after an error is the caller's decision.

pub mod channel;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use log::{debug, info};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::sync::event::SyncEvent;
use crate::sync::metrics::SyncMetrics;

pub use channel::{ChannelFeed, ChannelTransport};
pub use sse::{SseDecoder, SseTransport};

/// Errors surfaced by a push connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
	#[error("HTTP request failed: {0}")]
	Http(String),

	#[error("HTTP error status: {0}")]
	Status(u16),

	#[error("connection refused: {0}")]
	Refused(String),

	#[error("stream closed by server")]
	Closed,

	#[error("no data received for {0:?}")]
	IdleTimeout(Duration),
}

impl From<reqwest::Error> for ConnectionError {
	fn from(e: reqwest::Error) -> Self {
		match e.status() {
			Some(status) => Self::Status(status.as_u16()),
			None => Self::Http(e.to_string()),
		}
	}
}

/// One unit read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
	/// A message payload, expected to be a JSON sync event
	Message(String),
	/// Keep-alive traffic with no payload
	Heartbeat,
}

pub type FrameStream = BoxStream<'static, Result<Frame, ConnectionError>>;

/// Opens push streams.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Open one stream. Each call is an independent connection attempt.
	async fn connect(&self) -> Result<FrameStream, ConnectionError>;

	/// Short description for logs (usually the endpoint).
	fn describe(&self) -> String;
}

/// What the connection reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSignal {
	Opened,
	Message(SyncEvent),
	/// Terminal for the current stream; no further signals follow until
	/// the connection is opened again
	Error(ConnectionError),
}

pub struct EventStreamConnection {
	transport: Arc<dyn Transport>,
	signals: mpsc::UnboundedSender<ConnectionSignal>,
	metrics: Arc<SyncMetrics>,
	idle_timeout: Option<Duration>,
	reader: Option<JoinHandle<()>>,
}

impl EventStreamConnection {
	pub fn new(
		transport: Arc<dyn Transport>,
		signals: mpsc::UnboundedSender<ConnectionSignal>,
		metrics: Arc<SyncMetrics>,
	) -> Self {
		Self {
			transport,
			signals,
			metrics,
			idle_timeout: None,
			reader: None,
		}
	}

	/// Treat a stream that stays silent (heartbeats included) for `limit` as
	/// dead.
	pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
		self.idle_timeout = limit;
		self
	}

	pub fn is_open(&self) -> bool {
		self.reader.as_ref().is_some_and(|h| !h.is_finished())
	}

	/// Start a reader unless one is already live. Returns whether a new
	/// connection attempt was started.
	pub fn open(&mut self) -> bool {
		if self.is_open() {
			return false;
		}

		info!("Opening push connection to {}", self.transport.describe());
		let reader = read_frames(
			Arc::clone(&self.transport),
			self.signals.clone(),
			Arc::clone(&self.metrics),
			self.idle_timeout,
		);
		self.reader = Some(tokio::spawn(reader));
		true
	}

	/// Release the underlying stream. Safe to call repeatedly.
	pub fn close(&mut self) -> bool {
		match self.reader.take() {
			Some(handle) => {
				handle.abort();
				debug!("Closed push connection to {}", self.transport.describe());
				true
			}
			None => false,
		}
	}
}

impl Drop for EventStreamConnection {
	fn drop(&mut self) {
		self.close();
	}
}

async fn read_frames(
	transport: Arc<dyn Transport>,
	signals: mpsc::UnboundedSender<ConnectionSignal>,
	metrics: Arc<SyncMetrics>,
	idle_timeout: Option<Duration>,
) {
	let mut frames = match transport.connect().await {
		Ok(frames) => frames,
		Err(e) => {
			SyncMetrics::incr(&metrics.connection_errors);
			let _ = signals.send(ConnectionSignal::Error(e));
			return;
		}
	};

	SyncMetrics::incr(&metrics.connections_opened);
	if signals.send(ConnectionSignal::Opened).is_err() {
		return;
	}

	loop {
		let next = match idle_timeout {
			Some(limit) => match tokio::time::timeout(limit, frames.next()).await {
				Ok(next) => next,
				Err(_) => Some(Err(ConnectionError::IdleTimeout(limit))),
			},
			None => frames.next().await,
		};

		let signal = match next {
			Some(Ok(Frame::Heartbeat)) => continue,
			Some(Ok(Frame::Message(payload))) => match SyncEvent::parse(&payload) {
				Ok(event) => {
					SyncMetrics::incr(&metrics.events_received);
					ConnectionSignal::Message(event)
				}
				Err(e) => {
					SyncMetrics::incr(&metrics.events_malformed);
					debug!("Dropping malformed sync message: {}", e);
					continue;
				}
			},
			Some(Err(e)) => ConnectionSignal::Error(e),
			None => ConnectionSignal::Error(ConnectionError::Closed),
		};

		let terminal = matches!(signal, ConnectionSignal::Error(_));
		if terminal {
			SyncMetrics::incr(&metrics.connection_errors);
		}
		if signals.send(signal).is_err() || terminal {
			return;
		}
	}
}
