use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, future, stream};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use url::Url;

use super::{ConnectionError, Frame, FrameStream, Transport};
use crate::config::Settings;
use crate::session::{SessionId, StampOrigin, TAB_ID_HEADER};
use crate::sync::SyncError;

/// Incremental decoder for a `text/event-stream` body.
///
/// Chunks may split lines (or UTF-8 sequences) anywhere. `data` lines of one
/// event are joined with `\n`; a blank line dispatches. Comment lines and
/// blank lines without data are reported as heartbeats. `event`, `id` and
/// `retry` fields are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
	buffer: Vec<u8>,
	data: String,
	has_data: bool,
}

impl SseDecoder {
	pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
		self.buffer.extend_from_slice(chunk);

		let mut frames = Vec::new();
		while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
			let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
			let mut line = &raw[..raw.len() - 1];
			if let Some(stripped) = line.strip_suffix(b"\r") {
				line = stripped;
			}
			let line = String::from_utf8_lossy(line);
			if let Some(frame) = self.process_line(&line) {
				frames.push(frame);
			}
		}
		frames
	}

	fn process_line(&mut self, line: &str) -> Option<Frame> {
		if line.is_empty() {
			return Some(self.dispatch());
		}
		if line.starts_with(':') {
			return Some(Frame::Heartbeat);
		}

		let (field, value) = match line.split_once(':') {
			Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
			None => (line, ""),
		};
		if field == "data" {
			if self.has_data {
				self.data.push('\n');
			}
			self.data.push_str(value);
			self.has_data = true;
		}
		None
	}

	fn dispatch(&mut self) -> Frame {
		if !self.has_data {
			return Frame::Heartbeat;
		}
		self.has_data = false;
		Frame::Message(std::mem::take(&mut self.data))
	}
}

/// Server-sent events over HTTP(S).
pub struct SseTransport {
	client: reqwest::Client,
	url: Url,
	session: SessionId,
	tab_header: String,
}

impl SseTransport {
	pub fn new(client: reqwest::Client, url: Url, session: SessionId) -> Self {
		Self {
			client,
			url,
			session,
			tab_header: TAB_ID_HEADER.to_string(),
		}
	}

	pub fn with_tab_header(mut self, header: impl Into<String>) -> Self {
		self.tab_header = header.into();
		self
	}

	/// Transport for the endpoint and timeouts in `settings`.
	pub fn from_settings(settings: &Settings, session: SessionId) -> Result<Self, SyncError> {
		let url = settings.events_url()?;
		let client = reqwest::Client::builder()
			.connect_timeout(Duration::from_millis(settings.connect_timeout_ms))
			.user_agent(concat!("ledger-sync/", env!("CARGO_PKG_VERSION")))
			.build()?;

		Ok(Self::new(client, url, session).with_tab_header(settings.tab_header.clone()))
	}

	pub fn url(&self) -> &Url {
		&self.url
	}
}

#[async_trait]
impl Transport for SseTransport {
	async fn connect(&self) -> Result<FrameStream, ConnectionError> {
		let response = self
			.client
			.get(self.url.clone())
			.header(ACCEPT, "text/event-stream")
			.header(CACHE_CONTROL, "no-cache")
			.stamp_origin(&self.tab_header, &self.session)
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			return Err(ConnectionError::Status(status.as_u16()));
		}

		let frames = response
			.bytes_stream()
			.scan(SseDecoder::default(), |decoder, chunk| {
				let batch: Vec<Result<Frame, ConnectionError>> = match chunk {
					Ok(bytes) => decoder.feed(&bytes).into_iter().map(Ok).collect(),
					Err(e) => vec![Err(ConnectionError::from(e))],
				};
				future::ready(Some(stream::iter(batch)))
			})
			.flatten()
			.boxed();

		Ok(frames)
	}

	fn describe(&self) -> String {
		self.url.to_string()
	}
}
