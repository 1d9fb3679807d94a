//! Trailing-edge debounce, one independent timer per entity type.
//!
//! The router only decides *when* a key has settled. Resolving and invoking
//! the callback is left to the caller so that the callback set can be swapped
//! without touching timers that are already counting down.

use std::collections::HashMap;
use std::future::poll_fn;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;

/// Quiet period after the last event before a key settles.
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Outcome of [`DebounceRouter::schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
	/// No timer was pending; a new one was started
	Armed,
	/// The pending timer was replaced by a fresh full window
	Reset,
}

pub struct DebounceRouter {
	window: Duration,
	slots: HashMap<String, Key>,
	timers: DelayQueue<String>,
}

impl DebounceRouter {
	pub fn new(window: Duration) -> Self {
		Self {
			window,
			slots: HashMap::new(),
			timers: DelayQueue::new(),
		}
	}

	pub fn window(&self) -> Duration {
		self.window
	}

	/// Record an event for `entity_type`. At most one timer per key exists at
	/// any instant; a pending one is pushed out to a full window from now.
	pub fn schedule(&mut self, entity_type: &str) -> Scheduled {
		match self.slots.get(entity_type) {
			Some(key) => {
				self.timers.reset(key, self.window);
				Scheduled::Reset
			}
			None => {
				let key = self.timers.insert(entity_type.to_owned(), self.window);
				self.slots.insert(entity_type.to_owned(), key);
				Scheduled::Armed
			}
		}
	}

	pub fn is_pending(&self, entity_type: &str) -> bool {
		self.slots.contains_key(entity_type)
	}

	/// Number of keys with a timer counting down.
	pub fn pending(&self) -> usize {
		self.slots.len()
	}

	pub fn has_pending(&self) -> bool {
		!self.slots.is_empty()
	}

	/// Drop the pending timer for one key without firing it.
	pub fn cancel(&mut self, entity_type: &str) -> bool {
		match self.slots.remove(entity_type) {
			Some(key) => {
				self.timers.remove(&key);
				true
			}
			None => false,
		}
	}

	/// Drop every pending timer; returns how many were cancelled.
	pub fn cancel_all(&mut self) -> usize {
		let cancelled = self.slots.len();
		self.slots.clear();
		self.timers.clear();
		cancelled
	}

	/// Poll for the next key whose quiet window elapsed. The slot is cleared
	/// before the key is returned, so a new event re-arms from scratch.
	pub fn poll_settled(&mut self, cx: &mut Context<'_>) -> Poll<Option<String>> {
		match self.timers.poll_expired(cx) {
			Poll::Ready(Some(expired)) => {
				let entity_type = expired.into_inner();
				self.slots.remove(&entity_type);
				Poll::Ready(Some(entity_type))
			}
			Poll::Ready(None) => Poll::Ready(None),
			Poll::Pending => Poll::Pending,
		}
	}

	/// Wait for the next settled key. Resolves to `None` immediately when no
	/// timer is pending.
	pub async fn next_settled(&mut self) -> Option<String> {
		if self.slots.is_empty() {
			return None;
		}
		poll_fn(|cx| self.poll_settled(cx)).await
	}
}

impl Default for DebounceRouter {
	fn default() -> Self {
		Self::new(DEFAULT_QUIET_WINDOW)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use tokio::time::{Instant, advance};

	/// Timer wheels round to whole milliseconds; allow one tick of slack.
	fn assert_settled_at(start: Instant, expected_ms: u64) {
		let elapsed = start.elapsed();
		let expected = Duration::from_millis(expected_ms);
		assert!(
			elapsed >= expected && elapsed <= expected + Duration::from_millis(2),
			"settled after {:?}, expected {:?}",
			elapsed,
			expected
		);
	}

	#[tokio::test(start_paused = true)]
	async fn single_event_settles_after_window() {
		let mut router = DebounceRouter::default();
		let start = Instant::now();

		assert_eq!(router.schedule("expense"), Scheduled::Armed);
		assert!(router.is_pending("expense"));

		let settled = router.next_settled().await;
		assert_eq!(settled.as_deref(), Some("expense"));
		assert_settled_at(start, 500);
		assert!(!router.is_pending("expense"));
		assert_eq!(router.next_settled().await, None);
	}

	#[tokio::test(start_paused = true)]
	async fn repeated_events_extend_the_window() {
		let mut router = DebounceRouter::new(Duration::from_millis(500));
		let start = Instant::now();

		router.schedule("expense");
		for _ in 0..4 {
			advance(Duration::from_millis(300)).await;
			assert_eq!(router.schedule("expense"), Scheduled::Reset);
		}
		assert_eq!(router.pending(), 1);

		let settled = router.next_settled().await;
		assert_eq!(settled.as_deref(), Some("expense"));
		assert_settled_at(start, 1_700);
	}

	#[tokio::test(start_paused = true)]
	async fn keys_settle_independently() {
		let mut router = DebounceRouter::new(Duration::from_millis(500));
		let start = Instant::now();

		router.schedule("budget");
		advance(Duration::from_millis(200)).await;
		router.schedule("people");
		advance(Duration::from_millis(200)).await;
		// resetting people must not delay budget
		router.schedule("people");

		assert_eq!(router.next_settled().await.as_deref(), Some("budget"));
		assert_settled_at(start, 500);
		assert_eq!(router.next_settled().await.as_deref(), Some("people"));
		assert_settled_at(start, 900);
	}

	#[tokio::test(start_paused = true)]
	async fn cancel_prevents_settlement() {
		let mut router = DebounceRouter::default();
		router.schedule("loan");
		router.schedule("backup");

		assert!(router.cancel("loan"));
		assert!(!router.cancel("loan"));
		assert_eq!(router.next_settled().await.as_deref(), Some("backup"));

		router.schedule("loan");
		router.schedule("income");
		assert_eq!(router.cancel_all(), 2);
		assert!(!router.has_pending());
		assert_eq!(router.next_settled().await, None);
	}

	#[tokio::test(start_paused = true)]
	async fn settled_key_rearms_from_scratch() {
		let mut router = DebounceRouter::new(Duration::from_millis(100));
		router.schedule("expense");
		assert_eq!(router.next_settled().await.as_deref(), Some("expense"));
		assert_eq!(router.schedule("expense"), Scheduled::Armed);
		assert_eq!(router.next_settled().await.as_deref(), Some("expense"));
	}
}
