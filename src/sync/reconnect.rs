use std::time::Duration;

use rand::Rng;

/// Exponential backoff with additive jitter for re-opening the push
/// connection after it errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
	/// Delay before the first retry
	pub initial: Duration,
	/// Upper bound for the un-jittered delay
	pub max: Duration,
	/// Up to this percentage of the delay is added as random jitter
	pub jitter_pct: u8,
	/// Give up after this many consecutive failures; `None` retries forever
	pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			initial: Duration::from_secs(1),
			max: Duration::from_secs(30),
			jitter_pct: 25,
			max_attempts: None,
		}
	}
}

impl ReconnectPolicy {
	/// Same delay every time, no jitter.
	pub fn fixed(delay: Duration) -> Self {
		Self {
			initial: delay,
			max: delay,
			jitter_pct: 0,
			max_attempts: None,
		}
	}

	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.max_attempts = Some(attempts);
		self
	}

	/// Backoff before retry number `attempt` (0-based), or `None` once the
	/// attempt budget is spent.
	pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
		if let Some(limit) = self.max_attempts {
			if attempt >= limit {
				return None;
			}
		}

		let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
		let base = self.initial.saturating_mul(factor).min(self.max);

		let max_jitter = base.as_millis() as u64 * u64::from(self.jitter_pct.min(100)) / 100;
		if max_jitter == 0 {
			return Some(base);
		}
		let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter);
		Some(base.saturating_add(Duration::from_millis(jitter_ms)))
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn doubles_until_capped() {
		let policy = ReconnectPolicy {
			initial: Duration::from_millis(100),
			max: Duration::from_millis(1_000),
			jitter_pct: 0,
			max_attempts: None,
		};

		let delays: Vec<u128> = (0..6)
			.map(|a| policy.delay_for(a).expect("unlimited").as_millis())
			.collect();
		assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
		// huge attempt numbers must not overflow
		assert_eq!(policy.delay_for(200), Some(Duration::from_millis(1_000)));
	}

	#[test]
	fn jitter_stays_within_bounds() {
		let policy = ReconnectPolicy {
			initial: Duration::from_millis(1_000),
			max: Duration::from_secs(30),
			jitter_pct: 25,
			max_attempts: None,
		};

		for _ in 0..200 {
			let d = policy.delay_for(0).expect("unlimited");
			assert!(d >= Duration::from_millis(1_000));
			assert!(d <= Duration::from_millis(1_250));
		}
	}

	#[test]
	fn attempt_budget_is_enforced() {
		let policy = ReconnectPolicy::fixed(Duration::from_millis(50)).with_max_attempts(2);
		assert_eq!(policy.delay_for(0), Some(Duration::from_millis(50)));
		assert_eq!(policy.delay_for(1), Some(Duration::from_millis(50)));
		assert_eq!(policy.delay_for(2), None);
	}
}
