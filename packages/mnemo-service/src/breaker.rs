//! Three-state circuit breaker guarding the worker's external dependencies.
//! One breaker per dependency; transitions are independent.

use std::sync::Mutex;

use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
	Closed,
	Open,
	HalfOpen,
}

#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
	/// Consecutive failures within the window that open the circuit.
	pub failure_threshold: u32,
	/// Window within which consecutive failures are counted.
	pub window: Duration,
	/// Cooldown before an open circuit admits a probe.
	pub cooldown: Duration,
}

impl Default for BreakerConfig {
	fn default() -> Self {
		Self {
			failure_threshold: 5,
			window: Duration::seconds(60),
			cooldown: Duration::seconds(30),
		}
	}
}

struct BreakerInner {
	state: CircuitState,
	consecutive_failures: u32,
	first_failure_at: Option<OffsetDateTime>,
	opened_at: Option<OffsetDateTime>,
	probe_outstanding: bool,
}

pub struct CircuitBreaker {
	name: &'static str,
	config: BreakerConfig,
	inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
	pub fn new(name: &'static str, config: BreakerConfig) -> Self {
		Self {
			name,
			config,
			inner: Mutex::new(BreakerInner {
				state: CircuitState::Closed,
				consecutive_failures: 0,
				first_failure_at: None,
				opened_at: None,
				probe_outstanding: false,
			}),
		}
	}

	pub fn state(&self) -> CircuitState {
		self.inner.lock().unwrap_or_else(|err| err.into_inner()).state
	}

	/// Whether a call may proceed. An open circuit past its cooldown admits
	/// exactly one probe and moves to half-open.
	pub fn allow(&self, now: OffsetDateTime) -> bool {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		match inner.state {
			CircuitState::Closed => true,
			CircuitState::Open => {
				let cooled_down = inner
					.opened_at
					.is_some_and(|opened_at| now - opened_at >= self.config.cooldown);

				if !cooled_down {
					return false;
				}

				inner.state = CircuitState::HalfOpen;
				inner.probe_outstanding = true;

				info!(breaker = self.name, "Circuit half-open; admitting probe.");

				true
			},
			CircuitState::HalfOpen =>
				if inner.probe_outstanding {
					false
				} else {
					inner.probe_outstanding = true;

					true
				},
		}
	}

	pub fn record_success(&self) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		if inner.state != CircuitState::Closed {
			info!(breaker = self.name, "Circuit closed.");
		}

		inner.state = CircuitState::Closed;
		inner.consecutive_failures = 0;
		inner.first_failure_at = None;
		inner.opened_at = None;
		inner.probe_outstanding = false;
	}

	pub fn record_failure(&self, now: OffsetDateTime) {
		let mut inner = self.inner.lock().unwrap_or_else(|err| err.into_inner());

		if inner.state == CircuitState::HalfOpen {
			inner.state = CircuitState::Open;
			inner.opened_at = Some(now);
			inner.probe_outstanding = false;

			warn!(breaker = self.name, "Probe failed; circuit re-opened.");

			return;
		}

		let window_expired = inner
			.first_failure_at
			.is_some_and(|first| now - first > self.config.window);

		if window_expired {
			inner.consecutive_failures = 0;
			inner.first_failure_at = None;
		}
		if inner.first_failure_at.is_none() {
			inner.first_failure_at = Some(now);
		}

		inner.consecutive_failures += 1;

		if inner.state == CircuitState::Closed
			&& inner.consecutive_failures >= self.config.failure_threshold
		{
			inner.state = CircuitState::Open;
			inner.opened_at = Some(now);

			warn!(
				breaker = self.name,
				failures = inner.consecutive_failures,
				"Circuit opened."
			);
		}
	}
}

/// The worker's breaker set, one per external dependency.
pub struct Breakers {
	pub store: CircuitBreaker,
	pub embedder: CircuitBreaker,
}

impl Breakers {
	pub fn new() -> Self {
		Self {
			store: CircuitBreaker::new("store", BreakerConfig::default()),
			embedder: CircuitBreaker::new("embedder", BreakerConfig::default()),
		}
	}
}
impl Default for Breakers {
	fn default() -> Self {
		Self::new()
	}
}
