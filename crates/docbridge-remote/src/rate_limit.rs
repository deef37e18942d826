//! Per-endpoint-class call throttling.
//!
//! Each class gets up to two GCRA quotas: one for the calls-per-second
//! ceiling (burst of one, so it also sets the minimum spacing) and one for
//! the per-minute ceiling. Purely local; server side 429s still happen and
//! are handled by [`crate::retry::RetryPolicy`].

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::nanos::Nanos;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use tokio::time::{sleep, Instant};
use tracing::trace;

use crate::config::RemoteConfig;

/// Group of endpoints sharing one quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    DocumentMetadata,
    ImportJob,
    BlockMutation,
    Drive,
}

impl EndpointClass {
    pub const ALL: [EndpointClass; 4] = [
        Self::DocumentMetadata,
        Self::ImportJob,
        Self::BlockMutation,
        Self::Drive,
    ];
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DocumentMetadata => "document",
            Self::ImportJob => "import",
            Self::BlockMutation => "block",
            Self::Drive => "drive",
        };
        f.write_str(name)
    }
}

/// Call ceilings for one endpoint class. Zero disables a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u32,
    pub per_minute: u32,
}

impl RateLimit {
    pub const fn new(per_second: u32, per_minute: u32) -> Self {
        Self {
            per_second,
            per_minute,
        }
    }

    pub const fn unlimited() -> Self {
        Self::new(0, 0)
    }

    /// Minimum spacing between consecutive calls.
    pub fn min_interval(&self) -> Duration {
        if self.per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / self.per_second
        }
    }

    /// Governor quotas for the configured ceilings.
    fn quotas(&self) -> Vec<Quota> {
        let mut quotas = Vec::new();
        if let Some(n) = NonZeroU32::new(self.per_second) {
            quotas.push(Quota::per_second(n).allow_burst(NonZeroU32::MIN));
        }
        if let Some(m) = NonZeroU32::new(self.per_minute) {
            quotas.push(Quota::per_minute(m));
        }
        quotas
    }
}

/// Governor clock reading tokio time, so paused-time tests drive the quotas.
#[derive(Debug, Clone)]
struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    type Instant = Nanos;

    fn now(&self) -> Nanos {
        Nanos::from(self.origin.elapsed())
    }
}

type Gate = governor::RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<Nanos>>;

/// Quota throttle keyed by [`EndpointClass`].
pub struct RateLimiter {
    clock: TokioClock,
    gates: HashMap<EndpointClass, Vec<Gate>>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("classes", &self.gates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(limits: HashMap<EndpointClass, RateLimit>) -> Self {
        let clock = TokioClock::new();
        let gates = limits
            .into_iter()
            .map(|(class, limit)| {
                let gates = limit
                    .quotas()
                    .into_iter()
                    .map(|quota| Gate::direct_with_clock(quota, &clock))
                    .collect();
                (class, gates)
            })
            .collect();
        Self { clock, gates }
    }

    /// Build from the per-class limits in a [`RemoteConfig`].
    pub fn from_config(config: &RemoteConfig) -> Self {
        let limits = EndpointClass::ALL
            .iter()
            .map(|class| (*class, config.rate_for(*class)))
            .collect();
        Self::new(limits)
    }

    /// Suspend until a call in `class` may proceed.
    pub async fn throttle(&self, class: EndpointClass) {
        let Some(gates) = self.gates.get(&class) else {
            return;
        };
        for gate in gates {
            // Same loop as `until_ready`, but sleeping on the tokio clock.
            while let Err(not_until) = gate.check() {
                let wait = not_until
                    .wait_time_from(self.clock.now())
                    .max(Duration::from_millis(1));
                trace!(endpoint = %class, wait_ms = wait.as_millis() as u64, "Throttling");
                sleep(wait).await;
            }
        }
    }
}
