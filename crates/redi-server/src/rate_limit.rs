//! Per-client sliding-window rate limiting
//!
//! Each (client, tier) pair keeps the instants of its admitted requests
//! inside the current window. A request is admitted while fewer than the
//! tier's limit remain; admission records the request. Check and record
//! happen under one lock so concurrent requests from the same client
//! cannot both take the last slot.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use redi_core::{Language, RateLimitConfig, TierLimit};
use serde::Serialize;

/// Rate-limit classification of a request, derived from its language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Requests for the protected language
    Protected,
    /// Requests for any other language
    Standard,
}

impl Tier {
    pub fn for_language(language: Language, protected: Language) -> Self {
        if language == protected {
            Tier::Protected
        } else {
            Tier::Standard
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Protected => "protected",
            Tier::Standard => "standard",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type WindowKey = (String, Tier);

pub struct RateLimiter {
    limits: RateLimitConfig,
    windows: Mutex<HashMap<WindowKey, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimitConfig) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self, tier: Tier) -> TierLimit {
        match tier {
            Tier::Protected => self.limits.protected,
            Tier::Standard => self.limits.standard,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowKey, VecDeque<Instant>>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admit and record a request if the client is under the tier's limit
    pub fn admit(&self, client_id: &str, tier: Tier) -> bool {
        self.admit_at(client_id, tier, Instant::now())
    }

    pub fn admit_at(&self, client_id: &str, tier: Tier, now: Instant) -> bool {
        let limit = self.limit(tier);
        let window = limit.window();

        let mut windows = self.lock();
        let timestamps = windows
            .entry((client_id.to_string(), tier))
            .or_default();
        prune(timestamps, window, now);

        if timestamps.len() < limit.requests {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Admissions currently retained for a client and tier
    pub fn recorded(&self, client_id: &str, tier: Tier) -> usize {
        self.lock()
            .get(&(client_id.to_string(), tier))
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Time until the oldest retained admission leaves the window
    pub fn retry_after(&self, client_id: &str, tier: Tier) -> Duration {
        self.retry_after_at(client_id, tier, Instant::now())
    }

    pub fn retry_after_at(&self, client_id: &str, tier: Tier, now: Instant) -> Duration {
        let window = self.limit(tier).window();
        self.lock()
            .get(&(client_id.to_string(), tier))
            .and_then(|timestamps| timestamps.front().copied())
            .map(|oldest| (oldest + window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Drop windows whose newest admission has left the window
    pub fn prune_idle(&self) -> usize {
        self.prune_idle_at(Instant::now())
    }

    pub fn prune_idle_at(&self, now: Instant) -> usize {
        let limits = &self.limits;
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|(_, tier), timestamps| {
            let window = match tier {
                Tier::Protected => limits.protected.window(),
                Tier::Standard => limits.standard.window(),
            };
            timestamps
                .back()
                .is_some_and(|&newest| now.saturating_duration_since(newest) < window)
        });
        before - windows.len()
    }

    /// Number of (client, tier) windows held in memory
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(&oldest) = timestamps.front() {
        if now.saturating_duration_since(oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
