//! Retention policy: how long a superseded server key must stay decryptable.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default accepted maximum secret TTL (7 days).
pub const DEFAULT_MAX_SECRET_TTL: Duration = Duration::from_secs(7 * 86400);

/// Default allowance for clock disagreement between nodes.
pub const DEFAULT_CLOCK_SKEW_MARGIN: Duration = Duration::from_secs(60);

/// Retention window for superseded keys.
///
/// A key stops encrypting the moment a newer key is installed, so every
/// secret it sealed was created no later than its supersession time and
/// expires no later than `superseded_at + max_secret_ttl`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Upper bound of any accepted secret TTL.
    pub max_secret_ttl: Duration,
    pub clock_skew_margin: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_secret_ttl: DEFAULT_MAX_SECRET_TTL,
            clock_skew_margin: DEFAULT_CLOCK_SKEW_MARGIN,
        }
    }
}

/// What to do with one keyring entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionDecision {
    /// Newest entry: encrypts new secrets, never retired.
    Current,
    /// Superseded, but secrets it sealed may still be live.
    Retained { remaining: Duration },
    /// Every secret it could have sealed has expired.
    Retire,
}

impl RetentionDecision {
    pub fn is_retire(&self) -> bool {
        matches!(self, Self::Retire)
    }
}

impl RetentionPolicy {
    pub fn new(max_secret_ttl: Duration) -> Self {
        Self {
            max_secret_ttl,
            ..Self::default()
        }
    }

    pub fn window(&self) -> Duration {
        self.max_secret_ttl.saturating_add(self.clock_skew_margin)
    }

    /// `superseded_at` is `None` for the newest entry.
    pub fn evaluate(
        &self,
        superseded_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> RetentionDecision {
        let Some(superseded_at) = superseded_at else {
            return RetentionDecision::Current;
        };
        let elapsed = (now - superseded_at).to_std().unwrap_or(Duration::ZERO);
        let window = self.window();
        if elapsed >= window {
            RetentionDecision::Retire
        } else {
            RetentionDecision::Retained {
                remaining: window - elapsed,
            }
        }
    }
}
