// Copyright 2019 Dmitry Tantsur <divius.inside@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Retry policy for the engine's version-conflict retry loop.
//!
//! spec.md §4.1 requires retries to be unbounded and livelock-safe by
//! default (each retry re-reads fresh state); §9 allows, but does not
//! require, a bounded exponential backoff as a fairness measure. This
//! is that optional backoff.

use std::time::Duration;

/// Backoff applied between retries of a version-conflict write. The
/// default never sleeps, matching spec.md's unbounded-retry default.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    enabled: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(100),
            enabled: false,
        }
    }
}

impl RetryPolicy {
    /// No backoff: retries happen as fast as the object store allows.
    pub fn unbounded() -> Self {
        RetryPolicy::default()
    }

    /// Bounded exponential backoff doubling from `initial_delay` up to
    /// `max_delay`.
    pub fn exponential(initial_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            initial_delay,
            max_delay,
            enabled: true,
        }
    }

    /// Sleep for the given retry attempt (0-indexed), if backoff is
    /// enabled.
    pub(crate) async fn backoff(&self, attempt: u32) {
        if !self.enabled {
            return;
        }
        let delay = self
            .initial_delay
            .saturating_mul(1 << attempt.min(16))
            .min(self.max_delay);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod test {
    use super::RetryPolicy;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unbounded_does_not_sleep() {
        let policy = RetryPolicy::unbounded();
        let start = std::time::Instant::now();
        policy.backoff(5).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_exponential_caps_at_max() {
        let policy = RetryPolicy::exponential(Duration::from_millis(1), Duration::from_millis(5));
        // Should not panic or overflow on a large attempt count.
        policy.backoff(30).await;
    }
}
