// Copyright 2024. The Tari Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the following
// disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Reconnect backoff for the peer connection monitor (spec §4.5, §9: "Backoff strategy as a
//! factory").

use std::time::Duration;

use rand::Rng;

/// A per-peer backoff sequence with its own attempt counter.
pub trait Backoff: Send + Sync {
    /// Returns the delay before the next reconnect attempt and advances the attempt counter.
    fn next_backoff(&mut self) -> Duration;

    /// Resets the attempt counter, e.g. after a successful connection.
    fn reset(&mut self);
}

/// Produces a fresh [`Backoff`] per peer. Injected at Transport construction (spec §4.5, §9)
/// so tests can supply a deterministic or null strategy.
pub trait BackoffStrategy: Send + Sync {
    fn new_backoff(&self) -> Box<dyn Backoff>;
}

/// Exponential backoff with full jitter: initial 10ms, doubling, capped at 30s (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl ExponentialBackoff {
    pub const DEFAULT_INITIAL: Duration = Duration::from_millis(10);
    pub const DEFAULT_MAX: Duration = Duration::from_secs(30);

    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INITIAL, Self::DEFAULT_MAX)
    }
}

impl Backoff for ExponentialBackoff {
    fn next_backoff(&mut self) -> Duration {
        let exp = self.attempt.min(32);
        self.attempt += 1;
        let cap = self
            .initial
            .checked_mul(1u32.checked_shl(exp).unwrap_or(u32::MAX))
            .unwrap_or(self.max)
            .min(self.max);
        // Full jitter: uniform in [0, cap].
        let millis = cap.as_millis().max(1) as u64;
        let jittered = rand::thread_rng().gen_range(0..=millis);
        Duration::from_millis(jittered)
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// The default strategy: a fresh [`ExponentialBackoff`] per peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialBackoffStrategy {
    initial: Duration,
    max: Duration,
}

impl ExponentialBackoffStrategy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }
}

impl BackoffStrategy for ExponentialBackoffStrategy {
    fn new_backoff(&self) -> Box<dyn Backoff> {
        let initial = if self.initial.is_zero() {
            ExponentialBackoff::DEFAULT_INITIAL
        } else {
            self.initial
        };
        let max = if self.max.is_zero() {
            ExponentialBackoff::DEFAULT_MAX
        } else {
            self.max
        };
        Box::new(ExponentialBackoff::new(initial, max))
    }
}

/// A fixed-delay backoff, useful as the deterministic strategy tests inject (spec §9).
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff(pub Duration);

impl Backoff for ConstantBackoff {
    fn next_backoff(&mut self) -> Duration {
        self.0
    }

    fn reset(&mut self) {}
}

impl BackoffStrategy for ConstantBackoff {
    fn new_backoff(&self) -> Box<dyn Backoff> {
        Box::new(*self)
    }
}

/// A zero-delay backoff for deterministic, fast tests (spec §9's "null strategy").
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBackoff;

impl Backoff for NullBackoff {
    fn next_backoff(&mut self) -> Duration {
        Duration::ZERO
    }

    fn reset(&mut self) {}
}

impl BackoffStrategy for NullBackoff {
    fn new_backoff(&self) -> Box<dyn Backoff> {
        Box::new(NullBackoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(30));
        for _ in 0..40 {
            let d = backoff.next_backoff();
            assert!(d <= Duration::from_secs(30));
        }
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(30));
        for _ in 0..10 {
            backoff.next_backoff();
        }
        backoff.reset();
        assert_eq!(backoff.attempt, 0);
    }

    #[test]
    fn constant_backoff_strategy_always_returns_same_delay() {
        let strategy = ConstantBackoff(Duration::from_secs(1));
        let mut b = strategy.new_backoff();
        assert_eq!(b.next_backoff(), Duration::from_secs(1));
        assert_eq!(b.next_backoff(), Duration::from_secs(1));
    }
}
