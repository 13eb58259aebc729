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

//! A convenient shutdown signal: one [`Shutdown`] trigger, any number of cloneable
//! [`ShutdownSignal`] waiters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};

/// Owns the trigger side. Dropping it without calling [`Shutdown::trigger`] also wakes every
/// waiter, the same as an explicit trigger, since the underlying oneshot sender reports
/// cancellation either way.
pub struct Shutdown {
    triggered: Arc<AtomicBool>,
    trigger: Option<oneshot::Sender<()>>,
    signal: Shared<oneshot::Receiver<()>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (trigger, receiver) = oneshot::channel();
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            trigger: Some(trigger),
            signal: receiver.shared(),
        }
    }

    /// Fires the signal. Idempotent: a second call is a no-op.
    pub fn trigger(&mut self) {
        if let Some(trigger) = self.trigger.take() {
            self.triggered.store(true, Ordering::SeqCst);
            let _ = trigger.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Hands out an independent waiter. Every clone observes the same trigger.
    pub fn to_signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            triggered: self.triggered.clone(),
            signal: self.signal.clone(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable handle that resolves once the owning [`Shutdown`] fires.
#[derive(Clone)]
pub struct ShutdownSignal {
    triggered: Arc<AtomicBool>,
    signal: Shared<oneshot::Receiver<()>>,
}

impl ShutdownSignal {
    /// Resolves once the signal has fired. Safe to call more than once, including after it has
    /// already fired - `Shared` caches the completed output.
    pub async fn wait(&mut self) {
        let _ = self.signal.clone().await;
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_resolves_once_triggered() {
        let mut shutdown = Shutdown::new();
        let mut signal = shutdown.to_signal();
        assert!(!signal.is_triggered());

        shutdown.trigger();
        signal.wait().await;
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn every_clone_observes_the_same_trigger() {
        let mut shutdown = Shutdown::new();
        let mut a = shutdown.to_signal();
        let mut b = shutdown.to_signal();

        shutdown.trigger();
        a.wait().await;
        b.wait().await;
        assert!(a.is_triggered());
        assert!(b.is_triggered());
    }

    #[tokio::test]
    async fn dropping_shutdown_without_triggering_still_wakes_waiters() {
        let shutdown = Shutdown::new();
        let mut signal = shutdown.to_signal();
        drop(shutdown);

        signal.wait().await;
    }

    #[test]
    fn second_trigger_is_a_no_op() {
        let mut shutdown = Shutdown::new();
        shutdown.trigger();
        shutdown.trigger();
        assert!(shutdown.is_triggered());
    }
}
